//! Encoded source views.

pub use super::*;

/// The source views a radiance field is conditioned on.
///
/// It is made by [`RadianceField::encode`] and read by every
/// [`RadianceField::query`]. The default context holds no views.
#[derive(Clone, Debug)]
pub struct EncodingContext<B: Backend> {
    pub views: Option<EncodedViews<B>>,
}

/// `N = S * V` rows are ordered scene-major, then view-major.
#[derive(Clone, Debug)]
pub struct EncodedViews<B: Backend> {
    /// `[N, C, H_f, W_f]`
    pub features: Option<Tensor<B, 4>>,
    /// `[N, 1, 2]`, with the `y` focal length negated
    pub focal_length: Tensor<B, 3>,
    /// `[N, C_g]`
    pub global_latent: Option<Tensor<B, 2>>,
    /// `(H, W)` of the source images
    pub image_size: [usize; 2],
    /// `[N, 1, 2]`
    pub principal_point: Tensor<B, 3>,
    /// `[N, 3, 3]` world-to-camera rotations
    pub rotations: Tensor<B, 3>,
    /// `S`
    pub scene_count: usize,
    /// `[N, 1, 3]` world-to-camera translations
    pub translations: Tensor<B, 3>,
    /// `V`, source views per scene
    pub view_count: usize,
}

impl<B: Backend> EncodingContext<B> {
    #[inline]
    pub fn is_encoded(&self) -> bool {
        self.views.is_some()
    }

    /// The encoded views, or [`Error::UnencodedState`].
    #[inline]
    pub fn views(&self) -> Result<&EncodedViews<B>, Error> {
        self.views.as_ref().ok_or(Error::UnencodedState)
    }
}

impl<B: Backend> Default for EncodingContext<B> {
    #[inline]
    fn default() -> Self {
        Self { views: None }
    }
}

impl<B: Backend> EncodedViews<B> {
    /// Transforms world points into the camera frame of every view.
    ///
    /// ## Shapes
    ///
    /// * `points` - `[S, P, 3]`
    /// * `output` - `([N, P, 3], [N, P, 3])` as `(rotated, rotated + translated)`
    pub fn to_camera(
        &self,
        points: Tensor<B, 3>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let rotated = self.rotate(points);
        let translated = rotated.to_owned() + self.translations.to_owned();
        (rotated, translated)
    }

    /// Rotates world vectors into the camera frame of every view.
    ///
    /// ## Shapes
    ///
    /// * `vectors` - `[S, P, 3]`
    /// * `output` - `[N, P, 3]`
    pub fn rotate(
        &self,
        vectors: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        vectors
            .repeat_interleave(self.view_count)
            .matmul_batched(self.rotations.to_owned().swap_dims(1, 2))
    }

    /// Projects camera-frame points to source-image pixels `(u, v)`.
    ///
    /// ## Shapes
    ///
    /// * `points_camera` - `[N, P, 3]`
    /// * `output` - `[N, P, 2]`
    ///
    /// ## Details
    ///
    /// Points at or behind the camera plane are projected as if they lay
    /// slightly in front of it, which keeps the output finite.
    pub fn project(
        &self,
        points_camera: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        const DEPTH_MIN: f32 = 1e-6;

        let [n, p, _] = points_camera.dims();
        let xy = points_camera.to_owned().slice([0..n, 0..p, 0..2]);
        let z = points_camera.slice([0..n, 0..p, 2..3]).clamp_max(-DEPTH_MIN);

        // u = -x / z * f_x + c_x, v = -y / z * (-f_y) + c_y
        xy.div(z).neg() * self.focal_length.to_owned() + self.principal_point.to_owned()
    }
}
