//! Per-pixel rays.

pub use super::*;

use crate::function::TensorFloatExtension;

/// The number of values packed in a ray.
///
/// `(o_x, o_y, o_z, d_x, d_y, d_z, near, far)`
pub const RAY_CHANNEL_COUNT: usize = 8;

/// A dense grid of rays, one per pixel of every view.
#[derive(Clone, Debug)]
pub struct RayGrid<B: Backend> {
    /// `[N, H, W, 8]`
    ///
    /// Directions are unit vectors in world space.
    pub rays: Tensor<B, 4>,
}

impl<B: Backend> RayGrid<B> {
    /// Unprojects every pixel of every pose through the pinhole intrinsics.
    ///
    /// ## Arguments
    ///
    /// * `intrinsics` - Either one entry shared by all poses or one per pose.
    ///   All entries should have the same resolution.
    pub fn generate(
        poses: &[Pose],
        intrinsics: &[Intrinsics],
        z_near: f64,
        z_far: f64,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let first = intrinsics.first().ok_or_else(|| {
            Error::Validation("the intrinsics count".into(), "at least 1".into())
        })?;
        if intrinsics.len() != 1 && intrinsics.len() != poses.len() {
            return Err(Error::Validation(
                format!("the intrinsics count {}", intrinsics.len()),
                format!("1 or the pose count {}", poses.len()),
            ));
        }
        if intrinsics.iter().any(|i| {
            i.image_height != first.image_height || i.image_width != first.image_width
        }) {
            return Err(Error::Validation(
                "the intrinsics resolutions".into(),
                "identical".into(),
            ));
        }

        // N
        let view_count = poses.len();
        // H
        let height = first.image_height as usize;
        // W
        let width = first.image_width as usize;
        let pixel_count = height * width;

        // [N, H * W, 3]
        let mut directions_camera = Tensor::cat(
            intrinsics
                .iter()
                .map(|intrinsics| Self::unproject(intrinsics, device))
                .collect(),
            0,
        );
        if intrinsics.len() == 1 {
            directions_camera = directions_camera.repeat_dim(0, view_count);
        }

        // [N, 4, 4]
        let transforms = Pose::to_tensor::<B>(poses, device);
        // [N, 3, 3]
        let rotations = transforms.to_owned().slice([0..view_count, 0..3, 0..3]);
        // [N, 1, 3]
        let origins = transforms
            .slice([0..view_count, 0..3, 3..4])
            .swap_dims(1, 2);

        // [N, H * W, 3] <- [N, H * W, 3] * [N, 3, 3]^T
        let directions = directions_camera.matmul_batched(rotations.swap_dims(1, 2));
        let origins = origins.repeat_dim(1, pixel_count);
        let nears = Tensor::full([view_count, pixel_count, 1], z_near as f32, device);
        let fars = Tensor::full([view_count, pixel_count, 1], z_far as f32, device);

        let rays = Tensor::cat(vec![origins, directions, nears, fars], 2)
            .reshape([view_count, height, width, RAY_CHANNEL_COUNT]);

        Ok(Self { rays })
    }

    /// Unit ray directions in camera space.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[1, H * W, 3]`
    pub fn unproject(
        intrinsics: &Intrinsics,
        device: &B::Device,
    ) -> Tensor<B, 3> {
        let [f_x, f_y] = intrinsics.focal_length;
        let [c_x, c_y] = intrinsics.principal_point;
        let height = intrinsics.image_height as usize;
        let width = intrinsics.image_width as usize;

        let directions = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .flat_map(|(x, y)| {
                let d_x = (x as f64 - c_x) / f_x;
                let d_y = -(y as f64 - c_y) / f_y;
                let d_z = -1.0;
                let norm = (d_x * d_x + d_y * d_y + d_z * d_z).sqrt();
                [d_x / norm, d_y / norm, d_z / norm].map(|d| d as f32)
            })
            .collect::<Vec<_>>();

        Tensor::from_data(
            TensorData::new(directions, [1, height * width, 3]),
            device,
        )
    }

    /// Returns `[N, H, W]`.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        let [n, h, w, _] = self.rays.dims();
        [n, h, w]
    }

    /// All rays in row-major pixel order.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[N * H * W, 8]`
    #[inline]
    pub fn flatten(&self) -> Tensor<B, 2> {
        self.rays.to_owned().flatten(0, 2)
    }
}
