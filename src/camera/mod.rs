//! Camera poses, intrinsics, trajectories and rays.

pub mod rays;
pub mod trajectory;

pub use crate::{backend::Backend, error::Error};
pub use burn::tensor::{Tensor, TensorData};
pub use rays::*;
pub use trajectory::*;

/// A rigid transform from camera space to world space.
///
/// The camera space follows the OpenGL convention:
/// `+X` is right, `+Y` is up and the camera looks along `-Z`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    /// Affine transformation from camera space to world space.
    ///
    /// It is in **row-major order**, i.e., `M[row][col]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [R_c   | T_c]
    /// [0 0 0 | 1  ]
    /// ```
    pub camera_to_world: [[f64; 4]; 4],
}

/// Pinhole camera intrinsics in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Intrinsics {
    /// `(f_x, f_y)`
    pub focal_length: [f64; 2],
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// `(c_x, c_y)`
    pub principal_point: [f64; 2],
}

/// Linear transformations.
impl Pose {
    pub const IDENTITY: Self = Self::new(
        &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        &[0.0, 0.0, 0.0],
    );

    #[inline]
    pub const fn new(
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> Self {
        Self {
            camera_to_world: Self::transform(rotation, translation),
        }
    }

    /// Returns the affine transformation matrix.
    ///
    /// It is in **row-major order**, i.e., `M[row][col]`.
    #[inline]
    pub const fn transform(
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> [[f64; 4]; 4] {
        let r = rotation;
        let t = translation;
        [
            [r[0][0], r[0][1], r[0][2], t[0]],
            [r[1][0], r[1][1], r[1][2], t[1]],
            [r[2][0], r[2][1], r[2][2], t[2]],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    #[inline]
    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let m = &self.camera_to_world;
        [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ]
    }

    /// The camera position in world space.
    #[inline]
    pub fn translation(&self) -> [f64; 3] {
        let m = &self.camera_to_world;
        [m[0][3], m[1][3], m[2][3]]
    }

    /// Returns `self * rhs`.
    pub fn compose(
        &self,
        rhs: &Self,
    ) -> Self {
        let a = &self.camera_to_world;
        let b = &rhs.camera_to_world;
        let mut camera_to_world = [[0.0; 4]; 4];
        for (row, output) in camera_to_world.iter_mut().enumerate() {
            for (col, value) in output.iter_mut().enumerate() {
                *value = (0..4).map(|k| a[row][k] * b[k][col]).sum();
            }
        }
        Self { camera_to_world }
    }

    /// Packs the poses into a tensor.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[N, 4, 4]`
    pub fn to_tensor<B: Backend>(
        poses: &[Self],
        device: &B::Device,
    ) -> Tensor<B, 3> {
        let values = poses
            .iter()
            .flat_map(|pose| pose.camera_to_world.concat())
            .map(|value| value as f32)
            .collect::<Vec<_>>();
        Tensor::from_data(TensorData::new(values, [poses.len(), 4, 4]), device)
    }
}

impl Default for Pose {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Intrinsics {
    /// Intrinsics with the principal point at the image center.
    pub fn centered(
        focal_length: [f64; 2],
        image_width: u32,
        image_height: u32,
    ) -> Self {
        Self {
            focal_length,
            image_height,
            image_width,
            principal_point: [image_width as f64 / 2.0, image_height as f64 / 2.0],
        }
    }

    /// Rescales the image dimensions and the pinhole parameters by `factor`.
    ///
    /// ## Details
    ///
    /// The dimensions are truncated to integers. An inexact scaling is
    /// reported as a warning and does not fail.
    pub fn scale(
        &self,
        factor: f64,
    ) -> Self {
        if factor == 1.0 {
            return *self;
        }

        let image_height = (self.image_height as f64 * factor) as u32;
        let image_width = (self.image_width as f64 * factor) as u32;
        if !self.is_scale_exact(factor) {
            log::warn!(
                target: "harmonerf_renderer::camera",
                "Inexact scaling, please check {factor} times ({}, {}) is integral",
                self.image_height,
                self.image_width,
            );
        }

        Self {
            focal_length: self.focal_length.map(|f| f * factor),
            image_height,
            image_width,
            principal_point: self.principal_point.map(|c| c * factor),
        }
    }

    /// Whether `factor` maps both image dimensions to integers.
    pub fn is_scale_exact(
        &self,
        factor: f64,
    ) -> bool {
        let height = (self.image_height as f64 * factor) as u32;
        let width = (self.image_width as f64 * factor) as u32;
        (height as f64 / factor - self.image_height as f64).abs() <= 1e-10
            && (width as f64 / factor - self.image_width as f64).abs() <= 1e-10
    }

}
