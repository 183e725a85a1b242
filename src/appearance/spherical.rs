//! Spherical UV sampling.
//!
//! Every ray is extended until it leaves a sphere around the scene origin.
//! The exit direction is mapped to the appearance image with an
//! equirectangular projection centered on the image:
//!
//! ```plaintext
//! azimuth   = atan2(s_x, -s_z)                in (-pi, pi]
//! elevation = asin(s_y)                       in [-pi/2, pi/2]
//! u = (azimuth / (2 * pi) + 0.5) * W
//! v = (0.5 - elevation / pi) * H
//! ```
//!
//! The direction `-Z` lands on the image center and `+Y` on the top row.

pub use super::*;

use crate::camera::RAY_CHANNEL_COUNT;
use crate::function::TensorFloatExtension;
use rayon::prelude::*;
use std::f64::consts::PI;

/// The configuration for [`SphericalSampler`].
#[derive(Config, Copy, Debug, PartialEq)]
pub struct SphericalSamplerConfig {
    /// Radius of the sampling sphere around the origin.
    ///
    /// A non-positive value falls back to the radius given at [`Self::init`].
    #[config(default = 0.0)]
    pub radius: f64,
}

/// Finds the appearance coordinate seen by each ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphericalSampler {
    /// Radius of the sampling sphere.
    pub radius: f64,
}

impl SphericalSamplerConfig {
    /// Initialize from the configuration.
    ///
    /// `radius_fallback` is used when the configured radius is not positive.
    pub fn init(
        &self,
        radius_fallback: f64,
    ) -> Result<SphericalSampler, Error> {
        let radius = if self.radius > 0.0 {
            self.radius
        } else {
            radius_fallback
        };
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(Error::Config(format!(
                "the sampling sphere radius {radius} should be positive and finite"
            )));
        }
        Ok(SphericalSampler { radius })
    }
}

impl Default for SphericalSamplerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl SphericalSampler {
    /// Samples one coordinate per ray, in ray order.
    ///
    /// ## Shapes
    ///
    /// * `rays` - `[B, 8]`
    pub fn sample<B: Backend>(
        &self,
        rays: Tensor<B, 2>,
        width: u32,
        height: u32,
    ) -> Result<Vec<Uv>, Error> {
        let rays = rays.into_vec_f32()?;
        Ok(self.sample_slice(&rays, width, height))
    }

    /// Samples one coordinate per packed ray of `rays`.
    pub fn sample_slice(
        &self,
        rays: &[f32],
        width: u32,
        height: u32,
    ) -> Vec<Uv> {
        rays.par_chunks_exact(RAY_CHANNEL_COUNT)
            .map(|ray| {
                let origin = [ray[0], ray[1], ray[2]].map(f64::from);
                let direction = [ray[3], ray[4], ray[5]].map(f64::from);
                let exit = self.exit_direction(&origin, &direction);
                direction_to_uv(&exit, width, height)
            })
            .collect()
    }

    /// The unit direction from the origin to where the ray leaves the sphere.
    ///
    /// ## Details
    ///
    /// A ray that misses the sphere (or only meets it behind its origin)
    /// uses the point of the ray closest to the center instead.
    /// Degenerate inputs fall back to `-Z`.
    pub fn exit_direction(
        &self,
        origin: &[f64; 3],
        direction: &[f64; 3],
    ) -> [f64; 3] {
        const FALLBACK: [f64; 3] = [0.0, 0.0, -1.0];

        if origin.iter().chain(direction).any(|x| !x.is_finite()) {
            return FALLBACK;
        }

        let a = dot(direction, direction);
        let b = 2.0 * dot(origin, direction);
        let c = dot(origin, origin) - self.radius * self.radius;
        let discriminant = b * b - 4.0 * a * c;

        let point = if a > f64::EPSILON && discriminant >= 0.0 {
            let t = (-b + discriminant.sqrt()) / (2.0 * a);
            if t >= 0.0 {
                add_scaled(origin, direction, t)
            } else {
                add_scaled(origin, direction, 0.0)
            }
        } else {
            let t = if a > f64::EPSILON {
                (-dot(origin, direction) / a).max(0.0)
            } else {
                0.0
            };
            add_scaled(origin, direction, t)
        };

        normalize(&point)
            .or_else(|| normalize(direction))
            .unwrap_or(FALLBACK)
    }
}

/// Maps a unit direction to a clamped integer appearance coordinate.
pub fn direction_to_uv(
    direction: &[f64; 3],
    width: u32,
    height: u32,
) -> Uv {
    // NOTE: `0.0 - z` avoids `-0.0`, which would flip the azimuth to `pi`.
    let azimuth = direction[0].atan2(0.0 - direction[2]);
    let elevation = direction[1].clamp(-1.0, 1.0).asin();
    let u = (azimuth / (2.0 * PI) + 0.5) * width as f64;
    let v = (0.5 - elevation / PI) * height as f64;

    Uv {
        u: (u.floor().max(0.0) as u32).min(width.saturating_sub(1)),
        v: (v.floor().max(0.0) as u32).min(height.saturating_sub(1)),
    }
}

/// The unit direction through the center of the pixel `uv`.
///
/// It inverts [`direction_to_uv`] up to the pixel quantization.
pub fn uv_to_direction(
    uv: &Uv,
    width: u32,
    height: u32,
) -> [f64; 3] {
    let azimuth = ((uv.u as f64 + 0.5) / width as f64 - 0.5) * 2.0 * PI;
    let elevation = (0.5 - (uv.v as f64 + 0.5) / height as f64) * PI;
    let (sin_a, cos_a) = azimuth.sin_cos();
    let (sin_e, cos_e) = elevation.sin_cos();
    [cos_e * sin_a, sin_e, -cos_e * cos_a]
}

#[inline]
fn dot(
    a: &[f64; 3],
    b: &[f64; 3],
) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn add_scaled(
    a: &[f64; 3],
    b: &[f64; 3],
    t: f64,
) -> [f64; 3] {
    [a[0] + b[0] * t, a[1] + b[1] * t, a[2] + b[2] * t]
}

#[inline]
fn normalize(a: &[f64; 3]) -> Option<[f64; 3]> {
    let norm = dot(a, a).sqrt();
    (norm > f64::EPSILON && norm.is_finite()).then(|| a.map(|x| x / norm))
}
