//! Appearance harmonization: where each ray looks in the appearance image,
//! and the style of what it sees there.

pub mod dedup;
pub mod encoder;
pub mod patch;
pub mod spherical;
pub mod style;

pub use crate::{backend::Backend, error::Error};
pub use burn::{
    config::Config,
    module::Module,
    tensor::{Int, Tensor, TensorData},
};
pub use dedup::*;
pub use encoder::*;
pub use patch::*;
pub use spherical::*;
pub use style::*;

/// The reference image providing the style for a whole video.
#[derive(Clone, Debug)]
pub struct AppearanceImage<B: Backend> {
    /// `[3, H, W]` in `[-1, 1]`
    pub pixels: Tensor<B, 3>,
}

/// An integer coordinate in the appearance image.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Uv {
    /// Column, `0 <= u < W`
    pub u: u32,
    /// Row, `0 <= v < H`
    pub v: u32,
}

/// A non-empty half-open region `[u_min, u_max) x [v_min, v_max)`
/// of the appearance image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UvBounds {
    pub u_max: u32,
    pub u_min: u32,
    pub v_max: u32,
    pub v_min: u32,
}

impl<B: Backend> AppearanceImage<B> {
    /// Wraps `[3, H, W]` pixels in `[-1, 1]`.
    pub fn new(pixels: Tensor<B, 3>) -> Result<Self, Error> {
        let [channels, height, width] = pixels.dims();
        if channels != 3 {
            return Err(Error::Validation(
                format!("the appearance channel count {channels}"),
                "3".into(),
            ));
        }
        if height == 0 || width == 0 {
            return Err(Error::Validation(
                format!("the appearance size {height}x{width}"),
                "non-empty".into(),
            ));
        }
        Ok(Self { pixels })
    }

    /// Decodes interleaved 8-bit RGB pixels, row-major.
    pub fn from_rgb8(
        rgb: &[u8],
        width: usize,
        height: usize,
        device: &B::Device,
    ) -> Result<Self, Error> {
        if rgb.len() != width * height * 3 {
            return Err(Error::Validation(
                format!("the RGB byte count {}", rgb.len()),
                format!("{}", width * height * 3),
            ));
        }
        let values = rgb
            .iter()
            .map(|&c| c as f32 / 255.0 * 2.0 - 1.0)
            .collect::<Vec<_>>();
        let pixels = Tensor::<B, 3>::from_data(
            TensorData::new(values, [height, width, 3]),
            device,
        )
        .permute([2, 0, 1]);
        Self::new(pixels)
    }

    /// Returns `(H, W)`.
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        let [_, height, width] = self.pixels.dims();
        (height as u32, width as u32)
    }

    /// The pixels mapped to `[0, 1]`.
    #[inline]
    pub fn unit_range(&self) -> Tensor<B, 3> {
        self.pixels.to_owned().add_scalar(1.0).mul_scalar(0.5)
    }

    /// Crops `bounds` from the image.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[3, v_max - v_min, u_max - u_min]`
    pub fn crop(
        &self,
        bounds: &UvBounds,
    ) -> Tensor<B, 3> {
        self.pixels.to_owned().slice([
            0..3,
            bounds.v_min as usize..bounds.v_max as usize,
            bounds.u_min as usize..bounds.u_max as usize,
        ])
    }
}

impl UvBounds {
    /// The bounds of `coordinates` grown by `margin` on every side,
    /// clamped to a `width x height` image.
    ///
    /// ## Details
    ///
    /// An empty input yields the single center pixel, so the bounds are
    /// never empty.
    pub fn around<'a, I: IntoIterator<Item = &'a Uv>>(
        coordinates: I,
        margin: u32,
        width: u32,
        height: u32,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let extremes = coordinates.into_iter().fold(None, |extremes, uv| {
            let (u_min, u_max, v_min, v_max) =
                extremes.unwrap_or((uv.u, uv.u, uv.v, uv.v));
            Some((
                u_min.min(uv.u),
                u_max.max(uv.u),
                v_min.min(uv.v),
                v_max.max(uv.v),
            ))
        });

        let Some((u_min, u_max, v_min, v_max)) = extremes else {
            let (u, v) = (width / 2, height / 2);
            return Self {
                u_max: u + 1,
                u_min: u,
                v_max: v + 1,
                v_min: v,
            };
        };

        let u_min = u_min.saturating_sub(margin).min(width - 1);
        let v_min = v_min.saturating_sub(margin).min(height - 1);
        let u_max = u_max.saturating_add(margin).saturating_add(1).min(width);
        let v_max = v_max.saturating_add(margin).saturating_add(1).min(height);

        Self {
            u_max: u_max.max(u_min + 1),
            u_min,
            v_max: v_max.max(v_min + 1),
            v_min,
        }
    }

    /// The smallest bounds containing both.
    #[inline]
    pub fn union(
        &self,
        other: &Self,
    ) -> Self {
        Self {
            u_max: self.u_max.max(other.u_max),
            u_min: self.u_min.min(other.u_min),
            v_max: self.v_max.max(other.v_max),
            v_min: self.v_min.min(other.v_min),
        }
    }

    /// Returns `(height, width)`.
    #[inline]
    pub const fn size(&self) -> (u32, u32) {
        (self.v_max - self.v_min, self.u_max - self.u_min)
    }
}
