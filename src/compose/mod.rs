//! Output frames and the reference still.

pub use crate::{backend::Backend, error::Error, function::TensorFloatExtension};
pub use burn::tensor::{
    module::interpolate,
    ops::{InterpolateMode, InterpolateOptions},
    Tensor, TensorData,
};

use bytemuck::{Pod, Zeroable};

/// An 8-bit RGB pixel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Pod, Zeroable)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Receives the composed frames in order.
pub trait FrameSink {
    /// `bytes` holds `height * width * channels` interleaved values, row-major.
    fn write_frame(
        &mut self,
        width: u32,
        height: u32,
        channels: u32,
        bytes: &[u8],
    ) -> Result<(), Error>;
}

/// An 8-bit frame on the host.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub channels: u32,
    pub height: u32,
    pub width: u32,
}

/// Frames accumulated in memory, handed to a video encoder afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Video {
    pub fps: u32,
    pub frames: Vec<Frame>,
}

impl Video {
    #[inline]
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            frames: vec![],
        }
    }
}

impl FrameSink for Video {
    fn write_frame(
        &mut self,
        width: u32,
        height: u32,
        channels: u32,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let size = width as usize * height as usize * channels as usize;
        if bytes.len() != size {
            return Err(Error::Validation(
                format!("the frame byte count {}", bytes.len()),
                format!("{size}"),
            ));
        }
        self.frames.push(Frame {
            bytes: bytes.to_vec(),
            channels,
            height,
            width,
        });
        Ok(())
    }
}

/// Places the harmonization area beside the rendered colors.
///
/// ## Shapes
///
/// * `colors` - `[H, W, 3]` in `[0, 1]`
/// * `area` - `[3, h, w]` in `[0, 1]`
/// * `output` - `[H, W, 6]`
///
/// ## Details
///
/// The area is resized by `min(H / h, W / w)` and zero-padded at the top
/// and right, so it sits at the bottom-left of its half.
pub fn compose_frame<B: Backend>(
    colors: Tensor<B, 3>,
    area: Tensor<B, 3>,
) -> Result<Tensor<B, 3>, Error> {
    let [height, width, channels] = colors.dims();
    if channels != 3 || height == 0 || width == 0 {
        return Err(Error::Validation(
            format!("the rendered frame shape {:?}", colors.dims()),
            "[H > 0, W > 0, 3]".into(),
        ));
    }

    let area = fit_area(area, height, width)?.permute([1, 2, 0]);
    Ok(Tensor::cat(vec![colors, area], 2))
}

/// Resizes `area` to fit `height x width` preserving its aspect ratio,
/// then zero-pads it to exactly that size.
///
/// ## Shapes
///
/// * `area` - `[3, h, w]`
/// * `output` - `[3, height, width]`
pub fn fit_area<B: Backend>(
    area: Tensor<B, 3>,
    height: usize,
    width: usize,
) -> Result<Tensor<B, 3>, Error> {
    let [channels, area_height, area_width] = area.dims();
    if area_height == 0 || area_width == 0 {
        return Err(Error::Validation(
            format!("the harmonization area shape {:?}", area.dims()),
            "non-empty".into(),
        ));
    }
    let device = area.device();

    let scale = (height as f64 / area_height as f64).min(width as f64 / area_width as f64);
    let height_resized = ((area_height as f64 * scale) as usize).clamp(1, height);
    let width_resized = ((area_width as f64 * scale) as usize).clamp(1, width);

    let mut area = if [height_resized, width_resized] == [area_height, area_width] {
        area
    } else {
        interpolate(
            area.unsqueeze::<4>(),
            [height_resized, width_resized],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        )
        .squeeze::<3>(0)
    };

    let pad_top = height - height_resized;
    let pad_right = width - width_resized;
    if pad_right > 0 {
        area = Tensor::cat(
            vec![area, Tensor::zeros([channels, height_resized, pad_right], &device)],
            2,
        );
    }
    if pad_top > 0 {
        area = Tensor::cat(vec![Tensor::zeros([channels, pad_top, width], &device), area], 1);
    }

    Ok(area)
}

/// Source views side by side.
///
/// ## Shapes
///
/// * `images` - `[N_S, 3, H, W]` in `[-1, 1]`
/// * `output` - `[H, N_S * W, 3]` in `[0, 1]`
pub fn reference_still<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 3> {
    let [count, channels, height, width] = images.dims();

    images
        .add_scalar(1.0)
        .mul_scalar(0.5)
        .permute([2, 0, 3, 1])
        .reshape([height, count * width, channels])
}

/// Quantizes values in `[0, 1]` to bytes, truncating.
pub fn quantize<B: Backend, const D: usize>(image: Tensor<B, D>) -> Result<Vec<u8>, Error> {
    Ok(image
        .into_vec_f32()?
        .into_iter()
        .map(|value| (value.clamp(0.0, 1.0) * 255.0) as u8)
        .collect())
}

/// Quantizes an `[H, W, 3]` image in `[0, 1]`.
pub fn to_rgb8<B: Backend>(image: Tensor<B, 3>) -> Result<Vec<Rgb8>, Error> {
    let channels = image.dims()[2];
    if channels != 3 {
        return Err(Error::Validation(
            format!("the channel count {channels}"),
            "3".into(),
        ));
    }
    Ok(bytemuck::cast_slice(&quantize(image)?).to_vec())
}

/// Quantizes an `[H, W, C]` frame and hands it to `sink`.
pub fn write_frame<B: Backend, S: FrameSink + ?Sized>(
    sink: &mut S,
    frame: Tensor<B, 3>,
) -> Result<(), Error> {
    let [height, width, channels] = frame.dims();
    let bytes = quantize(frame)?;
    sink.write_frame(width as u32, height as u32, channels as u32, &bytes)
}
