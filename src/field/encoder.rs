//! Image feature extractors of the source views.

pub use super::*;
pub use crate::appearance::ConvBlock;
pub use burn::nn::{pool::AdaptiveAvgPool2d, Linear};

use burn::{
    nn::{pool::AdaptiveAvgPool2dConfig, LinearConfig},
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// The configuration for [`SpatialEncoder`].
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub struct SpatialEncoderConfig {
    /// Number of stride-2 stages.
    #[config(default = 4)]
    pub layer_count: usize,
    /// Channels of the first two stages. Later stages double them.
    #[config(default = 64)]
    pub base_dim: usize,
}

/// Multi-scale feature maps at half the image resolution.
///
/// Every stage halves the resolution. The outputs of all stages are
/// upsampled to the first stage and stacked along the channels.
#[derive(Debug, Module)]
pub struct SpatialEncoder<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
}

/// The configuration for [`GlobalEncoder`].
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub struct GlobalEncoderConfig {
    #[config(default = 3)]
    pub layer_count: usize,
    #[config(default = 32)]
    pub base_dim: usize,
    /// Length of the whole-image latent.
    #[config(default = 128)]
    pub latent_dim: usize,
}

/// One latent vector per image.
#[derive(Debug, Module)]
pub struct GlobalEncoder<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub pool: AdaptiveAvgPool2d,
    pub projection: Linear<B>,
}

impl SpatialEncoderConfig {
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SpatialEncoder<B> {
        let blocks = stage_dims(3, self.base_dim, self.layer_count)
            .into_iter()
            .map(|channels| ConvBlock::init(channels, 3, 2, 1, device))
            .collect();

        SpatialEncoder { blocks }
    }

    /// Channels of the stacked feature maps.
    pub fn latent_dim(&self) -> usize {
        stage_dims(3, self.base_dim, self.layer_count)
            .iter()
            .map(|[_, output]| output)
            .sum()
    }
}

impl Default for SpatialEncoderConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalEncoderConfig {
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> GlobalEncoder<B> {
        let dims = stage_dims(3, self.base_dim, self.layer_count);
        let dim_output = dims.last().map_or(3, |[_, output]| *output);
        let blocks = dims
            .into_iter()
            .map(|channels| ConvBlock::init(channels, 3, 2, 1, device))
            .collect();
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let projection = LinearConfig::new(dim_output, self.latent_dim).init(device);

        GlobalEncoder {
            blocks,
            pool,
            projection,
        }
    }
}

impl Default for GlobalEncoderConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> SpatialEncoder<B> {
    /// ## Shapes
    ///
    /// * `images` - `[N, 3, H, W]`
    /// * `output` - `[N, C, H / 2, W / 2]` (rounded up)
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let mut features = images;
        let mut stages = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            features = block.forward(features);
            stages.push(features.to_owned());
        }

        let Some([_, _, height, width]) = stages.first().map(Tensor::dims) else {
            return features;
        };
        let options = InterpolateOptions::new(InterpolateMode::Bilinear);

        Tensor::cat(
            stages
                .into_iter()
                .map(|stage| {
                    if stage.dims()[2..] == [height, width] {
                        stage
                    } else {
                        interpolate(stage, [height, width], options.to_owned())
                    }
                })
                .collect(),
            1,
        )
    }
}

impl<B: Backend> GlobalEncoder<B> {
    /// ## Shapes
    ///
    /// * `images` - `[N, 3, H, W]`
    /// * `output` - `[N, latent_dim]`
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let count = images.dims()[0];
        let mut features = images;
        for block in &self.blocks {
            features = block.forward(features);
        }
        let channels = features.dims()[1];
        let features = self.pool.forward(features).reshape([count, channels]);
        self.projection.forward(features)
    }
}

/// `[input, output]` channels of every stage.
fn stage_dims(
    dim_input: usize,
    base_dim: usize,
    layer_count: usize,
) -> Vec<[usize; 2]> {
    let mut dim = dim_input;
    (0..layer_count)
        .map(|index| {
            let dim_output = base_dim << index.saturating_sub(1);
            let channels = [dim, dim_output];
            dim = dim_output;
            channels
        })
        .collect()
}
