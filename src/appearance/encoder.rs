//! Style encoder network.

pub use super::*;
pub use burn::nn::{
    conv::Conv2d,
    pool::AdaptiveAvgPool2d,
    BatchNorm, Relu,
};

use burn::{
    nn::{
        conv::Conv2dConfig, pool::AdaptiveAvgPool2dConfig, BatchNormConfig,
        PaddingConfig2d,
    },
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
};
use std::path::Path;

/// The configuration for [`StyleEncoder`].
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub struct StyleEncoderConfig {
    /// Number of stride-2 down-sampling blocks.
    #[config(default = 4)]
    pub downsample_count: usize,
    /// Channels of the input patches.
    #[config(default = 3)]
    pub input_dim: usize,
    /// Channels after the stem convolution.
    #[config(default = 32)]
    pub base_dim: usize,
    /// Length of the style embedding.
    #[config(default = 512)]
    pub style_dim: usize,
}

/// Convolution, batch normalization and ReLU.
#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B, 2>,
    pub activation: Relu,
}

/// Encodes image patches into style embeddings.
///
/// ```plaintext
/// 7x7 stem -> [4x4 stride-2 block] x downsample_count
///   -> global average pool -> 1x1 projection
/// ```
///
/// The first two down-sampling blocks double the channels.
#[derive(Debug, Module)]
pub struct StyleEncoder<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub pool: AdaptiveAvgPool2d,
    pub projection: Conv2d<B>,
}

impl StyleEncoderConfig {
    /// Initialize from the configuration with fresh weights.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> StyleEncoder<B> {
        let mut dim = self.base_dim;
        let mut blocks = Vec::with_capacity(self.downsample_count + 1);
        blocks.push(ConvBlock::init([self.input_dim, dim], 7, 1, 3, device));
        for index in 0..self.downsample_count {
            let dim_output = if index < 2 { dim * 2 } else { dim };
            blocks.push(ConvBlock::init([dim, dim_output], 4, 2, 1, device));
            dim = dim_output;
        }

        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let projection = Conv2dConfig::new([dim, self.style_dim], [1, 1]).init(device);

        StyleEncoder {
            blocks,
            pool,
            projection,
        }
    }

    /// Initialize from the weights stored at `path`.
    ///
    /// The file holds the binary record written by [`StyleEncoder::to_bytes`].
    pub fn load<B: Backend>(
        &self,
        path: &Path,
        device: &B::Device,
    ) -> Result<StyleEncoder<B>, Error> {
        let error = |reason: String| Error::StyleEncoderWeights(path.to_owned(), reason);

        let bytes = std::fs::read(path).map_err(|e| error(e.to_string()))?;
        let encoder = self.init(device).from_bytes(bytes, device).map_err(|e| match e {
            Error::Record(reason) => error(reason),
            e => e,
        })?;

        log::info!(
            target: "harmonerf_renderer::appearance",
            "Loaded style encoder weights from {path:?}",
        );

        Ok(encoder)
    }
}

impl Default for StyleEncoderConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ConvBlock<B> {
    pub fn init(
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel_size; 2])
            .with_stride([stride; 2])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);
        let norm = BatchNormConfig::new(channels[1]).init(device);
        let activation = Relu::new();

        Self {
            conv,
            norm,
            activation,
        }
    }

    /// ## Shapes
    ///
    /// * `input` - `[N, C_in, H, W]`
    /// * `output` - `[N, C_out, H', W']`
    pub fn forward(
        &self,
        mut input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        input = self.conv.forward(input);
        input = self.normalize(input);
        input = self.activation.forward(input);
        input
    }

    /// Batch normalization with the running statistics on every backend.
    ///
    /// `BatchNorm::forward` switches to batch statistics under autodiff,
    /// which would couple the patches of one call.
    pub fn normalize(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let shape = [1, input.dims()[1], 1, 1];
        let mean = self.norm.running_mean.value().reshape(shape);
        let var = self.norm.running_var.value().reshape(shape);
        let gamma = self.norm.gamma.val().reshape(shape);
        let beta = self.norm.beta.val().reshape(shape);

        (input - mean) / var.add_scalar(self.norm.epsilon).sqrt() * gamma + beta
    }
}

impl<B: Backend> StyleEncoder<B> {
    /// Applies the forward pass on a batch of patches.
    ///
    /// ## Shapes
    ///
    /// * `patches` - `[N, 3, P, P]`
    /// * `output` - `[N, style_dim]`
    ///
    /// ## Details
    ///
    /// The batch normalization always uses its running statistics,
    /// so each patch is encoded independently of the others.
    pub fn forward(
        &self,
        patches: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let count = patches.dims()[0];
        let mut features = patches;
        for block in &self.blocks {
            features = block.forward(features);
        }
        features = self.pool.forward(features);
        features = self.projection.forward(features);
        features.reshape([count, self.style_dim()])
    }

    /// Encodes `patches` in chunks of at most `batch_size`.
    ///
    /// ## Shapes
    ///
    /// * `patches` - `[N, 3, P, P]`
    /// * `output` - `[N, style_dim]`
    pub fn forward_chunked(
        &self,
        patches: Tensor<B, 4>,
        batch_size: usize,
    ) -> Tensor<B, 2> {
        let [count, channels, height, width] = patches.dims();
        let batch_size = batch_size.max(1);
        if count <= batch_size {
            return self.forward(patches);
        }

        Tensor::cat(
            (0..count)
                .step_by(batch_size)
                .map(|start| {
                    let end = (start + batch_size).min(count);
                    self.forward(patches.to_owned().slice([
                        start..end,
                        0..channels,
                        0..height,
                        0..width,
                    ]))
                })
                .collect(),
            0,
        )
    }

    /// The length of the style embedding.
    #[inline]
    pub fn style_dim(&self) -> usize {
        self.projection.weight.dims()[0]
    }

    /// Export the weights to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
        Ok(recorder.record(self.to_owned().into_record(), ())?)
    }

    /// Import the weights from the bytes made by [`Self::to_bytes`].
    pub fn from_bytes(
        self,
        bytes: Vec<u8>,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
        let record = recorder.load(bytes, device)?;
        Ok(self.load_record(record))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn forward_shape() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        let encoder = StyleEncoderConfig::new()
            .with_downsample_count(3)
            .with_base_dim(4)
            .with_style_dim(8)
            .init::<NdArray>(&device);
        assert_eq!(encoder.blocks.len(), 4);
        assert_eq!(encoder.style_dim(), 8);

        let patches = Tensor::<NdArray, 4>::ones([5, 3, 17, 17], &device);
        let output = encoder.forward(patches);
        assert_eq!(output.dims(), [5, 8]);
    }

    #[test]
    fn forward_chunked_matches_forward() {
        use super::*;
        use burn::backend::NdArray;
        use burn::tensor::Distribution;

        let device = Default::default();
        let encoder = StyleEncoderConfig::new()
            .with_downsample_count(2)
            .with_base_dim(4)
            .with_style_dim(6)
            .init::<NdArray>(&device);
        let patches = Tensor::<NdArray, 4>::random(
            [7, 3, 9, 9],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );

        let target = encoder.forward(patches.to_owned());
        let output = encoder.forward_chunked(patches, 3);
        output.into_data().assert_approx_eq(&target.into_data(), 5);
    }

    #[test]
    fn normalize_matches_inference() {
        use super::*;
        use burn::backend::NdArray;
        use burn::tensor::Distribution;

        let device = Default::default();
        let block = ConvBlock::<NdArray>::init([3, 4], 3, 1, 1, &device);
        let input = Tensor::<NdArray, 4>::random(
            [2, 4, 5, 5],
            Distribution::Uniform(-2.0, 2.0),
            &device,
        );

        let target = block.norm.forward(input.to_owned());
        let output = block.normalize(input);
        output.into_data().assert_approx_eq(&target.into_data(), 5);
    }

    #[test]
    fn forward_is_per_patch_under_autodiff() {
        use super::*;
        use crate::backend::Autodiff;
        use burn::backend::NdArray;
        use burn::tensor::Distribution;

        let device = Default::default();
        let encoder = StyleEncoderConfig::new()
            .with_downsample_count(2)
            .with_base_dim(4)
            .with_style_dim(6)
            .init::<Autodiff<NdArray>>(&device);
        let patches = Tensor::<Autodiff<NdArray>, 4>::random(
            [4, 3, 9, 9],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );

        let output = encoder.forward(patches.to_owned());
        (0..4).for_each(|index| {
            let target = encoder.forward(patches.to_owned().slice([
                index..index + 1,
                0..3,
                0..9,
                0..9,
            ]));
            output
                .to_owned()
                .slice([index..index + 1, 0..6])
                .into_data()
                .assert_approx_eq(&target.into_data(), 5);
        });
    }

    #[test]
    fn load_weights() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        let config = StyleEncoderConfig::new()
            .with_downsample_count(2)
            .with_base_dim(2)
            .with_style_dim(4);
        let encoder = config.init::<NdArray>(&device);
        let path = std::env::temp_dir().join(format!(
            "harmonerf-style-encoder-{}.bin",
            std::process::id()
        ));
        std::fs::write(&path, encoder.to_bytes().unwrap()).unwrap();

        let loaded = config.load::<NdArray>(&path, &device).unwrap();
        std::fs::remove_file(&path).unwrap();

        let patches = Tensor::<NdArray, 4>::ones([2, 3, 8, 8], &device);
        loaded
            .forward(patches.to_owned())
            .into_data()
            .assert_eq(&encoder.forward(patches).into_data(), true);
    }

    #[test]
    fn load_weights_missing() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        let path = Path::new("/nonexistent/style-encoder.bin");
        let error = StyleEncoderConfig::new()
            .load::<NdArray>(path, &device)
            .unwrap_err();
        assert!(
            matches!(&error, Error::StyleEncoderWeights(p, _) if p == path),
            "{error:?}"
        );
    }
}
