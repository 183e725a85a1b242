//! Residual MLP aggregating source views, with optional style conditioning.

pub use super::*;
pub use burn::nn::{Linear, Relu};

use burn::nn::LinearConfig;

/// How per-view features of a point are combined.
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Average,
    Max,
}

/// The configuration for [`ConditionedMlp`].
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub struct ConditionedMlpConfig {
    /// Number of residual blocks in the trunk.
    #[config(default = 5)]
    pub block_count: usize,
    /// Index of the trunk block before which the views are aggregated.
    ///
    /// The latent is injected into every block before it.
    #[config(default = 3)]
    pub combine_layer: usize,
    #[config(default = 128)]
    pub hidden_dim: usize,
    /// Number of residual blocks of the style pathway.
    #[config(default = 2)]
    pub style_block_count: usize,
}

/// Fully connected residual block.
///
/// `x + W_1 * ReLU(W_0 * ReLU(x))`
#[derive(Debug, Module)]
pub struct ResnetBlock<B: Backend> {
    pub fc_0: Linear<B>,
    pub fc_1: Linear<B>,
    pub activation: Relu,
}

/// The color pathway driven by the style embedding.
///
/// Every block receives its own projection of the style.
#[derive(Debug, Module)]
pub struct StyleConditioning<B: Backend> {
    pub blocks: Vec<ResnetBlock<B>>,
    pub projections: Vec<Linear<B>>,
}

/// Predicts `(r, g, b, sigma)` before activation.
///
/// ## Details
///
/// ```plaintext
/// input -> trunk blocks (per view, + latent) -> aggregate views
///       -> trunk blocks -> h
/// sigma = density(ReLU(h))
/// rgb   = color(ReLU(style pathway(h, style)))   or color(ReLU(h))
/// ```
///
/// The density never sees the style.
#[derive(Debug, Module)]
pub struct ConditionedMlp<B: Backend> {
    pub activation: Relu,
    pub blocks: Vec<ResnetBlock<B>>,
    pub color: Linear<B>,
    pub combine_layer: usize,
    pub density: Linear<B>,
    pub input: Linear<B>,
    pub latent_projections: Vec<Linear<B>>,
    pub style: Option<StyleConditioning<B>>,
}

impl ConditionedMlpConfig {
    /// Initialize from the configuration.
    ///
    /// ## Arguments
    ///
    /// * `dim_input` - Positional feature dimension.
    /// * `dim_latent` - Image feature dimension, `0` for none.
    /// * `dim_style` - Style embedding dimension, `None` without style conditioning.
    pub fn init<B: Backend>(
        &self,
        dim_input: usize,
        dim_latent: usize,
        dim_style: Option<usize>,
        device: &B::Device,
    ) -> Result<ConditionedMlp<B>, Error> {
        if self.combine_layer > self.block_count {
            return Err(Error::Config(format!(
                "the combine layer {} should be at most the block count {}",
                self.combine_layer, self.block_count
            )));
        }
        let hidden_dim = self.hidden_dim;

        let input = LinearConfig::new(dim_input, hidden_dim).init(device);
        let latent_projections = if dim_latent > 0 {
            (0..self.combine_layer)
                .map(|_| LinearConfig::new(dim_latent, hidden_dim).init(device))
                .collect()
        } else {
            vec![]
        };
        let blocks = (0..self.block_count)
            .map(|_| ResnetBlock::init(hidden_dim, device))
            .collect();
        let style = dim_style.map(|dim_style| StyleConditioning {
            blocks: (0..self.style_block_count)
                .map(|_| ResnetBlock::init(hidden_dim, device))
                .collect(),
            projections: (0..self.style_block_count)
                .map(|_| LinearConfig::new(dim_style, hidden_dim).init(device))
                .collect(),
        });
        let density = LinearConfig::new(hidden_dim, 1).init(device);
        let color = LinearConfig::new(hidden_dim, 3).init(device);

        Ok(ConditionedMlp {
            activation: Relu::new(),
            blocks,
            color,
            combine_layer: self.combine_layer,
            density,
            input,
            latent_projections,
            style,
        })
    }
}

impl Default for ConditionedMlpConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregation {
    /// Combines the views of every point.
    ///
    /// ## Shapes
    ///
    /// * `input` - `[S * V * P, C]`, scene-major then view-major
    /// * `output` - `[S * P, C]`
    pub fn apply<B: Backend>(
        &self,
        input: Tensor<B, 2>,
        view_count: usize,
        point_count: usize,
    ) -> Tensor<B, 2> {
        let [rows, channels] = input.dims();
        let scene_count = rows / (view_count * point_count).max(1);
        if view_count == 1 {
            return input;
        }

        let input = input.reshape([scene_count, view_count, point_count, channels]);
        let output = match self {
            Self::Average => input.mean_dim(1),
            Self::Max => input.max_dim(1),
        };
        output.reshape([scene_count * point_count, channels])
    }
}

impl<B: Backend> ResnetBlock<B> {
    pub fn init(
        dim: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            fc_0: LinearConfig::new(dim, dim).init(device),
            fc_1: LinearConfig::new(dim, dim).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let hidden = self.fc_0.forward(self.activation.forward(input.to_owned()));
        let delta = self.fc_1.forward(self.activation.forward(hidden));
        input + delta
    }
}

impl<B: Backend> StyleConditioning<B> {
    /// ## Shapes
    ///
    /// * `hidden` - `[M, C]`
    /// * `style` - `[M, S]`
    /// * `output` - `[M, C]`
    pub fn forward(
        &self,
        mut hidden: Tensor<B, 2>,
        style: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        for (block, projection) in self.blocks.iter().zip(&self.projections) {
            hidden = block.forward(hidden + projection.forward(style.to_owned()));
        }
        hidden
    }
}

impl<B: Backend> ConditionedMlp<B> {
    /// Applies the forward pass.
    ///
    /// ## Shapes
    ///
    /// * `input` - `[S * V * P, dim_input]`
    /// * `latent` - `[S * V * P, dim_latent]`
    /// * `style` - `[S * P, dim_style]`
    /// * `output` - `[S * P, 4]`
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
        latent: Option<Tensor<B, 2>>,
        style: Option<Tensor<B, 2>>,
        aggregation: Aggregation,
        view_count: usize,
        point_count: usize,
    ) -> Tensor<B, 2> {
        let mut hidden = self.input.forward(input);
        for (index, block) in self.blocks.iter().enumerate() {
            if index == self.combine_layer {
                hidden = aggregation.apply(hidden, view_count, point_count);
            }
            if let (Some(latent), Some(projection)) =
                (&latent, self.latent_projections.get(index))
            {
                hidden = hidden + projection.forward(latent.to_owned());
            }
            hidden = block.forward(hidden);
        }
        if self.combine_layer == self.blocks.len() {
            hidden = aggregation.apply(hidden, view_count, point_count);
        }

        let density = self.density.forward(self.activation.forward(hidden.to_owned()));
        let color = match (&self.style, style) {
            (Some(conditioning), Some(style)) => conditioning.forward(hidden, style),
            _ => hidden,
        };
        let color = self.color.forward(self.activation.forward(color));

        Tensor::cat(vec![color, density], 1)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn aggregation() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        // 1 scene, 2 views, 2 points
        let input = Tensor::<NdArray, 2>::from_floats(
            [[1.0, 5.0], [2.0, 0.0], [3.0, 1.0], [4.0, 2.0]],
            &device,
        );
        Aggregation::Average
            .apply(input.to_owned(), 2, 2)
            .into_data()
            .assert_eq(&TensorData::from([[2.0_f32, 3.0], [3.0, 1.0]]), true);
        Aggregation::Max
            .apply(input, 2, 2)
            .into_data()
            .assert_eq(&TensorData::from([[3.0_f32, 5.0], [4.0, 2.0]]), true);
    }

    #[test]
    fn density_ignores_style() {
        use super::*;
        use burn::backend::NdArray;
        use burn::tensor::Distribution;

        let device = Default::default();
        let mlp = ConditionedMlpConfig::new()
            .with_block_count(3)
            .with_combine_layer(1)
            .with_hidden_dim(16)
            .init::<NdArray>(5, 4, Some(6), &device)
            .unwrap();

        // 1 scene, 2 views, 3 points
        let input = Tensor::<NdArray, 2>::random([6, 5], Distribution::Default, &device);
        let latent = Tensor::<NdArray, 2>::random([6, 4], Distribution::Default, &device);
        let style_0 = Tensor::<NdArray, 2>::zeros([3, 6], &device);
        let style_1 = Tensor::<NdArray, 2>::ones([3, 6], &device);

        let output_0 = mlp.forward(
            input.to_owned(),
            Some(latent.to_owned()),
            Some(style_0),
            Aggregation::Average,
            2,
            3,
        );
        let output_1 = mlp.forward(
            input,
            Some(latent),
            Some(style_1),
            Aggregation::Average,
            2,
            3,
        );
        assert_eq!(output_0.dims(), [3, 4]);

        output_0
            .to_owned()
            .slice([0..3, 3..4])
            .into_data()
            .assert_eq(&output_1.to_owned().slice([0..3, 3..4]).into_data(), true);
    }

    #[test]
    fn invalid_combine_layer() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        ConditionedMlpConfig::new()
            .with_block_count(2)
            .with_combine_layer(3)
            .init::<NdArray>(1, 0, None, &device)
            .unwrap_err();
    }
}
