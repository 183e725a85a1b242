//! Harmonic positional encoding.

pub use super::*;

use std::f64::consts::PI;

/// The configuration for [`PositionalEncoding`].
#[derive(Config, Copy, Debug, PartialEq)]
pub struct PositionalEncodingConfig {
    /// Number of frequency octaves.
    #[config(default = 6)]
    pub frequency_count: usize,
    /// The lowest frequency.
    #[config(default = "PI")]
    pub frequency_factor: f64,
    /// Keep the raw input in front of the harmonics.
    #[config(default = true)]
    pub include_input: bool,
}

/// `x -> [x, sin(f_0 x), cos(f_0 x), sin(f_1 x), cos(f_1 x), ...]`
/// with `f_i = frequency_factor * 2^i`.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionalEncoding {
    /// Input dimension.
    pub dim_input: usize,
    /// `f_0, f_0, f_1, f_1, ...`
    pub frequencies: Vec<f32>,
    pub include_input: bool,
    /// `0, pi / 2, 0, pi / 2, ...` turning every other `sin` into `cos`.
    pub phases: Vec<f32>,
}

impl PositionalEncodingConfig {
    /// Initialize for inputs of `dim_input` channels.
    pub fn init(
        &self,
        dim_input: usize,
    ) -> PositionalEncoding {
        let (frequencies, phases) = (0..self.frequency_count)
            .flat_map(|octave| {
                let frequency = (self.frequency_factor * (1 << octave) as f64) as f32;
                [(frequency, 0.0), (frequency, (PI * 0.5) as f32)]
            })
            .unzip();

        PositionalEncoding {
            dim_input,
            frequencies,
            include_input: self.include_input,
            phases,
        }
    }
}

impl Default for PositionalEncodingConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl PositionalEncoding {
    /// Output dimension.
    #[inline]
    pub fn dim_output(&self) -> usize {
        self.dim_input * (self.frequencies.len() + self.include_input as usize)
    }

    /// ## Shapes
    ///
    /// * `input` - `[M, dim_input]`
    /// * `output` - `[M, dim_output]`
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [count, dim] = input.dims();
        let harmonic_count = self.frequencies.len();
        if harmonic_count == 0 {
            return input;
        }

        let device = input.device();
        let frequencies = Tensor::<B, 3>::from_data(
            TensorData::new(self.frequencies.to_owned(), [1, harmonic_count, 1]),
            &device,
        );
        let phases = Tensor::<B, 3>::from_data(
            TensorData::new(self.phases.to_owned(), [1, harmonic_count, 1]),
            &device,
        );

        // [M, 2F, D]
        let harmonics = (input
            .to_owned()
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, harmonic_count)
            * frequencies
            + phases)
            .sin()
            .reshape([count, harmonic_count * dim]);

        if self.include_input {
            Tensor::cat(vec![input, harmonics], 1)
        } else {
            harmonics
        }
    }
}
