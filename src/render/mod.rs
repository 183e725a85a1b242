//! Volume rendering of radiance fields along rays.

pub mod sample;

pub use crate::{
    backend::Backend,
    camera::RAY_CHANNEL_COUNT,
    error::Error,
    field::{EncodingContext, RadianceField},
    function::TensorFloatExtension,
};
pub use burn::{
    config::Config,
    tensor::{activation, Tensor, TensorData},
};

use rayon::prelude::*;
use sample::*;

/// The configuration for [`VolumeRenderer`].
#[derive(Config, Copy, Debug, PartialEq)]
pub struct VolumeRendererConfig {
    /// Samples per ray of the coarse pass.
    #[config(default = 64)]
    pub coarse_sample_count: usize,
    /// Importance samples per ray of the fine pass.
    #[config(default = 32)]
    pub fine_sample_count: usize,
    /// Fine samples per ray around the coarse depth estimate.
    #[config(default = 16)]
    pub fine_depth_sample_count: usize,
    /// Spread of the samples around the coarse depth estimate.
    #[config(default = 0.01)]
    pub depth_std: f64,
    /// Maximum number of points per network evaluation.
    #[config(default = 100000)]
    pub eval_batch_size: usize,
    /// Sample linearly in disparity instead of depth.
    #[config(default = false)]
    pub lindisp: bool,
    /// Composite over white instead of black.
    #[config(default = false)]
    pub white_background: bool,
}

/// Integrates radiance fields along rays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeRenderer {
    pub config: VolumeRendererConfig,
}

/// The rendered rays.
#[derive(Clone, Debug)]
pub struct RenderOutput<B: Backend> {
    /// `[R, 3]`
    pub colors: Tensor<B, 2>,
    /// `[R]`
    pub depths: Tensor<B, 1>,
}

/// One compositing pass.
struct Composite<B: Backend> {
    /// `[R, 3]`
    colors: Tensor<B, 2>,
    /// `[R]`
    depths: Tensor<B, 1>,
    /// `[R, K]`
    weights: Tensor<B, 2>,
}

impl VolumeRendererConfig {
    /// Initialize from the configuration.
    pub fn init(&self) -> Result<VolumeRenderer, Error> {
        if self.coarse_sample_count == 0 {
            return Err(Error::Config(
                "the coarse sample count should be positive".into(),
            ));
        }
        if self.eval_batch_size == 0 {
            return Err(Error::Config(
                "the evaluation batch size should be positive".into(),
            ));
        }
        Ok(VolumeRenderer { config: *self })
    }

    /// Raises the coarse and fine sample counts to at least `64` and `128`.
    pub fn with_minimum_sampling(mut self) -> Self {
        const COARSE_MIN: usize = 64;
        const FINE_MIN: usize = 128;

        if self.coarse_sample_count < COARSE_MIN {
            log::info!(
                target: "harmonerf_renderer::render",
                "Raising the sample counts from ({}, {}) to ({COARSE_MIN}, {FINE_MIN})",
                self.coarse_sample_count,
                self.fine_sample_count,
            );
            self.coarse_sample_count = COARSE_MIN;
            self.fine_sample_count = FINE_MIN;
        }
        self
    }
}

impl Default for VolumeRendererConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeRenderer {
    /// Whether the fine pass runs.
    #[inline]
    pub fn has_fine_pass(&self) -> bool {
        self.config.fine_sample_count + self.config.fine_depth_sample_count > 0
    }

    /// Renders every ray.
    ///
    /// ## Shapes
    ///
    /// * `rays` - `[R, 8]`
    /// * `style` - `[R, S]`
    pub fn render<B: Backend>(
        &self,
        field: &RadianceField<B>,
        context: &EncodingContext<B>,
        rays: Tensor<B, 2>,
        style: Tensor<B, 2>,
    ) -> Result<RenderOutput<B>, Error> {
        let [ray_count, channel_count] = rays.dims();
        if ray_count == 0 || channel_count != RAY_CHANNEL_COUNT {
            return Err(Error::Validation(
                format!("the ray shape {:?}", rays.dims()),
                format!("[R > 0, {RAY_CHANNEL_COUNT}]"),
            ));
        }
        if style.dims()[0] != ray_count {
            return Err(Error::Validation(
                format!("the style count {}", style.dims()[0]),
                format!("the ray count {ray_count}"),
            ));
        }
        let config = &self.config;

        let rays_host = rays.to_owned().into_vec_f32()?;
        let bounds = rays_host
            .chunks_exact(RAY_CHANNEL_COUNT)
            .map(|ray| (ray[6], ray[7]))
            .collect::<Vec<_>>();

        // [R, K_c]
        let count = config.coarse_sample_count;
        let depths_coarse = bounds
            .par_iter()
            .flat_map_iter(|&(near, far)| coarse_depths(near, far, count, config.lindisp))
            .collect::<Vec<_>>();
        let coarse = self.composite(
            field,
            context,
            rays.to_owned(),
            depths_coarse.to_owned(),
            count,
            style.to_owned(),
            false,
        )?;

        if !self.has_fine_pass() {
            return Ok(RenderOutput {
                colors: coarse.colors,
                depths: coarse.depths,
            });
        }

        let weights = coarse.weights.into_vec_f32()?;
        let depths = coarse.depths.into_vec_f32()?;
        let count_fine =
            count + config.fine_sample_count + config.fine_depth_sample_count;

        // [R, K_c + K_f + K_d]
        let depths_fine = (0..ray_count)
            .into_par_iter()
            .flat_map_iter(|index| {
                let (near, far) = bounds[index];
                let mut samples = Vec::with_capacity(count_fine);
                samples.extend_from_slice(&depths_coarse[index * count..(index + 1) * count]);
                samples.extend(importance_depths(
                    &weights[index * count..(index + 1) * count],
                    near,
                    far,
                    config.fine_sample_count,
                    config.lindisp,
                ));
                samples.extend(surface_depths(
                    depths[index],
                    near,
                    far,
                    config.fine_depth_sample_count,
                    config.depth_std as f32,
                ));
                samples.sort_by(f32::total_cmp);
                samples
            })
            .collect::<Vec<_>>();

        #[cfg(debug_assertions)]
        log::debug!(
            target: "harmonerf_renderer::render",
            "render > samples ({ray_count} x ({count}, {count_fine}))",
        );

        let fine = self.composite(field, context, rays, depths_fine, count_fine, style, true)?;

        Ok(RenderOutput {
            colors: fine.colors,
            depths: fine.depths,
        })
    }

    /// Renders `rays` in consecutive batches of at most `ray_batch_size`.
    ///
    /// The output does not depend on `ray_batch_size`.
    pub fn render_batched<B: Backend>(
        &self,
        field: &RadianceField<B>,
        context: &EncodingContext<B>,
        rays: Tensor<B, 2>,
        style: Tensor<B, 2>,
        ray_batch_size: usize,
    ) -> Result<RenderOutput<B>, Error> {
        let [ray_count, _] = rays.dims();
        let style_dim = style.dims()[1];
        let ray_batch_size = ray_batch_size.max(1);
        if ray_count <= ray_batch_size {
            return self.render(field, context, rays, style);
        }

        let outputs = (0..ray_count)
            .step_by(ray_batch_size)
            .map(|start| {
                let end = (start + ray_batch_size).min(ray_count);
                self.render(
                    field,
                    context,
                    rays.to_owned().slice([start..end, 0..RAY_CHANNEL_COUNT]),
                    style.to_owned().slice([start..end, 0..style_dim]),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (colors, depths) = outputs
            .into_iter()
            .map(|output| (output.colors, output.depths))
            .unzip();

        Ok(RenderOutput {
            colors: Tensor::cat(colors, 0),
            depths: Tensor::cat(depths, 0),
        })
    }

    /// Queries the field at every depth sample and composites front to back.
    ///
    /// ## Shapes
    ///
    /// * `rays` - `[R, 8]`
    /// * `depths` - `[R * K]`, sorted per ray
    /// * `style` - `[R, S]`
    #[allow(clippy::too_many_arguments)]
    fn composite<B: Backend>(
        &self,
        field: &RadianceField<B>,
        context: &EncodingContext<B>,
        rays: Tensor<B, 2>,
        depths: Vec<f32>,
        sample_count: usize,
        style: Tensor<B, 2>,
        use_fine: bool,
    ) -> Result<Composite<B>, Error> {
        const DELTA_INFINITY: f32 = 1e10;
        const TRANSMITTANCE_EPSILON: f32 = 1e-10;

        let device = rays.device();
        // R
        let ray_count = rays.dims()[0];
        // K
        let k = sample_count;
        // S
        let style_dim = style.dims()[1];
        let point_count = ray_count * k;

        // [R, K]
        let depths = Tensor::<B, 2>::from_data(TensorData::new(depths, [ray_count, k]), &device);
        // [R, 1, 3]
        let origins = rays.to_owned().slice([0..ray_count, 0..3]).unsqueeze_dim::<3>(1);
        let directions = rays.slice([0..ray_count, 3..6]).unsqueeze_dim::<3>(1);

        // [1, R * K, 3]
        let points = (origins + directions.to_owned() * depths.to_owned().unsqueeze_dim::<3>(2))
            .reshape([1, point_count, 3]);
        let directions = field
            .features
            .needs_directions()
            .then(|| directions.repeat_dim(1, k).reshape([1, point_count, 3]));
        // [1, R * K, S]
        let style = style
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, k)
            .reshape([1, point_count, style_dim]);

        // [R, K, 4]
        let batch_size = self.config.eval_batch_size;
        let outputs = (0..point_count)
            .step_by(batch_size)
            .map(|start| {
                let end = (start + batch_size).min(point_count);
                field.query(
                    context,
                    points.to_owned().slice([0..1, start..end, 0..3]),
                    directions
                        .as_ref()
                        .map(|directions| directions.to_owned().slice([0..1, start..end, 0..3])),
                    style.to_owned().slice([0..1, start..end, 0..style_dim]),
                    use_fine,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = Tensor::cat(outputs, 1).reshape([ray_count, k, 4]);
        let colors = outputs.to_owned().slice([0..ray_count, 0..k, 0..3]);
        let densities = outputs.slice([0..ray_count, 0..k, 3..4]).reshape([ray_count, k]);

        // [R, K]
        let delta_last = Tensor::full([ray_count, 1], DELTA_INFINITY, &device);
        let deltas = if k > 1 {
            Tensor::cat(
                vec![
                    depths.to_owned().slice([0..ray_count, 1..k])
                        - depths.to_owned().slice([0..ray_count, 0..k - 1]),
                    delta_last,
                ],
                1,
            )
        } else {
            delta_last
        };
        let alphas = (deltas * activation::relu(densities)).neg().exp().neg().add_scalar(1.0);
        let transmittances = alphas
            .to_owned()
            .neg()
            .add_scalar(1.0 + TRANSMITTANCE_EPSILON)
            .prod_cumulative_exclusive(1);
        let weights = alphas * transmittances;

        let mut colors = (weights.to_owned().unsqueeze_dim::<3>(2) * colors)
            .sum_dim(1)
            .reshape([ray_count, 3]);
        let depths = (weights.to_owned() * depths).sum_dim(1).reshape([ray_count]);
        if self.config.white_background {
            let opacities = weights.to_owned().sum_dim(1);
            colors = colors + opacities.neg().add_scalar(1.0);
        }

        Ok(Composite {
            colors,
            depths,
            weights,
        })
    }
}
