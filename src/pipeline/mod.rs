//! Harmonized novel-view videos.
//!
//! A run encodes the chosen source views once, then renders every frame of
//! the camera trajectory ray batch by ray batch. Each batch looks up where
//! its rays meet the appearance sphere, encodes the distinct appearance
//! patches there and renders the batch conditioned on those styles.

pub use crate::{
    appearance::{
        AppearanceImage, SphericalSampler, SphericalSamplerConfig, StyleEncoder,
        StyleEncoderConfig, StyleHarmonizer, UvBounds,
    },
    backend::Backend,
    camera::{Intrinsics, Pose, RayGrid, TrajectoryConfig, RAY_CHANNEL_COUNT},
    compose::{compose_frame, reference_still, write_frame, FrameSink},
    error::Error,
    field::{EncodingContext, RadianceField},
    render::{VolumeRenderer, VolumeRendererConfig},
};
pub use burn::{
    config::Config,
    tensor::{Int, Tensor, TensorData},
};

use humansize::{format_size, BINARY};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Which source views condition the radiance field.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum SourceViews {
    /// The given view indices, in increasing order.
    Fixed(Vec<u32>),
    /// One view drawn uniformly with the configured seed.
    RandomSingle,
}

/// The configuration for [`HarmonizationPipeline`].
#[derive(Config, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Height of the appearance image.
    #[config(default = 300)]
    pub appearance_height: u32,
    /// Width of the appearance image.
    #[config(default = 600)]
    pub appearance_width: u32,
    /// Maximum number of patches per style encoder call.
    #[config(default = 256)]
    pub encoder_batch_size: usize,
    /// Frame rate of the output video.
    #[config(default = 30)]
    pub fps: u32,
    /// Side length of the appearance patches.
    #[config(default = 223)]
    pub patch_size: u32,
    /// Maximum number of rays rendered at once.
    #[config(default = 50000)]
    pub ray_batch_size: usize,
    #[config(default = "VolumeRendererConfig::new()")]
    pub renderer: VolumeRendererConfig,
    #[config(default = "SphericalSamplerConfig::new()")]
    pub sampler: SphericalSamplerConfig,
    /// Output resolution relative to the source images.
    #[config(default = 1.0)]
    pub scale: f64,
    /// Seed of the random source view.
    #[config(default = 0)]
    pub seed: u64,
    #[config(default = "SourceViews::Fixed(vec![64])")]
    pub source_views: SourceViews,
    #[config(default = "StyleEncoderConfig::new()")]
    pub style_encoder: StyleEncoderConfig,
    #[config(default = "TrajectoryConfig::new()")]
    pub trajectory: TrajectoryConfig,
}

/// A posed multi-view scene.
#[derive(Clone, Debug)]
pub struct SceneInput<B: Backend> {
    /// `[N_V, 3, H, W]` in `[-1, 1]`
    pub images: Tensor<B, 4>,
    /// Shared by every view, matching the image size.
    pub intrinsics: Intrinsics,
    /// `N_V` camera-to-world poses.
    pub poses: Vec<Pose>,
    pub z_far: f64,
    pub z_near: f64,
}

/// What a run produced besides the frames.
#[derive(Clone, Debug)]
pub struct PipelineOutput<B: Backend> {
    pub frame_count: usize,
    /// `[H, N_S * W, 3]` in `[0, 1]`
    pub reference_still: Tensor<B, 3>,
    pub source_views: Vec<u32>,
}

/// Renders harmonized trajectory videos.
#[derive(Debug)]
pub struct HarmonizationPipeline<B: Backend> {
    pub config: PipelineConfig,
    pub field: RadianceField<B>,
    pub harmonizer: StyleHarmonizer<B>,
    pub renderer: VolumeRenderer,
}

impl PipelineConfig {
    /// Reports the first configuration error for a scene of `view_count` views.
    pub fn validate(
        &self,
        view_count: usize,
    ) -> Result<(), Error> {
        if view_count == 0 {
            return Err(Error::Validation(
                "the scene view count 0".into(),
                "positive".into(),
            ));
        }
        if !(self.scale > 0.0 && self.scale.is_finite()) {
            return Err(Error::Config(format!(
                "the scale {} should be positive and finite",
                self.scale
            )));
        }
        if self.ray_batch_size == 0 {
            return Err(Error::Config("the ray batch size should be positive".into()));
        }
        if self.encoder_batch_size == 0 {
            return Err(Error::Config(
                "the encoder batch size should be positive".into(),
            ));
        }
        if self.patch_size == 0 {
            return Err(Error::Config("the patch size should be positive".into()));
        }
        if self.fps == 0 {
            return Err(Error::Config("the frame rate should be positive".into()));
        }
        if self.trajectory.view_count_effective()? == 0 {
            return Err(Error::Config("the frame count should be positive".into()));
        }

        match &self.source_views {
            SourceViews::Fixed(views) => {
                if views.is_empty() {
                    return Err(Error::Config(
                        "the source views should not be empty".into(),
                    ));
                }
                if let Some(&view) = views.iter().find(|&&view| view as usize >= view_count) {
                    return Err(Error::SourceViewOutOfRange(view, view_count));
                }
            },
            SourceViews::RandomSingle => {},
        }

        Ok(())
    }

    /// The source view indices for a scene of `view_count` views.
    pub fn select_source_views(
        &self,
        view_count: usize,
    ) -> Result<Vec<u32>, Error> {
        self.validate(view_count)?;

        Ok(match &self.source_views {
            SourceViews::Fixed(views) => views.to_owned(),
            SourceViews::RandomSingle => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                vec![rng.gen_range(0..view_count as u32)]
            },
        })
    }

    /// The output name, e.g. `t0003_v001_023` for the training subset 3
    /// rendered from views 1 and 23.
    ///
    /// The random source view is named `-01`.
    pub fn video_name(
        &self,
        subset: usize,
        split: &str,
    ) -> String {
        let prefix = match split {
            "train" => "t",
            "val" => "v",
            _ => "",
        };
        let views = match &self.source_views {
            SourceViews::Fixed(views) => views
                .iter()
                .map(|view| format!("{view:03}"))
                .collect::<Vec<_>>()
                .join("_"),
            SourceViews::RandomSingle => format!("{:03}", -1),
        };
        format!("{prefix}{subset:04}_v{views}")
    }
}

impl Default for PipelineConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> HarmonizationPipeline<B> {
    /// ## Arguments
    ///
    /// * `field` - The radiance field with its weights loaded.
    /// * `encoder` - The style encoder with its weights loaded,
    ///   e.g. by [`StyleEncoderConfig::load`].
    pub fn new(
        config: PipelineConfig,
        field: RadianceField<B>,
        encoder: StyleEncoder<B>,
    ) -> Result<Self, Error> {
        let style_dim = encoder.style_dim();
        if let Some(style_dim_field) = field.style_dim() {
            if style_dim_field != style_dim {
                return Err(Error::Config(format!(
                    "the style encoder dimension {style_dim} should match \
                     the radiance field dimension {style_dim_field}"
                )));
            }
        }

        let renderer = config.renderer.with_minimum_sampling().init()?;
        let harmonizer =
            StyleHarmonizer::new(encoder, config.patch_size, config.encoder_batch_size)?;

        Ok(Self {
            config,
            field,
            harmonizer,
            renderer,
        })
    }

    /// Renders every frame of the trajectory into `sink`, in order.
    pub fn run<S: FrameSink + ?Sized>(
        &self,
        scene: &SceneInput<B>,
        appearance: &AppearanceImage<B>,
        sink: &mut S,
    ) -> Result<PipelineOutput<B>, Error> {
        let config = &self.config;
        let [view_count, channels, height, width] = scene.images.dims();
        if scene.poses.len() != view_count {
            return Err(Error::Validation(
                format!("the pose count {}", scene.poses.len()),
                format!("the image count {view_count}"),
            ));
        }
        if [height, width]
            != [scene.intrinsics.image_height as usize, scene.intrinsics.image_width as usize]
        {
            return Err(Error::Validation(
                format!("the image size {height}x{width}"),
                format!(
                    "the intrinsics size {}x{}",
                    scene.intrinsics.image_height, scene.intrinsics.image_width
                ),
            ));
        }
        let source_views = config.select_source_views(view_count)?;
        let device = scene.images.device();

        // Rays of the output trajectory
        let intrinsics = scene.intrinsics.scale(config.scale);
        let poses = config.trajectory.generate(scene.z_near, scene.z_far)?;
        let rays = RayGrid::<B>::generate(
            &poses,
            &[intrinsics],
            scene.z_near,
            scene.z_far,
            &device,
        )?;
        let [frame_count, frame_height, frame_width] = rays.dims();
        let rays = rays.flatten();

        let radius_orbit = config
            .trajectory
            .radius_or_default(scene.z_near, scene.z_far);
        let sampler = config.sampler.init(if radius_orbit > 0.0 {
            radius_orbit
        } else {
            scene.z_far
        })?;

        let (appearance_height, appearance_width) = appearance.size();
        if (appearance_height, appearance_width)
            != (config.appearance_height, config.appearance_width)
        {
            log::warn!(
                target: "harmonerf_renderer::pipeline",
                "The appearance image is {appearance_height}x{appearance_width} \
                 instead of {}x{}",
                config.appearance_height,
                config.appearance_width,
            );
        }

        log::info!(
            target: "harmonerf_renderer::pipeline",
            "Encoding source view(s) {source_views:?}",
        );
        let indices = Tensor::<B, 1, Int>::from_data(
            TensorData::new(
                source_views.iter().map(|&view| view as i64).collect(),
                [source_views.len()],
            ),
            &device,
        );
        let images = scene.images.to_owned().select(0, indices);
        let poses_source = source_views
            .iter()
            .map(|&view| scene.poses[view as usize])
            .collect::<Vec<_>>();
        let context = self.field.encode(
            images
                .to_owned()
                .reshape([1, source_views.len(), channels, height, width]),
            Pose::to_tensor::<B>(&poses_source, &device).unsqueeze::<4>(),
            Tensor::from_data(
                TensorData::new(
                    scene.intrinsics.focal_length.map(|f| f as f32).to_vec(),
                    [1, 2],
                ),
                &device,
            ),
            Tensor::from_data(
                TensorData::new(
                    scene.intrinsics.principal_point.map(|c| c as f32).to_vec(),
                    [1, 2],
                ),
                &device,
            ),
        )?;

        let ray_count = frame_count * frame_height * frame_width;
        log::info!(
            target: "harmonerf_renderer::pipeline",
            "Rendering {ray_count} rays ({frame_count} x {frame_height} x {frame_width})",
        );

        for frame in 0..frame_count {
            let rays_frame = rays.to_owned().slice([
                frame * frame_height * frame_width..(frame + 1) * frame_height * frame_width,
                0..RAY_CHANNEL_COUNT,
            ]);
            let (colors, area) = self.render_frame(&context, &sampler, appearance, rays_frame)?;

            let colors = colors.reshape([frame_height, frame_width, 3]);
            let area = appearance
                .crop(&area)
                .add_scalar(1.0)
                .mul_scalar(0.5);
            write_frame(sink, compose_frame(colors, area)?)?;

            log::debug!(
                target: "harmonerf_renderer::pipeline",
                "run > frame ({}/{frame_count})",
                frame + 1,
            );
        }

        Ok(PipelineOutput {
            frame_count,
            reference_still: reference_still(images),
            source_views,
        })
    }

    /// Renders the rays of one frame in batches.
    ///
    /// ## Shapes
    ///
    /// * `rays` - `[H * W, 8]`
    /// * `output` - `([H * W, 3], harmonization area)`
    fn render_frame(
        &self,
        context: &EncodingContext<B>,
        sampler: &SphericalSampler,
        appearance: &AppearanceImage<B>,
        rays: Tensor<B, 2>,
    ) -> Result<(Tensor<B, 2>, UvBounds), Error> {
        let ray_count = rays.dims()[0];
        let batch_size = self.config.ray_batch_size;
        let (appearance_height, appearance_width) = appearance.size();

        let mut area = None::<UvBounds>;
        let mut colors = Vec::with_capacity(ray_count.div_ceil(batch_size));
        for start in (0..ray_count).step_by(batch_size) {
            let end = (start + batch_size).min(ray_count);
            let rays = rays.to_owned().slice([start..end, 0..RAY_CHANNEL_COUNT]);

            log::debug!(
                target: "harmonerf_renderer::pipeline",
                "render_frame > ray batch ({start}..{end}) ({})",
                format_size((end - start) * RAY_CHANNEL_COUNT * 4, BINARY.decimal_places(1)),
            );

            let coordinates = sampler.sample(rays.to_owned(), appearance_width, appearance_height)?;
            let style = self.harmonizer.encode_batch(appearance, &coordinates)?;
            let output = self
                .renderer
                .render(&self.field, context, rays, style.embeddings)?;

            area = Some(match area {
                Some(area) => area.union(&style.bounds),
                None => style.bounds,
            });
            colors.push(output.colors);
        }

        let area = area.ok_or_else(|| {
            Error::Validation("the frame ray count 0".into(), "positive".into())
        })?;

        Ok((Tensor::cat(colors, 0), area))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compose::Video,
        field::{ConditionedMlpConfig, RadianceFieldConfig, SpatialEncoderConfig},
    };
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn validate() {
        let config = PipelineConfig::new().with_source_views(SourceViews::Fixed(vec![0, 2]));
        config.validate(3).unwrap();

        let error = config.validate(2).unwrap_err();
        assert!(matches!(error, Error::SourceViewOutOfRange(2, 2)), "{error:?}");

        let error = config.to_owned().with_ray_batch_size(0).validate(3).unwrap_err();
        assert!(matches!(error, Error::Config(_)), "{error:?}");

        let error = config
            .to_owned()
            .with_trajectory(
                TrajectoryConfig::new()
                    .with_mode(crate::camera::TrajectoryMode::Spline)
                    .with_view_count(3),
            )
            .validate(3)
            .unwrap_err();
        assert!(matches!(error, Error::Config(_)), "{error:?}");

        let error = config
            .with_source_views(SourceViews::Fixed(vec![]))
            .validate(3)
            .unwrap_err();
        assert!(matches!(error, Error::Config(_)), "{error:?}");
    }

    #[test]
    fn select_source_views() {
        let config = PipelineConfig::new()
            .with_source_views(SourceViews::RandomSingle)
            .with_seed(7);

        let views = config.select_source_views(10).unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0] < 10);
        assert_eq!(config.select_source_views(10).unwrap(), views);

        let config = config.with_source_views(SourceViews::Fixed(vec![1, 4]));
        assert_eq!(config.select_source_views(5).unwrap(), vec![1, 4]);
    }

    #[test]
    fn video_name() {
        let config = PipelineConfig::new().with_source_views(SourceViews::Fixed(vec![1, 23]));
        assert_eq!(config.video_name(3, "train"), "t0003_v001_023");
        assert_eq!(config.video_name(12, "val"), "v0012_v001_023");
        assert_eq!(config.video_name(0, "test"), "0000_v001_023");

        let config = config.with_source_views(SourceViews::RandomSingle);
        assert_eq!(config.video_name(5, "train"), "t0005_v-01");
    }

    fn pipeline(config: PipelineConfig) -> Result<HarmonizationPipeline<NdArray>, Error> {
        let device = Default::default();
        let field = RadianceFieldConfig::new()
            .with_mlp(
                ConditionedMlpConfig::new()
                    .with_block_count(2)
                    .with_combine_layer(1)
                    .with_hidden_dim(8),
            )
            .with_spatial_encoder(SpatialEncoderConfig::new().with_layer_count(2).with_base_dim(4))
            .with_style_dim(4)
            .init(&device)?;
        let encoder = config.style_encoder.init(&device);
        HarmonizationPipeline::new(config, field, encoder)
    }

    #[test]
    fn run_is_deterministic() {
        let device = Default::default();
        let config = PipelineConfig::new()
            .with_appearance_height(10)
            .with_appearance_width(20)
            .with_patch_size(5)
            .with_ray_batch_size(4)
            .with_scale(0.5)
            .with_source_views(SourceViews::Fixed(vec![1]))
            .with_style_encoder(
                StyleEncoderConfig::new()
                    .with_downsample_count(2)
                    .with_base_dim(4)
                    .with_style_dim(4),
            )
            .with_trajectory(TrajectoryConfig::new().with_view_count(2).with_radius(2.0));
        let pipeline = pipeline(config).unwrap();
        assert_eq!(pipeline.renderer.config.coarse_sample_count, 64);

        let scene = SceneInput {
            images: Tensor::<NdArray, 4>::random(
                [2, 3, 6, 6],
                Distribution::Uniform(-1.0, 1.0),
                &device,
            ),
            intrinsics: Intrinsics::centered([6.0, 6.0], 6, 6),
            poses: vec![
                crate::camera::pose_spherical(0.0, -10.0, 2.0),
                crate::camera::pose_spherical(90.0, -10.0, 2.0),
            ],
            z_far: 3.0,
            z_near: 1.0,
        };
        let appearance = AppearanceImage::new(Tensor::<NdArray, 3>::random(
            [3, 10, 20],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        ))
        .unwrap();

        let mut video_0 = Video::new(pipeline.config.fps);
        let output = pipeline.run(&scene, &appearance, &mut video_0).unwrap();
        assert_eq!(output.frame_count, 2);
        assert_eq!(output.source_views, vec![1]);
        assert_eq!(output.reference_still.dims(), [6, 6, 3]);
        assert_eq!(video_0.frames.len(), 2);
        video_0.frames.iter().for_each(|frame| {
            assert_eq!((frame.height, frame.width, frame.channels), (3, 3, 6));
            assert_eq!(frame.bytes.len(), 54);
        });

        let mut video_1 = Video::new(pipeline.config.fps);
        pipeline.run(&scene, &appearance, &mut video_1).unwrap();
        assert_eq!(video_0, video_1);
    }

    #[test]
    fn mismatched_style_dim() {
        let config = PipelineConfig::new().with_style_encoder(
            StyleEncoderConfig::new()
                .with_downsample_count(1)
                .with_base_dim(2)
                .with_style_dim(5),
        );
        let error = pipeline(config).unwrap_err();
        assert!(matches!(error, Error::Config(_)), "{error:?}");
    }
}
