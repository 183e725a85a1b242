//! Appearance-conditioned radiance field.

pub mod code;
pub mod context;
pub mod encoder;
pub mod feature;
pub mod mlp;

pub use crate::{
    backend::Backend,
    error::Error,
    function::{sample_bilinear_border, TensorFloatExtension},
};
pub use burn::{
    config::Config,
    module::Module,
    tensor::{activation, Tensor, TensorData},
};
pub use code::*;
pub use context::*;
pub use encoder::*;
pub use feature::*;
pub use mlp::*;

/// The configuration for [`RadianceField`].
#[derive(Config, Debug)]
pub struct RadianceFieldConfig {
    #[config(default = "Aggregation::Average")]
    pub aggregation: Aggregation,
    #[config(default = "GlobalEncoderConfig::new()")]
    pub global_encoder: GlobalEncoderConfig,
    #[config(default = "ConditionedMlpConfig::new()")]
    pub mlp: ConditionedMlpConfig,
    /// Use the rotated point without the view translation.
    #[config(default = true)]
    pub normalize_z: bool,
    #[config(default = "PositionalEncodingConfig::new()")]
    pub positional_encoding: PositionalEncodingConfig,
    #[config(default = "PositionInput::Xyz")]
    pub position_input: PositionInput,
    #[config(default = "SpatialEncoderConfig::new()")]
    pub spatial_encoder: SpatialEncoderConfig,
    /// Detach the sampled image features.
    #[config(default = false)]
    pub stop_encoder_grad: bool,
    /// Detach the style embeddings.
    #[config(default = false)]
    pub stop_style_grad: bool,
    /// Length of the style embedding.
    #[config(default = 512)]
    pub style_dim: usize,
    #[config(default = true)]
    pub use_encoder: bool,
    /// Separate weights for the fine pass.
    #[config(default = true)]
    pub use_fine: bool,
    #[config(default = false)]
    pub use_global_encoder: bool,
    #[config(default = true)]
    pub use_positional_encoding: bool,
    /// Condition colors on style embeddings.
    #[config(default = true)]
    pub use_style: bool,
    #[config(default = "ViewDirections::Raw")]
    pub view_directions: ViewDirections,
}

/// The learned parts of a [`RadianceField`].
#[derive(Debug, Module)]
pub struct RadianceNetwork<B: Backend> {
    pub coarse: ConditionedMlp<B>,
    pub fine: Option<ConditionedMlp<B>>,
    pub global_encoder: Option<GlobalEncoder<B>>,
    pub spatial_encoder: Option<SpatialEncoder<B>>,
}

/// Predicts color and density of world points seen by encoded source views.
#[derive(Debug)]
pub struct RadianceField<B: Backend> {
    pub aggregation: Aggregation,
    pub features: PositionalFeatures,
    pub network: RadianceNetwork<B>,
    pub stop_encoder_grad: bool,
    pub stop_style_grad: bool,
}

impl RadianceFieldConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<RadianceField<B>, Error> {
        let features = PositionalFeatures::new(
            self.position_input,
            self.normalize_z,
            self.view_directions,
            self.use_positional_encoding
                .then_some(&self.positional_encoding),
        );

        let spatial_encoder = self
            .use_encoder
            .then(|| self.spatial_encoder.init(device));
        let global_encoder = self
            .use_global_encoder
            .then(|| self.global_encoder.init(device));
        let dim_latent = self.use_encoder as usize * self.spatial_encoder.latent_dim()
            + self.use_global_encoder as usize * self.global_encoder.latent_dim;
        let dim_style = self.use_style.then_some(self.style_dim);

        let coarse = self.mlp.init(features.dim(), dim_latent, dim_style, device)?;
        let fine = if self.use_fine {
            Some(self.mlp.init(features.dim(), dim_latent, dim_style, device)?)
        } else {
            None
        };

        Ok(RadianceField {
            aggregation: self.aggregation,
            features,
            network: RadianceNetwork {
                coarse,
                fine,
                global_encoder,
                spatial_encoder,
            },
            stop_encoder_grad: self.stop_encoder_grad,
            stop_style_grad: self.stop_style_grad,
        })
    }
}

impl Default for RadianceFieldConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> RadianceField<B> {
    /// The expected style embedding length, `None` without style conditioning.
    pub fn style_dim(&self) -> Option<usize> {
        self.network
            .coarse
            .style
            .as_ref()
            .and_then(|style| style.projections.first())
            .map(|projection| projection.weight.dims()[0])
    }

    /// Encodes the source views of every scene.
    ///
    /// ## Arguments
    ///
    /// * `images` - `[S, V, 3, H, W]` in `[-1, 1]`
    /// * `poses` - `[S, V, 4, 4]` camera-to-world
    /// * `focal_length` - `[1 or S, 2]` as `(f_x, f_y)` in pixels
    /// * `principal_point` - `[1 or S, 2]` as `(c_x, c_y)` in pixels
    pub fn encode(
        &self,
        images: Tensor<B, 5>,
        poses: Tensor<B, 4>,
        focal_length: Tensor<B, 2>,
        principal_point: Tensor<B, 2>,
    ) -> Result<EncodingContext<B>, Error> {
        let [scene_count, view_count, channels, height, width] = images.dims();
        if poses.dims() != [scene_count, view_count, 4, 4] {
            return Err(Error::Validation(
                format!("the pose shape {:?}", poses.dims()),
                format!("{:?}", [scene_count, view_count, 4, 4]),
            ));
        }
        if scene_count == 0 || view_count == 0 {
            return Err(Error::Validation(
                "the source view count 0".into(),
                "positive".into(),
            ));
        }
        // N
        let count = scene_count * view_count;

        let images = images.reshape([count, channels, height, width]);
        let poses = poses.reshape([count, 4, 4]);
        let rotations_c2w = poses.to_owned().slice([0..count, 0..3, 0..3]);
        let translations_c2w = poses.slice([0..count, 0..3, 3..4]);
        // R^T
        let rotations = rotations_c2w.swap_dims(1, 2);
        // -R^T * t
        let translations = rotations
            .to_owned()
            .matmul(translations_c2w)
            .neg()
            .swap_dims(1, 2);

        let per_view = |values: Tensor<B, 2>, name: &str| {
            let rows = values.dims()[0];
            let values = match rows {
                1 => values.repeat_dim(0, count),
                _ if rows == scene_count => values.repeat_interleave(view_count),
                _ => {
                    return Err(Error::Validation(
                        format!("the {name} count {rows}"),
                        format!("1 or the scene count {scene_count}"),
                    ))
                },
            };
            Ok(values.reshape([count, 1, 2]))
        };
        let focal_length = per_view(focal_length, "focal length")?;
        let principal_point = per_view(principal_point, "principal point")?;
        let flip_y = Tensor::<B, 3>::from_data(
            TensorData::new(vec![1.0_f32, -1.0], [1, 1, 2]),
            &focal_length.device(),
        );
        let focal_length = focal_length * flip_y;

        let features = self
            .network
            .spatial_encoder
            .as_ref()
            .map(|encoder| encoder.forward(images.to_owned()));
        let global_latent = self
            .network
            .global_encoder
            .as_ref()
            .map(|encoder| encoder.forward(images));

        log::debug!(
            target: "harmonerf_renderer::field",
            "encode > source views ({scene_count} x {view_count}) ({height} x {width})",
        );

        Ok(EncodingContext {
            views: Some(EncodedViews {
                features,
                focal_length,
                global_latent,
                image_size: [height, width],
                principal_point,
                rotations,
                scene_count,
                translations,
                view_count,
            }),
        })
    }

    /// Predicts `(r, g, b, sigma)` at world points.
    ///
    /// ## Shapes
    ///
    /// * `points` - `[S, P, 3]`
    /// * `directions` - `[S, P, 3]`, unit viewing directions
    /// * `style` - `[S, P, style_dim]`
    /// * `output` - `[S, P, 4]` with colors in `[0, 1]` and densities `>= 0`
    pub fn query(
        &self,
        context: &EncodingContext<B>,
        points: Tensor<B, 3>,
        directions: Option<Tensor<B, 3>>,
        style: Tensor<B, 3>,
        use_fine: bool,
    ) -> Result<Tensor<B, 3>, Error> {
        let views = context.views()?;
        let [scene_count, point_count, _] = points.dims();
        if scene_count != views.scene_count {
            return Err(Error::Validation(
                format!("the queried scene count {scene_count}"),
                format!("the encoded scene count {}", views.scene_count),
            ));
        }
        if style.dims()[..2] != [scene_count, point_count] {
            return Err(Error::Validation(
                format!("the style shape {:?}", style.dims()),
                format!("[{scene_count}, {point_count}, _]"),
            ));
        }
        // N * P
        let rows = scene_count * views.view_count * point_count;

        let (rotated, camera) = views.to_camera(points);
        let directions = directions
            .filter(|_| self.features.needs_directions())
            .map(|directions| views.rotate(directions).reshape([rows, 3]));
        let input = self.features.forward(
            rotated.reshape([rows, 3]),
            camera.to_owned().reshape([rows, 3]),
            directions,
        )?;

        let mut latents = vec![];
        if let Some(global_latent) = &views.global_latent {
            latents.push(global_latent.to_owned().repeat_interleave(point_count));
        }
        if let Some(features) = &views.features {
            let [count, channels, height, width] = features.dims();
            let [image_height, image_width] = views.image_size;
            let scale = Tensor::<B, 3>::from_data(
                TensorData::new(
                    vec![
                        width as f32 / image_width as f32,
                        height as f32 / image_height as f32,
                    ],
                    [1, 1, 2],
                ),
                &features.device(),
            );
            let coordinates = views.project(camera) * scale;
            let mut latent = sample_bilinear_border(features.to_owned(), coordinates)
                .swap_dims(1, 2)
                .reshape([count * point_count, channels]);
            if self.stop_encoder_grad {
                latent = latent.detach();
            }
            latents.push(latent);
        }
        let latent = (!latents.is_empty()).then(|| Tensor::cat(latents, 1));

        let mut style = style.flatten::<2>(0, 1);
        if self.stop_style_grad {
            style = style.detach();
        }

        let mlp = match (&self.network.fine, use_fine) {
            (Some(fine), true) => fine,
            _ => &self.network.coarse,
        };
        let output = mlp.forward(
            input,
            latent,
            Some(style),
            self.aggregation,
            views.view_count,
            point_count,
        );

        let rows = scene_count * point_count;
        let colors = activation::sigmoid(output.to_owned().slice([0..rows, 0..3]));
        let densities = activation::relu(output.slice([0..rows, 3..4]));

        Ok(Tensor::cat(vec![colors, densities], 1).reshape([scene_count, point_count, 4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    fn field(use_global_encoder: bool) -> RadianceField<NdArray> {
        RadianceFieldConfig::new()
            .with_global_encoder(
                GlobalEncoderConfig::new()
                    .with_layer_count(2)
                    .with_base_dim(4)
                    .with_latent_dim(5),
            )
            .with_mlp(ConditionedMlpConfig::new().with_hidden_dim(16))
            .with_spatial_encoder(SpatialEncoderConfig::new().with_layer_count(2).with_base_dim(4))
            .with_style_dim(6)
            .with_use_global_encoder(use_global_encoder)
            .init(&Default::default())
            .unwrap()
    }

    fn context(field: &RadianceField<NdArray>) -> EncodingContext<NdArray> {
        let device = Default::default();
        let images = Tensor::<NdArray, 5>::random(
            [1, 2, 3, 8, 10],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let poses = Tensor::<NdArray, 3>::from_data(
            TensorData::new(
                [
                    crate::camera::Pose::new(
                        &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                        &[0.0, 0.0, 2.0],
                    ),
                    crate::camera::Pose::new(
                        &[[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]],
                        &[2.0, 0.0, 0.0],
                    ),
                ]
                .iter()
                .flat_map(|pose| pose.camera_to_world.concat())
                .map(|x| x as f32)
                .collect(),
                [2, 4, 4],
            ),
            &device,
        )
        .unsqueeze::<4>();
        let focal_length = Tensor::<NdArray, 2>::from_floats([[10.0, 10.0]], &device);
        let principal_point = Tensor::<NdArray, 2>::from_floats([[5.0, 4.0]], &device);
        field.encode(images, poses, focal_length, principal_point).unwrap()
    }

    #[test]
    fn query_bounds_and_shape() {
        let device = Default::default();
        let field = field(true);
        let context = context(&field);
        assert!(context.is_encoded());

        let points = Tensor::<NdArray, 3>::random(
            [1, 7, 3],
            Distribution::Uniform(-3.0, 3.0),
            &device,
        );
        let directions = Tensor::<NdArray, 3>::random(
            [1, 7, 3],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let style = Tensor::<NdArray, 3>::random([1, 7, 6], Distribution::Default, &device);

        [false, true].into_iter().for_each(|use_fine| {
            let output = field
                .query(
                    &context,
                    points.to_owned(),
                    Some(directions.to_owned()),
                    style.to_owned(),
                    use_fine,
                )
                .unwrap();
            assert_eq!(output.dims(), [1, 7, 4]);

            let values = output.into_data().to_vec::<f32>().unwrap();
            values.chunks_exact(4).for_each(|value| {
                assert!(value[..3].iter().all(|c| (0.0..=1.0).contains(c)), "{value:?}");
                assert!(value[3] >= 0.0, "{value:?}");
            });
        });
    }

    #[test]
    fn query_is_deterministic_and_density_ignores_style() {
        let device = Default::default();
        let field = field(false);
        let context = context(&field);

        let points = Tensor::<NdArray, 3>::random(
            [1, 5, 3],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let directions = Tensor::<NdArray, 3>::ones([1, 5, 3], &device).div_scalar(3.0_f32.sqrt());
        let query = |style: Tensor<NdArray, 3>| {
            field
                .query(&context, points.to_owned(), Some(directions.to_owned()), style, false)
                .unwrap()
        };

        let output_0 = query(Tensor::zeros([1, 5, 6], &device));
        let output_1 = query(Tensor::zeros([1, 5, 6], &device));
        let output_2 = query(Tensor::ones([1, 5, 6], &device));
        output_0
            .to_owned()
            .into_data()
            .assert_eq(&output_1.into_data(), true);
        output_0
            .slice([0..1, 0..5, 3..4])
            .into_data()
            .assert_eq(&output_2.slice([0..1, 0..5, 3..4]).into_data(), true);
    }

    #[test]
    fn query_without_view_directions() {
        let device = Default::default();
        let field = RadianceFieldConfig::new()
            .with_mlp(ConditionedMlpConfig::new().with_hidden_dim(16))
            .with_spatial_encoder(SpatialEncoderConfig::new().with_layer_count(2).with_base_dim(4))
            .with_style_dim(6)
            .with_view_directions(ViewDirections::Off)
            .init(&device)
            .unwrap();
        assert!(!field.features.needs_directions());
        let context = context(&field);

        let points = Tensor::<NdArray, 3>::random(
            [1, 5, 3],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let directions = Tensor::<NdArray, 3>::random(
            [1, 5, 3],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let style = Tensor::<NdArray, 3>::zeros([1, 5, 6], &device);

        let target = field
            .query(&context, points.to_owned(), None, style.to_owned(), false)
            .unwrap();
        let output = field
            .query(&context, points, Some(directions), style, false)
            .unwrap();
        output.into_data().assert_eq(&target.into_data(), true);
    }

    #[test]
    fn query_before_encode() {
        let device = Default::default();
        let field = field(false);
        assert_eq!(field.style_dim(), Some(6));
        let error = field
            .query(
                &EncodingContext::default(),
                Tensor::zeros([1, 2, 3], &device),
                None,
                Tensor::zeros([1, 2, 6], &device),
                false,
            )
            .unwrap_err();
        assert!(matches!(error, Error::UnencodedState), "{error:?}");
    }

    #[test]
    fn encode_invalid_poses() {
        let device = Default::default();
        let field = field(false);
        field
            .encode(
                Tensor::zeros([1, 2, 3, 4, 4], &device),
                Tensor::zeros([1, 3, 4, 4], &device),
                Tensor::ones([1, 2], &device),
                Tensor::ones([1, 2], &device),
            )
            .unwrap_err();
    }

    #[test]
    fn stop_style_grad() {
        use crate::{backend::Autodiff, camera::Pose};

        type B = Autodiff<NdArray>;

        let device = Default::default();
        [false, true].into_iter().for_each(|stop_style_grad| {
            let field = RadianceFieldConfig::new()
                .with_mlp(ConditionedMlpConfig::new().with_hidden_dim(8))
                .with_stop_style_grad(stop_style_grad)
                .with_style_dim(3)
                .with_use_encoder(false)
                .init::<B>(&device)
                .unwrap();
            let context = field
                .encode(
                    Tensor::zeros([1, 1, 3, 4, 4], &device),
                    Pose::to_tensor::<B>(&[Pose::IDENTITY], &device).unsqueeze::<4>(),
                    Tensor::from_floats([[4.0, 4.0]], &device),
                    Tensor::from_floats([[2.0, 2.0]], &device),
                )
                .unwrap();

            let points = Tensor::<B, 3>::random(
                [1, 4, 3],
                Distribution::Uniform(-1.0, 1.0),
                &device,
            );
            let directions = Tensor::<B, 3>::ones([1, 4, 3], &device).div_scalar(3.0_f32.sqrt());
            let style = Tensor::<B, 3>::ones([1, 4, 3], &device).require_grad();

            let output = field
                .query(&context, points, Some(directions), style.to_owned(), true)
                .unwrap();
            let grads = output.sum().backward();
            assert_eq!(style.grad(&grads).is_some(), !stop_style_grad);
        });
    }
}
