//! Per-ray style embeddings with deduplicated patch encoding.

pub use super::*;

/// Encodes the appearance patch seen by every ray of a batch.
#[derive(Debug)]
pub struct StyleHarmonizer<B: Backend> {
    pub encoder: StyleEncoder<B>,
    /// Maximum number of patches per encoder call.
    pub encoder_batch_size: usize,
    /// Side length of the square patches.
    pub patch_size: u32,
}

/// The style embeddings of a ray batch.
#[derive(Clone, Debug)]
pub struct StyleBatch<B: Backend> {
    /// The bounds of all distinct coordinates grown by half a patch.
    pub bounds: UvBounds,
    pub dedup: UvDeduplication,
    /// `[B, S]`
    pub embeddings: Tensor<B, 2>,
}

impl<B: Backend> StyleHarmonizer<B> {
    pub fn new(
        encoder: StyleEncoder<B>,
        patch_size: u32,
        encoder_batch_size: usize,
    ) -> Result<Self, Error> {
        if patch_size == 0 {
            return Err(Error::Config("the patch size should be positive".into()));
        }
        if encoder_batch_size == 0 {
            return Err(Error::Config(
                "the encoder batch size should be positive".into(),
            ));
        }
        Ok(Self {
            encoder,
            encoder_batch_size,
            patch_size,
        })
    }

    /// Encodes the patch at every coordinate, once per distinct coordinate.
    ///
    /// ## Details
    ///
    /// Row `i` of the output is the embedding of the patch centered on
    /// `coordinates[i]`. Rays sharing a coordinate share one encoder
    /// evaluation and receive identical rows.
    ///
    /// An empty batch has no rows and the bounds of the center pixel.
    pub fn encode_batch(
        &self,
        image: &AppearanceImage<B>,
        coordinates: &[Uv],
    ) -> Result<StyleBatch<B>, Error> {
        let dedup = UvDeduplication::new(coordinates);
        let (height, width) = image.size();
        let bounds = UvBounds::around(&dedup.uniques, self.patch_size / 2, width, height);

        if dedup.is_empty() {
            let embeddings =
                Tensor::zeros([0, self.encoder.style_dim()], &image.pixels.device());
            return Ok(StyleBatch {
                bounds,
                dedup,
                embeddings,
            });
        }

        let embeddings = dedup.scatter(self.encode_uniques(image, &dedup.uniques)?);

        #[cfg(debug_assertions)]
        log::debug!(
            target: "harmonerf_renderer::appearance",
            "encode_batch > unique patches ({}/{})",
            dedup.unique_count(),
            dedup.len(),
        );

        Ok(StyleBatch {
            bounds,
            dedup,
            embeddings,
        })
    }

    /// Encodes the patch at each coordinate in order.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[U, S]`
    pub fn encode_uniques(
        &self,
        image: &AppearanceImage<B>,
        coordinates: &[Uv],
    ) -> Result<Tensor<B, 2>, Error> {
        let patches = image.patches(coordinates, self.patch_size)?;
        Ok(self.encoder.forward_chunked(patches, self.encoder_batch_size))
    }
}
