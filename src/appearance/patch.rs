//! Square patches of the appearance image.

pub use super::*;

use rayon::prelude::*;

impl<B: Backend> AppearanceImage<B> {
    /// Extracts a `size x size` patch centered on every coordinate.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[U, 3, size, size]`
    ///
    /// ## Details
    ///
    /// Pixels outside the image repeat the nearest edge pixel.
    pub fn patches(
        &self,
        centers: &[Uv],
        size: u32,
    ) -> Result<Tensor<B, 4>, Error> {
        if size == 0 {
            return Err(Error::Config("the patch size should be positive".into()));
        }
        if centers.is_empty() {
            return Err(Error::Validation(
                "the patch count 0".into(),
                "positive".into(),
            ));
        }

        let (height, width) = self.size();
        let indices = patch_indices(centers, size, width, height);

        // U
        let count = centers.len();
        // P
        let size = size as usize;
        let device = self.pixels.device();
        let indices = Tensor::<B, 1, Int>::from_data(
            TensorData::new(indices, [count * size * size]),
            &device,
        );

        Ok(self
            .pixels
            .to_owned()
            .reshape([3, (height * width) as usize])
            .select(1, indices)
            .reshape([3, count, size, size])
            .swap_dims(0, 1))
    }
}

/// Flat pixel indices of the edge-clamped patches in row-major order.
///
/// ## Shapes
///
/// * `output` - `[U * size * size]`
pub fn patch_indices(
    centers: &[Uv],
    size: u32,
    width: u32,
    height: u32,
) -> Vec<i64> {
    let half = (size / 2) as i64;
    let u_max = width.saturating_sub(1) as i64;
    let v_max = height.saturating_sub(1) as i64;

    centers
        .par_iter()
        .flat_map_iter(|center| {
            let (u, v) = (center.u as i64, center.v as i64);
            (0..size as i64).flat_map(move |dy| {
                let y = (v + dy - half).clamp(0, v_max);
                (0..size as i64).map(move |dx| {
                    let x = (u + dx - half).clamp(0, u_max);
                    y * (u_max + 1) + x
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #[test]
    fn patch_indices_are_clamped() {
        use super::*;

        let output = patch_indices(&[Uv { u: 0, v: 0 }], 3, 4, 3);
        assert_eq!(output, vec![0, 0, 1, 0, 0, 1, 4, 4, 5]);

        let output = patch_indices(&[Uv { u: 3, v: 2 }, Uv { u: 1, v: 1 }], 3, 4, 3);
        assert_eq!(
            output,
            vec![6, 7, 7, 10, 11, 11, 10, 11, 11, 0, 1, 2, 4, 5, 6, 8, 9, 10]
        );
    }

    #[test]
    fn patches_from_image() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        // A 2 x 3 image with R = G = B = the pixel index scaled down.
        let rgb = (0..6_u8).flat_map(|i| [i * 10; 3]).collect::<Vec<_>>();
        let image = AppearanceImage::<NdArray>::from_rgb8(&rgb, 3, 2, &device).unwrap();

        let output = image
            .patches(&[Uv { u: 2, v: 1 }, Uv { u: 0, v: 0 }], 2)
            .unwrap();
        assert_eq!(output.dims(), [2, 3, 2, 2]);

        let values =
            |indices: [u8; 4]| indices.map(|i| (i * 10) as f32 / 255.0 * 2.0 - 1.0);
        let target_0 = values([1, 2, 4, 5]);
        let target_1 = values([0, 0, 0, 0]);
        output.into_data().assert_approx_eq(
            &TensorData::new(
                [[target_0; 3], [target_1; 3]]
                    .concat()
                    .concat(),
                [2, 3, 2, 2],
            ),
            6,
        );
    }

    #[test]
    fn patches_invalid() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        let image = AppearanceImage::<NdArray>::from_rgb8(&[0; 12], 2, 2, &device).unwrap();
        image.patches(&[Uv::default()], 0).unwrap_err();
        image.patches(&[], 3).unwrap_err();
    }
}
