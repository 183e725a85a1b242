use crate::error::Error;
use burn::tensor::{backend, Float, Int, Shape, Tensor};

pub trait TensorFloatExtension {
    /// Batched matrix multiplication split into bounded dispatches.
    fn matmul_batched(
        self,
        other: Self,
    ) -> Self;

    /// `[1, x_0, x_0 * x_1, ..., x_0 * ... * x_(n-2)]` along `dim`
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self;

    /// Repeats every entry of the first dimension `repeats` times in place.
    ///
    /// `[N, ...] -> [N * repeats, ...]`
    fn repeat_interleave(
        self,
        repeats: usize,
    ) -> Self;

    /// Reads the tensor back to the host as `f32` values.
    fn into_vec_f32(self) -> Result<Vec<f32>, Error>;
}

impl<B: backend::Backend, const D: usize> TensorFloatExtension
    for Tensor<B, D, Float>
{
    fn matmul_batched(
        self,
        rhs: Self,
    ) -> Self {
        const BATCH_SIZE: usize = (1 << 16) - 1;

        if D < 3 {
            return self.matmul(rhs);
        }

        let dim_l = self.dims();
        let dim_r = rhs.dims();
        let dim_lo = dim_l[0..D - 2].to_vec();
        let dim_ro = dim_r[0..D - 2].to_vec();
        let dim_l0 = dim_lo.iter().product::<usize>();
        let dim_r0 = dim_ro.iter().product::<usize>();
        let dim_l1 = dim_l[D - 2];
        let dim_r1 = dim_r[D - 2];
        let dim_l2 = dim_l[D - 1];
        let dim_r2 = dim_r[D - 1];
        assert_eq!(
            dim_l2, dim_r1,
            "The inner dimensions of matmul should be compatible. \
            self.dims()[D - 1] should be rhs.dims()[D - 2], \
            but got self.dims() = {:?} and rhs.dims() = {:?}",
            dim_l, dim_r
        );
        assert!(
            dim_l0 == dim_r0 || dim_l0 == 1 || dim_r0 == 1,
            "The outer dimensions of matmul should be compatible. \
            self.dims()[0..D - 2] should be rhs.dims()[0..D - 2] or some of them are all ones, \
            but got self.dims() = {:?} and rhs.dims() = {:?}",
            dim_l, dim_r
        );

        let (count, dim_o) = if dim_l0 != 1 {
            (dim_l0, dim_lo)
        } else {
            (dim_r0, dim_ro)
        };
        if count < BATCH_SIZE {
            return self.matmul(rhs);
        }

        let dims = Shape::from([dim_o, vec![dim_l1, dim_r2]].concat());
        let lhs = self.flatten::<3>(0, D - 3);
        let rhs = rhs.flatten::<3>(0, D - 3);

        Tensor::cat(
            (0..count)
                .step_by(BATCH_SIZE)
                .map(|index| {
                    let range = [index..(index + BATCH_SIZE).min(count)];
                    let lhs_batch = lhs.to_owned().slice(if dim_l0 == 1 {
                        [0..1]
                    } else {
                        range.to_owned()
                    });
                    let rhs_batch = rhs.to_owned().slice(if dim_r0 == 1 {
                        [0..1]
                    } else {
                        range.to_owned()
                    });

                    lhs_batch.matmul(rhs_batch)
                })
                .collect(),
            0,
        )
        .reshape(dims)
    }

    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self {
        assert!(dim < D, "dim should be less than self.dims().len()");

        let dims_step = {
            let mut dims = self.dims();
            dims[dim] = 1;
            dims
        };
        let count = self.dims()[dim];
        if count == 0 {
            return self;
        }
        let mut state = Tensor::ones(dims_step, &self.device());
        let mut steps = Vec::with_capacity(count);

        for value in self.iter_dim(dim) {
            steps.push(state.to_owned());
            state = state * value;
        }

        Tensor::cat(steps, dim)
    }

    fn repeat_interleave(
        self,
        repeats: usize,
    ) -> Self {
        if repeats == 1 {
            return self;
        }

        let mut dims = self.dims();
        let count = dims[0];
        let rest = dims[1..].iter().product::<usize>();
        dims[0] *= repeats;

        self.reshape([count, 1, rest])
            .repeat_dim(1, repeats)
            .reshape(dims)
    }

    fn into_vec_f32(self) -> Result<Vec<f32>, Error> {
        Ok(self.into_data().convert::<f32>().to_vec::<f32>()?)
    }
}

/// Samples `features` bilinearly at `coordinates` with border extension.
///
/// ## Shapes
///
/// * `features` - `[N, C, H, W]`
/// * `coordinates` - `[N, P, 2]` as `(x, y)` in feature-map pixels
/// * `output` - `[N, C, P]`
///
/// ## Details
///
/// Coordinates outside the map are clamped to the border pixels,
/// so the output is deterministic and finite for finite inputs.
pub fn sample_bilinear_border<B: backend::Backend>(
    features: Tensor<B, 4>,
    coordinates: Tensor<B, 3>,
) -> Tensor<B, 3> {
    let [n, c, h, w] = features.dims();
    let [_, p, _] = coordinates.dims();

    let x = coordinates
        .to_owned()
        .slice([0..n, 0..p, 0..1])
        .reshape([n, p])
        .clamp(0.0, (w - 1) as f32);
    let y = coordinates
        .slice([0..n, 0..p, 1..2])
        .reshape([n, p])
        .clamp(0.0, (h - 1) as f32);

    // NOTE: Truncation is flooring since the coordinates are non-negative.
    let x_0 = x.to_owned().int();
    let y_0 = y.to_owned().int();
    let x_1 = x_0.to_owned().add_scalar(1).clamp_max((w - 1) as i32);
    let y_1 = y_0.to_owned().add_scalar(1).clamp_max((h - 1) as i32);

    let weight_x_1 = (x - x_0.to_owned().float()).unsqueeze_dim::<3>(1);
    let weight_y_1 = (y - y_0.to_owned().float()).unsqueeze_dim::<3>(1);
    let weight_x_0 = weight_x_1.to_owned().neg().add_scalar(1.0);
    let weight_y_0 = weight_y_1.to_owned().neg().add_scalar(1.0);

    let features = features.reshape([n, c, h * w]);
    let gather = |y: &Tensor<B, 2, Int>, x: &Tensor<B, 2, Int>| {
        let index = y
            .to_owned()
            .mul_scalar(w as i32)
            .add(x.to_owned())
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, c);
        features.to_owned().gather(2, index)
    };

    gather(&y_0, &x_0) * weight_x_0.to_owned() * weight_y_0.to_owned()
        + gather(&y_0, &x_1) * weight_x_1.to_owned() * weight_y_0
        + gather(&y_1, &x_0) * weight_x_0 * weight_y_1.to_owned()
        + gather(&y_1, &x_1) * weight_x_1 * weight_y_1
}
