//! Depth samples along rays.
//!
//! All samplers are deterministic: coarse samples sit at bin midpoints and
//! importance samples invert the weight distribution at evenly spaced
//! quantiles.

/// Interpolates between `near` and `far` at `step` in `[0, 1]`,
/// linearly in depth or in disparity.
#[inline]
pub fn interpolate_depth(
    near: f32,
    far: f32,
    step: f32,
    lindisp: bool,
) -> f32 {
    if lindisp {
        1.0 / (1.0 / near * (1.0 - step) + 1.0 / far * step)
    } else {
        near * (1.0 - step) + far * step
    }
}

/// `count` depths at the midpoints of equal bins.
pub fn coarse_depths(
    near: f32,
    far: f32,
    count: usize,
    lindisp: bool,
) -> Vec<f32> {
    (0..count)
        .map(|index| {
            let step = (index as f32 + 0.5) / count as f32;
            interpolate_depth(near, far, step, lindisp)
        })
        .collect()
}

/// `count` depths distributed like `weights` over the coarse bins.
///
/// ## Details
///
/// The cumulative distribution of the weights is linear inside each bin.
/// The `k`-th sample inverts it at `(k + 0.5) / count`, so the samples are
/// strictly increasing and concentrate where the weights are high.
pub fn importance_depths(
    weights: &[f32],
    near: f32,
    far: f32,
    count: usize,
    lindisp: bool,
) -> Vec<f32> {
    const WEIGHT_EPSILON: f32 = 1e-5;

    let bin_count = weights.len();
    if bin_count == 0 || count == 0 {
        return vec![];
    }

    let total = weights
        .iter()
        .map(|w| w.max(0.0) + WEIGHT_EPSILON)
        .sum::<f32>();
    // The distribution at the upper edge of every bin
    let cdf = weights
        .iter()
        .scan(0.0, |sum, w| {
            *sum += (w.max(0.0) + WEIGHT_EPSILON) / total;
            Some(*sum)
        })
        .collect::<Vec<_>>();

    (0..count)
        .map(|index| {
            let u = (index as f32 + 0.5) / count as f32;
            let bin = cdf.partition_point(|&c| c <= u).min(bin_count - 1);
            let lower = if bin == 0 { 0.0 } else { cdf[bin - 1] };
            let upper = cdf[bin];
            let offset = if upper > lower {
                ((u - lower) / (upper - lower)).clamp(0.0, 1.0)
            } else {
                0.5
            };
            let step = (bin as f32 + offset) / bin_count as f32;
            interpolate_depth(near, far, step, lindisp)
        })
        .collect()
}

/// `count` depths spread evenly over `depth ± 2 * std`, clamped to the ray.
pub fn surface_depths(
    depth: f32,
    near: f32,
    far: f32,
    count: usize,
    std: f32,
) -> Vec<f32> {
    (0..count)
        .map(|index| {
            let offset = if count > 1 {
                (index as f32 / (count - 1) as f32 * 2.0 - 1.0) * 2.0 * std
            } else {
                0.0
            };
            (depth + offset).clamp(near, far)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #[test]
    fn coarse_depths() {
        use super::*;

        let output = coarse_depths(1.0, 5.0, 4, false);
        assert_eq!(output, vec![1.5, 2.5, 3.5, 4.5]);

        let output = coarse_depths(1.0, 2.0, 2, true);
        assert!((output[0] - 1.0 / (0.75 + 0.125)).abs() < 1e-6);
        assert!(output.windows(2).all(|d| d[0] < d[1]));
    }

    #[test]
    fn importance_depths_follow_weights() {
        use super::*;

        let assert_close = |output: Vec<f32>, target: &[f32]| {
            assert_eq!(output.len(), target.len());
            output.iter().zip(target).for_each(|(o, t)| {
                assert!((o - t).abs() < 1e-3, "{output:?} != {target:?}");
            });
        };

        // All the weight sits in the third of four bins.
        let output = importance_depths(&[0.0, 0.0, 1.0, 0.0], 0.0, 4.0, 5, false);
        assert_close(output, &[2.1, 2.3, 2.5, 2.7, 2.9]);

        // Uniform weights reproduce the bin centers.
        let output = importance_depths(&[1.0; 4], 0.0, 4.0, 4, false);
        assert_close(output, &[0.5, 1.5, 2.5, 3.5]);

        assert!(importance_depths(&[], 0.0, 1.0, 3, false).is_empty());
        assert!(importance_depths(&[1.0], 0.0, 1.0, 0, false).is_empty());
    }

    #[test]
    fn importance_depths_refine_coarse_bins() {
        use super::*;

        let coarse = coarse_depths(1.0, 5.0, 8, false);
        let mut weights = [0.0; 8];
        weights[3] = 0.8;
        weights[4] = 0.2;

        let fine = importance_depths(&weights, 1.0, 5.0, 16, false);
        assert_eq!(fine.len(), 16);
        assert!(fine.windows(2).all(|d| d[0] < d[1]), "{fine:?}");
        assert!(fine.iter().all(|d| (1.0..=5.0).contains(d)));

        let novel = fine
            .iter()
            .filter(|d| coarse.iter().all(|c| (*d - c).abs() > 1e-4))
            .count();
        assert!(novel >= 12, "{fine:?}");

        // Most samples fall inside the heaviest bin.
        let inside = fine.iter().filter(|d| (2.5..3.0).contains(*d)).count();
        assert!(inside >= 12, "{fine:?}");
    }

    #[test]
    fn surface_depths_are_clamped() {
        use super::*;

        let output = surface_depths(2.0, 1.0, 3.0, 3, 0.25);
        assert_eq!(output, vec![1.5, 2.0, 2.5]);

        let output = surface_depths(2.9, 1.0, 3.0, 2, 0.25);
        assert_eq!(output, vec![2.4, 3.0]);

        assert_eq!(surface_depths(2.0, 1.0, 3.0, 1, 0.5), vec![2.0]);
    }
}
