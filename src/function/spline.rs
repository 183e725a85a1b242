//! Periodic cubic spline interpolation.

use crate::error::Error;

/// A cubic spline through `(knots, values)` whose value, slope and curvature
/// wrap around from the last knot to the first.
///
/// ## Details
///
/// The last value must equal the first one, so the curve closes on itself.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodicCubicSpline {
    /// Second derivatives at the knots. The last entry repeats the first.
    pub curvatures: Vec<f64>,
    pub knots: Vec<f64>,
    pub values: Vec<f64>,
}

impl PeriodicCubicSpline {
    /// Fits the spline by solving the cyclic tridiagonal system of curvatures.
    pub fn new(
        knots: &[f64],
        values: &[f64],
    ) -> Result<Self, Error> {
        if knots.len() != values.len() {
            return Err(Error::Validation(
                format!("the value count {}", values.len()),
                format!("the knot count {}", knots.len()),
            ));
        }
        if knots.len() < 3 {
            return Err(Error::Validation(
                format!("the knot count {}", knots.len()),
                "at least 3".into(),
            ));
        }
        if knots.windows(2).any(|k| k[1] <= k[0]) {
            return Err(Error::Validation(
                "the knots".into(),
                "strictly increasing".into(),
            ));
        }
        let count = knots.len() - 1;
        if (values[count] - values[0]).abs() > 1e-12 {
            return Err(Error::Validation(
                format!("the last value {}", values[count]),
                format!("the first value {}", values[0]),
            ));
        }

        let steps = knots.windows(2).map(|k| k[1] - k[0]).collect::<Vec<_>>();
        let slopes = values
            .windows(2)
            .zip(&steps)
            .map(|(v, h)| (v[1] - v[0]) / h)
            .collect::<Vec<_>>();

        // Row i couples curvatures i - 1, i and i + 1 (indices wrap).
        let mut matrix = vec![vec![0.0; count]; count];
        let mut rhs = vec![0.0; count];
        for i in 0..count {
            let prev = (i + count - 1) % count;
            let next = (i + 1) % count;
            let h_prev = steps[prev];
            let h_next = steps[i];
            matrix[i][prev] += h_prev;
            matrix[i][i] += 2.0 * (h_prev + h_next);
            matrix[i][next] += h_next;
            rhs[i] = 6.0 * (slopes[i] - slopes[prev]);
        }

        let mut curvatures = solve_dense(matrix, rhs)?;
        curvatures.push(curvatures[0]);

        Ok(Self {
            curvatures,
            knots: knots.to_vec(),
            values: values.to_vec(),
        })
    }

    /// The period of the spline.
    #[inline]
    pub fn period(&self) -> f64 {
        self.knots[self.knots.len() - 1] - self.knots[0]
    }

    /// Evaluates the spline at `t`, wrapping `t` into one period.
    pub fn evaluate(
        &self,
        t: f64,
    ) -> f64 {
        let start = self.knots[0];
        let t = start + (t - start).rem_euclid(self.period());
        let i = self
            .knots
            .partition_point(|&k| k <= t)
            .saturating_sub(1)
            .min(self.knots.len() - 2);

        let (t_0, t_1) = (self.knots[i], self.knots[i + 1]);
        let (y_0, y_1) = (self.values[i], self.values[i + 1]);
        let (m_0, m_1) = (self.curvatures[i], self.curvatures[i + 1]);
        let h = t_1 - t_0;
        let a = t_1 - t;
        let b = t - t_0;

        m_0 * a.powi(3) / (6.0 * h)
            + m_1 * b.powi(3) / (6.0 * h)
            + (y_0 / h - m_0 * h / 6.0) * a
            + (y_1 / h - m_1 * h / 6.0) * b
    }
}

/// Gaussian elimination with partial pivoting.
fn solve_dense(
    mut matrix: Vec<Vec<f64>>,
    mut rhs: Vec<f64>,
) -> Result<Vec<f64>, Error> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))
            .unwrap_or(col);
        if matrix[pivot][col].abs() < f64::EPSILON {
            return Err(Error::Validation(
                "the spline system".into(),
                "non-singular".into(),
            ));
        }
        matrix.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..n {
            let factor = matrix[row][col] / matrix[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                matrix[row][k] -= factor * matrix[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let sum = (row + 1..n)
            .map(|k| matrix[row][k] * solution[k])
            .sum::<f64>();
        solution[row] = (rhs[row] - sum) / matrix[row][row];
    }
    Ok(solution)
}

#[cfg(test)]
mod tests {
    #[test]
    fn interpolates_knots() {
        use super::*;

        let knots = [0.0, 2.0, 3.0, 5.0, 6.0];
        let values = [0.9698, 0.7020, 0.6766, 0.9085, 0.9698];
        let spline = PeriodicCubicSpline::new(&knots, &values).unwrap();

        knots.iter().zip(values).for_each(|(&t, target)| {
            let output = spline.evaluate(t);
            assert!((output - target).abs() < 1e-12, "{output} != {target}");
        });
    }

    #[test]
    fn wraps_around_the_period() {
        use super::*;

        let spline =
            PeriodicCubicSpline::new(&[0.0, 1.0, 2.0, 4.0], &[1.0, -1.0, 3.0, 1.0])
                .unwrap();
        assert_eq!(spline.period(), 4.0);

        [0.3, 1.7, 3.9].into_iter().for_each(|t| {
            let output = spline.evaluate(t + 4.0);
            let target = spline.evaluate(t);
            assert!((output - target).abs() < 1e-12);
        });

        // The slope matches on both sides of the seam.
        let epsilon = 1e-6;
        let slope_start = (spline.evaluate(epsilon) - spline.evaluate(0.0)) / epsilon;
        let slope_end = (spline.evaluate(4.0 - 1e-12) - spline.evaluate(4.0 - epsilon))
            / (epsilon - 1e-12);
        assert!((slope_start - slope_end).abs() < 1e-4);
    }

    #[test]
    fn constant_values() {
        use super::*;

        let spline =
            PeriodicCubicSpline::new(&[0.0, 2.0, 3.0, 5.0, 6.0], &[2.0; 5]).unwrap();
        assert!(spline.curvatures.iter().all(|m| m.abs() < 1e-12));
        assert!((spline.evaluate(4.2) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_inputs() {
        use super::*;

        PeriodicCubicSpline::new(&[0.0, 1.0], &[0.0, 0.0]).unwrap_err();
        PeriodicCubicSpline::new(&[0.0, 1.0, 1.0], &[0.0, 1.0, 0.0]).unwrap_err();
        PeriodicCubicSpline::new(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0]).unwrap_err();
        PeriodicCubicSpline::new(&[0.0, 1.0, 2.0], &[0.0, 1.0]).unwrap_err();
    }
}
