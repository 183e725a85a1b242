//! Camera trajectories for turntable videos.

pub use super::*;
pub use burn::config::Config;

use crate::function::PeriodicCubicSpline;

/// Keyframe times of the spline trajectory.
pub const SPLINE_KEYFRAME_TIMES: [f64; 5] = [0.0, 2.0, 3.0, 5.0, 6.0];

/// Keyframe orientations `(w, x, y, z)` of the spline trajectory.
///
/// The last keyframe repeats the first one, which closes the loop.
pub const SPLINE_KEYFRAME_QUATERNIONS: [[f64; 4]; 5] = [
    [0.9698, 0.2121, 0.1203, -0.0039],
    [0.7020, 0.1578, 0.4525, 0.5268],
    [0.6766, 0.3176, 0.5179, 0.4161],
    [0.9085, 0.4020, 0.1139, -0.0025],
    [0.9698, 0.2121, 0.1203, -0.0039],
];

/// Keyframe distances of the spline trajectory.
pub const SPLINE_KEYFRAME_SCALES: [f64; 5] = [2.0; 5];

#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub enum TrajectoryMode {
    /// Evenly spaced azimuths at a fixed elevation and radius.
    Orbit,
    /// Periodic spline through fixed keyframes of a known camera rig.
    Spline,
}

/// The configuration for camera trajectories.
#[derive(Config, Copy, Debug, PartialEq)]
pub struct TrajectoryConfig {
    /// Number of views (video frames).
    #[config(default = 40)]
    pub view_count: u32,
    /// Elevation angle in degrees. Negative is above.
    #[config(default = "-10.0")]
    pub elevation: f64,
    /// Camera distance to the origin. `0` means the mean of the scene bounds.
    #[config(default = 0.0)]
    pub radius: f64,
    /// Trajectory mode.
    #[config(default = "TrajectoryMode::Orbit")]
    pub mode: TrajectoryMode,
}

impl TrajectoryConfig {
    /// Generates the camera poses in order.
    ///
    /// `z_near` and `z_far` are the scene bounds used for the default radius.
    pub fn generate(
        &self,
        z_near: f64,
        z_far: f64,
    ) -> Result<Vec<Pose>, Error> {
        match self.mode {
            TrajectoryMode::Orbit => {
                let radius = self.radius_or_default(z_near, z_far);
                Ok(orbit_azimuths(self.view_count)
                    .into_iter()
                    .map(|azimuth| pose_spherical(azimuth, self.elevation, radius))
                    .collect())
            },
            TrajectoryMode::Spline => spline_poses(self.view_count),
        }
    }

    /// The orbit radius, falling back to the mean of `z_near` and `z_far`.
    pub fn radius_or_default(
        &self,
        z_near: f64,
        z_far: f64,
    ) -> f64 {
        if self.radius != 0.0 {
            return self.radius;
        }
        let radius = (z_near + z_far) * 0.5;
        log::info!(
            target: "harmonerf_renderer::camera",
            "Using default camera radius {radius}",
        );
        radius
    }

    /// The view count actually produced by [`Self::generate`].
    pub fn view_count_effective(&self) -> Result<u32, Error> {
        match self.mode {
            TrajectoryMode::Orbit => Ok(self.view_count),
            TrajectoryMode::Spline => spline_view_count(self.view_count),
        }
    }
}

impl Default for TrajectoryConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// `[-180, 180)` in `count` equal steps.
pub fn orbit_azimuths(count: u32) -> Vec<f64> {
    (0..count)
        .map(|index| -180.0 + 360.0 * index as f64 / count as f64)
        .collect()
}

/// The camera pose at `azimuth` and `elevation` (degrees) looking at the origin
/// from `radius` away.
pub fn pose_spherical(
    azimuth: f64,
    elevation: f64,
    radius: f64,
) -> Pose {
    let (sin_t, cos_t) = azimuth.to_radians().sin_cos();
    let (sin_p, cos_p) = elevation.to_radians().sin_cos();
    let identity = Pose::IDENTITY.rotation();

    let translate = Pose::new(&identity, &[0.0, 0.0, radius]);
    let rotate_elevation = Pose::new(
        &[[1.0, 0.0, 0.0], [0.0, cos_p, -sin_p], [0.0, sin_p, cos_p]],
        &[0.0; 3],
    );
    let rotate_azimuth = Pose::new(
        &[[cos_t, 0.0, -sin_t], [0.0, 1.0, 0.0], [sin_t, 0.0, cos_t]],
        &[0.0; 3],
    );

    rotate_azimuth.compose(&rotate_elevation.compose(&translate))
}

/// The rotation matrix of a quaternion `(w, x, y, z)`, normalized first.
pub fn rotation_from_quaternion(quaternion: &[f64; 4]) -> [[f64; 3]; 3] {
    let norm = quaternion.iter().map(|q| q * q).sum::<f64>().sqrt();
    let [r, i, j, k] = quaternion.map(|q| q / norm.max(f64::EPSILON));

    [
        [
            1.0 - 2.0 * (j * j + k * k),
            2.0 * (i * j - r * k),
            2.0 * (i * k + r * j),
        ],
        [
            2.0 * (i * j + r * k),
            1.0 - 2.0 * (i * i + k * k),
            2.0 * (j * k - r * i),
        ],
        [
            2.0 * (i * k - r * j),
            2.0 * (j * k + r * i),
            1.0 - 2.0 * (i * i + j * j),
        ],
    ]
}

/// Rounds `view_count` down to a multiple of the keyframe count.
fn spline_view_count(view_count: u32) -> Result<u32, Error> {
    let keyframe_count = SPLINE_KEYFRAME_TIMES.len() as u32;
    if view_count < keyframe_count {
        return Err(Error::Config(format!(
            "the view count {view_count} should be at least \
            the keyframe count {keyframe_count} in spline mode"
        )));
    }
    Ok(view_count / keyframe_count * keyframe_count)
}

/// Interpolated quaternions `(w, x, y, z)` and scales over one closed loop.
pub fn spline_keyframes(view_count: u32) -> Result<Vec<([f64; 4], f64)>, Error> {
    let count = spline_view_count(view_count)?;

    let quaternion_splines = (0..4)
        .map(|axis| {
            let values = SPLINE_KEYFRAME_QUATERNIONS.map(|q| q[axis]);
            PeriodicCubicSpline::new(&SPLINE_KEYFRAME_TIMES, &values)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let scale_spline =
        PeriodicCubicSpline::new(&SPLINE_KEYFRAME_TIMES, &SPLINE_KEYFRAME_SCALES)?;

    let start = SPLINE_KEYFRAME_TIMES[0];
    let period = scale_spline.period();

    Ok((0..count)
        .map(|index| {
            let t = start + period * index as f64 / count as f64;
            let mut quaternion = [0.0; 4];
            quaternion
                .iter_mut()
                .zip(&quaternion_splines)
                .for_each(|(q, spline)| *q = spline.evaluate(t));
            let norm = quaternion.iter().map(|q| q * q).sum::<f64>().sqrt();
            (quaternion.map(|q| q / norm), scale_spline.evaluate(t))
        })
        .collect())
}

fn spline_poses(view_count: u32) -> Result<Vec<Pose>, Error> {
    Ok(spline_keyframes(view_count)?
        .into_iter()
        .map(|(quaternion, scale)| {
            let rotation = rotation_from_quaternion(&quaternion);
            // The camera sits on its own viewing axis.
            let translation = [
                rotation[0][2] * scale,
                rotation[1][2] * scale,
                rotation[2][2] * scale,
            ];
            Pose::new(&rotation, &translation)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    #[test]
    fn orbit_azimuths_are_closed() {
        use super::*;

        let output = orbit_azimuths(8);
        assert_eq!(output.len(), 8);
        assert_eq!(output[0], -180.0);
        assert!(*output.last().unwrap() < 180.0);
        output.windows(2).for_each(|a| assert_eq!(a[1] - a[0], 45.0));
        assert_eq!(output[7] + 45.0, 180.0);
    }

    #[test]
    fn orbit_looks_at_origin() {
        use super::*;

        let config = TrajectoryConfig::new()
            .with_view_count(6)
            .with_elevation(-30.0)
            .with_radius(4.0);
        let poses = config.generate(1.0, 2.0).unwrap();
        assert_eq!(poses.len(), 6);

        poses.iter().for_each(|pose| {
            let position = pose.translation();
            let distance = position.iter().map(|p| p * p).sum::<f64>().sqrt();
            assert!((distance - 4.0).abs() < 1e-12);

            // Negative elevation is above the origin.
            assert!(position[1] > 0.0);

            // The viewing direction -Z points to the origin.
            let rotation = pose.rotation();
            (0..3).for_each(|row| {
                let forward = -rotation[row][2];
                assert!((forward + position[row] / distance).abs() < 1e-12);
            });
        });
    }

    #[test]
    fn orbit_default_radius() {
        use super::*;

        let config = TrajectoryConfig::new().with_view_count(3).with_elevation(0.0);
        let poses = config.generate(1.2, 4.0).unwrap();
        let position = poses[0].translation();
        let distance = position.iter().map(|p| p * p).sum::<f64>().sqrt();
        assert!((distance - 2.6).abs() < 1e-12);
    }

    #[test]
    fn spline_quaternions_are_unit_and_periodic() {
        use super::*;

        let keyframes = spline_keyframes(42).unwrap();
        assert_eq!(keyframes.len(), 40);

        keyframes.iter().for_each(|(quaternion, scale)| {
            let norm = quaternion.iter().map(|q| q * q).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
            assert!((scale - 2.0).abs() < 1e-12);
        });

        let first = SPLINE_KEYFRAME_QUATERNIONS[0];
        let norm = first.iter().map(|q| q * q).sum::<f64>().sqrt();
        keyframes[0]
            .0
            .iter()
            .zip(first)
            .for_each(|(output, target)| assert!((output - target / norm).abs() < 1e-9));
        assert_eq!(
            SPLINE_KEYFRAME_QUATERNIONS[0],
            SPLINE_KEYFRAME_QUATERNIONS[SPLINE_KEYFRAME_QUATERNIONS.len() - 1]
        );
    }

    #[test]
    fn spline_poses_are_rigid() {
        use super::*;

        let config = TrajectoryConfig::new()
            .with_view_count(10)
            .with_mode(TrajectoryMode::Spline);
        assert_eq!(config.view_count_effective().unwrap(), 10);
        let poses = config.generate(0.0, 0.0).unwrap();
        assert_eq!(poses.len(), 10);

        poses.iter().for_each(|pose| {
            let r = pose.rotation();
            (0..3).for_each(|a| {
                (0..3).for_each(|b| {
                    let dot = (0..3).map(|k| r[k][a] * r[k][b]).sum::<f64>();
                    let target = if a == b { 1.0 } else { 0.0 };
                    assert!((dot - target).abs() < 1e-9);
                })
            });
            let position = pose.translation();
            let distance = position.iter().map(|p| p * p).sum::<f64>().sqrt();
            assert!((distance - 2.0).abs() < 1e-9);
        });
    }

    #[test]
    fn spline_view_count_below_keyframes() {
        use super::*;

        let config = TrajectoryConfig::new()
            .with_view_count(4)
            .with_mode(TrajectoryMode::Spline);
        let error = config.generate(0.0, 0.0).unwrap_err();
        assert!(matches!(error, Error::Config(_)), "{error:?}");
    }

    #[test]
    fn rotation_from_quaternion_identity() {
        use super::*;

        let output = rotation_from_quaternion(&[2.0, 0.0, 0.0, 0.0]);
        assert_eq!(output, Pose::IDENTITY.rotation());
    }
}
