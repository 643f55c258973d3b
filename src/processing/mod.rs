// src/processing/mod.rs
//! Time-parameterization of multi-joint waypoint trajectories.
//!
//! [`TimeOptimalParameterization`] blends the waypoints of a
//! [`JointTrajectory`] into a path, computes the time-optimal trajectory
//! along it and replaces the waypoints with samples spaced equally in time.
//! The first and last waypoint are preserved; resampled waypoints stay
//! within the path tolerance of the original polyline.

mod limits;

pub use limits::{
    has_mixed_joint_kinds, limit_maps, verify_scaling_factor, JointKind, JointLimits, JointModel, LimitRange,
    LimitType,
};

use std::collections::HashMap;
use std::f64::consts::PI;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::{Path, PathError, DEFAULT_PATH_TOLERANCE};
use crate::trajectory::{Trajectory, TrajectoryError, DEFAULT_TIME_STEP};

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Trajectory has no joints")]
    NoJoints,
    #[error("Waypoint {index} has {found} positions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("No {limit_type} limit defined for joint '{joint}'")]
    MissingLimit { joint: String, limit_type: LimitType },
    #[error("Invalid max {limit_type} {value} for joint '{joint}', must be greater than zero")]
    InvalidLimit {
        joint: String,
        limit_type: LimitType,
        value: f64,
    },
    #[error("Revolute and prismatic joints are mixed, a single path tolerance does not apply")]
    MixedJointKinds,
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("Cannot resample to {0} waypoints, at least 2 are needed")]
    InvalidWaypointCount(usize),
    #[error("Limits cannot be satisfied along the path")]
    Infeasible,
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),
}

/// One waypoint of a [`JointTrajectory`]; vectors are ordered like the joints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub positions: Vec<f64>,
    #[serde(default)]
    pub velocities: Vec<f64>,
    #[serde(default)]
    pub accelerations: Vec<f64>,
    /// Seconds since the previous waypoint
    #[serde(default)]
    pub time_from_previous: f64,
}

impl TrajectoryPoint {
    pub fn at_rest(positions: Vec<f64>) -> Self {
        let n = positions.len();
        Self {
            positions,
            velocities: vec![0.0; n],
            accelerations: vec![0.0; n],
            time_from_previous: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointTrajectory {
    pub joints: Vec<JointModel>,
    pub waypoints: Vec<TrajectoryPoint>,
}

impl JointTrajectory {
    pub fn new(joints: Vec<JointModel>) -> Self {
        Self {
            joints,
            waypoints: Vec::new(),
        }
    }

    pub fn add_waypoint(&mut self, positions: Vec<f64>) {
        self.waypoints.push(TrajectoryPoint {
            positions,
            ..Default::default()
        });
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.waypoints.iter().map(|p| p.time_from_previous).sum()
    }

    /// Absolute time of every waypoint.
    pub fn waypoint_times(&self) -> Vec<f64> {
        self.waypoints
            .iter()
            .scan(0.0, |time, point| {
                *time += point.time_from_previous;
                Some(*time)
            })
            .collect()
    }
}

/// Time-optimal trajectory generation for [`JointTrajectory`] containers.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeOptimalParameterization {
    path_tolerance: f64,
    resample_dt: f64,
    min_angle_change: f64,
    time_step: f64,
    allow_mixed_joint_kinds: bool,
    write_derivatives: bool,
}

impl Default for TimeOptimalParameterization {
    fn default() -> Self {
        Self {
            path_tolerance: DEFAULT_PATH_TOLERANCE,
            resample_dt: 0.1,
            min_angle_change: 0.001,
            time_step: DEFAULT_TIME_STEP,
            allow_mixed_joint_kinds: false,
            write_derivatives: true,
        }
    }
}

fn check_parameter(name: &'static str, value: f64) -> Result<f64, ProcessingError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        tracing::error!("Invalid parameter {}: {}", name, value);
        Err(ProcessingError::InvalidParameter { name, value })
    }
}

impl TimeOptimalParameterization {
    pub fn new(path_tolerance: f64, resample_dt: f64, min_angle_change: f64) -> Result<Self, ProcessingError> {
        Ok(Self {
            path_tolerance: check_parameter("path_tolerance", path_tolerance)?,
            resample_dt: check_parameter("resample_dt", resample_dt)?,
            min_angle_change: check_parameter("min_angle_change", min_angle_change)?,
            ..Default::default()
        })
    }

    pub fn with_time_step(mut self, time_step: f64) -> Result<Self, ProcessingError> {
        self.time_step = check_parameter("time_step", time_step)?;
        Ok(self)
    }

    pub fn with_resample_dt(mut self, resample_dt: f64) -> Result<Self, ProcessingError> {
        self.resample_dt = check_parameter("resample_dt", resample_dt)?;
        Ok(self)
    }

    pub fn allow_mixed_joint_kinds(mut self, allow: bool) -> Self {
        self.allow_mixed_joint_kinds = allow;
        self
    }

    pub fn write_derivatives(mut self, write: bool) -> Self {
        self.write_derivatives = write;
        self
    }

    pub fn path_tolerance(&self) -> f64 {
        self.path_tolerance
    }

    pub fn resample_dt(&self) -> f64 {
        self.resample_dt
    }

    /// Re-time `trajectory` using the limits of its joint models.
    pub fn compute_time_stamps(
        &self,
        trajectory: &mut JointTrajectory,
        velocity_scaling: f64,
        acceleration_scaling: f64,
    ) -> Result<(), ProcessingError> {
        self.compute_time_stamps_with_limits(
            trajectory,
            &HashMap::new(),
            &HashMap::new(),
            velocity_scaling,
            acceleration_scaling,
        )
    }

    /// Re-time `trajectory`; limits named in the maps override the joint models.
    pub fn compute_time_stamps_with_limits(
        &self,
        trajectory: &mut JointTrajectory,
        velocity_limits: &HashMap<String, f64>,
        acceleration_limits: &HashMap<String, f64>,
        velocity_scaling: f64,
        acceleration_scaling: f64,
    ) -> Result<(), ProcessingError> {
        if trajectory.is_empty() {
            return Ok(());
        }
        self.check_joints(trajectory)?;

        let velocity_scaling = verify_scaling_factor(velocity_scaling, LimitType::Velocity);
        let acceleration_scaling = verify_scaling_factor(acceleration_scaling, LimitType::Acceleration);
        let (max_velocity, max_acceleration) = limits::resolve_limits(
            &trajectory.joints,
            velocity_limits,
            acceleration_limits,
            velocity_scaling,
            acceleration_scaling,
        )?;
        self.parameterize(trajectory, &max_velocity, &max_acceleration)
    }

    /// Re-time `trajectory` with limits taken from limit records.
    pub fn compute_time_stamps_with_joint_limits(
        &self,
        trajectory: &mut JointTrajectory,
        joint_limits: &[JointLimits],
        velocity_scaling: f64,
        acceleration_scaling: f64,
    ) -> Result<(), ProcessingError> {
        let (velocity_limits, acceleration_limits) = limit_maps(joint_limits);
        self.compute_time_stamps_with_limits(
            trajectory,
            &velocity_limits,
            &acceleration_limits,
            velocity_scaling,
            acceleration_scaling,
        )
    }

    /// Re-time `trajectory` so that it ends up with about `num_waypoints`
    /// waypoints spaced equally in time.
    pub fn compute_time_stamps_by_count(
        &self,
        num_waypoints: usize,
        trajectory: &mut JointTrajectory,
        velocity_scaling: f64,
        acceleration_scaling: f64,
    ) -> Result<(), ProcessingError> {
        if num_waypoints < 2 {
            tracing::error!("Cannot resample to {} waypoints", num_waypoints);
            return Err(ProcessingError::InvalidWaypointCount(num_waypoints));
        }

        // first pass only determines the optimal duration
        let mut optimal = trajectory.clone();
        self.compute_time_stamps(&mut optimal, velocity_scaling, acceleration_scaling)?;
        let duration = optimal.duration();
        if duration <= 0.0 {
            *trajectory = optimal;
            return Ok(());
        }

        let resample_dt = duration / (num_waypoints - 1) as f64;
        tracing::debug!(
            "Resampling {:.4}s trajectory to {} waypoints (dt {:.6}s)",
            duration,
            num_waypoints,
            resample_dt
        );
        self.clone()
            .with_resample_dt(resample_dt)?
            .compute_time_stamps(trajectory, velocity_scaling, acceleration_scaling)
    }

    fn check_joints(&self, trajectory: &JointTrajectory) -> Result<(), ProcessingError> {
        if trajectory.joints.is_empty() {
            tracing::error!("Trajectory has no joints");
            return Err(ProcessingError::NoJoints);
        }
        if has_mixed_joint_kinds(&trajectory.joints) {
            if self.allow_mixed_joint_kinds {
                tracing::warn!(
                    "Revolute and prismatic joints are mixed, path tolerance {} applies to both radians and meters",
                    self.path_tolerance
                );
            } else {
                tracing::error!("Revolute and prismatic joints are mixed, path tolerance is ambiguous");
                return Err(ProcessingError::MixedJointKinds);
            }
        }
        let expected = trajectory.joints.len();
        for (index, point) in trajectory.waypoints.iter().enumerate() {
            if point.positions.len() != expected {
                return Err(ProcessingError::DimensionMismatch {
                    index,
                    expected,
                    found: point.positions.len(),
                });
            }
        }
        Ok(())
    }

    fn parameterize(
        &self,
        trajectory: &mut JointTrajectory,
        max_velocity: &DVector<f64>,
        max_acceleration: &DVector<f64>,
    ) -> Result<(), ProcessingError> {
        let continuous: Vec<bool> = trajectory
            .joints
            .iter()
            .map(|j| j.kind == JointKind::Continuous)
            .collect();
        let unwound = unwind(&trajectory.waypoints, &continuous);
        let points = self.significant_waypoints(unwound);

        if points.len() == 1 {
            tracing::debug!("Trajectory does not move, keeping a single waypoint at rest");
            trajectory.waypoints = vec![TrajectoryPoint::at_rest(points[0].iter().copied().collect())];
            return Ok(());
        }

        let path = Path::create(&points, self.path_tolerance)?;
        let parameterized = Trajectory::create(&path, max_velocity, max_acceleration, self.time_step)?;
        if !parameterized.is_valid() {
            tracing::error!("Unable to parameterize trajectory");
            return Err(ProcessingError::Infeasible);
        }

        let duration = parameterized.duration();
        let sample_count = (duration / self.resample_dt).ceil() as usize + 1;
        let mut waypoints = Vec::with_capacity(sample_count);
        let mut previous_time = 0.0;
        for k in 0..sample_count {
            let time = (k as f64 * self.resample_dt).min(duration);
            let state = parameterized.state_at(time);
            let (velocities, accelerations) = if self.write_derivatives {
                (state.velocity.iter().copied().collect(), state.acceleration.iter().copied().collect())
            } else {
                (Vec::new(), Vec::new())
            };
            waypoints.push(TrajectoryPoint {
                positions: state.position.iter().copied().collect(),
                velocities,
                accelerations,
                time_from_previous: time - previous_time,
            });
            previous_time = time;
        }
        tracing::debug!(
            "Parameterized {} waypoints into {} samples over {:.4}s",
            points.len(),
            waypoints.len(),
            duration
        );
        trajectory.waypoints = waypoints;
        Ok(())
    }

    /// Drop waypoints that barely move. The goal is always kept.
    fn significant_waypoints(&self, unwound: Vec<DVector<f64>>) -> Vec<DVector<f64>> {
        let count = unwound.len();
        let mut points: Vec<DVector<f64>> = Vec::with_capacity(count);
        for (index, point) in unwound.into_iter().enumerate() {
            let moves = match points.last() {
                None => true,
                Some(last) => (&point - last).iter().any(|d| d.abs() > self.min_angle_change),
            };
            if moves {
                points.push(point);
            } else if index == count - 1 {
                if let Some(last) = points.last_mut() {
                    *last = point;
                }
            }
        }
        points
    }
}

/// Re-time with default settings to about `num_waypoints` waypoints.
pub fn compute_time_stamps_by_count(
    num_waypoints: usize,
    trajectory: &mut JointTrajectory,
    velocity_scaling: f64,
    acceleration_scaling: f64,
) -> Result<(), ProcessingError> {
    TimeOptimalParameterization::default().compute_time_stamps_by_count(
        num_waypoints,
        trajectory,
        velocity_scaling,
        acceleration_scaling,
    )
}

/// Rewrite continuous joint angles so consecutive waypoints differ by at most π.
fn unwind(waypoints: &[TrajectoryPoint], continuous: &[bool]) -> Vec<DVector<f64>> {
    let mut unwound: Vec<DVector<f64>> = Vec::with_capacity(waypoints.len());
    for point in waypoints {
        let mut current = DVector::from_column_slice(&point.positions);
        if let Some(previous) = unwound.last() {
            for (j, _) in continuous.iter().enumerate().filter(|(_, c)| **c) {
                let delta = (current[j] - previous[j] + PI).rem_euclid(2.0 * PI) - PI;
                current[j] = previous[j] + delta;
            }
        }
        unwound.push(current);
    }
    unwound
}
