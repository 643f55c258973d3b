// src/trajectory/mod.rs
//! Time-optimal parameterization of a [`Path`] under per-dimension velocity
//! and acceleration limits.
//!
//! Construction runs the phase-plane integration once and converts the
//! resulting `(s, ṣ)` profile into the time domain. Afterwards a
//! [`Trajectory`] only answers read-only queries.

mod integration;
mod phase_plane;
mod query;

pub use query::SegmentCache;

use nalgebra::DVector;
use thiserror::Error;

use crate::path::Path;
use integration::{Integration, Integrator};
use phase_plane::PhasePlane;

/// Default integration step (seconds).
pub const DEFAULT_TIME_STEP: f64 = 0.001;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrajectoryError {
    #[error("{name} limits have dimension {found}, path has dimension {expected}")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{name} limit of dimension {index} must be positive and finite, got {value}")]
    InvalidLimit {
        name: &'static str,
        index: usize,
        value: f64,
    },
    #[error("Integration time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),
    #[error("Time parameterization did not finish within {0} iterations")]
    IterationLimit(usize),
}

/// A point of the phase-plane profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStep {
    pub path_pos: f64,
    pub path_vel: f64,
}

impl PhaseStep {
    pub fn new(path_pos: f64, path_vel: f64) -> Self {
        Self { path_pos, path_vel }
    }
}

/// A point of the time-domain profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileStep {
    pub path_pos: f64,
    pub path_vel: f64,
    pub time: f64,
}

/// Motion state at a specific time
#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    pub position: DVector<f64>,
    pub velocity: DVector<f64>,
    pub acceleration: DVector<f64>,
    /// Time since the start of the trajectory (seconds)
    pub time: f64,
}

/// Arc-length state along the path.
#[derive(Debug, Clone, Copy)]
struct PathState {
    pos: f64,
    vel: f64,
    acc: f64,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    path: Path,
    max_velocity: DVector<f64>,
    max_acceleration: DVector<f64>,
    time_step: f64,
    valid: bool,
    profile: Vec<ProfileStep>,
    end_profile: Vec<PhaseStep>,
    cache: SegmentCache,
}

impl Trajectory {
    /// Compute the time-optimal trajectory along `path`.
    ///
    /// Infeasibility of the limits along the path does not fail creation;
    /// check [`Trajectory::is_valid`] instead.
    pub fn create(
        path: &Path,
        max_velocity: &DVector<f64>,
        max_acceleration: &DVector<f64>,
        time_step: f64,
    ) -> Result<Self, TrajectoryError> {
        if !(time_step > 0.0 && time_step.is_finite()) {
            tracing::error!("Invalid integration time step {}", time_step);
            return Err(TrajectoryError::InvalidTimeStep(time_step));
        }
        check_limits("Velocity", max_velocity, path.dimension())?;
        check_limits("Acceleration", max_acceleration, path.dimension())?;

        let plane = PhasePlane::new(path, max_velocity, max_acceleration);
        let integration = Integrator::new(&plane, time_step).run()?;
        let trajectory = Self::assemble(path, max_velocity, max_acceleration, time_step, integration);

        if trajectory.valid {
            tracing::debug!(
                "Time parameterization finished: {} profile steps, duration {:.4}s",
                trajectory.profile.len(),
                trajectory.duration()
            );
        } else {
            tracing::warn!(
                "Time parameterization is infeasible, braking to rest at s={:.4} of {:.4}",
                trajectory.profile.last().map_or(0.0, |s| s.path_pos),
                path.length()
            );
        }
        Ok(trajectory)
    }

    fn assemble(
        path: &Path,
        max_velocity: &DVector<f64>,
        max_acceleration: &DVector<f64>,
        time_step: f64,
        integration: Integration,
    ) -> Self {
        Self {
            path: path.clone(),
            max_velocity: max_velocity.clone(),
            max_acceleration: max_acceleration.clone(),
            time_step,
            valid: integration.valid,
            profile: to_time_domain(&integration.profile),
            end_profile: integration.end_profile,
            cache: SegmentCache::new(),
        }
    }

    pub fn with_default_time_step(
        path: &Path,
        max_velocity: &DVector<f64>,
        max_acceleration: &DVector<f64>,
    ) -> Result<Self, TrajectoryError> {
        Self::create(path, max_velocity, max_acceleration, DEFAULT_TIME_STEP)
    }

    /// Whether the profile is a certified, feasible time-optimal profile.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn duration(&self) -> f64 {
        self.profile.last().map_or(0.0, |step| step.time)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_velocity(&self) -> &DVector<f64> {
        &self.max_velocity
    }

    pub fn max_acceleration(&self) -> &DVector<f64> {
        &self.max_acceleration
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn profile(&self) -> &[ProfileStep] {
        &self.profile
    }

    /// Unmerged backward branch, only present when the trajectory is invalid.
    pub fn end_profile(&self) -> &[PhaseStep] {
        &self.end_profile
    }

    pub fn reset_cache(&self) {
        self.cache.reset();
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache.set_enabled(enabled);
    }

    pub fn position_at(&self, t: f64) -> DVector<f64> {
        self.path.config(self.path_state(t).pos)
    }

    pub fn velocity_at(&self, t: f64) -> DVector<f64> {
        let state = self.path_state(t);
        self.path.tangent(state.pos) * state.vel
    }

    pub fn acceleration_at(&self, t: f64) -> DVector<f64> {
        let state = self.path_state(t);
        self.path.tangent(state.pos) * state.acc + self.path.curvature(state.pos) * (state.vel * state.vel)
    }

    pub fn state_at(&self, t: f64) -> MotionState {
        let state = self.path_state(t);
        let tangent = self.path.tangent(state.pos);
        MotionState {
            position: self.path.config(state.pos),
            velocity: &tangent * state.vel,
            acceleration: &tangent * state.acc + self.path.curvature(state.pos) * (state.vel * state.vel),
            time: t.clamp(0.0, self.duration()),
        }
    }

    /// States at `0, dt, 2dt, ...` followed by the final state.
    pub fn sample(&self, dt: f64) -> Result<Vec<MotionState>, TrajectoryError> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(TrajectoryError::InvalidTimeStep(dt));
        }
        let duration = self.duration();
        let count = (duration / dt).ceil() as usize;
        let mut states: Vec<MotionState> = (0..count)
            .map(|k| k as f64 * dt)
            .take_while(|&t| t < duration)
            .map(|t| self.state_at(t))
            .collect();
        states.push(self.state_at(duration));
        Ok(states)
    }

    fn path_state(&self, t: f64) -> PathState {
        let duration = self.duration();
        if t <= 0.0 || self.profile.len() < 2 {
            let pos = if t <= 0.0 { 0.0 } else { self.end_position() };
            return PathState { pos, vel: 0.0, acc: 0.0 };
        }
        if t >= duration {
            return PathState {
                pos: self.end_position(),
                vel: 0.0,
                acc: 0.0,
            };
        }

        let k = self.cache.locate(&self.profile, t);
        let start = self.profile[k];
        let end = self.profile[k + 1];
        let acc = (end.path_vel * end.path_vel - start.path_vel * start.path_vel)
            / (2.0 * (end.path_pos - start.path_pos));
        let tau = t - start.time;
        PathState {
            pos: (start.path_pos + start.path_vel * tau + 0.5 * acc * tau * tau).clamp(start.path_pos, end.path_pos),
            vel: start.path_vel + acc * tau,
            acc,
        }
    }

    fn end_position(&self) -> f64 {
        if self.valid {
            self.path.length()
        } else {
            self.profile.last().map_or(0.0, |s| s.path_pos)
        }
    }
}

fn check_limits(name: &'static str, limits: &DVector<f64>, dimension: usize) -> Result<(), TrajectoryError> {
    if limits.len() != dimension {
        tracing::error!("{} limits have dimension {}, expected {}", name, limits.len(), dimension);
        return Err(TrajectoryError::DimensionMismatch {
            name,
            expected: dimension,
            found: limits.len(),
        });
    }
    if let Some((index, &value)) = limits.iter().enumerate().find(|(_, v)| !(**v > 0.0 && v.is_finite())) {
        tracing::error!("{} limit of dimension {} is invalid: {}", name, index, value);
        return Err(TrajectoryError::InvalidLimit { name, index, value });
    }
    Ok(())
}

/// Assign times to the phase-plane profile with trapezoidal integration.
///
/// Steps that do not advance along the path replace their predecessor, and
/// steps that would not advance in time are dropped.
fn to_time_domain(steps: &[PhaseStep]) -> Vec<ProfileStep> {
    let mut kept: Vec<PhaseStep> = Vec::with_capacity(steps.len());
    for &step in steps {
        while kept.len() > 1 && step.path_pos <= kept[kept.len() - 1].path_pos {
            kept.pop();
        }
        match kept.last() {
            Some(last) if step.path_pos <= last.path_pos => {}
            _ => kept.push(step),
        }
    }

    let mut profile: Vec<ProfileStep> = Vec::with_capacity(kept.len());
    for step in kept {
        let Some(previous) = profile.last() else {
            profile.push(ProfileStep {
                path_pos: step.path_pos,
                path_vel: step.path_vel,
                time: 0.0,
            });
            continue;
        };
        let dt = (step.path_pos - previous.path_pos) / (0.5 * (step.path_vel + previous.path_vel));
        if dt > 0.0 && dt.is_finite() {
            profile.push(ProfileStep {
                path_pos: step.path_pos,
                path_vel: step.path_vel,
                time: previous.time + dt,
            });
        }
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    fn path(points: &[&[f64]]) -> Path {
        let points: Vec<DVector<f64>> = points.iter().map(|p| v(p)).collect();
        Path::create(&points, 0.1).unwrap()
    }

    #[test]
    fn test_rejects_invalid_limits() {
        let path = path(&[&[0.0, 0.0], &[1.0, 1.0]]);
        assert_eq!(
            Trajectory::create(&path, &v(&[1.0]), &v(&[1.0, 1.0]), 0.001).unwrap_err(),
            TrajectoryError::DimensionMismatch { name: "Velocity", expected: 2, found: 1 }
        );
        assert_eq!(
            Trajectory::create(&path, &v(&[1.0, 0.0]), &v(&[1.0, 1.0]), 0.001).unwrap_err(),
            TrajectoryError::InvalidLimit { name: "Velocity", index: 1, value: 0.0 }
        );
        assert!(matches!(
            Trajectory::create(&path, &v(&[1.0, 1.0]), &v(&[-1.0, 1.0]), 0.001),
            Err(TrajectoryError::InvalidLimit { name: "Acceleration", index: 0, .. })
        ));
        assert!(matches!(
            Trajectory::create(&path, &v(&[1.0, 1.0]), &v(&[1.0, f64::NAN]), 0.001),
            Err(TrajectoryError::InvalidLimit { index: 1, .. })
        ));
        assert_eq!(
            Trajectory::create(&path, &v(&[1.0, 1.0]), &v(&[1.0, 1.0]), 0.0).unwrap_err(),
            TrajectoryError::InvalidTimeStep(0.0)
        );
    }

    #[test]
    fn test_straight_line_matches_trapezoid() {
        let path = path(&[&[0.0], &[4.0]]);
        let trajectory = Trajectory::with_default_time_step(&path, &v(&[1.0]), &v(&[1.0])).unwrap();
        assert!(trajectory.is_valid());
        // 1s accelerating, 3s cruising, 1s braking
        assert_relative_eq!(trajectory.duration(), 5.0, epsilon = 0.01);
        assert_relative_eq!(trajectory.position_at(2.5)[0], 2.0, epsilon = 0.01);
        assert_relative_eq!(trajectory.velocity_at(2.5)[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(trajectory.acceleration_at(0.5)[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(trajectory.acceleration_at(4.5)[0], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_time_queries_clamp() {
        let path = path(&[&[0.0, 0.0], &[3.0, 4.0]]);
        let trajectory = Trajectory::with_default_time_step(&path, &v(&[1.0, 1.0]), &v(&[1.0, 1.0])).unwrap();
        assert_relative_eq!(trajectory.duration(), 5.0, epsilon = 0.01);
        assert_eq!(trajectory.position_at(-1.0), v(&[0.0, 0.0]));
        assert_eq!(trajectory.position_at(trajectory.duration() + 1.0), v(&[3.0, 4.0]));
        assert_eq!(trajectory.velocity_at(-1.0), v(&[0.0, 0.0]));
        assert_eq!(trajectory.acceleration_at(100.0), v(&[0.0, 0.0]));
        let end = trajectory.state_at(1e9);
        assert_eq!(end.time, trajectory.duration());
    }

    #[test]
    fn test_profile_is_monotonic() {
        let path = path(&[&[0.0, 0.0], &[1.0, 0.0], &[1.0, 1.0]]);
        let trajectory = Trajectory::with_default_time_step(&path, &v(&[1.0, 1.0]), &v(&[1.0, 1.0])).unwrap();
        let profile = trajectory.profile();
        assert_eq!((profile[0].path_pos, profile[0].time), (0.0, 0.0));
        assert!(profile.windows(2).all(|w| w[0].time < w[1].time && w[0].path_pos < w[1].path_pos));
        assert_eq!(trajectory.duration(), profile[profile.len() - 1].time);
        assert!(trajectory.end_profile().is_empty());
    }

    #[test]
    fn test_infeasible_trajectory_ends_at_rest() {
        let path = path(&[&[0.0], &[4.0]]);
        let limits = v(&[1.0]);
        let plane = PhasePlane::new(&path, &limits, &limits);
        let prefix: Vec<PhaseStep> = (0..=500)
            .map(|k| {
                let s = k as f64 * 0.001;
                PhaseStep::new(s, (2.0 * s).sqrt())
            })
            .collect();
        let integration = Integrator::new(&plane, 0.001).stalled_after(prefix).unwrap();
        let trajectory = Trajectory::assemble(&path, &limits, &limits, 0.001, integration);

        assert!(!trajectory.is_valid());
        assert!(!trajectory.end_profile().is_empty());
        let profile = trajectory.profile();
        assert!(profile.windows(2).all(|w| w[0].time < w[1].time));
        let stop = profile[profile.len() - 1];
        assert_eq!(stop.path_vel, 0.0);
        assert!(stop.path_pos < path.length());

        // 1s up the ramp, 1s braking from v=1
        let duration = trajectory.duration();
        assert_relative_eq!(duration, 2.0, epsilon = 0.05);
        assert_relative_eq!(trajectory.velocity_at(duration - 0.5)[0], 0.5, epsilon = 0.05);
        assert_eq!(trajectory.position_at(duration + 1.0), path.config(stop.path_pos));
        assert_eq!(trajectory.velocity_at(duration + 1.0), v(&[0.0]));
        assert_eq!(trajectory.acceleration_at(duration), v(&[0.0]));
    }

    #[test]
    fn test_sample_covers_duration() {
        let path = path(&[&[0.0], &[1.0]]);
        let trajectory = Trajectory::with_default_time_step(&path, &v(&[1.0]), &v(&[2.0])).unwrap();
        let states = trajectory.sample(0.1).unwrap();
        let last = &states[states.len() - 1];
        assert_eq!(states[0].time, 0.0);
        assert_eq!(last.time, trajectory.duration());
        assert_eq!(last.position, v(&[1.0]));
        assert!(states.windows(2).all(|w| w[1].time - w[0].time <= 0.1 + 1e-12));
        assert!(trajectory.sample(0.0).is_err());
    }

    #[test]
    fn test_time_domain_conversion_drops_stalls() {
        let steps = [
            PhaseStep::new(0.0, 0.0),
            PhaseStep::new(0.5, 1.0),
            PhaseStep::new(0.5, 1.0),
            PhaseStep::new(1.0, 1.0),
            PhaseStep::new(0.9, 1.0),
            PhaseStep::new(1.5, 0.0),
        ];
        let profile = to_time_domain(&steps);
        let positions: Vec<f64> = profile.iter().map(|s| s.path_pos).collect();
        assert_eq!(positions, vec![0.0, 0.5, 0.9, 1.5]);
        assert_relative_eq!(profile[1].time, 1.0);
        assert_relative_eq!(profile[3].time, 1.0 + 0.4 + 1.2);
    }
}
