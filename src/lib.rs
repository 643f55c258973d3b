// src/lib.rs
//! Time-optimal trajectory generation along blended waypoint paths.
//!
//! - [`path`]: waypoints blended into an arc-length parametrized path
//! - [`trajectory`]: phase-plane time parameterization and time queries
//! - [`processing`]: multi-joint waypoint containers, limits and resampling
//! - [`config`] / [`output`]: job files and result writers used by the `totg` binary

pub mod config;
pub mod output;
pub mod path;
pub mod processing;
pub mod trajectory;

pub use path::{Path, PathError, SwitchingKind, SwitchingPoint, DEFAULT_PATH_TOLERANCE};
pub use processing::{
    compute_time_stamps_by_count, JointKind, JointLimits, JointModel, JointTrajectory, ProcessingError,
    TimeOptimalParameterization, TrajectoryPoint,
};
pub use trajectory::{MotionState, Trajectory, TrajectoryError, DEFAULT_TIME_STEP};
