//! # Trajectory Job Configuration
//!
//! A job file describes the parameterization settings, the joints with their
//! limits and, optionally, the waypoints to time-parameterize.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! waypoints = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]
//!
//! [parameterization]
//! path_tolerance = 0.1
//! resample_dt = 0.1
//!
//! [scaling]
//! velocity = 0.5
//!
//! [[joints]]
//! name = "shoulder"
//! kind = "revolute"
//! max_velocity = 1.5
//! max_acceleration = 3.0
//!
//! [[joints]]
//! name = "elbow"
//! kind = "continuous"
//! max_velocity = 2.0
//! max_acceleration = 4.0
//! ```
//!
//! Top-level keys such as `waypoints` have to come before the first table.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::processing::{JointKind, JointModel, JointTrajectory, ProcessingError, TimeOptimalParameterization};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration struct for a time-parameterization job.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub waypoints: Vec<Vec<f64>>,
    #[serde(default)]
    pub parameterization: ParameterizationConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub joints: Vec<JointConfig>,
}

/// Settings of the time-optimal parameterization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParameterizationConfig {
    #[serde(default = "default_path_tolerance")]
    pub path_tolerance: f64,
    #[serde(default = "default_resample_dt")]
    pub resample_dt: f64,
    #[serde(default = "default_min_angle_change")]
    pub min_angle_change: f64,
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    #[serde(default)]
    pub allow_mixed_joint_kinds: bool,
    #[serde(default = "default_true")]
    pub write_derivatives: bool,
}

impl Default for ParameterizationConfig {
    fn default() -> Self {
        Self {
            path_tolerance: default_path_tolerance(),
            resample_dt: default_resample_dt(),
            min_angle_change: default_min_angle_change(),
            time_step: default_time_step(),
            allow_mixed_joint_kinds: false,
            write_derivatives: default_true(),
        }
    }
}

impl ParameterizationConfig {
    pub fn build(&self) -> Result<TimeOptimalParameterization, ProcessingError> {
        Ok(
            TimeOptimalParameterization::new(self.path_tolerance, self.resample_dt, self.min_angle_change)?
                .with_time_step(self.time_step)?
                .allow_mixed_joint_kinds(self.allow_mixed_joint_kinds)
                .write_derivatives(self.write_derivatives),
        )
    }
}

/// Scaling applied to all joint limits, in `(0, 1]`. Factors outside that
/// range are replaced by 1.0 with a warning when the job runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScalingConfig {
    #[serde(default = "default_scaling")]
    pub velocity: f64,
    #[serde(default = "default_scaling")]
    pub acceleration: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            velocity: default_scaling(),
            acceleration: default_scaling(),
        }
    }
}

/// A joint and its symmetric limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JointConfig {
    pub name: String,
    #[serde(default = "default_joint_kind")]
    pub kind: JointKind,
    #[serde(default)]
    pub max_velocity: Option<f64>,
    #[serde(default)]
    pub max_acceleration: Option<f64>,
}

impl JointConfig {
    pub fn to_model(&self) -> JointModel {
        let mut model = JointModel::new(self.name.clone(), self.kind);
        if let Some(limit) = self.max_velocity {
            model = model.with_velocity_limit(limit);
        }
        if let Some(limit) = self.max_acceleration {
            model = model.with_acceleration_limit(limit);
        }
        model
    }
}

impl Config {
    /// Validate parameter ranges, joint definitions and waypoint dimensions.
    /// Scaling factors are left to the parameterization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.parameterization;
        for (name, value) in [
            ("path_tolerance", p.path_tolerance),
            ("resample_dt", p.resample_dt),
            ("min_angle_change", p.min_angle_change),
            ("time_step", p.time_step),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::Validation(format!("parameterization.{} must be > 0, got {}", name, value)));
            }
        }
        let mut names = HashSet::new();
        for joint in &self.joints {
            if joint.name.is_empty() {
                return Err(ConfigError::Validation("Joint names must not be empty".to_string()));
            }
            if !names.insert(joint.name.as_str()) {
                return Err(ConfigError::Validation(format!("Duplicate joint '{}'", joint.name)));
            }
            for (limit, value) in [("max_velocity", joint.max_velocity), ("max_acceleration", joint.max_acceleration)] {
                if let Some(value) = value {
                    if !(value > 0.0 && value.is_finite()) {
                        return Err(ConfigError::Validation(format!(
                            "Joint '{}' {} must be > 0, got {}",
                            joint.name, limit, value
                        )));
                    }
                }
            }
        }

        if !self.waypoints.is_empty() && self.joints.is_empty() {
            return Err(ConfigError::Validation("Waypoints given without joints".to_string()));
        }
        for (index, waypoint) in self.waypoints.iter().enumerate() {
            if waypoint.len() != self.joints.len() {
                return Err(ConfigError::Validation(format!(
                    "Waypoint {} has {} positions, expected {}",
                    index,
                    waypoint.len(),
                    self.joints.len()
                )));
            }
        }
        Ok(())
    }

    /// The configured joints and waypoints as a trajectory container.
    pub fn joint_trajectory(&self) -> JointTrajectory {
        let mut trajectory = JointTrajectory::new(self.joints.iter().map(JointConfig::to_model).collect());
        for waypoint in &self.waypoints {
            trajectory.add_waypoint(waypoint.clone());
        }
        trajectory
    }
}

// Default value functions
fn default_path_tolerance() -> f64 { crate::path::DEFAULT_PATH_TOLERANCE }
fn default_resample_dt() -> f64 { 0.1 }
fn default_min_angle_change() -> f64 { 0.001 }
fn default_time_step() -> f64 { crate::trajectory::DEFAULT_TIME_STEP }
fn default_scaling() -> f64 { 1.0 }
fn default_true() -> bool { true }
fn default_joint_kind() -> JointKind { JointKind::Revolute }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const JOB: &str = r#"
waypoints = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]

[parameterization]
path_tolerance = 0.05
resample_dt = 0.02

[scaling]
velocity = 0.5

[[joints]]
name = "shoulder"
max_velocity = 1.5
max_acceleration = 3.0

[[joints]]
name = "elbow"
kind = "continuous"
max_velocity = 2.0
max_acceleration = 4.0
"#;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.parameterization.path_tolerance, 0.1);
        assert_eq!(config.parameterization.resample_dt, 0.1);
        assert_eq!(config.parameterization.min_angle_change, 0.001);
        assert_eq!(config.parameterization.time_step, 0.001);
        assert!(!config.parameterization.allow_mixed_joint_kinds);
        assert!(config.parameterization.write_derivatives);
        assert_eq!(config.scaling.velocity, 1.0);
        assert_eq!(config.scaling.acceleration, 1.0);
        assert!(config.joints.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("job.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{}", JOB).unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.parameterization.path_tolerance, 0.05);
        // Defaults for missing fields
        assert_eq!(config.parameterization.min_angle_change, 0.001);
        assert_eq!(config.scaling.velocity, 0.5);
        assert_eq!(config.scaling.acceleration, 1.0);
        assert_eq!(config.joints.len(), 2);
        assert_eq!(config.joints[0].kind, JointKind::Revolute);
        assert_eq!(config.joints[1].kind, JointKind::Continuous);
        assert_eq!(config.waypoints.len(), 3);
        assert!(config.validate().is_ok());

        let trajectory = config.joint_trajectory();
        assert_eq!(trajectory.len(), 3);
        assert_eq!(trajectory.joints[1].name, "elbow");
        assert_eq!(trajectory.joints[0].velocity_bounds.map(|b| b.magnitude()), Some(1.5));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_unknown_joint_kind_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[[joints]]\nname = \"a\"\nkind = \"spherical\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_errors() {
        let base: Config = toml::from_str(JOB).unwrap();

        let mut config = base.clone();
        config.parameterization.resample_dt = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));


        let mut config = base.clone();
        config.joints[1].name = "shoulder".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(msg)) if msg.contains("Duplicate")));

        let mut config = base.clone();
        config.joints[0].max_velocity = Some(-1.0);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = base.clone();
        config.waypoints.push(vec![1.0]);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(msg)) if msg.contains("Waypoint 3")));

        let mut config = base;
        config.joints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_scaling_runs_at_full_speed() {
        let base: Config = toml::from_str(JOB).unwrap();
        let mut config = base.clone();
        config.scaling.velocity = 1.5;
        config.scaling.acceleration = 0.0;
        assert!(config.validate().is_ok());

        let run = |config: &Config| {
            let mut trajectory = config.joint_trajectory();
            config
                .parameterization
                .build()
                .unwrap()
                .compute_time_stamps(&mut trajectory, config.scaling.velocity, config.scaling.acceleration)
                .unwrap();
            trajectory.duration()
        };
        let mut full = base;
        full.scaling.velocity = 1.0;
        assert_eq!(run(&config), run(&full));
    }

    #[test]
    fn test_build_parameterization() {
        let config: Config = toml::from_str(JOB).unwrap();
        let parameterization = config.parameterization.build().unwrap();
        assert_eq!(parameterization.path_tolerance(), 0.05);
        assert_eq!(parameterization.resample_dt(), 0.02);
    }
}
