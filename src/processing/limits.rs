// src/processing/limits.rs
//! Joint models and the per-joint velocity/acceleration limits derived from them.

use std::collections::HashMap;
use std::fmt;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::ProcessingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointKind {
    Revolute,
    Prismatic,
    /// Revolute joint without position bounds; angles wrap around.
    Continuous,
}

impl JointKind {
    /// Whether positions of this joint are angles.
    pub fn is_angular(self) -> bool {
        matches!(self, JointKind::Revolute | JointKind::Continuous)
    }
}

/// Bounds on a joint quantity, `min <= value <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitRange {
    pub min: f64,
    pub max: f64,
}

impl LimitRange {
    pub fn symmetric(limit: f64) -> Self {
        Self {
            min: -limit,
            max: limit,
        }
    }

    /// Largest magnitude usable in both directions.
    pub fn magnitude(&self) -> f64 {
        self.min.abs().min(self.max.abs())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointModel {
    pub name: String,
    pub kind: JointKind,
    #[serde(default)]
    pub velocity_bounds: Option<LimitRange>,
    #[serde(default)]
    pub acceleration_bounds: Option<LimitRange>,
}

impl JointModel {
    pub fn new(name: impl Into<String>, kind: JointKind) -> Self {
        Self {
            name: name.into(),
            kind,
            velocity_bounds: None,
            acceleration_bounds: None,
        }
    }

    pub fn with_velocity_limit(mut self, limit: f64) -> Self {
        self.velocity_bounds = Some(LimitRange::symmetric(limit));
        self
    }

    pub fn with_acceleration_limit(mut self, limit: f64) -> Self {
        self.acceleration_bounds = Some(LimitRange::symmetric(limit));
        self
    }
}

/// Named limit record, as published by a robot description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointLimits {
    pub joint_name: String,
    pub has_velocity_limits: bool,
    pub max_velocity: f64,
    pub has_acceleration_limits: bool,
    pub max_acceleration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Velocity,
    Acceleration,
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitType::Velocity => write!(f, "velocity"),
            LimitType::Acceleration => write!(f, "acceleration"),
        }
    }
}

/// Return `requested` if it is a usable scaling factor in `(0, 1]`,
/// otherwise fall back to 1.0.
pub fn verify_scaling_factor(requested: f64, limit_type: LimitType) -> f64 {
    if requested > 0.0 && requested <= 1.0 {
        tracing::debug!("Joint {} scaling factor: {}", limit_type, requested);
        requested
    } else {
        tracing::warn!(
            "Invalid max_{}_scaling_factor {} specified, defaulting to 1.0",
            limit_type,
            requested
        );
        1.0
    }
}

/// True if angular and linear joints are mixed, which makes a single path
/// tolerance ambiguous.
pub fn has_mixed_joint_kinds(joints: &[JointModel]) -> bool {
    let angular = joints.iter().any(|j| j.kind.is_angular());
    let linear = joints.iter().any(|j| j.kind == JointKind::Prismatic);
    angular && linear
}

/// Build velocity and acceleration limit maps from limit records.
pub fn limit_maps(joint_limits: &[JointLimits]) -> (HashMap<String, f64>, HashMap<String, f64>) {
    let mut velocity = HashMap::new();
    let mut acceleration = HashMap::new();
    for limits in joint_limits {
        if limits.has_velocity_limits {
            velocity.insert(limits.joint_name.clone(), limits.max_velocity);
        }
        if limits.has_acceleration_limits {
            acceleration.insert(limits.joint_name.clone(), limits.max_acceleration);
        }
    }
    (velocity, acceleration)
}

/// Scaled limit vectors for `joints`. Named overrides take precedence over
/// the joint models' own bounds.
pub(crate) fn resolve_limits(
    joints: &[JointModel],
    velocity_overrides: &HashMap<String, f64>,
    acceleration_overrides: &HashMap<String, f64>,
    velocity_scaling: f64,
    acceleration_scaling: f64,
) -> Result<(DVector<f64>, DVector<f64>), ProcessingError> {
    let velocity = resolve(joints, velocity_overrides, LimitType::Velocity, |j| j.velocity_bounds)?;
    let acceleration = resolve(joints, acceleration_overrides, LimitType::Acceleration, |j| {
        j.acceleration_bounds
    })?;
    Ok((velocity * velocity_scaling, acceleration * acceleration_scaling))
}

fn resolve(
    joints: &[JointModel],
    overrides: &HashMap<String, f64>,
    limit_type: LimitType,
    bounds: impl Fn(&JointModel) -> Option<LimitRange>,
) -> Result<DVector<f64>, ProcessingError> {
    let mut limits = DVector::zeros(joints.len());
    for (i, joint) in joints.iter().enumerate() {
        let value = match overrides.get(&joint.name) {
            Some(&value) => value,
            None => match bounds(joint) {
                Some(range) => range.magnitude(),
                None => {
                    tracing::error!("No {} limit was defined for joint {}", limit_type, joint.name);
                    return Err(ProcessingError::MissingLimit {
                        joint: joint.name.clone(),
                        limit_type,
                    });
                }
            },
        };
        if !(value > 0.0 && value.is_finite()) {
            tracing::error!(
                "Invalid max {} {} defined for joint {}, must be greater than zero",
                limit_type,
                value,
                joint.name
            );
            return Err(ProcessingError::InvalidLimit {
                joint: joint.name.clone(),
                limit_type,
                value,
            });
        }
        limits[i] = value;
    }
    Ok(limits)
}
