// src/trajectory/phase_plane.rs
//! Limit curves in the `(s, ṣ)` phase plane and the switching point search.
//!
//! Every per-dimension bound `|q_i'| <= vmax_i` and `|q_i''| <= amax_i` is
//! projected onto the path through `q' = T(s) ṣ` and `q'' = T(s) s̈ + C(s) ṣ²`.

use nalgebra::DVector;

use crate::path::{Path, SwitchingKind};

/// Offset used for one-sided evaluations and finite differences.
pub(crate) const EPS: f64 = 0.000001;

/// Arc-length step of the velocity switching point scan.
const VELOCITY_SEARCH_STEP: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bound {
    Min,
    Max,
}

/// A point where the optimal profile has to touch a limit curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SwitchingCandidate {
    pub position: f64,
    pub velocity: f64,
    /// Path acceleration to integrate backward with.
    pub before_acceleration: f64,
    /// Path acceleration to resume forward integration with.
    pub after_acceleration: f64,
}

pub(crate) struct PhasePlane<'a> {
    path: &'a Path,
    max_velocity: &'a DVector<f64>,
    max_acceleration: &'a DVector<f64>,
}

impl<'a> PhasePlane<'a> {
    pub fn new(path: &'a Path, max_velocity: &'a DVector<f64>, max_acceleration: &'a DVector<f64>) -> Self {
        Self {
            path,
            max_velocity,
            max_acceleration,
        }
    }

    pub fn path(&self) -> &Path {
        self.path
    }

    /// Largest (`Bound::Max`) or smallest (`Bound::Min`) path acceleration
    /// that keeps every dimension within its acceleration limit.
    pub fn path_acceleration(&self, s: f64, path_vel: f64, bound: Bound) -> f64 {
        let tangent = self.path.tangent(s);
        let curvature = self.path.curvature(s);
        let factor = match bound {
            Bound::Max => 1.0,
            Bound::Min => -1.0,
        };
        let mut limit = f64::MAX;
        for i in 0..tangent.len() {
            if tangent[i] != 0.0 {
                limit = limit.min(
                    self.max_acceleration[i] / tangent[i].abs()
                        - factor * curvature[i] * path_vel * path_vel / tangent[i],
                );
            }
        }
        factor * limit
    }

    pub fn phase_slope(&self, s: f64, path_vel: f64, bound: Bound) -> f64 {
        self.path_acceleration(s, path_vel, bound) / path_vel
    }

    /// Highest path velocity at which the acceleration interval is non-empty.
    pub fn acceleration_limit(&self, s: f64) -> f64 {
        let tangent = self.path.tangent(s);
        let curvature = self.path.curvature(s);
        let mut limit = f64::INFINITY;
        for i in 0..tangent.len() {
            if tangent[i] != 0.0 {
                for j in (i + 1)..tangent.len() {
                    if tangent[j] != 0.0 {
                        let a_ij = curvature[i] / tangent[i] - curvature[j] / tangent[j];
                        if a_ij != 0.0 {
                            limit = limit.min(
                                ((self.max_acceleration[i] / tangent[i].abs()
                                    + self.max_acceleration[j] / tangent[j].abs())
                                    / a_ij.abs())
                                .sqrt(),
                            );
                        }
                    }
                }
            } else if curvature[i] != 0.0 {
                limit = limit.min((self.max_acceleration[i] / curvature[i].abs()).sqrt());
            }
        }
        limit
    }

    /// Highest path velocity allowed by the velocity limits.
    pub fn velocity_limit(&self, s: f64) -> f64 {
        let tangent = self.path.tangent(s);
        tangent
            .iter()
            .zip(self.max_velocity.iter())
            .fold(f64::MAX, |limit, (t, vmax)| limit.min(vmax / t.abs()))
    }

    pub fn acceleration_limit_slope(&self, s: f64) -> f64 {
        (self.acceleration_limit(s + EPS) - self.acceleration_limit(s - EPS)) / (2.0 * EPS)
    }

    /// Derivative of the velocity limit curve, taken on the active constraint.
    pub fn velocity_limit_slope(&self, s: f64) -> f64 {
        let tangent = self.path.tangent(s);
        let mut limit = f64::MAX;
        let mut active = None;
        for i in 0..tangent.len() {
            let candidate = self.max_velocity[i] / tangent[i].abs();
            if candidate < limit {
                limit = candidate;
                active = Some(i);
            }
        }
        match active {
            Some(k) => {
                let curvature = self.path.curvature(s);
                -(self.max_velocity[k] * curvature[k]) / (tangent[k] * tangent[k].abs())
            }
            None => 0.0,
        }
    }

    /// Deceleration used to bring an infeasible profile to rest.
    pub fn braking_acceleration(&self, s: f64, path_vel: f64) -> f64 {
        let tangent = self.path.tangent(s);
        let nominal = tangent
            .iter()
            .zip(self.max_acceleration.iter())
            .filter(|(t, _)| **t != 0.0)
            .fold(f64::MAX, |limit, (t, amax)| limit.min(amax / t.abs()));
        self.path_acceleration(s, path_vel, Bound::Min).min(-nominal)
    }

    /// Next point after `s` where forward integration must be restarted, or
    /// `None` when the rest of the path can be finished by the goal branch.
    pub fn next_switching_point(&self, s: f64) -> Option<SwitchingCandidate> {
        let mut acceleration_position = s;
        let acceleration_point = loop {
            match self.next_acceleration_switching_point(acceleration_position) {
                Some(point) => {
                    acceleration_position = point.position;
                    if point.velocity <= self.velocity_limit(point.position) {
                        break Some(point);
                    }
                }
                None => break None,
            }
        };

        let mut search_from = s;
        let velocity_point = loop {
            match self.next_velocity_switching_point(search_from) {
                Some(point) => {
                    let above_acceleration_limit = point.velocity
                        > self.acceleration_limit(point.position - EPS)
                        || point.velocity > self.acceleration_limit(point.position + EPS);
                    if point.position > acceleration_position || !above_acceleration_limit {
                        break Some(point);
                    }
                    search_from = if point.position > search_from {
                        point.position
                    } else {
                        search_from + VELOCITY_SEARCH_STEP
                    };
                }
                None => break None,
            }
        };

        match (acceleration_point, velocity_point) {
            (None, None) => None,
            (Some(a), Some(v)) if a.position <= v.position => Some(a),
            (Some(a), None) => Some(a),
            (_, Some(v)) => Some(v),
        }
    }

    /// Next path switching point after `s` at which the acceleration limit
    /// curve has a local minimum the profile must pass through.
    fn next_acceleration_switching_point(&self, s: f64) -> Option<SwitchingCandidate> {
        let length = self.path.length();
        let mut position = s;
        loop {
            let point = self.path.next_switching_point(position);
            position = point.position;
            if position > length - EPS {
                return None;
            }

            match point.kind {
                SwitchingKind::Reversal => {
                    return Some(SwitchingCandidate {
                        position,
                        velocity: 0.0,
                        before_acceleration: self.path_acceleration(position - EPS, 0.0, Bound::Min),
                        after_acceleration: self.path_acceleration(position + EPS, 0.0, Bound::Max),
                    });
                }
                SwitchingKind::Discontinuity => {
                    let before_vel = self.acceleration_limit(position - EPS);
                    let after_vel = self.acceleration_limit(position + EPS);
                    let velocity = before_vel.min(after_vel);
                    let falling = before_vel > after_vel
                        || self.phase_slope(position - EPS, velocity, Bound::Min)
                            > self.acceleration_limit_slope(position - 2.0 * EPS);
                    let rising = before_vel < after_vel
                        || self.phase_slope(position + EPS, velocity, Bound::Max)
                            < self.acceleration_limit_slope(position + 2.0 * EPS);
                    if falling && rising {
                        return Some(SwitchingCandidate {
                            position,
                            velocity,
                            before_acceleration: self.path_acceleration(position - EPS, velocity, Bound::Min),
                            after_acceleration: self.path_acceleration(position + EPS, velocity, Bound::Max),
                        });
                    }
                }
                SwitchingKind::Feature => {
                    if self.acceleration_limit_slope(position - EPS) < 0.0
                        && self.acceleration_limit_slope(position + EPS) > 0.0
                    {
                        return Some(SwitchingCandidate {
                            position,
                            velocity: self.acceleration_limit(position),
                            before_acceleration: 0.0,
                            after_acceleration: 0.0,
                        });
                    }
                }
            }
        }
    }

    /// Next point after `s` where the velocity limit curve stops being
    /// followable, found by a coarse scan refined with bisection.
    fn next_velocity_switching_point(&self, s: f64) -> Option<SwitchingCandidate> {
        let length = self.path.length();
        let exceeds_curve =
            |pos: f64| self.phase_slope(pos, self.velocity_limit(pos), Bound::Min) > self.velocity_limit_slope(pos);

        let mut position = s - VELOCITY_SEARCH_STEP;
        let mut started = false;
        loop {
            position += VELOCITY_SEARCH_STEP;
            if self.phase_slope(position, self.velocity_limit(position), Bound::Min)
                >= self.velocity_limit_slope(position)
            {
                started = true;
            }
            if !((!started || exceeds_curve(position)) && position < length) {
                break;
            }
        }
        if position >= length {
            return None;
        }

        let mut before = position - VELOCITY_SEARCH_STEP;
        let mut after = position;
        while after - before > EPS {
            let midpoint = 0.5 * (before + after);
            if exceeds_curve(midpoint) {
                before = midpoint;
            } else {
                after = midpoint;
            }
        }

        let velocity = self.velocity_limit(after);
        Some(SwitchingCandidate {
            position: after,
            velocity,
            before_acceleration: self.path_acceleration(before, self.velocity_limit(before), Bound::Min),
            after_acceleration: self.path_acceleration(after, velocity, Bound::Max),
        })
    }
}
