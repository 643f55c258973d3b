// src/trajectory/integration.rs
//! Forward/backward integration in the phase plane.
//!
//! The profile is grown forward at maximum path acceleration until it runs
//! into a limit curve. The next switching point is then located and a
//! braking branch is integrated backward from it until it meets the forward
//! profile. Repeating this until the goal branch is spliced in yields the
//! time-optimal profile.

use super::phase_plane::{Bound, PhasePlane, EPS};
use super::{PhaseStep, TrajectoryError};
use crate::path::SwitchingKind;

/// Upper bound on integration steps over a whole construction.
const MAX_INTEGRATION_STEPS: usize = 20_000_000;

/// Base budget of switching point iterations, extended per path switching point.
const BASE_SWITCHING_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forward {
    ReachedEnd,
    HitLimitCurve,
    Failed,
}

/// Result of integrating a path.
#[derive(Debug, Clone)]
pub(crate) struct Integration {
    pub profile: Vec<PhaseStep>,
    pub end_profile: Vec<PhaseStep>,
    pub valid: bool,
}

pub(crate) struct Integrator<'a> {
    plane: &'a PhasePlane<'a>,
    time_step: f64,
    length: f64,
    /// Positions of discontinuity switching points, ascending.
    discontinuities: Vec<f64>,
    profile: Vec<PhaseStep>,
    end_profile: Vec<PhaseStep>,
    steps: usize,
}

impl<'a> Integrator<'a> {
    pub fn new(plane: &'a PhasePlane<'a>, time_step: f64) -> Self {
        let path = plane.path();
        let discontinuities = path
            .switching_points()
            .iter()
            .filter(|p| p.is_discontinuity())
            .map(|p| p.position)
            .collect();
        Self {
            plane,
            time_step,
            length: path.length(),
            discontinuities,
            profile: vec![PhaseStep::new(0.0, 0.0)],
            end_profile: Vec::new(),
            steps: 0,
        }
    }

    pub fn run(mut self) -> Result<Integration, TrajectoryError> {
        let max_iterations = BASE_SWITCHING_ITERATIONS + 10 * self.plane.path().switching_points().len();
        let mut after_acceleration = self.plane.path_acceleration(0.0, 0.0, Bound::Max);
        let mut iterations = 0;
        let mut valid = true;
        let mut forward_failed = false;

        loop {
            match self.integrate_forward(after_acceleration)? {
                Forward::ReachedEnd => break,
                Forward::Failed => {
                    valid = false;
                    forward_failed = true;
                    break;
                }
                Forward::HitLimitCurve => {}
            }

            iterations += 1;
            if iterations > max_iterations {
                tracing::error!("Switching point search did not terminate after {} iterations", max_iterations);
                return Err(TrajectoryError::IterationLimit(max_iterations));
            }

            let from = self.last().path_pos;
            let Some(point) = self.plane.next_switching_point(from) else {
                break;
            };
            tracing::trace!(
                "Switching point at s={:.6} with path velocity {:.6}",
                point.position,
                point.velocity
            );
            if !self.integrate_backward(point.position, point.velocity, point.before_acceleration)? {
                valid = false;
                break;
            }
            after_acceleration = point.after_acceleration;
        }

        if valid {
            let goal_acceleration = self.plane.path_acceleration(self.length, 0.0, Bound::Min);
            valid = self.integrate_backward(self.length, 0.0, goal_acceleration)?;
        }

        if !valid {
            self.fall_back_to_braking(forward_failed)?;
        }

        Ok(Integration {
            profile: self.profile,
            end_profile: self.end_profile,
            valid,
        })
    }

    /// Keep the certified prefix and brake to rest from its last step.
    fn fall_back_to_braking(&mut self, forward_failed: bool) -> Result<(), TrajectoryError> {
        if forward_failed {
            self.end_profile = self.integrate_goal_branch()?;
        }
        self.brake_to_rest()
    }

    /// Result of a forward pass that failed after `prefix`.
    #[cfg(test)]
    pub(crate) fn stalled_after(mut self, prefix: Vec<PhaseStep>) -> Result<Integration, TrajectoryError> {
        self.profile = prefix;
        self.fall_back_to_braking(true)?;
        Ok(Integration {
            profile: self.profile,
            end_profile: self.end_profile,
            valid: false,
        })
    }

    fn last(&self) -> PhaseStep {
        self.profile[self.profile.len() - 1]
    }

    fn count_step(&mut self) -> Result<(), TrajectoryError> {
        self.steps += 1;
        if self.steps > MAX_INTEGRATION_STEPS {
            tracing::error!("Phase plane integration exceeded {} steps", MAX_INTEGRATION_STEPS);
            return Err(TrajectoryError::IterationLimit(MAX_INTEGRATION_STEPS));
        }
        Ok(())
    }

    /// Integrate forward from the last profile step at maximum acceleration.
    fn integrate_forward(&mut self, mut acceleration: f64) -> Result<Forward, TrajectoryError> {
        let plane = self.plane;
        let switching_points = plane.path().switching_points();
        let dt = self.time_step;
        let PhaseStep {
            path_pos: mut pos,
            path_vel: mut vel,
        } = self.last();
        let mut next = 0;

        loop {
            self.count_step()?;
            while next < switching_points.len()
                && (switching_points[next].position <= pos || !switching_points[next].is_discontinuity())
            {
                next += 1;
            }
            let discontinuity = switching_points.get(next).copied();

            let (old_pos, old_vel) = (pos, vel);
            vel += dt * acceleration;
            pos += dt * 0.5 * (old_vel + vel);

            if let Some(point) = discontinuity {
                if point.kind == SwitchingKind::Reversal && pos >= point.position {
                    // motion has to stop at the reversal; the switching point search takes over
                    return Ok(Forward::HitLimitCurve);
                }
                if pos > point.position {
                    // no step may straddle a discontinuity
                    vel = old_vel + (point.position - old_pos) * (vel - old_vel) / (pos - old_pos);
                    pos = point.position;
                }
            }

            if pos > self.length {
                self.profile.push(PhaseStep::new(pos, vel));
                return Ok(Forward::ReachedEnd);
            } else if vel < 0.0 {
                tracing::error!("Error while integrating forward: negative path velocity at s={:.6}", pos);
                return Ok(Forward::Failed);
            }

            if vel > plane.velocity_limit(pos)
                && plane.phase_slope(old_pos, plane.velocity_limit(old_pos), Bound::Min)
                    <= plane.velocity_limit_slope(old_pos)
            {
                vel = plane.velocity_limit(pos);
            }

            self.profile.push(PhaseStep::new(pos, vel));
            acceleration = plane.path_acceleration(pos, vel, Bound::Max);

            if vel > plane.acceleration_limit(pos) || vel > plane.velocity_limit(pos) {
                // refine the crossing with the limit curves by bisection
                let overshoot = self.profile.pop().unwrap_or(PhaseStep::new(pos, vel));
                let previous = self.last();
                let (mut before, mut before_vel) = (previous.path_pos, previous.path_vel);
                let (mut after, mut after_vel) = (overshoot.path_pos, overshoot.path_vel);
                while after - before > EPS {
                    let midpoint = 0.5 * (before + after);
                    let mut midpoint_vel = 0.5 * (before_vel + after_vel);

                    if midpoint_vel > plane.velocity_limit(midpoint)
                        && plane.phase_slope(before, plane.velocity_limit(before), Bound::Min)
                            <= plane.velocity_limit_slope(before)
                    {
                        midpoint_vel = plane.velocity_limit(midpoint);
                    }

                    if midpoint_vel > plane.acceleration_limit(midpoint) || midpoint_vel > plane.velocity_limit(midpoint) {
                        after = midpoint;
                        after_vel = midpoint_vel;
                    } else {
                        before = midpoint;
                        before_vel = midpoint_vel;
                    }
                }
                self.profile.push(PhaseStep::new(before, before_vel));

                let next_discontinuity = discontinuity.map_or(self.length, |p| p.position);
                if plane.acceleration_limit(after) < plane.velocity_limit(after) {
                    if after > next_discontinuity {
                        return Ok(Forward::HitLimitCurve);
                    }
                    if plane.phase_slope(before, before_vel, Bound::Max) > plane.acceleration_limit_slope(before) {
                        return Ok(Forward::HitLimitCurve);
                    }
                } else if plane.phase_slope(before, before_vel, Bound::Min) > plane.velocity_limit_slope(before) {
                    return Ok(Forward::HitLimitCurve);
                }
            }
        }
    }

    /// One backward step, clipped at the nearest discontinuity below `pos`.
    ///
    /// Returns the new state and the position to evaluate the next
    /// acceleration at, which lies on the side the branch continues into.
    fn backward_step(&self, pos: f64, vel: f64, acceleration: f64) -> (f64, f64, f64) {
        let dt = self.time_step;
        let mut new_vel = vel - dt * acceleration;
        let mut new_pos = pos - dt * 0.5 * (new_vel + vel);
        let mut sample_pos = new_pos;

        let idx = self.discontinuities.partition_point(|&d| d < pos);
        if idx > 0 {
            let boundary = self.discontinuities[idx - 1];
            if new_pos < boundary {
                new_vel = vel + (boundary - pos) * (new_vel - vel) / (new_pos - pos);
                new_pos = boundary;
                sample_pos = boundary - EPS;
            }
        }
        (new_pos, new_vel, sample_pos)
    }

    /// Integrate backward from `(pos, vel)` at minimum acceleration until the
    /// branch meets the profile, then splice it in. Returns `false` if the
    /// branch fails; the branch is kept in `end_profile`.
    fn integrate_backward(&mut self, mut pos: f64, mut vel: f64, mut acceleration: f64) -> Result<bool, TrajectoryError> {
        let plane = self.plane;
        if self.profile.len() < 2 {
            tracing::error!("Error while integrating backward: no forward profile to merge into");
            self.end_profile = vec![PhaseStep::new(pos, vel)];
            return Ok(false);
        }

        let mut start2 = self.profile.len() - 1;
        let mut start1 = start2 - 1;
        // branch steps in order of decreasing position
        let mut branch: Vec<PhaseStep> = Vec::new();
        let mut slope = 0.0;

        while start1 != 0 || pos >= 0.0 {
            self.count_step()?;
            if self.profile[start1].path_pos <= pos {
                branch.push(PhaseStep::new(pos, vel));
                let (front_pos, front_vel) = (pos, vel);
                let (new_pos, new_vel, sample_pos) = self.backward_step(pos, vel, acceleration);
                pos = new_pos;
                vel = new_vel;
                acceleration = plane.path_acceleration(sample_pos, vel, Bound::Min);
                slope = (front_vel - vel) / (front_pos - pos);

                if vel < 0.0 {
                    tracing::error!("Error while integrating backward: negative path velocity at s={:.6}", pos);
                    branch.reverse();
                    self.end_profile = branch;
                    return Ok(false);
                }
            } else {
                start1 -= 1;
                start2 -= 1;
            }

            // intersection between the current profile segment and the branch
            let Some(front) = branch.last().copied() else {
                continue;
            };
            let s1 = self.profile[start1];
            let s2 = self.profile[start2];
            let start_slope = (s2.path_vel - s1.path_vel) / (s2.path_pos - s1.path_pos);
            let intersection =
                (s1.path_vel - vel + slope * pos - start_slope * s1.path_pos) / (slope - start_slope);
            if s1.path_pos.max(pos) - EPS <= intersection && intersection <= EPS + s2.path_pos.min(front.path_pos) {
                let intersection_vel = s1.path_vel + start_slope * (intersection - s1.path_pos);
                self.profile.truncate(start2);
                self.profile.push(PhaseStep::new(intersection, intersection_vel));
                self.profile.extend(branch.into_iter().rev());
                return Ok(true);
            }
        }

        tracing::error!("Error while integrating backward: did not hit the forward profile");
        branch.reverse();
        self.end_profile = branch;
        Ok(false)
    }

    /// Braking branch into the goal, integrated backward from `(length, 0)`
    /// for as long as it stays under both limit curves.
    fn integrate_goal_branch(&mut self) -> Result<Vec<PhaseStep>, TrajectoryError> {
        let plane = self.plane;
        let (mut pos, mut vel) = (self.length, 0.0);
        let mut acceleration = plane.path_acceleration(pos, vel, Bound::Min);
        let mut branch = Vec::new();
        loop {
            self.count_step()?;
            branch.push(PhaseStep::new(pos, vel));
            let (new_pos, new_vel, sample_pos) = self.backward_step(pos, vel, acceleration);
            if new_pos < 0.0
                || new_vel < 0.0
                || new_vel > plane.velocity_limit(new_pos)
                || new_vel > plane.acceleration_limit(new_pos)
            {
                break;
            }
            pos = new_pos;
            vel = new_vel;
            acceleration = plane.path_acceleration(sample_pos, vel, Bound::Min);
        }
        branch.reverse();
        Ok(branch)
    }

    /// Replace whatever follows the last certified step with a braking
    /// continuation that comes to rest or reaches the path end.
    fn brake_to_rest(&mut self) -> Result<(), TrajectoryError> {
        let plane = self.plane;
        let dt = self.time_step;
        while self.profile.len() > 1 && self.last().path_pos > self.length {
            self.profile.pop();
        }

        let PhaseStep {
            path_pos: mut pos,
            path_vel: mut vel,
        } = self.last();
        while vel > 0.0 && pos < self.length {
            self.count_step()?;
            let acceleration = plane.braking_acceleration(pos, vel);
            let mut new_vel = vel + dt * acceleration;
            let mut new_pos = if new_vel <= 0.0 {
                let fraction = vel / (vel - new_vel);
                new_vel = 0.0;
                pos + fraction * dt * 0.5 * vel
            } else {
                pos + dt * 0.5 * (vel + new_vel)
            };
            if new_pos >= self.length {
                new_vel = vel + (self.length - pos) * (new_vel - vel) / (new_pos - pos);
                new_pos = self.length;
            }
            self.profile.push(PhaseStep::new(new_pos, new_vel));
            pos = new_pos;
            vel = new_vel;
        }
        tracing::debug!("Braked to rest at s={:.6} (path length {:.6})", pos, self.length);
        Ok(())
    }
}
