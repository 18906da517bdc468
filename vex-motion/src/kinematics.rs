//! Derived constants of a profile

use crate::error::{Error, Result};

/// Velocity profile geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileShape {
    /// Move too short to reach `v_max`: accelerate then decelerate
    Triangular,
    /// Accelerate, cruise at `v_max`, decelerate
    Trapezoidal,
}

/// Band boundaries and peak velocity for one move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    /// Acceleration magnitude (v_max / t_ramp)
    pub acceleration: f64,
    /// End of the entry ramp
    pub t_ramp: f64,
    /// Start of the exit ramp
    pub t_from_peak: f64,
    /// End of the move
    pub t_total: f64,
    /// Cruise velocity (v_max, or lower for a triangular move)
    pub v_peak: f64,
    pub shape: ProfileShape,
}

pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidArgument { name, value })
    }
}

pub(crate) fn require_non_negative(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidArgument { name, value })
    }
}

impl Kinematics {
    /// Solve the profile geometry for a move of `goal` distance
    ///
    /// Triangular when `v_max * t_ramp > goal`: the ramp is shortened to
    /// `sqrt(goal / a)` and the peak drops to `a * t_ramp'`.
    pub fn solve(v_max: f64, t_ramp: f64, goal: f64) -> Result<Self> {
        let v_max = require_positive("v_max", v_max)?;
        let t_ramp = require_positive("t_ramp", t_ramp)?;
        let goal = require_non_negative("goal", goal)?;

        let acceleration = v_max / t_ramp;

        if v_max * t_ramp > goal {
            let t_ramp = (goal / acceleration).sqrt();
            return Ok(Self {
                acceleration,
                t_ramp,
                t_from_peak: t_ramp,
                t_total: 2.0 * t_ramp,
                v_peak: acceleration * t_ramp,
                shape: ProfileShape::Triangular,
            });
        }

        let t_cruise = goal / v_max - t_ramp;
        let t_from_peak = t_ramp + t_cruise;
        Ok(Self {
            acceleration,
            t_ramp,
            t_from_peak,
            t_total: t_from_peak + t_ramp,
            v_peak: v_max,
            shape: ProfileShape::Trapezoidal,
        })
    }

    /// Cruise duration (zero for a triangular move)
    pub fn t_cruise(&self) -> f64 {
        self.t_from_peak - self.t_ramp
    }
}
