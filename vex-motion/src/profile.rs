//! Profile sampling
//!
//! Starting from `(0, 0, 0, 0)` the time advances by `dt` until it reaches
//! `t_total`; the final sample may overshoot by up to `dt` and always carries
//! `v = 0, a = 0`. Each new sample is classified by band (strict `<` at every
//! boundary):
//!
//! | band                                   | a    | v                       |
//! |----------------------------------------|------|-------------------------|
//! | `t < t_ramp` and entry ramp not skipped | `+a` | `a * t`                 |
//! | `t < t_from_peak`                      | `0`  | `v_peak`                |
//! | `t < t_total` and exit ramp not skipped | `-a` | `v_peak - a * (t - t_from_peak)` |
//! | `t < t_total` and exit ramp skipped    | `0`  | `v_peak`                |
//! | otherwise                              | `0`  | `0`                     |
//!
//! Position is `x[i+1] = x[i] + v[i+1] * dt`. With both ramps skipped the
//! move is a rectangle of `v_peak` over `t_total`.

use crate::error::Result;
use crate::kinematics::{Kinematics, ProfileShape, require_positive};

const MAX_PREALLOCATED: usize = 1 << 16;

/// Inputs of one move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileParams {
    /// Cruise velocity limit
    pub v_max: f64,
    /// Time to reach `v_max` from rest
    pub t_ramp: f64,
    /// Sampling period
    pub dt: f64,
    /// Distance to travel (>= 0)
    pub goal: f64,
    /// Start at cruise velocity (continuing a previous move)
    pub skip_entry_ramp: bool,
    /// Hold cruise velocity through the deceleration window; the terminal
    /// sample still stops
    pub skip_exit_ramp: bool,
}

impl ProfileParams {
    pub fn new(v_max: f64, t_ramp: f64, dt: f64, goal: f64) -> Self {
        Self {
            v_max,
            t_ramp,
            dt,
            goal,
            skip_entry_ramp: false,
            skip_exit_ramp: false,
        }
    }
}

/// One sample: time, position, velocity, acceleration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProfileSample {
    pub t: f64,
    pub x: f64,
    pub v: f64,
    pub a: f64,
}

/// A sampled move
#[derive(Debug, Clone, PartialEq)]
pub struct MotionProfile {
    kinematics: Kinematics,
    samples: Vec<ProfileSample>,
}

impl MotionProfile {
    pub fn generate(params: &ProfileParams) -> Result<Self> {
        let kinematics = Kinematics::solve(params.v_max, params.t_ramp, params.goal)?;
        let dt = require_positive("dt", params.dt)?;

        let Kinematics {
            acceleration,
            t_ramp,
            t_from_peak,
            t_total,
            v_peak,
            ..
        } = kinematics;

        let expected = (t_total / dt).ceil() as usize;
        let mut samples = Vec::with_capacity(expected.saturating_add(1).min(MAX_PREALLOCATED));
        let mut last = ProfileSample::default();
        samples.push(last);

        while last.t < t_total {
            let t = last.t + dt;
            let (a, v) = if t < t_ramp && !params.skip_entry_ramp {
                (acceleration, acceleration * t)
            } else if t < t_from_peak {
                (0.0, v_peak)
            } else if t < t_total {
                if params.skip_exit_ramp {
                    (0.0, v_peak)
                } else {
                    (-acceleration, v_peak - acceleration * (t - t_from_peak))
                }
            } else {
                (0.0, 0.0)
            };

            last = ProfileSample {
                t,
                x: last.x + v * dt,
                v,
                a,
            };
            samples.push(last);
        }

        log::debug!(
            "{:?} profile: goal={} t_total={:.4} v_peak={:.4}, {} samples",
            kinematics.shape,
            params.goal,
            t_total,
            v_peak,
            samples.len()
        );

        Ok(Self {
            kinematics,
            samples,
        })
    }

    pub fn samples(&self) -> &[ProfileSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<ProfileSample> {
        self.samples
    }

    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    pub fn shape(&self) -> ProfileShape {
        self.kinematics.shape
    }

    /// Time of the last sample (may exceed `t_total` by up to `dt`)
    pub fn duration(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.t)
    }

    /// Integrated position at the last sample
    pub fn final_position(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.x)
    }

    /// Highest sampled velocity
    pub fn peak_velocity(&self) -> f64 {
        self.samples.iter().map(|s| s.v).fold(0.0, f64::max)
    }

    /// Latest sample at or before `t`
    pub fn sample_at(&self, t: f64) -> Option<&ProfileSample> {
        let index = self.samples.partition_point(|s| s.t <= t);
        index.checked_sub(1).map(|i| &self.samples[i])
    }
}

/// Sample a move; see the module docs for the band rules
pub fn profile(
    v_max: f64,
    t_ramp: f64,
    dt: f64,
    goal: f64,
    skip_entry_ramp: bool,
    skip_exit_ramp: bool,
) -> Result<Vec<ProfileSample>> {
    let params = ProfileParams {
        v_max,
        t_ramp,
        dt,
        goal,
        skip_entry_ramp,
        skip_exit_ramp,
    };
    Ok(MotionProfile::generate(&params)?.into_samples())
}
