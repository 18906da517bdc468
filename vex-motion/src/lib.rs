//! Motion profile generation for point-to-point moves
//!
//! A move of `goal` distance is planned as a trapezoidal velocity profile
//! (accelerate, cruise at `v_max`, decelerate) or, when the move is too short
//! to reach `v_max`, a triangular one. The profile is sampled every `dt`
//! seconds and position is integrated forward-Euler.

pub mod error;
pub mod kinematics;
pub mod profile;

pub use error::{Error, Result};
pub use kinematics::{Kinematics, ProfileShape};
pub use profile::{MotionProfile, ProfileParams, ProfileSample, profile};
