//! Print a motion profile as CSV (`t,x,v,a`)
//!
//! ```sh
//! cargo run -p vex-motion --example profile_csv -- 2.0 1.0 0.05 10.0 [--skip-entry] [--skip-exit]
//! ```

use std::env;
use vex_motion::{MotionProfile, ProfileParams};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    let numbers: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    if numbers.len() != 4 {
        eprintln!("usage: profile_csv <v_max> <t_ramp> <dt> <goal> [--skip-entry] [--skip-exit]");
        std::process::exit(2);
    }

    let params = ProfileParams {
        v_max: numbers[0].parse()?,
        t_ramp: numbers[1].parse()?,
        dt: numbers[2].parse()?,
        goal: numbers[3].parse()?,
        skip_entry_ramp: args.iter().any(|a| a == "--skip-entry"),
        skip_exit_ramp: args.iter().any(|a| a == "--skip-exit"),
    };

    let profile = MotionProfile::generate(&params)?;
    eprintln!(
        "# {:?}, t_total={:.4}, v_peak={:.4}, final x={:.4}",
        profile.shape(),
        profile.kinematics().t_total,
        profile.kinematics().v_peak,
        profile.final_position()
    );

    println!("t,x,v,a");
    for s in profile.samples() {
        println!("{:.6},{:.6},{:.6},{:.6}", s.t, s.x, s.v, s.a);
    }
    Ok(())
}
