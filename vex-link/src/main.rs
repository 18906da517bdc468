//! vex-bridge - relays the robot's serial user port to a TCP client
//!
//! Settings come from `vex-bridge.toml` in the working directory when
//! present, otherwise compiled defaults (listener on `0.0.0.0:10001`, USB
//! auto-discovery of the user port at 115200 baud).
//!
//! `--half-duplex` moves the listener to the alternate port `0.0.0.0:10002`.
//!
//! Exits non-zero when no robot is attached at startup.

use std::env;
use std::process::ExitCode;
use vex_link::config::BridgeConfig;
use vex_link::transport::discover_user_port;
use vex_link::{Bridge, Error, Result, SerialTransport, Transport};

fn open_serial(config: &BridgeConfig) -> Result<Box<dyn Transport>> {
    let path = match &config.serial.port {
        Some(path) => path.clone(),
        None => discover_user_port()?,
    };
    let transport = SerialTransport::open(&path, config.serial.baud_rate, config.read_timeout())?;
    Ok(Box::new(transport))
}

fn run() -> Result<()> {
    let mut config = BridgeConfig::load()?;
    if env::args().skip(1).any(|arg| arg == "--half-duplex") {
        config = config.with_half_duplex_listener();
    }

    // A missing robot at startup is fatal; later losses are retried
    let initial = open_serial(&config)?;

    let reopen_config = config.clone();
    let bridge = Bridge::bind(config, Box::new(move || open_serial(&reopen_config)))?;
    bridge.attach(initial)?;

    let flags = bridge.flags();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        flags.request_shutdown();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    bridge.run()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("vex-bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    match run() {
        Ok(()) => {
            log::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(Error::DeviceNotFound) => {
            log::error!("No VEX Robotics User Port attached");
            ExitCode::from(2)
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
