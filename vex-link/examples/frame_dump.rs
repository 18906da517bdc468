//! Frame dumper for captured link traffic
//!
//! Decodes a byte capture (or a live serial port) and prints every frame and
//! integrity error.
//!
//! ```sh
//! cargo run --example frame_dump -- capture.bin
//! cargo run --example frame_dump -- --serial /dev/ttyACM1 [seconds]
//! ```

use std::env;
use std::fs;
use std::time::{Duration, Instant};
use vex_link::protocol::{DecodeEvent, FrameDecoder};
use vex_link::transport::{SerialTransport, Transport};

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_event(offset: usize, event: &DecodeEvent) {
    match event {
        DecodeEvent::Frame(frame) => println!(
            "[{:08}] {:?} id=0x{:02X} len={} : {}",
            offset,
            frame.frame_type(),
            frame.frame_id(),
            frame.payload().len(),
            hex(frame.payload())
        ),
        DecodeEvent::CrcMismatch {
            frame_type,
            frame_id,
            expected,
            actual,
        } => println!(
            "[{:08}] CRC MISMATCH {:?} id=0x{:02X} (received 0x{:04X}, calculated 0x{:04X})",
            offset, frame_type, frame_id, expected, actual
        ),
    }
}

fn dump_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    log::info!("Decoding {} bytes from {}", bytes.len(), path);

    let mut decoder = FrameDecoder::new();
    for (offset, &byte) in bytes.iter().enumerate() {
        if let Some(event) = decoder.push(byte) {
            print_event(offset, &event);
        }
    }

    let stats = decoder.stats();
    log::info!(
        "{} frames, {} CRC errors, {} bytes discarded",
        stats.frames,
        stats.crc_errors,
        stats.discarded_bytes
    );
    Ok(())
}

fn dump_serial(path: &str, seconds: u64) -> Result<(), Box<dyn std::error::Error>> {
    let mut transport = SerialTransport::open(path, 115_200, Duration::from_millis(100))?;
    transport.clear_buffers()?;
    log::info!("Capturing {} for {} seconds...", path, seconds);

    let start = Instant::now();
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; 1024];
    let mut total = 0;

    while start.elapsed() < Duration::from_secs(seconds) {
        let n = transport.read(&mut buffer)?;
        for event in decoder.feed(&buffer[..n]) {
            print_event(total, &event);
        }
        total += n;
    }

    let stats = decoder.stats();
    log::info!(
        "{} bytes, {} frames, {} CRC errors",
        total,
        stats.frames,
        stats.crc_errors
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [flag, port] if flag == "--serial" => dump_serial(port, 10),
        [flag, port, seconds] if flag == "--serial" => dump_serial(port, seconds.parse()?),
        [path] => dump_file(path),
        _ => {
            eprintln!("usage: frame_dump <capture.bin> | --serial <port> [seconds]");
            std::process::exit(2);
        }
    }
}
