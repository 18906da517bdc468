//! Socket leg: TCP client side of the relay
//!
//! Serves one client at a time. The accepting thread reads and decodes client
//! bytes and feeds them to the serial session; a per-connection writer thread
//! drains the serial -> socket queue. A frame the writer could not send is
//! handed back and goes first to the next client.

use super::Shared;
use super::serial_leg;
use crate::error::Result;
use crate::protocol::constants::{REASON_CRC_MISMATCH, REASON_MALFORMED, REASON_REFUSED};
use crate::protocol::{ConfigFunction, DecodeEvent, Frame, FrameDecoder, FrameType};
use crate::session::Session;
use parking_lot::Mutex;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const IDLE_WRITE_INTERVAL: Duration = Duration::from_millis(5);
const READ_CHUNK_SIZE: usize = 4096;

/// Socket thread main loop - owns the TCP listener
pub(crate) fn run(shared: Arc<Shared>, listener: TcpListener, recv_timeout: Duration) -> Result<()> {
    listener.set_nonblocking(true)?;
    let mut carry_over: Option<Frame> = None;

    while !shared.flags.is_shutdown() {
        match listener.accept() {
            Ok((stream, addr)) => {
                carry_over = serve_client(&shared, stream, addr, carry_over, recv_timeout);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                log::error!("Error accepting client connection: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    log::info!("Socket leg exiting");
    Ok(())
}

fn serve_client(
    shared: &Arc<Shared>,
    mut stream: TcpStream,
    addr: SocketAddr,
    carry_over: Option<Frame>,
    recv_timeout: Duration,
) -> Option<Frame> {
    let writer_stream = match prepare_stream(&stream, recv_timeout) {
        Ok(writer_stream) => writer_stream,
        Err(e) => {
            log::warn!("Failed to set up client {}: {}", addr, e);
            return carry_over;
        }
    };

    discard_stale_serial_input(shared);

    let alive = Arc::new(AtomicBool::new(true));
    let writer = {
        let shared = Arc::clone(shared);
        let alive = Arc::clone(&alive);
        spawn_writer(
            thread::Builder::new().name("socket-writer".to_string()),
            carry_over,
            move |carry_over| write_loop(&shared, writer_stream, &alive, carry_over),
        )
    };
    let writer = match writer {
        Ok(handle) => handle,
        Err((e, carry_over)) => {
            log::error!("Failed to spawn socket writer: {}", e);
            let _ = stream.shutdown(Shutdown::Both);
            return carry_over;
        }
    };

    shared.flags.network_connected.store(true, Ordering::SeqCst);
    log::info!("Client connected: {}", addr);

    read_loop(shared, &mut stream, &alive);

    alive.store(false, Ordering::SeqCst);
    shared.flags.network_connected.store(false, Ordering::SeqCst);
    let _ = stream.shutdown(Shutdown::Both);
    log::info!("Client disconnected: {}", addr);

    match writer.join() {
        Ok(unsent) => unsent,
        Err(_) => {
            log::error!("Socket writer thread panicked");
            None
        }
    }
}

/// Start the writer thread, handing `carry_over` back if it cannot start
fn spawn_writer<F>(
    builder: thread::Builder,
    carry_over: Option<Frame>,
    write: F,
) -> std::result::Result<JoinHandle<Option<Frame>>, (io::Error, Option<Frame>)>
where
    F: FnOnce(Option<Frame>) -> Option<Frame> + Send + 'static,
{
    let slot = Arc::new(Mutex::new(carry_over));
    let first = Arc::clone(&slot);
    builder
        .spawn(move || {
            let carry_over = first.lock().take();
            write(carry_over)
        })
        .map_err(|e| (e, slot.lock().take()))
}

fn prepare_stream(stream: &TcpStream, recv_timeout: Duration) -> Result<TcpStream> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(recv_timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream.try_clone()?)
}

/// Partial serial data belongs to the previous peer
fn discard_stale_serial_input(shared: &Shared) {
    let mut input = shared.input.lock();
    if let Some(transport) = input.transport.as_mut()
        && let Err(e) = transport.clear_buffers()
    {
        log::warn!("Failed to clear serial buffers: {}", e);
    }
    input.decoder.reset();
}

fn read_loop(shared: &Shared, stream: &mut TcpStream, alive: &AtomicBool) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = [0u8; READ_CHUNK_SIZE];

    while alive.load(Ordering::SeqCst) && !shared.flags.is_shutdown() {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                for event in decoder.feed(&buffer[..n]) {
                    handle_client_event(shared, event);
                }
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                log::warn!("Client read failed: {}", e);
                break;
            }
        }
    }
}

fn write_loop(
    shared: &Shared,
    mut stream: TcpStream,
    alive: &AtomicBool,
    carry_over: Option<Frame>,
) -> Option<Frame> {
    let mut next = carry_over;
    let mut buffer = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut sent = 0u64;

    while alive.load(Ordering::SeqCst) && !shared.flags.is_shutdown() {
        let Some(frame) = next.take().or_else(|| shared.to_socket.pop()) else {
            thread::sleep(IDLE_WRITE_INTERVAL);
            continue;
        };

        buffer.clear();
        frame.encode_into(&mut buffer);
        if let Err(e) = stream.write_all(&buffer) {
            log::debug!("Client write failed: {}", e);
            alive.store(false, Ordering::SeqCst);
            return Some(frame);
        }
        sent += 1;
        log::debug!(
            "serial -> socket: {:?} frame {:#04x} ({} bytes)",
            frame.frame_type(),
            frame.frame_id(),
            frame.payload().len()
        );
    }

    log::debug!("Socket writer exiting ({} frames sent)", sent);
    next
}

fn handle_client_event(shared: &Shared, event: DecodeEvent) {
    match event {
        DecodeEvent::Frame(frame) => handle_client_frame(shared, frame),
        DecodeEvent::CrcMismatch { frame_id, .. } => {
            log::warn!("CRC mismatch on client frame {:#04x}", frame_id);
            serial_leg::forward(
                shared,
                Frame::error(frame_id, REASON_CRC_MISMATCH, &[frame_id]),
            );
        }
    }
}

fn handle_client_frame(shared: &Shared, frame: Frame) {
    let now = Instant::now();
    let mut session = shared.session.lock();

    match frame.frame_type() {
        FrameType::Data | FrameType::Command => {
            let frame_type = frame.frame_type();
            let frame_id = frame.frame_id();
            if let Err(e) = session.enqueue_relayed(frame_type, frame.into_payload(), frame_id) {
                reject(shared, frame_id, REASON_REFUSED, e);
            }
        }
        FrameType::Configuration => apply_configuration(shared, &mut session, &frame),
        other => log::debug!(
            "Ignoring {:?} frame {:#04x} from client",
            other,
            frame.frame_id()
        ),
    }

    let actions = session.poll(now);
    serial_leg::execute(shared, actions);
}

/// Apply a client CONFIGURATION frame to the serial leg
fn apply_configuration(shared: &Shared, session: &mut Session, frame: &Frame) {
    let frame_id = frame.frame_id();
    let result = match frame.config_function() {
        Some(ConfigFunction::TransmitToken) => {
            session.request_token_pass().map(|token| (token, None))
        }
        Some(ConfigFunction::SetBaudRate) => match frame.config_value() {
            Some(baud_rate) if baud_rate > 0 => session
                .set_baud_rate(baud_rate)
                .map(|f| (Some(f), Some(baud_rate))),
            _ => return reject(shared, frame_id, REASON_MALFORMED, "malformed SET_BAUD_RATE"),
        },
        Some(ConfigFunction::SetAckTimeout) => match frame.config_value() {
            Some(millis) if millis > 0 => session
                .set_ack_timeout(Duration::from_millis(millis as u64))
                .map(|f| (Some(f), None)),
            _ => return reject(shared, frame_id, REASON_MALFORMED, "malformed SET_ACK_TIMEOUT"),
        },
        None => {
            return reject(
                shared,
                frame_id,
                REASON_MALFORMED,
                "unknown configuration function",
            );
        }
    };

    match result {
        Ok((Some(config_frame), baud_rate)) => {
            serial_leg::write_frame(shared, &config_frame);
            // The frame itself goes out at the old rate
            if let Some(baud_rate) = baud_rate {
                serial_leg::apply_baud_rate(shared, baud_rate);
            }
        }
        Ok((None, _)) => log::debug!("Client token pass waits for the outstanding frame"),
        Err(e) => reject(shared, frame_id, REASON_REFUSED, e),
    }
}

/// Tell the client its frame was not taken
fn reject(shared: &Shared, frame_id: u8, reason: u8, why: impl std::fmt::Display) {
    log::warn!("Rejected client frame {:#04x}: {}", frame_id, why);
    serial_leg::forward(shared, Frame::error(frame_id, reason, &[frame_id]));
}
