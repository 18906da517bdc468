//! Serial leg: robot side of the relay
//!
//! One thread owns the read half: it decodes bytes from the robot, runs them
//! through the session machine and forwards delivered frames toward the TCP
//! client. The write half sits behind its own lock because the socket leg
//! also transmits (client traffic, token passes).

use super::{Shared, TransportOpener};
use crate::error::{Error, Result};
use crate::protocol::constants::REASON_REFUSED;
use crate::protocol::{DecodeEvent, Frame};
use crate::session::{SessionAction, SessionEvent};
use crate::transport::Transport;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

const READ_CHUNK_SIZE: usize = 1024;

/// Install a freshly opened link as both halves
pub(crate) fn attach(shared: &Shared, mut transport: Box<dyn Transport>) -> Result<()> {
    let baud_rate = {
        let mut session = shared.session.lock();
        // A re-opened robot may number its frames from scratch
        session.reset_peer_state();
        session.baud_rate()
    };
    transport.set_baud_rate(baud_rate)?;
    let writer = transport.try_clone_box()?;

    {
        let mut input = shared.input.lock();
        input.transport = Some(transport);
        input.decoder.reset();
    }
    *shared.writer.lock() = Some(writer);
    shared.flags.serial_connected.store(true, Ordering::SeqCst);
    log::info!("Serial leg connected");
    Ok(())
}

fn detach(shared: &Shared, error: &Error) {
    log::warn!("Serial leg lost: {}", error);
    shared.flags.serial_connected.store(false, Ordering::SeqCst);
    shared.input.lock().transport = None;
    *shared.writer.lock() = None;
}

/// Serial thread main loop
pub(crate) fn run(shared: Arc<Shared>, mut opener: TransportOpener, reconnect_interval: Duration) {
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];

    while !shared.flags.is_shutdown() {
        if !shared.flags.is_serial_connected() {
            reconnect(&shared, &mut opener, reconnect_interval);
            continue;
        }

        let events = match read_events(&shared, &mut buffer) {
            Ok(events) => events,
            Err(e) => {
                detach(&shared, &e);
                thread::sleep(reconnect_interval);
                continue;
            }
        };

        let now = Instant::now();
        let mut session = shared.session.lock();
        for event in events {
            let actions = session.handle_decode_event(event, now);
            execute(&shared, actions);
        }
        let actions = session.poll(now);
        execute(&shared, actions);
    }

    shared.input.lock().transport = None;
    *shared.writer.lock() = None;
    log::info!("Serial leg exiting");
}

fn reconnect(shared: &Shared, opener: &mut TransportOpener, reconnect_interval: Duration) {
    // Drop any half left behind by a failed write
    shared.input.lock().transport = None;
    *shared.writer.lock() = None;

    match opener().and_then(|transport| attach(shared, transport)) {
        Ok(()) => {}
        Err(e) => {
            log::debug!("Serial reconnect failed: {}", e);
            thread::sleep(reconnect_interval);
        }
    }
}

/// One blocking read (bounded by the port timeout) through the decoder
fn read_events(shared: &Shared, buffer: &mut [u8]) -> Result<Vec<DecodeEvent>> {
    let mut input = shared.input.lock();
    let input = &mut *input;
    let Some(transport) = input.transport.as_mut() else {
        return Err(Error::Disconnected("serial read half"));
    };
    let n = transport.read(buffer)?;
    Ok(input.decoder.feed(&buffer[..n]))
}

/// Carry out session actions in order
///
/// Called with the session lock held so transmissions keep session order.
pub(crate) fn execute(shared: &Shared, actions: Vec<SessionAction>) {
    for action in actions {
        match action {
            SessionAction::Transmit(frame) => write_frame(shared, &frame),
            SessionAction::Deliver(frame) => forward(shared, frame),
            SessionAction::Event(event) => on_event(shared, event),
        }
    }
}

fn on_event(shared: &Shared, event: SessionEvent) {
    match event {
        SessionEvent::Transport { error, origin_id } => {
            log::warn!("Serial transport error: {}", error);
            // Client frames are reported under the id the client gave them
            let frame_id = origin_id.unwrap_or_else(|| error.frame_id());
            forward(shared, Frame::error(frame_id, error.reason_byte(), &[frame_id]));
        }
        SessionEvent::ContentionLost {
            dropped_frame_id,
            origin_id,
        } => {
            log::warn!("Robot took the token, dropped frame {:?}", dropped_frame_id);
            if let Some(frame_id) = origin_id {
                forward(shared, Frame::error(frame_id, REASON_REFUSED, &[frame_id]));
            }
        }
        SessionEvent::BaudRateChanged(baud_rate) => apply_baud_rate(shared, baud_rate),
        SessionEvent::IntegrityError { frame_id } => {
            log::warn!("CRC mismatch on serial frame {:#04x}", frame_id);
        }
        other => log::debug!("Serial session: {:?}", other),
    }
}

/// Write one frame to the robot; a failed write takes the serial leg down
pub(crate) fn write_frame(shared: &Shared, frame: &Frame) {
    let mut writer = shared.writer.lock();
    let Some(transport) = writer.as_mut() else {
        log::debug!(
            "Serial leg down, dropping {:?} frame {:#04x}",
            frame.frame_type(),
            frame.frame_id()
        );
        return;
    };

    match transport.write_all(&frame.encode()) {
        Ok(()) => log::debug!(
            "socket -> serial: {:?} frame {:#04x} ({} bytes)",
            frame.frame_type(),
            frame.frame_id(),
            frame.payload().len()
        ),
        Err(e) => {
            log::warn!("Serial write failed: {}", e);
            *writer = None;
            shared.flags.serial_connected.store(false, Ordering::SeqCst);
        }
    }
}

pub(crate) fn apply_baud_rate(shared: &Shared, baud_rate: u32) {
    if let Some(transport) = shared.writer.lock().as_mut()
        && let Err(e) = transport.set_baud_rate(baud_rate)
    {
        log::warn!("Failed to apply baud rate {}: {}", baud_rate, e);
    }
}

/// Queue a frame for the TCP client, dropping the oldest when full
pub(crate) fn forward(shared: &Shared, frame: Frame) {
    log::debug!(
        "serial -> socket: queued {:?} frame {:#04x}",
        frame.frame_type(),
        frame.frame_id()
    );
    if let Some(dropped) = shared.to_socket.force_push(frame) {
        log::warn!(
            "Client queue full ({}), dropped {:?} frame {:#04x}",
            shared.to_socket.capacity(),
            dropped.frame_type(),
            dropped.frame_id()
        );
    }
}

