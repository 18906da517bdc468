//! Session configuration, states, events and actions

use crate::protocol::constants::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE, REASON_ACK_TIMEOUT, REASON_NACK_EXHAUSTED,
};
use crate::protocol::{Frame, FrameType};
use std::time::Duration;

/// Static per-endpoint settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// This endpoint's station identifier (lower wins token contention)
    pub station_id: u8,
    /// The other endpoint's station identifier
    pub peer_station_id: u8,
    /// Initial ACK timeout
    pub ack_timeout: Duration,
    /// Initial baud rate
    pub baud_rate: u32,
    /// Whether this endpoint holds the transmit token at link start
    pub starts_with_token: bool,
    /// Outbound queue bound
    pub max_pending: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            station_id: 0,
            peer_station_id: 1,
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            baud_rate: DEFAULT_BAUD_RATE,
            starts_with_token: false,
            max_pending: 64,
        }
    }
}

/// Half-duplex endpoint state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Holds the token with nothing in flight
    HasToken,
    /// Wants to send but the peer holds the token
    AwaitingToken,
    /// Holds the token; one DATA/COMMAND frame in flight
    AwaitingAck,
    /// No token, nothing to send
    Idle,
}

/// Delivery failure for an originated frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("No ACK for frame {frame_id:#04x} after retransmission")]
    AckTimeout { frame_id: u8 },

    #[error("Frame {frame_id:#04x} NACKed after retransmission (reason {reason:#04x})")]
    NackRetriesExhausted { frame_id: u8, reason: u8 },
}

impl TransportError {
    pub fn frame_id(&self) -> u8 {
        match self {
            TransportError::AckTimeout { frame_id }
            | TransportError::NackRetriesExhausted { frame_id, .. } => *frame_id,
        }
    }

    /// Reason byte used when the failure is reported in an ERROR frame
    pub fn reason_byte(&self) -> u8 {
        match self {
            TransportError::AckTimeout { .. } => REASON_ACK_TIMEOUT,
            TransportError::NackRetriesExhausted { .. } => REASON_NACK_EXHAUSTED,
        }
    }
}

/// Things the upper layer may want to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Acknowledged { frame_id: u8 },
    Retransmitted { frame_id: u8 },
    /// An originated frame failed; `origin_id` is the tag given to
    /// [`crate::session::Session::enqueue_relayed`]
    Transport {
        error: TransportError,
        origin_id: Option<u8>,
    },
    /// CRC mismatch on a received frame
    IntegrityError { frame_id: u8 },
    /// Frame that decoded cleanly but makes no sense at this layer
    DecodeError { frame_type: FrameType, frame_id: u8 },
    TokenReceived,
    /// Lost a simultaneous-send race; the in-flight frame or queue head was dropped
    ContentionLost {
        dropped_frame_id: Option<u8>,
        origin_id: Option<u8>,
    },
    BaudRateChanged(u32),
    AckTimeoutChanged(Duration),
}

/// Output of the session machine, to be carried out in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write this frame to the link
    Transmit(Frame),
    /// Hand this received frame to the upper layer
    Deliver(Frame),
    Event(SessionEvent),
}
