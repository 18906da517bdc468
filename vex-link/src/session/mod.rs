//! Half-duplex session machine
//!
//! One `Session` per endpoint. The machine is pure: it never touches I/O and
//! takes the current time as an argument, returning the [`SessionAction`]s the
//! caller must perform in order. The relay wraps it in a mutex because ACKs
//! (serial thread) race with outbound sends (socket thread).
//!
//! # Rules
//!
//! - Only the token holder originates DATA/COMMAND frames, one at a time
//!   (stop-and-wait).
//! - NACK: one retransmission under the same id, a second NACK fails the frame.
//! - ACK timeout: one retransmission, a second timeout fails the frame.
//! - Control frames (ACK, NACK, ERROR, CONFIGURATION) are never acknowledged.
//! - Simultaneous senders: the lower station id keeps the token, the other
//!   drops its queue head and waits for the token.
//! - A token pass requested mid-exchange goes out once the outstanding frame
//!   is resolved, ahead of any queued frame.

mod types;

pub use types::{LinkState, SessionAction, SessionConfig, SessionEvent, TransportError};

use crate::error::{Error, Result};
use crate::protocol::constants::REASON_CRC_MISMATCH;
use crate::protocol::{ConfigFunction, DecodeEvent, Frame, FrameType};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A frame waiting for the token, tagged with the caller's own id
#[derive(Debug, Clone)]
struct Queued {
    frame: Frame,
    origin_id: Option<u8>,
}

/// The single frame awaiting acknowledgement
#[derive(Debug, Clone)]
struct Outstanding {
    frame: Frame,
    origin_id: Option<u8>,
    sent_at: Instant,
    nack_retries: u8,
    timeout_retries: u8,
}

pub struct Session {
    config: SessionConfig,
    state: LinkState,
    holds_token: bool,
    baud_rate: u32,
    ack_timeout: Duration,
    next_frame_id: u8,
    outstanding: Option<Outstanding>,
    pending: VecDeque<Queued>,
    last_delivered: Option<u8>,
    token_pass_requested: bool,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let holds_token = config.starts_with_token;
        log::debug!(
            "Session: station {} (peer {}), token={}, ack_timeout={:?}",
            config.station_id,
            config.peer_station_id,
            holds_token,
            config.ack_timeout
        );
        Self {
            state: if holds_token {
                LinkState::HasToken
            } else {
                LinkState::Idle
            },
            holds_token,
            baud_rate: config.baud_rate,
            ack_timeout: config.ack_timeout,
            next_frame_id: 0,
            outstanding: None,
            pending: VecDeque::with_capacity(config.max_pending),
            last_delivered: None,
            token_pass_requested: false,
            config,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn holds_token(&self) -> bool {
        self.holds_token
    }

    pub fn station_id(&self) -> u8 {
        self.config.station_id
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Id of the frame awaiting acknowledgement
    pub fn outstanding_id(&self) -> Option<u8> {
        self.outstanding.as_ref().map(|o| o.frame.frame_id())
    }

    /// Frames queued but not yet sent
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// True while a token pass waits for the outstanding frame
    pub fn token_pass_pending(&self) -> bool {
        self.token_pass_requested
    }

    /// Forget the peer's last delivered id
    ///
    /// For a fresh link (re-attach, peer restart) whose ids start over.
    pub fn reset_peer_state(&mut self) {
        self.last_delivered = None;
    }

    /// Drop every queued frame that has not been sent yet
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        if !self.holds_token && self.state == LinkState::AwaitingToken {
            self.state = LinkState::Idle;
        }
        dropped
    }

    /// Queue a DATA or COMMAND payload; it is sent by [`Session::poll`] once
    /// the token is held and nothing is outstanding
    pub fn enqueue(&mut self, frame_type: FrameType, payload: Vec<u8>) -> Result<()> {
        self.push_pending(frame_type, payload, None)
    }

    /// Like [`Session::enqueue`], for a frame relayed from another link
    ///
    /// `origin_id` is the frame's id on that link. It comes back in the
    /// failure events for this frame, since the id on this link is only
    /// assigned at transmission.
    pub fn enqueue_relayed(
        &mut self,
        frame_type: FrameType,
        payload: Vec<u8>,
        origin_id: u8,
    ) -> Result<()> {
        self.push_pending(frame_type, payload, Some(origin_id))
    }

    fn push_pending(
        &mut self,
        frame_type: FrameType,
        payload: Vec<u8>,
        origin_id: Option<u8>,
    ) -> Result<()> {
        if !frame_type.requires_ack() {
            return Err(Error::NotOriginatable(frame_type));
        }
        if self.pending.len() >= self.config.max_pending {
            return Err(Error::QueueFull(self.config.max_pending));
        }
        // Real id is assigned at transmission
        let frame = Frame::new(frame_type, 0, payload)?;
        self.pending.push_back(Queued { frame, origin_id });
        if !self.holds_token {
            self.state = LinkState::AwaitingToken;
        }
        Ok(())
    }

    /// Timer and queue servicing; call regularly
    pub fn poll(&mut self, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.check_ack_timeout(now, &mut actions);
        self.transmit_next(now, &mut actions);
        actions
    }

    /// Process one decoder outcome from the link
    pub fn handle_decode_event(&mut self, event: DecodeEvent, now: Instant) -> Vec<SessionAction> {
        match event {
            DecodeEvent::Frame(frame) => self.handle_frame(frame, now),
            DecodeEvent::CrcMismatch {
                frame_type,
                frame_id,
                ..
            } => {
                let mut actions = Vec::with_capacity(2);
                // Only acknowledged traffic gets a NACK; a lost control frame
                // is recovered by the sender's timeout
                if frame_type.requires_ack() {
                    actions.push(SessionAction::Transmit(Frame::nack(
                        frame_id,
                        REASON_CRC_MISMATCH,
                    )));
                }
                actions.push(SessionAction::Event(SessionEvent::IntegrityError {
                    frame_id,
                }));
                actions
            }
        }
    }

    /// Process one verified frame from the link
    pub fn handle_frame(&mut self, frame: Frame, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match frame.frame_type() {
            FrameType::Data | FrameType::Command => self.on_peer_frame(frame, &mut actions),
            FrameType::Ack => self.on_ack(&frame, &mut actions),
            FrameType::Nack => self.on_nack(&frame, now, &mut actions),
            FrameType::Configuration => self.on_configuration(&frame, &mut actions),
            FrameType::Error => {
                log::warn!(
                    "Peer reported error {:#04x} (frame {:#04x})",
                    frame.error_reason().unwrap_or(0),
                    frame.frame_id()
                );
                actions.push(SessionAction::Deliver(frame));
            }
            FrameType::Reserved(_) => Self::decode_error(&frame, &mut actions),
        }
        self.transmit_next(now, &mut actions);
        actions
    }

    /// Hand the transmit token to the peer
    ///
    /// Refused while a frame is outstanding so no DATA/COMMAND frame from this
    /// side can follow the token on the wire.
    pub fn pass_token(&mut self) -> Result<Frame> {
        if !self.holds_token {
            return Err(Error::TokenNotHeld);
        }
        if let Some(id) = self.outstanding_id() {
            return Err(Error::FrameOutstanding(id));
        }
        let frame = Frame::configuration(self.allocate_id(), ConfigFunction::TransmitToken, &[])?;
        self.holds_token = false;
        self.token_pass_requested = false;
        // The peer's ids during its turn are unrelated to the last one we took
        self.last_delivered = None;
        self.state = if self.pending.is_empty() {
            LinkState::Idle
        } else {
            LinkState::AwaitingToken
        };
        log::debug!("Transmit token passed to station {}", self.config.peer_station_id);
        Ok(frame)
    }

    /// Pass the token now, or as soon as the outstanding frame is resolved
    ///
    /// Returns the TRANSMIT_TOKEN frame when it can go out immediately. A
    /// deferred pass is emitted later as a [`SessionAction::Transmit`] from
    /// [`Session::poll`] or [`Session::handle_frame`].
    pub fn request_token_pass(&mut self) -> Result<Option<Frame>> {
        if !self.holds_token {
            return Err(Error::TokenNotHeld);
        }
        if let Some(id) = self.outstanding_id() {
            log::debug!("Token pass deferred until frame {:#04x} resolves", id);
            self.token_pass_requested = true;
            return Ok(None);
        }
        self.pass_token().map(Some)
    }

    /// Build a SET_BAUD_RATE frame and adopt the new rate locally
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<Frame> {
        if !self.holds_token {
            return Err(Error::TokenNotHeld);
        }
        let frame = Frame::configuration(
            self.allocate_id(),
            ConfigFunction::SetBaudRate,
            &baud_rate.to_be_bytes(),
        )?;
        self.baud_rate = baud_rate;
        Ok(frame)
    }

    /// Build a SET_ACK_TIMEOUT frame and adopt the new timeout locally
    pub fn set_ack_timeout(&mut self, timeout: Duration) -> Result<Frame> {
        if !self.holds_token {
            return Err(Error::TokenNotHeld);
        }
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let frame = Frame::configuration(
            self.allocate_id(),
            ConfigFunction::SetAckTimeout,
            &millis.to_be_bytes(),
        )?;
        self.ack_timeout = Duration::from_millis(millis as u64);
        Ok(frame)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn allocate_id(&mut self) -> u8 {
        let id = self.next_frame_id;
        self.next_frame_id = id.wrapping_add(1);
        id
    }

    /// State after the outstanding frame is resolved
    fn settle(&mut self) {
        self.state = if self.holds_token {
            LinkState::HasToken
        } else if self.pending.is_empty() {
            LinkState::Idle
        } else {
            LinkState::AwaitingToken
        };
    }

    fn transmit_next(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        if !self.holds_token || self.outstanding.is_some() {
            return;
        }
        if self.token_pass_requested {
            match self.pass_token() {
                Ok(token) => actions.push(SessionAction::Transmit(token)),
                Err(e) => log::warn!("Deferred token pass failed: {}", e),
            }
            return;
        }
        let Some(Queued { frame, origin_id }) = self.pending.pop_front() else {
            return;
        };
        let frame = frame.with_id(self.allocate_id());
        log::debug!(
            "Sending {:?} frame {:#04x} ({} bytes)",
            frame.frame_type(),
            frame.frame_id(),
            frame.payload().len()
        );
        self.outstanding = Some(Outstanding {
            frame: frame.clone(),
            origin_id,
            sent_at: now,
            nack_retries: 0,
            timeout_retries: 0,
        });
        self.state = LinkState::AwaitingAck;
        actions.push(SessionAction::Transmit(frame));
    }

    fn check_ack_timeout(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        let Some(outstanding) = self.outstanding.as_mut() else {
            return;
        };
        if now.saturating_duration_since(outstanding.sent_at) < self.ack_timeout {
            return;
        }

        let frame_id = outstanding.frame.frame_id();
        if outstanding.timeout_retries == 0 {
            outstanding.timeout_retries = 1;
            outstanding.sent_at = now;
            log::warn!("ACK timeout for frame {:#04x}, retransmitting", frame_id);
            actions.push(SessionAction::Transmit(outstanding.frame.clone()));
            actions.push(SessionAction::Event(SessionEvent::Retransmitted { frame_id }));
        } else {
            let origin_id = outstanding.origin_id;
            self.outstanding = None;
            self.settle();
            let error = TransportError::AckTimeout { frame_id };
            log::warn!("{}", error);
            actions.push(SessionAction::Event(SessionEvent::Transport { error, origin_id }));
        }
    }

    fn on_peer_frame(&mut self, frame: Frame, actions: &mut Vec<SessionAction>) {
        if self.holds_token {
            if self.config.station_id < self.config.peer_station_id {
                log::warn!(
                    "Token contention: ignoring {:?} frame {:#04x} from station {}",
                    frame.frame_type(),
                    frame.frame_id(),
                    self.config.peer_station_id
                );
                return;
            }

            let (dropped_frame_id, origin_id) = match self.outstanding.take() {
                Some(outstanding) => (Some(outstanding.frame.frame_id()), outstanding.origin_id),
                None => (None, self.pending.pop_front().and_then(|q| q.origin_id)),
            };
            self.holds_token = false;
            self.token_pass_requested = false;
            self.state = LinkState::AwaitingToken;
            log::warn!(
                "Token contention lost to station {} (dropped {:?})",
                self.config.peer_station_id,
                dropped_frame_id
            );
            actions.push(SessionAction::Event(SessionEvent::ContentionLost {
                dropped_frame_id,
                origin_id,
            }));
        }

        let frame_id = frame.frame_id();
        actions.push(SessionAction::Transmit(Frame::ack(frame_id)));

        // Our previous ACK was lost and the peer retransmitted
        if self.last_delivered == Some(frame_id) {
            log::debug!("Duplicate frame {:#04x} re-acknowledged", frame_id);
            return;
        }
        self.last_delivered = Some(frame_id);
        actions.push(SessionAction::Deliver(frame));
    }

    fn on_ack(&mut self, frame: &Frame, actions: &mut Vec<SessionAction>) {
        let Some(acked) = frame.acknowledged_id() else {
            Self::decode_error(frame, actions);
            return;
        };
        if self.outstanding_id() != Some(acked) {
            log::debug!("Ignoring stale ACK for {:#04x}", acked);
            return;
        }
        self.outstanding = None;
        self.settle();
        actions.push(SessionAction::Event(SessionEvent::Acknowledged {
            frame_id: acked,
        }));
    }

    fn on_nack(&mut self, frame: &Frame, now: Instant, actions: &mut Vec<SessionAction>) {
        let Some(nacked) = frame.acknowledged_id() else {
            Self::decode_error(frame, actions);
            return;
        };
        let reason = frame.nack_reason().unwrap_or(0);
        let Some(outstanding) = self.outstanding.as_mut() else {
            log::debug!("Ignoring NACK for {:#04x}: nothing outstanding", nacked);
            return;
        };
        if outstanding.frame.frame_id() != nacked {
            log::debug!("Ignoring stale NACK for {:#04x}", nacked);
            return;
        }

        if outstanding.nack_retries == 0 {
            outstanding.nack_retries = 1;
            outstanding.sent_at = now;
            log::warn!(
                "Frame {:#04x} NACKed (reason {:#04x}), retransmitting",
                nacked,
                reason
            );
            actions.push(SessionAction::Transmit(outstanding.frame.clone()));
            actions.push(SessionAction::Event(SessionEvent::Retransmitted {
                frame_id: nacked,
            }));
        } else {
            let origin_id = outstanding.origin_id;
            self.outstanding = None;
            self.settle();
            let error = TransportError::NackRetriesExhausted {
                frame_id: nacked,
                reason,
            };
            log::warn!("{}", error);
            actions.push(SessionAction::Event(SessionEvent::Transport { error, origin_id }));
        }
    }

    fn on_configuration(&mut self, frame: &Frame, actions: &mut Vec<SessionAction>) {
        match frame.config_function() {
            Some(ConfigFunction::SetBaudRate) => match frame.config_value() {
                Some(baud_rate) if baud_rate > 0 => {
                    log::info!("Peer set baud rate to {}", baud_rate);
                    self.baud_rate = baud_rate;
                    actions.push(SessionAction::Event(SessionEvent::BaudRateChanged(
                        baud_rate,
                    )));
                }
                _ => Self::decode_error(frame, actions),
            },
            Some(ConfigFunction::SetAckTimeout) => match frame.config_value() {
                Some(millis) if millis > 0 => {
                    let timeout = Duration::from_millis(millis as u64);
                    log::info!("Peer set ACK timeout to {:?}", timeout);
                    self.ack_timeout = timeout;
                    actions.push(SessionAction::Event(SessionEvent::AckTimeoutChanged(
                        timeout,
                    )));
                }
                _ => Self::decode_error(frame, actions),
            },
            Some(ConfigFunction::TransmitToken) => {
                if self.holds_token {
                    log::warn!("Received transmit token while already holding it");
                    return;
                }
                self.holds_token = true;
                self.settle();
                log::debug!("Transmit token received");
                actions.push(SessionAction::Event(SessionEvent::TokenReceived));
            }
            None => Self::decode_error(frame, actions),
        }
    }

    fn decode_error(frame: &Frame, actions: &mut Vec<SessionAction>) {
        log::warn!(
            "Dropping malformed {:?} frame {:#04x} ({} byte payload)",
            frame.frame_type(),
            frame.frame_id(),
            frame.payload().len()
        );
        actions.push(SessionAction::Event(SessionEvent::DecodeError {
            frame_type: frame.frame_type(),
            frame_id: frame.frame_id(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::REASON_MALFORMED;

    fn holder() -> Session {
        Session::new(SessionConfig {
            starts_with_token: true,
            ..SessionConfig::default()
        })
    }

    fn transmitted(actions: &[SessionAction]) -> Vec<&Frame> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Transmit(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn events(actions: &[SessionAction]) -> Vec<&SessionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(holder().state(), LinkState::HasToken);
        let session = Session::new(SessionConfig::default());
        assert_eq!(session.state(), LinkState::Idle);
        assert!(!session.holds_token());
    }

    #[test]
    fn test_send_and_ack() {
        let now = Instant::now();
        let mut session = holder();
        session.enqueue(FrameType::Data, b"abc".to_vec()).unwrap();

        let actions = session.poll(now);
        let sent = transmitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_id(), 0);
        assert_eq!(session.state(), LinkState::AwaitingAck);

        let actions = session.handle_frame(Frame::ack(0), now);
        assert_eq!(
            events(&actions),
            vec![&SessionEvent::Acknowledged { frame_id: 0 }]
        );
        assert_eq!(session.state(), LinkState::HasToken);
        assert_eq!(session.outstanding_id(), None);
    }

    #[test]
    fn test_stop_and_wait() {
        let now = Instant::now();
        let mut session = holder();
        session.enqueue(FrameType::Data, vec![1]).unwrap();
        session.enqueue(FrameType::Command, vec![2]).unwrap();

        assert_eq!(transmitted(&session.poll(now)).len(), 1);
        // Second frame waits for the ACK
        assert!(transmitted(&session.poll(now)).is_empty());
        assert_eq!(session.pending_len(), 1);

        // The ACK releases the next frame in the same call
        let actions = session.handle_frame(Frame::ack(0), now);
        let sent = transmitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_id(), 1);
        assert_eq!(sent[0].frame_type(), FrameType::Command);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let now = Instant::now();
        let mut session = holder();
        session.enqueue(FrameType::Data, vec![1]).unwrap();
        session.poll(now);
        let actions = session.handle_frame(Frame::ack(0x77), now);
        assert!(actions.is_empty());
        assert_eq!(session.state(), LinkState::AwaitingAck);
    }

    #[test]
    fn test_nack_retransmits_once_then_fails() {
        let now = Instant::now();
        let mut session = holder();
        session.enqueue(FrameType::Data, b"x".to_vec()).unwrap();
        let first = transmitted(&session.poll(now))[0].clone();

        let actions = session.handle_frame(Frame::nack(0, REASON_CRC_MISMATCH), now);
        let resent = transmitted(&actions);
        assert_eq!(resent, vec![&first]);

        let actions = session.handle_frame(Frame::nack(0, REASON_CRC_MISMATCH), now);
        assert!(transmitted(&actions).is_empty());
        assert_eq!(
            events(&actions),
            vec![&SessionEvent::Transport {
                error: TransportError::NackRetriesExhausted {
                    frame_id: 0,
                    reason: REASON_CRC_MISMATCH
                },
                origin_id: None,
            }]
        );
        assert_eq!(session.outstanding_id(), None);
        assert_eq!(session.state(), LinkState::HasToken);
    }

    #[test]
    fn test_ack_timeout_retransmits_once_then_fails() {
        let start = Instant::now();
        let mut session = holder();
        let timeout = session.ack_timeout();
        session.enqueue(FrameType::Data, b"x".to_vec()).unwrap();
        session.poll(start);

        assert!(session.poll(start + timeout / 2).is_empty());

        let actions = session.poll(start + timeout);
        assert_eq!(transmitted(&actions).len(), 1);
        assert_eq!(transmitted(&actions)[0].frame_id(), 0);

        // Timer restarts at the retransmission
        assert!(session.poll(start + timeout + timeout / 2).is_empty());

        let actions = session.poll(start + timeout * 2);
        assert_eq!(
            events(&actions),
            vec![&SessionEvent::Transport {
                error: TransportError::AckTimeout { frame_id: 0 },
                origin_id: None,
            }]
        );
        assert_eq!(session.outstanding_id(), None);
    }

    #[test]
    fn test_receive_data_acks_and_delivers() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let frame = Frame::data(0x21, b"ping".to_vec()).unwrap();
        let actions = session.handle_frame(frame.clone(), now);
        assert_eq!(
            actions,
            vec![
                SessionAction::Transmit(Frame::ack(0x21)),
                SessionAction::Deliver(frame.clone()),
            ]
        );

        // Retransmission after a lost ACK: re-ACK, no second delivery
        let actions = session.handle_frame(frame, now);
        assert_eq!(actions, vec![SessionAction::Transmit(Frame::ack(0x21))]);
    }

    #[test]
    fn test_crc_mismatch_nacks_data_only() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());

        let actions = session.handle_decode_event(
            DecodeEvent::CrcMismatch {
                frame_type: FrameType::Data,
                frame_id: 9,
                expected: 1,
                actual: 2,
            },
            now,
        );
        assert_eq!(
            actions,
            vec![
                SessionAction::Transmit(Frame::nack(9, REASON_CRC_MISMATCH)),
                SessionAction::Event(SessionEvent::IntegrityError { frame_id: 9 }),
            ]
        );

        let actions = session.handle_decode_event(
            DecodeEvent::CrcMismatch {
                frame_type: FrameType::Ack,
                frame_id: 9,
                expected: 1,
                actual: 2,
            },
            now,
        );
        assert!(transmitted(&actions).is_empty());
    }

    #[test]
    fn test_enqueue_rejects_control_frames() {
        let mut session = holder();
        assert!(matches!(
            session.enqueue(FrameType::Ack, vec![0]),
            Err(Error::NotOriginatable(FrameType::Ack))
        ));
    }

    #[test]
    fn test_queue_bound() {
        let mut session = Session::new(SessionConfig {
            max_pending: 2,
            ..SessionConfig::default()
        });
        session.enqueue(FrameType::Data, vec![]).unwrap();
        session.enqueue(FrameType::Data, vec![]).unwrap();
        assert!(matches!(
            session.enqueue(FrameType::Data, vec![]),
            Err(Error::QueueFull(2))
        ));
        assert_eq!(session.state(), LinkState::AwaitingToken);
        assert_eq!(session.clear_pending(), 2);
        assert_eq!(session.state(), LinkState::Idle);
    }

    #[test]
    fn test_pass_token() {
        let now = Instant::now();
        let mut session = holder();
        session.enqueue(FrameType::Data, vec![1]).unwrap();
        session.poll(now);
        assert!(matches!(session.pass_token(), Err(Error::FrameOutstanding(0))));

        session.handle_frame(Frame::ack(0), now);
        let token = session.pass_token().unwrap();
        assert_eq!(token.config_function(), Some(ConfigFunction::TransmitToken));
        assert_eq!(session.state(), LinkState::Idle);
        assert!(!session.holds_token());
        assert!(matches!(session.pass_token(), Err(Error::TokenNotHeld)));

        // Queued traffic waits for the token to come back
        session.enqueue(FrameType::Data, vec![2]).unwrap();
        assert!(session.poll(now).is_empty());
        assert_eq!(session.state(), LinkState::AwaitingToken);
    }

    #[test]
    fn test_token_pass_deferred_until_ack() {
        let now = Instant::now();
        let mut session = holder();
        session.enqueue(FrameType::Data, vec![1]).unwrap();
        session.enqueue(FrameType::Data, vec![2]).unwrap();
        session.poll(now);

        assert_eq!(session.request_token_pass().unwrap(), None);
        assert!(session.token_pass_pending());
        assert!(transmitted(&session.poll(now)).is_empty());

        // The token goes out instead of the next queued frame
        let actions = session.handle_frame(Frame::ack(0), now);
        let sent = transmitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].config_function(), Some(ConfigFunction::TransmitToken));
        assert!(!session.holds_token());
        assert!(!session.token_pass_pending());
        assert_eq!(session.state(), LinkState::AwaitingToken);
        assert_eq!(session.pending_len(), 1);
    }

    #[test]
    fn test_token_pass_deferred_past_failure() {
        let start = Instant::now();
        let mut session = holder();
        let timeout = session.ack_timeout();
        session.enqueue(FrameType::Data, vec![1]).unwrap();
        session.poll(start);
        assert_eq!(session.request_token_pass().unwrap(), None);

        session.poll(start + timeout);
        let actions = session.poll(start + timeout * 2);
        assert!(matches!(
            events(&actions)[0],
            SessionEvent::Transport { .. }
        ));
        let sent = transmitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].config_function(), Some(ConfigFunction::TransmitToken));
        assert_eq!(session.state(), LinkState::Idle);
    }

    #[test]
    fn test_immediate_token_pass_request() {
        let mut session = holder();
        let token = session.request_token_pass().unwrap();
        assert!(token.is_some());
        assert!(!session.holds_token());
        assert!(matches!(
            session.request_token_pass(),
            Err(Error::TokenNotHeld)
        ));
    }

    #[test]
    fn test_relayed_frame_failure_carries_origin_id() {
        let start = Instant::now();
        let mut session = holder();
        let timeout = session.ack_timeout();
        session
            .enqueue_relayed(FrameType::Data, b"lost".to_vec(), 0x77)
            .unwrap();
        assert_eq!(transmitted(&session.poll(start))[0].frame_id(), 0);

        session.poll(start + timeout);
        let actions = session.poll(start + timeout * 2);
        assert_eq!(
            events(&actions),
            vec![&SessionEvent::Transport {
                error: TransportError::AckTimeout { frame_id: 0 },
                origin_id: Some(0x77),
            }]
        );

        session
            .enqueue_relayed(FrameType::Command, vec![1], 0x12)
            .unwrap();
        session.poll(start);
        session.handle_frame(Frame::nack(1, REASON_CRC_MISMATCH), start);
        let actions = session.handle_frame(Frame::nack(1, REASON_CRC_MISMATCH), start);
        assert!(matches!(
            events(&actions)[0],
            SessionEvent::Transport {
                origin_id: Some(0x12),
                ..
            }
        ));
    }

    #[test]
    fn test_contention_reports_dropped_origin() {
        let now = Instant::now();
        let mut loser = Session::new(SessionConfig {
            station_id: 2,
            peer_station_id: 1,
            starts_with_token: true,
            ..SessionConfig::default()
        });
        loser.enqueue_relayed(FrameType::Data, vec![1], 0x40).unwrap();
        loser.poll(now);

        let actions = loser.handle_frame(Frame::data(0x30, vec![9]).unwrap(), now);
        assert_eq!(
            events(&actions),
            vec![&SessionEvent::ContentionLost {
                dropped_frame_id: Some(0),
                origin_id: Some(0x40),
            }]
        );
    }

    #[test]
    fn test_peer_ids_restart_after_token_round_trip() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let first = Frame::data(0, b"a".to_vec()).unwrap();
        assert_eq!(transmitted(&session.handle_frame(first, now)).len(), 1);

        let token = Frame::configuration(1, ConfigFunction::TransmitToken, &[]).unwrap();
        session.handle_frame(token, now);
        session.pass_token().unwrap();

        // A restarted peer reuses id 0 for new data
        let again = Frame::data(0, b"b".to_vec()).unwrap();
        let actions = session.handle_frame(again.clone(), now);
        assert_eq!(
            actions,
            vec![
                SessionAction::Transmit(Frame::ack(0)),
                SessionAction::Deliver(again),
            ]
        );
    }

    #[test]
    fn test_reset_peer_state_forgets_last_delivered() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let frame = Frame::data(0, b"a".to_vec()).unwrap();
        session.handle_frame(frame.clone(), now);

        session.reset_peer_state();
        let actions = session.handle_frame(frame.clone(), now);
        assert!(actions.contains(&SessionAction::Deliver(frame)));
    }

    #[test]
    fn test_token_received_flushes_queue() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        session.enqueue(FrameType::Data, vec![7]).unwrap();

        let token = Frame::configuration(5, ConfigFunction::TransmitToken, &[]).unwrap();
        let actions = session.handle_frame(token, now);
        assert_eq!(events(&actions), vec![&SessionEvent::TokenReceived]);
        assert_eq!(transmitted(&actions).len(), 1);
        assert_eq!(session.state(), LinkState::AwaitingAck);
    }

    #[test]
    fn test_contention_lower_station_wins() {
        let now = Instant::now();
        let mut winner = holder();
        winner.enqueue(FrameType::Data, vec![1]).unwrap();
        winner.poll(now);

        let intruder = Frame::data(0x30, vec![9]).unwrap();
        let actions = winner.handle_frame(intruder, now);
        assert!(actions.is_empty());
        assert!(winner.holds_token());
        assert_eq!(winner.outstanding_id(), Some(0));
    }

    #[test]
    fn test_contention_higher_station_yields() {
        let now = Instant::now();
        let mut loser = Session::new(SessionConfig {
            station_id: 2,
            peer_station_id: 1,
            starts_with_token: true,
            ..SessionConfig::default()
        });
        loser.enqueue(FrameType::Data, vec![1]).unwrap();
        loser.poll(now);

        let frame = Frame::data(0x30, vec![9]).unwrap();
        let actions = loser.handle_frame(frame.clone(), now);
        assert_eq!(
            actions,
            vec![
                SessionAction::Event(SessionEvent::ContentionLost {
                    dropped_frame_id: Some(0),
                    origin_id: None,
                }),
                SessionAction::Transmit(Frame::ack(0x30)),
                SessionAction::Deliver(frame),
            ]
        );
        assert!(!loser.holds_token());
        assert_eq!(loser.state(), LinkState::AwaitingToken);
        assert_eq!(loser.outstanding_id(), None);
    }

    #[test]
    fn test_configuration_from_peer() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());

        let baud =
            Frame::configuration(1, ConfigFunction::SetBaudRate, &57_600u32.to_be_bytes())
                .unwrap();
        let actions = session.handle_frame(baud, now);
        assert_eq!(
            events(&actions),
            vec![&SessionEvent::BaudRateChanged(57_600)]
        );
        assert_eq!(session.baud_rate(), 57_600);
        // Control frames are never acknowledged
        assert!(transmitted(&actions).is_empty());

        let timeout =
            Frame::configuration(2, ConfigFunction::SetAckTimeout, &250u32.to_be_bytes())
                .unwrap();
        session.handle_frame(timeout, now);
        assert_eq!(session.ack_timeout(), Duration::from_millis(250));

        let truncated = Frame::configuration(3, ConfigFunction::SetBaudRate, &[0x01]).unwrap();
        let actions = session.handle_frame(truncated, now);
        assert!(matches!(
            events(&actions)[0],
            SessionEvent::DecodeError { .. }
        ));
    }

    #[test]
    fn test_local_configuration_requires_token() {
        let mut session = Session::new(SessionConfig::default());
        assert!(matches!(
            session.set_baud_rate(9600),
            Err(Error::TokenNotHeld)
        ));

        let mut session = holder();
        let frame = session.set_baud_rate(9600).unwrap();
        assert_eq!(frame.config_value(), Some(9600));
        assert_eq!(session.baud_rate(), 9600);

        let frame = session.set_ack_timeout(Duration::from_millis(750)).unwrap();
        assert_eq!(frame.config_value(), Some(750));
        assert_eq!(session.ack_timeout(), Duration::from_millis(750));
        assert_eq!(frame.frame_id(), 1);
    }

    #[test]
    fn test_peer_error_and_reserved_frames() {
        let now = Instant::now();
        let mut session = Session::new(SessionConfig::default());
        let error = Frame::error(4, REASON_MALFORMED, &[]);
        let actions = session.handle_frame(error.clone(), now);
        assert_eq!(actions, vec![SessionAction::Deliver(error)]);

        let reserved = Frame::new(FrameType::Reserved(0x5), 1, vec![]).unwrap();
        let actions = session.handle_frame(reserved, now);
        assert_eq!(
            actions,
            vec![SessionAction::Event(SessionEvent::DecodeError {
                frame_type: FrameType::Reserved(0x5),
                frame_id: 1
            })]
        );
    }

    #[test]
    fn test_frame_ids_wrap() {
        let now = Instant::now();
        let mut session = holder();
        for expected in (0..=255u8).chain(0..2) {
            session.enqueue(FrameType::Data, vec![]).unwrap();
            let actions = session.poll(now);
            assert_eq!(transmitted(&actions)[0].frame_id(), expected);
            session.handle_frame(Frame::ack(expected), now);
        }
    }
}
