//! End-to-end relay tests: mock serial line on one side, a real loopback TCP
//! client on the other

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use vex_link::protocol::constants::{REASON_ACK_TIMEOUT, REASON_CRC_MISMATCH, REASON_REFUSED};
use vex_link::protocol::{ConfigFunction, DecodeEvent, Frame, FrameDecoder, FrameType};
use vex_link::{Bridge, BridgeConfig, BridgeHandle, LinkState, MockTransport, Transport};

const WAIT: Duration = Duration::from_secs(5);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn start_bridge(mock: &MockTransport, tweak: impl FnOnce(&mut BridgeConfig)) -> (BridgeHandle, SocketAddr) {
    let mut config = BridgeConfig::default();
    config.network.bind_address = "127.0.0.1:0".to_string();
    config.network.reconnect_interval_ms = 50;
    config.network.recv_timeout_ms = 50;
    config.session.starts_with_token = true;
    tweak(&mut config);

    let reopen = mock.clone();
    let bridge = Bridge::bind(
        config,
        Box::new(move || Ok(Box::new(reopen.clone()) as Box<dyn Transport>)),
    )
    .unwrap();
    bridge.attach(Box::new(mock.clone())).unwrap();
    let addr = bridge.local_addr().unwrap();
    (bridge.spawn().unwrap(), addr)
}

/// Robot end of the serial line
struct Robot {
    mock: MockTransport,
    decoder: FrameDecoder,
    seen: Vec<Frame>,
}

impl Robot {
    fn new(mock: &MockTransport) -> Self {
        Self {
            mock: mock.clone(),
            decoder: FrameDecoder::new(),
            seen: Vec::new(),
        }
    }

    fn send(&self, frame: &Frame) {
        self.mock.inject_read(&frame.encode());
    }

    fn poll(&mut self) {
        for event in self.decoder.feed(&self.mock.take_written()) {
            if let DecodeEvent::Frame(frame) = event {
                self.seen.push(frame);
            }
        }
    }

    fn wait_for(&mut self, mut predicate: impl FnMut(&[Frame]) -> bool) -> bool {
        wait_until(|| {
            self.poll();
            predicate(&self.seen)
        })
    }

    fn count(&self, frame_type: FrameType) -> usize {
        self.seen.iter().filter(|f| f.frame_type() == frame_type).count()
    }
}

struct Client {
    stream: TcpStream,
    decoder: FrameDecoder,
    received: Vec<Frame>,
}

impl Client {
    fn connect(addr: SocketAddr, handle: &BridgeHandle) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let flags = handle.flags();
        assert!(wait_until(|| flags.is_network_connected()));
        Self {
            stream,
            decoder: FrameDecoder::new(),
            received: Vec::new(),
        }
    }

    fn send(&mut self, frame: &Frame) {
        self.stream.write_all(&frame.encode()).unwrap();
    }

    fn recv(&mut self, count: usize) -> Vec<Frame> {
        let mut buffer = [0u8; 1024];
        let deadline = Instant::now() + WAIT;
        while self.received.len() < count && Instant::now() < deadline {
            match self.stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    for event in self.decoder.feed(&buffer[..n]) {
                        if let DecodeEvent::Frame(frame) = event {
                            self.received.push(frame);
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => panic!("client read failed: {}", e),
            }
        }
        self.received.drain(..count.min(self.received.len())).collect()
    }
}

fn data(id: u8, payload: &[u8]) -> Frame {
    Frame::data(id, payload.to_vec()).unwrap()
}

#[test]
fn test_client_reconnect_loses_no_acknowledged_frames() {
    let mock = MockTransport::new();
    let mut robot = Robot::new(&mock);
    let (handle, addr) = start_bridge(&mock, |_| {});
    let flags = handle.flags();

    let mut first = Client::connect(addr, &handle);
    robot.send(&data(0x10, b"one"));
    assert_eq!(first.recv(1), vec![data(0x10, b"one")]);
    assert!(robot.wait_for(|seen| seen.contains(&Frame::ack(0x10))));

    drop(first);
    assert!(wait_until(|| !flags.is_network_connected()));

    // Acknowledged on the serial side while no client is attached
    robot.send(&data(0x11, b"two"));
    robot.send(&data(0x12, b"three"));
    assert!(robot.wait_for(|seen| seen.contains(&Frame::ack(0x12))));
    assert!(robot.seen.contains(&Frame::ack(0x11)));

    let mut second = Client::connect(addr, &handle);
    assert_eq!(
        second.recv(2),
        vec![data(0x11, b"two"), data(0x12, b"three")]
    );

    robot.send(&data(0x13, b"four"));
    assert_eq!(second.recv(1), vec![data(0x13, b"four")]);
    assert!(mock.clear_count() >= 2);

    handle.shutdown().unwrap();
}

#[test]
fn test_client_frames_are_stop_and_wait_on_serial() {
    let mock = MockTransport::new();
    let mut robot = Robot::new(&mock);
    let (handle, addr) = start_bridge(&mock, |_| {});

    let mut client = Client::connect(addr, &handle);
    client.send(&data(0x55, b"first"));
    client.send(&data(0x56, b"second"));

    assert!(robot.wait_for(|seen| !seen.is_empty()));
    // Bridge re-sequences onto its own frame ids
    assert_eq!(robot.seen[0], data(0, b"first"));
    thread::sleep(Duration::from_millis(50));
    robot.poll();
    assert_eq!(robot.count(FrameType::Data), 1);
    assert_eq!(handle.link_state(), LinkState::AwaitingAck);

    robot.send(&Frame::ack(0));
    assert!(robot.wait_for(|seen| seen.contains(&data(1, b"second"))));
    robot.send(&Frame::ack(1));
    assert!(wait_until(|| handle.link_state() == LinkState::HasToken));

    handle.shutdown().unwrap();
}

#[test]
fn test_ack_timeout_reported_to_client() {
    let mock = MockTransport::new();
    let mut robot = Robot::new(&mock);
    let (handle, addr) = start_bridge(&mock, |config| config.session.ack_timeout_ms = 40);

    let mut client = Client::connect(addr, &handle);
    client.send(&data(0x77, b"lost"));

    // Reported under the client's id, not the serial one
    let reply = client.recv(1);
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].frame_type(), FrameType::Error);
    assert_eq!(reply[0].frame_id(), 0x77);
    assert_eq!(reply[0].payload(), &[REASON_ACK_TIMEOUT, 0x77]);

    // Original plus exactly one retransmission
    robot.poll();
    assert_eq!(robot.count(FrameType::Data), 2);

    handle.shutdown().unwrap();
}

#[test]
fn test_corrupt_robot_frame_is_nacked_not_relayed() {
    let mock = MockTransport::new();
    let mut robot = Robot::new(&mock);
    let (handle, addr) = start_bridge(&mock, |_| {});
    let mut client = Client::connect(addr, &handle);

    let mut bytes = data(0x42, b"hello").encode();
    bytes[5] ^= 0x01;
    mock.inject_read(&bytes);

    assert!(robot.wait_for(|seen| seen.contains(&Frame::nack(0x42, REASON_CRC_MISMATCH))));

    // The retransmission goes through
    robot.send(&data(0x42, b"hello"));
    assert_eq!(client.recv(1), vec![data(0x42, b"hello")]);

    handle.shutdown().unwrap();
}

#[test]
fn test_token_pass_and_return() {
    let mock = MockTransport::new();
    let mut robot = Robot::new(&mock);
    let (handle, addr) = start_bridge(&mock, |_| {});
    let mut client = Client::connect(addr, &handle);

    client.send(&Frame::configuration(0x00, ConfigFunction::TransmitToken, &[]).unwrap());
    assert!(robot.wait_for(|seen| {
        seen.iter()
            .any(|f| f.config_function() == Some(ConfigFunction::TransmitToken))
    }));
    assert!(wait_until(|| handle.link_state() == LinkState::Idle));

    // Held back until the robot returns the token
    client.send(&data(0x07, b"later"));
    assert!(wait_until(|| handle.link_state() == LinkState::AwaitingToken));
    robot.poll();
    assert_eq!(robot.count(FrameType::Data), 0);

    robot.send(&Frame::configuration(0x30, ConfigFunction::TransmitToken, &[]).unwrap());
    assert!(robot.wait_for(|seen| seen.iter().any(|f| f.payload() == b"later")));

    handle.shutdown().unwrap();
}

#[test]
fn test_token_pass_waits_for_frame_in_flight() {
    let mock = MockTransport::new();
    let mut robot = Robot::new(&mock);
    let (handle, addr) = start_bridge(&mock, |_| {});
    let mut client = Client::connect(addr, &handle);

    client.send(&data(0x20, b"first"));
    assert!(robot.wait_for(|seen| seen.contains(&data(0, b"first"))));

    client.send(&Frame::configuration(0x21, ConfigFunction::TransmitToken, &[]).unwrap());
    thread::sleep(Duration::from_millis(50));
    robot.poll();
    assert_eq!(robot.count(FrameType::Configuration), 0);
    assert_eq!(handle.link_state(), LinkState::AwaitingAck);

    robot.send(&Frame::ack(0));
    assert!(robot.wait_for(|seen| {
        seen.iter()
            .any(|f| f.config_function() == Some(ConfigFunction::TransmitToken))
    }));
    assert!(wait_until(|| handle.link_state() == LinkState::Idle));

    // Nothing to pass any more
    client.send(&Frame::configuration(0x22, ConfigFunction::TransmitToken, &[]).unwrap());
    let reply = client.recv(1);
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].frame_type(), FrameType::Error);
    assert_eq!(reply[0].frame_id(), 0x22);
    assert_eq!(reply[0].payload(), &[REASON_REFUSED, 0x22]);

    handle.shutdown().unwrap();
}

#[test]
fn test_client_baud_rate_change() {
    let mock = MockTransport::new();
    let mut robot = Robot::new(&mock);
    let (handle, addr) = start_bridge(&mock, |_| {});
    let mut client = Client::connect(addr, &handle);
    assert_eq!(mock.baud_rate(), Some(115_200));

    let request =
        Frame::configuration(0x02, ConfigFunction::SetBaudRate, &57_600u32.to_be_bytes()).unwrap();
    client.send(&request);

    assert!(robot.wait_for(|seen| seen.iter().any(|f| f.config_value() == Some(57_600))));
    assert!(wait_until(|| mock.baud_rate() == Some(57_600)));

    handle.shutdown().unwrap();
}

#[test]
fn test_serial_leg_recovers_while_client_stays() {
    let mock = MockTransport::new();
    let (handle, addr) = start_bridge(&mock, |_| {});
    let flags = handle.flags();
    let mut client = Client::connect(addr, &handle);

    mock.set_disconnected(true);
    assert!(wait_until(|| !flags.is_serial_connected()));
    assert!(flags.is_network_connected());

    mock.set_disconnected(false);
    assert!(wait_until(|| flags.is_serial_connected()));

    let robot = Robot::new(&mock);
    robot.send(&data(0x21, b"back"));
    assert_eq!(client.recv(1), vec![data(0x21, b"back")]);

    handle.shutdown().unwrap();
}
