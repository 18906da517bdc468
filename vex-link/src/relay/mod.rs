//! TCP relay between the robot's serial link and one TCP client
//!
//! ```text
//!  robot ──serial──▶ serial-leg ──ArrayQueue──▶ socket-writer ──TCP──▶ client
//!  robot ◀─serial── (session) ◀──────────────── socket-leg ◀───TCP─── client
//! ```
//!
//! Each direction carries decoded frames, never raw bytes, so framing damage
//! on one leg cannot leak into the other. The serial leg runs the session
//! machine (ACKs, retransmission, token); the TCP side is a plain framed
//! stream with no acknowledgements.
//!
//! Either leg may drop and come back independently. The serial leg is
//! re-opened every reconnect interval; the socket leg goes back to accepting.

mod serial_leg;
mod socket_leg;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameDecoder};
use crate::session::{LinkState, Session};
use crate::transport::Transport;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Opens (or re-discovers) the serial link
pub type TransportOpener = Box<dyn FnMut() -> Result<Box<dyn Transport>> + Send>;

/// Connectivity and shutdown flags shared by every relay thread
#[derive(Debug, Default)]
pub struct LinkFlags {
    pub serial_connected: AtomicBool,
    pub network_connected: AtomicBool,
    pub shutdown: AtomicBool,
}

impl LinkFlags {
    pub fn is_serial_connected(&self) -> bool {
        self.serial_connected.load(Ordering::SeqCst)
    }

    pub fn is_network_connected(&self) -> bool {
        self.network_connected.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Ask every relay thread to exit at its next I/O boundary
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Read half of the serial link plus its decoder
pub(crate) struct SerialInput {
    transport: Option<Box<dyn Transport>>,
    decoder: FrameDecoder,
}

/// State shared between the relay threads
///
/// Lock order: `session` before `writer`. `input` is only ever held alone.
pub(crate) struct Shared {
    flags: Arc<LinkFlags>,
    session: Mutex<Session>,
    input: Mutex<SerialInput>,
    writer: Mutex<Option<Box<dyn Transport>>>,
    to_socket: ArrayQueue<Frame>,
}

/// A bound but not yet running bridge
pub struct Bridge {
    config: BridgeConfig,
    listener: TcpListener,
    shared: Arc<Shared>,
    opener: TransportOpener,
}

impl Bridge {
    /// Bind the TCP listener; the serial leg is opened on demand through `opener`
    pub fn bind(config: BridgeConfig, opener: TransportOpener) -> Result<Self> {
        let listener = TcpListener::bind(&config.network.bind_address)?;
        log::info!("TCP listener bound to {}", listener.local_addr()?);

        let shared = Arc::new(Shared {
            flags: Arc::new(LinkFlags::default()),
            session: Mutex::new(Session::new(config.session_config())),
            input: Mutex::new(SerialInput {
                transport: None,
                decoder: FrameDecoder::new(),
            }),
            writer: Mutex::new(None),
            to_socket: ArrayQueue::new(config.network.queue_capacity.max(1)),
        });

        Ok(Self {
            config,
            listener,
            shared,
            opener,
        })
    }

    /// Use an already opened serial link instead of waiting for the opener
    pub fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        serial_leg::attach(&self.shared, transport)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn flags(&self) -> Arc<LinkFlags> {
        Arc::clone(&self.shared.flags)
    }

    /// Start the serial and socket threads
    pub fn spawn(self) -> Result<BridgeHandle> {
        let Bridge {
            config,
            listener,
            shared,
            opener,
        } = self;

        let serial_thread = {
            let shared = Arc::clone(&shared);
            let reconnect_interval = config.reconnect_interval();
            thread::Builder::new()
                .name("serial-leg".to_string())
                .spawn(move || serial_leg::run(shared, opener, reconnect_interval))?
        };

        let socket_thread = {
            let shared = Arc::clone(&shared);
            let recv_timeout = config.recv_timeout();
            thread::Builder::new()
                .name("socket-leg".to_string())
                .spawn(move || {
                    if let Err(e) = socket_leg::run(Arc::clone(&shared), listener, recv_timeout) {
                        log::error!("Socket leg error: {}", e);
                        shared.flags.request_shutdown();
                    }
                })?
        };

        Ok(BridgeHandle {
            shared,
            threads: vec![serial_thread, socket_thread],
        })
    }

    /// Run until shutdown is requested through [`Bridge::flags`]
    pub fn run(self) -> Result<()> {
        self.spawn()?.join()
    }
}

/// Running bridge
pub struct BridgeHandle {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn flags(&self) -> Arc<LinkFlags> {
        Arc::clone(&self.shared.flags)
    }

    /// Serial session state
    pub fn link_state(&self) -> LinkState {
        self.shared.session.lock().state()
    }

    /// Frames waiting for a TCP client
    pub fn queued_for_client(&self) -> usize {
        self.shared.to_socket.len()
    }

    /// Request shutdown and wait for both legs to exit
    pub fn shutdown(self) -> Result<()> {
        self.shared.flags.request_shutdown();
        self.join()
    }

    pub fn join(self) -> Result<()> {
        for handle in self.threads {
            handle
                .join()
                .map_err(|_| Error::Other("relay thread panicked".to_string()))?;
        }
        log::info!("Bridge stopped");
        Ok(())
    }
}
