//! UDP receiver for spike and initialisation messages
//!
//! Binds a UDP socket and runs a blocking receive loop on its own thread.
//! Each datagram is decoded and dispatched: performance messages become
//! trigger events on the [`channel`](crate::channel), initialisation
//! messages drive the [`handshake`](crate::handshake).
//!
//! Delivery is best-effort. Nothing is acknowledged, malformed datagrams
//! are dropped and counted, a full trigger queue drops the event.

use crate::channel::TriggerSender;
use crate::config::NetworkConfig;
use crate::handshake::{Handshake, HandshakeOutcome, HandshakeState};
use crate::protocol::{self, DecodeError, Message};
use crate::table::TableWriter;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Largest datagram the receive loop accepts
const MAX_DATAGRAM: usize = 65_536;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to configure UDP socket: {0}")]
    Socket(#[from] io::Error),

    #[error("failed to spawn receiver thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Diagnostic counters, updated by the receive thread
#[derive(Debug, Default)]
pub struct ReceiverStats {
    datagrams: AtomicU64,
    triggers_queued: AtomicU64,
    triggers_dropped: AtomicU64,
    decode_errors: AtomicU64,
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_aborted: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams: u64,
    pub triggers_queued: u64,
    pub triggers_dropped: u64,
    pub decode_errors: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
}

impl ReceiverStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            triggers_queued: self.triggers_queued.load(Ordering::Relaxed),
            triggers_dropped: self.triggers_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Routes decoded datagrams to the trigger queue and the handshake.
///
/// Independent of the socket so it can be driven directly.
pub struct Dispatcher {
    triggers: TriggerSender,
    handshake: Handshake,
    stats: Arc<ReceiverStats>,
}

impl Dispatcher {
    pub fn new(triggers: TriggerSender, writer: TableWriter, tolerated_loss: usize) -> Self {
        Self {
            triggers,
            handshake: Handshake::new(writer, tolerated_loss),
            stats: Arc::new(ReceiverStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<ReceiverStats> {
        &self.stats
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Decode and act on one datagram
    pub fn handle_datagram(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        ReceiverStats::bump(&self.stats.datagrams);

        let message = match protocol::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                let n = ReceiverStats::bump(&self.stats.decode_errors);
                if n <= 10 || n % 1000 == 0 {
                    warn!("Dropping datagram ({} decode errors so far): {}", n, e);
                }
                return Err(e);
            }
        };

        match message {
            Message::Performance { index } => {
                trace!("Spike {}", index);
                if self.triggers.push(index) {
                    ReceiverStats::bump(&self.stats.triggers_queued);
                } else {
                    ReceiverStats::bump(&self.stats.triggers_dropped);
                }
            }
            init => {
                let sessions = self.handshake.sessions();
                let outcome = self.handshake.handle(init);
                // Implicit starts can complete in the same datagram
                if self.handshake.sessions() > sessions {
                    ReceiverStats::bump(&self.stats.sessions_started);
                }
                match outcome {
                    HandshakeOutcome::Completed { .. } => {
                        ReceiverStats::bump(&self.stats.sessions_completed);
                    }
                    HandshakeOutcome::Aborted(_) => {
                        ReceiverStats::bump(&self.stats.sessions_aborted);
                    }
                    HandshakeOutcome::Started
                    | HandshakeOutcome::Restarted { .. }
                    | HandshakeOutcome::Progress { .. }
                    | HandshakeOutcome::Ignored => {}
                }
            }
        }
        Ok(())
    }
}

/// Owns the UDP socket and the receive thread
pub struct NetworkReceiver {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    stats: Arc<ReceiverStats>,
    waker: Option<UdpSocket>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkReceiver {
    /// Bind to `config.bind_addr:config.port` and start receiving.
    ///
    /// Port 0 binds an ephemeral port, see [`local_addr`](Self::local_addr).
    pub fn start(
        config: &NetworkConfig,
        triggers: TriggerSender,
        writer: TableWriter,
    ) -> Result<Self, ReceiverError> {
        let addr = SocketAddr::new(config.bind_addr, config.port);
        let socket = UdpSocket::bind(addr).map_err(|source| ReceiverError::Bind { addr, source })?;
        socket.set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms.max(1))))?;
        let local_addr = socket.local_addr()?;
        let waker = socket.try_clone()?;

        let dispatcher = Dispatcher::new(triggers, writer, config.tolerated_loss);
        let stats = dispatcher.stats().clone();
        let running = Arc::new(AtomicBool::new(true));

        let thread = thread::Builder::new()
            .name("spikeweb-udp".to_string())
            .spawn({
                let running = running.clone();
                move || receive_loop(socket, running, dispatcher)
            })
            .map_err(ReceiverError::Spawn)?;

        info!("📡 UDP receiver listening on {}", local_addr);

        Ok(Self {
            local_addr,
            running,
            stats,
            waker: Some(waker),
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &Arc<ReceiverStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the receive thread and wait for it. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(waker) = self.waker.take() {
            // Unblock a recv_from parked on the socket; the read timeout
            // covers the case where this datagram is lost.
            if let Err(e) = waker.send_to(&[], wake_addr(self.local_addr)) {
                debug!("Wake datagram failed: {}", e);
            }
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("UDP receiver thread panicked");
            }
        }
    }
}

impl Drop for NetworkReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(socket: UdpSocket, running: Arc<AtomicBool>, mut dispatcher: Dispatcher) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((0, _)) => continue,
            Ok((size, _addr)) => {
                // Errors are counted and logged by the dispatcher
                let _ = dispatcher.handle_datagram(&buf[..size]);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                continue
            }
            Err(e) => {
                error!("UDP socket error: {}", e);
                break;
            }
        }
    }

    running.store(false, Ordering::Release);
    info!("UDP receiver stopped");
}

/// Loopback address reaching a socket bound to `local`
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}
