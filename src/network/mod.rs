//! P2P networking: framing, messages, handshake, connection lifecycle
//!
//! The [`ConnectionManager`] owns the single outbound connection to the
//! daemon's peer port: it connects, reconnects with backoff on loss, and
//! publishes the current `Ready` connection (or its absence) to everyone
//! else. Relay notifications (new blocks, transactions, headers) fan out
//! through broadcast channels on [`PeerEvents`].

pub mod framer;
pub mod messages;
pub mod peer;
pub mod reply;

pub use messages::Message;
pub use peer::{HandshakeState, PeerHandle};
pub use reply::ReplyMatcher;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::chain::{BlockHeader, Hash256, Transaction};
use crate::profile::NetworkProfile;

/// Relay events raised by the daemon connection.
///
/// Broadcast semantics: subscribers that lag simply miss events, which is
/// acceptable because every consumer refetches authoritative state (work
/// templates) on each event anyway.
#[derive(Clone)]
pub struct PeerEvents {
    pub new_block: broadcast::Sender<Hash256>,
    pub new_tx: broadcast::Sender<Transaction>,
    pub new_headers: broadcast::Sender<Vec<BlockHeader>>,
}

impl PeerEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            new_block: broadcast::channel(capacity).0,
            new_tx: broadcast::channel(capacity).0,
            new_headers: broadcast::channel(capacity).0,
        }
    }
}

impl Default for PeerEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Reconnect backoff bounds. The daemon link is normally local, so the
/// ceiling stays low; a lost daemon must be re-acquired quickly.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl ReconnectPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Owns the lifecycle of the single outbound daemon connection.
pub struct ConnectionManager {
    profile: Arc<NetworkProfile>,
    events: PeerEvents,
    policy: ReconnectPolicy,
    conn_tx: watch::Sender<Option<PeerHandle>>,
}

impl ConnectionManager {
    pub fn new(profile: Arc<NetworkProfile>, policy: ReconnectPolicy) -> Self {
        Self {
            profile,
            events: PeerEvents::default(),
            policy,
            conn_tx: watch::channel(None).0,
        }
    }

    pub fn events(&self) -> &PeerEvents {
        &self.events
    }

    /// The current `Ready` connection, if any. Used where waiting makes no
    /// sense, like the P2P half of block submission.
    pub fn try_connection(&self) -> Option<PeerHandle> {
        self.conn_tx.borrow().clone()
    }

    /// The current `Ready` connection, suspending the caller until one
    /// exists.
    pub async fn connection(&self) -> PeerHandle {
        let mut rx = self.conn_tx.subscribe();
        loop {
            if let Some(handle) = rx.borrow_and_update().clone() {
                return handle;
            }
            if rx.changed().await.is_err() {
                // The manager never drops before its users in practice;
                // park forever rather than fabricating a connection.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Change feed for dependents that track connection availability.
    pub fn connection_changes(&self) -> watch::Receiver<Option<PeerHandle>> {
        self.conn_tx.subscribe()
    }

    /// Connect-and-reconnect loop. Runs until the task is dropped.
    ///
    /// The backoff delay resets to the minimum whenever a handshake
    /// completes, so a flapping daemon is re-acquired promptly while a
    /// dead one is not hammered.
    pub async fn run(&self, addr: SocketAddr) {
        let mut delay = self.policy.initial_delay;
        loop {
            info!(%addr, "connecting to daemon");
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let handshaken = Arc::new(std::sync::atomic::AtomicBool::new(false));
                    let result = peer::Peer::run(
                        stream,
                        Arc::clone(&self.profile),
                        self.events.clone(),
                        {
                            let conn_tx = self.conn_tx.clone();
                            let handshaken = Arc::clone(&handshaken);
                            move |handle| {
                                handshaken.store(true, std::sync::atomic::Ordering::SeqCst);
                                let _ = conn_tx.send(Some(handle));
                            }
                        },
                    )
                    .await;
                    let _ = self.conn_tx.send(None);
                    if let Err(e) = result {
                        warn!("daemon connection failed: {e:#}");
                    }
                    if handshaken.load(std::sync::atomic::Ordering::SeqCst) {
                        delay = self.policy.initial_delay;
                    } else {
                        delay = self.policy.next_delay(delay);
                    }
                }
                Err(e) => {
                    warn!(%addr, "daemon connect failed: {e}");
                    delay = self.policy.next_delay(delay);
                }
            }
            debug!(?delay, "reconnecting after delay");
            tokio::time::sleep(delay).await;
        }
    }
}
