//! Daemon peer connection and handshake state machine
//!
//! One instance per outbound connection to the daemon. Drives the
//! version/verack handshake, dispatches post-handshake messages, feeds
//! the reply matchers, and runs the periodic liveness ping. A protocol
//! violation of any kind (framing, checksum, schema) closes the
//! connection; the connection manager owns reconnecting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::framer::{FrameCodec, RawFrame};
use super::messages::{BlockLocator, InvItem, InvType, Message, NetAddress, VersionMessage};
use super::reply::ReplyMatcher;
use super::PeerEvents;
use crate::chain::{Block, BlockHeader, Hash256};
use crate::codec::WireEncode;
use crate::profile::NetworkProfile;

/// Protocol version announced in the handshake.
const PROTOCOL_VERSION: i32 = 70004;
/// Services bitfield announced in the handshake.
const SERVICES: u64 = 1;
/// Liveness probe period.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Fixed liveness probe nonce; the round trip itself is the signal.
const PING_NONCE: u64 = 1234;
/// Reply matcher resend period.
const RESEND_INTERVAL: Duration = Duration::from_secs(5);

/// Handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    VersionSent,
    AwaitingVerack,
    Ready,
    Closed,
}

/// Cloneable handle to a `Ready` connection.
///
/// Sending is fire-and-forget into the connection's write task; the block
/// and header getters go through the reply matchers and resolve when the
/// daemon relays the matching payload.
#[derive(Clone)]
pub struct PeerHandle {
    outgoing: mpsc::UnboundedSender<Message>,
    get_block: ReplyMatcher<Hash256, Block>,
    get_block_header: ReplyMatcher<Hash256, BlockHeader>,
}

impl PeerHandle {
    pub fn send(&self, message: Message) -> Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| anyhow!("daemon connection closed"))
    }

    /// Fetch a full block by hash. `None` if the connection is lost first.
    pub async fn get_block(&self, hash: Hash256) -> Option<Block> {
        self.get_block.demand(hash).await
    }

    /// Fetch a block header by hash. `None` if the connection is lost first.
    pub async fn get_block_header(&self, hash: Hash256) -> Option<BlockHeader> {
        self.get_block_header.demand(hash).await
    }
}

pub(crate) struct Peer {
    profile: Arc<NetworkProfile>,
    events: PeerEvents,
    state: HandshakeState,
    outgoing: mpsc::UnboundedSender<Message>,
    handle: Option<PeerHandle>,
    pinger: Option<JoinHandle<()>>,
}

impl Peer {
    /// Drive one connection to completion. Returns when the transport is
    /// lost or a protocol violation forces a disconnect. `on_ready` fires
    /// exactly once, when the handshake completes.
    pub(crate) async fn run(
        stream: TcpStream,
        profile: Arc<NetworkProfile>,
        events: PeerEvents,
        on_ready: impl FnOnce(PeerHandle) + Send,
    ) -> Result<()> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let codec = FrameCodec::new(profile.magic, profile.max_payload);
        let mut reader = FramedRead::new(read_half, codec.clone());
        let mut writer = FramedWrite::new(write_half, codec);

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let write_task = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let frame = RawFrame::new(message.command(), message.encode_payload());
                if let Err(e) = writer.send(frame).await {
                    debug!("daemon write failed: {e}");
                    break;
                }
            }
        });

        let mut peer = Peer {
            profile,
            events,
            state: HandshakeState::Connecting,
            outgoing,
            handle: None,
            pinger: None,
        };
        peer.send_version(local_addr, peer_addr);

        let mut on_ready = Some(on_ready);
        let result = loop {
            let frame = match reader.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => break Err(anyhow!(e)),
                None => break Ok(()),
            };
            let message = match Message::decode(
                &frame.command,
                &frame.payload,
                peer.profile.ignore_trailing_payload,
            ) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!(command = %frame.command, "ignoring unknown command");
                    continue;
                }
                // Schema violations drop the connection rather than
                // attempting partial recovery.
                Err(e) => break Err(anyhow!("malformed '{}' payload: {e}", frame.command)),
            };
            peer.handle_message(message, &mut on_ready);
        };

        peer.close();
        write_task.abort();
        result
    }

    fn send(&self, message: Message) {
        // Failure means the write task is gone; the read side notices the
        // closed transport on its own.
        let _ = self.outgoing.send(message);
    }

    fn send_version(&mut self, local_addr: SocketAddr, peer_addr: SocketAddr) {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.send(Message::Version(VersionMessage {
            version: PROTOCOL_VERSION,
            services: SERVICES,
            time,
            addr_to: NetAddress::new(SERVICES, peer_addr),
            addr_from: NetAddress::new(SERVICES, local_addr),
            nonce: rand::thread_rng().gen(),
            sub_version: format!("/coind-sync:{}/", env!("CARGO_PKG_VERSION")),
            start_height: 0,
        }));
        self.state = HandshakeState::VersionSent;
    }

    fn handle_message(
        &mut self,
        message: Message,
        on_ready: &mut Option<impl FnOnce(PeerHandle) + Send>,
    ) {
        match message {
            Message::Version(version) => {
                debug!(
                    sub_version = %version.sub_version,
                    start_height = version.start_height,
                    "daemon version received"
                );
                self.send(Message::Verack);
                if self.state == HandshakeState::VersionSent {
                    self.state = HandshakeState::AwaitingVerack;
                }
            }
            Message::Verack => match self.state {
                HandshakeState::AwaitingVerack => {
                    self.become_ready(on_ready);
                }
                HandshakeState::Ready => {
                    debug!("duplicate verack ignored");
                }
                _ => debug!("verack before version exchange, ignored"),
            },
            Message::Ping { nonce } => {
                self.send(Message::Pong { nonce });
            }
            Message::Pong { .. } => {}
            Message::Alert(_) | Message::Addr(_) | Message::GetAddr => {
                // Accepted but not acted upon.
            }
            // Relay traffic is only meaningful once the session is up.
            other if self.state != HandshakeState::Ready => {
                debug!(
                    command = other.command(),
                    "dropping message received before handshake completed"
                );
            }
            Message::Inv(items) => self.handle_inv(items),
            Message::Tx(tx) => {
                let _ = self.events.new_tx.send(tx);
            }
            Message::Block(block) => self.handle_block(block),
            Message::BlockLegacy(block) => self.handle_block(block.into_block()),
            Message::Headers(entries) => self.handle_headers(entries),
            Message::GetData(_) | Message::GetBlocks(_) | Message::GetHeaders(_) => {
                // This client never serves data back to the daemon.
            }
        }
    }

    fn become_ready(&mut self, on_ready: &mut Option<impl FnOnce(PeerHandle) + Send>) {
        self.state = HandshakeState::Ready;
        info!("daemon handshake complete");

        let get_block = ReplyMatcher::new(RESEND_INTERVAL, {
            let outgoing = self.outgoing.clone();
            move |hash: &Hash256| {
                let _ = outgoing.send(Message::GetData(vec![InvItem {
                    kind: InvType::Block,
                    hash: *hash,
                }]));
            }
        });
        let get_block_header = ReplyMatcher::new(RESEND_INTERVAL, {
            let outgoing = self.outgoing.clone();
            move |hash: &Hash256| {
                let _ = outgoing.send(Message::GetHeaders(BlockLocator {
                    version: 1,
                    have: vec![],
                    last: Some(*hash),
                }));
            }
        });
        let handle = PeerHandle {
            outgoing: self.outgoing.clone(),
            get_block,
            get_block_header,
        };
        self.handle = Some(handle.clone());

        let pinger = {
            let outgoing = self.outgoing.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PING_INTERVAL);
                interval.tick().await; // first tick fires immediately
                loop {
                    interval.tick().await;
                    if outgoing.send(Message::Ping { nonce: PING_NONCE }).is_err() {
                        break;
                    }
                }
            })
        };
        self.pinger = Some(pinger);

        if let Some(on_ready) = on_ready.take() {
            on_ready(handle);
        }
    }

    fn handle_inv(&mut self, items: Vec<InvItem>) {
        for item in items {
            match item.kind {
                InvType::Tx => {
                    self.send(Message::GetData(vec![item]));
                }
                InvType::Block => {
                    let _ = self.events.new_block.send(item.hash);
                }
                other => {
                    debug!(kind = ?other, hash = %item.hash, "unneeded inv type");
                }
            }
        }
    }

    fn handle_block(&mut self, block: Block) {
        let Some(handle) = &self.handle else { return };
        let hash = self
            .profile
            .adapter
            .block_hash(&block.header.to_bytes());
        handle.get_block.got_response(&hash, block.clone());
        handle.get_block_header.got_response(&hash, block.header);
    }

    fn handle_headers(&mut self, entries: Vec<crate::chain::SignedBlock>) {
        let Some(handle) = &self.handle else { return };
        let headers: Vec<BlockHeader> = entries.iter().map(|entry| entry.header).collect();
        for header in &headers {
            let hash = self.profile.adapter.block_hash(&header.to_bytes());
            handle.get_block_header.got_response(&hash, *header);
        }
        let _ = self.events.new_headers.send(headers);
    }

    fn close(&mut self) {
        if self.state == HandshakeState::Closed {
            return;
        }
        self.state = HandshakeState::Closed;
        if let Some(pinger) = self.pinger.take() {
            pinger.abort();
        }
        if let Some(handle) = self.handle.take() {
            // Wake parked get_block/get_block_header callers with `None`.
            handle.get_block.abandon();
            handle.get_block_header.abandon();
        }
        warn!("daemon connection closed");
    }
}
