//! Shared test doubles: an in-process daemon peer speaking the framed
//! wire protocol and a minimal JSON-RPC HTTP endpoint.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use coind_sync::chain::{hash256, Hash256};
use coind_sync::network::framer::{FrameCodec, RawFrame};
use coind_sync::network::messages::{Message, NetAddress, VersionMessage};
use coind_sync::profile::{CoinAdapter, NetworkProfile, PayoutInfo};
use coind_sync::rpc::{DaemonRpc, RpcError};

pub const MAGIC: [u8; 4] = [0xfc, 0xa4, 0x02, 0xdc];
pub const MAX_PAYLOAD: usize = 1_000_000;

/// Adapter for a fictional test coin: double-SHA256 proof of work,
/// dash-style masternode payouts, version floor at 110217.
pub struct TestCoin;

#[async_trait::async_trait]
impl CoinAdapter for TestCoin {
    async fn rpc_check(&self, rpc: &DaemonRpc) -> Result<bool, RpcError> {
        let info = rpc.call("getinfo", vec![]).await?;
        Ok(!info
            .get("testnet")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    fn version_ok(&self, version: u64) -> bool {
        version >= 110_217
    }

    fn pow_hash(&self, header: &[u8]) -> Hash256 {
        hash256(header)
    }

    fn payout(&self, template: &Value, subsidy: u64) -> anyhow::Result<PayoutInfo> {
        coind_sync::profile::masternode_payout(template, subsidy, 58)
    }
}

pub fn test_profile() -> Arc<NetworkProfile> {
    Arc::new(
        NetworkProfile::new(
            "testcoin",
            MAGIC,
            MAX_PAYLOAD,
            5810,
            15810,
            58,
            (Hash256::ZERO, Hash256([0xff; 32])),
            true,
            Arc::new(TestCoin),
        )
        .expect("valid test profile"),
    )
}

/// Daemon side of one framed P2P connection.
pub struct FakeDaemon {
    framed: Framed<TcpStream, FrameCodec>,
    ignore_trailing: bool,
}

impl FakeDaemon {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.expect("accept");
        Self {
            framed: Framed::new(stream, FrameCodec::new(MAGIC, MAX_PAYLOAD)),
            ignore_trailing: true,
        }
    }

    pub async fn send(&mut self, message: Message) {
        let frame = RawFrame::new(message.command(), message.encode_payload());
        self.framed.send(frame).await.expect("daemon send");
    }

    pub async fn send_raw(&mut self, frame: RawFrame) {
        self.framed.send(frame).await.expect("daemon send raw");
    }

    /// Next decoded message, skipping commands the catalog doesn't know.
    pub async fn recv(&mut self) -> Message {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
                .await
                .expect("daemon recv timeout")
                .expect("connection closed")
                .expect("frame error");
            if let Some(message) =
                Message::decode(&frame.command, &frame.payload, self.ignore_trailing)
                    .expect("daemon decode")
            {
                return message;
            }
        }
    }

    /// Run the daemon half of the handshake: consume the client's
    /// version, announce our own, consume the verack, acknowledge.
    pub async fn handshake(&mut self) -> VersionMessage {
        let client_version = match self.recv().await {
            Message::Version(v) => v,
            other => panic!("expected version, got {other:?}"),
        };
        let addr: SocketAddr = "127.0.0.1:5810".parse().unwrap();
        self.send(Message::Version(VersionMessage {
            version: 70004,
            services: 1,
            time: 1_700_000_000,
            addr_to: NetAddress::new(1, addr),
            addr_from: NetAddress::new(1, addr),
            nonce: 42,
            sub_version: "/TestCoin:1.0/".into(),
            start_height: 100,
        }))
        .await;
        match self.recv().await {
            Message::Verack => {}
            other => panic!("expected verack, got {other:?}"),
        }
        self.send(Message::Verack).await;
        client_version
    }

    pub async fn close(self) {
        drop(self.framed);
    }
}

type RpcHandler =
    Arc<dyn Fn(&str, &[Value]) -> Result<Value, (i64, String)> + Send + Sync>;

/// Minimal JSON-RPC 1.0 endpoint over HTTP/1.1, one request per
/// connection. Records every method called.
pub struct MockRpcServer {
    pub url: String,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockRpcServer {
    pub async fn start(
        handler: impl Fn(&str, &[Value]) -> Result<Value, (i64, String)> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let handler: RpcHandler = Arc::new(handler);

        let recorded = Arc::clone(&calls);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve_one(stream, handler, recorded).await;
                });
            }
        });

        Self {
            url: format!("http://{addr}/"),
            calls,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn client(&self) -> DaemonRpc {
        DaemonRpc::new(self.url.clone(), None, Duration::from_secs(5)).expect("rpc client")
    }
}

async fn serve_one(
    mut stream: TcpStream,
    handler: RpcHandler,
    recorded: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length: usize = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request: Value =
        serde_json::from_slice(&buf[header_end..header_end + content_length]).unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let params = request
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    recorded.lock().unwrap().push(method.clone());

    let (status, body) = match handler(&method, &params) {
        Ok(result) => (
            "200 OK",
            json!({"result": result, "error": Value::Null, "id": id}),
        ),
        Err((code, message)) => (
            "500 Internal Server Error",
            json!({
                "result": Value::Null,
                "error": {"code": code, "message": message},
                "id": id,
            }),
        ),
    };
    let body = serde_json::to_vec(&body).expect("serialize response");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await
}
