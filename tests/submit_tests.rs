//! Dual-path submission tests: RPC method routing, success/expectation
//! reconciliation, and the P2P broadcast path.

mod utils;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing_subscriber::fmt::MakeWriter;

use coind_sync::chain::{hash256, Block, BlockHeader, CompactBits, Hash256};
use coind_sync::codec::WireEncode;
use coind_sync::network::messages::Message;
use coind_sync::network::{ConnectionManager, ReconnectPolicy};
use coind_sync::rpc::METHOD_NOT_FOUND;
use coind_sync::submit::{submit_block_p2p, submit_block_rpc, SubmitError};

use utils::{test_profile, FakeDaemon, MockRpcServer};

/// Easy target: any header hash with the top bit clear qualifies.
const EASY_BITS: CompactBits = CompactBits(0x207fffff);
/// Realistic target: no test header will ever satisfy it.
const HARD_BITS: CompactBits = CompactBits(0x1d00ffff);

#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(capture.clone())
        .finish();
    (capture, tracing::subscriber::set_default(subscriber))
}

/// Build a block whose proof-of-work satisfies (or not) its own target.
fn solved_block(bits: CompactBits, should_solve: bool) -> Block {
    let mut header = BlockHeader {
        version: 2,
        previous_block: Hash256::from_u64(1),
        merkle_root: Hash256::from_u64(2),
        timestamp: 1_700_000_000,
        bits,
        nonce: 0,
    };
    if should_solve {
        while hash256(&header.to_bytes()) > bits.target() {
            header.nonce += 1;
        }
    }
    Block {
        header,
        txs: vec![],
    }
}

#[tokio::test]
async fn accepted_block_with_expected_success_emits_no_warning() {
    let server = MockRpcServer::start(|method, _| match method {
        "submitblock" => Ok(Value::Null),
        other => panic!("unexpected rpc method {other}"),
    })
    .await;
    let profile = test_profile();
    let block = solved_block(EASY_BITS, true);

    let (capture, _guard) = capture_logs();
    submit_block_rpc(&block, false, &server.client(), true, &profile)
        .await
        .unwrap();
    assert!(!capture.contents().contains("block submittal result"));
}

#[tokio::test]
async fn rejected_block_with_expected_success_warns() {
    let server = MockRpcServer::start(|method, _| match method {
        "submitblock" => Ok(json!("high-hash")),
        other => panic!("unexpected rpc method {other}"),
    })
    .await;
    let profile = test_profile();
    let block = solved_block(EASY_BITS, true);

    let (capture, _guard) = capture_logs();
    submit_block_rpc(&block, false, &server.client(), true, &profile)
        .await
        .unwrap();
    assert!(capture.contents().contains("block submittal result"));
}

#[tokio::test]
async fn rejected_block_with_ignore_failure_is_quiet() {
    let server = MockRpcServer::start(|method, _| match method {
        "submitblock" => Ok(json!("high-hash")),
        other => panic!("unexpected rpc method {other}"),
    })
    .await;
    let profile = test_profile();
    let block = solved_block(EASY_BITS, true);

    let (capture, _guard) = capture_logs();
    submit_block_rpc(&block, true, &server.client(), true, &profile)
        .await
        .unwrap();
    assert!(!capture.contents().contains("block submittal result"));
}

#[tokio::test]
async fn accepted_block_without_expected_success_warns() {
    let server = MockRpcServer::start(|method, _| match method {
        "submitblock" => Ok(Value::Null),
        other => panic!("unexpected rpc method {other}"),
    })
    .await;
    let profile = test_profile();
    // Proof-of-work nowhere near the declared target.
    let block = solved_block(HARD_BITS, false);

    let (capture, _guard) = capture_logs();
    submit_block_rpc(&block, false, &server.client(), true, &profile)
        .await
        .unwrap();
    assert!(capture.contents().contains("block submittal result"));
}

#[tokio::test]
async fn submitblock_falls_back_to_template_mode_submit() {
    let server = MockRpcServer::start(|method, params| match method {
        "submitblock" => Err((METHOD_NOT_FOUND, "Method not found".into())),
        "getblocktemplate" => {
            assert_eq!(params[0]["mode"], json!("submit"));
            assert!(params[0]["data"].is_string());
            Ok(Value::Null)
        }
        other => panic!("unexpected rpc method {other}"),
    })
    .await;
    let profile = test_profile();
    let block = solved_block(EASY_BITS, true);

    submit_block_rpc(&block, false, &server.client(), true, &profile)
        .await
        .unwrap();
    assert_eq!(
        server.calls(),
        vec!["submitblock".to_string(), "getblocktemplate".to_string()]
    );
}

#[tokio::test]
async fn memorypool_work_submits_via_memorypool() {
    let server = MockRpcServer::start(|method, params| match method {
        "getmemorypool" => {
            assert!(params[0].is_string());
            Ok(json!(true))
        }
        other => panic!("unexpected rpc method {other}"),
    })
    .await;
    let profile = test_profile();
    let block = solved_block(EASY_BITS, true);

    let (capture, _guard) = capture_logs();
    submit_block_rpc(&block, false, &server.client(), false, &profile)
        .await
        .unwrap();
    assert_eq!(server.calls(), vec!["getmemorypool".to_string()]);
    assert!(!capture.contents().contains("block submittal result"));
}

#[tokio::test]
async fn p2p_submit_without_connection_is_silently_retryable() {
    let profile = test_profile();
    let manager = ConnectionManager::new(Arc::clone(&profile), ReconnectPolicy::default());
    let block = solved_block(EASY_BITS, true);

    let err = submit_block_p2p(&block, &manager, &profile).unwrap_err();
    assert!(matches!(err, SubmitError::Silent));
}

#[tokio::test]
async fn p2p_submit_broadcasts_block() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let profile = test_profile();
    let manager = Arc::new(ConnectionManager::new(
        Arc::clone(&profile),
        ReconnectPolicy::default(),
    ));
    tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run(addr).await }
    });
    let mut daemon = FakeDaemon::accept(&listener).await;
    daemon.handshake().await;
    timeout(Duration::from_secs(5), manager.connection())
        .await
        .unwrap();

    let block = solved_block(EASY_BITS, true);
    submit_block_p2p(&block, &manager, &profile).unwrap();

    assert_eq!(daemon.recv().await, Message::Block(block));
}
