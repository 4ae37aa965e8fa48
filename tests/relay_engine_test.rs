//! Tests for the relay engine

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::{protocol::Role, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use wsrelay::relay::{Heartbeat, RelayEngine, RelayError, RelayOp, RelayOptions, RelaySession};

/// Byte stream whose reads follow a script and whose writes can be made to fail.
/// Once the script is exhausted reads never complete.
struct ScriptedStream {
    reads: VecDeque<io::Result<Vec<u8>>>,
    fail_writes: bool,
}

impl ScriptedStream {
    fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
        Self {
            reads: reads.into(),
            fail_writes: false,
        }
    }

    fn failing_writes() -> Self {
        Self {
            reads: VecDeque::new(),
            fail_writes: true,
        }
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reads.pop_front() {
            Some(Ok(data)) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            Some(Err(e)) => Poll::Ready(Err(e)),
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
        } else {
            Poll::Ready(Ok(buf.len()))
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Relay-side and client-side ends of an in-memory WebSocket
async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (relay_side, client_side) = duplex(64 * 1024);
    let relay = WebSocketStream::from_raw_socket(relay_side, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_side, Role::Client, None).await;
    (relay, client)
}

fn spawn_relay<S, B>(
    engine: RelayEngine,
    token: CancellationToken,
    mut ws: WebSocketStream<S>,
    mut tcp: B,
    peer: &str,
) -> JoinHandle<Result<(), RelayError>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = RelaySession::new(peer, "ws://test/");
    tokio::spawn(async move { engine.run(&token, &mut ws, &mut tcp, &session).await })
}

async fn finish(handle: JoinHandle<Result<(), RelayError>>) -> Result<(), RelayError> {
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("relay did not terminate")
        .expect("relay task panicked")
}

#[tokio::test]
async fn test_websocket_to_tcp_preserves_order_and_drops_text() {
    let (ws, mut client) = ws_pair().await;
    let (tcp, mut peer) = duplex(64 * 1024);
    let handle = spawn_relay(RelayEngine::new(), CancellationToken::new(), ws, tcp, "peer-1");

    client.send(Message::binary(b"hello".to_vec())).await.unwrap();
    client.send(Message::text("not relayed")).await.unwrap();
    client.send(Message::binary(b", world".to_vec())).await.unwrap();
    client.send(Message::binary(b"!".to_vec())).await.unwrap();

    let mut buf = vec![0u8; 13];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello, world!");

    drop(peer);
    assert!(finish(handle).await.is_ok());
}

#[tokio::test]
async fn test_tcp_to_websocket_one_message_per_chunk() {
    let (ws, mut client) = ws_pair().await;
    let (tcp, mut peer) = duplex(64 * 1024);
    let handle = spawn_relay(RelayEngine::new(), CancellationToken::new(), ws, tcp, "peer-2");

    let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    peer.write_all(&data).await.unwrap();

    let mut received = Vec::new();
    while received.len() < data.len() {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("message expected")
            .unwrap()
            .unwrap();
        match message {
            Message::Binary(payload) => {
                assert!(!payload.is_empty());
                assert!(payload.len() <= 1024, "chunk of {} bytes", payload.len());
                received.extend_from_slice(&payload);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
    assert_eq!(received, data);

    drop(peer);
    assert!(finish(handle).await.is_ok());
}

#[tokio::test]
async fn test_zero_length_read_is_ignored() {
    let (ws, mut client) = ws_pair().await;
    let tcp = ScriptedStream::new(vec![
        Err(io::Error::from(io::ErrorKind::Interrupted)),
        Ok(b"after".to_vec()),
    ]);
    let token = CancellationToken::new();
    let handle = spawn_relay(RelayEngine::new(), token.clone(), ws, tcp, "peer-3");

    let message = timeout(Duration::from_secs(2), client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(message, Message::binary(b"after".to_vec()));
    assert!(!handle.is_finished());

    token.cancel();
    assert!(finish(handle).await.is_ok());
}

#[tokio::test]
async fn test_clean_tcp_eof_is_not_an_error() {
    let (ws, _client) = ws_pair().await;
    let (tcp, peer) = duplex(1024);
    let handle = spawn_relay(RelayEngine::new(), CancellationToken::new(), ws, tcp, "peer-4");

    drop(peer);
    assert!(finish(handle).await.is_ok());
}

#[tokio::test]
async fn test_close_frame_ends_relay() {
    let (ws, mut client) = ws_pair().await;
    let (tcp, _peer) = duplex(1024);
    let handle = spawn_relay(RelayEngine::new(), CancellationToken::new(), ws, tcp, "peer-5");

    client.close(None).await.unwrap();
    assert!(finish(handle).await.is_ok());
}

#[tokio::test]
async fn test_tcp_read_error_is_reported() {
    let (ws, _client) = ws_pair().await;
    let tcp = ScriptedStream::new(vec![Err(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "reset by peer",
    ))]);
    let token = CancellationToken::new();
    let handle = spawn_relay(RelayEngine::new(), token.clone(), ws, tcp, "10.0.0.1:4000");

    let err = finish(handle).await.unwrap_err();
    assert_eq!(err.op(), RelayOp::TcpRead);
    assert_eq!(err.peer(), "10.0.0.1:4000");
    assert_eq!(err.to_string(), "conn 10.0.0.1:4000: tcp read error: reset by peer");
    // Internal failure cancels the session only, never the caller
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn test_tcp_write_error_is_reported() {
    let (ws, mut client) = ws_pair().await;
    let handle = spawn_relay(
        RelayEngine::new(),
        CancellationToken::new(),
        ws,
        ScriptedStream::failing_writes(),
        "peer-6",
    );

    client.send(Message::binary(b"payload".to_vec())).await.unwrap();

    let err = finish(handle).await.unwrap_err();
    assert_eq!(err.op(), RelayOp::TcpWrite);
    assert!(err.to_string().contains("tcp write error"));
}

#[tokio::test]
async fn test_websocket_read_error_is_reported() {
    let (relay_side, mut raw_client) = duplex(1024);
    let ws = WebSocketStream::from_raw_socket(relay_side, Role::Server, None).await;
    let (tcp, _peer) = duplex(1024);
    let handle = spawn_relay(RelayEngine::new(), CancellationToken::new(), ws, tcp, "peer-7");

    // Binary frame without a mask: a protocol violation from a client
    raw_client.write_all(&[0x82, 0x01, b'A']).await.unwrap();

    let err = finish(handle).await.unwrap_err();
    assert_eq!(err.op(), RelayOp::WebSocketRead);
    assert!(err.to_string().starts_with("conn peer-7: websocket read error"));
}

#[tokio::test]
async fn test_websocket_write_error_is_reported() {
    let ws = WebSocketStream::from_raw_socket(ScriptedStream::failing_writes(), Role::Server, None).await;
    let (tcp, mut peer) = duplex(1024);
    let handle = spawn_relay(RelayEngine::new(), CancellationToken::new(), ws, tcp, "peer-8");

    peer.write_all(b"data").await.unwrap();

    let err = finish(handle).await.unwrap_err();
    assert_eq!(err.op(), RelayOp::WebSocketWrite);
}

#[tokio::test]
async fn test_parent_cancellation_while_idle() {
    let (ws, _client) = ws_pair().await;
    let (tcp, _peer) = duplex(1024);
    let token = CancellationToken::new();
    let handle = spawn_relay(
        RelayEngine::with_heartbeat(Heartbeat::default()),
        token.clone(),
        ws,
        tcp,
        "peer-9",
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    token.cancel();
    let result = timeout(Duration::from_millis(500), handle).await;
    assert!(result.expect("prompt termination").unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_heartbeat_ends_idle_relay() {
    let (ws, _client) = ws_pair().await;
    let (tcp, _peer) = duplex(1024);
    let start = Instant::now();
    let handle = spawn_relay(
        RelayEngine::with_heartbeat(Heartbeat::default()),
        CancellationToken::new(),
        ws,
        tcp,
        "peer-10",
    );

    // _client is never polled, so no pong ever comes back
    let result = timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    assert!(result.is_ok());

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(4800), "ended after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(6), "ended after {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_answered_heartbeat_keeps_relay_alive() {
    let (ws, mut client) = ws_pair().await;
    let (tcp, _peer) = duplex(1024);
    let token = CancellationToken::new();
    let handle = spawn_relay(
        RelayEngine::with_heartbeat(Heartbeat::default()),
        token.clone(),
        ws,
        tcp,
        "peer-11",
    );

    // Reading is enough for tungstenite to answer pings
    let pings = tokio::spawn(async move {
        let mut pings = 0;
        while let Some(Ok(message)) = client.next().await {
            if message.is_ping() {
                pings += 1;
            }
        }
        pings
    });

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert!(!handle.is_finished());

    token.cancel();
    assert!(timeout(Duration::from_secs(1), handle).await.unwrap().unwrap().is_ok());
    pings.abort();
}

#[tokio::test]
async fn test_zero_chunk_size_still_relays() {
    let (ws, mut client) = ws_pair().await;
    let (tcp, mut peer) = duplex(1024);
    let engine = RelayEngine::with_options(RelayOptions {
        chunk_size: 0,
        heartbeat: None,
    });
    let handle = spawn_relay(engine, CancellationToken::new(), ws, tcp, "peer-12");

    peer.write_all(b"not end of stream").await.unwrap();
    let message = timeout(Duration::from_secs(2), client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(message, Message::binary(b"not end of stream".to_vec()));
    assert!(!handle.is_finished());

    drop(peer);
    assert!(finish(handle).await.is_ok());
}
