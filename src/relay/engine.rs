//! Relay Engine
//!
//! Pumps data between one TCP stream and one WebSocket connection until
//! either side finishes, a transport error occurs, or the caller cancels.
//!
//! Three loops run on the caller's task:
//!
//! - inbound: WebSocket binary messages are written to the TCP stream
//! - outbound: TCP reads are sent as one binary message per chunk
//! - heartbeat (optional): periodic ping that must be answered in time
//!
//! Every loop cancels the session token when it exits, so the first loop to
//! stop brings the others down with it.

use std::error::Error as StdError;
use std::future::pending;
use std::io;
use std::time::Duration;

use futures_util::{
    stream::{SplitSink, SplitStream},
    Sink, SinkExt, Stream, StreamExt,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::error::{FirstError, RelayError, RelayOp};
use super::frame::{self, Frame, FrameKind};
use super::session::RelaySession;
use crate::config::RelayConfig;

/// Default size of a single TCP read, and so the largest relayed message
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// WebSocket keepalive probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    /// Must be shorter than `interval`
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(4800),
        }
    }
}

/// Relay engine settings
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub chunk_size: usize,
    pub heartbeat: Option<Heartbeat>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            heartbeat: None,
        }
    }
}

/// Runs the full-duplex pump between a TCP stream and a WebSocket
#[derive(Debug, Clone, Default)]
pub struct RelayEngine {
    options: RelayOptions,
}

impl RelayEngine {
    /// Create a relay engine without heartbeat
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a relay engine that probes the WebSocket with the given heartbeat
    pub fn with_heartbeat(heartbeat: Heartbeat) -> Self {
        Self {
            options: RelayOptions {
                heartbeat: Some(heartbeat),
                ..RelayOptions::default()
            },
        }
    }

    /// Create a relay engine with explicit options; a zero chunk size falls
    /// back to [`DEFAULT_CHUNK_SIZE`]
    pub fn with_options(mut options: RelayOptions) -> Self {
        if options.chunk_size == 0 {
            options.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        Self { options }
    }

    /// Create a relay engine from configuration
    pub fn from_config(config: &RelayConfig, heartbeat: bool) -> Self {
        let heartbeat = heartbeat.then(|| Heartbeat {
            interval: config.heartbeat_interval,
            timeout: config.heartbeat_timeout,
        });

        Self::with_options(RelayOptions {
            chunk_size: config.chunk_size,
            heartbeat,
        })
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Relay between `ws` and `tcp` until the session ends.
    ///
    /// Returns the first transport error recorded by any pump, or `Ok(())`
    /// when the session ended through end-of-stream, a close frame, a failed
    /// heartbeat or cancellation of `parent`. Neither endpoint is closed;
    /// both are untouched once this returns.
    pub async fn run<W, M, E, B>(
        &self,
        parent: &CancellationToken,
        ws: &mut W,
        tcp: &mut B,
        session: &RelaySession,
    ) -> Result<(), RelayError>
    where
        W: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Unpin,
        M: Frame,
        E: StdError + Send + Sync + 'static,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let token = parent.child_token();
        let errors = FirstError::default();
        let (pong_tx, pong_rx) = watch::channel(0u64);

        let (ws_tx, ws_rx): (SplitSink<&mut W, M>, SplitStream<&mut W>) = ws.split();
        let ws_tx = Mutex::new(ws_tx);
        let (tcp_rx, tcp_tx) = tokio::io::split(tcp);

        info!(
            session_id = %session.session_id,
            peer = %session.peer,
            heartbeat = self.options.heartbeat.is_some(),
            "Starting relay"
        );

        let heartbeat = async {
            if let Some(heartbeat) = self.options.heartbeat {
                pump_heartbeat(&ws_tx, pong_rx, heartbeat, &token, session).await;
            }
        };

        tokio::join!(
            pump_inbound(ws_rx, tcp_tx, pong_tx, &token, &errors, session),
            pump_outbound(tcp_rx, &ws_tx, self.options.chunk_size, &token, &errors, session),
            heartbeat,
        );

        match errors.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// WebSocket -> TCP
async fn pump_inbound<W, M, E, B>(
    mut ws_rx: SplitStream<&mut W>,
    mut tcp_tx: WriteHalf<&mut B>,
    pong_tx: watch::Sender<u64>,
    token: &CancellationToken,
    errors: &FirstError,
    session: &RelaySession,
) where
    W: Stream<Item = Result<M, E>> + Unpin,
    M: Frame,
    E: StdError + Send + Sync + 'static,
    B: AsyncWrite + Unpin,
{
    let _cancel_on_exit = token.clone().drop_guard();

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return,
            next = ws_rx.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            None => {
                debug!(peer = %session.peer, "WebSocket reached end of stream");
                return;
            }
            Some(Err(e)) if frame::is_peer_gone(&e) => {
                debug!(peer = %session.peer, "WebSocket peer went away: {}", e);
                return;
            }
            Some(Err(e)) => {
                errors.record(RelayError::new(RelayOp::WebSocketRead, session.peer.as_str(), e));
                return;
            }
        };

        match message.kind() {
            FrameKind::Binary => {}
            FrameKind::Close => {
                debug!(peer = %session.peer, "WebSocket close frame received");
                return;
            }
            FrameKind::Pong => {
                if let Some(seq) = frame::decode_probe(&message.into_payload()) {
                    pong_tx.send_replace(seq);
                }
                continue;
            }
            FrameKind::Other => {
                trace!(peer = %session.peer, "Discarding non-binary message");
                continue;
            }
        }

        let payload = message.into_payload();
        let written = tokio::select! {
            _ = token.cancelled() => return,
            written = write_message(&mut tcp_tx, &payload) => written,
        };

        if let Err(e) = written {
            errors.record(RelayError::new(RelayOp::TcpWrite, session.peer.as_str(), e));
            return;
        }
        session.add_bytes_down(payload.len() as u64);
    }
}

async fn write_message<T: AsyncWrite + Unpin>(tcp_tx: &mut T, payload: &[u8]) -> io::Result<()> {
    tcp_tx.write_all(payload).await?;
    tcp_tx.flush().await
}

/// TCP -> WebSocket
async fn pump_outbound<W, M, E, B>(
    mut tcp_rx: ReadHalf<&mut B>,
    ws_tx: &Mutex<SplitSink<&mut W, M>>,
    chunk_size: usize,
    token: &CancellationToken,
    errors: &FirstError,
    session: &RelaySession,
) where
    W: Sink<M, Error = E> + Unpin,
    M: Frame,
    E: StdError + Send + Sync + 'static,
    B: AsyncRead + Unpin,
{
    let _cancel_on_exit = token.clone().drop_guard();
    let mut buf = vec![0u8; chunk_size];

    loop {
        let read = tokio::select! {
            _ = token.cancelled() => return,
            read = tcp_rx.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!(peer = %session.peer, "TCP reached end of stream");
                return;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {
                continue;
            }
            Err(e) => {
                errors.record(RelayError::new(RelayOp::TcpRead, session.peer.as_str(), e));
                return;
            }
        };

        let sent = tokio::select! {
            _ = token.cancelled() => return,
            sent = async { ws_tx.lock().await.send(M::binary(buf[..n].to_vec())).await } => sent,
        };

        if let Err(e) = sent {
            errors.record(RelayError::new(RelayOp::WebSocketWrite, session.peer.as_str(), e));
            return;
        }
        session.add_bytes_up(n as u64);
    }
}

async fn pump_heartbeat<W, M, E>(
    ws_tx: &Mutex<SplitSink<&mut W, M>>,
    mut pongs: watch::Receiver<u64>,
    heartbeat: Heartbeat,
    token: &CancellationToken,
    session: &RelaySession,
) where
    W: Sink<M, Error = E> + Unpin,
    M: Frame,
    E: StdError + Send + Sync + 'static,
{
    let _cancel_on_exit = token.clone().drop_guard();
    let mut ticker = interval(heartbeat.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        seq += 1;
        let probe = tokio::select! {
            _ = token.cancelled() => return,
            probe = timeout(heartbeat.timeout, probe(ws_tx, &mut pongs, seq)) => probe,
        };

        match probe {
            Ok(Ok(())) => trace!(peer = %session.peer, seq, "Heartbeat acknowledged"),
            Ok(Err(e)) => {
                warn!(peer = %session.peer, "Heartbeat ping failed: {}", e);
                return;
            }
            Err(_) => {
                warn!(
                    peer = %session.peer,
                    "Heartbeat timed out after {:?}", heartbeat.timeout
                );
                return;
            }
        }
    }
}

/// Sends ping `seq` and waits until the inbound pump reports the matching pong.
async fn probe<W, M, E>(
    ws_tx: &Mutex<SplitSink<&mut W, M>>,
    pongs: &mut watch::Receiver<u64>,
    seq: u64,
) -> Result<(), E>
where
    W: Sink<M, Error = E> + Unpin,
    M: Frame,
{
    pongs.borrow_and_update();
    ws_tx.lock().await.send(M::ping(frame::encode_probe(seq))).await?;

    loop {
        if *pongs.borrow_and_update() == seq {
            return Ok(());
        }
        if pongs.changed().await.is_err() {
            // inbound pump is gone; the timeout or cancellation ends the wait
            pending::<()>().await;
        }
    }
}
