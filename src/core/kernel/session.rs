use crate::core::config::WsConfig;
use crate::core::errors::WsError;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

type WsSink =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One physical WebSocket connection and its full lifecycle:
/// `Idle -> Dialing -> Open -> Closing -> Closed`, with a terminal error
/// reachable from `Dialing` (a failed [`WsSession::connect`] never yields a
/// session) or `Open` (surfaced once through [`WsSession::recv`]).
///
/// On a successful dial two tasks are spawned: a read loop pumping inbound
/// text frames into a small bounded queue, and a passive liveness loop. The
/// socket is owned exclusively by the session; the sink half is shared only
/// between the session handle and the liveness loop.
pub struct WsSession {
    sink: Arc<Mutex<WsSink>>,
    frames: mpsc::Receiver<String>,
    errors: mpsc::Receiver<WsError>,
    cancel: CancellationToken,
    closed: bool,
}

impl WsSession {
    /// Dial `url` and start the session.
    ///
    /// Fails with [`WsError::Dial`] on network/handshake failure or when the
    /// handshake outlives `config.connect_timeout`. No reconnection is ever
    /// attempted; that policy belongs to the caller.
    #[instrument(skip(config, cancel), fields(url = %url))]
    pub async fn connect(
        config: &WsConfig,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<Self, WsError> {
        let dial = timeout(config.connect_timeout, connect_async(url));
        let dialed = tokio::select! {
            result = dial => result,
            () = cancel.cancelled() => return Err(WsError::Cancelled),
        };
        let (stream, _) = dialed
            .map_err(|_| WsError::Dial("connection handshake timed out".to_string()))?
            .map_err(|e| WsError::Dial(e.to_string()))?;

        let (sink, read) = stream.split();
        let sink = Arc::new(Mutex::new(sink));
        let (frame_tx, frames) = mpsc::channel(config.frame_queue_depth);
        let (error_tx, errors) = mpsc::channel(1);
        let last_pong = Arc::new(AtomicU64::new(now_ms()));

        tokio::spawn(read_loop(
            read,
            Arc::clone(&sink),
            frame_tx,
            error_tx,
            Arc::clone(&last_pong),
            cancel.clone(),
        ));
        tokio::spawn(keepalive_loop(
            Arc::clone(&sink),
            last_pong,
            config.ping_interval,
            config.ping_write_deadline,
            config.pong_timeout,
            cancel.clone(),
        ));

        Ok(Self {
            sink,
            frames,
            errors,
            cancel,
            closed: false,
        })
    }

    /// Write one text frame to the socket.
    pub async fn send_text(&self, payload: String) -> Result<(), WsError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(payload))
            .await
            .map_err(|e| WsError::Send(e.to_string()))
    }

    /// Wait for the first of: an inbound frame, the session's terminal
    /// error, or cancellation. Frames are delivered in exact socket order.
    pub async fn recv(&mut self) -> Result<String, WsError> {
        tokio::select! {
            frame = self.frames.recv() => match frame {
                Some(frame) => Ok(frame),
                // The read loop queues its terminal error before the frame
                // queue closes, so a drained queue means the error (if any)
                // is already waiting.
                None => Err(self
                    .errors
                    .try_recv()
                    .unwrap_or_else(|_| WsError::Read("connection closed".to_string()))),
            },
            () = self.cancel.cancelled() => Err(WsError::Cancelled),
        }
    }

    /// Close the session. Idempotent: the second and subsequent calls are
    /// no-ops. The close frame is best-effort; both loops stop via the
    /// session token.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!("close frame not delivered: {}", e);
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        // A leaked session must not leave its loops running.
        self.cancel.cancel();
    }
}

async fn read_loop(
    mut read: WsRead,
    sink: Arc<Mutex<WsSink>>,
    frame_tx: mpsc::Sender<String>,
    error_tx: mpsc::Sender<WsError>,
    last_pong: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            message = read.next() => message,
            () = cancel.cancelled() => break,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                if !deliver(&frame_tx, text, &cancel).await {
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => {
                    if !deliver(&frame_tx, text, &cancel).await {
                        break;
                    }
                }
                Err(e) => warn!("dropping non-UTF-8 binary frame: {}", e),
            },
            Some(Ok(Message::Ping(payload))) => {
                // Transport-level pings are answered here, never surfaced.
                let mut sink = sink.lock().await;
                if let Err(e) = sink.send(Message::Pong(payload)).await {
                    warn!("failed to answer ping: {}", e);
                }
            }
            Some(Ok(Message::Pong(_))) => {
                last_pong.store(now_ms(), Ordering::Relaxed);
            }
            Some(Ok(Message::Close(_))) | None => {
                let _ = error_tx.try_send(WsError::Read("connection closed by peer".to_string()));
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let _ = error_tx.try_send(WsError::Read(e.to_string()));
                break;
            }
        }
    }
    // Both channels close here, exactly once, with any terminal error
    // already queued ahead of the frame-queue closure.
}

/// Push one frame into the bounded queue. Waiting on a full queue applies
/// backpressure to the socket read, but never outlives cancellation.
async fn deliver(frame_tx: &mpsc::Sender<String>, frame: String, cancel: &CancellationToken) -> bool {
    tokio::select! {
        sent = frame_tx.send(frame) => sent.is_ok(),
        () = cancel.cancelled() => false,
    }
}

/// Passive liveness: ping on a fixed cadence and stop sustaining the
/// connection once a pong has not been observed within the timeout window.
/// The loop never force-closes the socket; the read loop surfaces the
/// eventual disconnect.
async fn keepalive_loop(
    sink: Arc<Mutex<WsSink>>,
    last_pong: Arc<AtomicU64>,
    ping_interval: Duration,
    write_deadline: Duration,
    pong_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => break,
        }

        let silence = now_ms().saturating_sub(last_pong.load(Ordering::Relaxed));
        if silence > pong_timeout.as_millis() as u64 {
            warn!("no pong observed for {}ms, abandoning keepalive", silence);
            break;
        }

        let ping = async {
            let mut sink = sink.lock().await;
            sink.send(Message::Ping(Vec::new())).await
        };
        match timeout(write_deadline, ping).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("keepalive ping failed: {}", e);
                break;
            }
            Err(_) => {
                warn!("keepalive ping write timed out");
                break;
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
