use crate::core::config::WsConfig;
use crate::core::errors::WsError;
use crate::core::kernel::WsSession;
use crate::stream::events::StreamEvent;
use crate::stream::kline::decode_kline_rows;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Classify one inbound text frame into a typed [`StreamEvent`].
pub fn classify_frame(text: &str) -> Result<StreamEvent, WsError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| WsError::Decode(format!("invalid JSON: {}", e)))?;
    classify_value(value)
}

/// Classify an already-parsed frame.
///
/// Dispatch order: combined wrapper, event-type tag, then the tagless
/// shapes (depth snapshot, book ticker, positional kline rows). Arrays are
/// homogeneous batches decoded element-wise.
pub fn classify_value(value: Value) -> Result<StreamEvent, WsError> {
    match value {
        Value::Object(map) => classify_object(map),
        Value::Array(items) => classify_array(items),
        other => Err(WsError::Decode(format!(
            "frame is neither an object nor an array: {}",
            other
        ))),
    }
}

fn classify_object(mut map: Map<String, Value>) -> Result<StreamEvent, WsError> {
    // Combined/multiplexed wrapper. The inner frame may itself be an array
    // broadcast; the recursion handles that shape whether or not the
    // exchange ever produces it.
    if map.contains_key("stream") && map.contains_key("data") {
        let stream = match map.remove("stream") {
            Some(Value::String(stream)) => stream,
            _ => return Err(WsError::Decode("combined topic is not a string".to_string())),
        };
        let data = map
            .remove("data")
            .ok_or_else(|| WsError::Decode("combined wrapper has no data".to_string()))?;
        let event = classify_value(data)?;
        return Ok(StreamEvent::Combined {
            stream,
            event: Box::new(event),
        });
    }

    if let Some(tag) = map.get("e").and_then(Value::as_str) {
        let tag = tag.to_string();
        return classify_tagged(&tag, Value::Object(map));
    }

    // Tagless shapes: the fixed field layout is the discriminator.
    if map.contains_key("lastUpdateId") && map.contains_key("bids") && map.contains_key("asks") {
        return Ok(StreamEvent::DepthSnapshot(decode(Value::Object(map))?));
    }
    if ["u", "s", "b", "B", "a", "A"]
        .iter()
        .all(|key| map.contains_key(*key))
    {
        return Ok(StreamEvent::BookTicker(decode(Value::Object(map))?));
    }

    Err(WsError::Decode(format!(
        "unrecognized frame shape with keys [{}]",
        map.keys().cloned().collect::<Vec<_>>().join(", ")
    )))
}

fn classify_tagged(tag: &str, value: Value) -> Result<StreamEvent, WsError> {
    match tag {
        "trade" => Ok(StreamEvent::Trade(decode(value)?)),
        "aggTrade" => Ok(StreamEvent::AggTrade(decode(value)?)),
        "kline" => Ok(StreamEvent::Kline(decode(value)?)),
        "24hrMiniTicker" => Ok(StreamEvent::MiniTicker(decode(value)?)),
        "24hrTicker" => Ok(StreamEvent::Ticker(decode(value)?)),
        "1hTicker" | "4hTicker" | "1dTicker" => Ok(StreamEvent::WindowTicker(decode(value)?)),
        "bookTicker" => Ok(StreamEvent::BookTicker(decode(value)?)),
        "avgPrice" => Ok(StreamEvent::AvgPrice(decode(value)?)),
        "depthUpdate" => Ok(StreamEvent::DepthUpdate(decode(value)?)),
        "outboundAccountPosition" => Ok(StreamEvent::AccountUpdate(decode(value)?)),
        "balanceUpdate" => Ok(StreamEvent::BalanceUpdate(decode(value)?)),
        "executionReport" => Ok(StreamEvent::OrderUpdate(decode(value)?)),
        "listStatus" => Ok(StreamEvent::ListStatus(decode(value)?)),
        "listenKeyExpired" => Ok(StreamEvent::ListenKeyExpired(decode(value)?)),
        "eventStreamTerminated" => Ok(StreamEvent::StreamTerminated(decode(value)?)),
        "externalLockUpdate" => Ok(StreamEvent::ExternalLockUpdate(decode(value)?)),
        other => Err(WsError::Decode(format!("unknown event type: {}", other))),
    }
}

fn classify_array(items: Vec<Value>) -> Result<StreamEvent, WsError> {
    match items.first() {
        // All-symbol broadcast: a homogeneous batch of tagged events.
        Some(Value::Object(_)) => items
            .into_iter()
            .map(classify_value)
            .collect::<Result<Vec<_>, _>>()
            .map(StreamEvent::Batch),
        // Positional kline rows, single or batched.
        Some(Value::Array(_) | Value::Number(_)) => {
            decode_kline_rows(&items).map(StreamEvent::KlineBars)
        }
        Some(other) => Err(WsError::Decode(format!(
            "unclassifiable array element: {}",
            other
        ))),
        None => Ok(StreamEvent::Batch(Vec::new())),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, WsError> {
    serde_json::from_value(value).map_err(|e| WsError::Decode(e.to_string()))
}

/// Subscription handshake acks (`{"result": ..., "id": ...}`) are control
/// noise, not events.
fn is_subscribe_ack(value: &Value) -> bool {
    value.get("id").is_some()
        && (value.get("result").is_some() || value.get("error").is_some())
        && value.get("e").is_none()
        && value.get("stream").is_none()
}

/// A long-lived subscription connection plus the demultiplexer over it.
///
/// Receive-only after the subscribe handshake: every inbound frame is
/// classified and republished as a typed event. A frame that fails to
/// classify yields a per-frame [`WsError::Decode`] and the stream keeps
/// going; a transport failure is yielded once and ends the stream.
pub struct MarketStream {
    session: WsSession,
    terminated: bool,
}

impl MarketStream {
    /// Connect to a stream endpoint. Topic addressing is carried entirely by
    /// the URL; see [`raw_stream_url`] and [`combined_stream_url`].
    #[instrument(skip(config, cancel), fields(url = %url))]
    pub async fn connect(
        config: &WsConfig,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<Self, WsError> {
        // A child token lets close() stop the session without cancelling
        // whatever else the caller's token governs.
        let session = WsSession::connect(config, url, cancel.child_token()).await?;
        Ok(Self {
            session,
            terminated: false,
        })
    }

    /// Subscribe to additional topics on the live connection.
    pub async fn subscribe(&self, streams: &[impl AsRef<str>]) -> Result<(), WsError> {
        if streams.is_empty() {
            return Ok(());
        }
        self.session
            .send_text(subscription_payload("SUBSCRIBE", streams))
            .await
    }

    /// Unsubscribe from topics on the live connection.
    pub async fn unsubscribe(&self, streams: &[impl AsRef<str>]) -> Result<(), WsError> {
        if streams.is_empty() {
            return Ok(());
        }
        self.session
            .send_text(subscription_payload("UNSUBSCRIBE", streams))
            .await
    }

    /// The next typed event, or `None` once the stream has ended (transport
    /// failure already yielded, cancellation, or close).
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, WsError>> {
        loop {
            if self.terminated {
                return None;
            }
            match self.session.recv().await {
                Ok(frame) => {
                    let value: Value = match serde_json::from_str(&frame) {
                        Ok(value) => value,
                        Err(e) => {
                            return Some(Err(WsError::Decode(format!("invalid JSON: {}", e))))
                        }
                    };
                    if is_subscribe_ack(&value) {
                        debug!("ignoring subscription ack");
                        continue;
                    }
                    return Some(classify_value(value));
                }
                Err(WsError::Cancelled) => {
                    self.terminated = true;
                    return None;
                }
                Err(e) => {
                    self.terminated = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Close the underlying session. Idempotent.
    pub async fn close(&mut self) {
        self.terminated = true;
        self.session.close().await;
    }
}

fn subscription_payload(method: &str, streams: &[impl AsRef<str>]) -> String {
    let stream_refs: Vec<&str> = streams.iter().map(|s| s.as_ref()).collect();
    json!({
        "method": method,
        "params": stream_refs,
        "id": 1
    })
    .to_string()
}

/// URL for a single raw stream: `{base}/ws/{stream}`.
#[must_use]
pub fn raw_stream_url(base_url: &str, stream: &str) -> String {
    format!("{}/ws/{}", base_url.trim_end_matches('/'), stream)
}

/// URL for a combined stream: `{base}/stream?streams={a}/{b}/...`.
#[must_use]
pub fn combined_stream_url(base_url: &str, streams: &[impl AsRef<str>]) -> String {
    let base = base_url.trim_end_matches('/');
    if streams.is_empty() {
        return base.to_string();
    }
    let joined = streams
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/stream?streams={}", base, joined)
}
