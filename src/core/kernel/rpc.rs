use crate::core::config::{Credential, WsConfig};
use crate::core::errors::WsError;
use crate::core::kernel::request::{CorrelationIds, RequestBuilder, WsRequest};
use crate::core::kernel::session::WsSession;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Protocol-level error body. Delivered as data inside [`WsResponse`],
/// never as a transport fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i64,
    #[serde(rename = "msg")]
    pub message: String,
}

/// Rate-limit usage as reported by the exchange. Reported only; this crate
/// never enforces limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub rate_limit_type: String,
    pub interval: String,
    pub interval_num: u32,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// One inbound response envelope. The `result` payload stays opaque here;
/// the per-endpoint layer decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(
        rename = "rateLimits",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub rate_limits: Vec<RateLimit>,
}

impl WsResponse {
    /// True when the exchange reported no protocol-level error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Single-shot request/response client: one call, one fresh connection,
/// exactly one reply or one error, guaranteed teardown.
///
/// The at-most-one-in-flight invariant is structural: `call` borrows the
/// client mutably and the session it opens never escapes the call.
pub struct WsApiClient {
    config: WsConfig,
    builder: RequestBuilder,
}

impl WsApiClient {
    /// Client for public requests only.
    #[must_use]
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            builder: RequestBuilder::new(),
        }
    }

    /// Client that can issue `ApiKey` and `Signed` requests. Invalid key
    /// material is rejected here, before anything is dialed.
    pub fn with_credential(config: WsConfig, credential: Credential) -> Result<Self, WsError> {
        Ok(Self {
            config,
            builder: RequestBuilder::with_credential(credential)?,
        })
    }

    /// Replace the correlation-id generator (used for deterministic tests).
    #[must_use]
    pub fn with_ids(mut self, ids: CorrelationIds) -> Self {
        self.builder = self.builder.with_ids(ids);
        self
    }

    /// Execute exactly one request/response exchange.
    ///
    /// Dial and signing failures return before any write. After the send,
    /// the call resolves to the first of: one decoded response, the session's
    /// terminal error, or cancellation. The session is closed on every exit
    /// path.
    #[instrument(skip(self, request, cancel), fields(method = %request.method()))]
    pub async fn call(
        &mut self,
        request: WsRequest,
        cancel: &CancellationToken,
    ) -> Result<WsResponse, WsError> {
        let mut session =
            WsSession::connect(&self.config, &self.config.endpoint, cancel.child_token()).await?;
        let result = Self::exchange(&mut self.builder, &mut session, request).await;
        session.close().await;
        result
    }

    async fn exchange(
        builder: &mut RequestBuilder,
        session: &mut WsSession,
        request: WsRequest,
    ) -> Result<WsResponse, WsError> {
        let (frame, _id) = builder.finalize(request)?;
        session.send_text(frame).await?;
        let reply = session.recv().await?;
        decode_response(&reply)
    }
}

/// Decode one inbound frame as a response envelope.
pub fn decode_response(frame: &str) -> Result<WsResponse, WsError> {
    serde_json::from_str(frame)
        .map_err(|e| WsError::Decode(format!("invalid response envelope: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_round_trip_preserves_id_status_error() {
        let response = WsResponse {
            id: Some("9d32157c-a556-4d27-9866-66760a174b57".to_string()),
            status: 400,
            result: None,
            error: Some(ApiError {
                code: -1021,
                message: "Timestamp for this request is outside of the recvWindow.".to_string(),
            }),
            rate_limits: Vec::new(),
        };
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded = decode_response(&encoded).unwrap();
        assert_eq!(decoded.id, response.id);
        assert_eq!(decoded.status, response.status);
        assert_eq!(decoded.error, response.error);
        assert!(!decoded.is_success());
    }

    #[test]
    fn test_decodes_success_envelope_with_rate_limits() {
        let frame = json!({
            "id": "43ee6c1a",
            "status": 200,
            "result": {"serverTime": 1737447120000_i64},
            "rateLimits": [{
                "rateLimitType": "REQUEST_WEIGHT",
                "interval": "MINUTE",
                "intervalNum": 1,
                "limit": 6000,
                "count": 1
            }]
        })
        .to_string();
        let response = decode_response(&frame).unwrap();
        assert!(response.is_success());
        assert_eq!(response.status, 200);
        assert_eq!(response.rate_limits.len(), 1);
        assert_eq!(response.rate_limits[0].rate_limit_type, "REQUEST_WEIGHT");
        assert_eq!(
            response.result.as_ref().unwrap()["serverTime"],
            1_737_447_120_000_i64
        );
    }

    #[test]
    fn test_malformed_envelope_is_a_decode_error() {
        assert!(matches!(
            decode_response("{\"id\": 1,"),
            Err(WsError::Decode(_))
        ));
        assert!(matches!(
            decode_response("{\"id\": \"x\"}"),
            Err(WsError::Decode(_))
        ));
    }
}
