use crate::core::config::Credential;
use crate::core::errors::WsError;
use crate::core::kernel::signer::{build_signer, canonical_query, Signer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// How a request must be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    /// Public request, no credentials attached.
    #[default]
    None,
    /// API key attached, no timestamp or signature.
    ApiKey,
    /// Timestamp and API key attached, then signed.
    Signed,
}

/// An outbound request envelope, created per call and consumed on finalize.
///
/// Parameters live in a `BTreeMap` so the byte-wise key order required by
/// the canonical signing form falls out of iteration order.
#[derive(Debug, Clone)]
pub struct WsRequest {
    method: String,
    security: SecurityLevel,
    params: BTreeMap<String, Value>,
}

impl WsRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, security: SecurityLevel) -> Self {
        Self {
            method: method.into(),
            security,
            params: BTreeMap::new(),
        }
    }

    /// Attach a parameter. Insertion order is irrelevant to semantics.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub const fn security(&self) -> SecurityLevel {
        self.security
    }
}

/// Correlation-id generator backed by an explicitly owned RNG.
///
/// Ids are UUID-v4-shaped. Uniqueness only has to hold among concurrently
/// outstanding requests, which the single-shot client bounds at one; the
/// seeded constructor exists for deterministic tests.
pub struct CorrelationIds {
    rng: StdRng,
}

impl CorrelationIds {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_id(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill(&mut bytes);
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string()
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Finalizes request envelopes immediately before transmission.
///
/// Holds the credential and its prebuilt signer, so invalid key material is
/// rejected at construction rather than mid-call.
pub struct RequestBuilder {
    ids: CorrelationIds,
    credential: Option<Credential>,
    signer: Option<Box<dyn Signer>>,
}

impl RequestBuilder {
    /// Builder for public (unauthenticated) requests only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: CorrelationIds::new(),
            credential: None,
            signer: None,
        }
    }

    /// Builder that can finalize `ApiKey` and `Signed` requests.
    pub fn with_credential(credential: Credential) -> Result<Self, WsError> {
        let signer = build_signer(&credential)?;
        Ok(Self {
            ids: CorrelationIds::new(),
            credential: Some(credential),
            signer: Some(signer),
        })
    }

    /// Replace the correlation-id generator (used for deterministic tests).
    #[must_use]
    pub fn with_ids(mut self, ids: CorrelationIds) -> Self {
        self.ids = ids;
        self
    }

    /// Finalize a request into its outbound text frame, returning the frame
    /// and its correlation id.
    ///
    /// For `Signed` requests the millisecond timestamp and API key are
    /// injected first, the signature is computed over the canonical form of
    /// everything present at that point, and the signature is injected last.
    pub fn finalize(&mut self, request: WsRequest) -> Result<(String, String), WsError> {
        let timestamp = timestamp_ms()?;
        self.finalize_at(request, timestamp)
    }

    fn finalize_at(
        &mut self,
        request: WsRequest,
        timestamp: u64,
    ) -> Result<(String, String), WsError> {
        let WsRequest {
            method,
            security,
            mut params,
        } = request;
        let id = self.ids.next_id();

        match security {
            SecurityLevel::None => {}
            SecurityLevel::ApiKey => {
                let credential = self.require_credential()?;
                params.insert("apiKey".to_string(), json!(credential.api_key()));
            }
            SecurityLevel::Signed => {
                let credential = self.require_credential()?;
                params.insert("timestamp".to_string(), json!(timestamp));
                params.insert("apiKey".to_string(), json!(credential.api_key()));
                let signer = self
                    .signer
                    .as_ref()
                    .ok_or_else(|| WsError::Signing("no signer configured".to_string()))?;
                let signature = signer.sign(&canonical_query(&params))?;
                params.insert("signature".to_string(), json!(signature));
            }
        }

        let mut envelope = Map::new();
        envelope.insert("id".to_string(), json!(id));
        envelope.insert("method".to_string(), json!(method));
        if !params.is_empty() {
            envelope.insert("params".to_string(), json!(params));
        }
        Ok((Value::Object(envelope).to_string(), id))
    }

    fn require_credential(&self) -> Result<&Credential, WsError> {
        self.credential
            .as_ref()
            .ok_or_else(|| WsError::Signing("request requires credentials".to_string()))
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp_ms() -> Result<u64, WsError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .map_err(|e| WsError::Signing(format!("system time error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::signer::HmacSigner;

    const TEST_SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

    fn signed_builder() -> RequestBuilder {
        let credential = Credential::new("test-api-key".to_string(), TEST_SECRET.to_string());
        RequestBuilder::with_credential(credential)
            .unwrap()
            .with_ids(CorrelationIds::with_seed(7))
    }

    #[test]
    fn test_correlation_ids_are_uuid_shaped_and_seeded_deterministic() {
        let mut a = CorrelationIds::with_seed(42);
        let mut b = CorrelationIds::with_seed(42);
        let id = a.next_id();
        assert_eq!(id, b.next_id());
        assert_eq!(id.len(), 36);
        assert_eq!(id.as_bytes()[14], b'4');
        assert_ne!(id, a.next_id());
    }

    #[test]
    fn test_finalize_public_request_omits_auth_params() {
        let mut builder = RequestBuilder::new().with_ids(CorrelationIds::with_seed(1));
        let request = WsRequest::new("time", SecurityLevel::None);
        let (frame, id) = builder.finalize(request).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["id"].as_str().unwrap(), id);
        assert_eq!(value["method"], "time");
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_finalize_api_key_tier_has_no_timestamp_or_signature() {
        let mut builder = signed_builder();
        let request = WsRequest::new("userDataStream.start", SecurityLevel::ApiKey);
        let (frame, _) = builder.finalize(request).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        let params = value["params"].as_object().unwrap();
        assert_eq!(params["apiKey"], "test-api-key");
        assert!(!params.contains_key("timestamp"));
        assert!(!params.contains_key("signature"));
    }

    #[test]
    fn test_finalize_signed_request_signs_timestamp_and_api_key() {
        let mut builder = signed_builder();
        let request = WsRequest::new("order.place", SecurityLevel::Signed)
            .param("symbol", "BTCUSDT")
            .param("side", "BUY")
            .param("type", "MARKET");
        let (frame, _) = builder.finalize_at(request, 1_737_447_120_000).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        let params = value["params"].as_object().unwrap();

        assert_eq!(params["timestamp"], 1_737_447_120_000_u64);
        assert_eq!(params["apiKey"], "test-api-key");

        // The signature covers everything present before it was injected.
        let mut signed_form = BTreeMap::new();
        for (key, val) in params {
            if key != "signature" {
                signed_form.insert(key.clone(), val.clone());
            }
        }
        let expected = HmacSigner::new(TEST_SECRET)
            .sign(&canonical_query(&signed_form))
            .unwrap();
        assert_eq!(params["signature"].as_str().unwrap(), expected);
    }

    #[test]
    fn test_finalize_signed_without_credential_never_builds_a_frame() {
        let mut builder = RequestBuilder::new();
        let request = WsRequest::new("account.status", SecurityLevel::Signed);
        assert!(matches!(
            builder.finalize(request),
            Err(WsError::Signing(_))
        ));
    }
}
