/// Connection and messaging kernel.
///
/// The kernel owns the transport-facing pieces of the runtime and nothing
/// endpoint-specific:
///
/// - [`WsSession`]: one physical connection's lifecycle — dial, inbound
///   read loop, passive liveness loop, teardown.
/// - [`Signer`] and its implementations ([`HmacSigner`], [`RsaSigner`],
///   [`Ed25519Signer`]): deterministic signatures over the canonical
///   parameter form.
/// - [`WsRequest`] / [`RequestBuilder`]: envelope assembly, correlation
///   ids from an injected RNG, auth-tier parameter injection.
/// - [`WsApiClient`]: the single-shot request/response exchange that ties
///   the above together, one fresh session per call.
///
/// Reconnection, retry and rate-limit policy are caller responsibilities;
/// nothing in this module retries.
pub mod request;
pub mod rpc;
pub mod session;
pub mod signer;

pub use request::{CorrelationIds, RequestBuilder, SecurityLevel, WsRequest};
pub use rpc::{decode_response, ApiError, RateLimit, WsApiClient, WsResponse};
pub use session::WsSession;
pub use signer::{
    build_signer, canonical_query, Ed25519Signer, HmacSigner, RsaSigner, Signer,
};
