pub mod core;
pub mod stream;

pub use core::config::{Credential, SignatureType, WsConfig};
pub use core::errors::WsError;
pub use core::kernel::{
    CorrelationIds, RequestBuilder, SecurityLevel, WsApiClient, WsRequest, WsResponse, WsSession,
};
pub use stream::{MarketStream, StreamEvent};
