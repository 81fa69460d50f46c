use thiserror::Error;

/// Error taxonomy for the connection and messaging runtime.
///
/// Protocol-level API errors (a response whose `error` field is populated)
/// are not represented here: they are delivered as data inside
/// [`crate::core::kernel::WsResponse`].
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection or handshake failure. Fatal to the session, never retried
    /// internally.
    #[error("dial failed: {0}")]
    Dial(String),

    /// Secret/key material invalid or a cryptographic primitive failed.
    /// The request is never transmitted.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Write to an open socket failed. Fatal to the session.
    #[error("send failed: {0}")]
    Send(String),

    /// Inbound read failed (peer closed, protocol violation, I/O failure).
    /// Fatal to the session, surfaced once.
    #[error("read failed: {0}")]
    Read(String),

    /// A frame could not be classified or its JSON shape did not match the
    /// expected variant. Non-fatal for streams, fatal for the single
    /// in-flight call.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Caller-supplied cancellation fired before completion.
    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
}
