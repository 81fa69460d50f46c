use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Signing algorithm used for authenticated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureType {
    /// HMAC-SHA256 over the canonical query, hex-encoded.
    #[default]
    Hmac,
    /// RSA PKCS#1 v1.5 over the SHA-256 digest, base64-encoded.
    Rsa,
    /// Ed25519 over the raw canonical query, base64-encoded.
    Ed25519,
}

impl FromStr for SignatureType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hmac" => Ok(Self::Hmac),
            "rsa" => Ok(Self::Rsa),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(ConfigError::InvalidConfiguration(format!(
                "unknown signature type: {}",
                other
            ))),
        }
    }
}

/// API credentials plus the signing algorithm they are meant for.
///
/// Immutable for the lifetime of a client instance. Secrets are wrapped in
/// [`Secret`] and never appear in `Debug` or `Serialize` output.
#[derive(Debug, Clone)]
pub struct Credential {
    api_key: Secret<String>,
    api_secret: Secret<String>,
    signature_type: SignatureType,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for Credential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Credential", 3)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("api_secret", "[REDACTED]")?;
        state.serialize_field("signature_type", &format!("{:?}", self.signature_type))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CredentialHelper {
            api_key: String,
            api_secret: String,
            signature_type: Option<String>,
        }

        let helper = CredentialHelper::deserialize(deserializer)?;
        let signature_type = match helper.signature_type {
            Some(s) => s.parse().map_err(serde::de::Error::custom)?,
            None => SignatureType::default(),
        };
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            api_secret: Secret::new(helper.api_secret),
            signature_type,
        })
    }
}

impl Credential {
    /// Create a credential signing with HMAC-SHA256 (the default tier).
    #[must_use]
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
            signature_type: SignatureType::Hmac,
        }
    }

    /// Select a different signing algorithm.
    #[must_use]
    pub fn with_signature_type(mut self, signature_type: SignatureType) -> Self {
        self.signature_type = signature_type;
        self
    }

    /// Create a credential from environment variables.
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_KEY`
    /// - `{PREFIX}_API_SECRET`
    /// - `{PREFIX}_SIGNATURE_TYPE` (optional: `hmac`, `rsa` or `ed25519`;
    ///   defaults to `hmac`)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let api_key_var = format!("{}_API_KEY", prefix.to_uppercase());
        let api_secret_var = format!("{}_API_SECRET", prefix.to_uppercase());
        let signature_type_var = format!("{}_SIGNATURE_TYPE", prefix.to_uppercase());

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;
        let api_secret = env::var(&api_secret_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_secret_var))?;
        let signature_type = match env::var(&signature_type_var) {
            Ok(s) => s.parse()?,
            Err(_) => SignatureType::default(),
        };

        Ok(Self {
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
            signature_type,
        })
    }

    /// Create a credential from a .env file and environment variables.
    ///
    /// Loads the file first (a missing file is not an error), then reads the
    /// standard environment variable names.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(".env") {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "failed to load .env file: {}",
                    e
                )));
            }
        }
        Self::from_env(prefix)
    }

    /// Get the API key (use carefully - exposes the secret).
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get the API secret (use carefully - exposes the secret).
    pub fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }

    #[must_use]
    pub const fn signature_type(&self) -> SignatureType {
        self.signature_type
    }
}

/// Connection-level tuning for one WebSocket session.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Endpoint URL for single-shot API calls (`wss://...`).
    pub endpoint: String,
    /// Deadline for the connection handshake.
    pub connect_timeout: Duration,
    /// Interval between client-initiated liveness pings.
    pub ping_interval: Duration,
    /// Write deadline for a single liveness ping.
    pub ping_write_deadline: Duration,
    /// How long the session tolerates not observing a pong before the
    /// liveness loop stops sustaining the connection.
    pub pong_timeout: Duration,
    /// Depth of the inbound frame queue. Small on purpose: a slow consumer
    /// applies backpressure to the read loop instead of growing memory.
    pub frame_queue_depth: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://ws-api.binance.com:443/ws-api/v3".to_string(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(60),
            ping_write_deadline: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(180),
            frame_queue_depth: 8,
        }
    }
}

impl WsConfig {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    #[must_use]
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
