use thiserror::Error;

/// Failures raised by an interactive device session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport could not be established; worth retrying.
    #[error("connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },
    /// Credentials were rejected. Never retried.
    #[error("authentication rejected by {host}")]
    Auth { host: String },
    /// Expect pattern was not seen often enough before the deadline.
    #[error("timed out waiting for '{pattern}' ({seen}/{wanted} occurrences)")]
    Timeout {
        pattern: String,
        seen: usize,
        wanted: usize,
        partial: String,
    },
    #[error("channel closed by remote side")]
    ChannelClosed,
    #[error("session i/o error: {0}")]
    Io(String),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Connect { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no current device selected")]
    NoCurrentDevice,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid query '{query}' at offset {offset}: {reason}")]
pub struct QueryError {
    pub query: String,
    pub offset: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("environment variable '{0}' is not set")]
    MissingEnv(String),
    #[error("credential '{0}' not found")]
    MissingCredential(String),
    #[error("encrypted secret found but no decryptor is configured")]
    NoDecryptor,
    #[error("secret decryption failed: {0}")]
    Decrypt(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),
    #[error("driver '{0}' not found in action document")]
    UnknownDriver(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("unexpected status {status} from {url} (expected {expected})")]
    UnexpectedStatus {
        url: String,
        status: u16,
        expected: u16,
    },
    #[error("unsupported http method '{0}'")]
    Method(String),
}
