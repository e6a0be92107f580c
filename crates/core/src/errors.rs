use thiserror::Error;

/// Unified error type for the entire crypto-portfolio-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Storage / File ──────────────────────────────────────────────
    #[error("Invalid store file format: {0}")]
    InvalidFileFormat(String),

    #[error("Unsupported store file version: {0}")]
    UnsupportedVersion(u16),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed — wrong passphrase or corrupted ciphertext")]
    Decryption,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),

    #[error("Store transaction failed: {0}")]
    Transaction(String),

    // ── API / Network ───────────────────────────────────────────────
    #[error("API error ({provider}): {message}")]
    Api {
        provider: String,
        message: String,
    },

    #[error("Server responded with HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Sync is disabled")]
    SyncDisabled,

    #[error("Rate limited, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    // ── Business Logic ──────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // ── Configuration ───────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Recoverable failures to reach the server-of-record.
    /// Callers fall back to local state and retry later.
    pub fn is_connectivity(&self) -> bool {
        match self {
            CoreError::Network(_) | CoreError::Timeout(_) | CoreError::SyncDisabled => true,
            CoreError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// The server understood the request and refused it. Retrying the same
    /// payload will not help.
    pub fn is_rejection(&self) -> bool {
        match self {
            CoreError::ValidationError(_) | CoreError::NotFound { .. } => true,
            CoreError::Http { status, .. } => (400..500).contains(status) && *status != 429,
            _ => false,
        }
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors carry the full URL; strip the query so ids and
        // credentials passed as parameters never reach the logs.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        if e.is_timeout() {
            return CoreError::Timeout(sanitized);
        }
        // The server answered; its body just did not parse.
        if e.is_decode() {
            return CoreError::Deserialization(sanitized);
        }
        if let Some(status) = e.status() {
            return CoreError::Http {
                status: status.as_u16(),
                message: sanitized,
            };
        }
        CoreError::Network(sanitized)
    }
}

impl From<aes_gcm::Error> for CoreError {
    fn from(_: aes_gcm::Error) -> Self {
        CoreError::Decryption
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(e: config::ConfigError) -> Self {
        CoreError::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CoreError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        CoreError::Timeout(e.to_string())
    }
}
