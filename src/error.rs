//! Error types for the mirror relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Telegram API error: {0}")]
    Api(#[from] ApiError),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage-related errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Bot API call errors.
///
/// `Telegram` carries the platform's error code and, for rate limits,
/// the `retry_after` hint in seconds.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Telegram API error {code}: {description}")]
    Telegram {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Rate limits (429) and server-side errors are transient; 4xx
    /// rejections (chat not found, bot not admin, bad content) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Telegram { code, .. } => *code == 429 || *code >= 500,
            ApiError::InvalidResponse(_) => true,
        }
    }
}

/// Content normalization errors.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Unsupported content kind: {detail}")]
    UnsupportedContent { detail: String },
}

/// Link-rule compilation and application errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule {id}: invalid pattern: {source}")]
    BadPattern {
        id: i64,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("Rule {id}: invalid replacement template: {detail}")]
    BadTemplate { id: i64, detail: String },

    #[error(
        "Rule {id}: replacement references group {group} but the pattern only defines {available}"
    )]
    GroupOutOfRange {
        id: i64,
        group: usize,
        available: usize,
    },

    #[error("Rule {id}: group {group} did not participate in a match")]
    UnmatchedGroup { id: i64, group: usize },
}

/// Mapping-table errors.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Channel {chat_id} cannot be mapped to itself")]
    SelfMapping { chat_id: i64 },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
