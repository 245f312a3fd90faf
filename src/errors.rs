use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Missing or invalid configuration for the requested operation.
    Config(String),
    /// Connection-level failure talking to an external source (retryable).
    Transport(String),
    /// External source answered with a non-success status or an error body.
    ExternalApiError(String),
    /// Quota-limited source refused the request; the whole run must stop.
    QuotaExhausted(String),
    /// Response body could not be decoded.
    Decode(String),
    /// Store writes keep failing; the circuit breaker refused further calls.
    StoreUnavailable(String),
    /// Internal error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transport(_) => true,
            AppError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether this error must terminate the current run instead of only the
    /// record being processed.
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::QuotaExhausted(_) | AppError::Config(_) | AppError::StoreUnavailable(_) => {
                true
            }
            AppError::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Owned copy of an error that is shared (e.g. behind an `Arc`), keeping
    /// its kind. A database error cannot be cloned and becomes an
    /// `InternalError`, which classifies the same way.
    pub fn duplicate(&self) -> Self {
        match self {
            AppError::DatabaseError(e) => AppError::InternalError(format!("Database error: {}", e)),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::Config(msg) => AppError::Config(msg.clone()),
            AppError::Transport(msg) => AppError::Transport(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::QuotaExhausted(msg) => AppError::QuotaExhausted(msg.clone()),
            AppError::Decode(msg) => AppError::Decode(msg.clone()),
            AppError::StoreUnavailable(msg) => AppError::StoreUnavailable(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: Box::new(source.duplicate()),
                context: context.clone(),
            },
        }
    }

    /// Maps a reqwest failure, separating connection problems from the rest.
    pub fn from_request(label: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AppError::Transport(format!("{} request failed: {}", label, err))
        } else if err.is_decode() {
            AppError::Decode(format!("Failed to parse {} response: {}", label, err))
        } else {
            AppError::ExternalApiError(format!("{} request failed: {}", label, err))
        }
    }

    /// Maps a non-success status. Gateway failures (502, 503, 504) are
    /// transport-level and retryable; every other status is an API error.
    pub fn from_status(label: &str, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            502..=504 => AppError::Transport(format!("{} returned status {}", label, status)),
            _ => AppError::ExternalApiError(format!("{} returned status {}", label, status)),
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::QuotaExhausted(msg) => write!(f, "Quota exhausted: {}", msg),
            AppError::Decode(msg) => write!(f, "Decode error: {}", msg),
            AppError::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::from_request("HTTP", err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
