//! Typed errors for the aggregation core.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on failure classes. Per-item failures during ingestion and enrichment are
//! collected into [`FetchError`], a compound error that preserves every
//! underlying failure for later reporting.

use thiserror::Error;

/// Errors that can occur in the aggregation core.
#[derive(Debug, Error)]
pub enum UctiError {
    /// Storage operation failed
    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    /// LLM oracle failed
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// HTTP request to an external source failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// One or more per-item failures, preserved as children
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration file missing or malformed
    #[error("config error: {0}")]
    Config(String),

    /// A required configuration section is absent
    #[error("missing [{0}] configuration")]
    MissingConfig(&'static str),

    /// Search query could not be parsed
    #[error("invalid query syntax: {0}")]
    QueryParse(String),

    /// Search-cache payload could not be decoded
    #[error("cache payload error: {0}")]
    CachePayload(String),

    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the LLM oracle, split by retry class.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Provider returned HTTP 429
    #[error("rate limited by provider")]
    RateLimited,

    /// Provider returned HTTP 500
    #[error("provider server error")]
    ServerError,

    /// Any other non-success HTTP status; surfaced to the caller
    #[error("provider HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level failure (connect, timeout)
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The model output did not match the requested schema
    #[error("unexpected model output: {0}")]
    SchemaViolation(String),

    /// All retry attempts were consumed
    #[error("no valid response after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

impl OracleError {
    /// Whether the retry loop should try again after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::SchemaViolation(_)
        )
    }
}

/// Compound error carrying every underlying failure of a batch operation.
///
/// Adapters and enricher stages process many items; a single bad item must
/// not abort the batch. Each failure is wrapped and accumulated here, and the
/// aggregate is returned once the batch completes.
#[derive(Debug, Error)]
#[error("{message} ({} underlying)", children.len())]
pub struct FetchError {
    message: String,
    children: Vec<UctiError>,
}

impl FetchError {
    pub fn new(message: impl Into<String>, children: Vec<UctiError>) -> Self {
        Self {
            message: message.into(),
            children,
        }
    }

    /// Wrap a single failure.
    pub fn single(message: impl Into<String>, child: UctiError) -> Self {
        Self::new(message, vec![child])
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn children(&self) -> &[UctiError] {
        &self.children
    }

    /// Depth-first walk over all leaf errors, recursing through nested
    /// compounds.
    pub fn flatten(&self) -> Vec<&UctiError> {
        let mut leaves = Vec::new();
        for child in &self.children {
            match child {
                UctiError::Fetch(inner) => leaves.extend(inner.flatten()),
                other => leaves.push(other),
            }
        }
        leaves
    }
}

/// Accumulates per-item failures during a batch, then resolves into either
/// success or a single [`FetchError`].
#[derive(Debug, Default)]
pub struct ErrorBatch {
    errors: Vec<UctiError>,
}

impl ErrorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: UctiError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Resolve the batch: `Ok(())` when nothing failed, otherwise the
    /// compound error with the given message.
    pub fn into_result(self, message: impl Into<String>) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(FetchError::new(message, self.errors).into())
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, UctiError>;
