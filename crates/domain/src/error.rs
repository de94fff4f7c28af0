use std::time::Duration;

/// Shared error type used across every crate in the runtime.
///
/// Tool-execution failures and policy denials are deliberately **not**
/// represented here — those are reported to the model as ordinary
/// `role=tool` messages (see `ToolResult`) rather than propagated as Rust
/// errors. This enum covers failures that terminate a request.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("session busy: {0}")]
    SessionBusy(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("policy blocked tool call: {0}")]
    PolicyBlocked(String),

    #[error("policy circuit breaker open for session {0}")]
    PolicyCircuitOpen(String),

    #[error("approval {0} timed out")]
    ApprovalTimeout(String),

    #[error("approval {0} was denied")]
    ApprovalDenied(String),

    #[error("tool not found: {0}")]
    ToolMissing(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("tool {0} timed out")]
    ToolTimeout(String),

    #[error("iteration limit reached ({0})")]
    IterationLimit(u32),

    #[error("PDA recursion limit reached (depth {0})")]
    PdaRecursionLimit(u32),

    #[error("PDA checkpoint missing for session {0}")]
    PdaCheckpointMissing(String),

    #[error("cancelled")]
    Cancelled,

    #[error("session {0} paused")]
    SessionPaused(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Normalised provider-facing error kind, returned by [`ProviderError`].
///
/// The Provider Router classifies every underlying transport/HTTP failure
/// into one of these before it reaches the agent loop, so retry logic never
/// has to pattern-match on provider-specific strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    ContextOverflow,
    Network,
    InvalidRequest,
    Server,
    Unknown,
}

/// A normalised provider error with retry metadata attached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("provider {provider} ({kind:?}): {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            ProviderErrorKind::RateLimit | ProviderErrorKind::Network | ProviderErrorKind::Server
        );
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, d: Duration) -> Self {
        self.retry_after = Some(d);
        self
    }

    /// Classify a raw HTTP status code plus message into a [`ProviderError`].
    ///
    /// Grounded on the router's former ad hoc `message.contains("HTTP 5xx")`
    /// substring sniffing, generalised into a real classifier over the
    /// numeric status so every caller gets the same answer.
    pub fn from_status(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        match status {
            401 | 403 => Self::new(provider, ProviderErrorKind::Auth, message),
            429 => Self::new(provider, ProviderErrorKind::RateLimit, message),
            400 | 404 | 422 => Self::new(provider, ProviderErrorKind::InvalidRequest, message),
            500..=599 => Self::new(provider, ProviderErrorKind::Server, message),
            _ => Self::new(provider, ProviderErrorKind::Unknown, message),
        }
    }
}

impl From<ProviderError> for Error {
    fn from(e: ProviderError) -> Self {
        Error::Provider {
            provider: e.provider,
            message: e.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_status_is_retryable() {
        let e = ProviderError::from_status("openai", 503, "service unavailable");
        assert_eq!(e.kind, ProviderErrorKind::Server);
        assert!(e.retryable);
    }

    #[test]
    fn auth_status_is_not_retryable() {
        let e = ProviderError::from_status("openai", 401, "bad key");
        assert_eq!(e.kind, ProviderErrorKind::Auth);
        assert!(!e.retryable);
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let e = ProviderError::from_status("openai", 429, "slow down")
            .with_retry_after(Duration::from_secs(5));
        assert_eq!(e.retry_after, Some(Duration::from_secs(5)));
        assert!(e.retryable);
    }
}
