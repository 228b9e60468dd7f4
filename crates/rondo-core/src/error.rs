use std::time::Duration;
use thiserror::Error;

/// A convenience `Result` alias using [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

/// Error raised by a tool implementation during invocation.
#[derive(Debug, Clone, Error)]
#[error("tool '{tool}' failed: {message}")]
pub struct ToolError {
    /// Name of the tool that failed.
    pub tool: String,
    /// Human-readable failure description.
    pub message: String,
}

impl ToolError {
    /// Creates a new tool error.
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Top-level error type for the orchestration engine.
///
/// The variants map one-to-one onto the retry classification: only
/// [`EngineError::RateLimited`] and [`EngineError::Transient`] are
/// eligible for backoff-and-retry, everything else aborts.
#[derive(Debug, Error)]
pub enum EngineError {
    /// HTTP 429 or a vendor-specific rate-limit signal.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Vendor error text.
        message: String,
        /// Vendor-supplied retry-after hint, when one was present.
        retry_after: Option<Duration>,
    },

    /// Timeout, 5xx, or connection-level failure.
    #[error("transient error: {0}")]
    Transient(String),

    /// Auth failure, malformed request, or configuration error.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// The request cannot be represented on this provider (raised
    /// pre-flight, before any network call).
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// A tool invocation failed. Captured as an `is_error` tool result
    /// rather than propagated, so the model can recover.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The round ceiling was hit without the tool loop converging.
    #[error("round limit of {rounds} exceeded")]
    RoundLimitExceeded {
        /// The configured ceiling.
        rounds: u32,
    },

    /// The turn was interrupted by the user.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Retry classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable with backoff, honoring vendor retry-after hints.
    RateLimited,
    /// Retryable with backoff.
    Transient,
    /// Never retried.
    Fatal,
}

impl EngineError {
    /// Classifies this error for the retry controller.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Transient(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    /// The vendor-supplied retry-after hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The pipeline stage at which a turn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Canonical ↔ wire translation (includes pre-flight capability checks).
    Translate,
    /// The vendor request itself.
    Network,
    /// Tool dispatch.
    Tool,
    /// Loop safeguards: round ceiling, repeat detection, cancellation.
    Loop,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Translate => "translate",
            Self::Network => "network",
            Self::Tool => "tool",
            Self::Loop => "loop",
        };
        f.write_str(s)
    }
}

/// Terminal failure of a user turn, carrying enough context for a
/// user-visible message: which stage failed and whether the retry
/// budget was spent getting there.
#[derive(Debug, Error)]
pub struct RoundFailure {
    /// Stage at which the turn failed.
    pub stage: FailureStage,
    /// True when the retry controller ran out of attempts.
    pub retries_exhausted: bool,
    /// The underlying error.
    #[source]
    pub source: EngineError,
}

impl std::fmt::Display for RoundFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let suffix = if self.retries_exhausted {
            " (retries exhausted)"
        } else {
            ""
        };
        write!(f, "{} stage failed{suffix}: {}", self.stage, self.source)
    }
}

impl RoundFailure {
    /// Creates a failure that did not consume the retry budget.
    pub fn new(stage: FailureStage, source: EngineError) -> Self {
        Self {
            stage,
            retries_exhausted: false,
            source,
        }
    }

    /// Creates a failure after exhausting retries.
    pub fn exhausted(stage: FailureStage, source: EngineError) -> Self {
        Self {
            stage,
            retries_exhausted: true,
            source,
        }
    }
}
