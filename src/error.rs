use thiserror::Error;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum MeshError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Discovery / admission errors
    #[error("Registration invalid: {0}")]
    RegistrationInvalid(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // Routing errors
    #[error("No healthy candidate for capability: {capability}")]
    NoHealthyCandidate { capability: String },

    #[error("Unable to serve capability {capability}: {last_error}")]
    UnableToServe {
        capability: String,
        last_error: String,
    },

    #[error("Agent call failed: {0}")]
    AgentCall(#[from] AgentCallError),

    // Approval errors
    #[error("Approval not found: {0}")]
    ApprovalNotFound(uuid::Uuid),

    #[error("Approval {0} is already being awaited")]
    ApprovalAlreadyAwaited(uuid::Uuid),

    #[error("No decision received for approval {0} before the caller deadline")]
    DecisionWaitTimeout(uuid::Uuid),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MeshError
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors produced by a single call or probe against one agent.
///
/// `Unreachable`, `Timeout` and `Internal` are retryable against a
/// different candidate; `Rejected` is not and propagates to the caller.
#[derive(Error, Debug, Clone)]
pub enum AgentCallError {
    #[error("Agent unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Agent call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Agent internal error (status {status}): {reason}")]
    Internal { status: u16, reason: String },

    #[error("Agent rejected the request (status {status}): {reason}")]
    Rejected { status: u16, reason: String },
}

impl AgentCallError {
    /// Whether the router may retry this error against another candidate.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AgentCallError::Rejected { .. })
    }
}
