/// Shared error type used across all Nexus crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("routing: {0}")]
    Routing(String),

    #[error("handoff: {0}")]
    Handoff(String),

    /// An edge tool needs human approval. Carries the pending request id so
    /// the caller can wait on it or surface it to a reviewer.
    #[error("approval required (request {request_id})")]
    ApprovalRequired { request_id: String },

    #[error("approval denied: {reason}")]
    ApprovalDenied { reason: String },

    #[error("approval expired")]
    ApprovalExpired,

    /// Intermediate state observed while polling a pending approval.
    #[error("approval pending")]
    ApprovalPending,

    /// The approval record was already decided (or expired); the attempted
    /// decision did not mutate it.
    #[error("approval already decided: {0}")]
    ApprovalConflict(String),

    #[error("subagent run not found: {0}")]
    RunNotFound(String),

    #[error("runtime: {0}")]
    Runtime(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The pending request id, when this is an approval-required error.
    pub fn approval_request_id(&self) -> Option<&str> {
        match self {
            Error::ApprovalRequired { request_id } => Some(request_id),
            _ => None,
        }
    }

    /// Whether this error is terminal for an approval wait (denied/expired).
    pub fn is_approval_terminal(&self) -> bool {
        matches!(self, Error::ApprovalDenied { .. } | Error::ApprovalExpired)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
