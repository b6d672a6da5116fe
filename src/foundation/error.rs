use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    TransientChain,
    ChainState,
    Protocol,
    Config,
    InvariantViolation,
    SignerNotFound,
    DuplicateSigner,
    Storage,
    Serialization,
    Bitcoin,
    Transport,
    Timeout,
    Cancelled,
    Message,
}

/// Crate-wide error type.
///
/// The first five variants map one-to-one onto the handling policy at the
/// coordinator boundary: transient chain errors are retried, chain-state
/// errors end the handler cleanly at warn level, protocol errors abandon the
/// current job, configuration errors make the coordinator refuse the keep,
/// and invariant violations skip the keep entirely.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transient chain error during {operation}: {details}")]
    TransientChain { operation: String, details: String },

    #[error("chain state not applicable: {0}")]
    ChainState(String),

    #[error("protocol error during {operation}: {details}")]
    Protocol { operation: String, details: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("no signer for keep {0}")]
    SignerNotFound(String),

    #[error("signer already registered for keep {0}")]
    DuplicateSigner(String),

    #[error("storage error during {operation}: {details}")]
    Storage { operation: String, details: String },

    #[error("{format} serialization error: {details}")]
    Serialization { format: String, details: String },

    #[error("bitcoin error during {operation}: {details}")]
    Bitcoin { operation: String, details: String },

    #[error("transport error during {operation}: {details}")]
    Transport { operation: String, details: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

impl NodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::TransientChain { .. } => ErrorCode::TransientChain,
            NodeError::ChainState(_) => ErrorCode::ChainState,
            NodeError::Protocol { .. } => ErrorCode::Protocol,
            NodeError::Config(_) => ErrorCode::Config,
            NodeError::InvariantViolation(_) => ErrorCode::InvariantViolation,
            NodeError::SignerNotFound(_) => ErrorCode::SignerNotFound,
            NodeError::DuplicateSigner(_) => ErrorCode::DuplicateSigner,
            NodeError::Storage { .. } => ErrorCode::Storage,
            NodeError::Serialization { .. } => ErrorCode::Serialization,
            NodeError::Bitcoin { .. } => ErrorCode::Bitcoin,
            NodeError::Transport { .. } => ErrorCode::Transport,
            NodeError::Timeout { .. } => ErrorCode::Timeout,
            NodeError::Cancelled => ErrorCode::Cancelled,
            NodeError::Message(_) => ErrorCode::Message,
        }
    }

    /// Whether a retry runner should re-invoke the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::TransientChain { .. } | NodeError::Transport { .. })
    }

    pub fn chain(operation: impl Into<String>, details: impl ToString) -> Self {
        NodeError::TransientChain { operation: operation.into(), details: details.to_string() }
    }

    pub fn protocol(operation: impl Into<String>, details: impl ToString) -> Self {
        NodeError::Protocol { operation: operation.into(), details: details.to_string() }
    }

    pub fn bitcoin(operation: impl Into<String>, details: impl ToString) -> Self {
        NodeError::Bitcoin { operation: operation.into(), details: details.to_string() }
    }

    pub fn transport(operation: impl Into<String>, details: impl ToString) -> Self {
        NodeError::Transport { operation: operation.into(), details: details.to_string() }
    }
}

impl From<io::Error> for NodeError {
    fn from(err: io::Error) -> Self {
        NodeError::Storage { operation: "io".to_string(), details: err.to_string() }
    }
}

impl From<bincode::Error> for NodeError {
    fn from(err: bincode::Error) -> Self {
        NodeError::Serialization { format: "bincode".to_string(), details: err.to_string() }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Serialization { format: "json".to_string(), details: err.to_string() }
    }
}

impl From<hex::FromHexError> for NodeError {
    fn from(err: hex::FromHexError) -> Self {
        NodeError::Serialization { format: "hex".to_string(), details: err.to_string() }
    }
}

impl From<secp256k1::Error> for NodeError {
    fn from(err: secp256k1::Error) -> Self {
        NodeError::Protocol { operation: "secp256k1".to_string(), details: err.to_string() }
    }
}

// NOTE: Avoid adding generic "stringly" error conversions here.
// Use structured `NodeError` variants at the call site to preserve context.
