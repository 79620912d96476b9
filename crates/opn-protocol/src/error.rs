use thiserror::Error;

/// Errors raised by identifier parsing and by external collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid stream part id: {0}")]
    InvalidStreamPart(String),

    #[error("Malformed coordination message: {0}")]
    MalformedMessage(String),

    #[error("Failed to parse metadata: {0}")]
    Metadata(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ProtocolError {
    /// Whether retrying on the next scheduled tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Chain(_) | Self::Transport(_))
    }
}
