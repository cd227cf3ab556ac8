use thiserror::Error;

/// Failure delivered through a submission completion.
///
/// Cancellation is not represented: a cancelled operation never completes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("remote error: {0}")]
    RemoteError(String),
}

impl TransferFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteError(message.into())
    }

    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::RemoteError(message) => Some(message),
            Self::TransportFailure(_) => None,
        }
    }
}
