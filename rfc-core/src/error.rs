//! Error taxonomy shared by the directory service and peer nodes.

use crate::protocol::StatusCode;

/// Every failure a request can run into, on either side of a connection.
/// Handlers turn these into response messages via [`Error::status`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("timed out")]
    Timeout,
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("bad format: {0}")]
    BadFormat(String),
    #[error("not registered")]
    NotRegistered,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
    /// The remote side answered with a non-success status.
    #[error("rejected with {status}: {reason}")]
    Rejected { status: StatusCode, reason: String },
}

impl Error {
    /// Status code a handler answers with when this error ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Transport(_) | Error::Timeout | Error::Internal(_) => StatusCode::InternalError,
            Error::FrameTooLarge(_) | Error::BadFormat(_) => StatusCode::BadRequest,
            Error::NotRegistered => StatusCode::Forbidden,
            Error::NotFound(_) => StatusCode::NotFound,
            Error::Rejected { status, .. } => *status,
        }
    }

    pub(crate) fn bad_format(reason: impl Into<String>) -> Self {
        Error::BadFormat(reason.into())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

pub type Result<T> = std::result::Result<T, Error>;
