//! Server errors and their HTTP status mapping.

use ffs_core::FsError;
use hyper::StatusCode;
use thiserror::Error;

/// Errors raised while serving a request or running a listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or accepting on the listening socket failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing filesystem failed.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The request body could not be read.
    #[error("Reading request body: {0}")]
    Body(#[from] hyper::Error),

    /// A `multipart/form-data` body was malformed.
    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] multer::Error),

    /// A blocking filesystem task panicked or was cancelled.
    #[error("Filesystem task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    /// Status code reported to HTTP clients.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Fs(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ServerError::Body(_) | ServerError::Multipart(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::from(FsError::not_found("/x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::from(FsError::Internal("bogus".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServerError::from(multer::Error::IncompleteStream).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
