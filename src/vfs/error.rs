use thiserror::Error;

use crate::storage::StoreError;

/// Adapter-level failure / 虚拟文件系统错误
#[derive(Debug, Error)]
pub enum VfsError {
    /// Malformed identity or failed liveness probe
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("not found: {0}")]
    NotFound(String),

    /// Any other failed store call (network, permission, protocol)
    #[error("store request failed: {0}")]
    StoreRequestFailure(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// The client's byte source failed mid-upload
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
}

impl From<StoreError> for VfsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => VfsError::NotFound(what),
            StoreError::Request(msg) => VfsError::StoreRequestFailure(msg),
        }
    }
}

pub type VfsResult<T> = std::result::Result<T, VfsError>;
