//! Error taxonomy for piece operations

use pc_core::{Notice, PieceId};
use thiserror::Error;

use crate::remote::RemoteError;

/// Local, pre-network validation failures. Never sent to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },
    #[error("Piece name is required")]
    MissingName,
    #[error("No file selected")]
    MissingFile,
}

/// Piece operation errors
#[derive(Debug, Error)]
pub enum PieceError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Network error: {0}")]
    Network(#[from] RemoteError),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Preview not available for content type {0}")]
    UnsupportedType(String),
    #[error("Piece not found: {0}")]
    NotFound(PieceId),
    #[error("Preview handle already released")]
    HandleReleased,
    #[error("Preview request superseded")]
    Superseded,
    #[error("No pieces to list")]
    EmptyManifest,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PieceResult<T> = Result<T, PieceError>;

impl PieceError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// The transient notice shown to the user for this failure
    pub fn notice(&self) -> Notice {
        match self {
            PieceError::Validation(ValidationError::FileTooLarge { max, .. }) => Notice::error(
                format!("The file exceeds the maximum size of {} MB", max / (1024 * 1024)),
            ),
            PieceError::Validation(ValidationError::MissingName) => {
                Notice::error("Please fill in the piece name")
            }
            PieceError::Validation(ValidationError::MissingFile) => {
                Notice::error("Please select a file")
            }
            PieceError::Network(e) => Notice::error(format!("Request failed: {}", e)),
            PieceError::UnsupportedType(_) => {
                Notice::info("Preview not available for this file type")
            }
            PieceError::NotFound(_) => Notice::error("Piece not found"),
            PieceError::EmptyManifest => Notice::error("No pieces to list"),
            PieceError::Superseded | PieceError::HandleReleased => {
                Notice::info("Preview closed")
            }
            PieceError::InvariantViolation(_) | PieceError::Io(_) => {
                Notice::error(format!("Internal error: {}", self))
            }
        }
    }
}
