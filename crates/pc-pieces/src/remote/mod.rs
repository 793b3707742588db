//! Remote Store Abstraction
//!
//! The authoritative store for a document's pieces. It is consumed as an
//! opaque service with a create/update/delete/reorder/fetch contract; the
//! engine never assumes anything about its transport.

mod local;
mod memory;

pub use local::LocalRemoteStore;
pub use memory::{Gate, MemoryRemoteStore};

use std::path::Path;

use async_trait::async_trait;
use pc_core::{DocumentId, PieceId};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Content, NewPiece, Piece, PieceUpdate};

/// Remote store errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Content digest mismatch for {0}")]
    Corrupted(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Logical remote operations, used for logging and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Create,
    Update,
    Delete,
    Reorder,
    FetchContent,
}

impl RemoteOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Reorder => "reorder",
            Self::FetchContent => "fetch_content",
        }
    }
}

impl std::fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote store trait - the authoritative side of a document's pieces
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Authoritative ordered list of a document's pieces
    async fn list(&self, document: &DocumentId) -> RemoteResult<Vec<Piece>>;

    /// Store new content and create its record; the store assigns id and numero
    async fn create(&self, document: &DocumentId, new_piece: NewPiece) -> RemoteResult<Piece>;

    /// Partially update a piece's name and/or description
    async fn update(
        &self,
        document: &DocumentId,
        id: &PieceId,
        update: &PieceUpdate,
    ) -> RemoteResult<Piece>;

    /// Delete a piece; the store renumbers the remainder
    async fn delete(&self, document: &DocumentId, id: &PieceId) -> RemoteResult<()>;

    /// Replace the order with the complete list of ids (not a delta)
    async fn reorder(&self, document: &DocumentId, order: &[PieceId]) -> RemoteResult<()>;

    /// Fetch a piece's binary content
    async fn fetch_content(&self, id: &PieceId) -> RemoteResult<Content>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Generate a disk filename (safe for filesystem), keeping the extension
pub fn generate_disk_filename(document: &DocumentId, filename: &str) -> String {
    let short = Uuid::new_v4().simple().to_string();
    let ext = Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("");

    let prefix: String = document
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();

    if ext.is_empty() {
        format!("{}_{}", prefix, &short[..8])
    } else {
        format!("{}_{}.{}", prefix, &short[..8], ext)
    }
}

/// Check that `order` names exactly the ids in `current`
pub(crate) fn is_permutation(current: &[PieceId], order: &[PieceId]) -> bool {
    if current.len() != order.len() {
        return false;
    }
    let mut a: Vec<&PieceId> = current.iter().collect();
    let mut b: Vec<&PieceId> = order.iter().collect();
    a.sort();
    b.sort();
    a == b
}
