//! Common types used throughout Pieces RS

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of the legal document that owns a collection of pieces
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Server-assigned piece identifier.
///
/// Opaque and stable for the lifetime of the piece; never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(String);

impl PieceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier in the `piece_<12 hex>` form
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("piece_{}", &hex[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PieceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PieceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_piece_id_shape() {
        let id = PieceId::generate();
        assert!(id.as_str().starts_with("piece_"));
        assert_eq!(id.as_str().len(), "piece_".len() + 12);
        assert_ne!(id, PieceId::generate());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = PieceId::new("piece_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"piece_abc\"");

        let doc: DocumentId = serde_json::from_str("\"doc_1\"").unwrap();
        assert_eq!(doc.as_str(), "doc_1");
    }
}
