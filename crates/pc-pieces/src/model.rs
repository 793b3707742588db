//! Piece Model
//!
//! A piece is one exhibit attached to a legal document.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use pc_core::{DocumentId, PieceId};
use serde::{Deserialize, Serialize};

/// Fallback content type when neither the client nor the filename tells us
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Whether content of this type can be shown in the preview surface
pub fn is_previewable(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type == "application/pdf"
}

/// Display category of a piece's file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Pdf,
    Spreadsheet,
    Word,
    Other,
}

impl FileKind {
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else if mime_type.contains("pdf") {
            Self::Pdf
        } else if mime_type.contains("spreadsheet") || mime_type.contains("excel") {
            Self::Spreadsheet
        } else if mime_type.contains("word") || mime_type.contains("document") {
            Self::Word
        } else {
            Self::Other
        }
    }
}

/// A piece record as held by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    /// Server-assigned identifier
    pub id: PieceId,
    /// Owning document
    pub document_id: DocumentId,
    /// 1-based position in the collection's current order
    pub numero: u32,
    /// User-visible name (required)
    pub name: String,
    /// Optional free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Filename as uploaded
    pub original_filename: String,
    /// MIME content type captured at upload
    pub mime_type: String,
    /// Size in bytes captured at upload
    pub size_bytes: u64,
    /// Opaque handle to the remote binary content
    pub content_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Piece {
    /// Create a piece record. `numero` starts at 0 until placed in a collection.
    pub fn new(
        id: PieceId,
        document_id: DocumentId,
        name: impl Into<String>,
        original_filename: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            document_id,
            numero: 0,
            name: name.into(),
            description: None,
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
            size_bytes,
            content_ref: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = normalize_description(Some(description.into()));
        self
    }

    /// Set content reference
    pub fn with_content_ref(mut self, content_ref: impl Into<String>) -> Self {
        self.content_ref = content_ref.into();
        self
    }

    /// The description, if it holds any text
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref().filter(|d| !d.trim().is_empty())
    }

    pub fn is_previewable(&self) -> bool {
        is_previewable(&self.mime_type)
    }

    pub fn file_kind(&self) -> FileKind {
        FileKind::from_mime(&self.mime_type)
    }

    /// Human-readable file size (o / Ko / Mo)
    pub fn human_filesize(&self) -> String {
        human_filesize(self.size_bytes)
    }
}

/// Format a byte count the way the piece list shows it
pub fn human_filesize(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes < KIB {
        format!("{} o", bytes)
    } else if bytes < MIB {
        format!("{:.1} Ko", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} Mo", bytes as f64 / MIB as f64)
    }
}

/// Empty or whitespace-only descriptions are stored as absent
pub fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

/// Payload for creating a piece on the remote store
#[derive(Debug, Clone)]
pub struct NewPiece {
    pub name: String,
    pub description: Option<String>,
    pub original_filename: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl NewPiece {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Partial update of a piece's editable fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PieceUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Apply to a record, as the remote store does
    pub fn apply_to(&self, piece: &mut Piece) {
        if let Some(name) = &self.name {
            piece.name = name.clone();
        }
        if self.description.is_some() {
            piece.description = normalize_description(self.description.clone());
        }
        piece.updated_at = Utc::now();
    }
}

/// Binary content fetched from the remote store
#[derive(Debug, Clone)]
pub struct Content {
    pub data: Bytes,
    pub mime_type: String,
}
