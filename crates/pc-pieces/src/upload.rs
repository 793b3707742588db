//! Upload Pipeline
//!
//! Client-side validation, packaging and submission of new pieces. Nothing
//! reaches the remote store unless the file fits the size limit and the piece
//! has a name.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use pc_core::DocumentId;
use tracing::{info, instrument, warn};

use crate::collection::Mutation;
use crate::error::{PieceResult, ValidationError};
use crate::model::{NewPiece, Piece, OCTET_STREAM};
use crate::remote::RemoteStore;
use crate::store::PieceStore;

/// A file chosen by the user, held in memory until submitted
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub filename: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
}

impl SelectedFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            data: data.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read a file from disk
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("fichier")
            .to_string();
        Ok(Self::new(filename, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Declared type, else a guess from the filename, else octet-stream
    pub fn resolved_mime_type(&self) -> String {
        self.mime_type
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&self.filename)
                    .first()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| OCTET_STREAM.to_string())
            })
    }

    /// Filename without its last extension
    pub fn stem(&self) -> &str {
        match self.filename.rfind('.') {
            Some(idx) if idx > 0 => &self.filename[..idx],
            _ => &self.filename,
        }
    }
}

/// Reject files over the limit
pub fn check_size(size: u64, max: u64) -> Result<(), ValidationError> {
    if size > max {
        return Err(ValidationError::FileTooLarge { size, max });
    }
    Ok(())
}

/// Validate a submission before any network call
pub fn validate(file: &SelectedFile, name: &str, max: u64) -> Result<(), ValidationError> {
    check_size(file.size(), max)?;
    if name.trim().is_empty() {
        return Err(ValidationError::MissingName);
    }
    Ok(())
}

/// Transient state of the upload dialog
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub file: Option<SelectedFile>,
    pub name: String,
    pub description: String,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a file, pre-filling the name with the filename stem.
    ///
    /// Oversized files are refused immediately and leave the form as it was.
    pub fn select_file(&mut self, file: SelectedFile, max: u64) -> Result<(), ValidationError> {
        check_size(file.size(), max)?;
        self.name = file.stem().to_string();
        self.file = Some(file);
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.name.is_empty() && self.description.is_empty()
    }
}

/// Submits new pieces and merges the stored record into the collection
pub struct UploadPipeline<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
    store: Arc<PieceStore>,
    document: DocumentId,
    max_file_size: u64,
}

impl<R: RemoteStore + ?Sized> UploadPipeline<R> {
    pub fn new(
        remote: Arc<R>,
        store: Arc<PieceStore>,
        document: DocumentId,
        max_file_size: u64,
    ) -> Self {
        Self {
            remote,
            store,
            document,
            max_file_size,
        }
    }

    /// Validate, send, and append the stored piece at the end of the order
    #[instrument(
        skip(self, file, description),
        fields(document = %self.document, filename = %file.filename)
    )]
    pub async fn submit(
        &self,
        file: SelectedFile,
        name: &str,
        description: &str,
    ) -> PieceResult<Piece> {
        validate(&file, name, self.max_file_size)?;

        let description = description.trim();
        let new_piece = NewPiece {
            name: name.trim().to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            mime_type: file.resolved_mime_type(),
            original_filename: file.filename,
            data: file.data,
        };

        let stored = self.remote.create(&self.document, new_piece).await?;
        let server_numero = stored.numero;

        let collection = self.store.apply_confirmed(Mutation::Insert {
            piece: stored.clone(),
            position: None,
        })?;

        let piece = collection.get(&stored.id).cloned().unwrap_or(stored);
        if piece.numero != server_numero {
            warn!(
                id = %piece.id,
                local = piece.numero,
                remote = server_numero,
                "Remote numbering differs from local order"
            );
        }

        info!(id = %piece.id, numero = piece.numero, "Piece uploaded");
        Ok(piece)
    }

    /// Submit the form; it is cleared on success and left intact on failure
    pub async fn submit_form(&self, form: &mut UploadForm) -> PieceResult<Piece> {
        let file = form.file.clone().ok_or(ValidationError::MissingFile)?;
        let piece = self.submit(file, &form.name, &form.description).await?;
        form.clear();
        Ok(piece)
    }
}
