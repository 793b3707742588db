//! # pc-pieces
//!
//! Numbered exhibit attachments ("pieces") for Pieces RS.
//!
//! ## Features
//!
//! - Ordered collection with contiguous `1..=N` numbering
//! - Optimistic mutations with version-checked confirmation and rollback
//! - Upload validation (size limit, required name)
//! - Drag-and-drop reordering with list-splice semantics
//! - Preview handles that are always released
//! - Citations and the manifest (bordereau) for the document editor
//! - Remote store abstraction (in-memory, local directory)
//!
//! ## Example
//!
//! ```rust,ignore
//! use pc_pieces::{LocalRemoteStore, PieceService, SelectedFile};
//! use pc_core::{DocumentId, PiecesConfig, TracingNotifier};
//! use std::sync::Arc;
//!
//! let remote = Arc::new(LocalRemoteStore::new("./pieces-data"));
//! let service = PieceService::new(
//!     remote,
//!     DocumentId::new("conclusions-2024"),
//!     PiecesConfig::default(),
//!     Arc::new(TracingNotifier),
//! );
//! service.load().await?;
//!
//! let file = SelectedFile::from_path("contract.pdf").await?;
//! let piece = service.upload(file, "Employment contract", "").await?;
//! assert_eq!(piece.numero, 1);
//! ```

pub mod citation;
pub mod collection;
pub mod error;
pub mod model;
pub mod preview;
pub mod remote;
pub mod reorder;
pub mod service;
pub mod store;
pub mod upload;

pub use citation::{
    citation_for, DocumentEditor, Manifest, ManifestEntry, ManifestFormat, ReferenceInserter,
};
pub use collection::{Mutation, PieceCollection};
pub use error::{PieceError, PieceResult, ValidationError};
pub use model::{human_filesize, is_previewable, Content, FileKind, NewPiece, Piece, PieceUpdate};
pub use preview::{PreviewGuard, PreviewHandle, PreviewSession, PreviewStats};
pub use remote::{
    generate_disk_filename, LocalRemoteStore, MemoryRemoteStore, RemoteError, RemoteOp,
    RemoteResult, RemoteStore,
};
pub use reorder::{splice_before, ReorderCoordinator};
pub use service::PieceService;
pub use store::{refresh, MutationTicket, Outcome, PieceStore, Settlement};
pub use upload::{SelectedFile, UploadForm, UploadPipeline};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;
    use pc_core::{DocumentId, PieceId};

    use crate::citation::DocumentEditor;
    use crate::collection::PieceCollection;
    use crate::model::Piece;
    use crate::remote::MemoryRemoteStore;
    use crate::store::{refresh, PieceStore};

    /// A PDF piece whose id and name are both `name`
    pub fn piece(name: &str) -> Piece {
        piece_with_mime(name, "application/pdf")
    }

    pub fn piece_with_mime(name: &str, mime_type: &str) -> Piece {
        Piece::new(
            PieceId::new(name),
            DocumentId::new("doc"),
            name,
            format!("{}.pdf", name),
            mime_type,
            12,
        )
    }

    pub fn ids(names: &[&str]) -> Vec<PieceId> {
        names.iter().map(|n| PieceId::new(*n)).collect()
    }

    pub fn collection(names: &[&str]) -> PieceCollection {
        PieceCollection::from_ordered(names.iter().map(|n| piece(n)).collect())
            .expect("test names are unique")
    }

    /// A remote store holding one document with the given pieces, in order
    pub async fn seeded_remote(names: &[&str]) -> (Arc<MemoryRemoteStore>, DocumentId) {
        let pairs: Vec<(&str, &str)> = names.iter().map(|n| (*n, "application/pdf")).collect();
        seeded_remote_with(&pairs).await
    }

    async fn seeded_remote_with(pieces: &[(&str, &str)]) -> (Arc<MemoryRemoteStore>, DocumentId) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let doc = DocumentId::new("doc");
        let seed = pieces
            .iter()
            .map(|(name, mime)| {
                (
                    piece_with_mime(name, mime),
                    Bytes::from(format!("content of {}", name)),
                )
            })
            .collect();
        remote.seed(&doc, seed).await;
        (remote, doc)
    }

    /// Seeded remote store plus a piece store loaded from it
    pub async fn seeded(names: &[&str]) -> (Arc<MemoryRemoteStore>, Arc<PieceStore>, DocumentId) {
        let pairs: Vec<(&str, &str)> = names.iter().map(|n| (*n, "application/pdf")).collect();
        seeded_with(&pairs).await
    }

    /// Like [`seeded`], with a mime type per piece
    pub async fn seeded_with(
        pieces: &[(&str, &str)],
    ) -> (Arc<MemoryRemoteStore>, Arc<PieceStore>, DocumentId) {
        let (remote, doc) = seeded_remote_with(pieces).await;
        let store = Arc::new(PieceStore::new());
        refresh(&store, remote.as_ref(), &doc)
            .await
            .expect("seeded list loads");
        (remote, store, doc)
    }

    /// Editor that records every insertion
    #[derive(Default)]
    pub struct RecordingEditor {
        inserted: Mutex<Vec<String>>,
    }

    impl RecordingEditor {
        pub fn inserted(&self) -> Vec<String> {
            self.inserted.lock().clone()
        }
    }

    impl DocumentEditor for RecordingEditor {
        fn insert_text(&self, text: &str) {
            self.inserted.lock().push(text.to_string());
        }
    }
}
