//! Directory-backed remote store
//!
//! Layout under the root:
//!
//! ```text
//! documents/<document>/index.json   ordered piece records
//! content/<disk filename>           binary content
//! content/<piece id>.meta.json      content type and SHA-256 digest
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use pc_core::{DocumentId, PieceId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{generate_disk_filename, is_permutation, RemoteError, RemoteResult, RemoteStore};
use crate::model::{normalize_description, Content, NewPiece, Piece, PieceUpdate};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContentMeta {
    content_ref: String,
    mime_type: String,
    digest: String,
}

/// Local filesystem remote store
pub struct LocalRemoteStore {
    /// Root directory for storage
    root: PathBuf,
    /// Serializes index read-modify-write cycles
    write_lock: Mutex<()>,
}

impl LocalRemoteStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path component, preventing directory traversal
    fn checked_component(key: &str) -> RemoteResult<&str> {
        if key.is_empty() || key.contains("..") || key.contains('/') || key.contains('\\') {
            return Err(RemoteError::Rejected(format!("invalid path component: {}", key)));
        }
        Ok(key)
    }

    fn document_dir(&self, document: &DocumentId) -> RemoteResult<PathBuf> {
        let name = Self::checked_component(document.as_str())?;
        Ok(self.root.join("documents").join(name))
    }

    fn content_path(&self, key: &str) -> RemoteResult<PathBuf> {
        let name = Self::checked_component(key)?;
        Ok(self.root.join("content").join(name))
    }

    fn meta_path(&self, id: &PieceId) -> RemoteResult<PathBuf> {
        let name = Self::checked_component(id.as_str())?;
        Ok(self.root.join("content").join(format!("{}.meta.json", name)))
    }

    /// Calculate SHA256 digest
    fn calculate_digest(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    async fn read_index(&self, document: &DocumentId) -> RemoteResult<Vec<Piece>> {
        let path = self.document_dir(document)?.join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(&path).await?;
        let mut pieces: Vec<Piece> = serde_json::from_slice(&raw)?;
        pieces.sort_by_key(|p| p.numero);
        Ok(pieces)
    }

    async fn write_index(&self, document: &DocumentId, pieces: &[Piece]) -> RemoteResult<()> {
        let dir = self.document_dir(document)?;
        fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(pieces)?;
        Self::write_atomic(&dir.join(INDEX_FILE), &json).await
    }

    /// Write to a sibling temp file, then rename over the target
    async fn write_atomic(path: &Path, data: &[u8]) -> RemoteResult<()> {
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn renumber(pieces: &mut [Piece]) {
        for (idx, piece) in pieces.iter_mut().enumerate() {
            piece.numero = idx as u32 + 1;
        }
    }
}

#[async_trait]
impl RemoteStore for LocalRemoteStore {
    #[instrument(skip(self), fields(store = "local"))]
    async fn list(&self, document: &DocumentId) -> RemoteResult<Vec<Piece>> {
        self.read_index(document).await
    }

    #[instrument(
        skip(self, new_piece),
        fields(store = "local", filename = %new_piece.original_filename)
    )]
    async fn create(&self, document: &DocumentId, new_piece: NewPiece) -> RemoteResult<Piece> {
        let _guard = self.write_lock.lock().await;

        let mut pieces = self.read_index(document).await?;
        let next_numero = pieces.iter().map(|p| p.numero).max().unwrap_or(0) + 1;

        let disk_filename = generate_disk_filename(document, &new_piece.original_filename);
        let content_path = self.content_path(&disk_filename)?;
        if let Some(parent) = content_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Self::write_atomic(&content_path, &new_piece.data).await?;

        let mut piece = Piece::new(
            PieceId::generate(),
            document.clone(),
            new_piece.name.clone(),
            new_piece.original_filename.clone(),
            new_piece.mime_type.clone(),
            new_piece.size(),
        )
        .with_content_ref(disk_filename.clone());
        piece.description = normalize_description(new_piece.description.clone());
        piece.numero = next_numero;

        let meta = ContentMeta {
            content_ref: disk_filename,
            mime_type: new_piece.mime_type.clone(),
            digest: Self::calculate_digest(&new_piece.data),
        };
        Self::write_atomic(&self.meta_path(&piece.id)?, &serde_json::to_vec(&meta)?).await?;

        pieces.push(piece.clone());
        self.write_index(document, &pieces).await?;

        info!(id = %piece.id, numero = piece.numero, size = piece.size_bytes, "Piece stored");
        Ok(piece)
    }

    #[instrument(skip(self, update), fields(store = "local"))]
    async fn update(
        &self,
        document: &DocumentId,
        id: &PieceId,
        update: &PieceUpdate,
    ) -> RemoteResult<Piece> {
        let _guard = self.write_lock.lock().await;

        let mut pieces = self.read_index(document).await?;
        let piece = pieces
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        update.apply_to(piece);
        let updated = piece.clone();

        self.write_index(document, &pieces).await?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(store = "local"))]
    async fn delete(&self, document: &DocumentId, id: &PieceId) -> RemoteResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut pieces = self.read_index(document).await?;
        let at = pieces
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        let removed = pieces.remove(at);
        Self::renumber(&mut pieces);
        self.write_index(document, &pieces).await?;

        let content_path = self.content_path(&removed.content_ref)?;
        if content_path.exists() {
            fs::remove_file(&content_path).await?;
        }
        let meta_path = self.meta_path(id)?;
        if meta_path.exists() {
            fs::remove_file(&meta_path).await?;
        }

        debug!(id = %id, remaining = pieces.len(), "Piece deleted");
        Ok(())
    }

    #[instrument(skip(self, order), fields(store = "local", count = order.len()))]
    async fn reorder(&self, document: &DocumentId, order: &[PieceId]) -> RemoteResult<()> {
        let _guard = self.write_lock.lock().await;

        let pieces = self.read_index(document).await?;
        let current: Vec<PieceId> = pieces.iter().map(|p| p.id.clone()).collect();
        if !is_permutation(&current, order) {
            warn!("Rejecting reorder that is not a permutation of stored pieces");
            return Err(RemoteError::Rejected(
                "reorder must list every piece exactly once".to_string(),
            ));
        }

        let now = Utc::now();
        let mut reordered = Vec::with_capacity(pieces.len());
        for id in order {
            if let Some(piece) = pieces.iter().find(|p| &p.id == id) {
                let mut piece = piece.clone();
                piece.updated_at = now;
                reordered.push(piece);
            }
        }
        Self::renumber(&mut reordered);
        self.write_index(document, &reordered).await
    }

    #[instrument(skip(self), fields(store = "local"))]
    async fn fetch_content(&self, id: &PieceId) -> RemoteResult<Content> {
        let meta_path = self.meta_path(id)?;
        if !meta_path.exists() {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        let meta: ContentMeta = serde_json::from_slice(&fs::read(&meta_path).await?)?;

        let content_path = self.content_path(&meta.content_ref)?;
        if !content_path.exists() {
            return Err(RemoteError::NotFound(meta.content_ref));
        }
        let data = fs::read(&content_path).await?;

        if Self::calculate_digest(&data) != meta.digest {
            return Err(RemoteError::Corrupted(id.to_string()));
        }

        Ok(Content {
            data: Bytes::from(data),
            mime_type: meta.mime_type,
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_piece(name: &str, data: &'static str) -> NewPiece {
        NewPiece {
            name: name.to_string(),
            description: Some("  ".to_string()),
            original_filename: format!("{}.png", name),
            mime_type: "image/png".to_string(),
            data: Bytes::from_static(data.as_bytes()),
        }
    }

    #[tokio::test]
    async fn test_create_list_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalRemoteStore::new(dir.path());
        let doc = DocumentId::new("doc_1");

        let a = store.create(&doc, new_piece("a", "AAAA")).await.unwrap();
        let b = store.create(&doc, new_piece("b", "BB")).await.unwrap();
        assert_eq!((a.numero, b.numero), (1, 2));
        assert_eq!(a.description, None);

        let list = store.list(&doc).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, b.id);

        let content = store.fetch_content(&a.id).await.unwrap();
        assert_eq!(content.data, Bytes::from_static(b"AAAA"));
        assert_eq!(content.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_delete_renumbers_and_removes_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalRemoteStore::new(dir.path());
        let doc = DocumentId::new("doc_1");

        let a = store.create(&doc, new_piece("a", "1")).await.unwrap();
        let b = store.create(&doc, new_piece("b", "2")).await.unwrap();
        let c = store.create(&doc, new_piece("c", "3")).await.unwrap();

        store.delete(&doc, &b.id).await.unwrap();

        let list = store.list(&doc).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!((list[0].id.clone(), list[0].numero), (a.id, 1));
        assert_eq!((list[1].id.clone(), list[1].numero), (c.id, 2));
        assert!(matches!(
            store.fetch_content(&b.id).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_reorder_persist() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentId::new("doc_1");
        let (a, b) = {
            let store = LocalRemoteStore::new(dir.path());
            let a = store.create(&doc, new_piece("a", "1")).await.unwrap();
            let b = store.create(&doc, new_piece("b", "2")).await.unwrap();
            store
                .update(&doc, &a.id, &PieceUpdate::default().name("Contract"))
                .await
                .unwrap();
            store
                .reorder(&doc, &[b.id.clone(), a.id.clone()])
                .await
                .unwrap();
            (a, b)
        };

        // A fresh handle over the same directory sees the persisted state
        let store = LocalRemoteStore::new(dir.path());
        let list = store.list(&doc).await.unwrap();
        assert_eq!(list[0].id, b.id);
        assert_eq!(list[1].id, a.id);
        assert_eq!(list[1].name, "Contract");
        assert_eq!(list[1].numero, 2);
    }

    #[tokio::test]
    async fn test_corrupted_content_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalRemoteStore::new(dir.path());
        let doc = DocumentId::new("doc_1");
        let a = store.create(&doc, new_piece("a", "original")).await.unwrap();

        let path = store.content_path(&a.content_ref).unwrap();
        tokio::fs::write(&path, b"tampered").await.unwrap();

        assert!(matches!(
            store.fetch_content(&a.id).await,
            Err(RemoteError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalRemoteStore::new(dir.path());

        let result = store.list(&DocumentId::new("../escape")).await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_reorder_rejects_partial_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalRemoteStore::new(dir.path());
        let doc = DocumentId::new("doc_1");
        let a = store.create(&doc, new_piece("a", "1")).await.unwrap();
        store.create(&doc, new_piece("b", "2")).await.unwrap();

        let result = store.reorder(&doc, &[a.id]).await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }
}
