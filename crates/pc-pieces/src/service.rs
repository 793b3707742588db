//! Piece Service
//!
//! One document's pieces, end to end: loading, upload, rename, delete,
//! reorder, preview, download and insertion into the document editor. Every
//! failure is reported to the user through the configured [`Notifier`] and
//! returned to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pc_core::{DocumentId, Notice, Notifier, PieceId, PiecesConfig};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::citation::{DocumentEditor, Manifest, ManifestFormat, ReferenceInserter};
use crate::collection::{Mutation, PieceCollection};
use crate::error::{PieceError, PieceResult, ValidationError};
use crate::model::{Piece, PieceUpdate};
use crate::preview::PreviewSession;
use crate::remote::RemoteStore;
use crate::reorder::ReorderCoordinator;
use crate::store::{refresh, settle_failure, settle_success, Outcome, PieceStore};
use crate::upload::{SelectedFile, UploadForm, UploadPipeline};

/// Piece operations for a single document
pub struct PieceService<R: RemoteStore + ?Sized> {
    document: DocumentId,
    remote: Arc<R>,
    store: Arc<PieceStore>,
    config: PiecesConfig,
    notifier: Arc<dyn Notifier>,
    uploads: UploadPipeline<R>,
    reorder: ReorderCoordinator<R>,
    inserter: ReferenceInserter,
}

impl<R: RemoteStore + ?Sized> PieceService<R> {
    pub fn new(
        remote: Arc<R>,
        document: DocumentId,
        config: PiecesConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Arc::new(PieceStore::new());
        Self {
            uploads: UploadPipeline::new(
                remote.clone(),
                store.clone(),
                document.clone(),
                config.max_file_size,
            ),
            reorder: ReorderCoordinator::new(remote.clone(), store.clone(), document.clone()),
            inserter: ReferenceInserter::new(config.citation_style),
            document,
            remote,
            store,
            config,
            notifier,
        }
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub fn config(&self) -> &PiecesConfig {
        &self.config
    }

    /// Surface a failure to the user and pass it on
    fn report<T>(&self, result: PieceResult<T>) -> PieceResult<T> {
        if let Err(e) = &result {
            self.notifier.notify(e.notice());
        }
        result
    }

    /// Load (or reload) the authoritative list
    #[instrument(skip(self), fields(document = %self.document, remote = self.remote.name()))]
    pub async fn load(&self) -> PieceResult<PieceCollection> {
        let result = refresh(&self.store, self.remote.as_ref(), &self.document).await;
        self.report(result)
    }

    /// Current ordered pieces
    pub fn pieces(&self) -> PieceCollection {
        self.store.list()
    }

    /// Notified whenever the list changes
    pub fn subscribe(&self) -> watch::Receiver<PieceCollection> {
        self.store.subscribe()
    }

    fn find(&self, id: &PieceId) -> PieceResult<Piece> {
        self.store
            .list()
            .get(id)
            .cloned()
            .ok_or_else(|| PieceError::NotFound(id.clone()))
    }

    pub async fn upload(
        &self,
        file: SelectedFile,
        name: &str,
        description: &str,
    ) -> PieceResult<Piece> {
        let result = self.uploads.submit(file, name, description).await;
        if let Ok(piece) = &result {
            self.notifier
                .notify(Notice::success(format!("Piece no. {} added", piece.numero)));
        }
        self.report(result)
    }

    pub async fn upload_form(&self, form: &mut UploadForm) -> PieceResult<Piece> {
        let result = self.uploads.submit_form(form).await;
        if let Ok(piece) = &result {
            self.notifier
                .notify(Notice::success(format!("Piece no. {} added", piece.numero)));
        }
        self.report(result)
    }

    /// Change a piece's name and description. An empty description clears it.
    #[instrument(skip(self, description), fields(document = %self.document))]
    pub async fn rename(
        &self,
        id: &PieceId,
        name: &str,
        description: Option<&str>,
    ) -> PieceResult<Outcome> {
        let result = self.try_rename(id, name, description).await;
        if result.is_ok() {
            self.notifier.notify(Notice::success("Piece updated"));
        }
        self.report(result)
    }

    async fn try_rename(
        &self,
        id: &PieceId,
        name: &str,
        description: Option<&str>,
    ) -> PieceResult<Outcome> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        // No description given: keep the current one
        let description = match description {
            Some(d) => Some(d.trim().to_string()),
            None => self.find(id)?.description,
        };

        let ticket = self.store.begin(Mutation::Rename {
            id: id.clone(),
            name: name.to_string(),
            description: description.clone(),
        })?;

        let update = PieceUpdate::default()
            .name(name)
            .description(description.unwrap_or_default());

        match self.remote.update(&self.document, id, &update).await {
            Ok(stored) => {
                let confirmed = Mutation::rename_from(&stored);
                settle_success(
                    &self.store,
                    self.remote.as_ref(),
                    &self.document,
                    ticket,
                    Some(confirmed),
                )
                .await
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Rename rejected; restoring previous values");
                let remote = self.remote.as_ref();
                Err(settle_failure(&self.store, remote, &self.document, ticket, e).await)
            }
        }
    }

    /// Remove a piece; the ones after it move up by one
    #[instrument(skip(self), fields(document = %self.document))]
    pub async fn delete(&self, id: &PieceId) -> PieceResult<Outcome> {
        let result = self.try_delete(id).await;
        if result.is_ok() {
            self.notifier.notify(Notice::success("Piece deleted"));
        }
        self.report(result)
    }

    async fn try_delete(&self, id: &PieceId) -> PieceResult<Outcome> {
        let ticket = self.store.begin(Mutation::Remove(id.clone()))?;

        match self.remote.delete(&self.document, id).await {
            Ok(()) => {
                let remote = self.remote.as_ref();
                let outcome =
                    settle_success(&self.store, remote, &self.document, ticket, None).await?;
                info!(id = %id, ?outcome, "Piece deleted");
                Ok(outcome)
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Delete rejected; restoring piece");
                let remote = self.remote.as_ref();
                Err(settle_failure(&self.store, remote, &self.document, ticket, e).await)
            }
        }
    }

    /// Drop `dragged` immediately before `target`
    pub async fn move_before(&self, dragged: &PieceId, target: &PieceId) -> PieceResult<Outcome> {
        let result = self.reorder.move_before(dragged, target).await;
        if matches!(
            result,
            Ok(Outcome::Committed | Outcome::Resynced | Outcome::ReloadPending)
        ) {
            self.notifier.notify(Notice::success("Order updated"));
        }
        self.report(result)
    }

    /// A fresh preview session for one preview surface
    pub fn preview_session(&self) -> PreviewSession<R> {
        PreviewSession::new(self.remote.clone())
    }

    /// Write a piece's content into `dir` under its original filename
    #[instrument(skip(self, dir), fields(document = %self.document))]
    pub async fn download(&self, id: &PieceId, dir: &Path) -> PieceResult<PathBuf> {
        let result = self.try_download(id, dir).await;
        self.report(result)
    }

    async fn try_download(&self, id: &PieceId, dir: &Path) -> PieceResult<PathBuf> {
        let piece = self.find(id)?;
        let content = self.remote.fetch_content(id).await?;

        let filename = Path::new(&piece.original_filename)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| piece.id.as_str().into());
        let path = dir.join(filename);

        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, &content.data).await?;
        info!(id = %id, path = %path.display(), size = content.data.len(), "Piece downloaded");
        Ok(path)
    }

    /// Insert a citation for a piece at its current number
    pub fn insert_reference(
        &self,
        editor: &dyn DocumentEditor,
        id: &PieceId,
    ) -> PieceResult<String> {
        let result = self
            .find(id)
            .map(|piece| self.inserter.insert_reference(editor, &piece));
        if result.is_ok() {
            self.notifier.notify(Notice::success("Reference inserted"));
        }
        self.report(result)
    }

    /// Insert the manifest of all pieces. Fails without inserting when there are none.
    pub fn insert_manifest(
        &self,
        editor: &dyn DocumentEditor,
        format: ManifestFormat,
    ) -> PieceResult<Manifest> {
        let result = self
            .inserter
            .insert_manifest(editor, &self.store.list(), format);
        if result.is_ok() {
            self.notifier.notify(Notice::success("Manifest inserted"));
        }
        self.report(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use crate::testing::{ids, seeded_remote, RecordingEditor};
    use pc_core::{MemoryNotifier, NoticeLevel};

    async fn service(
        names: &[&str],
    ) -> (
        Arc<MemoryRemoteStore>,
        Arc<MemoryNotifier>,
        PieceService<MemoryRemoteStore>,
    ) {
        let (remote, doc) = seeded_remote(names).await;
        let notifier = Arc::new(MemoryNotifier::new());
        let service = PieceService::new(
            remote.clone(),
            doc,
            PiecesConfig::default(),
            notifier.clone(),
        );
        service.load().await.unwrap();
        (remote, notifier, service)
    }

    fn numeros(list: &PieceCollection) -> Vec<(&str, u32)> {
        list.iter().map(|p| (p.id.as_str(), p.numero)).collect()
    }

    #[tokio::test]
    async fn test_delete_renumbers_remaining_pieces() {
        let (remote, notifier, service) = service(&["A", "B", "C"]).await;

        let outcome = service.delete(&"B".into()).await.unwrap();

        assert_eq!(outcome, Outcome::Committed);
        let list = service.pieces();
        assert_eq!(numeros(&list), vec![("A", 1), ("C", 2)]);
        assert_eq!(remote.list(service.document()).await.unwrap().len(), 2);
        assert_eq!(notifier.last().unwrap(), Notice::success("Piece deleted"));
    }

    #[tokio::test]
    async fn test_failed_delete_restores_piece() {
        let (remote, notifier, service) = service(&["A", "B", "C"]).await;
        remote.fail_next(RemoteOp::Delete);

        let result = service.delete(&"B".into()).await;

        assert!(matches!(result, Err(PieceError::Network(_))));
        assert_eq!(numeros(&service.pieces()), vec![("A", 1), ("B", 2), ("C", 3)]);
        assert_eq!(notifier.last().unwrap().level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_rename_commits_server_values() {
        let (_, _, service) = service(&["A", "B"]).await;

        service
            .rename(&"A".into(), "  Contract ", Some("signed copy"))
            .await
            .unwrap();

        let piece = service.pieces().get(&"A".into()).cloned().unwrap();
        assert_eq!(piece.name, "Contract");
        assert_eq!(piece.description(), Some("signed copy"));
        assert_eq!(piece.numero, 1);
    }

    #[tokio::test]
    async fn test_stale_rename_stays_committed_when_reload_fails() {
        let (remote, notifier, service) = service(&["A", "B", "C"]).await;
        let service = Arc::new(service);
        let held = remote.hold_next(RemoteOp::Update);

        let rename = {
            let service = service.clone();
            tokio::spawn(async move { service.rename(&"A".into(), "Renamed", None).await })
        };
        while remote.calls(RemoteOp::Update) == 0 {
            tokio::task::yield_now().await;
        }

        service.delete(&"C".into()).await.unwrap();
        remote.fail_next(RemoteOp::List);
        held.release();

        let outcome = rename.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::ReloadPending);
        assert_eq!(notifier.last().unwrap(), Notice::success("Piece updated"));
        assert_eq!(service.pieces().get(&"A".into()).unwrap().name, "Renamed");

        let server = remote.list(service.document()).await.unwrap();
        assert_eq!(server[0].name, "Renamed");

        let reloaded = service.load().await.unwrap();
        assert_eq!(reloaded.ids(), ids(&["A", "B"]));
        assert_eq!(reloaded.get(&"A".into()).unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn test_rename_with_blank_name_never_reaches_remote() {
        let (remote, notifier, service) = service(&["A"]).await;

        let result = service.rename(&"A".into(), "  ", None).await;

        assert!(matches!(
            result,
            Err(PieceError::Validation(ValidationError::MissingName))
        ));
        assert_eq!(remote.calls(RemoteOp::Update), 0);
        assert!(notifier.last().unwrap().is_error());
    }

    #[tokio::test]
    async fn test_failed_rename_restores_previous_name() {
        let (remote, _, service) = service(&["A"]).await;
        remote.fail_next(RemoteOp::Update);

        let result = service.rename(&"A".into(), "Renamed", None).await;

        assert!(result.is_err());
        assert_eq!(service.pieces().get(&"A".into()).unwrap().name, "A");
    }

    #[tokio::test]
    async fn test_upload_notifies_with_numero() {
        let (_, notifier, service) = service(&["A", "B"]).await;

        let piece = service
            .upload(SelectedFile::new("receipt.png", "png"), "Receipt", "")
            .await
            .unwrap();

        assert_eq!(piece.numero, 3);
        assert_eq!(notifier.last().unwrap(), Notice::success("Piece no. 3 added"));
    }

    #[tokio::test]
    async fn test_move_before_updates_order() {
        let (_, notifier, service) = service(&["A", "B", "C", "D"]).await;

        service.move_before(&"A".into(), &"C".into()).await.unwrap();

        assert_eq!(service.pieces().ids(), ids(&["B", "A", "C", "D"]));
        assert_eq!(notifier.last().unwrap(), Notice::success("Order updated"));
    }

    #[tokio::test]
    async fn test_subscribers_see_optimistic_delete() {
        let (_, _, service) = service(&["A", "B"]).await;
        let mut rx = service.subscribe();
        rx.borrow_and_update();

        service.delete(&"A".into()).await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().ids(), ids(&["B"]));
    }

    #[tokio::test]
    async fn test_download_writes_original_filename() {
        let (_, _, service) = service(&["A"]).await;
        let dir = tempfile::tempdir().unwrap();

        let path = service.download(&"A".into(), dir.path()).await.unwrap();

        assert_eq!(path.file_name().unwrap(), "A.pdf");
        assert_eq!(std::fs::read(&path).unwrap(), b"content of A");
    }

    #[tokio::test]
    async fn test_download_unknown_piece() {
        let (_, notifier, service) = service(&["A"]).await;
        let dir = tempfile::tempdir().unwrap();

        let result = service.download(&"Z".into(), dir.path()).await;

        assert!(matches!(result, Err(PieceError::NotFound(_))));
        assert_eq!(notifier.last().unwrap(), Notice::error("Piece not found"));
    }

    #[tokio::test]
    async fn test_insert_reference_and_manifest() {
        let (_, _, service) = service(&["A", "B", "C"]).await;
        let editor = RecordingEditor::default();

        let token = service.insert_reference(&editor, &"C".into()).unwrap();
        assert_eq!(token, "(see Exhibit no. 3)");

        let manifest = service
            .insert_manifest(&editor, ManifestFormat::Text)
            .unwrap();
        assert_eq!(manifest.entries().len(), 3);
        assert_eq!(editor.inserted().len(), 2);
    }

    #[tokio::test]
    async fn test_manifest_of_empty_document_is_refused() {
        let (_, notifier, service) = service(&[]).await;
        let editor = RecordingEditor::default();

        let result = service.insert_manifest(&editor, ManifestFormat::Html);

        assert!(matches!(result, Err(PieceError::EmptyManifest)));
        assert!(editor.inserted().is_empty());
        assert_eq!(notifier.last().unwrap(), Notice::error("No pieces to list"));
    }
}
