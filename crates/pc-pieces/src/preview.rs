//! Preview Resources
//!
//! A [`PreviewSession`] belongs to one preview surface. It holds at most one
//! live [`PreviewHandle`] at a time: acquiring a new one releases the previous
//! one first, closing the session releases whatever is live, and dropping the
//! session closes it. Content is only readable through the session while the
//! handle is live.
//!
//! A fetch that completes after the session moved on (another acquire, a
//! close) is discarded rather than installed.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pc_core::PieceId;
use tracing::{debug, instrument};

use crate::error::{PieceError, PieceResult};
use crate::model::{is_previewable, Piece};
use crate::remote::RemoteStore;

/// A live, revocable reference to one piece's content
#[derive(Debug, PartialEq, Eq)]
pub struct PreviewHandle {
    id: u64,
    piece_id: PieceId,
    mime_type: String,
}

impl PreviewHandle {
    pub fn piece_id(&self) -> &PieceId {
        &self.piece_id
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// Acquire/release counters for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreviewStats {
    pub acquired: u64,
    pub released: u64,
}

impl PreviewStats {
    pub fn outstanding(&self) -> u64 {
        self.acquired - self.released
    }
}

#[derive(Debug, Default)]
struct SessionState {
    /// Bumped by every acquire and close; fetches compare against it
    generation: u64,
    next_handle: u64,
    active: Option<(u64, Bytes)>,
    stats: PreviewStats,
}

impl SessionState {
    fn release_active(&mut self) -> bool {
        if let Some((id, _)) = self.active.take() {
            self.stats.released += 1;
            debug!(handle = id, "Preview handle released");
            true
        } else {
            false
        }
    }
}

/// Preview state owned by one view
pub struct PreviewSession<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
    state: Mutex<SessionState>,
}

impl<R: RemoteStore + ?Sized> PreviewSession<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self {
            remote,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Fetch a piece's content and bind it to a new handle
    #[instrument(skip(self, piece), fields(id = %piece.id, mime = %piece.mime_type))]
    pub async fn acquire(&self, piece: &Piece) -> PieceResult<PreviewHandle> {
        if !is_previewable(&piece.mime_type) {
            return Err(PieceError::UnsupportedType(piece.mime_type.clone()));
        }

        let generation = {
            let mut state = self.state.lock();
            state.release_active();
            state.generation += 1;
            state.generation
        };

        let content = self.remote.fetch_content(&piece.id).await?;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!("Discarding preview content; session moved on while fetching");
            return Err(PieceError::Superseded);
        }

        state.next_handle += 1;
        let id = state.next_handle;
        state.active = Some((id, content.data));
        state.stats.acquired += 1;
        debug!(handle = id, "Preview handle acquired");

        Ok(PreviewHandle {
            id,
            piece_id: piece.id.clone(),
            mime_type: piece.mime_type.clone(),
        })
    }

    /// Acquire a handle that is released when the guard goes out of scope
    pub async fn acquire_scoped(&self, piece: &Piece) -> PieceResult<PreviewGuard<'_, R>> {
        let handle = self.acquire(piece).await?;
        Ok(PreviewGuard {
            session: self,
            handle: Some(handle),
        })
    }

    /// Read the content behind a live handle
    pub fn content(&self, handle: &PreviewHandle) -> PieceResult<Bytes> {
        let state = self.state.lock();
        match &state.active {
            Some((id, data)) if *id == handle.id => Ok(data.clone()),
            _ => Err(PieceError::HandleReleased),
        }
    }

    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        matches!(&self.state.lock().active, Some((id, _)) if *id == handle.id)
    }

    /// Release a handle. Releasing a stale or already released handle is a no-op.
    pub fn release(&self, handle: &PreviewHandle) {
        let mut state = self.state.lock();
        if matches!(&state.active, Some((id, _)) if *id == handle.id) {
            state.release_active();
        }
    }

    /// Dismiss the preview surface: release the live handle and discard any
    /// fetch still in flight.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.release_active();
        state.generation += 1;
    }

    pub fn stats(&self) -> PreviewStats {
        self.state.lock().stats
    }
}

impl<R: RemoteStore + ?Sized> Drop for PreviewSession<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scoped preview handle; releases on drop, on every exit path
pub struct PreviewGuard<'a, R: RemoteStore + ?Sized> {
    session: &'a PreviewSession<R>,
    handle: Option<PreviewHandle>,
}

impl<'a, R: RemoteStore + ?Sized> PreviewGuard<'a, R> {
    pub fn handle(&self) -> Option<&PreviewHandle> {
        self.handle.as_ref()
    }

    pub fn content(&self) -> PieceResult<Bytes> {
        match &self.handle {
            Some(handle) => self.session.content(handle),
            None => Err(PieceError::HandleReleased),
        }
    }

    /// Release before the end of scope
    pub fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            self.session.release(&handle);
        }
    }
}

impl<'a, R: RemoteStore + ?Sized> Drop for PreviewGuard<'a, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.session.release(&handle);
        }
    }
}
