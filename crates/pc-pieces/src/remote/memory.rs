//! In-memory remote store
//!
//! Applies the same server-side rules as the directory-backed store, and adds
//! fault injection and held responses so callers can exercise failure and
//! out-of-order completion paths. A response can be held either before the
//! change is made ([`MemoryRemoteStore::hold_next`]) or after it is committed
//! ([`MemoryRemoteStore::hold_reply_next`]).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use pc_core::{DocumentId, PieceId};
use tokio::sync::{Notify, RwLock};
use tracing::debug;

use super::{
    generate_disk_filename, is_permutation, RemoteError, RemoteOp, RemoteResult, RemoteStore,
};
use crate::model::{normalize_description, Content, NewPiece, Piece, PieceUpdate};

/// A held response. The operation completes once the gate is released.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    notify: Arc<Notify>,
}

impl Gate {
    pub fn release(&self) {
        self.notify.notify_one();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[derive(Default)]
struct State {
    documents: HashMap<DocumentId, Vec<Piece>>,
    contents: HashMap<PieceId, Content>,
}

/// In-memory remote store for testing and demos
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: RwLock<State>,
    failures: parking_lot::Mutex<HashSet<RemoteOp>>,
    gates: Gates,
    replies: Gates,
    calls: parking_lot::Mutex<HashMap<RemoteOp, usize>>,
    completed: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `Unavailable`
    pub fn fail_next(&self, op: RemoteOp) {
        self.failures.lock().insert(op);
    }

    /// Hold the next call of `op` until the returned gate is released
    pub fn hold_next(&self, op: RemoteOp) -> Gate {
        let gate = Gate::default();
        self.gates.lock().entry(op).or_default().push(gate.clone());
        gate
    }

    /// Commit the next call of `op`, then hold its response until the gate is released
    pub fn hold_reply_next(&self, op: RemoteOp) -> Gate {
        let gate = Gate::default();
        self.replies.lock().entry(op).or_default().push(gate.clone());
        gate
    }

    /// How many times `op` has been requested
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Total number of requests that ran to completion (success or failure)
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Seed a document directly, bypassing the request path
    pub async fn seed(&self, document: &DocumentId, pieces: Vec<(Piece, Bytes)>) {
        let mut state = self.state.write().await;
        let list = state.documents.entry(document.clone()).or_default();
        let mut contents = Vec::new();
        for (mut piece, data) in pieces {
            piece.numero = list.len() as u32 + 1;
            piece.document_id = document.clone();
            contents.push((
                piece.id.clone(),
                Content {
                    data,
                    mime_type: piece.mime_type.clone(),
                },
            ));
            list.push(piece);
        }
        state.contents.extend(contents);
    }

    async fn enter(&self, op: RemoteOp) -> RemoteResult<()> {
        *self.calls.lock().entry(op).or_default() += 1;

        if let Some(gate) = take_gate(&self.gates, op) {
            debug!(op = %op, "Holding remote response");
            gate.wait().await;
        }

        let result = if self.failures.lock().remove(&op) {
            Err(RemoteError::Unavailable(format!("injected failure for {}", op)))
        } else {
            Ok(())
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Runs after a change is committed and before its response is returned
    async fn leave(&self, op: RemoteOp) {
        if let Some(gate) = take_gate(&self.replies, op) {
            debug!(op = %op, "Holding committed response");
            gate.wait().await;
        }
    }
}

type Gates = parking_lot::Mutex<HashMap<RemoteOp, Vec<Gate>>>;

fn take_gate(gates: &Gates, op: RemoteOp) -> Option<Gate> {
    let mut gates = gates.lock();
    gates
        .get_mut(&op)
        .and_then(|held| (!held.is_empty()).then(|| held.remove(0)))
}

fn renumber(pieces: &mut [Piece]) {
    for (idx, piece) in pieces.iter_mut().enumerate() {
        piece.numero = idx as u32 + 1;
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list(&self, document: &DocumentId) -> RemoteResult<Vec<Piece>> {
        self.enter(RemoteOp::List).await?;
        let state = self.state.read().await;
        Ok(state.documents.get(document).cloned().unwrap_or_default())
    }

    async fn create(&self, document: &DocumentId, new_piece: NewPiece) -> RemoteResult<Piece> {
        self.enter(RemoteOp::Create).await?;

        let mut state = self.state.write().await;
        let list = state.documents.entry(document.clone()).or_default();
        let next_numero = list.iter().map(|p| p.numero).max().unwrap_or(0) + 1;

        let mut piece = Piece::new(
            PieceId::generate(),
            document.clone(),
            new_piece.name.clone(),
            new_piece.original_filename.clone(),
            new_piece.mime_type.clone(),
            new_piece.size(),
        )
        .with_content_ref(generate_disk_filename(document, &new_piece.original_filename));
        piece.description = normalize_description(new_piece.description.clone());
        piece.numero = next_numero;
        list.push(piece.clone());

        state.contents.insert(
            piece.id.clone(),
            Content {
                data: new_piece.data,
                mime_type: new_piece.mime_type,
            },
        );
        drop(state);

        self.leave(RemoteOp::Create).await;
        Ok(piece)
    }

    async fn update(
        &self,
        document: &DocumentId,
        id: &PieceId,
        update: &PieceUpdate,
    ) -> RemoteResult<Piece> {
        self.enter(RemoteOp::Update).await?;

        let mut state = self.state.write().await;
        let piece = state
            .documents
            .get_mut(document)
            .and_then(|list| list.iter_mut().find(|p| &p.id == id))
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        update.apply_to(piece);
        let stored = piece.clone();
        drop(state);

        self.leave(RemoteOp::Update).await;
        Ok(stored)
    }

    async fn delete(&self, document: &DocumentId, id: &PieceId) -> RemoteResult<()> {
        self.enter(RemoteOp::Delete).await?;

        let mut state = self.state.write().await;
        let list = state
            .documents
            .get_mut(document)
            .ok_or_else(|| RemoteError::NotFound(document.to_string()))?;
        let at = list
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        list.remove(at);
        list.sort_by_key(|p| p.numero);
        renumber(list);
        state.contents.remove(id);
        drop(state);

        self.leave(RemoteOp::Delete).await;
        Ok(())
    }

    async fn reorder(&self, document: &DocumentId, order: &[PieceId]) -> RemoteResult<()> {
        self.enter(RemoteOp::Reorder).await?;

        let mut state = self.state.write().await;
        let list = state.documents.entry(document.clone()).or_default();
        let current: Vec<PieceId> = list.iter().map(|p| p.id.clone()).collect();
        if !is_permutation(&current, order) {
            return Err(RemoteError::Rejected(
                "reorder must list every piece exactly once".to_string(),
            ));
        }

        let now = Utc::now();
        for piece in list.iter_mut() {
            if let Some(idx) = order.iter().position(|id| id == &piece.id) {
                piece.numero = idx as u32 + 1;
                piece.updated_at = now;
            }
        }
        list.sort_by_key(|p| p.numero);
        drop(state);

        self.leave(RemoteOp::Reorder).await;
        Ok(())
    }

    async fn fetch_content(&self, id: &PieceId) -> RemoteResult<Content> {
        self.enter(RemoteOp::FetchContent).await?;

        let state = self.state.read().await;
        state
            .contents
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
