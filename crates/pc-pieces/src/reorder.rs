//! Reorder Coordinator
//!
//! Turns a drag-and-drop gesture into a new order, shows it immediately, and
//! confirms it against the remote store. A rejected reorder is reverted so the
//! visible order never disagrees with the remote one.

use std::sync::Arc;

use pc_core::{DocumentId, PieceId};
use tracing::{info, instrument, warn};

use crate::collection::Mutation;
use crate::error::{PieceError, PieceResult};
use crate::remote::RemoteStore;
use crate::store::{settle_failure, settle_success, Outcome, PieceStore};

/// Move `dragged` so that it sits immediately before `target`.
///
/// List-splice semantics: the dragged id is taken out and reinserted, every
/// other id keeps its relative order.
pub fn splice_before(
    order: &[PieceId],
    dragged: &PieceId,
    target: &PieceId,
) -> PieceResult<Vec<PieceId>> {
    let from = order
        .iter()
        .position(|id| id == dragged)
        .ok_or_else(|| PieceError::NotFound(dragged.clone()))?;
    if !order.contains(target) {
        return Err(PieceError::NotFound(target.clone()));
    }

    let mut next = order.to_vec();
    let moved = next.remove(from);
    let to = next
        .iter()
        .position(|id| id == target)
        .ok_or_else(|| PieceError::NotFound(target.clone()))?;
    next.insert(to, moved);
    Ok(next)
}

pub struct ReorderCoordinator<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
    store: Arc<PieceStore>,
    document: DocumentId,
}

impl<R: RemoteStore + ?Sized> ReorderCoordinator<R> {
    pub fn new(remote: Arc<R>, store: Arc<PieceStore>, document: DocumentId) -> Self {
        Self {
            remote,
            store,
            document,
        }
    }

    /// Drop `dragged` onto `target`
    #[instrument(skip(self), fields(document = %self.document))]
    pub async fn move_before(&self, dragged: &PieceId, target: &PieceId) -> PieceResult<Outcome> {
        if dragged == target {
            return Ok(Outcome::Unchanged);
        }

        let order = splice_before(&self.store.list().ids(), dragged, target)?;
        let ticket = self.store.begin(Mutation::Reorder(order.clone()))?;

        match self.remote.reorder(&self.document, &order).await {
            Ok(()) => {
                let remote = self.remote.as_ref();
                let outcome =
                    settle_success(&self.store, remote, &self.document, ticket, None).await?;
                info!(?outcome, "Order updated");
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Reorder rejected; restoring previous order");
                let remote = self.remote.as_ref();
                Err(settle_failure(&self.store, remote, &self.document, ticket, e).await)
            }
        }
    }
}
