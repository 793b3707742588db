//! Piece Store
//!
//! Owns a document's piece collection and the optimistic-update protocol.
//!
//! Two views are kept: the last *confirmed* collection and the *current*
//! collection shown to the user (confirmed plus every in-flight mutation).
//! A mutation is applied to the current view immediately by [`PieceStore::begin`],
//! which hands back a [`MutationTicket`]. The ticket carries the number of
//! confirmed mutations at issue time; when the response arrives the caller
//! settles the ticket with [`PieceStore::confirm`] or [`PieceStore::rollback`].
//!
//! A response issued before some other mutation was confirmed is stale: it is
//! never applied on top of the newer state. The store reports
//! [`Settlement::ResyncRequired`] instead and the caller reloads the
//! authoritative list (see [`refresh`]). Until that reload lands, the stale
//! change stays in the current view and is marked as awaiting the reload.
//!
//! All state transitions run under one lock and never await while holding it,
//! so mutations are applied to the collection strictly one at a time.

use parking_lot::Mutex;
use pc_core::DocumentId;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::collection::{Mutation, PieceCollection};
use crate::error::{PieceError, PieceResult};
use crate::model::Piece;
use crate::remote::{RemoteError, RemoteStore};

/// How a settled ticket affected the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The mutation is now part of the confirmed state
    Applied,
    /// The optimistic change was undone
    RolledBack,
    /// The ticket was invalidated by a resync; the response was ignored
    Discarded,
    /// The local view can no longer be trusted; reload from the remote store
    ResyncRequired,
}

/// Result of a user-level operation after its response was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Confirmed by the remote store
    Committed,
    /// Nothing to do (e.g. dropping a piece on itself)
    Unchanged,
    /// The response was stale; the collection was reloaded from the remote store
    Resynced,
    /// Committed remotely, but the reload it called for failed; the next load settles it
    ReloadPending,
    /// The response arrived after a reload and was ignored
    Discarded,
}

/// Receipt for an optimistically applied mutation
#[derive(Debug)]
#[must_use = "a ticket must be confirmed or rolled back"]
pub struct MutationTicket {
    stamp: u64,
    version: u64,
    kind: &'static str,
}

impl MutationTicket {
    /// Number of confirmed mutations when this one was issued
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

#[derive(Debug)]
struct PendingMutation {
    stamp: u64,
    mutation: Mutation,
    /// Current view before this mutation was applied
    snapshot: PieceCollection,
    /// Value of `applied_version` right after this mutation was applied
    applied_at: u64,
    /// Committed remotely with a stale response; kept in the view until a resync
    awaiting_reload: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    confirmed: PieceCollection,
    current: PieceCollection,
    /// Number of confirmed mutations (resyncs count as one)
    confirmed_version: u64,
    /// Bumped on every change to `current`
    applied_version: u64,
    next_stamp: u64,
    /// In-flight mutations in issue order
    pending: Vec<PendingMutation>,
}

impl StoreState {
    /// Rebuild the current view from confirmed state plus in-flight mutations
    fn rebuild(&mut self) -> bool {
        let mut view = self.confirmed.clone();
        for entry in &self.pending {
            match view.apply(&entry.mutation) {
                Ok(next) => view = next,
                Err(e) => {
                    debug!(
                        error = %e,
                        kind = entry.mutation.kind(),
                        "In-flight mutation no longer applies"
                    );
                    self.current = self.confirmed.clone();
                    self.applied_version += 1;
                    return false;
                }
            }
        }
        self.current = view;
        self.applied_version += 1;
        true
    }

    /// Keep a remotely committed change visible until the next resync
    fn await_reload(&mut self, idx: usize) {
        self.pending[idx].awaiting_reload = true;
    }
}

/// The in-memory authority over a document's ordered pieces
pub struct PieceStore {
    state: Mutex<StoreState>,
    changes: watch::Sender<PieceCollection>,
}

impl Default for PieceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PieceStore {
    pub fn new() -> Self {
        Self::with_collection(PieceCollection::new())
    }

    /// Start from an already confirmed collection
    pub fn with_collection(collection: PieceCollection) -> Self {
        let (changes, _) = watch::channel(collection.clone());
        Self {
            state: Mutex::new(StoreState {
                confirmed: collection.clone(),
                current: collection,
                ..StoreState::default()
            }),
            changes,
        }
    }

    /// Current ordered pieces, including optimistic changes
    pub fn list(&self) -> PieceCollection {
        self.state.lock().current.clone()
    }

    /// Last confirmed ordered pieces
    pub fn confirmed(&self) -> PieceCollection {
        self.state.lock().confirmed.clone()
    }

    /// Number of confirmed mutations so far
    pub fn confirmed_version(&self) -> u64 {
        self.state.lock().confirmed_version
    }

    /// Number of mutations awaiting a response
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .pending
            .iter()
            .filter(|p| !p.awaiting_reload)
            .count()
    }

    /// Whether a committed change is only held locally until the next resync
    pub fn reload_owed(&self) -> bool {
        self.state.lock().pending.iter().any(|p| p.awaiting_reload)
    }

    /// Watch the current collection; fires on every change
    pub fn subscribe(&self) -> watch::Receiver<PieceCollection> {
        self.changes.subscribe()
    }

    fn publish(&self, current: PieceCollection) {
        self.changes.send_replace(current);
    }

    /// Apply a mutation the remote store has already confirmed (e.g. an upload).
    ///
    /// An insert whose piece is already confirmed was picked up by a reload
    /// that ran before the response arrived; it is accepted as is.
    pub fn apply_confirmed(&self, mutation: Mutation) -> PieceResult<PieceCollection> {
        let current = {
            let mut state = self.state.lock();
            if let Mutation::Insert { piece, .. } = &mutation {
                if state.confirmed.get(&piece.id).is_some() {
                    debug!(id = %piece.id, "Confirmed insert already loaded");
                    return Ok(state.current.clone());
                }
            }
            let confirmed = state.confirmed.apply(&mutation)?;
            state.confirmed = confirmed;
            state.confirmed_version += 1;

            match state.current.apply(&mutation) {
                Ok(current) => {
                    state.current = current;
                    state.applied_version += 1;
                }
                Err(_) => {
                    state.rebuild();
                }
            }
            debug!(
                kind = mutation.kind(),
                version = state.confirmed_version,
                "Applied confirmed mutation"
            );
            state.current.clone()
        };
        self.publish(current.clone());
        Ok(current)
    }

    /// Apply a mutation optimistically. Nothing changes if it does not apply.
    pub fn begin(&self, mutation: Mutation) -> PieceResult<MutationTicket> {
        let (ticket, current) = {
            let mut state = self.state.lock();
            let next = state.current.apply(&mutation)?;
            let snapshot = std::mem::replace(&mut state.current, next);
            state.applied_version += 1;

            state.next_stamp += 1;
            let ticket = MutationTicket {
                stamp: state.next_stamp,
                version: state.confirmed_version,
                kind: mutation.kind(),
            };
            let applied_at = state.applied_version;
            state.pending.push(PendingMutation {
                stamp: ticket.stamp,
                mutation,
                snapshot,
                applied_at,
                awaiting_reload: false,
            });
            debug!(
                kind = ticket.kind,
                stamp = ticket.stamp,
                version = ticket.version,
                "Applied optimistic mutation"
            );
            (ticket, state.current.clone())
        };
        self.publish(current);
        Ok(ticket)
    }

    /// Settle a ticket whose request succeeded.
    ///
    /// `confirmed` replaces the optimistic mutation when the remote store
    /// returned its own version of the change (e.g. the stored rename).
    pub fn confirm(&self, ticket: MutationTicket, confirmed: Option<Mutation>) -> Settlement {
        let (settlement, current) = {
            let mut state = self.state.lock();
            let Some(idx) = state.pending.iter().position(|p| p.stamp == ticket.stamp) else {
                debug!(
                    kind = ticket.kind,
                    stamp = ticket.stamp,
                    "Ignoring response for invalidated mutation"
                );
                return Settlement::Discarded;
            };

            if ticket.version != state.confirmed_version {
                warn!(
                    kind = ticket.kind,
                    issued_at = ticket.version,
                    confirmed = state.confirmed_version,
                    "Stale response; a newer mutation was confirmed first"
                );
                state.await_reload(idx);
                return Settlement::ResyncRequired;
            }

            let mutation = confirmed.unwrap_or_else(|| state.pending[idx].mutation.clone());
            match state.confirmed.apply(&mutation) {
                Ok(next) => {
                    state.confirmed = next;
                    state.confirmed_version += 1;
                    state.pending.remove(idx);
                }
                Err(e) => {
                    warn!(
                        kind = ticket.kind,
                        error = %e,
                        "Confirmed mutation does not apply to confirmed state"
                    );
                    state.await_reload(idx);
                    return Settlement::ResyncRequired;
                }
            }

            // Later in-flight mutations that no longer apply drop out of the
            // view here; their own responses will come back stale.
            state.rebuild();
            (Settlement::Applied, state.current.clone())
        };
        self.publish(current);
        settlement
    }

    /// Settle a ticket whose request failed, undoing its optimistic change
    pub fn rollback(&self, ticket: MutationTicket) -> Settlement {
        let (settlement, current) = {
            let mut state = self.state.lock();
            let Some(idx) = state.pending.iter().position(|p| p.stamp == ticket.stamp) else {
                return Settlement::Discarded;
            };
            let entry = state.pending.remove(idx);

            let settlement = if entry.applied_at == state.applied_version {
                // Nothing touched the view since; restore it as it was
                state.current = entry.snapshot;
                state.applied_version += 1;
                Settlement::RolledBack
            } else if state.rebuild() {
                Settlement::RolledBack
            } else {
                Settlement::ResyncRequired
            };
            debug!(kind = ticket.kind, stamp = ticket.stamp, ?settlement, "Rolled back mutation");
            (settlement, state.current.clone())
        };
        self.publish(current);
        settlement
    }

    /// Replace all state with the authoritative list.
    ///
    /// Every outstanding ticket is invalidated; late responses are discarded.
    /// Changes held for a reload are dropped, since the list now includes them.
    pub fn resync(&self, pieces: Vec<Piece>) -> PieceResult<PieceCollection> {
        let collection = PieceCollection::from_server(pieces)?;
        {
            let mut state = self.state.lock();
            let dropped = state.pending.len();
            state.confirmed = collection.clone();
            state.current = collection.clone();
            state.pending.clear();
            state.confirmed_version += 1;
            state.applied_version += 1;
            info!(count = collection.len(), dropped, "Resynchronized pieces");
        }
        self.publish(collection.clone());
        Ok(collection)
    }
}

/// Reload the authoritative list from the remote store
pub async fn refresh<R: RemoteStore + ?Sized>(
    store: &PieceStore,
    remote: &R,
    document: &DocumentId,
) -> PieceResult<PieceCollection> {
    let pieces = remote.list(document).await?;
    store.resync(pieces)
}

/// Settle a successful response, reloading when it turned out stale
pub(crate) async fn settle_success<R: RemoteStore + ?Sized>(
    store: &PieceStore,
    remote: &R,
    document: &DocumentId,
    ticket: MutationTicket,
    confirmed: Option<Mutation>,
) -> PieceResult<Outcome> {
    match store.confirm(ticket, confirmed) {
        Settlement::Applied | Settlement::RolledBack => Ok(Outcome::Committed),
        Settlement::Discarded => Ok(Outcome::Discarded),
        Settlement::ResyncRequired => match refresh(store, remote, document).await {
            Ok(_) => Ok(Outcome::Resynced),
            Err(e) => {
                // The remote store accepted the change; only the reload is owed
                warn!(error = %e, "Reload after stale response failed");
                Ok(Outcome::ReloadPending)
            }
        },
    }
}

/// Settle a failed response and hand back the error to surface
pub(crate) async fn settle_failure<R: RemoteStore + ?Sized>(
    store: &PieceStore,
    remote: &R,
    document: &DocumentId,
    ticket: MutationTicket,
    error: RemoteError,
) -> PieceError {
    if store.rollback(ticket) == Settlement::ResyncRequired {
        if let Err(e) = refresh(store, remote, document).await {
            warn!(error = %e, "Reload after failed mutation also failed");
        }
    }
    PieceError::Network(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collection, ids, piece};

    fn store(names: &[&str]) -> PieceStore {
        PieceStore::with_collection(collection(names))
    }

    #[test]
    fn test_begin_applies_immediately_and_confirm_commits() {
        let store = store(&["A", "B", "C"]);
        let ticket = store.begin(Mutation::Remove("B".into())).unwrap();

        assert_eq!(store.list().ids(), ids(&["A", "C"]));
        assert_eq!(store.confirmed().ids(), ids(&["A", "B", "C"]));
        assert_eq!(store.pending_count(), 1);
        assert_eq!(ticket.version(), 0);

        assert_eq!(store.confirm(ticket, None), Settlement::Applied);
        assert_eq!(store.confirmed().ids(), ids(&["A", "C"]));
        assert_eq!(store.confirmed_version(), 1);
        assert_eq!(store.pending_count(), 0);
        store.list().check_invariants().unwrap();
    }

    #[test]
    fn test_rejected_mutation_leaves_store_unchanged() {
        let store = store(&["A", "B"]);
        let result = store.begin(Mutation::Reorder(ids(&["A", "Z"])));

        assert!(matches!(result, Err(PieceError::InvariantViolation(_))));
        assert_eq!(store.list().ids(), ids(&["A", "B"]));
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let store = store(&["A", "B", "C"]);
        let ticket = store.begin(Mutation::Remove("A".into())).unwrap();
        assert_eq!(store.list().get(&"B".into()).unwrap().numero, 1);

        assert_eq!(store.rollback(ticket), Settlement::RolledBack);
        let list = store.list();
        assert_eq!(list.ids(), ids(&["A", "B", "C"]));
        assert_eq!(list.get(&"B".into()).unwrap().numero, 2);
    }

    #[test]
    fn test_rollback_of_earlier_mutation_keeps_later_one() {
        let store = store(&["A", "B", "C"]);
        let rename = store
            .begin(Mutation::Rename {
                id: "A".into(),
                name: "Renamed".into(),
                description: None,
            })
            .unwrap();
        let _remove = store.begin(Mutation::Remove("C".into())).unwrap();

        // Not the latest applied change: rebuilt from confirmed + remaining
        assert_eq!(store.rollback(rename), Settlement::RolledBack);
        let list = store.list();
        assert_eq!(list.ids(), ids(&["A", "B"]));
        assert_eq!(list.get(&"A".into()).unwrap().name, "A");
    }

    #[test]
    fn test_stale_confirmation_requires_resync() {
        let store = store(&["A", "B", "C"]);
        let first = store.begin(Mutation::Reorder(ids(&["C", "A", "B"]))).unwrap();
        let second = store.begin(Mutation::Remove("B".into())).unwrap();

        // The later request completes first
        assert_eq!(store.confirm(second, None), Settlement::Applied);
        // The earlier one was issued before that confirmation: stale
        assert_eq!(store.confirm(first, None), Settlement::ResyncRequired);
    }

    #[test]
    fn test_stale_change_survives_rebuild_until_resync() {
        let store = store(&["A", "B", "C"]);
        let rename = store
            .begin(Mutation::Rename {
                id: "A".into(),
                name: "Renamed".into(),
                description: None,
            })
            .unwrap();
        let remove_c = store.begin(Mutation::Remove("C".into())).unwrap();
        let remove_b = store.begin(Mutation::Remove("B".into())).unwrap();

        assert_eq!(store.confirm(remove_c, None), Settlement::Applied);
        assert_eq!(store.confirm(rename, None), Settlement::ResyncRequired);
        assert!(store.reload_owed());
        assert_eq!(store.pending_count(), 1);

        // Rebuilt from confirmed plus what is still held locally
        assert_eq!(store.rollback(remove_b), Settlement::RolledBack);
        let list = store.list();
        assert_eq!(list.ids(), ids(&["A", "B"]));
        assert_eq!(list.get(&"A".into()).unwrap().name, "Renamed");

        let mut renamed = piece("A");
        renamed.name = "Renamed".into();
        store.resync(vec![renamed, piece("B")]).unwrap();
        assert!(!store.reload_owed());
        assert_eq!(store.list().get(&"A".into()).unwrap().name, "Renamed");
    }

    #[test]
    fn test_confirmed_insert_already_loaded_is_accepted() {
        let store = store(&["A"]);
        store.resync(vec![piece("A"), piece("B")]).unwrap();
        let version = store.confirmed_version();

        let list = store
            .apply_confirmed(Mutation::Insert {
                piece: piece("B"),
                position: None,
            })
            .unwrap();

        assert_eq!(list.ids(), ids(&["A", "B"]));
        assert_eq!(store.confirmed_version(), version);
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_responses_after_resync_are_discarded() {
        let store = store(&["A", "B"]);
        let ticket = store.begin(Mutation::Remove("A".into())).unwrap();

        store
            .resync(vec![piece("B"), piece("A"), piece("C")])
            .unwrap();
        assert_eq!(store.pending_count(), 0);

        assert_eq!(store.confirm(ticket, None), Settlement::Discarded);
        assert_eq!(store.list().len(), 3);
        store.list().check_invariants().unwrap();
    }

    #[test]
    fn test_confirmed_insert_while_reorder_in_flight() {
        let store = store(&["A", "B"]);
        let reorder = store.begin(Mutation::Reorder(ids(&["B", "A"]))).unwrap();

        store
            .apply_confirmed(Mutation::Insert {
                piece: piece("C"),
                position: None,
            })
            .unwrap();
        assert_eq!(store.list().ids(), ids(&["B", "A", "C"]));
        store.list().check_invariants().unwrap();

        // The reorder was issued before the upload was confirmed
        assert_eq!(store.confirm(reorder, None), Settlement::ResyncRequired);
    }

    #[test]
    fn test_confirm_uses_server_values() {
        let store = store(&["A"]);
        let ticket = store
            .begin(Mutation::Rename {
                id: "A".into(),
                name: "local".into(),
                description: None,
            })
            .unwrap();

        let mut stored = piece("A");
        stored.name = "server".into();
        assert_eq!(
            store.confirm(ticket, Some(Mutation::rename_from(&stored))),
            Settlement::Applied
        );
        assert_eq!(store.list().get(&"A".into()).unwrap().name, "server");
    }

    #[test]
    fn test_subscribers_see_every_change() {
        let store = store(&["A", "B"]);
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        let ticket = store.begin(Mutation::Remove("A".into())).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().ids(), ids(&["B"]));

        store.rollback(ticket);
        assert_eq!(rx.borrow_and_update().ids(), ids(&["A", "B"]));
    }
}
