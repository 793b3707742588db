//! Ordered piece collection
//!
//! The collection is the single in-memory view of a document's pieces.
//! Every structural change goes through [`PieceCollection::apply`], which is a
//! pure function of (current collection, mutation) and either yields a new,
//! fully renumbered collection or fails without touching the original.
//!
//! Invariants held by every value of this type:
//! - ids are unique
//! - for N pieces, `numero` values are exactly `1..=N` in collection order

use std::collections::HashSet;

use pc_core::PieceId;
use serde::{Deserialize, Serialize};

use crate::error::{PieceError, PieceResult, ValidationError};
use crate::model::{normalize_description, Piece};

/// A structural or in-place change to the collection
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Place a piece at `position` (0-based), or at the end when `None`
    Insert { piece: Piece, position: Option<usize> },
    /// Remove a piece by id
    Remove(PieceId),
    /// Change a piece's name and description
    Rename {
        id: PieceId,
        name: String,
        description: Option<String>,
    },
    /// Replace the order; must be a permutation of the current ids
    Reorder(Vec<PieceId>),
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Insert { .. } => "insert",
            Mutation::Remove(_) => "remove",
            Mutation::Rename { .. } => "rename",
            Mutation::Reorder(_) => "reorder",
        }
    }

    /// A rename carrying the values of a server-confirmed record
    pub fn rename_from(piece: &Piece) -> Self {
        Mutation::Rename {
            id: piece.id.clone(),
            name: piece.name.clone(),
            description: piece.description.clone(),
        }
    }
}

/// Ordered sequence of pieces with derived numbering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceCollection {
    pieces: Vec<Piece>,
}

impl PieceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pieces in the given order, renumbering them.
    ///
    /// Fails if two pieces share an id.
    pub fn from_ordered(pieces: Vec<Piece>) -> PieceResult<Self> {
        let mut seen = HashSet::with_capacity(pieces.len());
        for piece in &pieces {
            if !seen.insert(&piece.id) {
                return Err(PieceError::invariant(format!("duplicate piece id {}", piece.id)));
            }
        }

        let mut collection = Self { pieces };
        collection.renumber();
        Ok(collection)
    }

    /// Build from a server listing, ordering by the server's numbering
    pub fn from_server(mut pieces: Vec<Piece>) -> PieceResult<Self> {
        pieces.sort_by_key(|p| p.numero);
        Self::from_ordered(pieces)
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Piece> {
        self.pieces.iter()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn get(&self, id: &PieceId) -> Option<&Piece> {
        self.pieces.iter().find(|p| &p.id == id)
    }

    pub fn position(&self, id: &PieceId) -> Option<usize> {
        self.pieces.iter().position(|p| &p.id == id)
    }

    /// The piece currently at `numero`
    pub fn by_numero(&self, numero: u32) -> Option<&Piece> {
        numero
            .checked_sub(1)
            .and_then(|idx| self.pieces.get(idx as usize))
    }

    pub fn ids(&self) -> Vec<PieceId> {
        self.pieces.iter().map(|p| p.id.clone()).collect()
    }

    pub fn into_vec(self) -> Vec<Piece> {
        self.pieces
    }

    /// Apply a mutation, producing a new collection
    pub fn apply(&self, mutation: &Mutation) -> PieceResult<PieceCollection> {
        let mut pieces = self.pieces.clone();

        match mutation {
            Mutation::Insert { piece, position } => {
                if self.get(&piece.id).is_some() {
                    return Err(PieceError::invariant(format!(
                        "piece {} is already in the collection",
                        piece.id
                    )));
                }
                let at = position.unwrap_or(pieces.len());
                if at > pieces.len() {
                    return Err(PieceError::invariant(format!(
                        "insert position {} is past the end ({})",
                        at,
                        pieces.len()
                    )));
                }
                pieces.insert(at, piece.clone());
            }
            Mutation::Remove(id) => {
                let at = self
                    .position(id)
                    .ok_or_else(|| PieceError::NotFound(id.clone()))?;
                pieces.remove(at);
            }
            Mutation::Rename {
                id,
                name,
                description,
            } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ValidationError::MissingName.into());
                }
                let at = self
                    .position(id)
                    .ok_or_else(|| PieceError::NotFound(id.clone()))?;
                let piece = &mut pieces[at];
                piece.name = name.to_string();
                piece.description = normalize_description(description.clone());
            }
            Mutation::Reorder(order) => {
                self.check_permutation(order)?;
                let mut reordered = Vec::with_capacity(order.len());
                for id in order {
                    // check_permutation guarantees every id resolves
                    if let Some(at) = self.position(id) {
                        reordered.push(pieces[at].clone());
                    }
                }
                pieces = reordered;
            }
        }

        let mut next = PieceCollection { pieces };
        next.renumber();
        Ok(next)
    }

    /// Verify the numbering and uniqueness invariants
    pub fn check_invariants(&self) -> PieceResult<()> {
        let mut seen = HashSet::with_capacity(self.pieces.len());
        for (idx, piece) in self.pieces.iter().enumerate() {
            if !seen.insert(&piece.id) {
                return Err(PieceError::invariant(format!("duplicate piece id {}", piece.id)));
            }
            let expected = idx as u32 + 1;
            if piece.numero != expected {
                return Err(PieceError::invariant(format!(
                    "piece {} has numero {} at position {}",
                    piece.id, piece.numero, expected
                )));
            }
        }
        Ok(())
    }

    fn check_permutation(&self, order: &[PieceId]) -> PieceResult<()> {
        if order.len() != self.pieces.len() {
            return Err(PieceError::invariant(format!(
                "reorder lists {} ids but the collection holds {}",
                order.len(),
                self.pieces.len()
            )));
        }

        let mut seen = HashSet::with_capacity(order.len());
        for id in order {
            if self.get(id).is_none() {
                return Err(PieceError::invariant(format!("reorder names unknown piece {}", id)));
            }
            if !seen.insert(id) {
                return Err(PieceError::invariant(format!("reorder repeats piece {}", id)));
            }
        }
        Ok(())
    }

    fn renumber(&mut self) {
        for (idx, piece) in self.pieces.iter_mut().enumerate() {
            piece.numero = idx as u32 + 1;
        }
    }
}

impl<'a> IntoIterator for &'a PieceCollection {
    type Item = &'a Piece;
    type IntoIter = std::slice::Iter<'a, Piece>;

    fn into_iter(self) -> Self::IntoIter {
        self.pieces.iter()
    }
}
