//! Shard-local read access to an inverted index.
//!
//! The match engine only ever touches an index through the [`Database`]
//! trait, so on-disk formats, remote transports and test fixtures all plug
//! in the same way. The [`memory`] module provides the in-memory backend
//! used by tests and the CLI.

pub mod memory;

use std::sync::Arc;

use quern_weight::{DocCount, DocId, Position, TermCount, ValueSlot};

use crate::postlist::LeafPostList;
use crate::MatchError;

/// One entry of a document's term list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermListEntry {
    /// The indexed term.
    pub term: String,
    /// Within-document frequency of the term.
    pub wdf: TermCount,
}

/// One entry of the term dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllTermsEntry {
    /// The indexed term.
    pub term: String,
    /// Number of documents indexed by the term.
    pub termfreq: DocCount,
    /// Total occurrences across the shard.
    pub collfreq: u64,
}

/// A stored document: opaque data payload plus value slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Shard-local document id.
    pub did: DocId,
    /// Opaque payload set at index time.
    pub data: String,
    /// Value slot contents, sorted by slot.
    values: Vec<(ValueSlot, String)>,
}

impl Document {
    /// Creates a document from its parts.
    pub fn new(did: DocId, data: String, mut values: Vec<(ValueSlot, String)>) -> Self {
        values.sort_by_key(|(slot, _)| *slot);
        Self { did, data, values }
    }

    /// The value stored in `slot`, or the empty string.
    pub fn value(&self, slot: ValueSlot) -> &str {
        self.values
            .binary_search_by_key(&slot, |(s, _)| *s)
            .map_or("", |idx| self.values[idx].1.as_str())
    }

    /// Iterates the populated value slots.
    pub fn values(&self) -> impl Iterator<Item = (ValueSlot, &str)> {
        self.values.iter().map(|(slot, v)| (*slot, v.as_str()))
    }
}

/// A cursor over the positions of one term within one document.
///
/// Positions are strictly ascending. The cursor starts before the first
/// position.
#[derive(Debug, Clone)]
pub struct PositionList {
    /// The positions, ascending.
    positions: Arc<[Position]>,
    /// Index of the current position, or `usize::MAX` before the start.
    cursor: usize,
}

impl PositionList {
    /// Creates a cursor over ascending positions.
    pub fn new(positions: Arc<[Position]>) -> Self {
        Self {
            positions,
            cursor: usize::MAX,
        }
    }

    /// The number of positions in the list.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Advances to the next position; returns false at the end.
    pub fn next_pos(&mut self) -> bool {
        self.cursor = self.cursor.wrapping_add(1);
        self.cursor < self.positions.len()
    }

    /// Advances to the first position `>= target`; returns false if none.
    pub fn skip_to(&mut self, target: Position) -> bool {
        // The cursor may already be positioned at or past the target.
        if self.cursor < self.positions.len() && self.positions[self.cursor] >= target {
            return true;
        }
        let start = self.cursor.wrapping_add(1);
        if start >= self.positions.len() {
            self.cursor = self.positions.len();
            return false;
        }
        match self.positions[start..].binary_search(&target) {
            Ok(offset) | Err(offset) => {
                self.cursor = start + offset;
                self.cursor < self.positions.len()
            }
        }
    }

    /// The current position; undefined before the first advance.
    pub fn position(&self) -> Position {
        self.positions[self.cursor]
    }

    /// Whether the cursor has moved past the last position.
    pub fn at_end(&self) -> bool {
        self.cursor != usize::MAX && self.cursor >= self.positions.len()
    }
}

/// A cursor over the documents carrying a value in one slot.
///
/// Yields `(docid, value)` pairs in ascending docid order.
pub trait ValueList {
    /// Advances to the next document; may be called before any positioning.
    fn next_value(&mut self) -> Result<(), MatchError>;

    /// Advances to the first document with id `>= did`.
    fn skip_to(&mut self, did: DocId) -> Result<(), MatchError>;

    /// Whether the cursor is past the last document.
    fn at_end(&self) -> bool;

    /// The current document id.
    fn docid(&self) -> DocId;

    /// The value the current document stores in the slot.
    fn value(&self) -> &str;
}

/// Read access to a single shard of the collection.
///
/// All methods are shard-local; docids are local ids starting at 1.
/// Implementations must be cheap to share (`Arc`) and safe to read from
/// the match thread.
pub trait Database: Send + Sync {
    /// The number of documents in the shard.
    fn doccount(&self) -> DocCount;

    /// The highest document id ever used.
    fn lastdocid(&self) -> DocId;

    /// The average document length in terms.
    fn avlength(&self) -> f64;

    /// The total length of all documents (0 if unknown).
    fn total_length(&self) -> u64;

    /// The length of one document.
    fn doclength(&self, did: DocId) -> Result<TermCount, MatchError>;

    /// The number of distinct terms in one document.
    fn unique_terms(&self, did: DocId) -> Result<TermCount, MatchError>;

    /// A lower bound on any document's length.
    fn doclength_lower_bound(&self) -> TermCount;

    /// An upper bound on any document's length.
    fn doclength_upper_bound(&self) -> TermCount;

    /// An upper bound on `term`'s wdf in any single document.
    fn wdf_upper_bound(&self, term: &str) -> TermCount;

    /// Whether the shard stores positional data.
    fn has_positions(&self) -> bool;

    /// Whether any document is indexed by `term`.
    fn term_exists(&self, term: &str) -> bool {
        self.termfreq(term) != 0
    }

    /// The number of documents indexed by `term`.
    fn termfreq(&self, term: &str) -> DocCount;

    /// The total occurrences of `term` across the shard.
    fn collection_freq(&self, term: &str) -> u64;

    /// Opens a postlist for `term`; the empty term yields the
    /// all-documents postlist (which has no positions).
    fn open_post_list(&self, term: &str) -> Result<Box<dyn LeafPostList>, MatchError>;

    /// The term list of one document.
    fn open_term_list(&self, did: DocId) -> Result<Vec<TermListEntry>, MatchError>;

    /// The term dictionary entries starting with `prefix`, in term order.
    fn open_allterms(&self, prefix: &str) -> Result<Vec<AllTermsEntry>, MatchError>;

    /// The positions of `term` within one document.
    fn open_position_list(&self, did: DocId, term: &str) -> Result<PositionList, MatchError>;

    /// Opens a stored document.
    ///
    /// With `lazy` set the implementation may defer fetching the payload
    /// until a field is read.
    fn open_document(&self, did: DocId, lazy: bool) -> Result<Document, MatchError>;

    /// The smallest value stored in `slot` (empty if the slot is unused).
    fn value_lower_bound(&self, slot: ValueSlot) -> String;

    /// The largest value stored in `slot`.
    fn value_upper_bound(&self, slot: ValueSlot) -> String;

    /// The number of documents with a value in `slot`.
    fn value_freq(&self, slot: ValueSlot) -> DocCount;

    /// A cursor over the documents with a value in `slot`.
    fn open_value_list(&self, slot: ValueSlot) -> Result<Box<dyn ValueList>, MatchError>;

    /// Hints that `did` will shortly be fetched, so transports can
    /// pipeline. The default does nothing.
    fn request_document(&self, _did: DocId) {}

    /// Completes a [`request_document`](Self::request_document) hint.
    fn collect_document(&self, did: DocId) -> Result<Document, MatchError> {
        self.open_document(did, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_value_lookup() {
        let doc = Document::new(3, "payload".into(), vec![(2, "b".into()), (0, "a".into())]);
        assert_eq!(doc.value(0), "a");
        assert_eq!(doc.value(2), "b");
        assert_eq!(doc.value(1), "");
    }

    #[test]
    fn position_list_skip_semantics() {
        let mut positions = PositionList::new(Arc::from([2u32, 5, 9]));
        assert!(positions.skip_to(3));
        assert_eq!(positions.position(), 5);
        // skip_to never moves backwards.
        assert!(positions.skip_to(1));
        assert_eq!(positions.position(), 5);
        assert!(!positions.skip_to(10));
        assert!(positions.at_end());
    }

    #[test]
    fn position_list_iterates() {
        let mut positions = PositionList::new(Arc::from([1u32, 4]));
        assert!(positions.next_pos());
        assert_eq!(positions.position(), 1);
        assert!(positions.next_pos());
        assert_eq!(positions.position(), 4);
        assert!(!positions.next_pos());
        assert!(positions.at_end());
    }
}
