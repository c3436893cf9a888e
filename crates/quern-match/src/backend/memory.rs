//! The in-memory index backend.
//!
//! Used by the test suites and the CLI: documents are added up front, then
//! the database is wrapped in an `Arc` and read by matches. Postings are
//! plain sorted vectors shared with the leaf postlists.

use std::collections::BTreeMap;
use std::sync::Arc;

use quern_weight::{DocCount, DocId, Position, TermCount, ValueSlot};

use crate::backend::{AllTermsEntry, Database, Document, PositionList, TermListEntry, ValueList};
use crate::postlist::{AllDocsPostList, LeafPostList, TermPostList};
use crate::MatchError;

/// A term occurrence being added to a document.
#[derive(Debug, Clone, Default)]
pub struct TermInput {
    /// The indexed term.
    pub term: String,
    /// Within-document frequency.
    pub wdf: TermCount,
    /// Positions of the term in the document (may be empty).
    pub positions: Vec<Position>,
}

/// A document being added to the index.
#[derive(Debug, Clone, Default)]
pub struct DocInput {
    /// Opaque payload returned with match results.
    pub data: String,
    /// Term occurrences.
    pub terms: Vec<TermInput>,
    /// Value slot contents.
    pub values: Vec<(ValueSlot, String)>,
}

impl DocInput {
    /// Builds a document by naively tokenising `text`.
    ///
    /// Tokens are lowercased runs of alphanumeric characters, with
    /// positions numbered from 1. The text itself becomes the payload.
    pub fn from_text(text: &str) -> Self {
        let mut terms: BTreeMap<String, TermInput> = BTreeMap::new();
        let mut position: Position = 0;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            position += 1;
            let token = token.to_lowercase();
            let entry = terms.entry(token.clone()).or_insert_with(|| TermInput {
                term: token,
                wdf: 0,
                positions: Vec::new(),
            });
            entry.wdf += 1;
            entry.positions.push(position);
        }
        Self {
            data: text.to_string(),
            terms: terms.into_values().collect(),
            values: Vec::new(),
        }
    }

    /// Attaches a value slot to the document.
    pub fn with_value(mut self, slot: ValueSlot, value: impl Into<String>) -> Self {
        self.values.push((slot, value.into()));
        self
    }
}

/// Per-term posting data.
#[derive(Debug, Default)]
struct TermPostings {
    /// `(docid, wdf)` pairs, ascending.
    postings: Vec<(DocId, TermCount)>,
    /// Total occurrences across the shard.
    collfreq: u64,
    /// Highest wdf in any single document.
    wdf_upper_bound: TermCount,
    /// Positional data per document.
    positions: BTreeMap<DocId, Arc<[Position]>>,
}

/// A stored document's index-side record.
#[derive(Debug)]
struct MemoryDoc {
    /// Opaque payload.
    data: String,
    /// Value slot contents.
    values: Vec<(ValueSlot, String)>,
    /// Document length in terms.
    doclen: TermCount,
    /// Number of distinct terms.
    unique_terms: TermCount,
    /// Term list, sorted by term.
    terms: Vec<TermListEntry>,
}

/// Per-slot value data.
#[derive(Debug, Default)]
struct SlotData {
    /// `(docid, value)` pairs, ascending by docid.
    entries: Vec<(DocId, String)>,
    /// Smallest value in the slot.
    lower_bound: String,
    /// Largest value in the slot.
    upper_bound: String,
}

/// An in-memory shard.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    /// Documents by `did - 1`.
    docs: Vec<MemoryDoc>,
    /// The term dictionary.
    terms: BTreeMap<String, TermPostings>,
    /// Value slots.
    slots: BTreeMap<ValueSlot, SlotData>,
    /// Sum of document lengths.
    total_length: u64,
    /// Whether any positional data was added.
    any_positions: bool,
    /// Cached posting arcs, built lazily on first open.
    frozen: std::sync::OnceLock<FrozenPostings>,
}

/// Posting data shared with leaf postlists once reads begin.
#[derive(Debug, Default)]
struct FrozenPostings {
    /// Per-term postings as shared slices.
    postings: BTreeMap<String, Arc<[(DocId, TermCount)]>>,
    /// Every docid, for the all-documents postlist.
    all_docids: Arc<[DocId]>,
}

impl MemoryDatabase {
    /// Creates an empty shard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document, returning its shard-local docid.
    pub fn add_document(&mut self, input: DocInput) -> DocId {
        assert!(
            self.frozen.get().is_none(),
            "documents cannot be added once the index is being read"
        );
        let did = self.docs.len() as DocId + 1;
        let mut doclen: TermCount = 0;
        let mut term_list = Vec::with_capacity(input.terms.len());
        for term in &input.terms {
            let wdf = term.wdf.max(term.positions.len() as TermCount);
            doclen += wdf;
            let entry = self.terms.entry(term.term.clone()).or_default();
            entry.postings.push((did, wdf));
            entry.collfreq += u64::from(wdf);
            entry.wdf_upper_bound = entry.wdf_upper_bound.max(wdf);
            if !term.positions.is_empty() {
                let mut positions = term.positions.clone();
                positions.sort_unstable();
                positions.dedup();
                entry.positions.insert(did, Arc::from(positions));
                self.any_positions = true;
            }
            term_list.push(TermListEntry {
                term: term.term.clone(),
                wdf,
            });
        }
        term_list.sort_by(|a, b| a.term.cmp(&b.term));
        for (slot, value) in &input.values {
            let slot_data = self.slots.entry(*slot).or_default();
            if slot_data.entries.is_empty() || *value < slot_data.lower_bound {
                slot_data.lower_bound = value.clone();
            }
            if slot_data.entries.is_empty() || *value > slot_data.upper_bound {
                slot_data.upper_bound = value.clone();
            }
            slot_data.entries.push((did, value.clone()));
        }
        self.total_length += u64::from(doclen);
        self.docs.push(MemoryDoc {
            data: input.data,
            values: input.values,
            doclen,
            unique_terms: input.terms.len() as TermCount,
            terms: term_list,
        });
        did
    }

    /// Adds a document built from plain text.
    pub fn add_text(&mut self, text: &str) -> DocId {
        self.add_document(DocInput::from_text(text))
    }

    /// The frozen posting arcs, built on first read.
    fn frozen(&self) -> &FrozenPostings {
        self.frozen.get_or_init(|| FrozenPostings {
            postings: self
                .terms
                .iter()
                .map(|(term, data)| (term.clone(), Arc::from(data.postings.as_slice())))
                .collect(),
            all_docids: (1..=self.docs.len() as DocId).collect(),
        })
    }

    /// The index-side record for `did`.
    fn doc(&self, did: DocId) -> Result<&MemoryDoc, MatchError> {
        if did == 0 {
            return Err(MatchError::invalid("document id 0 is not valid"));
        }
        self.docs
            .get((did - 1) as usize)
            .ok_or(MatchError::DocNotFound(did))
    }
}

impl Database for MemoryDatabase {
    fn doccount(&self) -> DocCount {
        self.docs.len() as DocCount
    }

    fn lastdocid(&self) -> DocId {
        self.docs.len() as DocId
    }

    fn avlength(&self) -> f64 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.docs.len() as f64
        }
    }

    fn total_length(&self) -> u64 {
        self.total_length
    }

    fn doclength(&self, did: DocId) -> Result<TermCount, MatchError> {
        Ok(self.doc(did)?.doclen)
    }

    fn unique_terms(&self, did: DocId) -> Result<TermCount, MatchError> {
        Ok(self.doc(did)?.unique_terms)
    }

    fn doclength_lower_bound(&self) -> TermCount {
        self.docs.iter().map(|d| d.doclen).min().unwrap_or(0)
    }

    fn doclength_upper_bound(&self) -> TermCount {
        self.docs.iter().map(|d| d.doclen).max().unwrap_or(0)
    }

    fn wdf_upper_bound(&self, term: &str) -> TermCount {
        self.terms.get(term).map_or(0, |t| t.wdf_upper_bound)
    }

    fn has_positions(&self) -> bool {
        self.any_positions
    }

    fn termfreq(&self, term: &str) -> DocCount {
        self.terms.get(term).map_or(0, |t| t.postings.len() as DocCount)
    }

    fn collection_freq(&self, term: &str) -> u64 {
        self.terms.get(term).map_or(0, |t| t.collfreq)
    }

    fn open_post_list(&self, term: &str) -> Result<Box<dyn LeafPostList>, MatchError> {
        let frozen = self.frozen();
        if term.is_empty() {
            return Ok(Box::new(AllDocsPostList::new(Arc::clone(
                &frozen.all_docids,
            ))));
        }
        let postings = match frozen.postings.get(term) {
            Some(postings) => Arc::clone(postings),
            None => {
                let empty: Arc<[(DocId, TermCount)]> = Arc::new([]);
                empty
            }
        };
        Ok(Box::new(TermPostList::new(term, postings)))
    }

    fn open_term_list(&self, did: DocId) -> Result<Vec<TermListEntry>, MatchError> {
        Ok(self.doc(did)?.terms.clone())
    }

    fn open_allterms(&self, prefix: &str) -> Result<Vec<AllTermsEntry>, MatchError> {
        Ok(self
            .terms
            .range(prefix.to_string()..)
            .take_while(|(term, _)| term.starts_with(prefix))
            .map(|(term, data)| AllTermsEntry {
                term: term.clone(),
                termfreq: data.postings.len() as DocCount,
                collfreq: data.collfreq,
            })
            .collect())
    }

    fn open_position_list(&self, did: DocId, term: &str) -> Result<PositionList, MatchError> {
        self.doc(did)?;
        let positions = match self.terms.get(term).and_then(|t| t.positions.get(&did)) {
            Some(positions) => Arc::clone(positions),
            None => {
                let empty: Arc<[Position]> = Arc::new([]);
                empty
            }
        };
        Ok(PositionList::new(positions))
    }

    fn open_document(&self, did: DocId, _lazy: bool) -> Result<Document, MatchError> {
        let doc = self.doc(did)?;
        Ok(Document::new(did, doc.data.clone(), doc.values.clone()))
    }

    fn value_lower_bound(&self, slot: ValueSlot) -> String {
        self.slots.get(&slot).map_or_else(String::new, |s| s.lower_bound.clone())
    }

    fn value_upper_bound(&self, slot: ValueSlot) -> String {
        self.slots.get(&slot).map_or_else(String::new, |s| s.upper_bound.clone())
    }

    fn value_freq(&self, slot: ValueSlot) -> DocCount {
        self.slots.get(&slot).map_or(0, |s| s.entries.len() as DocCount)
    }

    fn open_value_list(&self, slot: ValueSlot) -> Result<Box<dyn ValueList>, MatchError> {
        let entries = self
            .slots
            .get(&slot)
            .map_or_else(Vec::new, |s| s.entries.clone());
        Ok(Box::new(MemoryValueList {
            entries,
            cursor: usize::MAX,
        }))
    }
}

/// Value list cursor over a slot's `(docid, value)` pairs.
struct MemoryValueList {
    /// The pairs, ascending by docid.
    entries: Vec<(DocId, String)>,
    /// Cursor index, `usize::MAX` before the first advance.
    cursor: usize,
}

impl ValueList for MemoryValueList {
    fn next_value(&mut self) -> Result<(), MatchError> {
        self.cursor = self.cursor.wrapping_add(1);
        Ok(())
    }

    fn skip_to(&mut self, did: DocId) -> Result<(), MatchError> {
        if self.cursor == usize::MAX {
            self.cursor = 0;
        }
        while self.cursor < self.entries.len() && self.entries[self.cursor].0 < did {
            self.cursor += 1;
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.cursor != usize::MAX && self.cursor >= self.entries.len()
    }

    fn docid(&self) -> DocId {
        self.entries[self.cursor].0
    }

    fn value(&self) -> &str {
        &self.entries[self.cursor].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fruit_db() -> MemoryDatabase {
        let mut db = MemoryDatabase::new();
        db.add_text("ripe mango");
        db.add_text("green mango");
        db.add_text("ripe apple");
        db
    }

    #[test]
    fn counts_and_lengths() {
        let db = fruit_db();
        assert_eq!(db.doccount(), 3);
        assert_eq!(db.lastdocid(), 3);
        assert_eq!(db.termfreq("mango"), 2);
        assert_eq!(db.termfreq("ripe"), 2);
        assert_eq!(db.termfreq("missing"), 0);
        assert_eq!(db.collection_freq("mango"), 2);
        assert!((db.avlength() - 2.0).abs() < 1e-12);
        assert_eq!(db.doclength(1).unwrap(), 2);
        assert_eq!(db.unique_terms(1).unwrap(), 2);
        assert!(db.doclength(9).is_err());
    }

    #[test]
    fn postlist_yields_matching_docs() {
        let db = fruit_db();
        let mut pl = db.open_post_list("mango").unwrap();
        let mut dids = Vec::new();
        loop {
            pl.next(0.0).unwrap();
            if pl.at_end() {
                break;
            }
            dids.push(pl.docid());
        }
        assert_eq!(dids, vec![1, 2]);
    }

    #[test]
    fn empty_term_matches_everything() {
        let db = fruit_db();
        let mut pl = db.open_post_list("").unwrap();
        let mut count = 0;
        loop {
            pl.next(0.0).unwrap();
            if pl.at_end() {
                break;
            }
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn positions_are_recorded() {
        let db = fruit_db();
        let mut positions = db.open_position_list(1, "mango").unwrap();
        assert!(positions.next_pos());
        assert_eq!(positions.position(), 2);
        assert!(db.has_positions());
    }

    #[test]
    fn allterms_respects_prefix() {
        let db = fruit_db();
        let terms: Vec<String> = db
            .open_allterms("m")
            .unwrap()
            .into_iter()
            .map(|e| e.term)
            .collect();
        assert_eq!(terms, vec!["mango"]);
        assert_eq!(db.open_allterms("").unwrap().len(), 4);
    }

    #[test]
    fn value_slots_round_trip() {
        let mut db = MemoryDatabase::new();
        db.add_document(DocInput::from_text("one").with_value(0, "b"));
        db.add_document(DocInput::from_text("two").with_value(0, "a"));
        assert_eq!(db.value_freq(0), 2);
        assert_eq!(db.value_lower_bound(0), "a");
        assert_eq!(db.value_upper_bound(0), "b");

        let mut list = db.open_value_list(0).unwrap();
        list.next_value().unwrap();
        assert_eq!((list.docid(), list.value()), (1, "b"));
        list.next_value().unwrap();
        assert_eq!((list.docid(), list.value()), (2, "a"));
        list.next_value().unwrap();
        assert!(list.at_end());
    }
}
