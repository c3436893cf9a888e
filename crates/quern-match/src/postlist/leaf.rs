//! Leaf postlists over in-memory posting data.
//!
//! Backends which keep their postings addressable as a sorted slice can
//! serve the whole leaf contract from these two types; the in-memory
//! backend does exactly that.

use std::sync::Arc;

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs, Weight};

use crate::postlist::{Advanced, DocStats, LeafPostList, PostList};
use crate::MatchError;

/// A postlist over the documents indexed by one term.
pub struct TermPostList {
    /// The term this leaf iterates.
    term: String,
    /// `(docid, wdf)` pairs in ascending docid order.
    postings: Arc<[(DocId, TermCount)]>,
    /// Cursor index, `usize::MAX` before the first advance.
    cursor: usize,
    /// Attached term weight, if the leaf is weighted.
    weight: Option<Box<dyn Weight>>,
    /// Cached `maxpart()` of the attached weight.
    max_weight: f64,
}

impl TermPostList {
    /// Creates a leaf over sorted `(docid, wdf)` postings.
    pub fn new(term: impl Into<String>, postings: Arc<[(DocId, TermCount)]>) -> Self {
        Self {
            term: term.into(),
            postings,
            cursor: usize::MAX,
            weight: None,
            max_weight: 0.0,
        }
    }

    /// Whether the cursor has been advanced at least once.
    fn started(&self) -> bool {
        self.cursor != usize::MAX
    }
}

impl PostList for TermPostList {
    fn termfreq_min(&self) -> DocCount {
        self.postings.len() as DocCount
    }

    fn termfreq_max(&self) -> DocCount {
        self.postings.len() as DocCount
    }

    fn termfreq_est(&self) -> DocCount {
        self.postings.len() as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        match stats.term_stats(&self.term) {
            Some(entry) => TermFreqs::new(entry.termfreq, entry.reltermfreq, entry.collfreq),
            None => TermFreqs::new(self.postings.len() as DocCount, 0, 0),
        }
    }

    fn maxweight(&self) -> f64 {
        self.max_weight
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.max_weight
    }

    fn docid(&self) -> DocId {
        self.postings[self.cursor].0
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        match &self.weight {
            Some(weight) => weight.sumpart(self.wdf(), doc.doclen, doc.unique_terms, doc.wdfdocmax),
            None => 0.0,
        }
    }

    fn wdf(&self) -> TermCount {
        self.postings[self.cursor].1
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        self.cursor = self.cursor.wrapping_add(1);
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, _w_min: f64) -> Result<Advanced, MatchError> {
        if !self.started() {
            self.cursor = 0;
        }
        while self.cursor < self.postings.len() && self.postings[self.cursor].0 < did {
            self.cursor += 1;
        }
        Ok(None)
    }

    fn at_end(&self) -> bool {
        self.started() && self.cursor >= self.postings.len()
    }
}

impl LeafPostList for TermPostList {
    fn set_termweight(&mut self, weight: Box<dyn Weight>) {
        self.max_weight = weight.maxpart();
        self.weight = Some(weight);
    }

    fn term(&self) -> Option<&str> {
        Some(&self.term)
    }
}

/// The all-documents postlist, matching every document with weight 0.
///
/// Positional data is never available through it.
pub struct AllDocsPostList {
    /// Every docid in the shard, ascending.
    docids: Arc<[DocId]>,
    /// Cursor index, `usize::MAX` before the first advance.
    cursor: usize,
}

impl AllDocsPostList {
    /// Creates the leaf over every docid in the shard.
    pub fn new(docids: Arc<[DocId]>) -> Self {
        Self {
            docids,
            cursor: usize::MAX,
        }
    }

    /// Whether the cursor has been advanced at least once.
    fn started(&self) -> bool {
        self.cursor != usize::MAX
    }
}

impl PostList for AllDocsPostList {
    fn termfreq_min(&self) -> DocCount {
        self.docids.len() as DocCount
    }

    fn termfreq_max(&self) -> DocCount {
        self.docids.len() as DocCount
    }

    fn termfreq_est(&self) -> DocCount {
        self.docids.len() as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        TermFreqs::new(stats.collection_size, stats.rset_size, 0)
    }

    fn maxweight(&self) -> f64 {
        0.0
    }

    fn recalc_maxweight(&mut self) -> f64 {
        0.0
    }

    fn docid(&self) -> DocId {
        self.docids[self.cursor]
    }

    fn weight(&self, _doc: &DocStats) -> f64 {
        0.0
    }

    fn wdf(&self) -> TermCount {
        1
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        self.cursor = self.cursor.wrapping_add(1);
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, _w_min: f64) -> Result<Advanced, MatchError> {
        if !self.started() {
            self.cursor = 0;
        }
        while self.cursor < self.docids.len() && self.docids[self.cursor] < did {
            self.cursor += 1;
        }
        Ok(None)
    }

    fn at_end(&self) -> bool {
        self.started() && self.cursor >= self.docids.len()
    }
}

impl LeafPostList for AllDocsPostList {
    fn set_termweight(&mut self, _weight: Box<dyn Weight>) {
        // The all-documents leaf is always boolean.
    }

    fn term(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(postings: &[(DocId, TermCount)]) -> TermPostList {
        TermPostList::new("t", Arc::from(postings))
    }

    #[test]
    fn iterates_in_docid_order() {
        let mut pl = leaf(&[(2, 1), (5, 3), (9, 2)]);
        let mut seen = Vec::new();
        loop {
            pl.next(0.0).unwrap();
            if pl.at_end() {
                break;
            }
            seen.push((pl.docid(), pl.wdf()));
        }
        assert_eq!(seen, vec![(2, 1), (5, 3), (9, 2)]);
    }

    #[test]
    fn skip_to_lands_on_or_after_target() {
        let mut pl = leaf(&[(2, 1), (5, 3), (9, 2)]);
        pl.skip_to(3, 0.0).unwrap();
        assert_eq!(pl.docid(), 5);
        // Never moves backwards.
        pl.skip_to(1, 0.0).unwrap();
        assert_eq!(pl.docid(), 5);
        pl.skip_to(10, 0.0).unwrap();
        assert!(pl.at_end());
    }
}
