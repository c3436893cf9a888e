//! External posting sources.

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use std::collections::BTreeMap;

use crate::backend::Database;
use crate::postlist::{Advanced, Checked, DocStats, PostList};
use crate::MatchError;

/// Posting sources registered with a match, keyed by the name query
/// trees reference them with.
pub type SourceRegistry = BTreeMap<String, Box<dyn PostingSource>>;

/// A caller-supplied producer of postings.
///
/// Sources are registered by name and referenced from query trees; the
/// match engine clones and re-initialises one instance per shard.
pub trait PostingSource: Send {
    /// Clones the source for another shard.
    fn clone_boxed(&self) -> Box<dyn PostingSource>;

    /// Resets the source to iterate `db` from the start.
    fn init(&mut self, db: &dyn Database) -> Result<(), MatchError>;

    /// A lower bound on the number of documents produced.
    fn termfreq_min(&self) -> DocCount {
        0
    }

    /// An estimate of the number of documents produced.
    fn termfreq_est(&self) -> DocCount;

    /// An upper bound on the number of documents produced.
    fn termfreq_max(&self) -> DocCount;

    /// An upper bound on [`weight`](Self::weight) for remaining postings.
    fn maxweight(&self) -> f64 {
        0.0
    }

    /// The weight of the current posting.
    fn weight(&self) -> f64 {
        0.0
    }

    /// Advances to the next posting with weight `>= min_wt`.
    fn next(&mut self, min_wt: f64) -> Result<(), MatchError>;

    /// Advances to the first posting with docid `>= did`.
    fn skip_to(&mut self, did: DocId, min_wt: f64) -> Result<(), MatchError> {
        while !self.at_end() && self.docid() < did {
            self.next(min_wt)?;
        }
        Ok(())
    }

    /// Whether the source is exhausted.
    fn at_end(&self) -> bool;

    /// The current document id.
    fn docid(&self) -> DocId;
}

/// Adapts a [`PostingSource`] into the postlist tree, applying a weight
/// factor.
pub struct ExternalPostList {
    /// The adapted source.
    source: Box<dyn PostingSource>,
    /// Weight multiplier (0 for boolean contexts).
    factor: f64,
    /// Whether the source has been advanced at least once.
    started: bool,
}

impl ExternalPostList {
    /// Wraps an initialised source.
    pub(crate) fn new(source: Box<dyn PostingSource>, factor: f64) -> Self {
        Self {
            source,
            factor,
            started: false,
        }
    }

    /// Translates the caller's minimum weight into source terms.
    fn source_min(&self, w_min: f64) -> f64 {
        if self.factor > 0.0 { w_min / self.factor } else { 0.0 }
    }
}

impl PostList for ExternalPostList {
    fn termfreq_min(&self) -> DocCount {
        self.source.termfreq_min()
    }

    fn termfreq_max(&self) -> DocCount {
        self.source.termfreq_max()
    }

    fn termfreq_est(&self) -> DocCount {
        self.source.termfreq_est()
    }

    fn termfreqs_est(&self, _stats: &Stats) -> TermFreqs {
        TermFreqs::new(self.source.termfreq_est(), 0, 0)
    }

    fn maxweight(&self) -> f64 {
        self.source.maxweight() * self.factor
    }

    fn recalc_maxweight(&mut self) -> f64 {
        // Sources may tighten their bound as they advance.
        self.maxweight()
    }

    fn docid(&self) -> DocId {
        self.source.docid()
    }

    fn weight(&self, _doc: &DocStats) -> f64 {
        self.source.weight() * self.factor
    }

    fn wdf(&self) -> TermCount {
        1
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        let min_wt = self.source_min(w_min);
        self.started = true;
        self.source.next(min_wt)?;
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        let min_wt = self.source_min(w_min);
        if !self.started {
            self.started = true;
            self.source.next(min_wt)?;
        }
        if !self.source.at_end() && self.source.docid() < did {
            self.source.skip_to(did, min_wt)?;
        }
        Ok(None)
    }

    fn check(&mut self, did: DocId, w_min: f64) -> Result<Checked, MatchError> {
        let replacement = self.skip_to(did, w_min)?;
        Ok(Checked {
            valid: true,
            replacement,
        })
    }

    fn at_end(&self) -> bool {
        self.started && self.source.at_end()
    }
}
