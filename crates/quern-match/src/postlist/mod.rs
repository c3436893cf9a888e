//! The unified posting iterator contract and its implementations.
//!
//! A [`PostList`] is a lazy sequence of `(docid, weight)` pairs in strictly
//! ascending docid order. Operator postlists combine child postlists;
//! leaf postlists come from a shard's [`Database`](crate::Database).
//!
//! Advancing operations take the minimum weight the caller still needs
//! (`w_min`) and may return a *replacement* postlist: a simpler node which
//! is equivalent for every weight above `w_min`. The caller must swap the
//! replacement in and drop the old node. After any replacement the tree's
//! maximum weight must be recalculated; the shared [`RecalcHint`] carries
//! that signal to the match loop.

mod and;
mod andmaybe;
mod andnot;
mod boolor;
mod extraweight;
mod leaf;
mod max;
mod or;
mod positional;
mod source;
mod synonym;
mod valuerange;
mod xor;

pub(crate) use and::MultiAndPostList;
pub(crate) use andmaybe::AndMaybePostList;
pub(crate) use andnot::AndNotPostList;
pub(crate) use boolor::BoolOrPostList;
pub(crate) use extraweight::ExtraWeightPostList;
pub use leaf::{AllDocsPostList, TermPostList};
pub(crate) use max::MaxPostList;
pub(crate) use or::OrPostList;
pub(crate) use positional::{ExactPhrasePostList, NearPostList, PhrasePostList};
pub use source::{ExternalPostList, PostingSource, SourceRegistry};
pub(crate) use synonym::SynonymPostList;
pub(crate) use valuerange::ValueRangePostList;
pub(crate) use xor::MultiXorPostList;

use std::cell::Cell;
use std::rc::Rc;

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs, Weight};

use crate::MatchError;

/// Per-document statistics passed down when weights are evaluated.
///
/// The match loop fetches these at most once per candidate document, and
/// only when the weighting scheme reports that it needs them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocStats {
    /// Document length in terms.
    pub doclen: TermCount,
    /// Number of distinct terms in the document.
    pub unique_terms: TermCount,
    /// Highest wdf of any term in the document (0 if unknown).
    pub wdfdocmax: TermCount,
}

/// Result of an advancing call: `None` to keep the node, or a replacement
/// the caller must swap in.
pub type Advanced = Option<Box<dyn PostList>>;

/// Result of [`PostList::check`]: whether the candidate position is
/// usable, plus any replacement postlist.
pub struct Checked {
    /// True: the node is positioned at the first docid `>=` the checked
    /// one. False: the checked docid is certainly not matched, and the
    /// node has *not* advanced past it (its exact position is
    /// unspecified); a later `skip_to` moves it on properly.
    pub valid: bool,
    /// Replacement postlist, as for `next`/`skip_to`.
    pub replacement: Advanced,
}

impl Checked {
    /// A valid in-place check result.
    pub fn valid() -> Self {
        Self {
            valid: true,
            replacement: None,
        }
    }

    /// An inconclusive in-place check result.
    pub fn not_valid() -> Self {
        Self {
            valid: false,
            replacement: None,
        }
    }
}

/// Shared "maxweight needs recalculating" flag.
///
/// Operator nodes mark the hint whenever a subtree decays; the match loop
/// clears it when it refreshes its cached bound.
#[derive(Debug, Clone, Default)]
pub struct RecalcHint(Rc<Cell<bool>>);

impl RecalcHint {
    /// Creates a cleared hint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that a cached maxweight somewhere is stale.
    pub fn mark(&self) {
        self.0.set(true);
    }

    /// Reads and clears the signal.
    pub fn take(&self) -> bool {
        self.0.replace(false)
    }

    /// Reads the signal without clearing it.
    pub fn is_marked(&self) -> bool {
        self.0.get()
    }
}

/// A lazy iterator over postings in strictly ascending docid order.
pub trait PostList {
    /// A lower bound on the number of documents this postlist can return.
    fn termfreq_min(&self) -> DocCount;

    /// An upper bound on the number of documents this postlist can return.
    fn termfreq_max(&self) -> DocCount;

    /// An estimate of the number of documents this postlist will return.
    fn termfreq_est(&self) -> DocCount;

    /// Frequency estimates against the collated collection statistics,
    /// used when this subtree is scored as a single virtual term.
    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs;

    /// The cached upper bound on any remaining weight.
    fn maxweight(&self) -> f64;

    /// Recomputes the upper bound on any remaining weight.
    ///
    /// Non-increasing as the postlist advances.
    fn recalc_maxweight(&mut self) -> f64;

    /// The current document id; undefined before the first advance and
    /// after the end.
    fn docid(&self) -> DocId;

    /// The weight of the current posting.
    fn weight(&self, doc: &DocStats) -> f64;

    /// The within-document frequency at the current posting.
    ///
    /// Operators combine child wdfs the way a synonym would want them.
    fn wdf(&self) -> TermCount;

    /// Advances to the next posting whose tree weight can reach `w_min`.
    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError>;

    /// Advances to the first posting with docid `>= did` (and weight
    /// reaching `w_min`). Never moves backwards.
    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError>;

    /// Checks whether the postlist could match at `did` without
    /// necessarily positioning exactly.
    ///
    /// The default positions exactly via [`skip_to`](Self::skip_to).
    fn check(&mut self, did: DocId, w_min: f64) -> Result<Checked, MatchError> {
        let replacement = self.skip_to(did, w_min)?;
        Ok(Checked {
            valid: true,
            replacement,
        })
    }

    /// Whether the iterator has moved past its last posting.
    fn at_end(&self) -> bool;

    /// The number of leaf subqueries matching at the current posting.
    fn count_matching_subqs(&self) -> TermCount {
        1
    }

    /// Whether evaluating this node's weight reads [`DocStats`].
    ///
    /// Remote replay postlists return false so the match loop never pays
    /// for a document-length fetch on their behalf.
    fn wants_doc_stats(&self) -> bool {
        true
    }
}

/// A leaf postlist opened from a shard, before weighting is attached.
pub trait LeafPostList: PostList {
    /// Attaches an initialised term weight; until then the leaf scores 0.
    fn set_termweight(&mut self, weight: Box<dyn Weight>);

    /// The term this leaf iterates, if any (the all-documents leaf has
    /// none).
    fn term(&self) -> Option<&str>;
}

/// A postlist over no documents, used for provably empty subqueries.
#[derive(Debug, Default)]
pub struct EmptyPostList;

impl PostList for EmptyPostList {
    fn termfreq_min(&self) -> DocCount {
        0
    }

    fn termfreq_max(&self) -> DocCount {
        0
    }

    fn termfreq_est(&self) -> DocCount {
        0
    }

    fn termfreqs_est(&self, _stats: &Stats) -> TermFreqs {
        TermFreqs::default()
    }

    fn maxweight(&self) -> f64 {
        0.0
    }

    fn recalc_maxweight(&mut self) -> f64 {
        0.0
    }

    fn docid(&self) -> DocId {
        0
    }

    fn weight(&self, _doc: &DocStats) -> f64 {
        0.0
    }

    fn wdf(&self) -> TermCount {
        0
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        Ok(None)
    }

    fn skip_to(&mut self, _did: DocId, _w_min: f64) -> Result<Advanced, MatchError> {
        Ok(None)
    }

    fn at_end(&self) -> bool {
        true
    }
}

/// Replaces `slot` with `replacement` if one was returned, marking the
/// recalc hint.
///
/// This is the swap half of the decay protocol; every operator advances
/// children through it.
pub(crate) fn swap_in(slot: &mut Box<dyn PostList>, replacement: Advanced, recalc: &RecalcHint) {
    if let Some(new_pl) = replacement {
        *slot = new_pl;
        recalc.mark();
    }
}
