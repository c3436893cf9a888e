//! Wrapper adding the weighting scheme's term-independent contribution.

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs, Weight};

use crate::postlist::{Advanced, DocStats, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// Adds `sumextra` to every document the wrapped tree emits.
///
/// Placed above the compiled root when the weighting scheme has a nonzero
/// `maxextra`. The extra contribution is bounded, so `w_min` passed down
/// is reduced by that bound.
pub(crate) struct ExtraWeightPostList {
    /// The wrapped tree.
    child: Box<dyn PostList>,
    /// Scheme initialised for the term-independent component.
    weight: Box<dyn Weight>,
    /// Cached `maxextra()`.
    max_extra: f64,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl ExtraWeightPostList {
    /// Wraps `child`, adding `weight`'s extra component.
    pub(crate) fn new(
        child: Box<dyn PostList>,
        weight: Box<dyn Weight>,
        recalc: RecalcHint,
    ) -> Self {
        let max_extra = weight.maxextra();
        Self {
            child,
            weight,
            max_extra,
            recalc,
        }
    }
}

impl PostList for ExtraWeightPostList {
    fn termfreq_min(&self) -> DocCount {
        self.child.termfreq_min()
    }

    fn termfreq_max(&self) -> DocCount {
        self.child.termfreq_max()
    }

    fn termfreq_est(&self) -> DocCount {
        self.child.termfreq_est()
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        self.child.termfreqs_est(stats)
    }

    fn maxweight(&self) -> f64 {
        self.child.maxweight() + self.max_extra
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.child.recalc_maxweight() + self.max_extra
    }

    fn docid(&self) -> DocId {
        self.child.docid()
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        self.child.weight(doc) + self.weight.sumextra(doc.doclen, doc.unique_terms)
    }

    fn wdf(&self) -> TermCount {
        self.child.wdf()
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        let replacement = self.child.next(w_min - self.max_extra)?;
        swap_in(&mut self.child, replacement, &self.recalc);
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        let replacement = self.child.skip_to(did, w_min - self.max_extra)?;
        swap_in(&mut self.child, replacement, &self.recalc);
        Ok(None)
    }

    fn at_end(&self) -> bool {
        self.child.at_end()
    }

    fn count_matching_subqs(&self) -> TermCount {
        self.child.count_matching_subqs()
    }
}
