//! Synonym postlist: an unweighted subtree scored as one virtual term.

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs, Weight};

use crate::postlist::{Advanced, Checked, DocStats, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// Scores the wrapped (boolean) subtree as if it were a single term whose
/// wdf is the combined wdf of the matching subqueries.
///
/// When the subqueries' wdf contributions might overlap (`wdf_disjoint`
/// false), the combined wdf is clamped to the document length so the
/// virtual term never looks more frequent than the document is long.
pub(crate) struct SynonymPostList {
    /// The wrapped subtree, compiled with factor 0.
    child: Box<dyn PostList>,
    /// Scheme initialised from the subtree's frequency estimates.
    weight: Box<dyn Weight>,
    /// Whether subquery wdfs are provably disjoint.
    wdf_disjoint: bool,
    /// Cached `maxpart()`.
    max_part: f64,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl SynonymPostList {
    /// Wraps `child` with an initialised virtual-term weight.
    pub(crate) fn new(
        child: Box<dyn PostList>,
        weight: Box<dyn Weight>,
        wdf_disjoint: bool,
        recalc: RecalcHint,
    ) -> Self {
        let max_part = weight.maxpart();
        Self {
            child,
            weight,
            wdf_disjoint,
            max_part,
            recalc,
        }
    }
}

impl PostList for SynonymPostList {
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
        self.max_part
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.child.recalc_maxweight();
        self.max_part
    }

    fn docid(&self) -> DocId {
        self.child.docid()
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        let mut wdf = self.child.wdf();
        if !self.wdf_disjoint && doc.doclen != 0 {
            // Overlapping subqueries can inflate the combined wdf past
            // what one real term could reach.
            wdf = wdf.min(doc.doclen);
        }
        self.weight
            .sumpart(wdf, doc.doclen, doc.unique_terms, doc.wdfdocmax)
    }

    fn wdf(&self) -> TermCount {
        self.child.wdf()
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        // The subtree is unweighted, so it gets no minimum-weight hint.
        let replacement = self.child.next(0.0)?;
        swap_in(&mut self.child, replacement, &self.recalc);
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, _w_min: f64) -> Result<Advanced, MatchError> {
        let replacement = self.child.skip_to(did, 0.0)?;
        swap_in(&mut self.child, replacement, &self.recalc);
        Ok(None)
    }

    fn check(&mut self, did: DocId, _w_min: f64) -> Result<Checked, MatchError> {
        let checked = self.child.check(did, 0.0)?;
        swap_in(&mut self.child, checked.replacement, &self.recalc);
        Ok(Checked {
            valid: checked.valid,
            replacement: None,
        })
    }

    fn at_end(&self) -> bool {
        self.child.at_end()
    }

    fn count_matching_subqs(&self) -> TermCount {
        // The synonym counts as one subquery however many of its branches
        // match.
        1
    }
}
