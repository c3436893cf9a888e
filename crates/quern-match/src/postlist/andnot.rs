//! AND_NOT postlist.

use std::mem;

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use crate::postlist::{Advanced, Checked, DocStats, EmptyPostList, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// Matches documents in the left child which the right child does not
/// match. The right child never contributes weight.
pub(crate) struct AndNotPostList {
    /// The postings we emit.
    left: Box<dyn PostList>,
    /// The excluded postings.
    right: Box<dyn PostList>,
    /// Docid the right child last reported (0 before the start).
    r_did: DocId,
    /// Documents in the shard.
    db_size: DocCount,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl AndNotPostList {
    /// Builds an AND_NOT.
    pub(crate) fn new(
        left: Box<dyn PostList>,
        right: Box<dyn PostList>,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            left,
            right,
            r_did: 0,
            db_size,
            recalc,
        }
    }

    /// Hands the left child up as our replacement once the right side is
    /// exhausted.
    fn unwrap_left(&mut self) -> Advanced {
        self.recalc.mark();
        Some(mem::replace(&mut self.left, Box::new(EmptyPostList)))
    }

    /// Tests whether the right child excludes the left child's current
    /// document.
    ///
    /// Returns `Ok(None)` when the current left position is a match,
    /// `Ok(Some(...))` to pass a replacement up, and `Err` only on real
    /// failures; `excluded` reports the verdict.
    fn right_excludes(&mut self, l_did: DocId, excluded: &mut bool) -> Result<Advanced, MatchError> {
        *excluded = false;
        if l_did > self.r_did {
            let checked = self.right.check(l_did, 0.0)?;
            swap_in(&mut self.right, checked.replacement, &self.recalc);
            if !checked.valid {
                // The right side definitely doesn't match here.
                return Ok(None);
            }
            if self.right.at_end() {
                return Ok(self.unwrap_left());
            }
            self.r_did = self.right.docid();
        }
        *excluded = l_did == self.r_did;
        Ok(None)
    }
}

impl PostList for AndNotPostList {
    fn termfreq_min(&self) -> DocCount {
        let l_min = self.left.termfreq_min();
        let r_max = self.right.termfreq_max();
        l_min.saturating_sub(r_max)
    }

    fn termfreq_max(&self) -> DocCount {
        // No more than the left side matches, and no more than the right
        // side leaves unmatched.
        let left_room = self.left.termfreq_max();
        let right_room = self.db_size.saturating_sub(self.right.termfreq_min());
        left_room.min(right_room)
    }

    fn termfreq_est(&self) -> DocCount {
        if self.db_size == 0 {
            return 0;
        }
        // Independence assumption, with the right side inverted.
        let l_est = f64::from(self.left.termfreq_est());
        let r_est = f64::from(self.right.termfreq_est());
        let db = f64::from(self.db_size);
        (l_est * (db - r_est) / db + 0.5) as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        let l_freqs = self.left.termfreqs_est(stats);
        let r_freqs = self.right.termfreqs_est(stats);
        if stats.collection_size == 0 {
            return TermFreqs::default();
        }
        let db = f64::from(stats.collection_size);
        let termfreq = f64::from(l_freqs.termfreq)
            * (db - f64::from(r_freqs.termfreq))
            / db;
        let reltermfreq = if stats.rset_size == 0 {
            0.0
        } else {
            let rset = f64::from(stats.rset_size);
            f64::from(l_freqs.reltermfreq) * (rset - f64::from(r_freqs.reltermfreq)) / rset
        };
        let collfreq = if stats.total_term_count == 0 {
            0.0
        } else {
            let total = stats.total_term_count as f64;
            l_freqs.collfreq as f64 * (total - r_freqs.collfreq as f64) / total
        };
        TermFreqs::new(
            (termfreq + 0.5) as DocCount,
            (reltermfreq + 0.5) as DocCount,
            (collfreq + 0.5) as u64,
        )
    }

    fn maxweight(&self) -> f64 {
        self.left.maxweight()
    }

    fn recalc_maxweight(&mut self) -> f64 {
        // The right side never contributes weight.
        self.left.recalc_maxweight()
    }

    fn docid(&self) -> DocId {
        self.left.docid()
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        self.left.weight(doc)
    }

    fn wdf(&self) -> TermCount {
        self.left.wdf()
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        loop {
            let replacement = self.left.next(w_min)?;
            swap_in(&mut self.left, replacement, &self.recalc);
            if self.left.at_end() {
                return Ok(self.unwrap_left());
            }
            let l_did = self.left.docid();
            let mut excluded = false;
            let replacement = self.right_excludes(l_did, &mut excluded)?;
            if replacement.is_some() {
                return Ok(replacement);
            }
            if !excluded {
                return Ok(None);
            }
        }
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        let replacement = self.left.skip_to(did, w_min)?;
        swap_in(&mut self.left, replacement, &self.recalc);
        if self.left.at_end() {
            return Ok(self.unwrap_left());
        }
        let l_did = self.left.docid();
        let mut excluded = false;
        let replacement = self.right_excludes(l_did, &mut excluded)?;
        if replacement.is_some() {
            return Ok(replacement);
        }
        if excluded {
            // The landing document is excluded; move to the next match.
            return self.next(w_min);
        }
        Ok(None)
    }

    fn check(&mut self, did: DocId, w_min: f64) -> Result<Checked, MatchError> {
        let checked = self.left.check(did, w_min)?;
        swap_in(&mut self.left, checked.replacement, &self.recalc);
        if !checked.valid {
            return Ok(Checked::not_valid());
        }
        if self.left.at_end() {
            return Ok(Checked {
                valid: true,
                replacement: self.unwrap_left(),
            });
        }
        let l_did = self.left.docid();
        let mut excluded = false;
        let replacement = self.right_excludes(l_did, &mut excluded)?;
        if replacement.is_some() {
            return Ok(Checked {
                valid: true,
                replacement,
            });
        }
        if excluded {
            // We're sitting on an excluded document; report that `did`
            // can't match rather than searching onwards.
            return Ok(Checked::not_valid());
        }
        Ok(Checked::valid())
    }

    fn at_end(&self) -> bool {
        // Never true: the left child replaces us when it (or the right
        // side) runs out.
        false
    }

    fn count_matching_subqs(&self) -> TermCount {
        self.left.count_matching_subqs()
    }
}
