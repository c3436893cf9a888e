//! Binary weighted OR postlist.

use std::mem;

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use crate::postlist::{
    Advanced, AndMaybePostList, Checked, DocStats, EmptyPostList, MultiAndPostList, PostList,
    RecalcHint, swap_in,
};
use crate::MatchError;

/// Matches documents in either child, summing weights where both match.
///
/// The optimiser builds OR trees so that `left.termfreq_est() >=
/// right.termfreq_est()` at every node. When the minimum weight the caller
/// needs exceeds what one side alone can contribute, the node decays: to
/// AND when neither side suffices alone, or to AND_MAYBE when only one
/// does.
pub(crate) struct OrPostList {
    /// Left child (the more frequent side).
    left: Box<dyn PostList>,
    /// Right child.
    right: Box<dyn PostList>,
    /// Docid the left child last reported (0 before the start).
    l_did: DocId,
    /// Docid the right child last reported.
    r_did: DocId,
    /// Cached maxweight of the left child.
    l_max: f64,
    /// Cached maxweight of the right child.
    r_max: f64,
    /// Documents in the shard.
    db_size: DocCount,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl OrPostList {
    /// Builds an OR of two postlists.
    pub(crate) fn new(
        left: Box<dyn PostList>,
        right: Box<dyn PostList>,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            left,
            right,
            l_did: 0,
            r_did: 0,
            l_max: 0.0,
            r_max: 0.0,
            db_size,
            recalc,
        }
    }

    /// Takes a child out of the node, leaving a placeholder.
    fn take(child: &mut Box<dyn PostList>) -> Box<dyn PostList> {
        mem::replace(child, Box::new(EmptyPostList))
    }

    /// Decays to an AND positioned at `did`.
    fn decay_to_and(
        &mut self,
        did: DocId,
        w_min: f64,
        valid: Option<&mut bool>,
    ) -> Result<Advanced, MatchError> {
        let left = Self::take(&mut self.left);
        let right = Self::take(&mut self.right);
        let mut and: Box<dyn PostList> = Box::new(MultiAndPostList::new_decay(
            left,
            right,
            self.l_max,
            self.r_max,
            self.db_size,
            self.recalc.clone(),
        ));
        let replacement = match valid {
            Some(valid) => {
                let checked = and.check(did, w_min)?;
                *valid = checked.valid;
                checked.replacement
            }
            None => and.skip_to(did, w_min)?,
        };
        self.recalc.mark();
        Ok(Some(replacement.unwrap_or(and)))
    }

    /// Decays to AND_MAYBE with the indicated side required.
    ///
    /// `required_left` says whether our left child becomes the required
    /// side of the AND_MAYBE.
    fn decay_to_andmaybe(
        &mut self,
        required_left: bool,
        did: DocId,
        w_min: f64,
        valid: Option<&mut bool>,
    ) -> Result<Advanced, MatchError> {
        let (required, maybe, required_did, maybe_did, required_max, maybe_max) = if required_left
        {
            (
                Self::take(&mut self.left),
                Self::take(&mut self.right),
                self.l_did,
                self.r_did,
                self.l_max,
                self.r_max,
            )
        } else {
            (
                Self::take(&mut self.right),
                Self::take(&mut self.left),
                self.r_did,
                self.l_did,
                self.r_max,
                self.l_max,
            )
        };
        let mut andmaybe: Box<dyn PostList> = Box::new(AndMaybePostList::new_decay(
            required,
            maybe,
            required_did,
            maybe_did,
            required_max,
            maybe_max,
            self.db_size,
            self.recalc.clone(),
        ));
        let replacement = match valid {
            Some(valid) => {
                let checked = andmaybe.check(did, w_min)?;
                *valid = checked.valid;
                checked.replacement
            }
            None => andmaybe.skip_to(did, w_min)?,
        };
        self.recalc.mark();
        Ok(Some(replacement.unwrap_or(andmaybe)))
    }

    /// Hands the surviving child up as our replacement.
    fn unwrap_child(&mut self, keep_left: bool) -> Advanced {
        self.recalc.mark();
        Some(if keep_left {
            Self::take(&mut self.left)
        } else {
            Self::take(&mut self.right)
        })
    }
}

impl PostList for OrPostList {
    fn termfreq_min(&self) -> DocCount {
        self.left.termfreq_min().max(self.right.termfreq_min())
    }

    fn termfreq_max(&self) -> DocCount {
        let sum =
            u64::from(self.left.termfreq_max()) + u64::from(self.right.termfreq_max());
        sum.min(u64::from(self.db_size)) as DocCount
    }

    fn termfreq_est(&self) -> DocCount {
        estimate_or(
            f64::from(self.left.termfreq_est()),
            f64::from(self.right.termfreq_est()),
            f64::from(self.db_size),
        ) as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        let l_freqs = self.left.termfreqs_est(stats);
        let r_freqs = self.right.termfreqs_est(stats);
        let termfreq = estimate_or(
            f64::from(l_freqs.termfreq),
            f64::from(r_freqs.termfreq),
            f64::from(stats.collection_size),
        ) as DocCount;
        let reltermfreq = estimate_or(
            f64::from(l_freqs.reltermfreq),
            f64::from(r_freqs.reltermfreq),
            f64::from(stats.rset_size),
        ) as DocCount;
        let collfreq = estimate_or(
            l_freqs.collfreq as f64,
            r_freqs.collfreq as f64,
            stats.total_term_count as f64,
        ) as u64;
        TermFreqs::new(termfreq, reltermfreq, collfreq)
    }

    fn maxweight(&self) -> f64 {
        self.l_max + self.r_max
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.l_max = self.left.recalc_maxweight();
        self.r_max = self.right.recalc_maxweight();
        self.l_max + self.r_max
    }

    fn docid(&self) -> DocId {
        self.l_did.min(self.r_did)
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        if self.l_did < self.r_did {
            self.left.weight(doc)
        } else if self.l_did > self.r_did {
            self.right.weight(doc)
        } else {
            self.left.weight(doc) + self.right.weight(doc)
        }
    }

    fn wdf(&self) -> TermCount {
        if self.l_did < self.r_did {
            self.left.wdf()
        } else if self.l_did > self.r_did {
            self.right.wdf()
        } else {
            self.left.wdf() + self.right.wdf()
        }
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        if w_min > self.l_max {
            if w_min > self.r_max {
                // If l_did < r_did, right AND_MAYBE left might match at
                // r_did.
                let did = if self.l_did < self.r_did {
                    self.r_did
                } else {
                    self.r_did + 1
                };
                return self.decay_to_and(did, w_min, None);
            }
            let did = if self.l_did == self.r_did {
                self.l_did + 1
            } else {
                self.l_did.max(self.r_did)
            };
            return self.decay_to_andmaybe(false, did, w_min, None);
        }
        if w_min > self.r_max {
            // If r_did < l_did, left AND_MAYBE right might match at l_did.
            let did = if self.r_did < self.l_did {
                self.l_did
            } else {
                self.l_did + 1
            };
            return self.decay_to_andmaybe(true, did, w_min, None);
        }

        let advance_l = self.l_did <= self.r_did;
        let advance_r = self.l_did >= self.r_did;

        if advance_l {
            let replacement = self.left.next(w_min - self.r_max)?;
            swap_in(&mut self.left, replacement, &self.recalc);
        }
        if advance_r {
            let replacement = self.right.next(w_min - self.l_max)?;
            swap_in(&mut self.right, replacement, &self.recalc);
        }
        if advance_l && self.left.at_end() {
            return Ok(self.unwrap_child(false));
        }
        if advance_r && self.right.at_end() {
            return Ok(self.unwrap_child(true));
        }
        if advance_l {
            self.l_did = self.left.docid();
        }
        if advance_r {
            self.r_did = self.right.docid();
        }
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        // >= so a skip_to(n) following a check(n) that wasn't valid really
        // moves us on.
        let advance_l = did >= self.l_did;
        let advance_r = did >= self.r_did;
        if !advance_l && !advance_r {
            return Ok(None);
        }

        if w_min > self.l_max {
            if w_min > self.r_max {
                return self.decay_to_and(did, w_min, None);
            }
            return self.decay_to_andmaybe(false, did, w_min, None);
        }
        if w_min > self.r_max {
            return self.decay_to_andmaybe(true, did, w_min, None);
        }

        if advance_l {
            let replacement = self.left.skip_to(did, w_min - self.r_max)?;
            swap_in(&mut self.left, replacement, &self.recalc);
        }
        if advance_r {
            let replacement = self.right.skip_to(did, w_min - self.l_max)?;
            swap_in(&mut self.right, replacement, &self.recalc);
        }
        if advance_l && self.left.at_end() {
            return Ok(self.unwrap_child(false));
        }
        if advance_r && self.right.at_end() {
            return Ok(self.unwrap_child(true));
        }
        if advance_l {
            self.l_did = self.left.docid();
        }
        if advance_r {
            self.r_did = self.right.docid();
        }
        Ok(None)
    }

    fn check(&mut self, did: DocId, w_min: f64) -> Result<Checked, MatchError> {
        let mut advance_l = did > self.l_did;
        let mut advance_r = did > self.r_did;
        if !advance_l && !advance_r {
            return Ok(Checked::valid());
        }

        if w_min > self.l_max {
            if w_min > self.r_max {
                let mut valid = true;
                let replacement = self.decay_to_and(did, w_min, Some(&mut valid))?;
                return Ok(Checked { valid, replacement });
            }
            let mut valid = true;
            let replacement = self.decay_to_andmaybe(false, did, w_min, Some(&mut valid))?;
            return Ok(Checked { valid, replacement });
        }
        if w_min > self.r_max {
            let mut valid = true;
            let replacement = self.decay_to_andmaybe(true, did, w_min, Some(&mut valid))?;
            return Ok(Checked { valid, replacement });
        }

        if advance_l {
            let checked = self.left.check(did, w_min - self.r_max)?;
            swap_in(&mut self.left, checked.replacement, &self.recalc);
            if !checked.valid {
                self.l_did = did - 1;
                advance_l = false;
            }
        }
        if advance_r {
            let checked = self.right.check(did, w_min - self.l_max)?;
            swap_in(&mut self.right, checked.replacement, &self.recalc);
            if !checked.valid {
                self.r_did = did - 1;
                advance_r = false;
            }
        }
        if !advance_l && !advance_r {
            self.l_did = did;
            self.r_did = did;
            return Ok(Checked::not_valid());
        }
        if advance_l && self.left.at_end() {
            return Ok(Checked {
                valid: true,
                replacement: self.unwrap_child(false),
            });
        }
        if advance_r && self.right.at_end() {
            return Ok(Checked {
                valid: true,
                replacement: self.unwrap_child(true),
            });
        }
        if advance_l {
            self.l_did = self.left.docid();
        }
        if advance_r {
            self.r_did = self.right.docid();
        }
        Ok(Checked::valid())
    }

    fn at_end(&self) -> bool {
        // Never true: when one child ends we unwrap to the other, and when
        // both end together the unwrapped child reports the end for us.
        false
    }

    fn count_matching_subqs(&self) -> TermCount {
        if self.l_did < self.r_did {
            self.left.count_matching_subqs()
        } else if self.l_did > self.r_did {
            self.right.count_matching_subqs()
        } else {
            self.left.count_matching_subqs() + self.right.count_matching_subqs()
        }
    }
}

/// Pairwise union estimate assuming independence.
fn estimate_or(a: f64, b: f64, population: f64) -> f64 {
    if population == 0.0 {
        0.0
    } else {
        a + b - (a * b / population) + 0.5
    }
}
