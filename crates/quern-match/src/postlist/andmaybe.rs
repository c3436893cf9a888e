//! AND_MAYBE postlist: left is required, right only adds weight.

use std::mem;

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use crate::postlist::{
    Advanced, Checked, DocStats, EmptyPostList, MultiAndPostList, PostList, RecalcHint, swap_in,
};
use crate::MatchError;

/// Matches exactly the left child's documents; where the right child also
/// matches, its weight is added.
///
/// When the caller's minimum weight exceeds what the left side can supply
/// alone, the right side becomes required and the node decays to AND.
pub(crate) struct AndMaybePostList {
    /// The required child.
    required: Box<dyn PostList>,
    /// The optional child.
    maybe: Box<dyn PostList>,
    /// Docid the required child last reported (0 before the start).
    required_did: DocId,
    /// Docid the optional child last reported.
    maybe_did: DocId,
    /// Cached maxweight of the required child.
    required_max: f64,
    /// Cached maxweight of the optional child.
    maybe_max: f64,
    /// Documents in the shard.
    db_size: DocCount,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl AndMaybePostList {
    /// Builds an AND_MAYBE from a query tree.
    pub(crate) fn new(
        required: Box<dyn PostList>,
        maybe: Box<dyn PostList>,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            required,
            maybe,
            required_did: 0,
            maybe_did: 0,
            required_max: 0.0,
            maybe_max: 0.0,
            db_size,
            recalc,
        }
    }

    /// Builds the decay product of an OR, already positioned mid-stream.
    pub(crate) fn new_decay(
        required: Box<dyn PostList>,
        maybe: Box<dyn PostList>,
        required_did: DocId,
        maybe_did: DocId,
        required_max: f64,
        maybe_max: f64,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            required,
            maybe,
            required_did,
            maybe_did,
            required_max,
            maybe_max,
            db_size,
            recalc,
        }
    }

    /// Whether the optional child matches the current document.
    fn maybe_matches(&self) -> bool {
        self.required_did != 0 && self.required_did == self.maybe_did
    }

    /// Decays to an AND positioned at `did`.
    fn decay_to_and(
        &mut self,
        did: DocId,
        w_min: f64,
        valid: Option<&mut bool>,
    ) -> Result<Advanced, MatchError> {
        let required = mem::replace(&mut self.required, Box::new(EmptyPostList));
        let maybe = mem::replace(&mut self.maybe, Box::new(EmptyPostList));
        let mut and: Box<dyn PostList> = Box::new(MultiAndPostList::new_decay(
            required,
            maybe,
            self.required_max,
            self.maybe_max,
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

    /// Hands the required child up as our replacement.
    fn unwrap_required(&mut self) -> Advanced {
        self.recalc.mark();
        Some(mem::replace(&mut self.required, Box::new(EmptyPostList)))
    }

    /// Brings the optional child up to the required child's position.
    ///
    /// Returns our replacement if the optional child ran out.
    fn align_maybe(&mut self, w_min_for_maybe: f64) -> Result<Advanced, MatchError> {
        if self.required_did > self.maybe_did {
            let checked = self.maybe.check(self.required_did, w_min_for_maybe)?;
            swap_in(&mut self.maybe, checked.replacement, &self.recalc);
            if !checked.valid {
                return Ok(None);
            }
            if self.maybe.at_end() {
                return Ok(self.unwrap_required());
            }
            self.maybe_did = self.maybe.docid();
        }
        Ok(None)
    }
}

impl PostList for AndMaybePostList {
    fn termfreq_min(&self) -> DocCount {
        self.required.termfreq_min()
    }

    fn termfreq_max(&self) -> DocCount {
        self.required.termfreq_max()
    }

    fn termfreq_est(&self) -> DocCount {
        self.required.termfreq_est()
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        self.required.termfreqs_est(stats)
    }

    fn maxweight(&self) -> f64 {
        self.required_max + self.maybe_max
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.required_max = self.required.recalc_maxweight();
        self.maybe_max = self.maybe.recalc_maxweight();
        self.required_max + self.maybe_max
    }

    fn docid(&self) -> DocId {
        self.required_did
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        let mut weight = self.required.weight(doc);
        if self.maybe_matches() {
            weight += self.maybe.weight(doc);
        }
        weight
    }

    fn wdf(&self) -> TermCount {
        let mut wdf = self.required.wdf();
        if self.maybe_matches() {
            wdf += self.maybe.wdf();
        }
        wdf
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        if w_min > self.required_max {
            return self.decay_to_and(self.required_did.max(self.maybe_did) + 1, w_min, None);
        }
        let replacement = self.required.next(w_min - self.maybe_max)?;
        swap_in(&mut self.required, replacement, &self.recalc);
        if self.required.at_end() {
            self.recalc.mark();
            return Ok(Some(mem::replace(
                &mut self.required,
                Box::new(EmptyPostList),
            )));
        }
        self.required_did = self.required.docid();
        self.align_maybe(w_min - self.required_max)
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        // A skip_to to our current position happens right after decay from
        // OR.
        if did < self.required_did {
            return Ok(None);
        }
        if w_min > self.required_max {
            // did <= required_did was handled just above.
            return self.decay_to_and(did.max(self.maybe_did), w_min, None);
        }
        let replacement = self.required.skip_to(did, w_min - self.maybe_max)?;
        swap_in(&mut self.required, replacement, &self.recalc);
        if self.required.at_end() {
            self.recalc.mark();
            return Ok(Some(mem::replace(
                &mut self.required,
                Box::new(EmptyPostList),
            )));
        }
        self.required_did = self.required.docid();
        self.align_maybe(0.0)
    }

    fn check(&mut self, did: DocId, w_min: f64) -> Result<Checked, MatchError> {
        if w_min > self.required_max {
            let mut valid = true;
            let target = did.max(self.required_did).max(self.maybe_did);
            let replacement = self.decay_to_and(target, w_min, Some(&mut valid))?;
            return Ok(Checked { valid, replacement });
        }
        let checked = self.required.check(did, w_min - self.maybe_max)?;
        swap_in(&mut self.required, checked.replacement, &self.recalc);
        if !checked.valid {
            return Ok(Checked::not_valid());
        }
        if self.required.at_end() {
            self.recalc.mark();
            return Ok(Checked {
                valid: true,
                replacement: Some(mem::replace(
                    &mut self.required,
                    Box::new(EmptyPostList),
                )),
            });
        }
        self.required_did = self.required.docid();
        let replacement = self.align_maybe(0.0)?;
        Ok(Checked {
            valid: true,
            replacement,
        })
    }

    fn at_end(&self) -> bool {
        // Never true: when the required child ends it replaces us, and the
        // optional child ending also unwraps to the required child.
        false
    }

    fn count_matching_subqs(&self) -> TermCount {
        let mut count = self.required.count_matching_subqs();
        if self.maybe_matches() {
            count += self.maybe.count_matching_subqs();
        }
        count
    }
}
