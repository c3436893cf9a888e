//! N-way AND postlist.

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use crate::postlist::{Advanced, DocStats, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// Matches documents present in every child postlist.
///
/// Children are kept in ascending estimated-termfreq order so the rarest
/// list drives the merge and the denser lists are only probed with
/// `check`.
pub(crate) struct MultiAndPostList {
    /// Current docid, or 0 before the start / at the end.
    did: DocId,
    /// Children, rarest first.
    children: Vec<Box<dyn PostList>>,
    /// Cached maxweight per child, filled by `recalc_maxweight`.
    max_wt: Vec<f64>,
    /// Sum of `max_wt`.
    max_total: f64,
    /// Documents in the shard.
    db_size: DocCount,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl MultiAndPostList {
    /// Builds an AND over `children`, sorting them rarest-first.
    pub(crate) fn new(
        mut children: Vec<Box<dyn PostList>>,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        children.sort_by_key(|pl| pl.termfreq_est());
        let n_kids = children.len();
        Self {
            did: 0,
            children,
            max_wt: vec![0.0; n_kids],
            max_total: 0.0,
            db_size,
            recalc,
        }
    }

    /// Builds the decay product of an OR or AND_MAYBE.
    ///
    /// The children may themselves have decayed since their estimates were
    /// last compared, so re-check which side is rarer.
    pub(crate) fn new_decay(
        left: Box<dyn PostList>,
        right: Box<dyn PostList>,
        l_max: f64,
        r_max: f64,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        let (first, second, first_max, second_max) =
            if left.termfreq_est() < right.termfreq_est() {
                (left, right, l_max, r_max)
            } else {
                (right, left, r_max, l_max)
            };
        Self {
            did: 0,
            children: vec![first, second],
            max_wt: vec![first_max, second_max],
            max_total: first_max + second_max,
            db_size,
            recalc,
        }
    }

    /// The minimum weight child `i` must be able to reach.
    fn new_min(&self, w_min: f64, child: usize) -> f64 {
        w_min - (self.max_total - self.max_wt[child])
    }

    /// Calls `next` on child `i`, handling decay.
    fn next_child(&mut self, child: usize, w_min: f64) -> Result<(), MatchError> {
        let w_min = self.new_min(w_min, child);
        let replacement = self.children[child].next(w_min)?;
        swap_in(&mut self.children[child], replacement, &self.recalc);
        Ok(())
    }

    /// Calls `skip_to` on child `i`, handling decay.
    fn skip_child(&mut self, child: usize, did: DocId, w_min: f64) -> Result<(), MatchError> {
        let w_min = self.new_min(w_min, child);
        let replacement = self.children[child].skip_to(did, w_min)?;
        swap_in(&mut self.children[child], replacement, &self.recalc);
        Ok(())
    }

    /// Calls `check` on child `i`, handling decay.
    fn check_child(&mut self, child: usize, did: DocId, w_min: f64) -> Result<bool, MatchError> {
        let w_min = self.new_min(w_min, child);
        let checked = self.children[child].check(did, w_min)?;
        swap_in(&mut self.children[child], checked.replacement, &self.recalc);
        Ok(checked.valid)
    }

    /// Advances the children to the next document they all match.
    fn find_next_match(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        'restart: loop {
            if self.children[0].at_end() {
                self.did = 0;
                return Ok(None);
            }
            self.did = self.children[0].docid();
            for child in 1..self.children.len() {
                if !self.check_child(child, self.did, w_min)? {
                    self.next_child(0, w_min)?;
                    continue 'restart;
                }
                if self.children[child].at_end() {
                    self.did = 0;
                    return Ok(None);
                }
                let new_did = self.children[child].docid();
                if new_did != self.did {
                    self.skip_child(0, new_did, w_min)?;
                    continue 'restart;
                }
            }
            return Ok(None);
        }
    }
}

impl PostList for MultiAndPostList {
    fn termfreq_min(&self) -> DocCount {
        // Minimised when the children's minimum matches are maximally
        // disjoint.
        let mut sum = u64::from(self.children[0].termfreq_min());
        if sum == 0 {
            return 0;
        }
        for child in &self.children[1..] {
            sum += u64::from(child.termfreq_min());
            if sum <= u64::from(self.db_size) {
                // There may be no overlap at all.
                return 0;
            }
            sum -= u64::from(self.db_size);
        }
        sum as DocCount
    }

    fn termfreq_max(&self) -> DocCount {
        // We can't match more documents than our rarest child.
        self.children
            .iter()
            .map(|pl| pl.termfreq_max())
            .min()
            .unwrap_or(0)
    }

    fn termfreq_est(&self) -> DocCount {
        if self.db_size == 0 {
            return 0;
        }
        // Assuming independence, the estimate is the product of the child
        // estimates divided by db_size (n_kids - 1) times.
        let mut result = f64::from(self.children[0].termfreq_est());
        for child in &self.children[1..] {
            result = result * f64::from(child.termfreq_est()) / f64::from(self.db_size);
        }
        (result + 0.5) as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        let first = self.children[0].termfreqs_est(stats);
        let mut freq_est = f64::from(first.termfreq);
        let mut relfreq_est = f64::from(first.reltermfreq);
        if stats.collection_size == 0 {
            return TermFreqs::default();
        }
        for child in &self.children[1..] {
            let freqs = child.termfreqs_est(stats);
            freq_est = freq_est * f64::from(freqs.termfreq) / f64::from(stats.collection_size);
            if stats.rset_size != 0 {
                relfreq_est =
                    relfreq_est * f64::from(freqs.reltermfreq) / f64::from(stats.rset_size);
            }
        }
        TermFreqs::new(
            (freq_est + 0.5) as DocCount,
            (relfreq_est + 0.5) as DocCount,
            0,
        )
    }

    fn maxweight(&self) -> f64 {
        self.max_total
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.max_total = 0.0;
        for (child, slot) in self.children.iter_mut().zip(self.max_wt.iter_mut()) {
            *slot = child.recalc_maxweight();
            self.max_total += *slot;
        }
        self.max_total
    }

    fn docid(&self) -> DocId {
        self.did
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        self.children.iter().map(|pl| pl.weight(doc)).sum()
    }

    fn wdf(&self) -> TermCount {
        // Summing is what a synonym over this subtree wants.
        self.children.iter().map(|pl| pl.wdf()).sum()
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        self.next_child(0, w_min)?;
        self.find_next_match(w_min)
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        self.skip_child(0, did, w_min)?;
        self.find_next_match(w_min)
    }

    fn at_end(&self) -> bool {
        self.did == 0
    }

    fn count_matching_subqs(&self) -> TermCount {
        self.children.iter().map(|pl| pl.count_matching_subqs()).sum()
    }
}
