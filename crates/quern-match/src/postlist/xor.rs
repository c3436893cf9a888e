//! N-way XOR postlist.

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use crate::postlist::{Advanced, DocStats, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// Matches documents matched by an odd number of children; matching
/// children's weights are summed.
pub(crate) struct MultiXorPostList {
    /// Current docid, or 0 before the start / at the end.
    did: DocId,
    /// The children.
    children: Vec<Box<dyn PostList>>,
    /// Cached maxweight total.
    max_total: f64,
    /// Documents in the shard.
    db_size: DocCount,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl MultiXorPostList {
    /// Builds an XOR over `children`.
    pub(crate) fn new(
        children: Vec<Box<dyn PostList>>,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            did: 0,
            children,
            max_total: 0.0,
            db_size,
            recalc,
        }
    }

    /// One round of advancing: move lagging children on, then find the
    /// smallest current docid and how many children sit on it.
    ///
    /// `advance` decides whether a child needs moving and does so.
    /// Returns the replacement when only one child is left.
    fn advance_round(
        &mut self,
        old_did: DocId,
        target: DocId,
        use_skip: bool,
    ) -> Result<(Option<Box<dyn PostList>>, usize), MatchError> {
        self.did = 0;
        let mut matching = 0;
        let mut index = 0;
        while index < self.children.len() {
            let behind = if use_skip {
                old_did == 0 || self.children[index].docid() < target
            } else {
                old_did == 0 || self.children[index].docid() <= old_did
            };
            if behind {
                let replacement = if use_skip {
                    self.children[index].skip_to(target, 0.0)?
                } else {
                    self.children[index].next(0.0)?
                };
                swap_in(&mut self.children[index], replacement, &self.recalc);
                if self.children[index].at_end() {
                    self.children.remove(index);
                    continue;
                }
            }
            let new_did = self.children[index].docid();
            if self.did == 0 || new_did < self.did {
                self.did = new_did;
                matching = 1;
            } else if new_did == self.did {
                matching += 1;
            }
            index += 1;
        }
        if self.children.len() == 1 {
            self.recalc.mark();
            return Ok((Some(self.children.pop().unwrap()), matching));
        }
        Ok((None, matching))
    }
}

impl PostList for MultiXorPostList {
    fn termfreq_min(&self) -> DocCount {
        // Minimised by maximal even overlap, which is hard to bound
        // usefully in general.
        0
    }

    fn termfreq_max(&self) -> DocCount {
        // Maximised when the children are disjoint.
        let mut sum = u64::from(self.children[0].termfreq_max());
        let mut all_exact = self.children[0].termfreq_max() == self.children[0].termfreq_min();
        for child in &self.children[1..] {
            let tf_max = child.termfreq_max();
            sum += u64::from(tf_max);
            if all_exact {
                all_exact = tf_max == child.termfreq_min();
            }
            if !all_exact && sum >= u64::from(self.db_size) {
                return self.db_size;
            }
        }
        if all_exact && sum > u64::from(self.db_size) {
            // The number of XOR matches has the same parity as the sum of
            // exact child frequencies, so a parity mismatch with db_size
            // keeps the XOR off the ceiling.
            let parity_differs = (sum & 1) != u64::from(self.db_size & 1);
            return self.db_size - DocCount::from(parity_differs);
        }
        sum.min(u64::from(self.db_size)) as DocCount
    }

    fn termfreq_est(&self) -> DocCount {
        if self.db_size == 0 {
            return 0;
        }
        // Pairwise independence, associatively combined.
        let scale = 1.0 / f64::from(self.db_size);
        let mut p_est = f64::from(self.children[0].termfreq_est()) * scale;
        for child in &self.children[1..] {
            let p_i = f64::from(child.termfreq_est()) * scale;
            p_est += p_i - 2.0 * p_est * p_i;
        }
        (p_est * f64::from(self.db_size) + 0.5) as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        if stats.collection_size == 0 {
            return TermFreqs::default();
        }
        let scale = 1.0 / f64::from(stats.collection_size);
        let first = self.children[0].termfreqs_est(stats);
        let mut p_est = f64::from(first.termfreq) * scale;
        let mut pr_est = f64::from(first.reltermfreq) * scale;
        for child in &self.children[1..] {
            let freqs = child.termfreqs_est(stats);
            let p_i = f64::from(freqs.termfreq) * scale;
            p_est += p_i - 2.0 * p_est * p_i;
            if stats.rset_size != 0 {
                let pr_i = f64::from(freqs.reltermfreq) / f64::from(stats.rset_size);
                pr_est += pr_i - 2.0 * pr_est * pr_i;
            }
        }
        TermFreqs::new(
            (p_est * f64::from(stats.collection_size) + 0.5) as DocCount,
            (pr_est * f64::from(stats.rset_size) + 0.5) as DocCount,
            0,
        )
    }

    fn maxweight(&self) -> f64 {
        self.max_total
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.max_total = self.children[0].recalc_maxweight();
        let mut min_max = self.max_total;
        for child in &mut self.children[1..] {
            let new_max = child.recalc_maxweight();
            min_max = min_max.min(new_max);
            self.max_total += new_max;
        }
        if self.children.len() % 2 == 0 {
            // With an even child count one child can't contribute, so omit
            // the smallest.
            self.max_total -= min_max;
        }
        self.max_total
    }

    fn docid(&self) -> DocId {
        self.did
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        self.children
            .iter()
            .filter(|pl| pl.docid() == self.did)
            .map(|pl| pl.weight(doc))
            .sum()
    }

    fn wdf(&self) -> TermCount {
        self.children
            .iter()
            .filter(|pl| pl.docid() == self.did)
            .map(|pl| pl.wdf())
            .sum()
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        loop {
            let old_did = self.did;
            let (replacement, matching) = self.advance_round(old_did, 0, false)?;
            if replacement.is_some() {
                return Ok(replacement);
            }
            if self.did == 0 {
                // Every child is exhausted.
                return Ok(None);
            }
            if matching % 2 == 1 {
                return Ok(None);
            }
            // An even number of children match here; go round again.
        }
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        let old_did = self.did;
        let (replacement, matching) = self.advance_round(old_did, did, true)?;
        if replacement.is_some() {
            return Ok(replacement);
        }
        if self.did == 0 {
            return Ok(None);
        }
        if matching % 2 == 1 {
            return Ok(None);
        }
        self.next(w_min)
    }

    fn at_end(&self) -> bool {
        self.did == 0
    }

    fn count_matching_subqs(&self) -> TermCount {
        self.children
            .iter()
            .filter(|pl| pl.docid() == self.did)
            .map(|pl| pl.count_matching_subqs())
            .sum()
    }
}
