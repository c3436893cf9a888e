//! N-way unweighted OR postlist.

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use crate::postlist::{Advanced, DocStats, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// One child of the heap: a postlist plus the docid it last reported.
struct HeapEntry {
    /// The child postlist.
    pl: Box<dyn PostList>,
    /// Docid the child last reported (0 before the start).
    did: DocId,
}

/// Matches documents present in any child, with weight 0.
///
/// The children sit in a binary min-heap keyed by their current docid, so
/// each advance only touches the children matching the current document.
/// Children that run out are removed; the last survivor replaces the node.
pub(crate) struct BoolOrPostList {
    /// Current docid, or 0 before the start.
    did: DocId,
    /// Heap of children keyed by `did`.
    children: Vec<HeapEntry>,
    /// Documents in the shard.
    db_size: DocCount,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl BoolOrPostList {
    /// Builds a boolean OR over `children`.
    ///
    /// All entries start with docid 0, which is trivially a valid heap.
    pub(crate) fn new(
        children: Vec<Box<dyn PostList>>,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            did: 0,
            children: children
                .into_iter()
                .map(|pl| HeapEntry { pl, did: 0 })
                .collect(),
            db_size,
            recalc,
        }
    }

    /// Restores the heap property downward from `pos`.
    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < self.children.len() && self.children[left].did < self.children[smallest].did
            {
                smallest = left;
            }
            if right < self.children.len()
                && self.children[right].did < self.children[smallest].did
            {
                smallest = right;
            }
            if smallest == pos {
                return;
            }
            self.children.swap(pos, smallest);
            pos = smallest;
        }
    }

    /// Rebuilds the heap from scratch.
    fn make_heap(&mut self) {
        for pos in (0..self.children.len() / 2).rev() {
            self.sift_down(pos);
        }
    }

    /// Calls `visit` on every child matching the current docid.
    fn fold_matching<T: Default + std::ops::AddAssign>(
        &self,
        visit: impl Fn(&dyn PostList) -> T,
    ) -> T {
        let mut total = T::default();
        for entry in &self.children {
            if entry.did == self.did {
                total += visit(entry.pl.as_ref());
            }
        }
        total
    }
}

impl PostList for BoolOrPostList {
    fn termfreq_min(&self) -> DocCount {
        self.children
            .iter()
            .map(|entry| entry.pl.termfreq_min())
            .max()
            .unwrap_or(0)
    }

    fn termfreq_max(&self) -> DocCount {
        // Maximised when the children are disjoint.
        let sum: u64 = self
            .children
            .iter()
            .map(|entry| u64::from(entry.pl.termfreq_max()))
            .sum();
        sum.min(u64::from(self.db_size)) as DocCount
    }

    fn termfreq_est(&self) -> DocCount {
        if self.db_size == 0 {
            return 0;
        }
        // Pairwise independence, associatively combined.
        let scale = 1.0 / f64::from(self.db_size);
        let mut p_est = f64::from(self.children[0].pl.termfreq_est()) * scale;
        for entry in &self.children[1..] {
            let p_i = f64::from(entry.pl.termfreq_est()) * scale;
            p_est += p_i - p_est * p_i;
        }
        (p_est * f64::from(self.db_size) + 0.5) as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        if stats.collection_size == 0 {
            return TermFreqs::default();
        }
        let scale = 1.0 / f64::from(stats.collection_size);
        let rtf_scale = if stats.rset_size == 0 {
            0.0
        } else {
            1.0 / f64::from(stats.rset_size)
        };
        let cf_scale = if stats.total_term_count == 0 {
            0.0
        } else {
            1.0 / stats.total_term_count as f64
        };
        let first = self.children[0].pl.termfreqs_est(stats);
        let mut p_est = f64::from(first.termfreq) * scale;
        let mut pr_est = f64::from(first.reltermfreq) * rtf_scale;
        let mut pc_est = first.collfreq as f64 * cf_scale;
        for entry in &self.children[1..] {
            let freqs = entry.pl.termfreqs_est(stats);
            let p_i = f64::from(freqs.termfreq) * scale;
            p_est += p_i - p_est * p_i;
            let pc_i = freqs.collfreq as f64 * cf_scale;
            pc_est += pc_i - pc_est * pc_i;
            if stats.rset_size != 0 {
                let pr_i = f64::from(freqs.reltermfreq) * rtf_scale;
                pr_est += pr_i - pr_est * pr_i;
            }
        }
        TermFreqs::new(
            (p_est * f64::from(stats.collection_size) + 0.5) as DocCount,
            (pr_est * f64::from(stats.rset_size) + 0.5) as DocCount,
            (pc_est * stats.total_term_count as f64 + 0.5) as u64,
        )
    }

    fn maxweight(&self) -> f64 {
        0.0
    }

    fn recalc_maxweight(&mut self) -> f64 {
        0.0
    }

    fn docid(&self) -> DocId {
        self.did
    }

    fn weight(&self, _doc: &DocStats) -> f64 {
        0.0
    }

    fn wdf(&self) -> TermCount {
        self.fold_matching(|pl| pl.wdf())
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        while self.children[0].did == self.did {
            let replacement = self.children[0].pl.next(0.0)?;
            swap_in(&mut self.children[0].pl, replacement, &self.recalc);

            if self.children[0].pl.at_end() {
                if self.children.len() == 1 {
                    // Every child is exhausted; the last one reports the
                    // end for us.
                    let entry = self.children.pop().unwrap();
                    self.recalc.mark();
                    return Ok(Some(entry.pl));
                }
                let last = self.children.len() - 1;
                self.children.swap(0, last);
                self.children.pop();
                self.sift_down(0);
                continue;
            }
            self.children[0].did = self.children[0].pl.docid();
            self.sift_down(0);
        }

        if self.children.len() == 1 {
            let entry = self.children.pop().unwrap();
            self.recalc.mark();
            return Ok(Some(entry.pl));
        }
        self.did = self.children[0].did;
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, _w_min: f64) -> Result<Advanced, MatchError> {
        if did <= self.did {
            return Ok(None);
        }
        self.did = DocId::MAX;
        let mut keep = 0;
        for index in 0..self.children.len() {
            if self.children[index].did < did {
                let replacement = self.children[index].pl.skip_to(did, 0.0)?;
                swap_in(&mut self.children[index].pl, replacement, &self.recalc);
                if self.children[index].pl.at_end() {
                    if keep == 0 && index == self.children.len() - 1 {
                        // Every child is exhausted.
                        let entry = self.children.pop().unwrap();
                        self.children.clear();
                        self.recalc.mark();
                        return Ok(Some(entry.pl));
                    }
                    continue;
                }
                self.children[index].did = self.children[index].pl.docid();
            }
            self.children.swap(keep, index);
            self.did = self.did.min(self.children[keep].did);
            keep += 1;
        }
        self.children.truncate(keep);
        if self.children.len() == 1 {
            let entry = self.children.pop().unwrap();
            self.recalc.mark();
            return Ok(Some(entry.pl));
        }
        self.make_heap();
        Ok(None)
    }

    fn at_end(&self) -> bool {
        // Never true: the last surviving child replaces us and reports the
        // end itself.
        false
    }

    fn count_matching_subqs(&self) -> TermCount {
        self.fold_matching(|pl| pl.count_matching_subqs())
    }
}
