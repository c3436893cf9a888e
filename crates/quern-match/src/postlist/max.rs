//! MAX postlist: union with best-child weights.

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs};

use crate::postlist::{Advanced, DocStats, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// Matches documents in any child; the weight at a document is the
/// maximum over the children matching there.
///
/// There is no decay: any child may still supply the best weight later.
pub(crate) struct MaxPostList {
    /// Current docid, or 0 before the start / at the end.
    did: DocId,
    /// The children.
    children: Vec<Box<dyn PostList>>,
    /// Documents in the shard.
    db_size: DocCount,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl MaxPostList {
    /// Builds a MAX over `children`.
    pub(crate) fn new(
        children: Vec<Box<dyn PostList>>,
        db_size: DocCount,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            did: 0,
            children,
            db_size,
            recalc,
        }
    }

    /// Advances lagging children to at least `target`, dropping exhausted
    /// ones, and settles on the smallest resulting docid.
    ///
    /// `stepping` distinguishes a `next` round (children sitting on the
    /// old docid step once) from a `skip_to` round.
    fn advance_round(
        &mut self,
        old_did: DocId,
        target: DocId,
        w_min: f64,
        stepping: bool,
    ) -> Result<Advanced, MatchError> {
        self.did = 0;
        let mut index = 0;
        while index < self.children.len() {
            let cur_did = if old_did == 0 {
                0
            } else {
                self.children[index].docid()
            };
            if cur_did < target {
                let replacement = if stepping && (old_did == 0 || cur_did == old_did) {
                    self.children[index].next(w_min)?
                } else {
                    self.children[index].skip_to(target, w_min)?
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
            }
            index += 1;
        }
        if self.children.len() == 1 {
            self.recalc.mark();
            return Ok(Some(self.children.pop().unwrap()));
        }
        Ok(None)
    }
}

impl PostList for MaxPostList {
    fn termfreq_min(&self) -> DocCount {
        self.children
            .iter()
            .map(|pl| pl.termfreq_min())
            .max()
            .unwrap_or(0)
    }

    fn termfreq_max(&self) -> DocCount {
        let sum: u64 = self
            .children
            .iter()
            .map(|pl| u64::from(pl.termfreq_max()))
            .sum();
        sum.min(u64::from(self.db_size)) as DocCount
    }

    fn termfreq_est(&self) -> DocCount {
        if self.db_size == 0 {
            return 0;
        }
        let scale = 1.0 / f64::from(self.db_size);
        let mut p_est = f64::from(self.children[0].termfreq_est()) * scale;
        for child in &self.children[1..] {
            let p_i = f64::from(child.termfreq_est()) * scale;
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
        let first = self.children[0].termfreqs_est(stats);
        let mut p_est = f64::from(first.termfreq) * scale;
        let mut pr_est = f64::from(first.reltermfreq) * rtf_scale;
        for child in &self.children[1..] {
            let freqs = child.termfreqs_est(stats);
            let p_i = f64::from(freqs.termfreq) * scale;
            p_est += p_i - p_est * p_i;
            let pr_i = f64::from(freqs.reltermfreq) * rtf_scale;
            pr_est += pr_i - pr_est * pr_i;
        }
        TermFreqs::new(
            (p_est * f64::from(stats.collection_size) + 0.5) as DocCount,
            (pr_est * f64::from(stats.rset_size) + 0.5) as DocCount,
            0,
        )
    }

    fn maxweight(&self) -> f64 {
        self.children
            .iter()
            .map(|pl| pl.maxweight())
            .fold(0.0, f64::max)
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.children
            .iter_mut()
            .map(|pl| pl.recalc_maxweight())
            .fold(0.0, f64::max)
    }

    fn docid(&self) -> DocId {
        self.did
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        self.children
            .iter()
            .filter(|pl| pl.docid() == self.did)
            .map(|pl| pl.weight(doc))
            .fold(0.0, f64::max)
    }

    fn wdf(&self) -> TermCount {
        // Sum, as a synonym over this subtree would want.
        self.children
            .iter()
            .filter(|pl| pl.docid() == self.did)
            .map(|pl| pl.wdf())
            .sum()
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        let old_did = self.did;
        self.advance_round(old_did, old_did.wrapping_add(1), w_min, true)
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        let old_did = self.did;
        self.advance_round(old_did, did, w_min, false)
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
