//! The merged view over per-shard postlist trees.

use std::sync::Arc;

use quern_weight::{DocCount, DocId, TermCount};

use crate::backend::Database;
use crate::postlist::{DocStats, PostList, RecalcHint};
use crate::MatchError;

/// Drives the per-shard postlists sequentially and maps local docids onto
/// the global interleaved space.
///
/// The tree owns a per-document statistics cache which is invalidated on
/// every advance; the document-length lookup happens at most once per
/// candidate and only when the weighting scheme asked for it.
pub(crate) struct PostListTree {
    /// Per-shard compiled postlists; `None` for shards dropped by the
    /// error handler.
    shard_pls: Vec<Option<Box<dyn PostList>>>,
    /// Per-shard databases, for document statistics.
    shard_dbs: Vec<Arc<dyn Database>>,
    /// Index of the shard currently being drained.
    current: usize,
    /// Whether `max_weight` is still valid.
    use_cached_max: bool,
    /// Cached maximum achievable weight.
    max_weight: f64,
    /// Shared recalculation signal from the operator nodes.
    recalc: RecalcHint,
    /// Whether the weighting scheme reads document statistics.
    need_doc_stats: bool,
    /// Cached statistics for the current candidate.
    cached_stats: Option<DocStats>,
}

impl PostListTree {
    /// Builds the tree over per-shard postlists.
    pub(crate) fn new(
        shard_pls: Vec<Option<Box<dyn PostList>>>,
        shard_dbs: Vec<Arc<dyn Database>>,
        recalc: RecalcHint,
        need_doc_stats: bool,
    ) -> Self {
        let current = shard_pls
            .iter()
            .position(Option::is_some)
            .unwrap_or(shard_pls.len());
        Self {
            shard_pls,
            shard_dbs,
            current,
            use_cached_max: false,
            max_weight: 0.0,
            recalc,
            need_doc_stats,
            cached_stats: None,
        }
    }

    /// The number of shards.
    fn n_shards(&self) -> u32 {
        self.shard_pls.len() as u32
    }

    /// The shard currently being drained.
    pub(crate) fn current_shard(&self) -> usize {
        self.current
    }

    /// The current postlist, if any shard remains.
    fn current_pl(&self) -> Option<&dyn PostList> {
        self.shard_pls.get(self.current)?.as_deref()
    }

    /// An upper bound on the weight of any remaining document.
    pub(crate) fn recalc_maxweight(&mut self) -> f64 {
        if self.recalc.take() {
            self.use_cached_max = false;
        }
        if !self.use_cached_max {
            self.use_cached_max = true;
            let mut max = 0.0f64;
            for pl in self.shard_pls[self.current..].iter_mut().flatten() {
                max = max.max(pl.recalc_maxweight());
            }
            self.max_weight = max;
        }
        self.max_weight
    }

    /// Sum of the shards' lower termfreq bounds.
    pub(crate) fn termfreq_min(&self) -> DocCount {
        self.shard_pls
            .iter()
            .flatten()
            .map(|pl| pl.termfreq_min())
            .sum()
    }

    /// Sum of the shards' upper termfreq bounds.
    pub(crate) fn termfreq_max(&self) -> DocCount {
        self.shard_pls
            .iter()
            .flatten()
            .map(|pl| pl.termfreq_max())
            .sum()
    }

    /// Sum of the shards' termfreq estimates.
    pub(crate) fn termfreq_est(&self) -> DocCount {
        self.shard_pls
            .iter()
            .flatten()
            .map(|pl| pl.termfreq_est())
            .sum()
    }

    /// The current document's global id.
    pub(crate) fn docid(&self) -> DocId {
        let local = self.local_docid();
        (local - 1) * self.n_shards() + self.current as u32 + 1
    }

    /// The current document's shard-local id.
    pub(crate) fn local_docid(&self) -> DocId {
        self.current_pl().map_or(0, |pl| pl.docid())
    }

    /// The current document's weight.
    pub(crate) fn weight(&mut self) -> Result<f64, MatchError> {
        let need_stats = match self.current_pl() {
            Some(pl) => self.need_doc_stats && pl.wants_doc_stats(),
            None => return Ok(0.0),
        };
        let mut stats = DocStats::default();
        if need_stats {
            if self.cached_stats.is_none() {
                let did = self.local_docid();
                let db = &self.shard_dbs[self.current];
                self.cached_stats = Some(DocStats {
                    doclen: db.doclength(did)?,
                    unique_terms: db.unique_terms(did)?,
                    wdfdocmax: 0,
                });
            }
            if let Some(cached) = self.cached_stats {
                stats = cached;
            }
        }
        let Some(pl) = self.current_pl() else {
            return Ok(0.0);
        };
        Ok(pl.weight(&stats))
    }

    /// The number of leaf subqueries matching the current document.
    pub(crate) fn count_matching_subqs(&self) -> TermCount {
        self.current_pl().map_or(0, |pl| pl.count_matching_subqs())
    }

    /// Advances to the next candidate whose weight can reach `w_min`.
    ///
    /// Returns false once every shard is drained.
    pub(crate) fn next(&mut self, w_min: f64) -> Result<bool, MatchError> {
        self.cached_stats = None;
        loop {
            let Some(pl) = self.shard_pls.get_mut(self.current).and_then(Option::as_mut)
            else {
                return Ok(false);
            };
            let replacement = pl.next(w_min)?;
            if let Some(new_pl) = replacement {
                self.shard_pls[self.current] = Some(new_pl);
                self.recalc.mark();
            }
            if self.current_pl().is_some_and(|pl| !pl.at_end()) {
                return Ok(true);
            }
            // This shard is drained; move to the next, invalidating the
            // per-shard caches.
            loop {
                self.current += 1;
                if self.current >= self.shard_pls.len() {
                    return Ok(false);
                }
                if self.shard_pls[self.current].is_some() {
                    break;
                }
            }
            self.use_cached_max = false;
            self.cached_stats = None;
        }
    }

    /// Whether the recalc hint fired since the last maxweight refresh.
    pub(crate) fn needs_recalc(&self) -> bool {
        self.recalc.is_marked() || !self.use_cached_max
    }
}
