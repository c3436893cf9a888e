//! Per-shard match façades.

use std::collections::BTreeSet;
use std::sync::Arc;

use quern_query::Query;
use quern_weight::{DocCount, Stats, TermCount, ValueStats, Weight};

use crate::backend::Database;
use crate::mset::{MSet, TermInfoMap};
use crate::optimiser::QueryOptimiser;
use crate::options::MatchOptions;
use crate::postlist::{ExtraWeightPostList, PostList, RecalcHint, SourceRegistry};
use crate::rset::RSet;
use crate::MatchError;

/// Everything a shard needs to know to take part in one match.
pub struct MatchSpec<'a> {
    /// The validated query tree.
    pub query: &'a Query,
    /// Query length (total wqf).
    pub qlen: TermCount,
    /// The shard's slice of the relevance set, in local docids.
    pub rset: RSet,
    /// Prototype weighting scheme.
    pub weight: &'a dyn Weight,
    /// The match options.
    pub options: &'a MatchOptions,
    /// Registered posting sources.
    pub sources: &'a SourceRegistry,
}

/// A shard that can take part in matches.
///
/// Local shards wrap a [`Database`]; remote shards wrap a connection and
/// plug in through the same trait.
pub trait Shard {
    /// The shard's read interface, used for document access during and
    /// after the match.
    fn database(&self) -> Arc<dyn Database>;

    /// Whether this shard evaluates its matches elsewhere.
    fn is_remote(&self) -> bool {
        false
    }

    /// Creates the per-match façade.
    fn submatch(&self, spec: MatchSpec<'_>) -> Result<Box<dyn SubMatch>, MatchError>;
}

/// One shard's participation in a match.
pub trait SubMatch {
    /// Contributes this shard's statistics.
    ///
    /// Returns false when remote input wasn't ready and `nowait` was set;
    /// the orchestrator will call again.
    fn prepare_match(&mut self, nowait: bool, stats: &mut Stats) -> Result<bool, MatchError>;

    /// Hands over the collated statistics and the match window.
    fn start_match(
        &mut self,
        first: DocCount,
        maxitems: DocCount,
        check_at_least: DocCount,
        stats: &Arc<Stats>,
    ) -> Result<(), MatchError>;

    /// Builds the compiled postlist for this shard.
    ///
    /// Only the first shard receives a `term_info` to fill in.
    fn get_postlist(
        &mut self,
        term_info: Option<&mut TermInfoMap>,
        recalc: &RecalcHint,
    ) -> Result<Box<dyn PostList>, MatchError>;

    /// Fetches the shard's fully-evaluated MSet, for the single remote
    /// shard short-circuit.
    fn remote_mset(&mut self) -> Result<MSet, MatchError> {
        Err(MatchError::InvalidOperation(
            "only remote submatches serve whole match sets".to_string(),
        ))
    }

    /// The percent factor the remote shard computed, if any.
    fn percent_factor(&self) -> Option<f64> {
        None
    }
}

/// A shard backed by a database in this process.
pub struct LocalShard {
    /// The wrapped database.
    db: Arc<dyn Database>,
}

impl LocalShard {
    /// Wraps a database as a shard.
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

impl Shard for LocalShard {
    fn database(&self) -> Arc<dyn Database> {
        Arc::clone(&self.db)
    }

    fn submatch(&self, spec: MatchSpec<'_>) -> Result<Box<dyn SubMatch>, MatchError> {
        Ok(Box::new(LocalSubMatch {
            db: Arc::clone(&self.db),
            query: spec.query.clone(),
            qlen: spec.qlen,
            rset: spec.rset,
            wt_factory: spec.weight.clone_boxed(),
            sources: spec
                .sources
                .iter()
                .map(|(name, source)| (name.clone(), source.clone_boxed()))
                .collect(),
            stats: None,
        }))
    }
}

/// The local shard's match façade.
pub struct LocalSubMatch {
    /// The shard.
    db: Arc<dyn Database>,
    /// The query being matched.
    query: Query,
    /// Query length for weight initialisation.
    qlen: TermCount,
    /// This shard's slice of the relevance set.
    rset: RSet,
    /// Prototype weighting scheme.
    wt_factory: Box<dyn Weight>,
    /// Posting sources for `Query::Source` leaves.
    sources: SourceRegistry,
    /// Collated statistics, stored by `start_match`.
    stats: Option<Arc<Stats>>,
}

impl SubMatch for LocalSubMatch {
    fn prepare_match(&mut self, _nowait: bool, stats: &mut Stats) -> Result<bool, MatchError> {
        let db = &self.db;
        stats.add_collection(
            db.doccount(),
            db.avlength(),
            db.total_length(),
            (db.doclength_lower_bound(), db.doclength_upper_bound()),
        );
        stats.add_total_term_count(db.total_length());

        let mut query_terms = BTreeSet::new();
        for (term, _wqf) in self.query.unique_terms() {
            query_terms.insert(term);
            stats.add_termfreq(
                term,
                db.termfreq(term),
                db.collection_freq(term),
                db.wdf_upper_bound(term),
            );
        }
        for slot in self.query.value_slots() {
            stats.add_value_stats(
                slot,
                &ValueStats {
                    lower_bound: db.value_lower_bound(slot),
                    upper_bound: db.value_upper_bound(slot),
                    freq: db.value_freq(slot),
                },
            );
        }

        stats.add_rset_size(self.rset.len());
        for did in self.rset.iter() {
            for entry in db.open_term_list(did)? {
                if query_terms.contains(entry.term.as_str()) {
                    stats.add_reltermfreq(&entry.term, 1);
                }
            }
        }
        Ok(true)
    }

    fn start_match(
        &mut self,
        _first: DocCount,
        _maxitems: DocCount,
        _check_at_least: DocCount,
        stats: &Arc<Stats>,
    ) -> Result<(), MatchError> {
        self.stats = Some(Arc::clone(stats));
        Ok(())
    }

    fn get_postlist(
        &mut self,
        term_info: Option<&mut TermInfoMap>,
        recalc: &RecalcHint,
    ) -> Result<Box<dyn PostList>, MatchError> {
        let stats = self
            .stats
            .as_ref()
            .ok_or_else(|| {
                MatchError::InvalidOperation(
                    "get_postlist called before start_match".to_string(),
                )
            })?
            .clone();

        let mut optimiser = QueryOptimiser::new(
            &self.db,
            &stats,
            self.qlen,
            self.wt_factory.as_ref(),
            term_info,
            &self.sources,
            recalc.clone(),
        );
        let mut pl = optimiser.compile(&self.query, 1.0)?;

        // A term-independent weight contribution gets added by a wrapper
        // above the compiled root.
        let mut extra_wt = self.wt_factory.clone_boxed();
        extra_wt.init(&stats, self.qlen, None, 0, 1.0);
        if extra_wt.maxextra() != 0.0 {
            pl = Box::new(ExtraWeightPostList::new(pl, extra_wt, recalc.clone()));
        }
        Ok(pl)
    }
}
