//! The high-level match entry point.

use std::sync::Arc;

use quern_query::Query;
use quern_weight::{Bm25Weight, DocCount, Weight};

use crate::backend::Database;
use crate::matcher::{ErrorHandler, run_match};
use crate::mset::MSet;
use crate::options::MatchOptions;
use crate::postlist::{PostingSource, SourceRegistry};
use crate::rset::RSet;
use crate::submatch::{LocalShard, Shard};
use crate::MatchError;

/// Sets up and runs matches over one or more shards.
///
/// The usual flow: construct over the shards, [`set_query`], adjust
/// [`options_mut`], then call [`mset`].
///
/// [`set_query`]: Self::set_query
/// [`options_mut`]: Self::options_mut
/// [`mset`]: Self::mset
pub struct Enquire {
    /// The shards to match over.
    shards: Vec<Box<dyn Shard>>,
    /// The current query.
    query: Option<Query>,
    /// Documents marked relevant for feedback weighting.
    rset: RSet,
    /// The weighting scheme prototype.
    weight: Box<dyn Weight>,
    /// The match options.
    options: MatchOptions,
    /// Posting sources resolvable from `Query::Source` leaves.
    sources: SourceRegistry,
    /// When set, per-shard failures drop the shard instead of aborting.
    error_handler: Option<Box<ErrorHandler<'static>>>,
    /// Pre-collated statistics, replacing the preparation phase.
    collated_stats: Option<Arc<quern_weight::Stats>>,
}

impl Enquire {
    /// Creates an enquiry over a single local database.
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::over_shards(vec![Box::new(LocalShard::new(db)) as Box<dyn Shard>])
    }

    /// Creates an enquiry over several local databases, combined with
    /// interleaved docids.
    pub fn over_databases(dbs: Vec<Arc<dyn Database>>) -> Self {
        Self::over_shards(
            dbs.into_iter()
                .map(|db| Box::new(LocalShard::new(db)) as Box<dyn Shard>)
                .collect(),
        )
    }

    /// Creates an enquiry over arbitrary shards (local and/or remote).
    pub fn over_shards(shards: Vec<Box<dyn Shard>>) -> Self {
        Self {
            shards,
            query: None,
            rset: RSet::new(),
            weight: Box::new(Bm25Weight::default()),
            options: MatchOptions::new(),
            sources: SourceRegistry::new(),
            error_handler: None,
            collated_stats: None,
        }
    }

    /// Sets the query to match.
    pub fn set_query(&mut self, query: Query) {
        self.query = Some(query);
    }

    /// Sets the relevance set used by feedback-aware weighting.
    pub fn set_rset(&mut self, rset: RSet) {
        self.rset = rset;
    }

    /// Replaces the weighting scheme (BM25 by default).
    pub fn set_weight(&mut self, weight: Box<dyn Weight>) {
        self.weight = weight;
    }

    /// The match options, for adjustment before [`mset`](Self::mset).
    pub fn options_mut(&mut self) -> &mut MatchOptions {
        &mut self.options
    }

    /// Replaces the match options wholesale.
    pub fn set_options(&mut self, options: MatchOptions) {
        self.options = options;
    }

    /// Registers a posting source under the name query trees use.
    pub fn register_source(&mut self, name: impl Into<String>, source: Box<dyn PostingSource>) {
        self.sources.insert(name.into(), source);
    }

    /// Supplies already-collated collection statistics.
    ///
    /// A match server answering for one shard of a wider collection uses
    /// this to weight with the collection-wide statistics the client
    /// collated, instead of re-deriving shard-local ones.
    pub fn set_collated_stats(&mut self, stats: Arc<quern_weight::Stats>) {
        self.collated_stats = Some(stats);
    }

    /// Installs a handler consuming per-shard failures.
    ///
    /// With a handler installed, a failing shard is dropped and the match
    /// carries on over the remaining shards; bounds then cover only the
    /// shards that answered.
    pub fn set_error_handler(&mut self, handler: Box<ErrorHandler<'static>>) {
        self.error_handler = Some(handler);
    }

    /// Runs the match and returns the page `[first, first + maxitems)`.
    ///
    /// `check_at_least` asks the engine to inspect at least that many
    /// matches (tightening the bounds) before stopping early; it is
    /// raised to `maxitems` if lower.
    pub fn mset(
        &mut self,
        first: DocCount,
        maxitems: DocCount,
        check_at_least: Option<DocCount>,
    ) -> Result<MSet, MatchError> {
        let query = self
            .query
            .as_ref()
            .ok_or_else(|| MatchError::InvalidOperation("no query has been set".to_string()))?;
        if self.shards.is_empty() {
            return Err(MatchError::InvalidOperation(
                "no shards to match over".to_string(),
            ));
        }
        if query.is_nothing() || maxitems == 0 {
            return Ok(MSet {
                first,
                ..MSet::default()
            });
        }
        run_match(
            &self.shards,
            query,
            &self.rset,
            self.weight.as_ref(),
            &mut self.options,
            &self.sources,
            self.error_handler.as_deref_mut(),
            self.collated_stats.clone(),
            first,
            maxitems,
            check_at_least.unwrap_or(maxitems),
        )
    }
}
