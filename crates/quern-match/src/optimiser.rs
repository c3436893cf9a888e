//! Compilation of query trees into postlist trees.

use std::sync::Arc;

use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA, SINK_STATE};
use quern_query::{ExpansionCombiner, ExpansionLimit, Query, WildcardPattern};
use quern_weight::{DocCount, Position, Stats, TermCount, TermFreqs, Weight};

use crate::backend::{AllTermsEntry, Database};
use crate::mset::{TermFreqAndWeight, TermInfoMap};
use crate::postlist::{
    AndMaybePostList, AndNotPostList, BoolOrPostList, EmptyPostList, ExactPhrasePostList,
    ExternalPostList, MaxPostList, MultiAndPostList, MultiXorPostList, NearPostList, OrPostList,
    PhrasePostList, PostList, RecalcHint, SourceRegistry, SynonymPostList, ValueRangePostList,
};
use crate::MatchError;

/// A positional constraint noted while flattening an AND, applied above
/// the combined postlist afterwards.
struct PosFilter {
    /// True for NEAR, false for PHRASE.
    near: bool,
    /// Window size in positions.
    window: Position,
    /// The constrained terms, in query order.
    terms: Vec<String>,
}

/// Compiles a query tree into a postlist tree for one shard.
///
/// Weight factors propagate downwards: scaling multiplies the factor, a
/// filter's right branch and everything under a synonym compile with
/// factor 0 (purely boolean, no weight objects attached).
pub(crate) struct QueryOptimiser<'a> {
    /// The shard being compiled for.
    db: &'a Arc<dyn Database>,
    /// Cached `db.doccount()`.
    db_size: DocCount,
    /// The collated collection statistics.
    stats: &'a Stats,
    /// Query length for weight initialisation.
    qlen: TermCount,
    /// Prototype weighting scheme, cloned per term.
    wt_factory: &'a dyn Weight,
    /// Per-term info to fill in (first shard only).
    term_info: Option<&'a mut TermInfoMap>,
    /// Posting sources registered with the caller.
    sources: &'a SourceRegistry,
    /// Shared recalculation signal for the built tree.
    recalc: RecalcHint,
}

impl<'a> QueryOptimiser<'a> {
    /// Creates an optimiser for one shard.
    pub(crate) fn new(
        db: &'a Arc<dyn Database>,
        stats: &'a Stats,
        qlen: TermCount,
        wt_factory: &'a dyn Weight,
        term_info: Option<&'a mut TermInfoMap>,
        sources: &'a SourceRegistry,
        recalc: RecalcHint,
    ) -> Self {
        Self {
            db,
            db_size: db.doccount(),
            stats,
            qlen,
            wt_factory,
            term_info,
            sources,
            recalc,
        }
    }

    /// Compiles `query` with the given weight factor.
    pub(crate) fn compile(
        &mut self,
        query: &Query,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        match query {
            Query::MatchNothing => Ok(Box::new(EmptyPostList)),
            Query::MatchAll => self.term_postlist("", 1, factor),
            Query::Term { term, wqf, .. } => self.term_postlist(term, *wqf, factor),
            Query::ValueRange { slot, begin, end } => {
                self.value_range(*slot, begin, Some(end), factor)
            }
            Query::ValueGe { slot, limit } => self.value_range(*slot, limit, None, factor),
            Query::ValueLe { slot, limit } => self.value_range(*slot, "", Some(limit), factor),
            Query::Source(name) => self.external(name, factor),
            Query::Scale { factor: scale, child } => self.compile(child, factor * scale),
            Query::And(_) | Query::Filter(..) | Query::Near { .. } | Query::Phrase { .. } => {
                self.do_and_like(query, factor)
            }
            Query::Or(children) => {
                let pls = self.compile_children(children, factor)?;
                Ok(self.or_tree(pls, factor))
            }
            Query::Xor(children) => {
                let pls = self.compile_children(children, factor)?;
                Ok(match pls.len() {
                    1 => pls.into_iter().next().unwrap(),
                    _ => Box::new(MultiXorPostList::new(
                        pls,
                        self.db_size,
                        self.recalc.clone(),
                    )),
                })
            }
            Query::EliteSet { k, children } => {
                let mut pls = self.compile_children(children, factor)?;
                let keep = *k as usize;
                if pls.len() > keep {
                    for pl in &mut pls {
                        pl.recalc_maxweight();
                    }
                    pls.select_nth_unstable_by(keep - 1, |a, b| {
                        elite_key(b.as_ref()).total_cmp(&elite_key(a.as_ref()))
                    });
                    pls.truncate(keep);
                }
                Ok(self.or_tree(pls, factor))
            }
            Query::Synonym(children) => self.do_synonym(children, factor),
            Query::Max(children) => {
                let pls = self.compile_children(children, factor)?;
                Ok(match pls.len() {
                    1 => pls.into_iter().next().unwrap(),
                    _ => Box::new(MaxPostList::new(pls, self.db_size, self.recalc.clone())),
                })
            }
            Query::AndNot(left, right) => {
                let left = self.compile(left, factor)?;
                let right = self.compile(right, 0.0)?;
                Ok(Box::new(AndNotPostList::new(
                    left,
                    right,
                    self.db_size,
                    self.recalc.clone(),
                )))
            }
            Query::AndMaybe(left, right) => {
                let left = self.compile(left, factor)?;
                let right = self.compile(right, factor)?;
                Ok(Box::new(AndMaybePostList::new(
                    left,
                    right,
                    self.db_size,
                    self.recalc.clone(),
                )))
            }
            Query::Wildcard {
                pattern,
                max_expansion,
                limit,
                combiner,
            } => self.expand_wildcard(pattern, *max_expansion, *limit, *combiner, factor),
            Query::EditDistance {
                pattern,
                threshold,
                fixed_prefix_len,
                max_expansion,
                limit,
                combiner,
            } => self.expand_edit_distance(
                pattern,
                *threshold,
                *fixed_prefix_len,
                *max_expansion,
                *limit,
                *combiner,
                factor,
            ),
        }
    }

    /// Compiles every child with the same factor.
    fn compile_children(
        &mut self,
        children: &[Query],
        factor: f64,
    ) -> Result<Vec<Box<dyn PostList>>, MatchError> {
        children
            .iter()
            .map(|child| self.compile(child, factor))
            .collect()
    }

    /// Opens a leaf postlist for a term, attaching its weight.
    fn term_postlist(
        &mut self,
        term: &str,
        wqf: TermCount,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        // The all-documents postlist never carries weight.
        let factor = if term.is_empty() { 0.0 } else { factor };
        let boolean = factor == 0.0;
        let mut pl = self.db.open_post_list(term)?;
        let mut termweight = 0.0;
        if !boolean {
            let mut weight = self.wt_factory.clone_boxed();
            weight.init(self.stats, self.qlen, Some(term), wqf, factor);
            termweight = weight.maxpart();
            pl.set_termweight(weight);
        }
        if !term.is_empty() {
            if let Some(term_info) = self.term_info.as_deref_mut() {
                let entry = term_info
                    .entry(term.to_string())
                    .or_insert(TermFreqAndWeight {
                        termfreq: self.stats.termfreq(term),
                        termweight: 0.0,
                    });
                if !boolean {
                    entry.termweight += termweight;
                }
            }
        }
        Ok(pl)
    }

    /// Opens a leaf postlist for an expansion term, weighted from its
    /// shard-local frequencies.
    fn expansion_postlist(
        &mut self,
        entry: &AllTermsEntry,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        let mut pl = self.db.open_post_list(&entry.term)?;
        if factor != 0.0 {
            let freqs = match self.stats.term_stats(&entry.term) {
                Some(stats) => TermFreqs::new(stats.termfreq, stats.reltermfreq, stats.collfreq),
                None => TermFreqs::new(entry.termfreq, 0, entry.collfreq),
            };
            let mut weight = self.wt_factory.clone_boxed();
            weight.init_from_freqs(
                self.stats,
                self.qlen,
                &freqs,
                self.db.wdf_upper_bound(&entry.term),
                factor,
            );
            pl.set_termweight(weight);
        }
        Ok(pl)
    }

    /// Compiles a value-range leaf, with the bound-based rewrites.
    fn value_range(
        &mut self,
        slot: u32,
        begin: &str,
        end: Option<&str>,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        let lower = self.db.value_lower_bound(slot);
        let upper = self.db.value_upper_bound(slot);
        let freq = self.db.value_freq(slot);
        if freq == 0 {
            return Ok(Box::new(EmptyPostList));
        }
        // Entirely outside the stored bounds: provably empty.
        if end.is_some_and(|end| end < lower.as_str()) || begin > upper.as_str() {
            return Ok(Box::new(EmptyPostList));
        }
        // Covering every stored value in a fully-populated slot: every
        // document matches.
        if freq == self.db.doccount()
            && begin <= lower.as_str()
            && end.is_none_or(|end| end >= upper.as_str())
        {
            let pl = self.db.open_post_list("")?;
            return Ok(pl);
        }
        Ok(Box::new(ValueRangePostList::new(
            Arc::clone(self.db),
            slot,
            begin.to_string(),
            end.map(str::to_string),
        )?))
    }

    /// Resolves and adapts an external posting source.
    fn external(&mut self, name: &str, factor: f64) -> Result<Box<dyn PostList>, MatchError> {
        let source = self.sources.get(name).ok_or_else(|| {
            MatchError::invalid(format!("no posting source registered as {name:?}"))
        })?;
        let mut source = source.clone_boxed();
        source.init(self.db.as_ref())?;
        Ok(Box::new(ExternalPostList::new(source, factor)))
    }

    /// Compiles an AND-like subtree: nested AND/FILTER/NEAR/PHRASE nodes
    /// flatten into one n-way AND, with positional filters layered above.
    fn do_and_like(
        &mut self,
        query: &Query,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        let mut plists = Vec::new();
        let mut filters = Vec::new();
        self.and_like_children(query, factor, &mut plists, &mut filters)?;
        let mut pl: Box<dyn PostList> = match plists.len() {
            0 => Box::new(EmptyPostList),
            1 => plists.pop().unwrap(),
            _ => Box::new(MultiAndPostList::new(
                plists,
                self.db_size,
                self.recalc.clone(),
            )),
        };
        for filter in filters {
            pl = if filter.near {
                NearPostList::new(
                    pl,
                    Arc::clone(self.db),
                    filter.terms,
                    filter.window,
                    self.recalc.clone(),
                )
            } else if filter.window as usize == filter.terms.len() {
                ExactPhrasePostList::new(
                    pl,
                    Arc::clone(self.db),
                    filter.terms,
                    self.recalc.clone(),
                )
            } else {
                PhrasePostList::new(
                    pl,
                    Arc::clone(self.db),
                    filter.terms,
                    filter.window,
                    self.recalc.clone(),
                )
            };
        }
        Ok(pl)
    }

    /// Recursively flattens AND-like children into `plists`, recording
    /// positional constraints.
    fn and_like_children(
        &mut self,
        query: &Query,
        factor: f64,
        plists: &mut Vec<Box<dyn PostList>>,
        filters: &mut Vec<PosFilter>,
    ) -> Result<(), MatchError> {
        match query {
            Query::And(children) => {
                for child in children {
                    self.and_like_child(child, factor, plists, filters)?;
                }
            }
            Query::Filter(left, right) => {
                self.and_like_child(left, factor, plists, filters)?;
                // The filter branch is always boolean.
                self.and_like_child(right, 0.0, plists, filters)?;
            }
            Query::Near { window, children } | Query::Phrase { window, children } => {
                // Without positional data the constraint degrades to AND,
                // so the shard still returns some matches.
                let positional = self.db.has_positions();
                let mut terms = Vec::with_capacity(children.len());
                for child in children {
                    if positional {
                        match child {
                            Query::Term { term, wqf, .. } if !term.is_empty() => {
                                terms.push(term.clone());
                                let pl = self.term_postlist(term, *wqf, factor)?;
                                plists.push(pl);
                            }
                            _ => {
                                return Err(MatchError::unimplemented(
                                    "positional operators only support plain terms",
                                ));
                            }
                        }
                    } else {
                        self.and_like_child(child, factor, plists, filters)?;
                    }
                }
                if positional {
                    filters.push(PosFilter {
                        near: matches!(query, Query::Near { .. }),
                        window: *window,
                        terms,
                    });
                }
            }
            other => {
                let pl = self.compile(other, factor)?;
                plists.push(pl);
            }
        }
        Ok(())
    }

    /// Flattens one AND child: AND-like nodes recurse, anything else
    /// compiles to a postlist.
    fn and_like_child(
        &mut self,
        child: &Query,
        factor: f64,
        plists: &mut Vec<Box<dyn PostList>>,
        filters: &mut Vec<PosFilter>,
    ) -> Result<(), MatchError> {
        match child {
            Query::And(_) | Query::Filter(..) | Query::Near { .. } | Query::Phrase { .. } => {
                self.and_like_children(child, factor, plists, filters)
            }
            other => {
                let pl = self.compile(other, factor)?;
                plists.push(pl);
                Ok(())
            }
        }
    }

    /// Combines compiled subqueries into an OR structure.
    ///
    /// Unweighted ORs become one n-way heap; weighted ORs become a
    /// Huffman-style tree of binary nodes so the most frequent postings
    /// sit near the top and every node keeps `left.termfreq_est() >=
    /// right.termfreq_est()`.
    fn or_tree(&mut self, pls: Vec<Box<dyn PostList>>, factor: f64) -> Box<dyn PostList> {
        let mut pls = pls;
        match pls.len() {
            0 => return Box::new(EmptyPostList),
            1 => return pls.pop().unwrap(),
            _ => {}
        }
        if factor == 0.0 {
            return Box::new(BoolOrPostList::new(pls, self.db_size, self.recalc.clone()));
        }
        // Pop the two rarest, join them, push the pair back; repeat.
        let mut heap: Vec<(DocCount, Box<dyn PostList>)> = pls
            .into_iter()
            .map(|pl| (pl.termfreq_est(), pl))
            .collect();
        heap.sort_by_key(|(est, _)| std::cmp::Reverse(*est));
        loop {
            let (_, right) = heap.pop().unwrap();
            let (_, left) = heap.pop().unwrap();
            let combined: Box<dyn PostList> = Box::new(OrPostList::new(
                left,
                right,
                self.db_size,
                self.recalc.clone(),
            ));
            if heap.is_empty() {
                return combined;
            }
            let est = combined.termfreq_est();
            let at = heap
                .partition_point(|(other, _)| *other > est);
            heap.insert(at, (est, combined));
        }
    }

    /// Compiles a synonym subtree: a boolean OR wrapped with a
    /// virtual-term weight.
    fn do_synonym(
        &mut self,
        children: &[Query],
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        let pls = self.compile_children(children, 0.0)?;
        if factor == 0.0 {
            // Unweighted synonyms are just boolean ORs.
            return Ok(self.or_tree(pls, 0.0));
        }
        let wdf_disjoint = terms_are_disjoint(children);
        let or_pl = self.or_tree(pls, 0.0);
        Ok(self.wrap_synonym(or_pl, factor, wdf_disjoint))
    }

    /// Wraps an unweighted subtree with a virtual-term weight.
    fn wrap_synonym(
        &mut self,
        or_pl: Box<dyn PostList>,
        factor: f64,
        wdf_disjoint: bool,
    ) -> Box<dyn PostList> {
        let freqs = if self.stats.collection_size != 0 {
            or_pl.termfreqs_est(self.stats)
        } else {
            TermFreqs::default()
        };
        let mut weight = self.wt_factory.clone_boxed();
        weight.init_from_freqs(
            self.stats,
            self.qlen,
            &freqs,
            self.db.doclength_upper_bound(),
            factor,
        );
        Box::new(SynonymPostList::new(
            or_pl,
            weight,
            wdf_disjoint,
            self.recalc.clone(),
        ))
    }

    /// Expands a wildcard against the term dictionary.
    fn expand_wildcard(
        &mut self,
        pattern: &WildcardPattern,
        max_expansion: u32,
        limit: ExpansionLimit,
        combiner: ExpansionCombiner,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        let mut matched = Vec::new();
        for entry in self.db.open_allterms(pattern.fixed_prefix())? {
            if !pattern.test_prefix_known(&entry.term) {
                continue;
            }
            if max_expansion > 0
                && matched.len() as u32 == max_expansion
                && limit != ExpansionLimit::MostFrequent
            {
                match limit {
                    ExpansionLimit::Error => {
                        return Err(MatchError::Wildcard(format!(
                            "wildcard {} expands to more than {} terms",
                            pattern.pattern(),
                            max_expansion
                        )));
                    }
                    ExpansionLimit::First => break,
                    ExpansionLimit::MostFrequent => unreachable!(),
                }
            }
            matched.push(entry);
        }
        trim_most_frequent(&mut matched, max_expansion, limit);
        self.build_expansion(matched, combiner, factor)
    }

    /// Expands an edit-distance query against the term dictionary.
    #[allow(clippy::too_many_arguments)]
    fn expand_edit_distance(
        &mut self,
        pattern: &str,
        threshold: u32,
        fixed_prefix_len: u32,
        max_expansion: u32,
        limit: ExpansionLimit,
        combiner: ExpansionCombiner,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        let prefix: String = pattern.chars().take(fixed_prefix_len as usize).collect();
        let builder = LevenshteinAutomatonBuilder::new(threshold.min(255) as u8, true);
        let dfa = builder.build_dfa(pattern);
        let mut matched = Vec::new();
        for entry in self.db.open_allterms(&prefix)? {
            if !term_within_distance(&dfa, &entry.term) {
                continue;
            }
            if max_expansion > 0
                && matched.len() as u32 == max_expansion
                && limit != ExpansionLimit::MostFrequent
            {
                match limit {
                    ExpansionLimit::Error => {
                        return Err(MatchError::Wildcard(format!(
                            "edit distance {pattern}~{threshold} expands to more than \
                             {max_expansion} terms"
                        )));
                    }
                    ExpansionLimit::First => break,
                    ExpansionLimit::MostFrequent => unreachable!(),
                }
            }
            matched.push(entry);
        }
        trim_most_frequent(&mut matched, max_expansion, limit);
        self.build_expansion(matched, combiner, factor)
    }

    /// Combines expansion terms under the configured combiner.
    fn build_expansion(
        &mut self,
        entries: Vec<AllTermsEntry>,
        combiner: ExpansionCombiner,
        factor: f64,
    ) -> Result<Box<dyn PostList>, MatchError> {
        if entries.is_empty() {
            return Ok(Box::new(EmptyPostList));
        }
        match combiner {
            ExpansionCombiner::Or => {
                let pls = entries
                    .iter()
                    .map(|entry| self.expansion_postlist(entry, factor))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.or_tree(pls, factor))
            }
            ExpansionCombiner::Max => {
                let mut pls = entries
                    .iter()
                    .map(|entry| self.expansion_postlist(entry, factor))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match pls.len() {
                    1 => pls.pop().unwrap(),
                    _ => Box::new(MaxPostList::new(pls, self.db_size, self.recalc.clone())),
                })
            }
            ExpansionCombiner::Synonym => {
                let pls = entries
                    .iter()
                    .map(|entry| self.expansion_postlist(entry, 0.0))
                    .collect::<Result<Vec<_>, _>>()?;
                let or_pl = self.or_tree(pls, 0.0);
                if factor == 0.0 {
                    return Ok(or_pl);
                }
                // Distinct dictionary terms index disjoint wdf.
                Ok(self.wrap_synonym(or_pl, factor, true))
            }
        }
    }
}

/// Selection key for elite-set pruning.
///
/// Forced through an `f64` total order so the partial sort can't see an
/// inconsistent comparison, whatever intermediate precision the weights
/// were computed with.
fn elite_key(pl: &dyn PostList) -> f64 {
    if pl.termfreq_max() == 0 {
        // A provably empty postlist never deserves a slot.
        f64::NEG_INFINITY
    } else {
        pl.maxweight()
    }
}

/// Keeps the `max_expansion` most frequent entries when the limit policy
/// asks for that.
fn trim_most_frequent(
    matched: &mut Vec<AllTermsEntry>,
    max_expansion: u32,
    limit: ExpansionLimit,
) {
    if limit == ExpansionLimit::MostFrequent
        && max_expansion > 0
        && matched.len() as u32 > max_expansion
    {
        let keep = max_expansion as usize;
        matched.select_nth_unstable_by(keep - 1, |a, b| b.termfreq.cmp(&a.termfreq));
        matched.truncate(keep);
    }
}

/// Whether synonym subqueries provably index disjoint wdf.
fn terms_are_disjoint(children: &[Query]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    for child in children {
        match child {
            Query::Term { term, .. } => {
                if !seen.insert(term.as_str()) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

/// Runs a term through a Levenshtein DFA.
fn term_within_distance(dfa: &DFA, term: &str) -> bool {
    let mut state = dfa.initial_state();
    for byte in term.bytes() {
        state = dfa.transition(state, byte);
        if state == SINK_STATE {
            return false;
        }
    }
    matches!(dfa.distance(state), Distance::Exact(_))
}
