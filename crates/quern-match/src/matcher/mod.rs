//! The multi-shard match orchestrator and its top-k selection loop.

mod collapser;
mod msetcmp;
mod postlisttree;

use std::sync::Arc;
use std::time::Instant;

use quern_query::Query;
use quern_weight::{DocCount, DocId, Stats, Weight};

use crate::backend::{Database, Document};
use crate::matcher::collapser::{CollapseDecision, Collapser};
use crate::matcher::msetcmp::{MSetCmp, make_heap, pop_heap, push_heap};
use crate::matcher::postlisttree::PostListTree;
use crate::mset::{MSet, MSetItem, TermInfoMap};
use crate::options::{DocidOrder, MatchOptions, SortBy};
use crate::postlist::{EmptyPostList, PostList, RecalcHint, SourceRegistry};
use crate::rset::RSet;
use crate::submatch::{MatchSpec, Shard, SubMatch};
use crate::MatchError;

/// Callback invoked instead of aborting when a shard fails mid-match.
pub type ErrorHandler<'a> = dyn FnMut(&MatchError) + 'a;

/// Runs one match over a set of shards and assembles the result set.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_match(
    shards: &[Box<dyn Shard>],
    query: &Query,
    rset: &RSet,
    weight: &dyn Weight,
    options: &mut MatchOptions,
    sources: &SourceRegistry,
    mut error_handler: Option<&mut ErrorHandler<'_>>,
    preset_stats: Option<Arc<Stats>>,
    first: DocCount,
    maxitems: DocCount,
    check_at_least: DocCount,
) -> Result<MSet, MatchError> {
    query.validate()?;
    let qlen = query.qlen();
    let n_shards = shards.len();
    let shard_dbs: Vec<Arc<dyn Database>> = shards.iter().map(|s| s.database()).collect();
    let is_remote: Vec<bool> = shards.iter().map(|s| s.is_remote()).collect();
    let subrsets = rset.split_by_shard(n_shards);

    // Create the per-shard façades; a failing shard is dropped when an
    // error handler is installed.
    let mut subs: Vec<Option<Box<dyn SubMatch>>> = Vec::with_capacity(n_shards);
    for (shard, shard_rset) in shards.iter().zip(subrsets) {
        let spec = MatchSpec {
            query,
            qlen,
            rset: shard_rset,
            weight,
            options,
            sources,
        };
        match shard.submatch(spec) {
            Ok(sub) => subs.push(Some(sub)),
            Err(err) => {
                handle_or_raise(&mut error_handler, err)?;
                subs.push(None);
            }
        }
    }

    // Statistics phase: one non-blocking wave, then blocking passes.
    // A match server already holds the collated statistics and skips the
    // phase entirely.
    let stats = match preset_stats {
        Some(stats) => stats,
        None => {
            let mut stats = Stats::new();
            prepare_sub_matches(&mut subs, &mut error_handler, &mut stats)?;
            Arc::new(stats)
        }
    };

    let check_at_least = check_at_least.max(maxitems);
    let matcher = MultiMatch {
        subs,
        shard_dbs,
        is_remote,
        options,
        error_handler,
        stats,
        need_doclength: weight.needs_doclength(),
    };
    matcher.get_mset(first, maxitems, check_at_least)
}

/// Reports `err` to the handler, or propagates it when none is set.
fn handle_or_raise(
    handler: &mut Option<&mut ErrorHandler<'_>>,
    err: MatchError,
) -> Result<(), MatchError> {
    match handler.as_deref_mut() {
        Some(handler) => {
            handler(&err);
            Ok(())
        }
        None => Err(err),
    }
}

/// Runs the preparation waves over the submatches.
///
/// The first pass is non-blocking so local shards aren't held up behind
/// remote ones; submatches which weren't ready get blocking calls on the
/// later passes.
fn prepare_sub_matches(
    subs: &mut [Option<Box<dyn SubMatch>>],
    error_handler: &mut Option<&mut ErrorHandler<'_>>,
    stats: &mut Stats,
) -> Result<(), MatchError> {
    let mut prepared: Vec<bool> = subs.iter().map(Option::is_none).collect();
    let mut unprepared = prepared.iter().filter(|done| !**done).count();
    let mut nowait = true;
    while unprepared > 0 {
        for (sub, done) in subs.iter_mut().zip(prepared.iter_mut()) {
            if *done {
                continue;
            }
            let outcome = sub
                .as_mut()
                .map_or(Ok(true), |sub| sub.prepare_match(nowait, stats));
            match outcome {
                Ok(true) => {
                    *done = true;
                    unprepared -= 1;
                }
                Ok(false) => {}
                Err(err) => {
                    handle_or_raise(error_handler, err)?;
                    // Continue the match without this shard.
                    *sub = None;
                    *done = true;
                    unprepared -= 1;
                }
            }
        }
        // Block on later passes so we don't spin.
        nowait = false;
    }
    Ok(())
}

/// State shared by the match phase.
struct MultiMatch<'a, 'h> {
    /// Per-shard façades; `None` for dropped shards.
    subs: Vec<Option<Box<dyn SubMatch>>>,
    /// Per-shard databases.
    shard_dbs: Vec<Arc<dyn Database>>,
    /// Which shards evaluate remotely.
    is_remote: Vec<bool>,
    /// The match options.
    options: &'a mut MatchOptions,
    /// Optional per-shard failure handler.
    error_handler: Option<&'a mut ErrorHandler<'h>>,
    /// Collated collection statistics.
    stats: Arc<Stats>,
    /// Whether the weighting scheme reads document lengths.
    need_doclength: bool,
}

impl MultiMatch<'_, '_> {
    /// Runs the match phase and assembles the MSet.
    fn get_mset(
        mut self,
        first: DocCount,
        maxitems: DocCount,
        check_at_least: DocCount,
    ) -> Result<MSet, MatchError> {
        let n_shards = self.subs.len();

        // A lone remote shard already evaluated everything; just fetch
        // its result set.
        if n_shards == 1 && self.is_remote[0] && self.subs[0].is_some() {
            if let Some(sub) = self.subs[0].as_mut() {
                sub.start_match(first, maxitems, check_at_least, &self.stats)?;
                let mset = sub.remote_mset()?;
                return Ok(mset.with_shards(self.shard_dbs.clone()));
            }
        }

        // Start the match on every shard.
        for sub in &mut self.subs {
            let Some(active) = sub.as_mut() else { continue };
            if let Err(err) = active.start_match(
                0,
                first + maxitems,
                first + check_at_least,
                &self.stats,
            ) {
                handle_or_raise(&mut self.error_handler, err)?;
                *sub = None;
            }
        }

        // Build the per-shard postlists. Only the first shard fills in
        // the term info. Matches a remote shard knows about but won't
        // send are tracked so the bounds stay honest.
        let recalc = RecalcHint::new();
        let mut term_info = TermInfoMap::new();
        let mut term_info_filled = false;
        let mut definite_matches_not_seen: DocCount = 0;
        let mut shard_pls: Vec<Option<Box<dyn PostList>>> = Vec::with_capacity(n_shards);
        for index in 0..n_shards {
            let Some(sub) = self.subs[index].as_mut() else {
                shard_pls.push(None);
                continue;
            };
            let wanted = if term_info_filled {
                None
            } else {
                Some(&mut term_info)
            };
            match sub.get_postlist(wanted, &recalc) {
                Ok(pl) => {
                    term_info_filled = term_info_filled || !term_info.is_empty();
                    if self.is_remote[index] {
                        let seen_limit = first + maxitems;
                        if pl.termfreq_min() > seen_limit {
                            definite_matches_not_seen += pl.termfreq_min() - seen_limit;
                        }
                    }
                    shard_pls.push(Some(pl));
                }
                Err(err) => {
                    handle_or_raise(&mut self.error_handler, err)?;
                    self.subs[index] = None;
                    shard_pls.push(Some(Box::new(EmptyPostList)));
                }
            }
        }

        let mut tree = PostListTree::new(
            shard_pls,
            self.shard_dbs.clone(),
            recalc,
            self.need_doclength,
        );

        let max_possible = tree.recalc_maxweight();
        let mut matches_upper_bound = tree.termfreq_max();
        let mut matches_lower_bound = 0;
        let mut matches_estimated = tree.termfreq_est();
        if self.options.decider.is_none() && self.options.spies.is_empty() {
            // With a decider every hit might be discarded, so only
            // without one does the postlist minimum hold.
            matches_lower_bound = tree.termfreq_min();
        }

        let mcmp = MSetCmp::new(
            self.options.sort_by,
            self.options.docid_order,
            self.options.sort_value_forward,
        );

        // Maybe the caller only wanted the maxweight.
        if check_at_least == 0 {
            if self.options.collapse_key.is_some() {
                matches_lower_bound = matches_lower_bound.min(1);
            }
            let mset = MSet {
                first,
                items: Vec::new(),
                matches_lower_bound,
                matches_estimated,
                matches_upper_bound,
                max_possible,
                max_attained: 0.0,
                percent_factor: 0.0,
                termfreqandwts: term_info,
                ..MSet::default()
            };
            return Ok(mset.with_shards(self.shard_dbs.clone()));
        }

        let max_msize = (first + maxitems) as usize;
        let mut items: Vec<MSetItem> = Vec::with_capacity(max_msize + 1);
        let mut is_heap = false;
        let mut min_item = MSetItem::new(0.0, 0);
        let mut min_weight = self.options.weight_cutoff;
        let percent_cutoff_on = self.options.percent_cutoff > 0;
        // The epsilon mirrors the correction for platforms computing
        // weights with excess precision.
        let percent_cutoff_factor = f64::from(self.options.percent_cutoff) / 100.0 - f64::EPSILON;
        let mut greatest_wt = 0.0f64;
        let mut greatest_wt_shard: Option<usize> = None;
        let mut docs_matched: DocCount = 0;
        let mut check_at_least = first + check_at_least;
        let mut collapser = self
            .options
            .collapse_key
            .map(|slot| Collapser::new(slot, self.options.collapse_max));
        let mut decider_considered: DocCount = 0;
        let mut decider_denied: DocCount = 0;
        let deadline = self.options.time_limit.map(|limit| Instant::now() + limit);
        let sort_by = self.options.sort_by;
        let have_hooks = self.options.decider.is_some() || !self.options.spies.is_empty();

        loop {
            if tree.needs_recalc()
                && min_weight > 0.0
                && tree.recalc_maxweight() < min_weight
            {
                break;
            }
            if !tree.next(min_weight)? {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline && check_at_least > docs_matched {
                    // Soft deadline: stop hunting beyond what we've seen.
                    check_at_least = docs_matched;
                }
            }

            let did = tree.docid();
            let shard = tree.current_shard();
            let mut weight = 0.0;
            let mut calculated_weight = false;
            if sort_by != SortBy::Val || min_weight > 0.0 {
                weight = tree.weight()?;
                if weight < min_weight {
                    continue;
                }
                calculated_weight = true;
            }

            let mut new_item = MSetItem::new(weight, did);
            let mut doc: Option<Document> = None;

            if sort_by != SortBy::Rel {
                let document = self.open_shard_document(&mut doc, did)?;
                new_item.sort_key = Some(match &self.options.key_maker {
                    Some(maker) => maker.make_key(document),
                    None => {
                        let slot = self.options.sort_key.unwrap_or(0);
                        document.value(slot).to_string()
                    }
                });

                if !mcmp.better(&new_item, &min_item) {
                    if !have_hooks && collapser.is_none() {
                        // Can't make the result page, but it's still a
                        // match.
                        docs_matched += 1;
                        if !calculated_weight {
                            weight = tree.weight()?;
                        }
                        if weight > greatest_wt {
                            note_greatest_weight(
                                weight,
                                shard,
                                &mut greatest_wt,
                                &mut greatest_wt_shard,
                                percent_cutoff_on,
                                percent_cutoff_factor,
                                &mut min_weight,
                                &mut items,
                                &mut is_heap,
                                &mcmp,
                            );
                        }
                        continue;
                    }
                    if docs_matched >= check_at_least {
                        continue;
                    }
                }
            }

            // Give the decider and spies a look, unless the shard already
            // applied them remotely.
            if have_hooks && !self.is_remote[shard] {
                let document = self.open_shard_document(&mut doc, did)?;
                decider_considered += 1;
                if let Some(decider) = &self.options.decider {
                    if !decider.accept(document) {
                        decider_denied += 1;
                        continue;
                    }
                }
                if !calculated_weight {
                    weight = tree.weight()?;
                    new_item.weight = weight;
                    calculated_weight = true;
                }
                for spy in &mut self.options.spies {
                    spy.observe(document, weight);
                }
            }

            if !calculated_weight {
                weight = tree.weight()?;
                new_item.weight = weight;
            }

            let mut pushback = true;
            if let Some(collapser) = collapser.as_mut() {
                let slot = collapser.slot();
                let document = self.open_shard_document(&mut doc, did)?;
                new_item.collapse_key = Some(document.value(slot).to_string());
                match collapser.process(&mut new_item, &mcmp) {
                    CollapseDecision::Add => {}
                    CollapseDecision::Reject => {
                        // For relevance sorts the kept duplicate weighed
                        // at least as much, so the greatest weight can't
                        // change.
                        if matches!(sort_by, SortBy::Val | SortBy::ValRel)
                            && weight > greatest_wt
                        {
                            note_greatest_weight(
                                weight,
                                shard,
                                &mut greatest_wt,
                                &mut greatest_wt_shard,
                                percent_cutoff_on,
                                percent_cutoff_factor,
                                &mut min_weight,
                                &mut items,
                                &mut is_heap,
                                &mcmp,
                            );
                        }
                        continue;
                    }
                    CollapseDecision::Replace { old_did } => {
                        // The displaced item may still sit in the
                        // proto-mset; replace it in place if so.
                        if let Some(position) =
                            items.iter().position(|item| item.did == old_did)
                        {
                            items[position] = new_item.clone();
                            is_heap = false;
                            pushback = false;
                        }
                    }
                }
            }

            if pushback {
                docs_matched += 1;
                items.push(new_item);
                if items.len() > max_msize {
                    if !is_heap {
                        is_heap = true;
                        make_heap(&mut items, &mcmp);
                    } else {
                        push_heap(&mut items, &mcmp);
                    }
                    pop_heap(&mut items, &mcmp);
                    min_item = items[0].clone();
                    if matches!(sort_by, SortBy::Rel | SortBy::RelVal)
                        && docs_matched >= check_at_least
                        && min_item.weight > min_weight
                    {
                        min_weight = min_item.weight;
                    }
                    if tree.recalc_maxweight() < min_weight {
                        break;
                    }
                } else {
                    is_heap = false;
                    if sort_by == SortBy::Rel
                        && items.len() == max_msize
                        && docs_matched >= check_at_least
                        && max_possible == 0.0
                        && self.options.docid_order != DocidOrder::Desc
                        && self.subs.len() == 1
                    {
                        // A forward boolean match over one shard delivers
                        // in final order, so the page is complete.
                        break;
                    }
                }
            }

            if weight > greatest_wt {
                note_greatest_weight(
                    weight,
                    shard,
                    &mut greatest_wt,
                    &mut greatest_wt_shard,
                    percent_cutoff_on,
                    percent_cutoff_factor,
                    &mut min_weight,
                    &mut items,
                    &mut is_heap,
                    &mcmp,
                );
            }
        }

        // Work out the weight corresponding to 100%.
        let mut percent_scale = 0.0f64;
        if !items.is_empty() && greatest_wt > 0.0 {
            percent_scale = self.compute_percent_scale(
                &items,
                &term_info,
                greatest_wt,
                greatest_wt_shard,
                &mcmp,
            )?;
            if percent_cutoff_on && percent_scale > 0.0 {
                // Trim entries which fail the exact percentage test.
                let min_wt = percent_cutoff_factor / percent_scale;
                if !is_heap {
                    is_heap = true;
                    make_heap(&mut items, &mcmp);
                }
                while items.first().is_some_and(|item| item.weight < min_wt) {
                    pop_heap(&mut items, &mcmp);
                }
            }
            percent_scale *= 100.0;
        }

        // Matches a remote shard counted but never sent still count.
        docs_matched += definite_matches_not_seen;

        if items.len() < max_msize {
            // We didn't fill the page, so the page holds every match.
            matches_lower_bound = items.len() as DocCount;
            matches_estimated = matches_lower_bound;
            matches_upper_bound = matches_lower_bound;
        } else if collapser.is_none() && docs_matched < check_at_least {
            // We inspected past every match without filling the quota.
            matches_lower_bound = docs_matched;
            matches_estimated = docs_matched;
            matches_upper_bound = docs_matched;
        } else {
            matches_estimated = matches_estimated.clamp(
                matches_lower_bound.min(matches_upper_bound),
                matches_upper_bound,
            );

            // Scale factors accumulate and apply once, to round once.
            let mut estimate_scale = 1.0f64;

            if let Some(collapser) = &collapser {
                matches_lower_bound = collapser.null_count + collapser.kept_items();
                if collapser.documents_considered > 0 {
                    let unique =
                        f64::from(collapser.documents_considered - collapser.duplicates_found);
                    estimate_scale *= unique / f64::from(collapser.documents_considered);
                }
                matches_upper_bound =
                    matches_upper_bound.saturating_sub(collapser.duplicates_found);
            }

            if have_hooks {
                if collapser.is_none() && !percent_cutoff_on {
                    matches_lower_bound = matches_lower_bound.max(docs_matched);
                }
                if decider_considered > 0 {
                    let accepted = f64::from(decider_considered - decider_denied);
                    estimate_scale *= accepted / f64::from(decider_considered);
                }
                // A denied document can't also be a duplicate, so both
                // reductions are safe together.
                matches_upper_bound = matches_upper_bound.saturating_sub(decider_denied);
            }

            if percent_cutoff_on {
                estimate_scale *= 1.0 - percent_cutoff_factor;
                matches_lower_bound = items.len() as DocCount;
            }

            if estimate_scale != 1.0 {
                matches_estimated =
                    (f64::from(matches_estimated) * estimate_scale + 0.5) as DocCount;
                matches_estimated = matches_estimated.max(matches_lower_bound);
            }

            if collapser.is_some() || have_hooks {
                matches_upper_bound = matches_upper_bound.max(matches_lower_bound);
                matches_estimated =
                    matches_estimated.clamp(matches_lower_bound, matches_upper_bound);
            } else if !percent_cutoff_on {
                matches_lower_bound = matches_lower_bound.max(docs_matched);
                matches_estimated = matches_estimated.max(docs_matched);
            }
        }

        // Sort best-first, then drop the leading entries being paged
        // over.
        items.sort_by(|a, b| {
            if mcmp.better(a, b) {
                std::cmp::Ordering::Less
            } else if mcmp.better(b, a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        if first > 0 {
            let first = (first as usize).min(items.len());
            items.drain(..first);
        }

        // Collapse counts accumulated while the proto-mset held stale
        // copies; restore them now.
        if let Some(collapser) = &collapser {
            let min_wt_for_count = if percent_cutoff_on && percent_scale > 0.0 {
                percent_cutoff_factor / (percent_scale / 100.0)
            } else {
                f64::NEG_INFINITY
            };
            collapser.finalise(&mut items, min_wt_for_count);
        }

        let mset = MSet {
            first,
            items,
            matches_lower_bound,
            matches_estimated,
            matches_upper_bound,
            max_possible,
            max_attained: greatest_wt,
            percent_factor: percent_scale,
            termfreqandwts: term_info,
            ..MSet::default()
        };
        Ok(mset.with_shards(self.shard_dbs.clone()))
    }

    /// Opens (and caches) the document behind a global docid.
    fn open_shard_document<'doc>(
        &self,
        cache: &'doc mut Option<Document>,
        did: DocId,
    ) -> Result<&'doc Document, MatchError> {
        if cache.is_none() {
            let n_shards = self.shard_dbs.len() as u32;
            let shard = ((did - 1) % n_shards) as usize;
            let local = (did - 1) / n_shards + 1;
            *cache = Some(self.shard_dbs[shard].open_document(local, true)?);
        }
        Ok(cache.as_ref().expect("document was just cached"))
    }

    /// The percent-per-weight factor (before the ×100).
    fn compute_percent_scale(
        &mut self,
        items: &[MSetItem],
        term_info: &TermInfoMap,
        greatest_wt: f64,
        greatest_wt_shard: Option<usize>,
        mcmp: &MSetCmp,
    ) -> Result<f64, MatchError> {
        // If the best weight came from a remote shard, reuse the factor
        // it computed over its own postings.
        if let Some(shard) = greatest_wt_shard {
            if self.is_remote[shard] {
                if let Some(sub) = self.subs[shard].as_ref() {
                    if let Some(factor) = sub.percent_factor() {
                        return Ok(factor / 100.0);
                    }
                }
            }
        }

        if term_info.len() > 1 {
            // Total up the weights of the query terms the best document
            // actually contains.
            let best = items
                .iter()
                .reduce(|a, b| if mcmp.better(b, a) { b } else { a })
                .expect("caller checked items is non-empty");
            let n_shards = self.shard_dbs.len() as u32;
            let shard = ((best.did - 1) % n_shards) as usize;
            let local = (best.did - 1) / n_shards + 1;
            let mut matched_weight = 0.0f64;
            let mut matched_terms = 0usize;
            for entry in self.shard_dbs[shard].open_term_list(local)? {
                if let Some(info) = term_info.get(&entry.term) {
                    matched_weight += info.termweight;
                    matched_terms += 1;
                    if matched_terms == term_info.len() {
                        break;
                    }
                }
            }
            if matched_terms < term_info.len() {
                let mut denom: f64 = term_info.values().map(|info| info.termweight).sum();
                denom *= greatest_wt;
                if denom > 0.0 {
                    return Ok(matched_weight / denom);
                }
            }
        }
        // A single-term query's best document scores 100%.
        Ok(1.0 / greatest_wt)
    }
}

/// Notes a new greatest weight, raising the percentage cutoff floor and
/// pruning the proto-mset when that tightens things.
#[allow(clippy::too_many_arguments)]
fn note_greatest_weight(
    weight: f64,
    shard: usize,
    greatest_wt: &mut f64,
    greatest_wt_shard: &mut Option<usize>,
    percent_cutoff_on: bool,
    percent_cutoff_factor: f64,
    min_weight: &mut f64,
    items: &mut Vec<MSetItem>,
    is_heap: &mut bool,
    mcmp: &MSetCmp,
) {
    *greatest_wt = weight;
    *greatest_wt_shard = Some(shard);
    if !percent_cutoff_on {
        return;
    }
    let cutoff = weight * percent_cutoff_factor;
    if cutoff <= *min_weight {
        return;
    }
    *min_weight = cutoff;
    if !*is_heap {
        *is_heap = true;
        make_heap(items, mcmp);
    }
    while items.first().is_some_and(|item| item.weight < *min_weight) {
        pop_heap(items, mcmp);
    }
}
