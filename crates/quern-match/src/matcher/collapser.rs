//! Collapsing of results sharing a key.

use std::collections::HashMap;

use quern_weight::{DocCount, DocId, ValueSlot};

use crate::matcher::msetcmp::MSetCmp;
use crate::mset::MSetItem;

/// What the match loop should do with a collapsed candidate.
pub(crate) enum CollapseDecision {
    /// The candidate goes into the proto-mset normally.
    Add,
    /// The candidate displaces a previously kept item with the same key;
    /// if that item is still in the proto-mset it must be replaced.
    Replace {
        /// Docid of the displaced item.
        old_did: DocId,
    },
    /// The candidate is dropped.
    Reject,
}

/// State kept per collapse key.
#[derive(Default)]
struct Bucket {
    /// The best-ranked items seen with this key, at most `collapse_max`.
    kept: Vec<MSetItem>,
    /// The best weight among dropped duplicates, used to decide whether
    /// reporting the collapse count is meaningful under a percent cutoff.
    next_best_weight: f64,
}

/// Tracks collapse keys and decides which duplicates survive.
pub(crate) struct Collapser {
    /// Slot supplying collapse keys.
    slot: ValueSlot,
    /// Maximum number of kept items per key.
    collapse_max: DocCount,
    /// Per-key state.
    table: HashMap<String, Bucket>,
    /// Number of candidates that shared an already-full key.
    pub(crate) duplicates_found: DocCount,
    /// Number of candidates processed.
    pub(crate) documents_considered: DocCount,
    /// Number of candidates with an empty collapse value.
    pub(crate) null_count: DocCount,
}

impl Collapser {
    /// Creates a collapser for `slot`.
    pub(crate) fn new(slot: ValueSlot, collapse_max: DocCount) -> Self {
        Self {
            slot,
            collapse_max: collapse_max.max(1),
            table: HashMap::new(),
            duplicates_found: 0,
            documents_considered: 0,
            null_count: 0,
        }
    }

    /// The slot collapse keys come from.
    pub(crate) fn slot(&self) -> ValueSlot {
        self.slot
    }

    /// Processes a candidate; `item.collapse_key` must already be set.
    pub(crate) fn process(&mut self, item: &mut MSetItem, cmp: &MSetCmp) -> CollapseDecision {
        self.documents_considered += 1;
        let key = match item.collapse_key.as_deref() {
            None | Some("") => {
                // Empty keys never collapse.
                self.null_count += 1;
                return CollapseDecision::Add;
            }
            Some(key) => key.to_string(),
        };
        let bucket = self.table.entry(key).or_default();
        if (bucket.kept.len() as DocCount) < self.collapse_max {
            bucket.kept.push(item.clone());
            return CollapseDecision::Add;
        }
        self.duplicates_found += 1;
        let worst = bucket
            .kept
            .iter()
            .enumerate()
            .reduce(|a, b| if cmp.better(a.1, b.1) { b } else { a })
            .map(|(idx, _)| idx)
            .unwrap();
        if cmp.better(item, &bucket.kept[worst]) {
            // The newcomer displaces the worst kept item, inheriting its
            // dropped-duplicate count.
            let old = &bucket.kept[worst];
            item.collapse_count = old.collapse_count + 1;
            if old.weight > bucket.next_best_weight {
                bucket.next_best_weight = old.weight;
            }
            let old_did = old.did;
            bucket.kept[worst] = item.clone();
            CollapseDecision::Replace { old_did }
        } else {
            bucket.kept[worst].collapse_count += 1;
            if item.weight > bucket.next_best_weight {
                bucket.next_best_weight = item.weight;
            }
            CollapseDecision::Reject
        }
    }

    /// The number of distinct non-empty keys seen.
    pub(crate) fn kept_items(&self) -> DocCount {
        self.table
            .values()
            .map(|bucket| bucket.kept.len() as DocCount)
            .sum()
    }

    /// Writes the final collapse counts back into the returned items.
    ///
    /// Counts accumulated in the buckets while the proto-mset held stale
    /// copies; with a percent cutoff, counts whose dropped documents
    /// would not have qualified are zeroed.
    pub(crate) fn finalise(&self, items: &mut [MSetItem], min_weight_for_count: f64) {
        for item in items {
            let Some(key) = item.collapse_key.as_deref() else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            let Some(bucket) = self.table.get(key) else {
                continue;
            };
            if let Some(kept) = bucket.kept.iter().find(|kept| kept.did == item.did) {
                item.collapse_count = if bucket.next_best_weight < min_weight_for_count {
                    0
                } else {
                    kept.collapse_count
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DocidOrder, SortBy};

    fn keyed(weight: f64, did: DocId, key: &str) -> MSetItem {
        let mut item = MSetItem::new(weight, did);
        item.collapse_key = Some(key.to_string());
        item
    }

    #[test]
    fn keeps_best_item_per_key() {
        let cmp = MSetCmp::new(SortBy::Rel, DocidOrder::Asc, true);
        let mut collapser = Collapser::new(0, 1);

        let mut first = keyed(5.0, 1, "a");
        assert!(matches!(
            collapser.process(&mut first, &cmp),
            CollapseDecision::Add
        ));

        // A worse duplicate is rejected and counted.
        let mut second = keyed(4.0, 2, "a");
        assert!(matches!(
            collapser.process(&mut second, &cmp),
            CollapseDecision::Reject
        ));

        // A better duplicate displaces the kept one.
        let mut third = keyed(6.0, 3, "a");
        match collapser.process(&mut third, &cmp) {
            CollapseDecision::Replace { old_did } => assert_eq!(old_did, 1),
            _ => panic!("expected replace"),
        }
        assert_eq!(third.collapse_count, 2);
        assert_eq!(collapser.duplicates_found, 2);

        let mut items = [third.clone()];
        collapser.finalise(&mut items, 0.0);
        assert_eq!(items[0].collapse_count, 2);
    }

    #[test]
    fn empty_keys_do_not_collapse() {
        let cmp = MSetCmp::new(SortBy::Rel, DocidOrder::Asc, true);
        let mut collapser = Collapser::new(0, 1);
        for did in 1..=3 {
            let mut item = MSetItem::new(1.0, did);
            item.collapse_key = Some(String::new());
            assert!(matches!(
                collapser.process(&mut item, &cmp),
                CollapseDecision::Add
            ));
        }
        assert_eq!(collapser.null_count, 3);
        assert_eq!(collapser.duplicates_found, 0);
    }
}
