//! Match result sets.

use std::collections::BTreeMap;
use std::sync::Arc;

use quern_weight::{DocCount, DocId};

use crate::backend::{Database, Document};
use crate::MatchError;

/// Term statistics recorded for the caller alongside the results.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TermFreqAndWeight {
    /// Number of documents in the collection containing the term.
    pub termfreq: DocCount,
    /// The term's maximum weight contribution.
    pub termweight: f64,
}

/// Map from query term to its collection statistics.
pub type TermInfoMap = BTreeMap<String, TermFreqAndWeight>;

/// One ranked match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MSetItem {
    /// The weight the document scored.
    pub weight: f64,
    /// Global document id.
    pub did: DocId,
    /// The collapse key the document carried, if collapsing was active.
    pub collapse_key: Option<String>,
    /// How many lower-or-equally-ranked documents sharing the collapse
    /// key were dropped.
    pub collapse_count: DocCount,
    /// The sort key, when sorting by value.
    pub sort_key: Option<String>,
}

impl MSetItem {
    /// Creates an item from its weight and docid.
    pub fn new(weight: f64, did: DocId) -> Self {
        Self {
            weight,
            did,
            ..Self::default()
        }
    }
}

/// The ranked, paginated result of a match.
///
/// Immutable once assembled. Bounds bracket the total number of matching
/// documents; `matches_estimated` always lies between them.
#[derive(Clone, Default)]
pub struct MSet {
    /// Rank of the first item (for paging).
    pub first: DocCount,
    /// The returned items, best first.
    pub items: Vec<MSetItem>,
    /// Lower bound on the number of matching documents.
    pub matches_lower_bound: DocCount,
    /// Estimate of the number of matching documents.
    pub matches_estimated: DocCount,
    /// Upper bound on the number of matching documents.
    pub matches_upper_bound: DocCount,
    /// The best weight any document could have scored.
    pub max_possible: f64,
    /// The best weight actually seen (over all candidates, not just the
    /// returned page).
    pub max_attained: f64,
    /// Multiplier converting weights to percentages.
    pub percent_factor: f64,
    /// Statistics for each term in the query.
    pub termfreqandwts: TermInfoMap,
    /// The shard databases, for deferred document fetches.
    pub(crate) shards: Vec<Arc<dyn Database>>,
}

impl std::fmt::Debug for MSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MSet")
            .field("first", &self.first)
            .field("items", &self.items)
            .field("matches_lower_bound", &self.matches_lower_bound)
            .field("matches_estimated", &self.matches_estimated)
            .field("matches_upper_bound", &self.matches_upper_bound)
            .field("max_possible", &self.max_possible)
            .field("max_attained", &self.max_attained)
            .finish_non_exhaustive()
    }
}

impl MSet {
    /// Attaches the shard handles used by [`fetch_document`].
    ///
    /// [`fetch_document`]: Self::fetch_document
    pub(crate) fn with_shards(mut self, shards: Vec<Arc<dyn Database>>) -> Self {
        self.shards = shards;
        self
    }

    /// The number of items returned.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no items were returned.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Converts a weight to a percentage of the best possible match.
    pub fn convert_to_percent(&self, weight: f64) -> i32 {
        if self.percent_factor <= 0.0 {
            return 100;
        }
        let percent = weight * self.percent_factor;
        // Nonzero weights round up so a match never shows as 0%.
        if percent > 100.0 {
            100
        } else if percent < 0.0 {
            0
        } else {
            let rounded = percent as i32;
            if rounded == 0 && weight > 0.0 {
                1
            } else {
                rounded
            }
        }
    }

    /// Hints that the documents for a range of items will be fetched.
    ///
    /// Remote shards can pipeline the requests.
    pub fn fetch(&self, range: std::ops::Range<usize>) {
        for item in self.items.get(range.clone()).unwrap_or(&[]) {
            if let Some((shard, local)) = self.locate(item.did) {
                shard.request_document(local);
            }
        }
    }

    /// Fetches the stored document for the item at `index`.
    pub fn fetch_document(&self, index: usize) -> Result<Document, MatchError> {
        let item = self.items.get(index).ok_or_else(|| {
            MatchError::InvalidOperation(format!("item {index} is out of range"))
        })?;
        let (shard, local) = self.locate(item.did).ok_or_else(|| {
            MatchError::InvalidOperation("match set has no shard handles".to_string())
        })?;
        shard.collect_document(local)
    }

    /// Maps a global docid onto its shard and local docid.
    fn locate(&self, did: DocId) -> Option<(&Arc<dyn Database>, DocId)> {
        if self.shards.is_empty() || did == 0 {
            return None;
        }
        let n_shards = self.shards.len() as u32;
        let shard = ((did - 1) % n_shards) as usize;
        let local = (did - 1) / n_shards + 1;
        Some((&self.shards[shard], local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_conversion_rounds_up_small_weights() {
        let mset = MSet {
            percent_factor: 100.0 / 8.0,
            ..MSet::default()
        };
        assert_eq!(mset.convert_to_percent(8.0), 100);
        assert_eq!(mset.convert_to_percent(4.0), 50);
        assert_eq!(mset.convert_to_percent(0.001), 1);
        assert_eq!(mset.convert_to_percent(0.0), 0);
    }
}
