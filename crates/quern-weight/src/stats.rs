//! Collection-wide statistics accumulated across shards.

use std::collections::BTreeMap;

use crate::{DocCount, TermCount, ValueSlot};

/// Frequency estimates for a postlist acting as a virtual term.
///
/// Operator postlists report these so a weighting scheme can score a
/// synonym, max or wildcard expansion as if it were a single term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermFreqs {
    /// Estimated number of documents matched.
    pub termfreq: DocCount,
    /// Estimated number of relevant documents matched.
    pub reltermfreq: DocCount,
    /// Estimated total occurrences across the collection.
    pub collfreq: u64,
}

impl TermFreqs {
    /// Creates a triple from its components.
    pub fn new(termfreq: DocCount, reltermfreq: DocCount, collfreq: u64) -> Self {
        Self {
            termfreq,
            reltermfreq,
            collfreq,
        }
    }
}

/// Per-term statistics tracked for every term appearing in a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermStats {
    /// Number of documents indexed by the term.
    pub termfreq: DocCount,
    /// Total occurrences of the term across the collection.
    pub collfreq: u64,
    /// Number of relevant documents indexed by the term.
    pub reltermfreq: DocCount,
    /// Highest wdf of the term in any single document.
    pub wdf_upper_bound: TermCount,
}

/// Bounds and population of a document value slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStats {
    /// Smallest value stored in the slot.
    pub lower_bound: String,
    /// Largest value stored in the slot.
    pub upper_bound: String,
    /// Number of documents with a value in the slot.
    pub freq: DocCount,
}

/// Statistics for the collection a match runs over.
///
/// One `Stats` exists per match. Shards contribute during the preparation
/// phase; once the match phase starts the object is read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Total number of documents across participating shards.
    pub collection_size: DocCount,
    /// Number of documents marked relevant.
    pub rset_size: DocCount,
    /// Average document length in terms.
    pub average_length: f64,
    /// Total length of all documents in terms (0 if unknown).
    pub total_length: u64,
    /// Sum over all terms of their collection frequency.
    pub total_term_count: u64,
    /// Smallest document length in any shard.
    pub doclength_lower_bound: TermCount,
    /// Largest document length in any shard.
    pub doclength_upper_bound: TermCount,
    /// Per-term statistics for every term in the query.
    termstats: BTreeMap<String, TermStats>,
    /// Per-slot value bounds for slots the query ranges over.
    value_stats: BTreeMap<ValueSlot, ValueStats>,
}

impl Stats {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one shard's core counters into the totals.
    ///
    /// `average_length` becomes the document-weighted mean of the shards
    /// combined so far, which copes with empty shards contributing zero
    /// documents.
    pub fn add_collection(
        &mut self,
        doccount: DocCount,
        average_length: f64,
        total_length: u64,
        doclength_bounds: (TermCount, TermCount),
    ) {
        let new_size = self.collection_size + doccount;
        if new_size != 0 {
            self.average_length = (self.average_length * f64::from(self.collection_size)
                + average_length * f64::from(doccount))
                / f64::from(new_size);
        }
        self.collection_size = new_size;
        self.total_length += total_length;
        let (lower, upper) = doclength_bounds;
        if doccount > 0 {
            if self.doclength_lower_bound == 0 || lower < self.doclength_lower_bound {
                self.doclength_lower_bound = lower;
            }
            self.doclength_upper_bound = self.doclength_upper_bound.max(upper);
        }
    }

    /// Adds one shard's total term occurrence count.
    pub fn add_total_term_count(&mut self, count: u64) {
        self.total_term_count += count;
    }

    /// Adds one shard's frequencies for a term.
    ///
    /// Frequencies accumulate; the wdf bound takes the maximum across
    /// shards.
    pub fn add_termfreq(
        &mut self,
        term: &str,
        termfreq: DocCount,
        collfreq: u64,
        wdf_upper_bound: TermCount,
    ) {
        let entry = self.termstats.entry(term.to_string()).or_default();
        entry.termfreq += termfreq;
        entry.collfreq += collfreq;
        entry.wdf_upper_bound = entry.wdf_upper_bound.max(wdf_upper_bound);
    }

    /// Adds one shard's relevant-document count for a term.
    pub fn add_reltermfreq(&mut self, term: &str, reltermfreq: DocCount) {
        let entry = self.termstats.entry(term.to_string()).or_default();
        entry.reltermfreq += reltermfreq;
    }

    /// Adds the size of one shard's relevance set.
    pub fn add_rset_size(&mut self, rset_size: DocCount) {
        self.rset_size += rset_size;
    }

    /// Merges one shard's bounds for a value slot.
    pub fn add_value_stats(&mut self, slot: ValueSlot, stats: &ValueStats) {
        if stats.freq == 0 {
            return;
        }
        let entry = self.value_stats.entry(slot).or_default();
        if entry.freq == 0 || stats.lower_bound < entry.lower_bound {
            entry.lower_bound = stats.lower_bound.clone();
        }
        if stats.upper_bound > entry.upper_bound {
            entry.upper_bound = stats.upper_bound.clone();
        }
        entry.freq += stats.freq;
    }

    /// Merges another `Stats` wholesale (used when collating remote shards).
    pub fn add_stats(&mut self, other: &Self) {
        self.add_collection(
            other.collection_size,
            other.average_length,
            other.total_length,
            (other.doclength_lower_bound, other.doclength_upper_bound),
        );
        self.total_term_count += other.total_term_count;
        self.rset_size += other.rset_size;
        for (term, stats) in &other.termstats {
            self.add_termfreq(term, stats.termfreq, stats.collfreq, stats.wdf_upper_bound);
            self.add_reltermfreq(term, stats.reltermfreq);
        }
        for (slot, stats) in &other.value_stats {
            self.add_value_stats(*slot, stats);
        }
    }

    /// The term statistics entry for `term`, if the term was registered.
    pub fn term_stats(&self, term: &str) -> Option<&TermStats> {
        self.termstats.get(term)
    }

    /// The number of documents indexed by `term` (0 for the empty term).
    pub fn termfreq(&self, term: &str) -> DocCount {
        self.termstats.get(term).map_or(0, |t| t.termfreq)
    }

    /// The number of relevant documents indexed by `term`.
    pub fn reltermfreq(&self, term: &str) -> DocCount {
        self.termstats.get(term).map_or(0, |t| t.reltermfreq)
    }

    /// The collection frequency of `term`.
    pub fn collfreq(&self, term: &str) -> u64 {
        self.termstats.get(term).map_or(0, |t| t.collfreq)
    }

    /// Iterates all registered term statistics.
    pub fn termstats_iter(&self) -> impl Iterator<Item = (&str, &TermStats)> {
        self.termstats.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The merged bounds for a value slot, if any shard reported them.
    pub fn value_stats(&self, slot: ValueSlot) -> Option<&ValueStats> {
        self.value_stats.get(&slot)
    }

    /// Iterates all registered value slot statistics.
    pub fn value_stats_iter(&self) -> impl Iterator<Item = (ValueSlot, &ValueStats)> {
        self.value_stats.iter().map(|(k, v)| (*k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_length_is_weighted_mean() {
        let mut stats = Stats::new();
        stats.add_collection(2, 10.0, 20, (8, 12));
        stats.add_collection(0, 0.0, 0, (0, 0));
        stats.add_collection(6, 2.0, 12, (1, 4));

        assert_eq!(stats.collection_size, 8);
        let expected = (2.0 * 10.0 + 6.0 * 2.0) / 8.0;
        assert!((stats.average_length - expected).abs() < 1e-12);
        assert_eq!(stats.doclength_lower_bound, 1);
        assert_eq!(stats.doclength_upper_bound, 12);
        assert_eq!(stats.total_length, 32);
    }

    #[test]
    fn termfreqs_accumulate_across_shards() {
        let mut stats = Stats::new();
        stats.add_termfreq("mango", 3, 7, 4);
        stats.add_termfreq("mango", 2, 2, 6);
        stats.add_reltermfreq("mango", 1);

        let entry = stats.term_stats("mango").unwrap();
        assert_eq!(entry.termfreq, 5);
        assert_eq!(entry.collfreq, 9);
        assert_eq!(entry.wdf_upper_bound, 6);
        assert_eq!(entry.reltermfreq, 1);
        assert_eq!(stats.termfreq("missing"), 0);
    }

    #[test]
    fn value_bounds_merge() {
        let mut stats = Stats::new();
        stats.add_value_stats(
            0,
            &ValueStats {
                lower_bound: "b".into(),
                upper_bound: "m".into(),
                freq: 4,
            },
        );
        stats.add_value_stats(
            0,
            &ValueStats {
                lower_bound: "a".into(),
                upper_bound: "k".into(),
                freq: 2,
            },
        );
        let merged = stats.value_stats(0).unwrap();
        assert_eq!(merged.lower_bound, "a");
        assert_eq!(merged.upper_bound, "m");
        assert_eq!(merged.freq, 6);
    }
}
