//! Value range postlists.

use std::sync::Arc;

use quern_weight::{DocCount, DocId, Stats, TermCount, TermFreqs, ValueSlot};

use crate::backend::{Database, ValueList};
use crate::postlist::{Advanced, DocStats, PostList};
use crate::MatchError;

/// Matches documents whose value in a slot falls in `[begin, end]`.
///
/// Covers the `>=`-only form with `end = None` and the `<=`-only form
/// with an empty `begin`. Always boolean. Documents missing from the
/// shard mid-traversal are treated as non-matches rather than errors.
pub(crate) struct ValueRangePostList {
    /// The shard, for bounds and frequency estimates.
    db: Arc<dyn Database>,
    /// The slot being ranged over.
    slot: ValueSlot,
    /// Inclusive lower bound (empty for none).
    begin: String,
    /// Inclusive upper bound (`None` for unbounded).
    end: Option<String>,
    /// Cursor over the slot's values.
    values: Box<dyn ValueList>,
    /// Whether the cursor has been advanced at least once.
    started: bool,
}

impl ValueRangePostList {
    /// Opens a range postlist over `slot`.
    pub(crate) fn new(
        db: Arc<dyn Database>,
        slot: ValueSlot,
        begin: String,
        end: Option<String>,
    ) -> Result<Self, MatchError> {
        let values = db.open_value_list(slot)?;
        Ok(Self {
            db,
            slot,
            begin,
            end,
            values,
            started: false,
        })
    }

    /// Whether `value` falls inside the range.
    fn in_range(&self, value: &str) -> bool {
        value >= self.begin.as_str()
            && self.end.as_deref().is_none_or(|end| value <= end)
    }

    /// Advances the cursor until it sits on an in-range value.
    fn settle(&mut self) -> Result<(), MatchError> {
        while !self.values.at_end() {
            if self.in_range(self.values.value()) {
                return Ok(());
            }
            match self.values.next_value() {
                Ok(()) => {}
                Err(MatchError::DocNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl PostList for ValueRangePostList {
    fn termfreq_min(&self) -> DocCount {
        0
    }

    fn termfreq_max(&self) -> DocCount {
        self.db.value_freq(self.slot)
    }

    fn termfreq_est(&self) -> DocCount {
        // Assume the values are spread evenly between the slot's bounds.
        let lo = self.db.value_lower_bound(self.slot);
        let hi = self.db.value_upper_bound(self.slot);
        if lo.is_empty() && hi.is_empty() {
            return 0;
        }
        let mut prefix = 0;
        let lo_bytes = lo.as_bytes();
        let hi_bytes = hi.as_bytes();
        while prefix < lo_bytes.len()
            && prefix < hi_bytes.len()
            && lo_bytes[prefix] == hi_bytes[prefix]
        {
            prefix += 1;
        }
        let low = string_frac(&lo, prefix);
        let high = string_frac(&hi, prefix);
        let mut from = low;
        if self.begin.as_str() > lo.as_str() {
            from = string_frac(&self.begin, prefix);
        }
        let mut to = high;
        if let Some(end) = &self.end {
            if end.as_str() < hi.as_str() {
                to = string_frac(end, prefix);
            }
        }
        if high <= low {
            return self.db.value_freq(self.slot);
        }
        let est = (to - from) / (high - low) * f64::from(self.db.value_freq(self.slot));
        (est + 0.5).max(0.0) as DocCount
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        TermFreqs::new(
            stats.collection_size / 2,
            stats.rset_size / 2,
            stats.total_term_count / 2,
        )
    }

    fn maxweight(&self) -> f64 {
        0.0
    }

    fn recalc_maxweight(&mut self) -> f64 {
        0.0
    }

    fn docid(&self) -> DocId {
        self.values.docid()
    }

    fn weight(&self, _doc: &DocStats) -> f64 {
        0.0
    }

    fn wdf(&self) -> TermCount {
        0
    }

    fn next(&mut self, _w_min: f64) -> Result<Advanced, MatchError> {
        self.started = true;
        match self.values.next_value() {
            Ok(()) => {}
            Err(MatchError::DocNotFound(_)) => {}
            Err(err) => return Err(err),
        }
        self.settle()?;
        Ok(None)
    }

    fn skip_to(&mut self, did: DocId, _w_min: f64) -> Result<Advanced, MatchError> {
        self.started = true;
        self.values.skip_to(did)?;
        self.settle()?;
        Ok(None)
    }

    fn at_end(&self) -> bool {
        self.started && self.values.at_end()
    }
}

/// Interprets the bytes of `s` after `prefix` as a base-256 fraction.
fn string_frac(s: &str, prefix: usize) -> f64 {
    let mut result = 0.0;
    let mut scale = 1.0;
    for &byte in s.as_bytes().iter().skip(prefix) {
        scale /= 256.0;
        result += f64::from(byte) * scale;
    }
    result
}
