//! Per-match configuration.

use std::time::Duration;

use quern_weight::{DocCount, ValueSlot};

use crate::backend::Document;

/// Secondary ordering of equal-ranked documents by docid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocidOrder {
    /// Ascending docid breaks ties.
    #[default]
    Asc,
    /// Descending docid breaks ties.
    Desc,
    /// Whichever direction is cheaper.
    DontCare,
}

/// Primary result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// By relevance weight.
    #[default]
    Rel,
    /// By sort key only.
    Val,
    /// By relevance, then sort key.
    RelVal,
    /// By sort key, then relevance.
    ValRel,
}

/// A user hook deciding whether a document may appear in the results.
pub trait MatchDecider {
    /// Whether `doc` is acceptable.
    fn accept(&self, doc: &Document) -> bool;
}

/// A user hook shown every document the matcher considers acceptable.
pub trait MatchSpy {
    /// Observes a candidate document and its weight.
    fn observe(&mut self, doc: &Document, weight: f64);
}

/// A user hook building sort keys from documents.
pub trait KeyMaker {
    /// The sort key for `doc`.
    fn make_key(&self, doc: &Document) -> String;
}

/// Options controlling one match.
///
/// The defaults run a plain relevance-ordered match with no collapsing,
/// cutoffs or time limit.
#[derive(Default)]
pub struct MatchOptions {
    /// Collapse duplicates sharing this value slot.
    pub collapse_key: Option<ValueSlot>,
    /// Keep at most this many documents per collapse key. Default: 1.
    pub collapse_max: DocCount,
    /// Drop matches scoring under this percentage of the best. 0-100.
    pub percent_cutoff: u32,
    /// Drop matches weighing less than this.
    pub weight_cutoff: f64,
    /// Docid tie-break direction.
    pub docid_order: DocidOrder,
    /// Slot supplying sort keys when sorting by value.
    pub sort_key: Option<ValueSlot>,
    /// Primary ordering.
    pub sort_by: SortBy,
    /// Whether value sorting is ascending.
    pub sort_value_forward: bool,
    /// Soft deadline for the match loop.
    pub time_limit: Option<Duration>,
    /// Custom sort key builder, overriding `sort_key`.
    pub key_maker: Option<Box<dyn KeyMaker>>,
    /// Filter hook.
    pub decider: Option<Box<dyn MatchDecider>>,
    /// Observer hooks.
    pub spies: Vec<Box<dyn MatchSpy>>,
}

impl MatchOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self {
            collapse_max: 1,
            sort_value_forward: true,
            ..Self::default()
        }
    }

    /// Enables collapsing on `slot`, keeping `max` documents per key.
    pub fn collapse(mut self, slot: ValueSlot, max: DocCount) -> Self {
        self.collapse_key = Some(slot);
        self.collapse_max = max.max(1);
        self
    }

    /// Sets the percentage cutoff (0 disables).
    pub fn percent_cutoff(mut self, percent: u32) -> Self {
        self.percent_cutoff = percent.min(100);
        self
    }

    /// Sets the absolute weight cutoff.
    pub fn weight_cutoff(mut self, weight: f64) -> Self {
        self.weight_cutoff = weight.max(0.0);
        self
    }

    /// Sets the docid tie-break direction.
    pub fn docid_order(mut self, order: DocidOrder) -> Self {
        self.docid_order = order;
        self
    }

    /// Sorts by the value in `slot`.
    pub fn sort_by_value(mut self, slot: ValueSlot, forward: bool, sort_by: SortBy) -> Self {
        self.sort_key = Some(slot);
        self.sort_value_forward = forward;
        self.sort_by = sort_by;
        self
    }

    /// Sets the soft time limit.
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}
