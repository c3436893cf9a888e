//! Collection statistics and weighting schemes for quern search.
//!
//! This crate holds the two inputs every match needs before any posting is
//! read:
//!
//! - [`Stats`]: collection-wide counters (document counts, lengths, per-term
//!   frequencies) accumulated across shards during the preparation phase
//! - [`Weight`]: the per-posting scoring contract, with concrete
//!   [`Bm25Weight`], [`TradWeight`] and [`BoolWeight`] schemes
//!
//! A weighting scheme is created un-initialised, cloned per shard and per
//! term, then bound to the collated statistics with [`Weight::init`]. After
//! that it answers `sumpart` (per-posting score), `maxpart` (an upper bound
//! used for pruning) and the term-independent `sumextra`/`maxextra` pair.

#![warn(missing_docs)]

mod bm25;
mod boolean;
mod error;
mod stats;
mod trad;
mod weight;

pub use bm25::Bm25Weight;
pub use boolean::BoolWeight;
pub use error::WeightError;
pub use stats::{Stats, TermFreqs, TermStats, ValueStats};
pub use trad::TradWeight;
pub use weight::{Weight, unserialise_weight};

/// Count of documents.
pub type DocCount = u32;

/// Document identifier; valid ids start at 1.
pub type DocId = u32;

/// Count of term occurrences (wdf, wqf, document lengths).
pub type TermCount = u32;

/// Term position within a document.
pub type Position = u32;

/// Identifier of a document value slot.
pub type ValueSlot = u32;
