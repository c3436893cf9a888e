//! Query matching engine for quern.
//!
//! This crate turns a [`Query`](quern_query::Query) tree and one or more
//! inverted-index shards into a ranked [`MSet`]:
//!
//! 1. each shard contributes collection statistics ([`quern_weight::Stats`])
//! 2. the query compiles into a tree of postlist iterators per shard
//! 3. a top-k loop drives the merged postings, pruning on weight bounds
//!    and applying cutoffs, collapsing and filtering
//! 4. the surviving items are sorted and paged into the result set
//!
//! Shards are anything implementing [`Database`]; the in-memory backend
//! in [`backend::memory`] serves tests and small corpora, and remote
//! shards plug in through the [`Shard`] trait.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use quern_match::{Enquire, MemoryDatabase};
//! use quern_query::Query;
//!
//! let mut db = MemoryDatabase::new();
//! db.add_text("ripe mango");
//! db.add_text("green mango");
//!
//! let mut enquire = Enquire::new(Arc::new(db));
//! enquire.set_query(Query::and(vec![Query::term("ripe"), Query::term("mango")]));
//! let mset = enquire.mset(0, 10, None).unwrap();
//! assert_eq!(mset.len(), 1);
//! ```

#![warn(missing_docs)]

pub mod backend;
mod enquire;
mod error;
mod matcher;
mod mset;
mod optimiser;
mod options;
mod postlist;
mod rset;
mod submatch;

pub use backend::memory::{DocInput, MemoryDatabase, TermInput};
pub use backend::{AllTermsEntry, Database, Document, PositionList, TermListEntry, ValueList};
pub use enquire::Enquire;
pub use error::MatchError;
pub use matcher::ErrorHandler;
pub use mset::{MSet, MSetItem, TermFreqAndWeight, TermInfoMap};
pub use options::{DocidOrder, KeyMaker, MatchDecider, MatchOptions, MatchSpy, SortBy};
pub use postlist::{
    Advanced, AllDocsPostList, Checked, DocStats, EmptyPostList, ExternalPostList, LeafPostList,
    PostList, PostingSource, RecalcHint, SourceRegistry, TermPostList,
};
pub use rset::RSet;
pub use submatch::{LocalShard, LocalSubMatch, MatchSpec, Shard, SubMatch};
