//! Query tree and serialisation for quern search.
//!
//! This crate provides the algebraic query representation consumed by the
//! match engine:
//!
//! - **Leaves**: terms (with within-query frequency and position), value
//!   range tests, external posting sources
//! - **Operators**: `AND`, `OR`, `AND_NOT`, `XOR`, `AND_MAYBE`, `FILTER`,
//!   `SYNONYM`, `MAX`, `ELITE_SET`, `NEAR`, `PHRASE`
//! - **Modifiers**: weight scaling, wildcard and edit-distance expansion
//!
//! Trees are immutable once built; the constructor functions apply the
//! algebraic simplifications (empty-query propagation, flattening of nested
//! same-operator nodes, single-child unwrapping) so the match engine never
//! sees degenerate shapes.
//!
//! # Example
//!
//! ```
//! use quern_query::Query;
//!
//! let query = Query::and(vec![Query::term("ripe"), Query::term("mango")]);
//! assert_eq!(query.unique_terms().count(), 2);
//! ```
//!
//! The [`serialise`] module holds the portable binary primitives shared with
//! the remote protocol; [`Query::serialise`] and [`Query::unserialise`]
//! round-trip whole trees through them.

#![warn(missing_docs)]

mod ast;
mod error;
mod pattern;
pub mod serialise;

pub use ast::{Query, QueryOp};
pub use error::QueryError;
pub use pattern::{ExpansionCombiner, ExpansionLimit, WildcardPattern};
