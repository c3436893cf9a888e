//! Query abstract syntax tree.
//!
//! Represents parsed queries before compilation to postlist trees. The
//! constructor functions apply the algebraic simplifications the match
//! engine relies on, so a `Query` in hand is always in reduced form.

use std::collections::BTreeMap;
use std::fmt;

use crate::pattern::{ExpansionCombiner, ExpansionLimit, WildcardPattern};
use crate::serialise::{
    pack_double, pack_string, pack_uint, unpack_byte, unpack_double, unpack_string, unpack_uint,
};
use crate::QueryError;

/// Maximum nesting accepted when unserialising a query tree.
const MAX_UNSERIALISE_DEPTH: usize = 256;

/// Multi-way combining operators accepted by [`Query::combine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    /// Documents must match every subquery.
    And,
    /// Documents match any subquery; weights are summed.
    Or,
    /// Documents match an odd number of subqueries.
    Xor,
    /// Subqueries score as one virtual term.
    Synonym,
    /// The best-scoring matching subquery supplies the weight.
    Max,
}

/// A query expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Matches no documents.
    MatchNothing,

    /// Matches every document, contributing no weight.
    MatchAll,

    /// A single probabilistic term.
    Term {
        /// The index term.
        term: String,
        /// Within-query frequency.
        wqf: u32,
        /// Term position within the query (0 if untracked).
        pos: u32,
    },

    /// Documents whose value in `slot` is within `[begin, end]`.
    ValueRange {
        /// Value slot to test.
        slot: u32,
        /// Inclusive lower bound.
        begin: String,
        /// Inclusive upper bound.
        end: String,
    },

    /// Documents whose value in `slot` is `>= limit`.
    ValueGe {
        /// Value slot to test.
        slot: u32,
        /// Inclusive lower bound.
        limit: String,
    },

    /// Documents whose value in `slot` is `<= limit`.
    ValueLe {
        /// Value slot to test.
        slot: u32,
        /// Inclusive upper bound.
        limit: String,
    },

    /// An external posting source, resolved by name at match time.
    Source(String),

    /// Multiplies the weights of the subtree by a positive factor.
    Scale {
        /// Weight multiplier, strictly positive.
        factor: f64,
        /// The scaled subquery.
        child: Box<Query>,
    },

    /// Expands to the indexed terms matching a wildcard pattern.
    Wildcard {
        /// The pattern to expand.
        pattern: WildcardPattern,
        /// Maximum number of expanded terms (0 = unlimited).
        max_expansion: u32,
        /// What to do when the limit is exceeded.
        limit: ExpansionLimit,
        /// Operator combining the expanded terms.
        combiner: ExpansionCombiner,
    },

    /// Expands to indexed terms within an edit distance of a target.
    EditDistance {
        /// The target word.
        pattern: String,
        /// Maximum number of edits (insert/delete/substitute).
        threshold: u32,
        /// Leading characters which must match exactly.
        fixed_prefix_len: u32,
        /// Maximum number of expanded terms (0 = unlimited).
        max_expansion: u32,
        /// What to do when the limit is exceeded.
        limit: ExpansionLimit,
        /// Operator combining the expanded terms.
        combiner: ExpansionCombiner,
    },

    /// Conjunction: all subqueries must match; weights are summed.
    And(Vec<Query>),

    /// Disjunction: any subquery matches; weights are summed.
    Or(Vec<Query>),

    /// Left matches and right does not; only left contributes weight.
    AndNot(Box<Query>, Box<Query>),

    /// An odd number of subqueries match.
    Xor(Vec<Query>),

    /// Left must match; right adds weight where it also matches.
    AndMaybe(Box<Query>, Box<Query>),

    /// Left must match; right restricts without contributing weight.
    Filter(Box<Query>, Box<Query>),

    /// Subqueries score as one virtual term (wdf-summed union).
    Synonym(Vec<Query>),

    /// Union where the best-scoring matching subquery supplies the weight.
    Max(Vec<Query>),

    /// Keep only the `k` highest-maxweight subqueries, OR-combined.
    EliteSet {
        /// Number of subqueries to keep.
        k: u32,
        /// Candidate subqueries.
        children: Vec<Query>,
    },

    /// Subqueries occur within a window, in any order.
    Near {
        /// Window size in term positions.
        window: u32,
        /// Subqueries, which must be plain terms at match time.
        children: Vec<Query>,
    },

    /// Subqueries occur within a window, in order.
    Phrase {
        /// Window size in term positions; equal to the number of
        /// subqueries for an exact phrase.
        window: u32,
        /// Subqueries, which must be plain terms at match time.
        children: Vec<Query>,
    },
}

impl Query {
    /// Creates a term leaf with `wqf` 1 and no position.
    pub fn term(term: impl Into<String>) -> Self {
        Self::term_with(term, 1, 0)
    }

    /// Creates a term leaf with explicit within-query frequency and position.
    ///
    /// The empty term is the match-all query.
    pub fn term_with(term: impl Into<String>, wqf: u32, pos: u32) -> Self {
        let term = term.into();
        if term.is_empty() {
            return Self::MatchAll;
        }
        Self::Term { term, wqf, pos }
    }

    /// Creates a wildcard expansion with default policy (unlimited, OR).
    pub fn wildcard(pattern: impl Into<String>) -> Self {
        Self::Wildcard {
            pattern: WildcardPattern::new(pattern),
            max_expansion: 0,
            limit: ExpansionLimit::default(),
            combiner: ExpansionCombiner::default(),
        }
    }

    /// Creates an edit-distance expansion with default policy.
    pub fn edit_distance(pattern: impl Into<String>, threshold: u32) -> Self {
        Self::EditDistance {
            pattern: pattern.into(),
            threshold,
            fixed_prefix_len: 0,
            max_expansion: 0,
            limit: ExpansionLimit::default(),
            combiner: ExpansionCombiner::default(),
        }
    }

    /// Creates an And node, flattening nested Ands.
    ///
    /// Any `MatchNothing` subquery collapses the whole conjunction.
    pub fn and(children: Vec<Self>) -> Self {
        if children.iter().any(Self::is_nothing) {
            return Self::MatchNothing;
        }
        let flattened = flatten(children, |q| match q {
            Self::And(inner) => Ok(inner),
            other => Err(other),
        });
        wrap_nary(flattened, Self::And)
    }

    /// Creates an Or node, flattening nested Ors.
    ///
    /// `MatchNothing` subqueries are dropped; an empty disjunction is
    /// `MatchNothing`.
    pub fn or(children: Vec<Self>) -> Self {
        let children = drop_nothing(children);
        let flattened = flatten(children, |q| match q {
            Self::Or(inner) => Ok(inner),
            other => Err(other),
        });
        wrap_nary(flattened, Self::Or)
    }

    /// Creates an Xor node, flattening nested Xors.
    pub fn xor(children: Vec<Self>) -> Self {
        let children = drop_nothing(children);
        let flattened = flatten(children, |q| match q {
            Self::Xor(inner) => Ok(inner),
            other => Err(other),
        });
        wrap_nary(flattened, Self::Xor)
    }

    /// Creates an AndNot node.
    ///
    /// The right side never contributes weight, so any weight scaling on it
    /// is stripped.
    pub fn and_not(left: Self, right: Self) -> Self {
        if left.is_nothing() {
            return Self::MatchNothing;
        }
        let right = strip_scale(right);
        if right.is_nothing() {
            return left;
        }
        Self::AndNot(Box::new(left), Box::new(right))
    }

    /// Creates an AndMaybe node.
    pub fn and_maybe(left: Self, right: Self) -> Self {
        if left.is_nothing() {
            return Self::MatchNothing;
        }
        if right.is_nothing() {
            return left;
        }
        Self::AndMaybe(Box::new(left), Box::new(right))
    }

    /// Creates a Filter node; the right side matches without weighting.
    pub fn filter(left: Self, right: Self) -> Self {
        if left.is_nothing() || right.is_nothing() {
            return Self::MatchNothing;
        }
        Self::Filter(Box::new(left), Box::new(right))
    }

    /// Creates a Synonym node.
    ///
    /// A single term child unwraps, and a synonym over a lone wildcard
    /// commutes into the wildcard's combiner.
    pub fn synonym(children: Vec<Self>) -> Self {
        let mut children = drop_nothing(children);
        match children.len() {
            0 => Self::MatchNothing,
            1 => match children.pop().unwrap() {
                leaf @ (Self::Term { .. } | Self::MatchAll) => leaf,
                Self::Wildcard {
                    pattern,
                    max_expansion,
                    limit,
                    ..
                } => Self::Wildcard {
                    pattern,
                    max_expansion,
                    limit,
                    combiner: ExpansionCombiner::Synonym,
                },
                other => Self::Synonym(vec![other]),
            },
            _ => Self::Synonym(children),
        }
    }

    /// Creates a Max node.
    pub fn max(children: Vec<Self>) -> Self {
        let mut children = drop_nothing(children);
        match children.len() {
            0 => Self::MatchNothing,
            1 => children.pop().unwrap(),
            _ => Self::Max(children),
        }
    }

    /// Creates an EliteSet node keeping the `k` best subqueries.
    pub fn elite_set(k: u32, children: Vec<Self>) -> Result<Self, QueryError> {
        if k == 0 {
            return Err(QueryError::invalid("elite set size must be at least 1"));
        }
        let mut children = drop_nothing(children);
        Ok(match children.len() {
            0 => Self::MatchNothing,
            1 => children.pop().unwrap(),
            _ => Self::EliteSet { k, children },
        })
    }

    /// Creates a Near node: subqueries within `window` positions.
    pub fn near(window: u32, children: Vec<Self>) -> Self {
        if children.iter().any(Self::is_nothing) {
            return Self::MatchNothing;
        }
        let mut children = children;
        match children.len() {
            0 => Self::MatchNothing,
            1 => children.pop().unwrap(),
            n => Self::Near {
                window: window.max(n as u32),
                children,
            },
        }
    }

    /// Creates a Phrase node: subqueries in order within `window` positions.
    ///
    /// A window equal to the number of subqueries is an exact phrase.
    pub fn phrase(window: u32, children: Vec<Self>) -> Self {
        if children.iter().any(Self::is_nothing) {
            return Self::MatchNothing;
        }
        let mut children = children;
        match children.len() {
            0 => Self::MatchNothing,
            1 => children.pop().unwrap(),
            n => Self::Phrase {
                window: window.max(n as u32),
                children,
            },
        }
    }

    /// Creates an exact phrase over `terms`.
    pub fn exact_phrase<T: Into<String>>(terms: impl IntoIterator<Item = T>) -> Self {
        let children: Vec<Self> = terms.into_iter().map(Self::term).collect();
        let window = children.len() as u32;
        Self::phrase(window, children)
    }

    /// Scales the weights of `child` by `factor`.
    ///
    /// The factor must be strictly positive; a factor of exactly 1 returns
    /// the child unchanged, and nested scales multiply together.
    pub fn scale(factor: f64, child: Self) -> Result<Self, QueryError> {
        if factor < 0.0 || !factor.is_finite() {
            return Err(QueryError::invalid(format!(
                "scale factor must be finite and non-negative, got {factor}"
            )));
        }
        if factor == 0.0 {
            return Err(QueryError::invalid("scale factor of 0 is not allowed"));
        }
        if child.is_nothing() {
            return Ok(Self::MatchNothing);
        }
        let (factor, child) = match child {
            Self::Scale {
                factor: inner,
                child,
            } => (factor * inner, *child),
            other => (factor, other),
        };
        if factor == 1.0 {
            return Ok(child);
        }
        Ok(Self::Scale {
            factor,
            child: Box::new(child),
        })
    }

    /// Combines subqueries under a multi-way operator.
    pub fn combine(op: QueryOp, children: Vec<Self>) -> Self {
        match op {
            QueryOp::And => Self::and(children),
            QueryOp::Or => Self::or(children),
            QueryOp::Xor => Self::xor(children),
            QueryOp::Synonym => Self::synonym(children),
            QueryOp::Max => Self::max(children),
        }
    }

    /// Whether this query can match no documents at all.
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::MatchNothing)
    }

    /// Iterates the distinct terms in the tree with their summed wqf.
    ///
    /// Terms are reported in lexicographic order; every literal term
    /// anywhere in the tree appears, including unweighted filter terms.
    pub fn unique_terms(&self) -> impl Iterator<Item = (&str, u32)> {
        let mut terms: BTreeMap<&str, u32> = BTreeMap::new();
        self.visit_terms(&mut |term, wqf| {
            *terms.entry(term).or_insert(0) += wqf;
        });
        terms.into_iter()
    }

    /// The query length: total wqf over all term leaves.
    pub fn qlen(&self) -> u32 {
        let mut total = 0;
        self.visit_terms(&mut |_, wqf| total += wqf);
        total
    }

    /// The value slots the tree ranges over, in ascending order.
    pub fn value_slots(&self) -> Vec<u32> {
        fn walk(query: &Query, slots: &mut Vec<u32>) {
            match query {
                Query::ValueRange { slot, .. }
                | Query::ValueGe { slot, .. }
                | Query::ValueLe { slot, .. } => slots.push(*slot),
                Query::Scale { child, .. } => walk(child, slots),
                Query::AndNot(left, right)
                | Query::AndMaybe(left, right)
                | Query::Filter(left, right) => {
                    walk(left, slots);
                    walk(right, slots);
                }
                Query::And(children)
                | Query::Or(children)
                | Query::Xor(children)
                | Query::Synonym(children)
                | Query::Max(children)
                | Query::EliteSet { children, .. }
                | Query::Near { children, .. }
                | Query::Phrase { children, .. } => {
                    for child in children {
                        walk(child, slots);
                    }
                }
                _ => {}
            }
        }
        let mut slots = Vec::new();
        walk(self, &mut slots);
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Calls `visit` for every term leaf in the tree.
    fn visit_terms<'a>(&'a self, visit: &mut impl FnMut(&'a str, u32)) {
        match self {
            Self::Term { term, wqf, .. } => visit(term, *wqf),
            Self::Scale { child, .. } => child.visit_terms(visit),
            Self::AndNot(left, right)
            | Self::AndMaybe(left, right)
            | Self::Filter(left, right) => {
                left.visit_terms(visit);
                right.visit_terms(visit);
            }
            Self::And(children)
            | Self::Or(children)
            | Self::Xor(children)
            | Self::Synonym(children)
            | Self::Max(children)
            | Self::EliteSet { children, .. }
            | Self::Near { children, .. }
            | Self::Phrase { children, .. } => {
                for child in children {
                    child.visit_terms(visit);
                }
            }
            Self::MatchNothing
            | Self::MatchAll
            | Self::ValueRange { .. }
            | Self::ValueGe { .. }
            | Self::ValueLe { .. }
            | Self::Source(_)
            | Self::Wildcard { .. }
            | Self::EditDistance { .. } => {}
        }
    }

    /// Checks structural invariants on an arbitrary tree.
    ///
    /// Trees built through the constructors always pass; this guards trees
    /// that arrive by other routes (unserialisation, manual assembly).
    pub fn validate(&self) -> Result<(), QueryError> {
        match self {
            Self::Term { term, .. } => {
                if term.is_empty() {
                    return Err(QueryError::invalid("term leaf with empty term"));
                }
            }
            Self::Scale { factor, child } => {
                if *factor <= 0.0 || !factor.is_finite() {
                    return Err(QueryError::invalid(format!("invalid scale factor {factor}")));
                }
                child.validate()?;
            }
            Self::AndNot(left, right)
            | Self::AndMaybe(left, right)
            | Self::Filter(left, right) => {
                left.validate()?;
                right.validate()?;
            }
            Self::And(children)
            | Self::Or(children)
            | Self::Xor(children)
            | Self::Synonym(children)
            | Self::Max(children) => {
                if children.is_empty() {
                    return Err(QueryError::invalid("combining operator with no subqueries"));
                }
                for child in children {
                    child.validate()?;
                }
            }
            Self::EliteSet { k, children } => {
                if *k == 0 {
                    return Err(QueryError::invalid("elite set size must be at least 1"));
                }
                if children.is_empty() {
                    return Err(QueryError::invalid("elite set with no subqueries"));
                }
                for child in children {
                    child.validate()?;
                }
            }
            Self::Near { window, children } | Self::Phrase { window, children } => {
                if children.len() < 2 {
                    return Err(QueryError::invalid(
                        "positional operator needs at least 2 subqueries",
                    ));
                }
                if (*window as usize) < children.len() {
                    return Err(QueryError::invalid(
                        "positional window smaller than the number of subqueries",
                    ));
                }
                for child in children {
                    child.validate()?;
                }
            }
            Self::MatchNothing
            | Self::MatchAll
            | Self::ValueRange { .. }
            | Self::ValueGe { .. }
            | Self::ValueLe { .. }
            | Self::Source(_)
            | Self::Wildcard { .. }
            | Self::EditDistance { .. } => {}
        }
        Ok(())
    }

    /// Serialises the tree to the portable binary form.
    pub fn serialise(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialise_into(&mut out);
        out
    }

    /// Appends the serialised tree to `out`.
    fn serialise_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::MatchNothing => out.push(b'0'),
            Self::MatchAll => out.push(b'A'),
            Self::Term { term, wqf, pos } => {
                out.push(b'T');
                pack_string(out, term);
                pack_uint(out, u64::from(*wqf));
                pack_uint(out, u64::from(*pos));
            }
            Self::ValueRange { slot, begin, end } => {
                out.push(b'R');
                pack_uint(out, u64::from(*slot));
                pack_string(out, begin);
                pack_string(out, end);
            }
            Self::ValueGe { slot, limit } => {
                out.push(b'G');
                pack_uint(out, u64::from(*slot));
                pack_string(out, limit);
            }
            Self::ValueLe { slot, limit } => {
                out.push(b'L');
                pack_uint(out, u64::from(*slot));
                pack_string(out, limit);
            }
            Self::Source(name) => {
                out.push(b'P');
                pack_string(out, name);
            }
            Self::Scale { factor, child } => {
                out.push(b'S');
                pack_double(out, *factor);
                child.serialise_into(out);
            }
            Self::Wildcard {
                pattern,
                max_expansion,
                limit,
                combiner,
            } => {
                out.push(b'W');
                pack_string(out, pattern.pattern());
                pack_uint(out, u64::from(*max_expansion));
                out.push(limit_code(*limit));
                out.push(combiner_code(*combiner));
            }
            Self::EditDistance {
                pattern,
                threshold,
                fixed_prefix_len,
                max_expansion,
                limit,
                combiner,
            } => {
                out.push(b'E');
                pack_string(out, pattern);
                pack_uint(out, u64::from(*threshold));
                pack_uint(out, u64::from(*fixed_prefix_len));
                pack_uint(out, u64::from(*max_expansion));
                out.push(limit_code(*limit));
                out.push(combiner_code(*combiner));
            }
            Self::And(children) => serialise_nary(out, b'&', children),
            Self::Or(children) => serialise_nary(out, b'|', children),
            Self::Xor(children) => serialise_nary(out, b'^', children),
            Self::Synonym(children) => serialise_nary(out, b'=', children),
            Self::Max(children) => serialise_nary(out, b'X', children),
            Self::AndNot(left, right) => {
                out.push(b'-');
                left.serialise_into(out);
                right.serialise_into(out);
            }
            Self::AndMaybe(left, right) => {
                out.push(b'M');
                left.serialise_into(out);
                right.serialise_into(out);
            }
            Self::Filter(left, right) => {
                out.push(b'F');
                left.serialise_into(out);
                right.serialise_into(out);
            }
            Self::EliteSet { k, children } => {
                out.push(b'*');
                pack_uint(out, u64::from(*k));
                pack_uint(out, children.len() as u64);
                for child in children {
                    child.serialise_into(out);
                }
            }
            Self::Near { window, children } => {
                out.push(b'~');
                pack_uint(out, u64::from(*window));
                pack_uint(out, children.len() as u64);
                for child in children {
                    child.serialise_into(out);
                }
            }
            Self::Phrase { window, children } => {
                out.push(b'"');
                pack_uint(out, u64::from(*window));
                pack_uint(out, children.len() as u64);
                for child in children {
                    child.serialise_into(out);
                }
            }
        }
    }

    /// Reconstructs a tree from its serialised form.
    pub fn unserialise(data: &[u8]) -> Result<Self, QueryError> {
        let mut input = data;
        let query = Self::unserialise_from(&mut input, 0)?;
        if !input.is_empty() {
            return Err(QueryError::corrupt("trailing bytes after query"));
        }
        query.validate()?;
        Ok(query)
    }

    /// Reads one node (and its subtree) from the front of `input`.
    fn unserialise_from(input: &mut &[u8], depth: usize) -> Result<Self, QueryError> {
        if depth > MAX_UNSERIALISE_DEPTH {
            return Err(QueryError::corrupt("query tree nested too deeply"));
        }
        let tag = unpack_byte(input)?;
        Ok(match tag {
            b'0' => Self::MatchNothing,
            b'A' => Self::MatchAll,
            b'T' => {
                let term = unpack_string(input)?;
                let wqf = unpack_uint(input)? as u32;
                let pos = unpack_uint(input)? as u32;
                Self::term_with(term, wqf, pos)
            }
            b'R' => Self::ValueRange {
                slot: unpack_uint(input)? as u32,
                begin: unpack_string(input)?,
                end: unpack_string(input)?,
            },
            b'G' => Self::ValueGe {
                slot: unpack_uint(input)? as u32,
                limit: unpack_string(input)?,
            },
            b'L' => Self::ValueLe {
                slot: unpack_uint(input)? as u32,
                limit: unpack_string(input)?,
            },
            b'P' => Self::Source(unpack_string(input)?),
            b'S' => {
                let factor = unpack_double(input)?;
                let child = Self::unserialise_from(input, depth + 1)?;
                Self::scale(factor, child)
                    .map_err(|err| QueryError::corrupt(err.to_string()))?
            }
            b'W' => Self::Wildcard {
                pattern: WildcardPattern::new(unpack_string(input)?),
                max_expansion: unpack_uint(input)? as u32,
                limit: limit_from_code(unpack_byte(input)?)?,
                combiner: combiner_from_code(unpack_byte(input)?)?,
            },
            b'E' => Self::EditDistance {
                pattern: unpack_string(input)?,
                threshold: unpack_uint(input)? as u32,
                fixed_prefix_len: unpack_uint(input)? as u32,
                max_expansion: unpack_uint(input)? as u32,
                limit: limit_from_code(unpack_byte(input)?)?,
                combiner: combiner_from_code(unpack_byte(input)?)?,
            },
            b'&' => Self::and(unserialise_children(input, depth)?),
            b'|' => Self::or(unserialise_children(input, depth)?),
            b'^' => Self::xor(unserialise_children(input, depth)?),
            b'=' => Self::synonym(unserialise_children(input, depth)?),
            b'X' => Self::max(unserialise_children(input, depth)?),
            b'-' => {
                let left = Self::unserialise_from(input, depth + 1)?;
                let right = Self::unserialise_from(input, depth + 1)?;
                Self::and_not(left, right)
            }
            b'M' => {
                let left = Self::unserialise_from(input, depth + 1)?;
                let right = Self::unserialise_from(input, depth + 1)?;
                Self::and_maybe(left, right)
            }
            b'F' => {
                let left = Self::unserialise_from(input, depth + 1)?;
                let right = Self::unserialise_from(input, depth + 1)?;
                Self::filter(left, right)
            }
            b'*' => {
                let k = unpack_uint(input)? as u32;
                let children = unserialise_children(input, depth)?;
                Self::elite_set(k, children)
                    .map_err(|err| QueryError::corrupt(err.to_string()))?
            }
            b'~' => {
                let window = unpack_uint(input)? as u32;
                let children = unserialise_children(input, depth)?;
                Self::near(window, children)
            }
            b'"' => {
                let window = unpack_uint(input)? as u32;
                let children = unserialise_children(input, depth)?;
                Self::phrase(window, children)
            }
            other => {
                return Err(QueryError::corrupt(format!(
                    "unknown query node tag {other:#04x}"
                )));
            }
        })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchNothing => write!(f, "<nothing>"),
            Self::MatchAll => write!(f, "<all>"),
            Self::Term { term, wqf, .. } => {
                if *wqf == 1 {
                    write!(f, "{term}")
                } else {
                    write!(f, "{term}#{wqf}")
                }
            }
            Self::ValueRange { slot, begin, end } => {
                write!(f, "VALUE {slot} {begin}..{end}")
            }
            Self::ValueGe { slot, limit } => write!(f, "VALUE {slot} >={limit}"),
            Self::ValueLe { slot, limit } => write!(f, "VALUE {slot} <={limit}"),
            Self::Source(name) => write!(f, "SOURCE {name}"),
            Self::Scale { factor, child } => write!(f, "{factor}*({child})"),
            Self::Wildcard { pattern, .. } => write!(f, "WILDCARD {}", pattern.pattern()),
            Self::EditDistance {
                pattern, threshold, ..
            } => write!(f, "EDIT {pattern}~{threshold}"),
            Self::And(children) => write_infix(f, "AND", children),
            Self::Or(children) => write_infix(f, "OR", children),
            Self::Xor(children) => write_infix(f, "XOR", children),
            Self::Synonym(children) => write_infix(f, "SYNONYM", children),
            Self::Max(children) => write_infix(f, "MAX", children),
            Self::AndNot(left, right) => write!(f, "({left} AND_NOT {right})"),
            Self::AndMaybe(left, right) => write!(f, "({left} AND_MAYBE {right})"),
            Self::Filter(left, right) => write!(f, "({left} FILTER {right})"),
            Self::EliteSet { k, children } => {
                write!(f, "(ELITE_SET {k}")?;
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
            Self::Near { window, children } => {
                write!(f, "(NEAR {window}")?;
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
            Self::Phrase { window, children } => {
                write!(f, "(PHRASE {window}")?;
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Formats an n-ary operator in infix style.
fn write_infix(f: &mut fmt::Formatter<'_>, op: &str, children: &[Query]) -> fmt::Result {
    write!(f, "(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{child}")?;
    }
    write!(f, ")")
}

/// Serialises an n-ary node as tag + count + children.
fn serialise_nary(out: &mut Vec<u8>, tag: u8, children: &[Query]) {
    out.push(tag);
    pack_uint(out, children.len() as u64);
    for child in children {
        child.serialise_into(out);
    }
}

/// Reads a count-prefixed child list.
fn unserialise_children(input: &mut &[u8], depth: usize) -> Result<Vec<Query>, QueryError> {
    let count = unpack_uint(input)? as usize;
    if count > input.len() {
        // Each child costs at least one byte, so this cannot be satisfied.
        return Err(QueryError::corrupt("child count exceeds remaining data"));
    }
    let mut children = Vec::with_capacity(count);
    for _ in 0..count {
        children.push(Query::unserialise_from(input, depth + 1)?);
    }
    Ok(children)
}

/// Byte code for an expansion limit policy.
fn limit_code(limit: ExpansionLimit) -> u8 {
    match limit {
        ExpansionLimit::Error => 0,
        ExpansionLimit::First => 1,
        ExpansionLimit::MostFrequent => 2,
    }
}

/// Decodes an expansion limit policy byte.
fn limit_from_code(code: u8) -> Result<ExpansionLimit, QueryError> {
    match code {
        0 => Ok(ExpansionLimit::Error),
        1 => Ok(ExpansionLimit::First),
        2 => Ok(ExpansionLimit::MostFrequent),
        other => Err(QueryError::corrupt(format!(
            "unknown expansion limit code {other}"
        ))),
    }
}

/// Byte code for an expansion combiner.
fn combiner_code(combiner: ExpansionCombiner) -> u8 {
    match combiner {
        ExpansionCombiner::Or => 0,
        ExpansionCombiner::Max => 1,
        ExpansionCombiner::Synonym => 2,
    }
}

/// Decodes an expansion combiner byte.
fn combiner_from_code(code: u8) -> Result<ExpansionCombiner, QueryError> {
    match code {
        0 => Ok(ExpansionCombiner::Or),
        1 => Ok(ExpansionCombiner::Max),
        2 => Ok(ExpansionCombiner::Synonym),
        other => Err(QueryError::corrupt(format!(
            "unknown expansion combiner code {other}"
        ))),
    }
}

/// Drops `MatchNothing` entries from a child list.
fn drop_nothing(children: Vec<Query>) -> Vec<Query> {
    children.into_iter().filter(|q| !q.is_nothing()).collect()
}

/// Flattens children through `split`, which yields the inner list for
/// same-operator nodes and returns other nodes unchanged.
fn flatten(
    children: Vec<Query>,
    split: impl Fn(Query) -> Result<Vec<Query>, Query> + Copy,
) -> Vec<Query> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        match split(child) {
            Ok(inner) => out.extend(flatten(inner, split)),
            Err(other) => out.push(other),
        }
    }
    out
}

/// Wraps a flattened child list, handling the 0- and 1-child cases.
fn wrap_nary(mut children: Vec<Query>, wrap: impl FnOnce(Vec<Query>) -> Query) -> Query {
    match children.len() {
        0 => Query::MatchNothing,
        1 => children.pop().unwrap(),
        _ => wrap(children),
    }
}

/// Removes weight scaling from the top of a subtree.
fn strip_scale(query: Query) -> Query {
    match query {
        Query::Scale { child, .. } => strip_scale(*child),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_nested() {
        let nested = Query::and(vec![
            Query::term("a"),
            Query::And(vec![Query::term("b"), Query::term("c")]),
        ]);

        assert_eq!(
            nested,
            Query::And(vec![Query::term("a"), Query::term("b"), Query::term("c")])
        );
    }

    #[test]
    fn and_single_element_unwraps() {
        let single = Query::and(vec![Query::term("a")]);
        assert_eq!(single, Query::term("a"));
    }

    #[test]
    fn and_with_nothing_is_nothing() {
        let query = Query::and(vec![Query::term("a"), Query::MatchNothing]);
        assert_eq!(query, Query::MatchNothing);
    }

    #[test]
    fn or_drops_nothing_children() {
        let query = Query::or(vec![Query::MatchNothing, Query::term("a")]);
        assert_eq!(query, Query::term("a"));

        let empty = Query::or(vec![Query::MatchNothing, Query::MatchNothing]);
        assert_eq!(empty, Query::MatchNothing);
    }

    #[test]
    fn and_not_drops_empty_right_side() {
        let query = Query::and_not(Query::term("a"), Query::MatchNothing);
        assert_eq!(query, Query::term("a"));

        let nothing = Query::and_not(Query::MatchNothing, Query::term("a"));
        assert_eq!(nothing, Query::MatchNothing);
    }

    #[test]
    fn and_not_strips_scaling_from_right_side() {
        let scaled = Query::scale(2.5, Query::term("b")).unwrap();
        let query = Query::and_not(Query::term("a"), scaled);
        assert_eq!(
            query,
            Query::AndNot(Box::new(Query::term("a")), Box::new(Query::term("b")))
        );
    }

    #[test]
    fn and_maybe_requires_left_side() {
        let query = Query::and_maybe(Query::MatchNothing, Query::term("a"));
        assert_eq!(query, Query::MatchNothing);

        let kept = Query::and_maybe(Query::term("a"), Query::MatchNothing);
        assert_eq!(kept, Query::term("a"));
    }

    #[test]
    fn synonym_single_term_unwraps() {
        let query = Query::synonym(vec![Query::term("a")]);
        assert_eq!(query, Query::term("a"));
    }

    #[test]
    fn synonym_over_wildcard_commutes() {
        let query = Query::synonym(vec![Query::wildcard("man")]);
        match query {
            Query::Wildcard { combiner, .. } => {
                assert_eq!(combiner, ExpansionCombiner::Synonym);
            }
            other => panic!("expected wildcard, got {other:?}"),
        }
    }

    #[test]
    fn scale_rejects_zero_and_negative() {
        assert!(Query::scale(0.0, Query::term("a")).is_err());
        assert!(Query::scale(-1.0, Query::term("a")).is_err());
    }

    #[test]
    fn scale_of_one_is_identity_and_nested_scales_multiply() {
        assert_eq!(
            Query::scale(1.0, Query::term("a")).unwrap(),
            Query::term("a")
        );

        let inner = Query::scale(2.0, Query::term("a")).unwrap();
        let outer = Query::scale(3.0, inner).unwrap();
        match outer {
            Query::Scale { factor, .. } => assert!((factor - 6.0).abs() < 1e-12),
            other => panic!("expected scale, got {other:?}"),
        }
    }

    #[test]
    fn empty_term_is_match_all() {
        assert_eq!(Query::term(""), Query::MatchAll);
    }

    #[test]
    fn phrase_window_is_at_least_the_term_count() {
        let query = Query::phrase(1, vec![Query::term("a"), Query::term("b")]);
        match query {
            Query::Phrase { window, .. } => assert_eq!(window, 2),
            other => panic!("expected phrase, got {other:?}"),
        }
    }

    #[test]
    fn unique_terms_sums_wqf() {
        let query = Query::or(vec![
            Query::term_with("a", 2, 0),
            Query::and(vec![Query::term("a"), Query::term("b")]),
        ]);
        let terms: Vec<(&str, u32)> = query.unique_terms().collect();
        assert_eq!(terms, vec![("a", 3), ("b", 1)]);
        assert_eq!(query.qlen(), 4);
    }

    #[test]
    fn serialise_round_trips() {
        let queries = vec![
            Query::MatchNothing,
            Query::MatchAll,
            Query::term_with("mango", 2, 3),
            Query::and(vec![Query::term("ripe"), Query::term("mango")]),
            Query::and_not(Query::term("fruit"), Query::term("dried")),
            Query::and_maybe(Query::term("fruit"), Query::term("ripe")),
            Query::filter(Query::term("fruit"), Query::term("tagged")),
            Query::xor(vec![Query::term("a"), Query::term("b"), Query::term("c")]),
            Query::synonym(vec![Query::term("colour"), Query::term("color")]),
            Query::max(vec![Query::term("a"), Query::term("b")]),
            Query::elite_set(2, vec![Query::term("a"), Query::term("b"), Query::term("c")])
                .unwrap(),
            Query::exact_phrase(["ripe", "mango"]),
            Query::near(4, vec![Query::term("ripe"), Query::term("mango")]),
            Query::scale(2.5, Query::term("boosted")).unwrap(),
            Query::wildcard("man*go"),
            Query::edit_distance("mango", 1),
            Query::ValueRange {
                slot: 3,
                begin: "a".into(),
                end: "m".into(),
            },
            Query::ValueGe {
                slot: 1,
                limit: "k".into(),
            },
            Query::ValueLe {
                slot: 1,
                limit: "k".into(),
            },
            Query::Source("external".into()),
        ];
        for query in queries {
            let bytes = query.serialise();
            let back = Query::unserialise(&bytes).unwrap();
            assert_eq!(back, query, "round trip failed for {query}");
        }
    }

    #[test]
    fn unserialise_rejects_garbage() {
        assert!(Query::unserialise(&[0xff]).is_err());
        assert!(Query::unserialise(&[]).is_err());
        // Truncated term node.
        assert!(Query::unserialise(&[b'T', 5, b'a']).is_err());
        // Trailing bytes.
        let mut bytes = Query::term("a").serialise();
        bytes.push(b'A');
        assert!(Query::unserialise(&bytes).is_err());
    }
}
