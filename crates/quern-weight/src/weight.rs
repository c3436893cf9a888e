//! The per-posting scoring contract.

use crate::{Bm25Weight, BoolWeight, Stats, TermCount, TermFreqs, TradWeight, WeightError};

/// A document weighting scheme.
///
/// A scheme object is a prototype until [`init`](Self::init) binds it to the
/// collated collection statistics and (for term weights) a specific term.
/// The matcher clones the prototype once per term postlist and once per
/// shard for the term-independent contribution.
///
/// `maxpart`/`maxextra` must be true upper bounds over every document the
/// scheme could be asked to score; the matcher's pruning relies on them.
pub trait Weight: Send {
    /// The registered name of the scheme, used to reconstruct it remotely.
    fn name(&self) -> &'static str;

    /// Clones the scheme into a fresh boxed prototype.
    fn clone_boxed(&self) -> Box<dyn Weight>;

    /// Serialises the scheme's parameters (not its init state).
    fn serialise(&self) -> Vec<u8>;

    /// Binds the scheme to the collection statistics and a term.
    ///
    /// `term` is `None` when only the term-independent contribution will be
    /// used. `factor` multiplies every component, implementing weight
    /// scaling.
    fn init(&mut self, stats: &Stats, qlen: TermCount, term: Option<&str>, wqf: TermCount, factor: f64);

    /// Binds the scheme to explicit frequency estimates.
    ///
    /// Used when an operator subtree is scored as one virtual term (synonym
    /// and friends) and so has no entry in the statistics.
    fn init_from_freqs(
        &mut self,
        stats: &Stats,
        qlen: TermCount,
        freqs: &TermFreqs,
        wdf_upper_bound: TermCount,
        factor: f64,
    );

    /// The per-posting score contribution.
    fn sumpart(
        &self,
        wdf: TermCount,
        doclen: TermCount,
        unique_terms: TermCount,
        wdfdocmax: TermCount,
    ) -> f64;

    /// An upper bound on [`sumpart`](Self::sumpart) for any posting.
    fn maxpart(&self) -> f64;

    /// The term-independent score contribution, added once per document.
    fn sumextra(&self, doclen: TermCount, unique_terms: TermCount) -> f64;

    /// An upper bound on [`sumextra`](Self::sumextra) for any document.
    fn maxextra(&self) -> f64;

    /// Whether `sumpart`/`sumextra` read the document length.
    ///
    /// When every scheme in play returns false the matcher skips the
    /// document-length lookup entirely.
    fn needs_doclength(&self) -> bool {
        true
    }
}

/// Reconstructs a weighting scheme from its registered name and serialised
/// parameters.
pub fn unserialise_weight(name: &str, data: &[u8]) -> Result<Box<dyn Weight>, WeightError> {
    match name {
        "bm25" => Ok(Box::new(Bm25Weight::unserialise(data)?)),
        "trad" => Ok(Box::new(TradWeight::unserialise(data)?)),
        "bool" => Ok(Box::new(BoolWeight::unserialise(data)?)),
        other => Err(WeightError::corrupt(format!(
            "unknown weighting scheme {other:?}"
        ))),
    }
}

/// Reads a fixed array of little-endian doubles, the shared layout for
/// scheme parameters.
pub(crate) fn unpack_doubles<const N: usize>(data: &[u8]) -> Result<[f64; N], WeightError> {
    if data.len() != N * 8 {
        return Err(WeightError::corrupt(format!(
            "expected {} parameter bytes, got {}",
            N * 8,
            data.len()
        )));
    }
    let mut out = [0.0; N];
    for (i, chunk) in data.chunks_exact(8).enumerate() {
        let mut bits = [0u8; 8];
        bits.copy_from_slice(chunk);
        out[i] = f64::from_bits(u64::from_le_bytes(bits));
    }
    Ok(out)
}

/// Appends doubles in the shared little-endian layout.
pub(crate) fn pack_doubles(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for value in values {
        out.extend_from_slice(&value.to_bits().to_le_bytes());
    }
    out
}

/// The Robertson / Sparck Jones relevance-aware inverse document frequency.
///
/// With an empty relevance set this reduces to the classic
/// `(N - n + 0.5) / (n + 0.5)` ratio. The ratio is smoothed below 2 the way
/// the probabilistic model traditionally does, then logged.
pub(crate) fn rsj_termweight(stats: &Stats, termfreq: u32, reltermfreq: u32) -> f64 {
    let n = f64::from(stats.collection_size);
    let tf = f64::from(termfreq);
    let rset = f64::from(stats.rset_size);
    let rtf = f64::from(reltermfreq);

    let ratio = if stats.rset_size == 0 {
        (n - tf + 0.5) / (tf + 0.5)
    } else {
        ((rtf + 0.5) * (n - rset - tf + rtf + 0.5)) / ((tf - rtf + 0.5) * (rset - rtf + 0.5))
    };

    let ratio = if ratio < 2.0 {
        // Smooth rather than clamp so rankings stay strict for very common
        // terms; the smoothed ratio lands in (1, 2].
        ratio * 0.5 + 1.0
    } else {
        ratio
    };
    ratio.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trips_every_scheme() {
        let schemes: Vec<Box<dyn Weight>> = vec![
            Box::new(Bm25Weight::default()),
            Box::new(TradWeight::default()),
            Box::new(BoolWeight),
        ];
        for scheme in schemes {
            let bytes = scheme.serialise();
            let back = unserialise_weight(scheme.name(), &bytes).unwrap();
            assert_eq!(back.name(), scheme.name());
            assert_eq!(back.serialise(), bytes);
        }
    }

    #[test]
    fn registry_rejects_unknown_scheme() {
        assert!(unserialise_weight("tfidf", &[]).is_err());
    }

    #[test]
    fn rarer_terms_weigh_more() {
        let mut stats = Stats::new();
        stats.add_collection(1000, 20.0, 20_000, (5, 60));
        let rare = rsj_termweight(&stats, 3, 0);
        let common = rsj_termweight(&stats, 800, 0);
        assert!(rare > common);
        assert!(common > 0.0);
    }

    #[test]
    fn relevance_feedback_boosts_matching_terms() {
        let mut stats = Stats::new();
        stats.add_collection(1000, 20.0, 20_000, (5, 60));
        stats.add_rset_size(10);
        let with_feedback = rsj_termweight(&stats, 50, 8);
        let without = rsj_termweight(&stats, 50, 0);
        assert!(with_feedback > without);
    }
}
