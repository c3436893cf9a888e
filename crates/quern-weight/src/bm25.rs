//! The BM25 probabilistic weighting scheme.

use crate::weight::{pack_doubles, rsj_termweight, unpack_doubles};
use crate::{Stats, TermCount, TermFreqs, Weight, WeightError};

/// BM25 with the classic five tuning parameters.
///
/// - `k1` governs within-document frequency saturation
/// - `k2` scales the compensation for document length in the
///   term-independent part
/// - `k3` governs within-query frequency saturation
/// - `b` mixes document-length normalisation into the denominator
/// - `min_normlen` floors the normalised document length
#[derive(Debug, Clone)]
pub struct Bm25Weight {
    /// Within-document frequency saturation.
    k1: f64,
    /// Length compensation for the extra component.
    k2: f64,
    /// Within-query frequency saturation.
    k3: f64,
    /// Document length normalisation mix.
    b: f64,
    /// Floor for the normalised document length.
    min_normlen: f64,
    /// State bound by `init`.
    state: Option<Init>,
}

/// Values computed once the scheme is bound to stats and a term.
#[derive(Debug, Clone)]
struct Init {
    /// Term weight including wqf saturation and the scale factor.
    termweight: f64,
    /// 1 / average document length (0 when unknown).
    len_scale: f64,
    /// Query length, used by the extra component.
    qlen: TermCount,
    /// Scale factor applied to every component.
    factor: f64,
    /// Upper bound on the term's wdf in any document.
    wdf_bound: TermCount,
    /// Smallest normalised document length any document can have.
    min_normlen_bound: f64,
}

impl Default for Bm25Weight {
    fn default() -> Self {
        Self::new(1.0, 0.0, 1.0, 0.5, 0.5)
    }
}

impl Bm25Weight {
    /// Creates a scheme with explicit parameters.
    ///
    /// Negative parameters are clamped to 0; `b` is clamped to `[0, 1]`.
    pub fn new(k1: f64, k2: f64, k3: f64, b: f64, min_normlen: f64) -> Self {
        Self {
            k1: k1.max(0.0),
            k2: k2.max(0.0),
            k3: k3.max(0.0),
            b: b.clamp(0.0, 1.0),
            min_normlen: min_normlen.max(0.0),
            state: None,
        }
    }

    /// Reconstructs a scheme from [`Weight::serialise`] output.
    pub fn unserialise(data: &[u8]) -> Result<Self, WeightError> {
        let [k1, k2, k3, b, min_normlen] = unpack_doubles(data)?;
        Ok(Self::new(k1, k2, k3, b, min_normlen))
    }

    /// The normalised length of a document.
    fn normlen(&self, init: &Init, doclen: TermCount) -> f64 {
        (f64::from(doclen) * init.len_scale).max(self.min_normlen)
    }

    /// Finishes initialisation from raw term statistics.
    fn init_common(
        &mut self,
        stats: &Stats,
        qlen: TermCount,
        wqf: TermCount,
        termfreq: u32,
        reltermfreq: u32,
        wdf_bound: TermCount,
        factor: f64,
    ) {
        let mut termweight = rsj_termweight(stats, termfreq, reltermfreq);
        if self.k3 != 0.0 {
            let wqf = f64::from(wqf.max(1));
            termweight *= (self.k3 + 1.0) * wqf / (self.k3 + wqf);
        }
        let len_scale = if stats.average_length > 0.0 {
            1.0 / stats.average_length
        } else {
            0.0
        };
        let min_normlen_bound = if stats.doclength_lower_bound > 0 {
            (f64::from(stats.doclength_lower_bound) * len_scale).max(self.min_normlen)
        } else {
            self.min_normlen
        };
        self.state = Some(Init {
            termweight: termweight * factor,
            len_scale,
            qlen,
            factor,
            wdf_bound,
            min_normlen_bound,
        });
    }
}

impl Weight for Bm25Weight {
    fn name(&self) -> &'static str {
        "bm25"
    }

    fn clone_boxed(&self) -> Box<dyn Weight> {
        Box::new(self.clone())
    }

    fn serialise(&self) -> Vec<u8> {
        pack_doubles(&[self.k1, self.k2, self.k3, self.b, self.min_normlen])
    }

    fn init(
        &mut self,
        stats: &Stats,
        qlen: TermCount,
        term: Option<&str>,
        wqf: TermCount,
        factor: f64,
    ) {
        let (termfreq, reltermfreq, wdf_bound) = term
            .and_then(|t| stats.term_stats(t))
            .map_or((0, 0, 0), |t| (t.termfreq, t.reltermfreq, t.wdf_upper_bound));
        self.init_common(stats, qlen, wqf, termfreq, reltermfreq, wdf_bound, factor);
    }

    fn init_from_freqs(
        &mut self,
        stats: &Stats,
        qlen: TermCount,
        freqs: &TermFreqs,
        wdf_upper_bound: TermCount,
        factor: f64,
    ) {
        self.init_common(
            stats,
            qlen,
            1,
            freqs.termfreq,
            freqs.reltermfreq,
            wdf_upper_bound,
            factor,
        );
    }

    fn sumpart(
        &self,
        wdf: TermCount,
        doclen: TermCount,
        _unique_terms: TermCount,
        _wdfdocmax: TermCount,
    ) -> f64 {
        let Some(init) = &self.state else { return 0.0 };
        if wdf == 0 {
            return 0.0;
        }
        let wdf = f64::from(wdf);
        let denom = wdf + self.k1 * ((1.0 - self.b) + self.b * self.normlen(init, doclen));
        init.termweight * (self.k1 + 1.0) * wdf / denom
    }

    fn maxpart(&self) -> f64 {
        let Some(init) = &self.state else { return 0.0 };
        // The bound is attained at maximum wdf in the shortest document.
        let wdf = if init.wdf_bound > 0 {
            f64::from(init.wdf_bound)
        } else {
            // No bound known; the saturating form tends to (k1 + 1).
            return init.termweight * (self.k1 + 1.0);
        };
        let denom = wdf + self.k1 * ((1.0 - self.b) + self.b * init.min_normlen_bound);
        init.termweight * (self.k1 + 1.0) * wdf / denom
    }

    fn sumextra(&self, doclen: TermCount, _unique_terms: TermCount) -> f64 {
        let Some(init) = &self.state else { return 0.0 };
        if self.k2 == 0.0 {
            return 0.0;
        }
        let normlen = self.normlen(init, doclen);
        init.factor * 2.0 * self.k2 * f64::from(init.qlen) / (1.0 + normlen)
    }

    fn maxextra(&self) -> f64 {
        let Some(init) = &self.state else { return 0.0 };
        if self.k2 == 0.0 {
            return 0.0;
        }
        init.factor * 2.0 * self.k2 * f64::from(init.qlen) / (1.0 + init.min_normlen_bound)
    }

    fn needs_doclength(&self) -> bool {
        (self.b != 0.0 && self.k1 != 0.0) || self.k2 != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stats() -> Stats {
        let mut stats = Stats::new();
        stats.add_collection(100, 10.0, 1000, (4, 30));
        stats.add_termfreq("mango", 5, 9, 3);
        stats
    }

    #[test]
    fn sumpart_never_exceeds_maxpart() {
        let stats = test_stats();
        let mut weight = Bm25Weight::default();
        weight.init(&stats, 2, Some("mango"), 1, 1.0);

        let max = weight.maxpart();
        assert!(max > 0.0);
        for wdf in 0..=3 {
            for doclen in [4, 10, 30] {
                let part = weight.sumpart(wdf, doclen, doclen, wdf);
                assert!(
                    part <= max + 1e-12,
                    "sumpart({wdf}, {doclen}) = {part} > maxpart {max}"
                );
            }
        }
    }

    #[test]
    fn higher_wdf_scores_higher() {
        let stats = test_stats();
        let mut weight = Bm25Weight::default();
        weight.init(&stats, 1, Some("mango"), 1, 1.0);
        let low = weight.sumpart(1, 10, 10, 1);
        let high = weight.sumpart(3, 10, 10, 3);
        assert!(high > low);
    }

    #[test]
    fn shorter_documents_score_higher() {
        let stats = test_stats();
        let mut weight = Bm25Weight::default();
        weight.init(&stats, 1, Some("mango"), 1, 1.0);
        let short = weight.sumpart(2, 5, 5, 2);
        let long = weight.sumpart(2, 25, 25, 2);
        assert!(short > long);
    }

    #[test]
    fn factor_scales_all_components() {
        let stats = test_stats();
        let mut plain = Bm25Weight::new(1.0, 1.0, 1.0, 0.5, 0.5);
        let mut scaled = Bm25Weight::new(1.0, 1.0, 1.0, 0.5, 0.5);
        plain.init(&stats, 2, Some("mango"), 1, 1.0);
        scaled.init(&stats, 2, Some("mango"), 1, 2.5);

        assert!((scaled.sumpart(2, 10, 10, 2) - 2.5 * plain.sumpart(2, 10, 10, 2)).abs() < 1e-9);
        assert!((scaled.maxpart() - 2.5 * plain.maxpart()).abs() < 1e-9);
        assert!((scaled.sumextra(10, 10) - 2.5 * plain.sumextra(10, 10)).abs() < 1e-9);
        assert!((scaled.maxextra() - 2.5 * plain.maxextra()).abs() < 1e-9);
    }

    #[test]
    fn sumextra_bounded_by_maxextra() {
        let stats = test_stats();
        let mut weight = Bm25Weight::new(1.0, 1.0, 1.0, 0.5, 0.5);
        weight.init(&stats, 3, None, 0, 1.0);
        let max = weight.maxextra();
        for doclen in [4, 10, 30] {
            assert!(weight.sumextra(doclen, doclen) <= max + 1e-12);
        }
    }
}
