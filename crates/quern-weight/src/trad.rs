//! The traditional probabilistic weighting scheme.

use crate::weight::{pack_doubles, rsj_termweight, unpack_doubles};
use crate::{Stats, TermCount, TermFreqs, Weight, WeightError};

/// The pre-BM25 probabilistic formula with a single `k` parameter.
///
/// Equivalent to BM25 with `k1 = k`, `b = 1` and the other parameters 0:
/// the score is `termweight * wdf / (k * normlen + wdf)` and there is no
/// term-independent component.
#[derive(Debug, Clone)]
pub struct TradWeight {
    /// Document length sensitivity.
    k: f64,
    /// State bound by `init`.
    state: Option<Init>,
}

/// Values computed once the scheme is bound to stats and a term.
#[derive(Debug, Clone)]
struct Init {
    /// Term weight including the scale factor.
    termweight: f64,
    /// 1 / average document length (0 when unknown).
    len_scale: f64,
    /// Upper bound on the term's wdf in any document.
    wdf_bound: TermCount,
    /// Smallest normalised length any document can have.
    min_normlen_bound: f64,
}

impl Default for TradWeight {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl TradWeight {
    /// Creates a scheme with an explicit `k`; negative values clamp to 0.
    pub fn new(k: f64) -> Self {
        Self {
            k: k.max(0.0),
            state: None,
        }
    }

    /// Reconstructs a scheme from [`Weight::serialise`] output.
    pub fn unserialise(data: &[u8]) -> Result<Self, WeightError> {
        let [k] = unpack_doubles(data)?;
        Ok(Self::new(k))
    }

    /// Finishes initialisation from raw term statistics.
    fn init_common(
        &mut self,
        stats: &Stats,
        termfreq: u32,
        reltermfreq: u32,
        wdf_bound: TermCount,
        factor: f64,
    ) {
        let len_scale = if stats.average_length > 0.0 {
            1.0 / stats.average_length
        } else {
            0.0
        };
        let min_normlen_bound = if stats.doclength_lower_bound > 0 {
            f64::from(stats.doclength_lower_bound) * len_scale
        } else {
            0.0
        };
        self.state = Some(Init {
            termweight: rsj_termweight(stats, termfreq, reltermfreq) * factor,
            len_scale,
            wdf_bound,
            min_normlen_bound,
        });
    }
}

impl Weight for TradWeight {
    fn name(&self) -> &'static str {
        "trad"
    }

    fn clone_boxed(&self) -> Box<dyn Weight> {
        Box::new(self.clone())
    }

    fn serialise(&self) -> Vec<u8> {
        pack_doubles(&[self.k])
    }

    fn init(
        &mut self,
        stats: &Stats,
        _qlen: TermCount,
        term: Option<&str>,
        _wqf: TermCount,
        factor: f64,
    ) {
        let (termfreq, reltermfreq, wdf_bound) = term
            .and_then(|t| stats.term_stats(t))
            .map_or((0, 0, 0), |t| (t.termfreq, t.reltermfreq, t.wdf_upper_bound));
        self.init_common(stats, termfreq, reltermfreq, wdf_bound, factor);
    }

    fn init_from_freqs(
        &mut self,
        stats: &Stats,
        _qlen: TermCount,
        freqs: &TermFreqs,
        wdf_upper_bound: TermCount,
        factor: f64,
    ) {
        self.init_common(stats, freqs.termfreq, freqs.reltermfreq, wdf_upper_bound, factor);
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
        let normlen = f64::from(doclen) * init.len_scale;
        init.termweight * wdf / (self.k * normlen + wdf)
    }

    fn maxpart(&self) -> f64 {
        let Some(init) = &self.state else { return 0.0 };
        if self.k == 0.0 || init.wdf_bound == 0 {
            return init.termweight;
        }
        let wdf = f64::from(init.wdf_bound);
        init.termweight * wdf / (self.k * init.min_normlen_bound + wdf)
    }

    fn sumextra(&self, _doclen: TermCount, _unique_terms: TermCount) -> f64 {
        0.0
    }

    fn maxextra(&self) -> f64 {
        0.0
    }

    fn needs_doclength(&self) -> bool {
        self.k != 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sumpart_bounded_by_maxpart() {
        let mut stats = Stats::new();
        stats.add_collection(50, 8.0, 400, (2, 20));
        stats.add_termfreq("pear", 4, 6, 2);

        let mut weight = TradWeight::default();
        weight.init(&stats, 1, Some("pear"), 1, 1.0);
        let max = weight.maxpart();
        for wdf in 0..=2 {
            for doclen in [2, 8, 20] {
                assert!(weight.sumpart(wdf, doclen, doclen, wdf) <= max + 1e-12);
            }
        }
    }
}
