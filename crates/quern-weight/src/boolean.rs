//! The boolean (no-op) weighting scheme.

use crate::{Stats, TermCount, TermFreqs, Weight, WeightError};

/// Assigns weight 0 to every document, so ranking falls back to docid
/// order (or the configured sort keys).
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolWeight;

impl BoolWeight {
    /// Reconstructs the scheme; it has no parameters.
    pub fn unserialise(data: &[u8]) -> Result<Self, WeightError> {
        if !data.is_empty() {
            return Err(WeightError::corrupt("bool weight takes no parameters"));
        }
        Ok(Self)
    }
}

impl Weight for BoolWeight {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn clone_boxed(&self) -> Box<dyn Weight> {
        Box::new(*self)
    }

    fn serialise(&self) -> Vec<u8> {
        Vec::new()
    }

    fn init(
        &mut self,
        _stats: &Stats,
        _qlen: TermCount,
        _term: Option<&str>,
        _wqf: TermCount,
        _factor: f64,
    ) {
    }

    fn init_from_freqs(
        &mut self,
        _stats: &Stats,
        _qlen: TermCount,
        _freqs: &TermFreqs,
        _wdf_upper_bound: TermCount,
        _factor: f64,
    ) {
    }

    fn sumpart(
        &self,
        _wdf: TermCount,
        _doclen: TermCount,
        _unique_terms: TermCount,
        _wdfdocmax: TermCount,
    ) -> f64 {
        0.0
    }

    fn maxpart(&self) -> f64 {
        0.0
    }

    fn sumextra(&self, _doclen: TermCount, _unique_terms: TermCount) -> f64 {
        0.0
    }

    fn maxextra(&self) -> f64 {
        0.0
    }

    fn needs_doclength(&self) -> bool {
        false
    }
}
