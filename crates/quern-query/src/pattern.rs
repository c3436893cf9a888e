//! Wildcard pattern matching and expansion policy types.

/// How a wildcard or edit-distance expansion behaves when it produces more
/// terms than the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpansionLimit {
    /// Exceeding the limit is an error.
    #[default]
    Error,
    /// Stop expanding once the limit is reached.
    First,
    /// Expand fully, then keep the most frequent terms.
    MostFrequent,
}

/// Which operator combines the terms an expansion produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpansionCombiner {
    /// Weighted union of the expanded terms.
    #[default]
    Or,
    /// Highest-scoring expanded term wins per document.
    Max,
    /// The expansion scores as a single virtual term.
    Synonym,
}

/// A wildcard pattern over index terms.
///
/// `*` matches any run of characters (including none) and `?` matches
/// exactly one character. A pattern containing neither is a prefix match,
/// which is the common "trailing star implied" form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    /// The raw pattern text.
    pattern: String,
    /// Byte length of the literal prefix before the first wildcard.
    fixed_prefix_len: usize,
    /// Whether the pattern contains any wildcard characters at all.
    has_wildcards: bool,
}

impl WildcardPattern {
    /// Creates a pattern, precomputing its fixed literal prefix.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let fixed_prefix_len = pattern
            .find(['*', '?'])
            .unwrap_or(pattern.len());
        let has_wildcards = fixed_prefix_len != pattern.len();
        Self {
            pattern,
            fixed_prefix_len,
            has_wildcards,
        }
    }

    /// The raw pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The literal prefix every matching term must start with.
    ///
    /// Expansion iterates the term dictionary from this prefix.
    pub fn fixed_prefix(&self) -> &str {
        &self.pattern[..self.fixed_prefix_len]
    }

    /// Tests a term which is already known to start with the fixed prefix.
    pub fn test_prefix_known(&self, term: &str) -> bool {
        if !self.has_wildcards {
            // Without wildcard characters the pattern is a prefix match and
            // the prefix check already succeeded.
            return true;
        }
        let tail = &term[self.fixed_prefix_len.min(term.len())..];
        let pattern_tail = &self.pattern[self.fixed_prefix_len..];
        glob_match(pattern_tail, tail)
    }

    /// Tests an arbitrary term against the whole pattern.
    pub fn test(&self, term: &str) -> bool {
        term.starts_with(self.fixed_prefix()) && self.test_prefix_known(term)
    }
}

/// Matches `pattern` (which may contain `*` and `?`) against `text`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    glob_match_at(&pat, &txt)
}

/// Recursive matcher over char slices.
fn glob_match_at(pat: &[char], txt: &[char]) -> bool {
    match pat.split_first() {
        None => txt.is_empty(),
        Some(('*', rest)) => {
            // Try every possible span for the star, shortest first.
            (0..=txt.len()).any(|skip| glob_match_at(rest, &txt[skip..]))
        }
        Some(('?', rest)) => txt
            .split_first()
            .is_some_and(|(_, txt_rest)| glob_match_at(rest, txt_rest)),
        Some((&literal, rest)) => txt
            .split_first()
            .is_some_and(|(&head, txt_rest)| head == literal && glob_match_at(rest, txt_rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_pattern_is_prefix_match() {
        let pattern = WildcardPattern::new("man");
        assert_eq!(pattern.fixed_prefix(), "man");
        assert!(pattern.test("man"));
        assert!(pattern.test("mango"));
        assert!(!pattern.test("max"));
    }

    #[test]
    fn star_matches_any_run() {
        let pattern = WildcardPattern::new("m*go");
        assert_eq!(pattern.fixed_prefix(), "m");
        assert!(pattern.test("mango"));
        assert!(pattern.test("mgo"));
        assert!(!pattern.test("mangos"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let pattern = WildcardPattern::new("gr?y");
        assert!(pattern.test("gray"));
        assert!(pattern.test("grey"));
        assert!(!pattern.test("gry"));
        assert!(!pattern.test("graey"));
    }

    #[test]
    fn leading_wildcard_has_empty_prefix() {
        let pattern = WildcardPattern::new("*berry");
        assert_eq!(pattern.fixed_prefix(), "");
        assert!(pattern.test("strawberry"));
        assert!(pattern.test("berry"));
        assert!(!pattern.test("berries"));
    }
}
