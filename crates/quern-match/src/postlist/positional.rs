//! Positional filters: exact phrase, windowed phrase and NEAR.
//!
//! Each filter wraps the AND of its terms and vets every candidate
//! document by reading the terms' position lists. The vet hook lives in
//! [`CandidateTest`]; `SelectPostList` supplies the shared
//! advance-and-vet plumbing.

use std::sync::Arc;

use quern_weight::{DocCount, DocId, Position, Stats, TermCount, TermFreqs};

use crate::backend::{Database, PositionList};
use crate::postlist::{Advanced, Checked, DocStats, PostList, RecalcHint, swap_in};
use crate::MatchError;

/// A per-document acceptance test with a termfreq damping factor.
pub(crate) trait CandidateTest {
    /// Whether the candidate document passes the test.
    fn test_doc(&mut self, did: DocId) -> Result<bool, MatchError>;

    /// How much rarer than the source this filter's matches are assumed
    /// to be.
    fn termfreq_divisor(&self) -> DocCount;

    /// The filtered wdf at the last accepted document.
    fn wdf_hint(&self) -> TermCount;
}

/// Filters a source postlist through a [`CandidateTest`].
pub(crate) struct SelectPostList<T: CandidateTest> {
    /// The wrapped postlist (the AND of the filter's terms).
    source: Box<dyn PostList>,
    /// The acceptance test.
    test: T,
    /// Whether the source has been advanced at least once.
    started: bool,
    /// Shared recalculation signal.
    recalc: RecalcHint,
}

impl<T: CandidateTest> SelectPostList<T> {
    /// Wraps `source` with `test`.
    fn wrap(source: Box<dyn PostList>, test: T, recalc: RecalcHint) -> Self {
        Self {
            source,
            test,
            started: false,
            recalc,
        }
    }

    /// Vets the source's current position; true means stop advancing.
    fn vet(&mut self) -> Result<bool, MatchError> {
        if self.source.at_end() {
            return Ok(true);
        }
        self.test.test_doc(self.source.docid())
    }
}

impl<T: CandidateTest> PostList for SelectPostList<T> {
    fn termfreq_min(&self) -> DocCount {
        // In general every candidate may fail the test.
        0
    }

    fn termfreq_max(&self) -> DocCount {
        self.source.termfreq_max()
    }

    fn termfreq_est(&self) -> DocCount {
        self.source.termfreq_est() / self.test.termfreq_divisor()
    }

    fn termfreqs_est(&self, stats: &Stats) -> TermFreqs {
        let freqs = self.source.termfreqs_est(stats);
        let divisor = self.test.termfreq_divisor();
        TermFreqs::new(
            freqs.termfreq / divisor,
            freqs.reltermfreq / divisor,
            freqs.collfreq / u64::from(divisor),
        )
    }

    fn maxweight(&self) -> f64 {
        self.source.maxweight()
    }

    fn recalc_maxweight(&mut self) -> f64 {
        self.source.recalc_maxweight()
    }

    fn docid(&self) -> DocId {
        self.source.docid()
    }

    fn weight(&self, doc: &DocStats) -> f64 {
        self.source.weight(doc)
    }

    fn wdf(&self) -> TermCount {
        self.test.wdf_hint()
    }

    fn next(&mut self, w_min: f64) -> Result<Advanced, MatchError> {
        self.started = true;
        loop {
            let replacement = self.source.next(w_min)?;
            swap_in(&mut self.source, replacement, &self.recalc);
            if self.vet()? {
                return Ok(None);
            }
        }
    }

    fn skip_to(&mut self, did: DocId, w_min: f64) -> Result<Advanced, MatchError> {
        if !self.started || did > self.source.docid() {
            self.started = true;
            let replacement = self.source.skip_to(did, w_min)?;
            swap_in(&mut self.source, replacement, &self.recalc);
            if !self.vet()? {
                // The landing document failed the test; continue onwards.
                return self.next(w_min);
            }
        }
        Ok(None)
    }

    fn check(&mut self, did: DocId, w_min: f64) -> Result<Checked, MatchError> {
        self.started = true;
        let checked = self.source.check(did, w_min)?;
        swap_in(&mut self.source, checked.replacement, &self.recalc);
        if !checked.valid {
            return Ok(Checked::not_valid());
        }
        let valid = self.vet()?;
        Ok(if valid {
            Checked::valid()
        } else {
            Checked::not_valid()
        })
    }

    fn at_end(&self) -> bool {
        self.source.at_end()
    }

    fn count_matching_subqs(&self) -> TermCount {
        self.source.count_matching_subqs()
    }
}

/// Opens the position lists for a filter's terms at one document.
///
/// Returns `None` (no possible match) if any term has no positions there.
fn open_position_lists(
    db: &Arc<dyn Database>,
    terms: &[String],
    did: DocId,
) -> Result<Option<Vec<(PositionList, usize)>>, MatchError> {
    let mut lists = Vec::with_capacity(terms.len());
    for (index, term) in terms.iter().enumerate() {
        let list = db.open_position_list(did, term)?;
        if list.is_empty() {
            return Ok(None);
        }
        lists.push((list, index));
    }
    Ok(Some(lists))
}

/// The smallest position-list length, an upper bound on the filtered wdf.
fn min_len(lists: &[(PositionList, usize)]) -> TermCount {
    lists
        .iter()
        .map(|(list, _)| list.len() as TermCount)
        .min()
        .unwrap_or(0)
}

/// Acceptance test for exact phrases: every term at its offset.
struct ExactPhraseTest {
    /// The shard, for position lists.
    db: Arc<dyn Database>,
    /// The phrase terms in order.
    terms: Vec<String>,
    /// wdf estimate from the last accepted document.
    wdf_hint: TermCount,
}

impl CandidateTest for ExactPhraseTest {
    fn test_doc(&mut self, did: DocId) -> Result<bool, MatchError> {
        let Some(mut lists) = open_position_lists(&self.db, &self.terms, did)? else {
            return Ok(false);
        };
        self.wdf_hint = min_len(&lists);
        // Drive from the rarest list; the others only get skipped to the
        // positions the driver dictates, which rise monotonically.
        lists.sort_by_key(|(list, _)| list.len());
        let (driver, rest) = lists.split_first_mut().unwrap();
        let driver_offset = driver.1 as i64;
        while driver.0.next_pos() {
            let base = i64::from(driver.0.position()) - driver_offset;
            let mut all_present = true;
            for (list, offset) in rest.iter_mut() {
                let required = base + *offset as i64;
                if required < 0 {
                    all_present = false;
                    break;
                }
                let required = required as Position;
                if !list.skip_to(required) {
                    // This term has no positions left; with the driver's
                    // base only increasing, no later window can work.
                    return Ok(false);
                }
                if list.position() != required {
                    all_present = false;
                    break;
                }
            }
            if all_present {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn termfreq_divisor(&self) -> DocCount {
        // Exact phrases are rarer than loose phrases or proximity.
        4
    }

    fn wdf_hint(&self) -> TermCount {
        self.wdf_hint
    }
}

/// Acceptance test for windowed phrases: terms in order within a window.
struct PhraseTest {
    /// The shard, for position lists.
    db: Arc<dyn Database>,
    /// The phrase terms in order.
    terms: Vec<String>,
    /// Window size in positions.
    window: Position,
    /// wdf estimate from the last accepted document.
    wdf_hint: TermCount,
}

impl CandidateTest for PhraseTest {
    fn test_doc(&mut self, did: DocId) -> Result<bool, MatchError> {
        let Some(mut lists) = open_position_lists(&self.db, &self.terms, did)? else {
            return Ok(false);
        };
        self.wdf_hint = min_len(&lists);
        let n_terms = lists.len() as u64;
        let (first, rest) = lists.split_first_mut().unwrap();
        if !first.0.next_pos() {
            return Ok(false);
        }
        loop {
            let base = u64::from(first.0.position());
            let mut pos = base;
            let mut window_end = base;
            let mut matched = true;
            for (index, (list, _)) in rest.iter_mut().enumerate() {
                if !list.skip_to((pos + 1) as Position) {
                    return Ok(false);
                }
                pos = u64::from(list.position());
                // Later terms need at least one slot each after this one.
                window_end = pos + (n_terms - (index as u64 + 1));
                if window_end - base > u64::from(self.window) {
                    matched = false;
                    break;
                }
            }
            if matched {
                return Ok(true);
            }
            // Move the window start to the first position that could fit
            // the offending term.
            let restart = window_end - u64::from(self.window);
            if !first.0.skip_to(restart as Position) {
                return Ok(false);
            }
        }
    }

    fn termfreq_divisor(&self) -> DocCount {
        3
    }

    fn wdf_hint(&self) -> TermCount {
        self.wdf_hint
    }
}

/// Acceptance test for NEAR: all terms within a window, any order, at
/// distinct positions.
struct NearTest {
    /// The shard, for position lists.
    db: Arc<dyn Database>,
    /// The terms.
    terms: Vec<String>,
    /// Window size in positions.
    window: Position,
    /// wdf estimate from the last accepted document.
    wdf_hint: TermCount,
}

impl CandidateTest for NearTest {
    fn test_doc(&mut self, did: DocId) -> Result<bool, MatchError> {
        let Some(mut lists) = open_position_lists(&self.db, &self.terms, did)? else {
            return Ok(false);
        };
        self.wdf_hint = min_len(&lists);
        // Start every list on its first position.
        for (list, _) in &mut lists {
            if !list.next_pos() {
                return Ok(false);
            }
        }
        loop {
            let lo = lists.iter().map(|(l, _)| l.position()).min().unwrap();
            let hi = lists.iter().map(|(l, _)| l.position()).max().unwrap();
            if hi - lo < self.window {
                // Within the window; now require distinct positions, so a
                // term listed twice needs two separate occurrences.
                let mut duplicate_at: Option<Position> = None;
                let mut seen: Vec<Position> =
                    lists.iter().map(|(l, _)| l.position()).collect();
                seen.sort_unstable();
                for pair in seen.windows(2) {
                    if pair[0] == pair[1] {
                        duplicate_at = Some(pair[0]);
                        break;
                    }
                }
                let Some(dup) = duplicate_at else {
                    return Ok(true);
                };
                // Advance one of the duplicated lists and retest.
                let entry = lists
                    .iter_mut()
                    .find(|(l, _)| l.position() == dup)
                    .unwrap();
                if !entry.0.next_pos() {
                    return Ok(false);
                }
            } else {
                // Pull the trailing list up to where a window ending at
                // `hi` could start.
                let target = hi - self.window + 1;
                let entry = lists
                    .iter_mut()
                    .find(|(l, _)| l.position() == lo)
                    .unwrap();
                if !entry.0.skip_to(target) {
                    return Ok(false);
                }
            }
        }
    }

    fn termfreq_divisor(&self) -> DocCount {
        2
    }

    fn wdf_hint(&self) -> TermCount {
        self.wdf_hint
    }
}

/// Exact-phrase filter over `source`.
pub(crate) struct ExactPhrasePostList;

impl ExactPhrasePostList {
    /// Wraps `source` so only documents containing the exact phrase pass.
    pub(crate) fn new(
        source: Box<dyn PostList>,
        db: Arc<dyn Database>,
        terms: Vec<String>,
        recalc: RecalcHint,
    ) -> Box<dyn PostList> {
        Box::new(SelectPostList::wrap(
            source,
            ExactPhraseTest {
                db,
                terms,
                wdf_hint: 0,
            },
            recalc,
        ))
    }
}

/// Windowed-phrase filter over `source`.
pub(crate) struct PhrasePostList;

impl PhrasePostList {
    /// Wraps `source` so only documents with the terms in order inside
    /// `window` pass.
    pub(crate) fn new(
        source: Box<dyn PostList>,
        db: Arc<dyn Database>,
        terms: Vec<String>,
        window: Position,
        recalc: RecalcHint,
    ) -> Box<dyn PostList> {
        Box::new(SelectPostList::wrap(
            source,
            PhraseTest {
                db,
                terms,
                window,
                wdf_hint: 0,
            },
            recalc,
        ))
    }
}

/// Proximity filter over `source`.
pub(crate) struct NearPostList;

impl NearPostList {
    /// Wraps `source` so only documents with all terms inside `window`
    /// pass.
    pub(crate) fn new(
        source: Box<dyn PostList>,
        db: Arc<dyn Database>,
        terms: Vec<String>,
        window: Position,
        recalc: RecalcHint,
    ) -> Box<dyn PostList> {
        Box::new(SelectPostList::wrap(
            source,
            NearTest {
                db,
                terms,
                window,
                wdf_hint: 0,
            },
            recalc,
        ))
    }
}
