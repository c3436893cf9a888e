//! End-to-end match tests over the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use quern_match::{
    Database, DocInput, Document, Enquire, KeyMaker, MSet, MatchDecider, MatchOptions, MatchSpy,
    MemoryDatabase, RSet, SortBy,
};
use quern_query::Query;
use quern_weight::BoolWeight;

/// The basic three-document fruit corpus.
fn fruit_db() -> Arc<MemoryDatabase> {
    let mut db = MemoryDatabase::new();
    db.add_text("ripe mango");
    db.add_text("green mango");
    db.add_text("ripe apple");
    Arc::new(db)
}

/// Runs `query` over `db` with default settings.
fn run(db: Arc<MemoryDatabase>, query: Query) -> MSet {
    let mut enquire = Enquire::new(db);
    enquire.set_query(query);
    enquire.mset(0, 10, None).expect("match succeeds")
}

/// Asserts the shared MSet invariants.
fn assert_bounds(mset: &MSet) {
    assert!(
        mset.matches_lower_bound <= mset.matches_estimated,
        "lower {} > estimate {}",
        mset.matches_lower_bound,
        mset.matches_estimated
    );
    assert!(
        mset.matches_estimated <= mset.matches_upper_bound,
        "estimate {} > upper {}",
        mset.matches_estimated,
        mset.matches_upper_bound
    );
    assert!(mset.max_attained <= mset.max_possible + 1e-9);
    for item in &mset.items {
        assert!(item.weight <= mset.max_possible + 1e-9);
    }
}

#[test]
fn simple_and_matches_one_document() {
    let mset = run(
        fruit_db(),
        Query::and(vec![Query::term("ripe"), Query::term("mango")]),
    );
    assert_eq!(mset.len(), 1);
    assert_eq!(mset.items[0].did, 1);
    assert!(mset.items[0].weight > 0.0);
    assert_bounds(&mset);
}

#[test]
fn weighted_or_ranks_all_matches() {
    let mset = run(
        fruit_db(),
        Query::or(vec![Query::term("mango"), Query::term("apple")]),
    );
    assert_eq!(mset.len(), 3);
    assert_eq!(mset.matches_upper_bound, 3);
    for pair in mset.items.windows(2) {
        assert!(
            pair[0].weight > pair[1].weight
                || (pair[0].weight == pair[1].weight && pair[0].did < pair[1].did),
            "items out of order: {pair:?}"
        );
    }
    // "apple" is the rarer term, so its document outranks the mango ones.
    assert_eq!(mset.items[0].did, 3);
    assert_bounds(&mset);
}

#[test]
fn exact_phrase_requires_adjacency_in_order() {
    let mut db = MemoryDatabase::new();
    db.add_text("ripe mango");
    db.add_text("green mango");
    db.add_text("ripe apple");
    db.add_text("mango ripe");
    let db = Arc::new(db);

    let phrase = run(
        Arc::clone(&db),
        Query::phrase(2, vec![Query::term("ripe"), Query::term("mango")]),
    );
    let dids: Vec<u32> = phrase.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1], "exact phrase must respect term order");

    // NEAR accepts either order within the window.
    let near = run(
        Arc::clone(&db),
        Query::near(2, vec![Query::term("ripe"), Query::term("mango")]),
    );
    let mut dids: Vec<u32> = near.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![1, 4]);
}

#[test]
fn phrase_window_allows_gaps() {
    let mut db = MemoryDatabase::new();
    db.add_text("ripe and very tasty mango");
    db.add_text("mango then eventually ripe");
    let db = Arc::new(db);

    let tight = run(
        Arc::clone(&db),
        Query::phrase(2, vec![Query::term("ripe"), Query::term("mango")]),
    );
    assert!(tight.is_empty());

    let loose = run(
        Arc::clone(&db),
        Query::phrase(5, vec![Query::term("ripe"), Query::term("mango")]),
    );
    let dids: Vec<u32> = loose.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1], "windowed phrase still requires order");
}

#[test]
fn phrase_degrades_to_and_without_positions() {
    let mut db = MemoryDatabase::new();
    // Terms added without positional data.
    for text in ["ripe mango", "mango ripe", "mango alone"] {
        let mut input = DocInput::from_text(text);
        for term in &mut input.terms {
            term.positions.clear();
        }
        db.add_document(input);
    }
    let mset = run(
        Arc::new(db),
        Query::phrase(2, vec![Query::term("ripe"), Query::term("mango")]),
    );
    // Both docs containing the two terms match once positions are gone.
    assert_eq!(mset.len(), 2);
}

/// Builds the collapse corpus: descending weights, keys [a, a, b, a, b].
fn collapse_db() -> Arc<MemoryDatabase> {
    let mut db = MemoryDatabase::new();
    let keys = ["a", "a", "b", "a", "b"];
    for (index, key) in keys.iter().enumerate() {
        // Longer documents weigh less under BM25, giving strictly
        // descending weights by docid.
        let mut text = "fruit".to_string();
        for _ in 0..index {
            text.push_str(" filler");
        }
        db.add_document(DocInput::from_text(&text).with_value(0, *key));
    }
    Arc::new(db)
}

#[test]
fn collapsing_keeps_best_per_key_and_counts_drops() {
    let mut enquire = Enquire::new(collapse_db());
    enquire.set_query(Query::term("fruit"));
    enquire.set_options(MatchOptions::new().collapse(0, 1));
    let mset = enquire.mset(0, 10, None).expect("match succeeds");

    let dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1, 3]);
    let counts: Vec<u32> = mset.items.iter().map(|item| item.collapse_count).collect();
    assert_eq!(counts, vec![2, 1]);
    assert_bounds(&mset);
    assert!(mset.matches_upper_bound <= 3);
}

#[test]
fn collapse_max_two_keeps_two_per_key() {
    let mut enquire = Enquire::new(collapse_db());
    enquire.set_query(Query::term("fruit"));
    enquire.set_options(MatchOptions::new().collapse(0, 2));
    let mset = enquire.mset(0, 10, None).expect("match succeeds");

    let dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1, 2, 3, 5]);
}

#[test]
fn percent_cutoff_drops_weak_matches() {
    let mut db = MemoryDatabase::new();
    db.add_text("gold dust");
    db.add_text("gold dust");
    db.add_text("dust");
    db.add_text("dust");
    let db = Arc::new(db);

    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::or(vec![Query::term("gold"), Query::term("dust")]));
    enquire.set_options(MatchOptions::new().percent_cutoff(50));
    let mset = enquire.mset(0, 10, None).expect("match succeeds");

    let mut dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![1, 2]);
    // Every survivor clears the percentage line.
    for item in &mset.items {
        assert!(mset.convert_to_percent(item.weight) >= 50);
    }
    assert_bounds(&mset);
}

#[test]
fn weight_cutoff_filters_low_scores() {
    let db = fruit_db();
    let reference = run(Arc::clone(&db), Query::or(vec![
        Query::term("mango"),
        Query::term("apple"),
    ]));
    let threshold = (reference.items[0].weight + reference.items[2].weight) / 2.0;

    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::or(vec![Query::term("mango"), Query::term("apple")]));
    enquire.set_options(MatchOptions::new().weight_cutoff(threshold));
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    assert!(!mset.is_empty());
    assert!(mset.len() < 3);
    for item in &mset.items {
        assert!(item.weight >= threshold);
    }
}

#[test]
fn and_not_excludes_right_side() {
    let mset = run(
        fruit_db(),
        Query::and_not(Query::term("ripe"), Query::term("apple")),
    );
    let dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1]);
}

#[test]
fn and_maybe_keeps_left_set_but_reweights() {
    let db = fruit_db();
    let plain = run(Arc::clone(&db), Query::term("mango"));
    let boosted = run(
        Arc::clone(&db),
        Query::and_maybe(Query::term("mango"), Query::term("ripe")),
    );

    let mut plain_dids: Vec<u32> = plain.items.iter().map(|item| item.did).collect();
    let mut boosted_dids: Vec<u32> = boosted.items.iter().map(|item| item.did).collect();
    plain_dids.sort_unstable();
    boosted_dids.sort_unstable();
    assert_eq!(plain_dids, boosted_dids, "AND_MAYBE must not change the match set");

    // Document 1 contains "ripe" too, so it gains weight and wins.
    assert_eq!(boosted.items[0].did, 1);
    assert!(boosted.items[0].weight > plain.items[0].weight);
}

#[test]
fn filter_restricts_without_weighting() {
    let db = fruit_db();
    let filtered = run(
        Arc::clone(&db),
        Query::filter(Query::term("mango"), Query::term("ripe")),
    );
    let dids: Vec<u32> = filtered.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1]);

    // The filter side must contribute no weight.
    let plain = run(Arc::clone(&db), Query::term("mango"));
    let plain_weight = plain
        .items
        .iter()
        .find(|item| item.did == 1)
        .expect("doc 1 matches")
        .weight;
    assert!((filtered.items[0].weight - plain_weight).abs() < 1e-9);
}

#[test]
fn xor_matches_odd_parity() {
    let mut db = MemoryDatabase::new();
    db.add_text("alpha");
    db.add_text("beta");
    db.add_text("alpha beta");
    db.add_text("gamma");
    let mset = run(
        Arc::new(db),
        Query::xor(vec![Query::term("alpha"), Query::term("beta")]),
    );
    let mut dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![1, 2]);
}

#[test]
fn max_scores_best_branch() {
    let db = fruit_db();
    let or_mset = run(Arc::clone(&db), Query::or(vec![
        Query::term("ripe"),
        Query::term("mango"),
    ]));
    let max_mset = run(Arc::clone(&db), Query::max(vec![
        Query::term("ripe"),
        Query::term("mango"),
    ]));

    assert_eq!(or_mset.len(), max_mset.len());
    // Document 1 matches both branches: MAX takes the better branch
    // rather than the sum.
    let or_doc1 = or_mset.items.iter().find(|i| i.did == 1).unwrap().weight;
    let max_doc1 = max_mset.items.iter().find(|i| i.did == 1).unwrap().weight;
    assert!(max_doc1 < or_doc1);
}

#[test]
fn synonym_scores_as_one_virtual_term() {
    let mut db = MemoryDatabase::new();
    db.add_text("colour swatch");
    db.add_text("color swatch");
    db.add_text("swatch");
    let db = Arc::new(db);

    let mset = run(
        Arc::clone(&db),
        Query::synonym(vec![Query::term("colour"), Query::term("color")]),
    );
    assert_eq!(mset.len(), 2);
    // Both spellings expand to the same virtual term, so both documents
    // score identically.
    assert!((mset.items[0].weight - mset.items[1].weight).abs() < 1e-9);
}

#[test]
fn scale_weight_multiplies_scores() {
    let db = fruit_db();
    let plain = run(Arc::clone(&db), Query::term("mango"));
    let scaled = run(
        Arc::clone(&db),
        Query::scale(2.5, Query::term("mango")).unwrap(),
    );
    assert_eq!(plain.len(), scaled.len());
    for (a, b) in plain.items.iter().zip(&scaled.items) {
        assert_eq!(a.did, b.did);
        assert!((b.weight - 2.5 * a.weight).abs() < 1e-9);
    }
}

#[test]
fn match_all_returns_every_document_unweighted() {
    let mset = run(fruit_db(), Query::MatchAll);
    assert_eq!(mset.len(), 3);
    for item in &mset.items {
        assert_eq!(item.weight, 0.0);
    }
    assert_eq!(mset.matches_lower_bound, 3);
    assert_eq!(mset.matches_upper_bound, 3);
}

#[test]
fn elite_set_keeps_best_subqueries() {
    let mut db = MemoryDatabase::new();
    db.add_text("rare pearl");
    db.add_text("common word here");
    db.add_text("common word there");
    db.add_text("common word everywhere");
    let db = Arc::new(db);

    let mset = run(
        Arc::clone(&db),
        Query::elite_set(
            1,
            vec![Query::term("pearl"), Query::term("common")],
        )
        .unwrap(),
    );
    // The rarer subquery has the higher maxweight, so only its postings
    // survive the selection.
    let dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1]);
}

#[test]
fn wildcard_expands_to_matching_terms() {
    let mut db = MemoryDatabase::new();
    db.add_text("mango grove");
    db.add_text("mangrove swamp");
    db.add_text("maple tree");
    let db = Arc::new(db);

    let mset = run(Arc::clone(&db), Query::wildcard("mang"));
    let mut dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![1, 2]);

    let with_star = run(Arc::clone(&db), Query::wildcard("ma*e"));
    let mut dids: Vec<u32> = with_star.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    // "mangrove" and "maple" end in 'e'; "tree" doesn't start with "ma".
    assert_eq!(dids, vec![2, 3]);
}

#[test]
fn wildcard_expansion_limit_modes() {
    let mut db = MemoryDatabase::new();
    db.add_text("mango mango mango");
    db.add_text("mangrove");
    db.add_text("mangle");
    let db = Arc::new(db);

    // ERROR mode refuses oversize expansions.
    let mut enquire = Enquire::new(Arc::clone(&db) as Arc<dyn Database>);
    let query = match Query::wildcard("mang") {
        Query::Wildcard { pattern, .. } => Query::Wildcard {
            pattern,
            max_expansion: 2,
            limit: quern_query::ExpansionLimit::Error,
            combiner: quern_query::ExpansionCombiner::Or,
        },
        other => other,
    };
    enquire.set_query(query);
    let err = enquire.mset(0, 10, None).unwrap_err();
    assert!(matches!(err, quern_match::MatchError::Wildcard(_)));

    // FIRST mode stops quietly at the limit.
    let query = match Query::wildcard("mang") {
        Query::Wildcard { pattern, .. } => Query::Wildcard {
            pattern,
            max_expansion: 2,
            limit: quern_query::ExpansionLimit::First,
            combiner: quern_query::ExpansionCombiner::Or,
        },
        other => other,
    };
    let mut enquire = Enquire::new(Arc::clone(&db) as Arc<dyn Database>);
    enquire.set_query(query);
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    assert_eq!(mset.len(), 2);

    // MOST_FREQUENT keeps the most frequent term.
    let query = match Query::wildcard("mang") {
        Query::Wildcard { pattern, .. } => Query::Wildcard {
            pattern,
            max_expansion: 1,
            limit: quern_query::ExpansionLimit::MostFrequent,
            combiner: quern_query::ExpansionCombiner::Or,
        },
        other => other,
    };
    let mut enquire = Enquire::new(Arc::clone(&db) as Arc<dyn Database>);
    enquire.set_query(query);
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    let dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    // All terms have termfreq 1; "mangle" sorts first among equals, but
    // whichever survives, exactly one document matches.
    assert_eq!(dids.len(), 1);
}

#[test]
fn edit_distance_expands_to_close_terms() {
    let mut db = MemoryDatabase::new();
    db.add_text("mango");
    db.add_text("tango");
    db.add_text("banjo");
    let db = Arc::new(db);

    let mset = run(Arc::clone(&db), Query::edit_distance("mango", 1));
    let mut dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![1, 2], "tango is one substitution away");
}

#[test]
fn value_range_filters_documents() {
    let mut db = MemoryDatabase::new();
    db.add_document(DocInput::from_text("one").with_value(1, "b"));
    db.add_document(DocInput::from_text("two").with_value(1, "f"));
    db.add_document(DocInput::from_text("three").with_value(1, "k"));
    db.add_document(DocInput::from_text("four"));
    let db = Arc::new(db);

    let range = run(
        Arc::clone(&db),
        Query::ValueRange {
            slot: 1,
            begin: "a".into(),
            end: "g".into(),
        },
    );
    let mut dids: Vec<u32> = range.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![1, 2]);

    let ge = run(
        Arc::clone(&db),
        Query::ValueGe {
            slot: 1,
            limit: "f".into(),
        },
    );
    let mut dids: Vec<u32> = ge.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![2, 3]);

    let le = run(
        Arc::clone(&db),
        Query::ValueLe {
            slot: 1,
            limit: "e".into(),
        },
    );
    let dids: Vec<u32> = le.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1]);
}

#[test]
fn sort_by_value_orders_by_slot() {
    let mut db = MemoryDatabase::new();
    db.add_document(DocInput::from_text("pear fruit").with_value(2, "delta"));
    db.add_document(DocInput::from_text("pear fruit").with_value(2, "alpha"));
    db.add_document(DocInput::from_text("pear fruit").with_value(2, "charlie"));
    let db = Arc::new(db);

    let mut enquire = Enquire::new(Arc::clone(&db) as Arc<dyn Database>);
    enquire.set_query(Query::term("pear"));
    enquire.set_options(MatchOptions::new().sort_by_value(2, true, SortBy::Val));
    let forward = enquire.mset(0, 10, None).expect("match succeeds");
    let dids: Vec<u32> = forward.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![2, 3, 1]);

    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("pear"));
    enquire.set_options(MatchOptions::new().sort_by_value(2, false, SortBy::Val));
    let backward = enquire.mset(0, 10, None).expect("match succeeds");
    let dids: Vec<u32> = backward.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1, 3, 2]);
}

/// Sorts by the reversed document payload.
struct ReverseKey;

impl KeyMaker for ReverseKey {
    fn make_key(&self, doc: &Document) -> String {
        doc.data.chars().rev().collect()
    }
}

#[test]
fn key_maker_overrides_slot_sort() {
    let mut db = MemoryDatabase::new();
    db.add_text("pear ab");
    db.add_text("pear ba");
    let db = Arc::new(db);

    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("pear"));
    let mut options = MatchOptions::new().sort_by_value(0, true, SortBy::Val);
    options.key_maker = Some(Box::new(ReverseKey));
    enquire.set_options(options);
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    // Reversed payloads: "ba raep" vs "ab raep" - doc 2 sorts first.
    assert_eq!(mset.items[0].did, 2);
}

/// Accepts only documents whose payload contains "keep".
struct KeepDecider;

impl MatchDecider for KeepDecider {
    fn accept(&self, doc: &Document) -> bool {
        doc.data.contains("keep")
    }
}

#[test]
fn decider_filters_and_adjusts_bounds() {
    let mut db = MemoryDatabase::new();
    db.add_text("pear keep");
    db.add_text("pear drop");
    db.add_text("pear keep too");
    let db = Arc::new(db);

    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("pear"));
    let mut options = MatchOptions::new();
    options.decider = Some(Box::new(KeepDecider));
    enquire.set_options(options);
    let mset = enquire.mset(0, 10, None).expect("match succeeds");

    let mut dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    dids.sort_unstable();
    assert_eq!(dids, vec![1, 3]);
    assert!(mset.matches_upper_bound <= 2);
    assert_bounds(&mset);
}

/// Counts the documents it is shown.
#[derive(Default)]
struct CountingSpy {
    seen: std::rc::Rc<std::cell::Cell<u32>>,
}

impl MatchSpy for CountingSpy {
    fn observe(&mut self, _doc: &Document, _weight: f64) {
        self.seen.set(self.seen.get() + 1);
    }
}

#[test]
fn spies_observe_accepted_candidates() {
    let seen = std::rc::Rc::new(std::cell::Cell::new(0));
    let mut db = MemoryDatabase::new();
    db.add_text("pear one");
    db.add_text("pear two");
    let db = Arc::new(db);

    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("pear"));
    let mut options = MatchOptions::new();
    options.spies.push(Box::new(CountingSpy {
        seen: std::rc::Rc::clone(&seen),
    }));
    enquire.set_options(options);
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    assert_eq!(mset.len(), 2);
    assert_eq!(seen.get(), 2);
}

#[test]
fn check_at_least_tightens_bounds() {
    let db = fruit_db();
    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("mango"));
    let mset = enquire.mset(0, 1, Some(100)).expect("match succeeds");
    assert_eq!(mset.len(), 1);
    // Everything was inspected, so the bounds collapse to the true count.
    assert_eq!(mset.matches_lower_bound, 2);
    assert_eq!(mset.matches_upper_bound, 2);
    assert_eq!(mset.matches_estimated, 2);
}

#[test]
fn paging_is_consistent_with_the_full_ranking() {
    let mut db = MemoryDatabase::new();
    for i in 0..8 {
        let mut text = "pear".to_string();
        for _ in 0..i {
            text.push_str(" pad");
        }
        db.add_text(&text);
    }
    let db = Arc::new(db);

    let all = run(Arc::clone(&db), Query::term("pear"));
    assert_eq!(all.len(), 8);

    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("pear"));
    let page = enquire.mset(3, 2, None).expect("match succeeds");
    assert_eq!(page.len(), 2);
    assert_eq!(page.items[0].did, all.items[3].did);
    assert_eq!(page.items[1].did, all.items[4].did);
}

#[test]
fn bool_weight_ranks_by_docid() {
    let db = fruit_db();
    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("mango"));
    enquire.set_weight(Box::new(BoolWeight));
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    let dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![1, 2]);
    assert_eq!(mset.max_possible, 0.0);
}

#[test]
fn docid_order_desc_flips_ties() {
    let db = fruit_db();
    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("mango"));
    enquire.set_weight(Box::new(BoolWeight));
    enquire.set_options(MatchOptions::new().docid_order(quern_match::DocidOrder::Desc));
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    let dids: Vec<u32> = mset.items.iter().map(|item| item.did).collect();
    assert_eq!(dids, vec![2, 1]);
}

#[test]
fn identical_matches_are_idempotent() {
    let db = fruit_db();
    let query = Query::or(vec![Query::term("mango"), Query::term("ripe")]);
    let first = run(Arc::clone(&db), query.clone());
    let second = run(db, query);
    assert_eq!(first.items, second.items);
    assert_eq!(first.matches_estimated, second.matches_estimated);
}

#[test]
fn and_child_order_does_not_change_results() {
    let db = fruit_db();
    let forward = run(
        Arc::clone(&db),
        Query::and(vec![Query::term("ripe"), Query::term("mango")]),
    );
    let backward = run(
        db,
        Query::and(vec![Query::term("mango"), Query::term("ripe")]),
    );
    assert_eq!(forward.items, backward.items);
}

/// The six-document corpus used for shard-equivalence checks.
fn shard_corpus() -> Vec<&'static str> {
    vec![
        "ripe mango",
        "green mango tree",
        "ripe apple",
        "mango mango mango",
        "apple orchard",
        "ripe plum and mango",
    ]
}

#[test]
fn sharded_match_equals_single_database() {
    let mut single = MemoryDatabase::new();
    for text in shard_corpus() {
        single.add_text(text);
    }
    // Interleave: global docid g lives in shard (g-1) % 2.
    let mut shard0 = MemoryDatabase::new();
    let mut shard1 = MemoryDatabase::new();
    for (index, text) in shard_corpus().iter().enumerate() {
        if index % 2 == 0 {
            shard0.add_text(text);
        } else {
            shard1.add_text(text);
        }
    }

    let query = Query::or(vec![Query::term("mango"), Query::term("ripe")]);
    let whole = run(Arc::new(single), query.clone());

    let mut enquire =
        Enquire::over_databases(vec![Arc::new(shard0), Arc::new(shard1)]);
    enquire.set_query(query);
    let sharded = enquire.mset(0, 10, None).expect("match succeeds");

    assert_eq!(whole.len(), sharded.len());
    let mut whole_items: Vec<(u32, i64)> = whole
        .items
        .iter()
        .map(|item| (item.did, (item.weight * 1e9) as i64))
        .collect();
    let mut sharded_items: Vec<(u32, i64)> = sharded
        .items
        .iter()
        .map(|item| (item.did, (item.weight * 1e9) as i64))
        .collect();
    whole_items.sort_unstable();
    sharded_items.sort_unstable();
    assert_eq!(whole_items, sharded_items);
    assert_eq!(whole.matches_estimated, sharded.matches_estimated);
}

#[test]
fn relevance_feedback_changes_term_weighting() {
    let mut db = MemoryDatabase::new();
    db.add_text("mango orchard");
    db.add_text("mango grove");
    db.add_text("apple grove");
    db.add_text("apple orchard");
    let db = Arc::new(db);

    let query = Query::or(vec![Query::term("mango"), Query::term("grove")]);
    let without = run(Arc::clone(&db), query.clone());

    let mut rset = RSet::new();
    rset.add_document(1);
    let mut enquire = Enquire::new(db);
    enquire.set_query(query);
    enquire.set_rset(rset);
    let with_feedback = enquire.mset(0, 10, None).expect("match succeeds");

    // Document 1 contains "mango", which the feedback marks relevant, so
    // its weight moves.
    let before = without.items.iter().find(|i| i.did == 1).unwrap().weight;
    let after = with_feedback
        .items
        .iter()
        .find(|i| i.did == 1)
        .unwrap()
        .weight;
    assert!((before - after).abs() > 1e-9);
}

#[test]
fn time_limit_still_returns_results() {
    let db = fruit_db();
    let mut enquire = Enquire::new(db);
    enquire.set_query(Query::term("mango"));
    enquire.set_options(MatchOptions::new().time_limit(Duration::from_secs(0)));
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    assert!(mset.len() <= 10);
    assert_bounds(&mset);
}

#[test]
fn term_info_reports_query_term_stats() {
    let mset = run(
        fruit_db(),
        Query::or(vec![Query::term("mango"), Query::term("apple")]),
    );
    let mango = mset.termfreqandwts.get("mango").expect("mango recorded");
    assert_eq!(mango.termfreq, 2);
    assert!(mango.termweight > 0.0);
    let apple = mset.termfreqandwts.get("apple").expect("apple recorded");
    assert_eq!(apple.termfreq, 1);
}

#[test]
fn top_match_converts_to_one_hundred_percent() {
    let mset = run(fruit_db(), Query::term("mango"));
    assert!(!mset.is_empty());
    assert_eq!(mset.convert_to_percent(mset.items[0].weight), 100);
}

#[test]
fn fetch_document_returns_payload() {
    let mset = run(fruit_db(), Query::term("apple"));
    let doc = mset.fetch_document(0).expect("document fetch succeeds");
    assert_eq!(doc.data, "ripe apple");
}

#[test]
fn bm25_prefers_higher_wdf() {
    let mut db = MemoryDatabase::new();
    db.add_text("mango pad pad");
    db.add_text("mango mango pad");
    let mset = run(Arc::new(db), Query::term("mango"));
    assert_eq!(mset.items[0].did, 2);
}

#[test]
fn empty_query_yields_empty_mset() {
    let mut enquire = Enquire::new(fruit_db());
    enquire.set_query(Query::MatchNothing);
    let mset = enquire.mset(0, 10, None).expect("match succeeds");
    assert!(mset.is_empty());
    assert_eq!(mset.matches_upper_bound, 0);
}

#[test]
fn maxitems_caps_the_page() {
    let mset = {
        let mut enquire = Enquire::new(fruit_db());
        enquire.set_query(Query::or(vec![
            Query::term("mango"),
            Query::term("ripe"),
            Query::term("apple"),
        ]));
        enquire.mset(0, 2, None).expect("match succeeds")
    };
    assert_eq!(mset.len(), 2);
    assert!(mset.matches_upper_bound >= 2);
    assert_bounds(&mset);
}
