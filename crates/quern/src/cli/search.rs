//! Implementation of `quern search`.

use std::net::TcpStream;
use std::process::ExitCode;
use std::sync::Arc;

use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use quern_match::{Enquire, MSet, MatchOptions, Shard, SortBy};
use quern_query::Query;
use quern_remote::RemoteShard;
use quern_weight::{Bm25Weight, BoolWeight, TradWeight, Weight};
use serde_json::json;

use crate::cli::args::{CombineOp, SearchCommand, WeightArg};
use crate::cli::corpus;

/// Matches a query against a corpus and prints the results.
pub fn run(cmd: &SearchCommand) -> ExitCode {
    let mut enquire = match build_enquire(cmd) {
        Ok(enquire) => enquire,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::FAILURE;
        }
    };

    enquire.set_query(build_query(cmd));
    enquire.set_weight(build_weight(cmd.weight));
    enquire.set_options(build_options(cmd));

    let mset = match enquire.mset(cmd.first, cmd.limit, cmd.check_at_least) {
        Ok(mset) => mset,
        Err(err) => {
            eprintln!("error: match failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cmd.json {
        print_json(&mset);
    } else {
        print_table(&mset);
    }
    ExitCode::SUCCESS
}

/// Sets up the enquiry over a local corpus or a served shard.
fn build_enquire(cmd: &SearchCommand) -> Result<Enquire, String> {
    if let Some(addr) = &cmd.remote {
        let stream = TcpStream::connect(addr)
            .map_err(|err| format!("cannot connect to {addr}: {err}"))?;
        let shard = RemoteShard::connect(Box::new(stream))
            .map_err(|err| format!("handshake with {addr} failed: {err}"))?;
        return Ok(Enquire::over_shards(vec![Box::new(shard) as Box<dyn Shard>]));
    }
    let corpus = cmd
        .corpus
        .as_deref()
        .ok_or("a corpus file is required unless --remote is given")?;
    let db = corpus::load(corpus)?;
    Ok(Enquire::new(Arc::new(db)))
}

/// Builds the query tree from the terms and combining operator.
fn build_query(cmd: &SearchCommand) -> Query {
    let terms: Vec<Query> = cmd
        .terms
        .iter()
        .map(|term| Query::term(term.to_lowercase()))
        .collect();
    let window = cmd.window.unwrap_or(terms.len() as u32);
    match cmd.op {
        CombineOp::All => Query::and(terms),
        CombineOp::Any => Query::or(terms),
        CombineOp::Phrase => Query::phrase(window, terms),
        CombineOp::Near => Query::near(window, terms),
    }
}

/// Instantiates the selected weighting scheme.
fn build_weight(arg: WeightArg) -> Box<dyn Weight> {
    match arg {
        WeightArg::Bm25 => Box::new(Bm25Weight::default()),
        WeightArg::Trad => Box::new(TradWeight::default()),
        WeightArg::Bool => Box::new(BoolWeight),
    }
}

/// Maps the CLI flags onto match options.
fn build_options(cmd: &SearchCommand) -> MatchOptions {
    let mut options = MatchOptions::new();
    if let Some(slot) = cmd.collapse {
        options = options.collapse(slot, cmd.collapse_max);
    }
    if cmd.percent_cutoff > 0 {
        options = options.percent_cutoff(cmd.percent_cutoff);
    }
    if cmd.weight_cutoff > 0.0 {
        options = options.weight_cutoff(cmd.weight_cutoff);
    }
    if let Some(slot) = cmd.sort_value {
        options = options.sort_by_value(slot, !cmd.descending, SortBy::Val);
    }
    options
}

/// Renders the result table.
fn print_table(mset: &MSet) {
    if mset.is_empty() {
        println!("no matches");
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["#", "doc", "%", "weight", "text"]);
    for (rank, item) in mset.items.iter().enumerate() {
        let text = mset
            .fetch_document(rank)
            .map(|doc| snippet(&doc.data))
            .unwrap_or_default();
        table.add_row(vec![
            (mset.first as usize + rank + 1).to_string(),
            item.did.to_string(),
            mset.convert_to_percent(item.weight).to_string(),
            format!("{:.4}", item.weight),
            text,
        ]);
    }
    println!("{table}");
    println!(
        "{} to {} of about {} matches (bounds {}..{})",
        mset.first + 1,
        mset.first + mset.len() as u32,
        mset.matches_estimated,
        mset.matches_lower_bound,
        mset.matches_upper_bound,
    );
}

/// Renders the results as JSON.
fn print_json(mset: &MSet) {
    let items: Vec<serde_json::Value> = mset
        .items
        .iter()
        .enumerate()
        .map(|(rank, item)| {
            json!({
                "rank": mset.first as usize + rank,
                "docid": item.did,
                "weight": item.weight,
                "percent": mset.convert_to_percent(item.weight),
                "text": mset.fetch_document(rank).map(|doc| doc.data).unwrap_or_default(),
                "collapse_count": item.collapse_count,
            })
        })
        .collect();
    let output = json!({
        "items": items,
        "matches_lower_bound": mset.matches_lower_bound,
        "matches_estimated": mset.matches_estimated,
        "matches_upper_bound": mset.matches_upper_bound,
        "max_possible": mset.max_possible,
        "max_attained": mset.max_attained,
    });
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
}

/// Truncates document text for the table.
fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_CHARS).collect();
    format!("{cut}…")
}
