//! Clap argument definitions for the `quern` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI options.
#[derive(Parser)]
#[command(name = "quern")]
#[command(about = "Probabilistic full-text matching over JSON corpora")]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Match a query against a corpus and print the ranked results.
    Search(SearchCommand),
    /// Serve a corpus to remote matchers over TCP.
    Serve(ServeCommand),
}

/// How the query terms combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CombineOp {
    /// Every term must match.
    #[default]
    All,
    /// Any term may match.
    Any,
    /// Terms in order within the window.
    Phrase,
    /// Terms in any order within the window.
    Near,
}

/// Which weighting scheme scores the matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum WeightArg {
    /// BM25 with default parameters.
    #[default]
    Bm25,
    /// The traditional probabilistic formula.
    Trad,
    /// Unweighted boolean matching.
    Bool,
}

/// Arguments for `quern search`.
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Corpus file: a JSON array of {"text": ..., "values": {...}}.
    ///
    /// Not needed with --remote.
    pub corpus: Option<PathBuf>,

    /// Query terms.
    #[arg(required = true)]
    pub terms: Vec<String>,

    /// How the terms combine.
    #[arg(long, value_enum, default_value_t = CombineOp::All)]
    pub op: CombineOp,

    /// Window size for phrase/near (defaults to the number of terms).
    #[arg(long)]
    pub window: Option<u32>,

    /// Maximum results to return.
    #[arg(short = 'n', long, default_value_t = 10)]
    pub limit: u32,

    /// Rank of the first result returned (for paging).
    #[arg(long, default_value_t = 0)]
    pub first: u32,

    /// Inspect at least this many matches before stopping early.
    #[arg(long)]
    pub check_at_least: Option<u32>,

    /// Weighting scheme.
    #[arg(long, value_enum, default_value_t = WeightArg::Bm25)]
    pub weight: WeightArg,

    /// Collapse results sharing this value slot.
    #[arg(long)]
    pub collapse: Option<u32>,

    /// Keep this many results per collapse key.
    #[arg(long, default_value_t = 1)]
    pub collapse_max: u32,

    /// Drop results under this percentage of the best match.
    #[arg(long, default_value_t = 0)]
    pub percent_cutoff: u32,

    /// Drop results weighing less than this.
    #[arg(long, default_value_t = 0.0)]
    pub weight_cutoff: f64,

    /// Sort by the value in this slot instead of relevance.
    #[arg(long)]
    pub sort_value: Option<u32>,

    /// Sort values descending rather than ascending.
    #[arg(long)]
    pub descending: bool,

    /// Match against a served corpus at host:port instead of a file.
    #[arg(long)]
    pub remote: Option<String>,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `quern serve`.
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// Corpus file: a JSON array of {"text": ..., "values": {...}}.
    pub corpus: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7878")]
    pub listen: String,
}
