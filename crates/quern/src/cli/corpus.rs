//! Loading JSON corpora into the in-memory backend.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use quern_match::{DocInput, MemoryDatabase};
use serde::Deserialize;

/// One corpus entry.
#[derive(Debug, Deserialize)]
pub struct CorpusDoc {
    /// The document text; tokenised with positions.
    pub text: String,
    /// Value slot contents, keyed by slot number.
    #[serde(default)]
    pub values: BTreeMap<u32, String>,
}

/// Reads a JSON corpus file into an in-memory database.
pub fn load(path: &Path) -> Result<MemoryDatabase, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
    let docs: Vec<CorpusDoc> = serde_json::from_str(&raw)
        .map_err(|err| format!("cannot parse {}: {err}", path.display()))?;

    let mut db = MemoryDatabase::new();
    for doc in docs {
        let mut input = DocInput::from_text(&doc.text);
        for (slot, value) in doc.values {
            input = input.with_value(slot, value);
        }
        db.add_document(input);
    }
    Ok(db)
}
