//! Dataset loading
//!
//! Items arrive as JSONL: one object per line with an optional `id` and an
//! optional `categories` array. Line order is the stable dataset order that
//! FixedOrder relies on, so it is captured as `seq` at load time.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use crate::engine::store::ItemDef;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    categories: Vec<String>,
}

/// Load item definitions from a JSONL file
///
/// Missing ids are minted as v4 UUIDs. Blank lines are skipped; any
/// malformed line is an error naming the offending line.
pub fn load_jsonl(path: &Path) -> Result<Vec<ItemDef>> {
    let file = File::open(path)
        .map_err(|e| Error::Dataset(format!("cannot open {}: {e}", path.display())))?;
    let reader = BufReader::new(file);

    let mut defs = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let raw: RawItem = serde_json::from_str(trimmed)
            .map_err(|e| Error::Dataset(format!("{}:{}: {e}", path.display(), lineno + 1)))?;
        defs.push(ItemDef {
            id: raw.id.unwrap_or_else(Uuid::new_v4),
            categories: raw.categories,
        });
    }
    Ok(defs)
}
