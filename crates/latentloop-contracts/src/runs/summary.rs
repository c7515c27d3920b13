use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;

/// One revealed favorite, as written to `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealedPick {
    pub label: String,
    pub stage: u32,
    pub index: usize,
    pub score: u8,
    pub seed_fingerprint: String,
    pub image_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub model: String,
    pub started_at: String,
    pub finished_at: String,
    pub stages_total: u32,
    pub rounds_completed: u32,
    pub picks: Vec<RevealedPick>,
}

/// Writes `summary` as pretty JSON with a `ts` stamp, creating parent dirs.
pub fn write_summary(path: &Path, summary: &SessionSummary) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}
