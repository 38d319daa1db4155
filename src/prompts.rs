use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const LINE_NO_WIDTH: usize = 3;

const PROMPT_COLUMN: &str = "Image Prompt";
const AUDIO_COLUMN: &str = "Audio File";
const REEL_COLUMN: &str = "Reel #";

/// Canonical line number of a sheet row.
///
/// Digit-only input is zero-padded (`"7"` becomes `"007"`), so `"7"` and
/// `"007"` name the same line while `"1"` and `"10"` never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineNo(String);

impl LineNo {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            LineNo(format!("{:0>width$}", trimmed, width = LINE_NO_WIDTH))
        } else {
            LineNo(trimmed.to_string())
        }
    }

    pub fn from_index(index: usize) -> Self {
        LineNo::parse(&index.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalKey {
    pub line_no: LineNo,
    pub reel_no: String,
}

/// One prompt of a batch. `sequence_index` is its submission position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptItem {
    pub prompt: String,
    pub sequence_index: usize,
    #[serde(flatten)]
    pub key: ExternalKey,
}

impl PromptItem {
    pub fn new(prompt: impl Into<String>, sequence_index: usize, key: ExternalKey) -> Self {
        PromptItem {
            prompt: prompt.into(),
            sequence_index,
            key,
        }
    }
}

/// A parsed spreadsheet row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetRow {
    pub line_no: LineNo,
    pub prompt: String,
    pub audio_link: String,
    pub reel_no: String,
}

/// Builds prompt items in row order.
pub fn prompt_items(rows: &[SheetRow]) -> Vec<PromptItem> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            PromptItem::new(
                row.prompt.clone(),
                index,
                ExternalKey {
                    line_no: row.line_no.clone(),
                    reel_no: row.reel_no.clone(),
                },
            )
        })
        .collect()
}

/// Converts worksheet records (one JSON object per row, keyed by column
/// header) into rows. The line number is the 1-based record position, so
/// rows keep their number even when earlier incomplete rows are dropped.
pub fn rows_from_records(records: &[Map<String, Value>]) -> Vec<SheetRow> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let prompt = cell_text(record, PROMPT_COLUMN);
            let audio_link = cell_text(record, AUDIO_COLUMN);
            let reel_no = cell_text(record, REEL_COLUMN);
            if prompt.is_empty() || audio_link.is_empty() || reel_no.is_empty() {
                return None;
            }
            Some(SheetRow {
                line_no: LineNo::from_index(index + 1),
                prompt,
                audio_link,
                reel_no,
            })
        })
        .collect()
}

pub fn rows_for_reel(rows: Vec<SheetRow>, reel: &str) -> Vec<SheetRow> {
    let reel = reel.trim();
    rows.into_iter().filter(|row| row.reel_no == reel).collect()
}

/// Reads a JSON export of the worksheet from disk.
pub async fn load_sheet_export(path: &Path) -> Result<Vec<SheetRow>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading sheet export {}", path.display()))?;
    let records: Vec<Map<String, Value>> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing sheet export {}", path.display()))?;
    Ok(rows_from_records(&records))
}

fn cell_text(record: &Map<String, Value>, column: &str) -> String {
    match record.get(column) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
