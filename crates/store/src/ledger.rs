use crate::{Result, SUMMARY_CATEGORY_NAME, USER_CATEGORY_NAME};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const LEDGER_HEADER: &str = "\
// This file generates summary.md. Edit the descriptions here to change what summary.md says.
// Both files are rewritten automatically as memory categories are added, changed or removed.";

pub const DEFAULT_USER_DESCRIPTION: &str =
    "This category contains information about the user and their specific preferences.";

const SUMMARY_SEPARATOR: &str = "\r\n\r\n";

static MERGE_CONFLICT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(<{7}|={7}|>{7})").expect("static regex"));
static LINE_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*//.*$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    /// SHA-256 of the content last observed; empty when the content was never hashed.
    pub content_hash: String,
    pub description: String,
}

/// Category name to version entry, always kept in lexicographic order.
pub type VersionMap = BTreeMap<String, VersionEntry>;

pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Re-injects the reserved user entry and drops the forbidden summary key.
pub fn ensure_invariants(versions: &mut VersionMap) {
    versions
        .entry(USER_CATEGORY_NAME.to_string())
        .or_insert_with(|| VersionEntry {
            content_hash: String::new(),
            description: DEFAULT_USER_DESCRIPTION.to_string(),
        });
    versions.remove(SUMMARY_CATEGORY_NAME);
}

/// True when anything beyond the untouched default user entry is recorded.
pub fn has_stored_categories(versions: &VersionMap) -> bool {
    versions
        .iter()
        .any(|(name, entry)| name != USER_CATEGORY_NAME || !entry.content_hash.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRead {
    /// A merge-conflict marker was found; the file must not be trusted.
    MergeConflict,
    Parsed(VersionMap),
    Invalid(String),
}

/// Parses the line-commented JSON ledger.
pub fn parse_ledger(raw: &str) -> LedgerRead {
    if MERGE_CONFLICT_RE.is_match(raw) {
        return LedgerRead::MergeConflict;
    }

    let stripped = LINE_COMMENT_RE.replace_all(raw, "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        return LedgerRead::Parsed(VersionMap::new());
    }

    match serde_json::from_str::<VersionMap>(stripped) {
        Ok(versions) => LedgerRead::Parsed(versions),
        Err(err) => LedgerRead::Invalid(err.to_string()),
    }
}

/// Header plus tab-indented JSON keyed by category name.
pub fn serialize_ledger(versions: &VersionMap) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    versions.serialize(&mut serializer)?;
    Ok(format!("{LEDGER_HEADER}\n{}", String::from_utf8_lossy(&buf)))
}

/// One `### name` heading plus description per category, sorted by name.
pub fn render_summary(versions: &VersionMap) -> String {
    versions
        .iter()
        .flat_map(|(name, entry)| [format!("### {name}"), entry.description.clone()])
        .collect::<Vec<_>>()
        .join(SUMMARY_SEPARATOR)
}
