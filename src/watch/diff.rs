use std::fmt;

use serde::Serialize;

/// Kind of change reported by a name-status diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
}

impl ChangeType {
    /// Map a status code (`A`, `M`, `D`, `R100`, `C075`, ...).
    /// Similarity scores on renames and copies are ignored.
    pub fn from_status(code: &str) -> Option<Self> {
        match code.chars().next()? {
            'A' if code.len() == 1 => Some(ChangeType::Added),
            'M' if code.len() == 1 => Some(ChangeType::Modified),
            'D' if code.len() == 1 => Some(ChangeType::Deleted),
            'R' if code[1..].chars().all(|c| c.is_ascii_digit()) => Some(ChangeType::Renamed),
            'C' if code[1..].chars().all(|c| c.is_ascii_digit()) => Some(ChangeType::Copied),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeType::Added => "Added",
            ChangeType::Modified => "Modified",
            ChangeType::Deleted => "Deleted",
            ChangeType::Renamed => "Renamed",
            ChangeType::Copied => "Copied",
        };
        f.write_str(label)
    }
}

/// One file touched between two commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub change_type: ChangeType,
    /// Post-change path (destination for renames and copies)
    pub path: String,
}

impl ChangeRecord {
    pub fn new(change_type: ChangeType, path: impl Into<String>) -> Self {
        Self {
            change_type,
            path: path.into(),
        }
    }
}

/// Split a record line into fields.
/// git separates fields with tabs, which keeps paths containing spaces intact;
/// other whitespace is accepted for hand-written input.
fn fields(line: &str) -> Vec<&str> {
    if line.contains('\t') {
        line.split('\t').map(str::trim).filter(|f| !f.is_empty()).collect()
    } else {
        line.split_whitespace().collect()
    }
}

/// Build a record from a status code and its path fields
fn record(code: &str, paths: &[&str]) -> Option<ChangeRecord> {
    let Some(change_type) = ChangeType::from_status(code) else {
        tracing::debug!("skipping unknown status {:?}", code);
        return None;
    };

    let path = match change_type {
        ChangeType::Renamed | ChangeType::Copied => paths.get(1).or(paths.first()),
        _ => paths.first(),
    }?;

    Some(ChangeRecord::new(change_type, *path))
}

/// `-z` output: status and paths are separate NUL-terminated fields, paths
/// are verbatim (no quoting), renames and copies carry two paths.
fn parse_nul_separated(output: &str) -> Vec<ChangeRecord> {
    let mut fields = output.split('\0').filter(|f| !f.is_empty());
    let mut records = Vec::new();

    while let Some(code) = fields.next() {
        let code = code.trim();
        let path_count = match code.chars().next() {
            Some('R' | 'C') => 2,
            _ => 1,
        };
        let paths: Vec<&str> = fields.by_ref().take(path_count).collect();
        if paths.len() < path_count {
            tracing::debug!("truncated record for status {:?}", code);
            break;
        }
        records.extend(record(code, &paths));
    }

    records
}

/// Parse `git diff --name-status` output, either line-oriented or `-z`.
/// Records keep input order; blank lines and unknown status codes are skipped.
pub fn parse_name_status(output: &str) -> Vec<ChangeRecord> {
    if output.contains('\0') {
        return parse_nul_separated(output);
    }

    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields = fields(line);
            let (code, paths) = fields.split_first()?;
            record(code, paths)
        })
        .collect()
}
