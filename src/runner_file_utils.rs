use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder for an id or name that couldn't be recovered.
pub const UNKNOWN: &str = "-";

/// Collects the files directly inside `dir` whose name ends with
/// `extension`, sorted by file name. Subdirectories are not entered.
///
/// Entries whose type can't be determined (e.g. dangling symlinks) are kept
/// so that they show up in the report instead of vanishing.
pub fn collect_submissions(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Path is not a directory: {}",
            dir.display()
        ));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).context("Failed to read directory")? {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();

        let matches_ext = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(extension));
        if matches_ext && !path.is_dir() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Who a submission belongs to, as recovered from its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentIdentity {
    pub id: String,
    pub name: String,
}

impl StudentIdentity {
    pub fn unknown() -> Self {
        Self {
            id: UNKNOWN.to_string(),
            name: UNKNOWN.to_string(),
        }
    }
}

/// Matches `pattern` against the file stem. Group 1 is the id, group 2 the
/// (optional) name. A stem that doesn't match yields placeholders.
pub fn identify(path: &Path, pattern: &Regex) -> StudentIdentity {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();

    match pattern.captures(&stem) {
        Some(caps) => StudentIdentity {
            id: caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            name: caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        },
        None => StudentIdentity::unknown(),
    }
}
