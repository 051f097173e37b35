//! Last-commit metadata for content files.
//!
//! A single `git log --name-only` run over the content root is parsed into a
//! map from file path (relative to the content root, `/`-separated) to the
//! newest commit that touched it. Nodes receive the entry for their
//! declaration file through the loader's build context.
//!
//! Git is optional: when the command is missing or the directory is not a
//! work tree, loading continues without commit data.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Separates commits in the log output.
const RECORD_SEPARATOR: char = '\x1e';
/// Separates header fields of one commit.
const FIELD_SEPARATOR: char = '\x1f';
const LOG_FORMAT: &str = "--format=%x1e%H%x1f%h%x1f%s%x1f%aN%x1f%aE%x1f%ai";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Error, Debug)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
    #[error("git exited with {status}: {stderr}")]
    Failed { status: i32, stderr: String },
    #[error("malformed git log record: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub subject: String,
    pub author_name: String,
    pub author_email: String,
    pub author_date: DateTime<FixedOffset>,
}

fn run_git(root: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git").arg("-C").arg(root).args(args).output()?;
    if !output.status.success() {
        return Err(GitError::Failed {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Read commit metadata for every file below `root`.
pub fn load_commit_info(root: &Path) -> Result<HashMap<String, CommitInfo>, GitError> {
    let prefix = run_git(root, &["rev-parse", "--show-prefix"])?;
    let log = run_git(
        root,
        &["log", "--name-only", "--no-merges", LOG_FORMAT, "--", "."],
    )?;
    let commits = parse_git_log(&log, prefix.trim())?;
    debug!(files = commits.len(), "loaded git commit info");
    Ok(commits)
}

/// Like [`load_commit_info`], but logs a warning and returns an empty map
/// on failure.
pub fn load_commit_info_or_empty(root: &Path) -> HashMap<String, CommitInfo> {
    load_commit_info(root).unwrap_or_else(|e| {
        warn!(root = %root.display(), error = %e, "git commit info unavailable");
        HashMap::new()
    })
}

/// Parse `git log --name-only` output in [`LOG_FORMAT`].
///
/// File names are reported relative to the repository root; `prefix` (the
/// content root's position inside the repository, as printed by
/// `git rev-parse --show-prefix`) is stripped, and files outside it are
/// dropped. The log lists newest commits first, so the first commit seen for
/// a file wins.
pub fn parse_git_log(log: &str, prefix: &str) -> Result<HashMap<String, CommitInfo>, GitError> {
    let mut result = HashMap::new();
    for record in log.split(RECORD_SEPARATOR) {
        if record.trim().is_empty() {
            continue;
        }
        let mut lines = record.lines();
        let header = lines.next().unwrap_or_default();
        let fields: Vec<&str> = header.split(FIELD_SEPARATOR).collect();
        let [hash, short_hash, subject, author_name, author_email, date] = fields.as_slice() else {
            return Err(GitError::Malformed(header.to_string()));
        };
        let author_date = DateTime::parse_from_str(date.trim(), DATE_FORMAT)
            .map_err(|e| GitError::Malformed(format!("{date}: {e}")))?;
        let info = CommitInfo {
            hash: hash.to_string(),
            short_hash: short_hash.to_string(),
            subject: subject.to_string(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            author_date,
        };
        for file in lines.map(str::trim).filter(|l| !l.is_empty()) {
            let Some(relative) = file.strip_prefix(prefix) else {
                continue;
            };
            result
                .entry(relative.to_string())
                .or_insert_with(|| info.clone());
        }
    }
    Ok(result)
}
