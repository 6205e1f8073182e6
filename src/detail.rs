//! Commit detail retrieval: author, subject and per-file change counts.
//!
//! File status (added / deleted / renamed) is inferred, not read from the
//! diff: a file with zero counted line changes is a rename when its name
//! carries a `=>` arrow, otherwise it is considered added if it currently
//! exists in the working tree and deleted if it does not. This probes the
//! checkout as it is *now*, so it can misreport files touched again by later
//! commits. Treat the flags as best-effort hints.

use std::path::Path;

use crate::error::{NotesError, Result};
use crate::git::VcsGateway;
use crate::model::{CommitDetail, FileChange};

/// Author and subject parsed from `git show --stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedShowOutput {
    pub author: String,
    pub message: String,
}

/// Fetches and parses commit detail through the gateway.
#[derive(Clone)]
pub struct CommitDetailLoader {
    gateway: VcsGateway,
}

impl CommitDetailLoader {
    pub fn new(gateway: VcsGateway) -> Self {
        Self { gateway }
    }

    /// Load author, subject line and file changes for one commit.
    pub async fn detail(&self, repo: &Path, commit: &str) -> Result<CommitDetail> {
        let (stat, numstat) = futures::future::try_join(
            self.gateway.show_stat(repo, commit),
            self.gateway.show_numstat(repo, commit),
        )
        .await
        .map_err(|e| NotesError::detail(commit, e.to_string()))?;

        let parsed = parse_show_stat(&stat, commit)?;
        let file_changes = parse_numstat(&numstat, repo, commit)?;

        Ok(CommitDetail {
            author: parsed.author,
            message: parsed.message,
            file_changes,
        })
    }
}

/// Extract the author and the first message line from `git show --stat`.
pub fn parse_show_stat(output: &str, commit: &str) -> Result<ParsedShowOutput> {
    let author = output
        .lines()
        .find_map(|line| line.strip_prefix("Author:"))
        .map(|rest| rest.trim().to_string())
        .ok_or_else(|| NotesError::detail(commit, "no Author line in git show output"))?;

    let message = output
        .lines()
        .find(|line| line.starts_with("    "))
        .map(|line| line.trim().to_string())
        .unwrap_or_default();

    Ok(ParsedShowOutput { author, message })
}

/// Parse `git show --numstat --oneline` into file changes.
///
/// The first line is the one-line commit summary and is skipped.
pub fn parse_numstat(output: &str, repo: &Path, commit: &str) -> Result<Vec<FileChange>> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_numstat_line(line, repo, commit))
        .collect()
}

fn parse_numstat_line(line: &str, repo: &Path, commit: &str) -> Result<FileChange> {
    let malformed = || NotesError::detail(commit, format!("malformed numstat line '{line}'"));

    let mut fields = line.splitn(3, '\t');
    let (Some(ins), Some(del), Some(file)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(malformed());
    };

    // binary files report "-" for both counts
    let binary = ins == "-" && del == "-";
    let (insertions, deletions) = if binary {
        (0, 0)
    } else {
        let insertions: u64 = ins.trim().parse().map_err(|_| malformed())?;
        let deletions: u64 = del.trim().parse().map_err(|_| malformed())?;
        (insertions, deletions)
    };

    let mut change = FileChange {
        file: file.to_string(),
        changes: insertions + deletions,
        insertions,
        deletions,
        deleted: false,
        added: false,
        renamed: false,
    };

    if change.changes == 0 && !binary {
        if file.contains("=>") {
            change.renamed = true;
        } else if repo.join(file).exists() {
            change.added = true;
        } else {
            change.deleted = true;
        }
    }

    Ok(change)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
