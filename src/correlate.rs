//! Matching note objects to commits.
//!
//! git has no single query for "which commits carry a note", so the answer
//! is assembled from two outputs: `git notes list` (note hash → annotated
//! object) and `git log` (commit hash → date). Only logged commits that
//! appear in the notes list are reported, in log order.

use std::collections::HashMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::error::{NotesError, Result};

/// One line of `git notes list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteListEntry {
    pub note_hash: String,
    pub commit_hash: String,
}

/// One line of `git log --format=%H %cd` output, date not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub commit_hash: String,
    pub date: String,
}

/// A logged commit together with every note attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedCommit {
    pub commit_hash: String,
    pub note_hash: Vec<String>,
    pub date: OffsetDateTime,
}

/// Parse `git notes list` output.
///
/// `git notes list <commit>` prints only the note hash, so a line without a
/// second column resolves to `target`. When `target` is set, entries for any
/// other commit are dropped.
pub fn parse_notes_list(output: &str, target: Option<&str>) -> Vec<NoteListEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let note_hash = parts.next()?;
            let commit_hash = parts.next().or(target)?;
            if target.is_some_and(|t| t != commit_hash) {
                return None;
            }
            Some(NoteListEntry {
                note_hash: note_hash.to_string(),
                commit_hash: commit_hash.to_string(),
            })
        })
        .collect()
}

/// Parse `git log --date=iso --format=%H %cd` output into ordered entries.
pub fn parse_commit_log(output: &str) -> Vec<LogEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (hash, date) = line.split_once(char::is_whitespace)?;
            Some(LogEntry {
                commit_hash: hash.to_string(),
                date: date.trim().to_string(),
            })
        })
        .collect()
}

/// Parse a commit date in either RFC 3339 or git's `--date=iso` shape
/// (`2024-01-01 12:00:00 +0100`).
pub fn parse_commit_date(text: &str) -> Option<OffsetDateTime> {
    let text = text.trim();
    if let Ok(date) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(date);
    }
    let git_iso = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
    );
    OffsetDateTime::parse(text, git_iso).ok()
}

/// Correlate notes-list output with the commit log.
///
/// Notes whose commit is missing from the log (for example a log limited to
/// HEAD while the note sits on another branch) are silently dropped.
pub fn correlate(
    notes_list_output: &str,
    commit_log: &str,
    target: Option<&str>,
) -> Result<Vec<CorrelatedCommit>> {
    let mut note_map: HashMap<String, Vec<String>> = HashMap::new();
    for entry in parse_notes_list(notes_list_output, target) {
        note_map
            .entry(entry.commit_hash)
            .or_default()
            .push(entry.note_hash);
    }

    let mut correlated = Vec::new();
    for entry in parse_commit_log(commit_log) {
        let Some(note_hash) = note_map.remove(&entry.commit_hash) else {
            continue;
        };
        let date = parse_commit_date(&entry.date).ok_or_else(|| {
            NotesError::detail(
                &entry.commit_hash,
                format!("unrecognized commit date '{}'", entry.date),
            )
        })?;
        correlated.push(CorrelatedCommit {
            commit_hash: entry.commit_hash,
            note_hash,
            date,
        });
    }
    Ok(correlated)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
