//! Cached repository, commit and file-change records.
//!
//! A [`CommitRecord`] is either *shallow* (only the commit hash, note hashes
//! and date are known) or *hydrated* (author, message and note text have
//! been fetched). Hydration only ever moves forward: a hydrated record is
//! replaced, never stripped back to shallow.

use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;

/// All notes-bearing commits known for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRecord {
    pub repository_path: PathBuf,
    /// Normalized browsable remote URL, `None` when the repo has no remote.
    pub repository_url: Option<String>,
    pub commits: Vec<CommitRecord>,
}

impl RepositoryRecord {
    pub fn commit(&self, commit_hash: &str) -> Option<&CommitRecord> {
        self.commits.iter().find(|c| c.commit_hash == commit_hash)
    }

    pub fn commit_mut(&mut self, commit_hash: &str) -> Option<&mut CommitRecord> {
        self.commits.iter_mut().find(|c| c.commit_hash == commit_hash)
    }

    pub fn hydrated_count(&self) -> usize {
        self.commits.iter().filter(|c| c.is_hydrated()).count()
    }

    /// Insert a commit, replacing any entry with the same hash.
    pub fn upsert(&mut self, record: CommitRecord) {
        match self.commit_mut(&record.commit_hash) {
            Some(existing) => *existing = record,
            None => self.commits.push(record),
        }
    }

    /// Remove a commit by hash. Returns whether an entry was removed.
    pub fn remove(&mut self, commit_hash: &str) -> bool {
        let before = self.commits.len();
        self.commits.retain(|c| c.commit_hash != commit_hash);
        self.commits.len() != before
    }

    /// Sort commits by date. The sort is stable, so commits sharing a
    /// timestamp keep their log order.
    pub fn sort_by_date(&mut self, newest_first: bool) {
        if newest_first {
            self.commits.sort_by(|a, b| b.date.cmp(&a.date));
        } else {
            self.commits.sort_by(|a, b| a.date.cmp(&b.date));
        }
    }
}

/// One annotated commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub commit_hash: String,
    pub note_hash: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub author: Option<String>,
    pub message: Option<String>,
    pub note: Option<String>,
    pub file_changes: Vec<FileChange>,
}

impl CommitRecord {
    pub fn shallow(commit_hash: String, note_hash: Vec<String>, date: OffsetDateTime) -> Self {
        Self {
            commit_hash,
            note_hash,
            date,
            author: None,
            message: None,
            note: None,
            file_changes: Vec::new(),
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.author.is_some() && self.message.is_some() && self.note.is_some()
    }

    pub fn is_shallow(&self) -> bool {
        self.author.is_none() && self.message.is_none() && self.note.is_none()
    }

    /// Fill in commit detail and note text.
    pub fn hydrate(&mut self, detail: CommitDetail, note: String) {
        self.author = Some(detail.author);
        self.message = Some(detail.message);
        self.file_changes = detail.file_changes;
        self.note = Some(note);
    }
}

/// Line counts and inferred status for one file touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub file: String,
    pub changes: u64,
    pub insertions: u64,
    pub deletions: u64,
    pub deleted: bool,
    pub added: bool,
    pub renamed: bool,
}

/// Author, subject line and file changes of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetail {
    pub author: String,
    pub message: String,
    pub file_changes: Vec<FileChange>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
