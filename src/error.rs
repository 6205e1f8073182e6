//! Error types for git notes operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`NotesError`].
pub type Result<T> = std::result::Result<T, NotesError>;

/// Core error type for the notes cache and command layer.
///
/// Messages coming from git itself are carried verbatim so they can be shown
/// to the user unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotesError {
    /// No `.git` was found at or above the given path.
    #[error("Not a git repository (or any of the parent directories): {}", .0.display())]
    NotAGitRepository(PathBuf),

    /// git exited non-zero or could not be spawned.
    #[error("{operation} failed: {message}")]
    Subprocess { operation: String, message: String },

    /// `git show`/`git log` output could not be retrieved or parsed.
    #[error("Error retrieving commit details for {commit}: {message}")]
    DetailRetrieval { commit: String, message: String },

    /// An edit was requested for a commit that has no note.
    #[error("No note found for commit {0}")]
    NoteNotFound(String),
}

impl NotesError {
    pub fn subprocess(operation: impl Into<String>, message: impl Into<String>) -> Self {
        NotesError::Subprocess {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn detail(commit: impl Into<String>, message: impl Into<String>) -> Self {
        NotesError::DetailRetrieval {
            commit: commit.into(),
            message: message.into(),
        }
    }
}
