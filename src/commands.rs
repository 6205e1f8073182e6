//! Note mutations and their outcome state machine.
//!
//! The executor never prompts. Each request produces an [`Outcome`]; when
//! the outcome offers choices the host picks one, maps it through
//! [`follow_up`] and runs the result once more as [`Attempt::Followup`].
//! A follow-up that fails is always terminal, so there is at most one level
//! of remediation and it is never automatic.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::RepositoryCache;
use crate::error::{NotesError, Result};
use crate::git::find_repository_root;

/// A note mutation. Commit fields take any revision; `None` means `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Add {
        commit: Option<String>,
        message: String,
        force: bool,
    },
    Edit {
        commit: Option<String>,
        message: String,
    },
    Append {
        commit: Option<String>,
        message: String,
    },
    Remove {
        commit: String,
    },
    Prune,
    Fetch {
        force: bool,
    },
    Push {
        force: bool,
    },
}

/// Which confirmation setting guards a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Transfer,
    Removal,
    Prune,
}

impl Request {
    /// The confirmation that applies before running this request, if any.
    pub fn confirmation(&self) -> Option<Confirmation> {
        match self {
            Request::Fetch { .. } | Request::Push { .. } => Some(Confirmation::Transfer),
            Request::Remove { .. } => Some(Confirmation::Removal),
            Request::Prune => Some(Confirmation::Prune),
            _ => None,
        }
    }

    /// Remedies offered when a first attempt fails.
    fn remedies(&self) -> Vec<Choice> {
        match self {
            Request::Remove { .. } => vec![Choice::Prune, Choice::Cancel],
            Request::Fetch { .. } => vec![Choice::Push, Choice::ForceFetch, Choice::Cancel],
            Request::Push { .. } => vec![Choice::Fetch, Choice::ForcePush, Choice::Cancel],
            _ => Vec::new(),
        }
    }
}

/// A decision the host can make on a conflict or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Append,
    Edit,
    Overwrite,
    Push,
    ForceFetch,
    Fetch,
    ForcePush,
    Prune,
    Cancel,
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Choice::Append => "Append to the existing note",
            Choice::Edit => "Edit the existing note",
            Choice::Overwrite => "Overwrite the existing note",
            Choice::Push => "Push local notes",
            Choice::ForceFetch => "Force fetch (discard local notes)",
            Choice::Fetch => "Fetch remote notes",
            Choice::ForcePush => "Force push (replace remote notes)",
            Choice::Prune => "Prune orphaned notes",
            Choice::Cancel => "Cancel",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    Followup,
}

/// What a successful request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    NoteAdded { commit: String },
    NoteEdited { commit: String },
    NoteAppended { commit: String, note: String },
    NoteRemoved { commit: String },
    Pruned,
    /// git's progress output.
    Fetched { output: String },
    Pushed { output: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(Effect),
    /// Add found a note already attached to `commit`.
    Conflict { commit: String, choices: Vec<Choice> },
    Failed { error: NotesError, choices: Vec<Choice> },
    Terminal(NotesError),
}

/// Map a host decision into the request to run as the follow-up.
///
/// Returns `None` for `Cancel` and for choices that do not apply to the
/// request.
pub fn follow_up(request: &Request, choice: Choice) -> Option<Request> {
    match (request, choice) {
        (_, Choice::Cancel) => None,
        (Request::Add { commit, message, .. }, Choice::Append) => Some(Request::Append {
            commit: commit.clone(),
            message: message.clone(),
        }),
        (Request::Add { commit, message, .. }, Choice::Edit) => Some(Request::Edit {
            commit: commit.clone(),
            message: message.clone(),
        }),
        (Request::Add { commit, message, .. }, Choice::Overwrite) => Some(Request::Add {
            commit: commit.clone(),
            message: message.clone(),
            force: true,
        }),
        (Request::Remove { .. }, Choice::Prune) => Some(Request::Prune),
        (Request::Fetch { .. }, Choice::Push) => Some(Request::Push { force: false }),
        (Request::Fetch { .. }, Choice::ForceFetch) => Some(Request::Fetch { force: true }),
        (Request::Push { .. }, Choice::Fetch) => Some(Request::Fetch { force: false }),
        (Request::Push { .. }, Choice::ForcePush) => Some(Request::Push { force: true }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct NoteCommandExecutor {
    cache: Arc<RepositoryCache>,
    load_limit: usize,
}

impl NoteCommandExecutor {
    /// `load_limit` is the page size used when a request reloads the cache.
    pub fn new(cache: Arc<RepositoryCache>, load_limit: usize) -> Self {
        Self { cache, load_limit }
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    /// Run `request` against the repository containing `path`.
    pub async fn execute(&self, path: &Path, request: &Request, attempt: Attempt) -> Outcome {
        let root = match find_repository_root(path) {
            Ok(root) => root,
            Err(error) => return Outcome::Terminal(error),
        };

        let _guard = self.cache.lock(&root).await;
        debug!(repo = %root.display(), ?request, ?attempt, "executing note request");

        let result = match request {
            Request::Add {
                commit,
                message,
                force,
            } => self.add(&root, commit.as_deref(), message, *force).await,
            Request::Edit { commit, message } => self.edit(&root, commit.as_deref(), message).await,
            Request::Append { commit, message } => {
                self.append(&root, commit.as_deref(), message).await
            }
            Request::Remove { commit } => self.remove(&root, commit).await,
            Request::Prune => self.prune(&root).await,
            Request::Fetch { force } => self.fetch(&root, *force).await,
            Request::Push { force } => self.push(&root, *force).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(error) => {
                let choices = request.remedies();
                if attempt == Attempt::Followup || choices.is_empty() {
                    Outcome::Terminal(error)
                } else {
                    Outcome::Failed { error, choices }
                }
            }
        }
    }

    async fn resolve(&self, root: &Path, rev: Option<&str>) -> Result<String> {
        self.cache
            .gateway()
            .resolve_commit(root, rev.unwrap_or("HEAD"))
            .await
    }

    async fn add(&self, root: &Path, rev: Option<&str>, message: &str, force: bool) -> Result<Outcome> {
        let commit = self.resolve(root, rev).await?;
        let gateway = self.cache.gateway();

        if !force && gateway.note_exists(root, &commit).await? {
            debug!(commit, "note already exists, reporting conflict");
            return Ok(Outcome::Conflict {
                commit,
                choices: vec![Choice::Append, Choice::Edit, Choice::Overwrite, Choice::Cancel],
            });
        }

        gateway.notes_add(root, &commit, message, force).await?;
        if let Err(error) = self.cache.refresh_commit_unlocked(root, &commit).await {
            warn!(commit, %error, "note added but cache refresh failed");
        }
        Ok(Outcome::Done(Effect::NoteAdded { commit }))
    }

    async fn edit(&self, root: &Path, rev: Option<&str>, message: &str) -> Result<Outcome> {
        let commit = self.resolve(root, rev).await?;
        if self.cache.note_text_unlocked(root, &commit).await?.is_none() {
            return Err(NotesError::NoteNotFound(commit));
        }

        self.cache.gateway().notes_edit(root, &commit, message).await?;
        self.cache.update_note_unlocked(root, &commit, message.to_string());
        Ok(Outcome::Done(Effect::NoteEdited { commit }))
    }

    async fn append(&self, root: &Path, rev: Option<&str>, message: &str) -> Result<Outcome> {
        let commit = self.resolve(root, rev).await?;
        let existing = self.cache.note_text_unlocked(root, &commit).await?;

        self.cache
            .gateway()
            .notes_append(root, &commit, message)
            .await?;

        let note = match existing {
            Some(existing) => {
                let note = format!("{existing}\n\n{message}");
                self.cache.update_note_unlocked(root, &commit, note.clone());
                note
            }
            None => {
                // git created a fresh note, so the commit may not be cached yet
                if let Err(error) = self.cache.refresh_commit_unlocked(root, &commit).await {
                    warn!(commit, %error, "note appended but cache refresh failed");
                }
                message.to_string()
            }
        };
        Ok(Outcome::Done(Effect::NoteAppended { commit, note }))
    }

    async fn remove(&self, root: &Path, rev: &str) -> Result<Outcome> {
        let commit = self.resolve(root, Some(rev)).await?;
        self.cache.gateway().notes_remove(root, &commit).await?;
        self.cache.remove_commit_unlocked(root, &commit);
        Ok(Outcome::Done(Effect::NoteRemoved { commit }))
    }

    async fn prune(&self, root: &Path) -> Result<Outcome> {
        self.cache.gateway().notes_prune(root).await?;
        self.reload(root).await;
        Ok(Outcome::Done(Effect::Pruned))
    }

    async fn fetch(&self, root: &Path, force: bool) -> Result<Outcome> {
        let output = self.cache.gateway().fetch_notes(root, force).await?;
        self.reload(root).await;
        Ok(Outcome::Done(Effect::Fetched { output }))
    }

    async fn push(&self, root: &Path, force: bool) -> Result<Outcome> {
        let output = self.cache.gateway().push_notes(root, force).await?;
        self.reload(root).await;
        Ok(Outcome::Done(Effect::Pushed { output }))
    }

    /// Drop and rebuild the cached record. The git side already succeeded,
    /// so a reload problem is logged and left for the next load.
    async fn reload(&self, root: &Path) {
        self.cache.clear_unlocked(root);
        match self.cache.load_unlocked(root, self.load_limit).await {
            Ok(outcome) => {
                info!(
                    repo = %root.display(),
                    commits = outcome.record.commits.len(),
                    "reloaded notes"
                );
                for failure in outcome.failures {
                    warn!(commit = %failure.commit_hash, error = %failure.error, "failed to hydrate commit");
                }
            }
            Err(error) => warn!(repo = %root.display(), %error, "failed to reload notes"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
