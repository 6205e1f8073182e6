//! Git subprocess gateway.
//!
//! Every git invocation goes through a [`CommandRunner`], which the real
//! binary ([`GitCli`]) and the scripted test runner both implement. The
//! [`VcsGateway`] on top of it builds the argument vectors for each notes,
//! log, show, fetch and push primitive and maps failures into
//! [`NotesError::Subprocess`] with git's stderr preserved.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tracing::debug;

use crate::error::{NotesError, Result};

/// The default notes ref used by `git notes` itself.
pub const DEFAULT_NOTES_REF: &str = "refs/notes/commits";

/// The default remote for fetch, push and URL resolution.
pub const DEFAULT_REMOTE: &str = "origin";

// ---------------------------------------------------------------------------
// Runner seam
// ---------------------------------------------------------------------------

/// Captured result of one git invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Spawns git with the given arguments inside a repository.
///
/// An `Err` means the process could not be run at all; a non-zero exit is
/// reported through [`CommandOutput::success`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, repo: &Path, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runs the `git` binary found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

#[async_trait]
impl CommandRunner for GitCli {
    async fn run(&self, repo: &Path, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Repository discovery
// ---------------------------------------------------------------------------

/// Walk up from `path` to the first directory containing `.git`.
///
/// Purely a filesystem probe: no git process is started. A `.git` file
/// (worktrees, submodules) counts as well as a directory.
pub fn find_repository_root(path: &Path) -> Result<PathBuf> {
    let start = path
        .canonicalize()
        .map_err(|_| NotesError::NotAGitRepository(path.to_path_buf()))?;

    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| NotesError::NotAGitRepository(path.to_path_buf()))
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Ref names and remote used by the notes subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRefs {
    pub local: String,
    pub remote: String,
    pub remote_name: String,
}

impl Default for NoteRefs {
    fn default() -> Self {
        Self {
            local: DEFAULT_NOTES_REF.to_string(),
            remote: DEFAULT_NOTES_REF.to_string(),
            remote_name: DEFAULT_REMOTE.to_string(),
        }
    }
}

impl NoteRefs {
    /// `<localRef>:<remoteRef>`, used for both fetch and push.
    pub fn refspec(&self) -> String {
        format!("{}:{}", self.local, self.remote)
    }

    fn ref_arg(&self) -> String {
        format!("--ref={}", self.local)
    }
}

/// Typed access to the git primitives the notes cache relies on.
#[derive(Clone)]
pub struct VcsGateway {
    runner: Arc<dyn CommandRunner>,
    refs: NoteRefs,
}

impl VcsGateway {
    pub fn new(runner: Arc<dyn CommandRunner>, refs: NoteRefs) -> Self {
        Self { runner, refs }
    }

    /// Gateway over the real `git` binary.
    pub fn git(refs: NoteRefs) -> Self {
        Self::new(Arc::new(GitCli), refs)
    }

    pub fn refs(&self) -> &NoteRefs {
        &self.refs
    }

    /// Run git and return its trimmed stdout, or a `Subprocess` error
    /// carrying git's stderr.
    async fn output(&self, repo: &Path, operation: &str, args: Vec<String>) -> Result<String> {
        let output = self.spawn(repo, operation, &args).await?;
        if !output.success {
            return Err(NotesError::subprocess(operation, failure_text(&output)));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Run git and return whether it exited zero.
    async fn succeeds(&self, repo: &Path, operation: &str, args: Vec<String>) -> Result<bool> {
        Ok(self.spawn(repo, operation, &args).await?.success)
    }

    async fn spawn(&self, repo: &Path, operation: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(repo = %repo.display(), ?args, "running git");
        self.runner
            .run(repo, args)
            .await
            .map_err(|e| NotesError::subprocess(operation, format!("failed to execute git: {e}")))
    }

    fn notes_args(&self, sub: &str) -> Vec<String> {
        vec!["notes".to_string(), self.refs.ref_arg(), sub.to_string()]
    }

    /// `notes list [<commit>]`: lines of `<noteHash> <commitHash>`, or bare
    /// note hashes when a commit is given.
    pub async fn notes_list(&self, repo: &Path, commit: Option<&str>) -> Result<String> {
        let mut args = self.notes_args("list");
        args.extend(commit.map(str::to_string));
        self.output(repo, "git notes list", args).await
    }

    /// Whether a note exists for the commit under the local ref.
    pub async fn note_exists(&self, repo: &Path, commit: &str) -> Result<bool> {
        let mut args = self.notes_args("list");
        args.push(commit.to_string());
        self.succeeds(repo, "git notes list", args).await
    }

    pub async fn note_show(&self, repo: &Path, commit: &str) -> Result<String> {
        let mut args = self.notes_args("show");
        args.push(commit.to_string());
        self.output(repo, "git notes show", args).await
    }

    pub async fn notes_add(&self, repo: &Path, commit: &str, message: &str, force: bool) -> Result<()> {
        let mut args = self.notes_args("add");
        if force {
            args.push("--force".to_string());
        }
        args.extend(["-m".to_string(), message.to_string(), commit.to_string()]);
        self.output(repo, "git notes add", args).await.map(|_| ())
    }

    pub async fn notes_edit(&self, repo: &Path, commit: &str, message: &str) -> Result<()> {
        let mut args = self.notes_args("edit");
        args.extend(["-m".to_string(), message.to_string(), commit.to_string()]);
        self.output(repo, "git notes edit", args).await.map(|_| ())
    }

    pub async fn notes_append(&self, repo: &Path, commit: &str, message: &str) -> Result<()> {
        let mut args = self.notes_args("append");
        args.extend(["-m".to_string(), message.to_string(), commit.to_string()]);
        self.output(repo, "git notes append", args).await.map(|_| ())
    }

    pub async fn notes_remove(&self, repo: &Path, commit: &str) -> Result<()> {
        let mut args = self.notes_args("remove");
        args.push(commit.to_string());
        self.output(repo, "git notes remove", args).await.map(|_| ())
    }

    pub async fn notes_prune(&self, repo: &Path) -> Result<()> {
        self.output(repo, "git notes prune", self.notes_args("prune"))
            .await
            .map(|_| ())
    }

    /// `log --date=iso --format=%H %cd`: one `hash date time zone` line per
    /// commit reachable from HEAD.
    pub async fn commit_log(&self, repo: &Path) -> Result<String> {
        let args = vec![
            "log".to_string(),
            "--date=iso".to_string(),
            "--format=%H %cd".to_string(),
        ];
        self.output(repo, "git log", args).await
    }

    pub async fn show_stat(&self, repo: &Path, commit: &str) -> Result<String> {
        let args = vec!["show".to_string(), "--stat".to_string(), commit.to_string()];
        self.output(repo, "git show --stat", args).await
    }

    pub async fn show_numstat(&self, repo: &Path, commit: &str) -> Result<String> {
        let args = vec![
            "show".to_string(),
            "--numstat".to_string(),
            "--oneline".to_string(),
            commit.to_string(),
        ];
        self.output(repo, "git show --numstat", args).await
    }

    /// Fetch the notes ref. Returns git's progress output for display.
    pub async fn fetch_notes(&self, repo: &Path, force: bool) -> Result<String> {
        self.transfer(repo, "fetch", force).await
    }

    /// Push the notes ref. Returns git's progress output for display.
    pub async fn push_notes(&self, repo: &Path, force: bool) -> Result<String> {
        self.transfer(repo, "push", force).await
    }

    async fn transfer(&self, repo: &Path, verb: &str, force: bool) -> Result<String> {
        let mut args = vec![verb.to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.extend([self.refs.remote_name.clone(), self.refs.refspec()]);

        let operation = format!("git {verb}");
        let output = self.spawn(repo, &operation, &args).await?;
        if !output.success {
            return Err(NotesError::subprocess(operation, failure_text(&output)));
        }
        // fetch and push report progress on stderr
        Ok(format!("{}\n{}", output.stdout.trim(), output.stderr.trim())
            .trim()
            .to_string())
    }

    /// `remote get-url <remote>`. Returns `Ok(None)` when the remote is not
    /// configured, which is not an error.
    pub async fn remote_url(&self, repo: &Path) -> Result<Option<String>> {
        let args = vec![
            "remote".to_string(),
            "get-url".to_string(),
            self.refs.remote_name.clone(),
        ];
        let output = self.spawn(repo, "git remote get-url", &args).await?;
        if !output.success {
            return Ok(None);
        }
        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    /// Resolve any revision (`HEAD`, abbreviated hash, branch) to a full
    /// commit hash.
    pub async fn resolve_commit(&self, repo: &Path, rev: &str) -> Result<String> {
        let args = vec![
            "rev-parse".to_string(),
            "--verify".to_string(),
            "--quiet".to_string(),
            format!("{rev}^{{commit}}"),
        ];
        let output = self.spawn(repo, "git rev-parse", &args).await?;
        let hash = output.stdout.trim();
        if !output.success || hash.is_empty() {
            return Err(NotesError::subprocess(
                "git rev-parse",
                format!("unknown commit '{rev}'"),
            ));
        }
        Ok(hash.to_string())
    }
}

/// The most useful text from a failed command: stderr, falling back to
/// stdout (git prints some refusals there).
fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        output.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

// ---------------------------------------------------------------------------
// Scripted runner for tests
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
