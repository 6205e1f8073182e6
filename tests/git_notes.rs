//! Integration tests against the real `git` binary.
//!
//! Each test builds a throwaway repository in a temp dir with fixed commit
//! dates, then drives the cache and executor through `GitCli`.

use notekeeper_cli::cache::RepositoryCache;
use notekeeper_cli::commands::{Attempt, Choice, Effect, NoteCommandExecutor, Outcome, Request};
use notekeeper_cli::git::{NoteRefs, VcsGateway};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// Run git in `dir` and return trimmed stdout, panicking on failure.
fn git(dir: &Path, args: &[&str]) -> String {
    git_with_env(dir, args, &[])
}

fn git_with_env(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .envs(env.iter().copied())
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository with three commits on consecutive days.
struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    commits: Vec<String>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    git(&root, &["init", "--quiet"]);
    git(&root, &["config", "user.name", "Test User"]);
    git(&root, &["config", "user.email", "test@example.com"]);
    git(&root, &["config", "commit.gpgsign", "false"]);

    let mut commits = Vec::new();
    for day in 1..=3 {
        let file = format!("file{day}.txt");
        std::fs::write(root.join(&file), format!("line {day}\n")).unwrap();
        git(&root, &["add", &file]);
        let date = format!("2024-01-0{day}T12:00:00+00:00");
        git_with_env(
            &root,
            &["commit", "--quiet", "-m", &format!("Commit number {day}")],
            &[("GIT_AUTHOR_DATE", date.as_str()), ("GIT_COMMITTER_DATE", date.as_str())],
        );
        commits.push(git(&root, &["rev-parse", "HEAD"]));
    }

    Fixture {
        _dir: dir,
        root,
        commits,
    }
}

fn cache() -> RepositoryCache {
    RepositoryCache::new(VcsGateway::git(NoteRefs::default()), true)
}

fn executor() -> NoteCommandExecutor {
    NoteCommandExecutor::new(Arc::new(cache()), 10)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_load_correlates_and_hydrates_real_repository() {
    let fx = fixture();
    git(&fx.root, &["notes", "add", "-m", "first note", &fx.commits[0]]);
    git(&fx.root, &["notes", "add", "-m", "third note", &fx.commits[2]]);

    let cache = cache();
    let outcome = cache.load(&fx.root, 1).await.unwrap();
    let record = outcome.record;

    assert!(outcome.failures.is_empty());
    assert_eq!(record.repository_url, None);
    assert_eq!(record.commits.len(), 2);
    assert_eq!(record.hydrated_count(), 1);

    // newest first, and the newest was hydrated first
    let newest = &record.commits[0];
    assert_eq!(newest.commit_hash, fx.commits[2]);
    assert_eq!(newest.author.as_deref(), Some("Test User <test@example.com>"));
    assert_eq!(newest.message.as_deref(), Some("Commit number 3"));
    assert_eq!(newest.note.as_deref(), Some("third note"));
    assert_eq!(newest.file_changes.len(), 1);
    assert_eq!(newest.file_changes[0].file, "file3.txt");
    assert_eq!(newest.file_changes[0].insertions, 1);
    assert!(record.commits[1].is_shallow());

    let more = cache.load(&fx.root, 1).await.unwrap();
    assert_eq!(more.record.hydrated_count(), 2);
}

#[tokio::test]
async fn test_load_normalizes_remote_url() {
    let fx = fixture();
    git(
        &fx.root,
        &["remote", "add", "origin", "git@github.com:acme/widgets.git"],
    );

    let outcome = cache().load(&fx.root, 0).await.unwrap();
    assert_eq!(
        outcome.record.repository_url.as_deref(),
        Some("https://github.com/acme/widgets")
    );
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_add_conflict_then_append_and_remove() {
    let fx = fixture();
    let exec = executor();
    exec.cache().load(&fx.root, 10).await.unwrap();

    let add = Request::Add {
        commit: None,
        message: "first".to_string(),
        force: false,
    };
    let outcome = exec.execute(&fx.root, &add, Attempt::Initial).await;
    assert_eq!(
        outcome,
        Outcome::Done(Effect::NoteAdded {
            commit: fx.commits[2].clone()
        })
    );
    assert_eq!(git(&fx.root, &["notes", "show", "HEAD"]), "first");

    // a second add on the same commit is a conflict
    let outcome = exec.execute(&fx.root, &add, Attempt::Initial).await;
    match outcome {
        Outcome::Conflict { commit, choices } => {
            assert_eq!(commit, fx.commits[2]);
            assert!(choices.contains(&Choice::Append));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    let append = Request::Append {
        commit: Some("HEAD".to_string()),
        message: "second".to_string(),
    };
    exec.execute(&fx.root, &append, Attempt::Followup).await;
    let cached = exec.cache().commit(&fx.root, &fx.commits[2]).unwrap();
    assert_eq!(cached.note.as_deref(), Some("first\n\nsecond"));
    assert_eq!(git(&fx.root, &["notes", "show", "HEAD"]), "first\n\nsecond");

    let remove = Request::Remove {
        commit: fx.commits[2].clone(),
    };
    let outcome = exec.execute(&fx.root, &remove, Attempt::Initial).await;
    assert!(matches!(outcome, Outcome::Done(Effect::NoteRemoved { .. })));
    assert!(exec.cache().commit(&fx.root, &fx.commits[2]).is_none());
}

#[tokio::test]
async fn test_remove_without_note_offers_prune() {
    let fx = fixture();
    let outcome = executor()
        .execute(
            &fx.root,
            &Request::Remove {
                commit: "HEAD".to_string(),
            },
            Attempt::Initial,
        )
        .await;

    match outcome {
        Outcome::Failed { choices, .. } => assert_eq!(choices, vec![Choice::Prune, Choice::Cancel]),
        other => panic!("expected failure with remedies, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Fetch / push against a bare remote
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_push_then_fetch_through_bare_remote() {
    let fx = fixture();
    let remote = TempDir::new().unwrap();
    git(remote.path(), &["init", "--bare", "--quiet"]);
    let remote_path = remote.path().to_string_lossy().to_string();
    git(&fx.root, &["remote", "add", "origin", &remote_path]);
    git(&fx.root, &["notes", "add", "-m", "shared", &fx.commits[1]]);

    let exec = executor();
    let outcome = exec
        .execute(&fx.root, &Request::Push { force: false }, Attempt::Initial)
        .await;
    assert!(
        matches!(outcome, Outcome::Done(Effect::Pushed { .. })),
        "unexpected push outcome: {outcome:?}"
    );
    assert!(!git(remote.path(), &["notes", "list"]).is_empty());

    git(&fx.root, &["notes", "remove", &fx.commits[1]]);
    let outcome = exec
        .execute(&fx.root, &Request::Fetch { force: true }, Attempt::Initial)
        .await;
    assert!(
        matches!(outcome, Outcome::Done(Effect::Fetched { .. })),
        "unexpected fetch outcome: {outcome:?}"
    );

    // the fetch reloaded the cache with the restored note
    let restored = exec.cache().commit(&fx.root, &fx.commits[1]).unwrap();
    assert_eq!(restored.note.as_deref(), Some("shared"));
}
