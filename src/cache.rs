//! In-memory, incrementally hydrated cache of notes-bearing commits.
//!
//! One [`RepositoryRecord`] per repository path. A first `load` correlates
//! notes with the log and hydrates at most `max_hydrated` commits; later
//! calls hydrate the next `max_hydrated` shallow commits in stored order
//! without re-correlating, which gives "load more" paging.
//!
//! All public operations hold a per-path async lock for their whole
//! duration. The `*_unlocked` variants are for callers in this crate that
//! already hold the lock across a longer sequence (see `commands`).

use futures::future::{join_all, try_join};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::correlate::{CorrelatedCommit, correlate};
use crate::detail::CommitDetailLoader;
use crate::error::{NotesError, Result};
use crate::git::VcsGateway;
use crate::model::{CommitDetail, CommitRecord, RepositoryRecord};
use crate::scm_url::normalize_remote_url;

/// A commit that could not be hydrated during a load. It stays shallow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationFailure {
    pub commit_hash: String,
    pub error: NotesError,
}

/// Result of a [`RepositoryCache::load`] call.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// Snapshot of the record as written to the cache.
    pub record: RepositoryRecord,
    /// Commits selected for hydration whose detail could not be fetched.
    pub failures: Vec<HydrationFailure>,
}

pub struct RepositoryCache {
    gateway: VcsGateway,
    loader: CommitDetailLoader,
    newest_first: bool,
    records: Mutex<HashMap<PathBuf, RepositoryRecord>>,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl RepositoryCache {
    pub fn new(gateway: VcsGateway, newest_first: bool) -> Self {
        Self {
            loader: CommitDetailLoader::new(gateway.clone()),
            gateway,
            newest_first,
            records: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn gateway(&self) -> &VcsGateway {
        &self.gateway
    }

    /// Acquire the exclusive lock for one repository path.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn records(&self) -> MutexGuard<'_, HashMap<PathBuf, RepositoryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Snapshot of the cached record for a repository.
    pub fn record(&self, path: &Path) -> Option<RepositoryRecord> {
        self.records().get(path).cloned()
    }

    /// Snapshot of every cached record, ordered by repository path.
    pub fn all_records(&self) -> Vec<RepositoryRecord> {
        let mut all: Vec<RepositoryRecord> = self.records().values().cloned().collect();
        all.sort_by(|a, b| a.repository_path.cmp(&b.repository_path));
        all
    }

    pub fn commit(&self, path: &Path, commit_hash: &str) -> Option<CommitRecord> {
        self.records()
            .get(path)
            .and_then(|r| r.commit(commit_hash))
            .cloned()
    }

    fn cached_note(&self, path: &Path, commit_hash: &str) -> Option<String> {
        self.commit(path, commit_hash).and_then(|c| c.note)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Sort and store a record, replacing any previous one for its path.
    fn write(&self, mut record: RepositoryRecord) -> RepositoryRecord {
        record.sort_by_date(self.newest_first);
        self.records()
            .insert(record.repository_path.clone(), record.clone());
        record
    }

    /// Drop the cached record for a repository. Returns whether one existed.
    pub async fn clear(&self, path: &Path) -> bool {
        let _guard = self.lock(path).await;
        self.clear_unlocked(path)
    }

    pub(crate) fn clear_unlocked(&self, path: &Path) -> bool {
        let removed = self.records().remove(path).is_some();
        debug!(repo = %path.display(), removed, "cleared repository cache");
        removed
    }

    /// Replace the cached note text of a commit. Returns whether the commit
    /// was cached.
    pub async fn update_note(&self, path: &Path, commit_hash: &str, note: String) -> bool {
        let _guard = self.lock(path).await;
        self.update_note_unlocked(path, commit_hash, note)
    }

    pub(crate) fn update_note_unlocked(&self, path: &Path, commit_hash: &str, note: String) -> bool {
        let mut records = self.records();
        match records.get_mut(path).and_then(|r| r.commit_mut(commit_hash)) {
            Some(commit) => {
                commit.note = Some(note);
                true
            }
            None => false,
        }
    }

    /// Remove a commit from the cached record. Returns whether it was cached.
    pub async fn remove_commit(&self, path: &Path, commit_hash: &str) -> bool {
        let _guard = self.lock(path).await;
        self.remove_commit_unlocked(path, commit_hash)
    }

    pub(crate) fn remove_commit_unlocked(&self, path: &Path, commit_hash: &str) -> bool {
        self.records()
            .get_mut(path)
            .is_some_and(|r| r.remove(commit_hash))
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Load or page in a repository. See the module docs for the policy.
    pub async fn load(&self, path: &Path, max_hydrated: usize) -> Result<LoadOutcome> {
        let _guard = self.lock(path).await;
        self.load_unlocked(path, max_hydrated).await
    }

    pub(crate) async fn load_unlocked(&self, path: &Path, max_hydrated: usize) -> Result<LoadOutcome> {
        match self.record(path) {
            None => self.load_fresh(path, max_hydrated).await,
            Some(existing) => Ok(self.load_more(existing, max_hydrated).await),
        }
    }

    async fn load_fresh(&self, path: &Path, max_hydrated: usize) -> Result<LoadOutcome> {
        debug!(repo = %path.display(), max_hydrated, "no cached details, correlating");
        let correlated = self.correlate(path, None).await?;

        let mut commits: Vec<CommitRecord> = correlated.into_iter().map(shallow).collect();
        let selected: Vec<usize> = (0..commits.len().min(max_hydrated)).collect();
        let failures = self.hydrate(path, &mut commits, &selected).await;

        let repository_url = self.repository_url(path).await;
        let record = self.write(RepositoryRecord {
            repository_path: path.to_path_buf(),
            repository_url,
            commits,
        });
        Ok(LoadOutcome { record, failures })
    }

    async fn load_more(&self, mut record: RepositoryRecord, max_hydrated: usize) -> LoadOutcome {
        let selected: Vec<usize> = record
            .commits
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_hydrated())
            .map(|(i, _)| i)
            .take(max_hydrated)
            .collect();
        debug!(
            repo = %record.repository_path.display(),
            next = selected.len(),
            "cached details found, hydrating next page"
        );

        let path = record.repository_path.clone();
        let failures = self.hydrate(&path, &mut record.commits, &selected).await;
        let record = self.write(record);
        LoadOutcome { record, failures }
    }

    /// Hydrate one commit: in place when cached shallow, or correlated and
    /// inserted when the repository is cached but the commit is not. Does
    /// nothing when no record exists for the repository.
    pub async fn load_note_details(&self, path: &Path, commit_hash: &str) -> Result<()> {
        let _guard = self.lock(path).await;
        self.load_note_details_unlocked(path, commit_hash).await
    }

    pub(crate) async fn load_note_details_unlocked(&self, path: &Path, commit_hash: &str) -> Result<()> {
        let Some(mut record) = self.record(path) else {
            return Ok(());
        };

        match record.commit_mut(commit_hash) {
            Some(commit) if commit.is_hydrated() => return Ok(()),
            Some(commit) => {
                let (detail, note) = self.fetch_hydration(path, commit_hash).await?;
                commit.hydrate(detail, note);
            }
            None => {
                // `notes list <commit>` exits non-zero when there is no note
                if !self.gateway.note_exists(path, commit_hash).await? {
                    return Ok(());
                }
                debug!(commit = commit_hash, "commit not cached, loading full details");
                let Some(found) = self.correlate(path, Some(commit_hash)).await?.pop() else {
                    return Ok(());
                };
                let mut commit = shallow(found);
                let (detail, note) = self.fetch_hydration(path, commit_hash).await?;
                commit.hydrate(detail, note);
                record.upsert(commit);
            }
        }

        self.write(record);
        Ok(())
    }

    /// Drop a commit's cached entry and load it again from git.
    pub(crate) async fn refresh_commit_unlocked(&self, path: &Path, commit_hash: &str) -> Result<()> {
        self.remove_commit_unlocked(path, commit_hash);
        self.load_note_details_unlocked(path, commit_hash).await
    }

    /// Note text for a commit: cached when available, otherwise loaded.
    ///
    /// When the repository has no cached record the note is read straight
    /// from git, so no partial record is created.
    pub(crate) async fn note_text_unlocked(&self, path: &Path, commit_hash: &str) -> Result<Option<String>> {
        if let Some(note) = self.cached_note(path, commit_hash) {
            return Ok(Some(note));
        }
        if self.record(path).is_some() {
            self.load_note_details_unlocked(path, commit_hash).await?;
            if let Some(note) = self.cached_note(path, commit_hash) {
                return Ok(Some(note));
            }
        }
        if self.gateway.note_exists(path, commit_hash).await? {
            return Ok(Some(self.gateway.note_show(path, commit_hash).await?));
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn correlate(&self, path: &Path, target: Option<&str>) -> Result<Vec<CorrelatedCommit>> {
        let (notes, log) = try_join(
            self.gateway.notes_list(path, target),
            self.gateway.commit_log(path),
        )
        .await?;
        correlate(&notes, &log, target)
    }

    async fn fetch_hydration(&self, path: &Path, commit_hash: &str) -> Result<(CommitDetail, String)> {
        try_join(
            self.loader.detail(path, commit_hash),
            self.gateway.note_show(path, commit_hash),
        )
        .await
    }

    /// Hydrate the commits at `selected` concurrently. Failures leave the
    /// commit untouched and are returned.
    async fn hydrate(
        &self,
        path: &Path,
        commits: &mut [CommitRecord],
        selected: &[usize],
    ) -> Vec<HydrationFailure> {
        let hashes: Vec<String> = selected
            .iter()
            .map(|&i| commits[i].commit_hash.clone())
            .collect();
        let results = join_all(hashes.iter().map(|hash| self.fetch_hydration(path, hash))).await;

        let mut failures = Vec::new();
        for ((&index, hash), result) in selected.iter().zip(hashes).zip(results) {
            match result {
                Ok((detail, note)) => commits[index].hydrate(detail, note),
                Err(error) => {
                    warn!(commit = %hash, %error, "failed to hydrate commit");
                    failures.push(HydrationFailure {
                        commit_hash: hash,
                        error,
                    });
                }
            }
        }
        failures
    }

    async fn repository_url(&self, path: &Path) -> Option<String> {
        match self.gateway.remote_url(path).await {
            Ok(url) => url.map(|u| normalize_remote_url(&u)),
            Err(error) => {
                warn!(repo = %path.display(), %error, "failed to read remote url");
                None
            }
        }
    }
}

fn shallow(found: CorrelatedCommit) -> CommitRecord {
    CommitRecord::shallow(found.commit_hash, found.note_hash, found.date)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::git::NoteRefs;
    use crate::git::scripted::{ScriptedRunner, fail, ok};
    use crate::git::CommandOutput;
    use futures::FutureExt;
    use std::sync::Mutex as StdMutex;

    pub(crate) const LOG: &str = "c1 2024-01-01 10:00:00 +0000\n\
c2 2024-01-02 10:00:00 +0000\n\
c3 2024-01-03 10:00:00 +0000\n\
c4 2024-01-04 10:00:00 +0000";

    /// Fake git repository state shared between the runner and a test.
    #[derive(Default)]
    pub(crate) struct FakeRepo {
        /// commit hash → (note hash, note text)
        pub(crate) notes: Vec<(String, String, String)>,
        pub(crate) fail_show_for: Option<String>,
        pub(crate) fail_notes_list: bool,
        /// git subcommands (`fetch`, `push`, or a notes verb) that exit non-zero.
        pub(crate) fail_commands: Vec<String>,
        pub(crate) remote: Option<String>,
    }

    impl FakeRepo {
        pub(crate) fn with_notes(commits: &[&str]) -> Arc<StdMutex<Self>> {
            let notes = commits
                .iter()
                .map(|c| (c.to_string(), format!("n-{c}"), format!("note for {c}")))
                .collect();
            Arc::new(StdMutex::new(FakeRepo {
                notes,
                remote: Some("git@github.com:acme/widgets.git".to_string()),
                ..Default::default()
            }))
        }
    }

    /// Answer git invocations from a [`FakeRepo`].
    pub(crate) fn respond(state: &StdMutex<FakeRepo>, args: &[String]) -> CommandOutput {
        let mut state = state.lock().unwrap();
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("");
        let verb = if arg(0) == "notes" { arg(2) } else { arg(0) };
        if state.fail_commands.iter().any(|c| c == verb) {
            return fail(&format!("error: {verb} rejected"));
        }
        let commit = args.last().cloned().unwrap_or_default();
        let message = args
            .iter()
            .position(|a| a == "-m")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_default();
        match arg(0) {
            "log" => ok(LOG),
            "remote" => match &state.remote {
                Some(url) => ok(url),
                None => fail("error: No such remote 'origin'"),
            },
            "rev-parse" => ok(arg(3).trim_end_matches("^{commit}")),
            "show" => {
                if state.fail_show_for.as_deref() == Some(commit.as_str()) {
                    return fail("fatal: bad object");
                }
                if args.iter().any(|a| a == "--numstat") {
                    ok(&format!("{commit} subject\n2\t1\tsrc/{commit}.rs\n"))
                } else {
                    ok(&format!(
                        "commit {commit}\nAuthor: Dev <dev@example.com>\nDate:   today\n\n    subject of {commit}\n"
                    ))
                }
            }
            "notes" => match arg(2) {
                "list" if state.fail_notes_list => fail("fatal: notes ref is corrupt"),
                "list" => match args.get(3) {
                    Some(commit) => match state.notes.iter().find(|(c, _, _)| c == commit) {
                        Some((_, n, _)) => ok(n),
                        None => fail(&format!("error: no note found for object {commit}.")),
                    },
                    None => ok(&state
                        .notes
                        .iter()
                        .map(|(c, n, _)| format!("{n} {c}"))
                        .collect::<Vec<_>>()
                        .join("\n")),
                },
                "show" => match state.notes.iter().find(|(c, _, _)| *c == commit) {
                    Some((_, _, text)) => ok(text),
                    None => fail(&format!("error: no note found for object {commit}.")),
                },
                "add" | "edit" => {
                    state.notes.retain(|(c, _, _)| *c != commit);
                    state
                        .notes
                        .push((commit.clone(), format!("n-{commit}"), message));
                    ok("")
                }
                "remove" => {
                    let before = state.notes.len();
                    state.notes.retain(|(c, _, _)| *c != commit);
                    if state.notes.len() == before {
                        fail(&format!("error: Object {commit} has no note"))
                    } else {
                        ok("")
                    }
                }
                // appending to an existing note leaves the fake's text alone
                // so tests can tell the cached value apart from git's
                "append" => {
                    if !state.notes.iter().any(|(c, _, _)| *c == commit) {
                        state
                            .notes
                            .push((commit.clone(), format!("n-{commit}"), message));
                    }
                    ok("")
                }
                _ => ok(""),
            },
            _ => ok(""),
        }
    }

    pub(crate) fn fake_cache(
        state: Arc<StdMutex<FakeRepo>>,
        newest_first: bool,
    ) -> (Arc<ScriptedRunner>, RepositoryCache) {
        let runner = ScriptedRunner::new(move |args| respond(&state, args));
        let gateway = VcsGateway::new(runner.clone(), NoteRefs::default());
        (runner, RepositoryCache::new(gateway, newest_first))
    }

    fn repo() -> PathBuf {
        PathBuf::from("/repo")
    }

    fn assert_sorted(record: &RepositoryRecord, newest_first: bool) {
        for pair in record.commits.windows(2) {
            if newest_first {
                assert!(pair[0].date >= pair[1].date, "not newest-first: {record:?}");
            } else {
                assert!(pair[0].date <= pair[1].date, "not oldest-first: {record:?}");
            }
        }
    }

    fn assert_unique(record: &RepositoryRecord) {
        let mut hashes: Vec<&str> = record.commits.iter().map(|c| c.commit_hash.as_str()).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), record.commits.len(), "duplicate commits: {record:?}");
    }

    // -----------------------------------------------------------------------
    // load — hydration quota
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_load_hydrates_one_page_at_a_time() {
        let (runner, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2", "c3"]), true);

        let first = cache.load(&repo(), 1).await.unwrap();
        assert_eq!(first.record.commits.len(), 3);
        assert_eq!(first.record.hydrated_count(), 1);
        assert_eq!(runner.count(&["show", "--stat"]), 1);

        let second = cache.load(&repo(), 1).await.unwrap();
        assert_eq!(second.record.hydrated_count(), 2);
        assert_eq!(second.record.commits.iter().filter(|c| c.is_shallow()).count(), 1);
        // one more fetch, the first commit was not re-fetched
        assert_eq!(runner.count(&["show", "--stat"]), 2);
        // paging does not re-correlate
        assert_eq!(runner.count(&["log"]), 1);
    }

    #[tokio::test]
    async fn test_load_fresh_hydrates_in_log_order() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2", "c3"]), false);
        let outcome = cache.load(&repo(), 2).await.unwrap();

        let c1 = outcome.record.commit("c1").unwrap();
        let c3 = outcome.record.commit("c3").unwrap();
        assert!(c1.is_hydrated());
        assert_eq!(c1.author.as_deref(), Some("Dev <dev@example.com>"));
        assert_eq!(c1.message.as_deref(), Some("subject of c1"));
        assert_eq!(c1.note.as_deref(), Some("note for c1"));
        assert_eq!(c1.file_changes.len(), 1);
        assert!(c3.is_shallow());
        assert!(c3.file_changes.is_empty());
    }

    #[tokio::test]
    async fn test_load_zero_hydrates_nothing() {
        let (runner, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2"]), true);
        let outcome = cache.load(&repo(), 0).await.unwrap();
        assert_eq!(outcome.record.commits.len(), 2);
        assert_eq!(outcome.record.hydrated_count(), 0);
        assert_eq!(runner.count(&["show"]), 0);
    }

    #[tokio::test]
    async fn test_load_stops_when_everything_hydrated() {
        let (runner, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2"]), true);
        cache.load(&repo(), 5).await.unwrap();
        let calls = runner.calls().len();

        let again = cache.load(&repo(), 5).await.unwrap();
        assert_eq!(again.record.hydrated_count(), 2);
        assert_eq!(runner.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_load_stores_normalized_repository_url() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1"]), true);
        let outcome = cache.load(&repo(), 0).await.unwrap();
        assert_eq!(
            outcome.record.repository_url.as_deref(),
            Some("https://github.com/acme/widgets")
        );
    }

    #[tokio::test]
    async fn test_load_without_remote_has_no_url() {
        let state = FakeRepo::with_notes(&["c1"]);
        state.lock().unwrap().remote = None;
        let (_, cache) = fake_cache(state, true);
        let outcome = cache.load(&repo(), 0).await.unwrap();
        assert_eq!(outcome.record.repository_url, None);
    }

    // -----------------------------------------------------------------------
    // load — failures
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_load_correlation_failure_leaves_cache_untouched() {
        let state = FakeRepo::with_notes(&["c1"]);
        state.lock().unwrap().fail_notes_list = true;
        let (_, cache) = fake_cache(state, true);

        let err = cache.load(&repo(), 1).await.unwrap_err();
        assert_eq!(
            err,
            NotesError::subprocess("git notes list", "fatal: notes ref is corrupt")
        );
        assert!(cache.record(&repo()).is_none());
    }

    #[tokio::test]
    async fn test_load_hydration_failure_leaves_commit_shallow() {
        let state = FakeRepo::with_notes(&["c1", "c2"]);
        state.lock().unwrap().fail_show_for = Some("c1".to_string());
        let (_, cache) = fake_cache(state, true);

        let outcome = cache.load(&repo(), 2).await.unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].commit_hash, "c1");
        assert!(matches!(
            outcome.failures[0].error,
            NotesError::DetailRetrieval { .. }
        ));
        assert!(outcome.record.commit("c1").unwrap().is_shallow());
        assert!(outcome.record.commit("c2").unwrap().is_hydrated());
    }

    // -----------------------------------------------------------------------
    // Ordering and uniqueness
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_records_sorted_newest_first() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c3", "c2", "c4"]), true);
        let outcome = cache.load(&repo(), 2).await.unwrap();
        assert_sorted(&outcome.record, true);
        assert_eq!(outcome.record.commits[0].commit_hash, "c4");
    }

    #[tokio::test]
    async fn test_records_sorted_oldest_first() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c4", "c1", "c3"]), false);
        cache.load(&repo(), 1).await.unwrap();
        let outcome = cache.load(&repo(), 1).await.unwrap();
        assert_sorted(&outcome.record, false);
        assert_eq!(outcome.record.commits[0].commit_hash, "c1");
    }

    #[tokio::test]
    async fn test_load_note_details_hydrates_shallow_in_place() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2"]), true);
        cache.load(&repo(), 0).await.unwrap();

        cache.load_note_details(&repo(), "c1").await.unwrap();
        let record = cache.record(&repo()).unwrap();
        assert_eq!(record.commits.len(), 2);
        assert!(record.commit("c1").unwrap().is_hydrated());
        assert_unique(&record);
    }

    #[tokio::test]
    async fn test_load_note_details_inserts_new_commit_once() {
        let state = FakeRepo::with_notes(&["c1"]);
        let (_, cache) = fake_cache(state.clone(), true);
        cache.load(&repo(), 0).await.unwrap();

        state
            .lock()
            .unwrap()
            .notes
            .push(("c3".to_string(), "n-c3".to_string(), "late note".to_string()));
        cache.load_note_details(&repo(), "c3").await.unwrap();
        cache.load_note_details(&repo(), "c3").await.unwrap();

        let record = cache.record(&repo()).unwrap();
        assert_eq!(record.commits.len(), 2);
        assert_eq!(record.commit("c3").unwrap().note.as_deref(), Some("late note"));
        assert_unique(&record);
        assert_sorted(&record, true);
    }

    #[tokio::test]
    async fn test_load_note_details_without_record_is_noop() {
        let (runner, cache) = fake_cache(FakeRepo::with_notes(&["c1"]), true);
        cache.load_note_details(&repo(), "c1").await.unwrap();
        assert!(cache.record(&repo()).is_none());
        assert!(runner.calls().is_empty());
    }

    // -----------------------------------------------------------------------
    // Direct mutations
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_update_note_and_remove_commit() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2"]), true);
        cache.load(&repo(), 2).await.unwrap();

        assert!(cache.update_note(&repo(), "c1", "rewritten".to_string()).await);
        assert_eq!(
            cache.commit(&repo(), "c1").unwrap().note.as_deref(),
            Some("rewritten")
        );
        assert!(!cache.update_note(&repo(), "zz", "nothing".to_string()).await);

        assert!(cache.remove_commit(&repo(), "c2").await);
        assert!(cache.commit(&repo(), "c2").is_none());
        assert!(!cache.remove_commit(&repo(), "c2").await);
    }

    #[tokio::test]
    async fn test_clear_then_load_recorrelates() {
        let (runner, cache) = fake_cache(FakeRepo::with_notes(&["c1"]), true);
        cache.load(&repo(), 1).await.unwrap();
        assert!(cache.clear(&repo()).await);
        assert!(!cache.clear(&repo()).await);
        cache.load(&repo(), 1).await.unwrap();
        assert_eq!(runner.count(&["log"]), 2);
    }

    #[tokio::test]
    async fn test_note_text_reads_git_when_repository_uncached() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1"]), true);
        let text = cache.note_text_unlocked(&repo(), "c1").await.unwrap();
        assert_eq!(text.as_deref(), Some("note for c1"));
        assert!(cache.record(&repo()).is_none());

        let missing = cache.note_text_unlocked(&repo(), "c2").await.unwrap();
        assert_eq!(missing, None);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_concurrent_loads_are_serialized_per_repository() {
        let (runner, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2", "c3"]), true);

        let path = repo();
        let (a, b) = tokio::join!(cache.load(&path, 1), cache.load(&path, 1));
        a.unwrap();
        b.unwrap();

        let record = cache.record(&repo()).unwrap();
        assert_eq!(record.hydrated_count(), 2);
        assert_eq!(runner.count(&["log"]), 1);
        assert_unique(&record);
    }

    #[tokio::test]
    async fn test_mutations_wait_for_repository_lock() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1", "c2"]), true);
        let path = repo();
        cache.load(&path, 2).await.unwrap();

        let guard = cache.lock(&path).await;
        assert!(cache.clear(&path).now_or_never().is_none());
        assert!(cache.remove_commit(&path, "c1").now_or_never().is_none());
        assert!(
            cache
                .update_note(&path, "c1", "blocked".to_string())
                .now_or_never()
                .is_none()
        );
        // nothing changed while another sequence held the lock
        assert_eq!(cache.record(&path).unwrap().commits.len(), 2);
        assert_eq!(
            cache.commit(&path, "c1").unwrap().note.as_deref(),
            Some("note for c1")
        );

        drop(guard);
        assert!(cache.remove_commit(&path, "c1").await);
        assert!(cache.clear(&path).await);
    }

    #[tokio::test]
    async fn test_all_records_ordered_by_path() {
        let (_, cache) = fake_cache(FakeRepo::with_notes(&["c1"]), true);
        cache.load(Path::new("/b"), 0).await.unwrap();
        cache.load(Path::new("/a"), 0).await.unwrap();
        let paths: Vec<PathBuf> = cache
            .all_records()
            .into_iter()
            .map(|r| r.repository_path)
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
