use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use notekeeper_cli::cache::RepositoryCache;
use notekeeper_cli::commands::{
    Attempt, Choice, Effect, NoteCommandExecutor, Outcome, Request, follow_up,
};
use notekeeper_cli::config::{CliOverrides, NotesConfig, Settings};
use notekeeper_cli::error::NotesError;
use notekeeper_cli::git::{VcsGateway, find_repository_root};
use notekeeper_cli::output::{self, short_hash};
use notekeeper_cli::scm_url;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Notekeeper: browse, annotate and sync git notes.
///
/// Lists commits that carry notes, shows their details, and adds, edits,
/// removes and syncs notes against the configured remote.
#[derive(Parser, Debug)]
#[command(
    name = "notekeeper",
    version,
    about,
    after_help = "Examples:\n  notekeeper list --limit 10\n  notekeeper show HEAD~2\n  notekeeper add -m \"Reviewed by QA\"\n  notekeeper append 4f2a1c -m \"Follow-up fixed\"\n  notekeeper push\n  notekeeper config set load_limit 50"
)]
struct Cli {
    /// Path inside the repository to operate on (defaults to the current directory).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Notes ref to read and write, e.g. refs/notes/review.
    #[arg(long, global = true)]
    notes_ref: Option<String>,

    /// Skip confirmation prompts.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Show debug diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List commits that carry notes.
    List {
        /// How many commits to load in full.
        #[arg(long)]
        limit: Option<usize>,
        /// Print the loaded records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one commit with its note and file changes.
    Show {
        /// Commit to show.
        commit: String,
    },

    /// Add a note to a commit.
    Add {
        /// Commit to annotate (defaults to HEAD).
        commit: Option<String>,
        /// Note text.
        #[arg(short, long)]
        message: String,
        /// Overwrite an existing note.
        #[arg(short, long)]
        force: bool,
    },

    /// Replace the note on a commit.
    Edit {
        /// Commit whose note to replace (defaults to HEAD).
        commit: Option<String>,
        /// New note text.
        #[arg(short, long)]
        message: String,
    },

    /// Append a paragraph to the note on a commit.
    Append {
        /// Commit whose note to extend (defaults to HEAD).
        commit: Option<String>,
        /// Text to append.
        #[arg(short, long)]
        message: String,
    },

    /// Remove the note from a commit.
    Remove {
        /// Commit whose note to remove.
        commit: String,
    },

    /// Remove notes attached to commits that no longer exist.
    Prune,

    /// Fetch notes from the remote.
    Fetch {
        /// Replace local notes with the remote ones.
        #[arg(short, long)]
        force: bool,
    },

    /// Push notes to the remote.
    Push {
        /// Replace remote notes with the local ones.
        #[arg(short, long)]
        force: bool,
    },

    /// Re-scan the repository for notes.
    Check,

    /// Print the web URL of a commit on the hosting provider.
    Url {
        /// Commit to link (defaults to HEAD).
        commit: Option<String>,
    },

    /// Show or change persisted settings.
    Config {
        #[command(subcommand)]
        config_command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the resolved settings.
    Show,
    /// Persist one setting.
    Set {
        /// Setting name, e.g. load_limit.
        key: String,
        /// New value. An empty string unsets text settings.
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Resolved settings plus the cache and executor built from them.
struct Session {
    settings: Settings,
    path: PathBuf,
    assume_yes: bool,
    executor: NoteCommandExecutor,
}

impl Session {
    fn new(cli: &Cli, limit: Option<usize>) -> Result<Self> {
        let config = NotesConfig::load()?;
        let settings = config.resolve(&CliOverrides {
            notes_ref: cli.notes_ref.as_deref(),
            load_limit: limit,
        })?;

        let path = match &cli.repo {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("failed to read current directory")?,
        };

        let gateway = VcsGateway::git(settings.note_refs());
        let cache = Arc::new(RepositoryCache::new(gateway, settings.sort_date_newest_first));
        let executor = NoteCommandExecutor::new(cache, settings.load_limit);

        Ok(Self {
            settings,
            path,
            assume_yes: cli.yes,
            executor,
        })
    }

    fn cache(&self) -> &RepositoryCache {
        self.executor.cache()
    }

    fn root(&self) -> Result<PathBuf> {
        Ok(find_repository_root(&self.path)?)
    }
}

// ---------------------------------------------------------------------------
// Read-only subcommands
// ---------------------------------------------------------------------------

async fn run_list(session: &Session, json: bool) -> Result<()> {
    let root = session.root()?;
    let outcome = session
        .cache()
        .load(&root, session.settings.load_limit)
        .await?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&outcome.record).context("failed to serialize notes")?;
        println!("{rendered}");
        return Ok(());
    }

    for failure in &outcome.failures {
        output::fail(
            "Failed",
            &format!("to load {}: {}", short_hash(&failure.commit_hash), failure.error),
        );
    }

    let record = &outcome.record;
    if record.commits.is_empty() {
        output::note(&format!(
            "No notes found under {}",
            session.settings.local_note_ref
        ));
        return Ok(());
    }

    for commit in &record.commits {
        output::commit_summary(commit);
    }

    let shallow = record.commits.len() - record.hydrated_count();
    if shallow > 0 {
        output::note(&format!(
            "{shallow} more commit(s) with notes; use --limit to load more"
        ));
    }
    Ok(())
}

async fn run_show(session: &Session, rev: &str) -> Result<()> {
    let root = session.root()?;
    let cache = session.cache();
    let commit = cache.gateway().resolve_commit(&root, rev).await?;

    cache.load(&root, 0).await?;
    cache.load_note_details(&root, &commit).await?;

    let Some(record) = cache.commit(&root, &commit) else {
        bail!("No note found for commit {}", short_hash(&commit));
    };
    let url = cache
        .record(&root)
        .and_then(|r| r.repository_url)
        .map(|u| scm_url::resolve(&u, &commit, &session.settings.scm_url_templates));

    output::commit_detail(&record, url.as_deref());
    Ok(())
}

async fn run_check(session: &Session) -> Result<()> {
    let root = session.root()?;
    output::action("Checking", &root.display().to_string());

    session.cache().clear(&root).await;
    let outcome = session
        .cache()
        .load(&root, session.settings.load_limit)
        .await?;

    output::success(
        "Found",
        &format!("{} commit(s) with notes", outcome.record.commits.len()),
    );
    for failure in &outcome.failures {
        output::detail(&format!(
            "could not load {}: {}",
            short_hash(&failure.commit_hash),
            failure.error
        ));
    }
    Ok(())
}

async fn run_url(session: &Session, rev: Option<&str>) -> Result<()> {
    let root = session.root()?;
    let gateway = session.cache().gateway();
    let commit = gateway.resolve_commit(&root, rev.unwrap_or("HEAD")).await?;

    let Some(remote_url) = gateway.remote_url(&root).await? else {
        bail!(
            "Remote '{}' is not configured for {}",
            session.settings.remote,
            root.display()
        );
    };

    println!(
        "{}",
        scm_url::resolve(&remote_url, &commit, &session.settings.scm_url_templates)
    );
    Ok(())
}

fn run_config(cli: &Cli, config_command: &ConfigCommand) -> Result<()> {
    match config_command {
        ConfigCommand::Show => {
            let settings = NotesConfig::load()?.resolve(&CliOverrides {
                notes_ref: cli.notes_ref.as_deref(),
                load_limit: None,
            })?;
            let rendered =
                toml::to_string_pretty(&settings).context("failed to serialize settings")?;
            print!("{rendered}");
            if let Some(path) = NotesConfig::config_path() {
                output::detail(&format!("config file: {}", path.display()));
            }
        }
        ConfigCommand::Set { key, value } => {
            let mut config = NotesConfig::load()?;
            config.set(key, value)?;
            config.save()?;
            output::success("Saved", &format!("{key} = {}", value.trim()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

fn confirm_prompt(request: &Request, settings: &Settings) -> String {
    match request {
        Request::Fetch { force: true } => format!(
            "Force fetch notes from '{}'? Local notes will be replaced.",
            settings.remote
        ),
        Request::Fetch { force: false } => format!("Fetch notes from '{}'?", settings.remote),
        Request::Push { force: true } => format!(
            "Force push notes to '{}'? Remote notes will be replaced.",
            settings.remote
        ),
        Request::Push { force: false } => format!("Push notes to '{}'?", settings.remote),
        Request::Remove { commit } => format!("Remove the note from {commit}?"),
        Request::Prune => "Prune notes attached to missing commits?".to_string(),
        _ => "Continue?".to_string(),
    }
}

/// Whether `request` must be confirmed before it runs.
fn needs_confirmation(settings: &Settings, assume_yes: bool, request: &Request) -> bool {
    !assume_yes && settings.requires_confirmation(request)
}

fn approved(session: &Session, request: &Request) -> Result<bool> {
    if !needs_confirmation(&session.settings, session.assume_yes, request) {
        return Ok(true);
    }
    confirm(&confirm_prompt(request, &session.settings))
}

fn decline_unattended(w: &mut dyn Write) {
    output::note_to_with_tty(w, "stderr is not a terminal; pass --yes to confirm", false);
}

/// Ask for confirmation. A non-interactive session declines.
fn confirm(prompt: &str) -> Result<bool> {
    if !output::is_stderr_tty() {
        decline_unattended(&mut io::stderr());
        return Ok(false);
    }
    let result = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .context("Failed to read user input for confirmation")?;
    // None means the user pressed Esc or Ctrl-C
    Ok(result.unwrap_or(false))
}

/// Let the user pick one of `choices`. A non-interactive session cancels.
fn choose(prompt: &str, choices: &[Choice]) -> Result<Choice> {
    if !output::is_stderr_tty() {
        return Ok(Choice::Cancel);
    }
    let labels: Vec<String> = choices.iter().map(ToString::to_string).collect();
    let selected = dialoguer::Select::new()
        .with_prompt(prompt)
        .items(&labels)
        .default(choices.len().saturating_sub(1))
        .interact_opt()
        .context("Failed to read user input for choice")?;
    Ok(selected
        .and_then(|i| choices.get(i).copied())
        .unwrap_or(Choice::Cancel))
}

fn report(effect: &Effect) {
    match effect {
        Effect::NoteAdded { commit } => {
            output::success("Added", &format!("note to {}", short_hash(commit)));
        }
        Effect::NoteEdited { commit } => {
            output::success("Edited", &format!("note on {}", short_hash(commit)));
        }
        Effect::NoteAppended { commit, .. } => {
            output::success("Appended", &format!("to note on {}", short_hash(commit)));
        }
        Effect::NoteRemoved { commit } => {
            output::success("Removed", &format!("note from {}", short_hash(commit)));
        }
        Effect::Pruned => output::success("Pruned", "orphaned notes"),
        Effect::Fetched { output: progress } => {
            output::success("Fetched", "notes");
            verbose_lines(progress);
        }
        Effect::Pushed { output: progress } => {
            output::success("Pushed", "notes");
            verbose_lines(progress);
        }
    }
}

fn verbose_lines(text: &str) {
    if output::is_verbose() {
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .for_each(output::detail);
    }
}

/// Stop after a cancelled choice or declined confirmation. A cancelled
/// failure still fails the command.
fn cancelled(failure: Option<NotesError>) -> Result<()> {
    output::note("Cancelled");
    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

/// Drive one request through confirmation, execution and at most one
/// follow-up chosen by the user.
async fn run_request(session: &Session, request: Request) -> Result<()> {
    if !approved(session, &request)? {
        return cancelled(None);
    }

    let executor = &session.executor;
    let outcome = executor
        .execute(&session.path, &request, Attempt::Initial)
        .await;

    let (choice, failure) = match outcome {
        Outcome::Done(effect) => {
            report(&effect);
            return Ok(());
        }
        Outcome::Terminal(error) => return Err(error.into()),
        Outcome::Conflict { commit, choices } => {
            output::note(&format!("{} already has a note", short_hash(&commit)));
            (choose("What would you like to do?", &choices)?, None)
        }
        Outcome::Failed { error, choices } => {
            output::fail("Failed", &error.to_string());
            (choose("How would you like to continue?", &choices)?, Some(error))
        }
    };

    let Some(next) = follow_up(&request, choice) else {
        return cancelled(failure);
    };
    if !approved(session, &next)? {
        return cancelled(failure);
    }

    match executor
        .execute(&session.path, &next, Attempt::Followup)
        .await
    {
        Outcome::Done(effect) => {
            report(&effect);
            Ok(())
        }
        Outcome::Terminal(error) | Outcome::Failed { error, .. } => Err(error.into()),
        Outcome::Conflict { commit, .. } => {
            bail!("{} already has a note", short_hash(&commit))
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "notekeeper_cli=debug,notekeeper=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let limit = match &cli.command {
        Command::List { limit, .. } => *limit,
        _ => None,
    };

    if let Command::Config { config_command } = &cli.command {
        return run_config(&cli, config_command);
    }

    let session = Session::new(&cli, limit)?;
    match cli.command {
        Command::List { json, .. } => run_list(&session, json).await,
        Command::Show { commit } => run_show(&session, &commit).await,
        Command::Check => run_check(&session).await,
        Command::Url { commit } => run_url(&session, commit.as_deref()).await,
        Command::Add {
            commit,
            message,
            force,
        } => {
            run_request(
                &session,
                Request::Add {
                    commit,
                    message,
                    force,
                },
            )
            .await
        }
        Command::Edit { commit, message } => {
            run_request(&session, Request::Edit { commit, message }).await
        }
        Command::Append { commit, message } => {
            run_request(&session, Request::Append { commit, message }).await
        }
        Command::Remove { commit } => run_request(&session, Request::Remove { commit }).await,
        Command::Prune => run_request(&session, Request::Prune).await,
        Command::Fetch { force } => run_request(&session, Request::Fetch { force }).await,
        Command::Push { force } => run_request(&session, Request::Push { force }).await,
        Command::Config { .. } => Ok(()),
    }
}

fn block_on(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(cli))
}

fn main() {
    let cli = Cli::parse();
    output::set_verbose(cli.verbose);
    init_tracing(cli.verbose);

    if let Err(e) = block_on(cli) {
        output::fail("error:", &format!("{e:#}"));
        process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
