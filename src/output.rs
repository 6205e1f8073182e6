//! Terminal output: labelled status lines on stderr and commit rendering.
//!
//! Status helpers (`action`, `success`, `fail`, `note`, `detail`) always go
//! to stderr so that `list --json` and `show` output on stdout stays clean.

use console::{Color, Term, style};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use time::macros::format_description;

use crate::model::{CommitRecord, FileChange};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Abbreviated hash length used in listings.
const SHORT_HASH_LEN: usize = 8;

fn stderr_is_tty() -> bool {
    Term::stderr().is_term()
}

fn stdout_is_tty() -> bool {
    Term::stdout().is_term()
}

fn format_label(label: &str, color: Color, is_tty: bool) -> String {
    if is_tty {
        style(label).bold().fg(color).to_string()
    } else {
        label.to_string()
    }
}

fn write_labeled(
    label: &str,
    color: Color,
    msg: &str,
    w: &mut dyn Write,
    is_tty: bool,
) -> io::Result<()> {
    let label = format_label(label, color, is_tty);
    if msg.is_empty() {
        writeln!(w, "{label}")
    } else {
        writeln!(w, "{label} {msg}")
    }
}

pub fn action_to_with_tty(w: &mut dyn Write, label: &str, msg: &str, is_tty: bool) {
    let _ = write_labeled(label, Color::Cyan, msg, w, is_tty);
}

pub fn success_to_with_tty(w: &mut dyn Write, label: &str, msg: &str, is_tty: bool) {
    let _ = write_labeled(label, Color::Green, msg, w, is_tty);
}

pub fn fail_to_with_tty(w: &mut dyn Write, label: &str, msg: &str, is_tty: bool) {
    let _ = write_labeled(label, Color::Red, msg, w, is_tty);
}

pub fn note_to_with_tty(w: &mut dyn Write, msg: &str, is_tty: bool) {
    let _ = write_labeled("Note", Color::Yellow, msg, w, is_tty);
}

pub fn detail_to_with_tty(w: &mut dyn Write, msg: &str, is_tty: bool) {
    let line = if is_tty {
        style(format!("  {msg}")).dim().to_string()
    } else {
        format!("  {msg}")
    };
    let _ = writeln!(w, "{line}");
}

pub fn action(label: &str, msg: &str) {
    action_to_with_tty(&mut io::stderr(), label, msg, stderr_is_tty());
}

pub fn success(label: &str, msg: &str) {
    success_to_with_tty(&mut io::stderr(), label, msg, stderr_is_tty());
}

pub fn fail(label: &str, msg: &str) {
    fail_to_with_tty(&mut io::stderr(), label, msg, stderr_is_tty());
}

pub fn note(msg: &str) {
    note_to_with_tty(&mut io::stderr(), msg, stderr_is_tty());
}

pub fn detail(msg: &str) {
    detail_to_with_tty(&mut io::stderr(), msg, stderr_is_tty());
}

pub fn is_stderr_tty() -> bool {
    stderr_is_tty()
}

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Commit rendering
// ---------------------------------------------------------------------------

pub fn short_hash(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

fn format_date(commit: &CommitRecord) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]");
    commit
        .date
        .format(&fmt)
        .unwrap_or_else(|_| commit.date.to_string())
}

/// One listing entry: a header line and, when hydrated, the first note line.
pub fn commit_summary_to_with_tty(w: &mut dyn Write, commit: &CommitRecord, is_tty: bool) {
    let hash = short_hash(&commit.commit_hash);
    let hash = if is_tty {
        style(hash).yellow().to_string()
    } else {
        hash.to_string()
    };
    let date = format_date(commit);

    let header = match (&commit.author, &commit.message) {
        (Some(author), Some(message)) => format!("{hash} {date} {message} ({author})"),
        _ => format!("{hash} {date} (details not loaded)"),
    };
    let _ = writeln!(w, "{header}");

    if let Some(first_line) = commit.note.as_deref().and_then(|n| n.lines().next()) {
        detail_to_with_tty(w, first_line, is_tty);
    }
}

pub fn commit_summary(commit: &CommitRecord) {
    commit_summary_to_with_tty(&mut io::stdout(), commit, stdout_is_tty());
}

fn file_change_line(change: &FileChange) -> String {
    let status = if change.renamed {
        " (renamed)"
    } else if change.added {
        " (added)"
    } else if change.deleted {
        " (deleted)"
    } else {
        ""
    };
    format!(
        "+{} -{} {}{status}",
        change.insertions, change.deletions, change.file
    )
}

/// Full detail of one commit: metadata, the whole note and file changes.
pub fn commit_detail_to_with_tty(
    w: &mut dyn Write,
    commit: &CommitRecord,
    web_url: Option<&str>,
    is_tty: bool,
) {
    let _ = writeln!(w, "commit {}", commit.commit_hash);
    if let Some(author) = &commit.author {
        let _ = writeln!(w, "Author: {author}");
    }
    let _ = writeln!(w, "Date:   {}", format_date(commit));
    if let Some(url) = web_url {
        let _ = writeln!(w, "Url:    {url}");
    }
    if let Some(message) = &commit.message {
        let _ = writeln!(w, "\n    {message}");
    }
    if let Some(note) = &commit.note {
        let _ = writeln!(w, "\nNotes:");
        for line in note.lines() {
            let _ = writeln!(w, "    {line}");
        }
    }
    if !commit.file_changes.is_empty() {
        let _ = writeln!(w);
        for change in &commit.file_changes {
            detail_to_with_tty(w, &file_change_line(change), is_tty);
        }
    }
}

pub fn commit_detail(commit: &CommitRecord, web_url: Option<&str>) {
    commit_detail_to_with_tty(&mut io::stdout(), commit, web_url, stdout_is_tty());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
