//! Local config file and resolved runtime settings.
//!
//! Persists user preferences in `$HOME/.notekeeper/config.toml`. Every field
//! is optional; [`NotesConfig::resolve`] layers CLI flags and environment
//! variables on top and fills in defaults to produce [`Settings`].
//!
//! The config path uses a hardcoded `$HOME/.notekeeper` base on all
//! platforms rather than platform-aware config directories.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::commands::{Confirmation, Request};
use crate::git::{DEFAULT_NOTES_REF, DEFAULT_REMOTE, NoteRefs};
use crate::scm_url::default_templates;

/// Default number of commits hydrated per page.
pub const DEFAULT_LOAD_LIMIT: usize = 20;

/// Environment variable overriding the local notes ref.
const NOTES_REF_ENV_VAR: &str = "NOTEKEEPER_NOTES_REF";

/// Environment variable overriding the hydration page size.
const LOAD_LIMIT_ENV_VAR: &str = "NOTEKEEPER_LOAD_LIMIT";

/// Config root directory under `$HOME/`.
const CONFIG_ROOT_DIR_NAME: &str = ".notekeeper";

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Keys accepted by `config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "local_note_ref",
    "remote_note_ref",
    "remote",
    "load_limit",
    "sort_date_newest_first",
    "scm_url_templates",
    "confirm_push_and_fetch",
    "confirm_removal",
    "confirm_prune",
];

/// Persisted user configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NotesConfig {
    /// Notes ref read and written locally.
    pub local_note_ref: Option<String>,
    /// Notes ref on the remote side of fetch/push refspecs.
    pub remote_note_ref: Option<String>,
    /// Remote used for fetch, push and web URLs.
    pub remote: Option<String>,
    /// How many commits to hydrate per page.
    pub load_limit: Option<usize>,
    /// Sort commits newest first (`true`) or oldest first.
    pub sort_date_newest_first: Option<bool>,
    /// `host/{path1}/.../{commitId}` templates for web URLs.
    pub scm_url_templates: Option<Vec<String>>,
    pub confirm_push_and_fetch: Option<bool>,
    pub confirm_removal: Option<bool>,
    pub confirm_prune: Option<bool>,
}

/// Fully resolved settings for one invocation.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub local_note_ref: String,
    pub remote_note_ref: String,
    pub remote: String,
    pub load_limit: usize,
    pub sort_date_newest_first: bool,
    pub scm_url_templates: Vec<String>,
    pub confirm_push_and_fetch: bool,
    pub confirm_removal: bool,
    pub confirm_prune: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_note_ref: DEFAULT_NOTES_REF.to_string(),
            remote_note_ref: DEFAULT_NOTES_REF.to_string(),
            remote: DEFAULT_REMOTE.to_string(),
            load_limit: DEFAULT_LOAD_LIMIT,
            sort_date_newest_first: true,
            scm_url_templates: default_templates(),
            confirm_push_and_fetch: true,
            confirm_removal: true,
            confirm_prune: true,
        }
    }
}

impl Settings {
    pub fn note_refs(&self) -> NoteRefs {
        NoteRefs {
            local: self.local_note_ref.clone(),
            remote: self.remote_note_ref.clone(),
            remote_name: self.remote.clone(),
        }
    }

    /// Whether the host must confirm before running `request`.
    pub fn requires_confirmation(&self, request: &Request) -> bool {
        match request.confirmation() {
            Some(Confirmation::Transfer) => self.confirm_push_and_fetch,
            Some(Confirmation::Removal) => self.confirm_removal,
            Some(Confirmation::Prune) => self.confirm_prune,
            None => false,
        }
    }
}

/// Per-invocation CLI flags that take part in resolution.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides<'a> {
    pub notes_ref: Option<&'a str>,
    pub load_limit: Option<usize>,
}

impl NotesConfig {
    /// Resolve the config file path: `$HOME/.notekeeper/config.toml`.
    ///
    /// Returns `None` if `$HOME` cannot be determined.
    pub fn config_path() -> Option<PathBuf> {
        Some(Self::config_path_with_home(home_dir()?.as_path()))
    }

    fn config_path_with_home(home: &Path) -> PathBuf {
        home.join(CONFIG_ROOT_DIR_NAME).join(CONFIG_FILE_NAME)
    }

    /// Load config from disk. Returns defaults if the config file does not exist.
    ///
    /// Parse errors and I/O errors (other than file-not-found) are hard
    /// failures.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config file at {}", path.display()))
            }
        }
    }

    /// Save config to disk, creating parent directories if needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path: $HOME is not set"))?;
        self.save_to(&path)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory at {}", parent.display())
            })?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, &contents)
            .with_context(|| format!("failed to write config file at {}", path.display()))?;
        Ok(())
    }

    /// Set one field from its string form, as given to `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "local_note_ref" => self.local_note_ref = non_empty_trimmed(Some(value.to_string())),
            "remote_note_ref" => self.remote_note_ref = non_empty_trimmed(Some(value.to_string())),
            "remote" => self.remote = non_empty_trimmed(Some(value.to_string())),
            "load_limit" => self.load_limit = Some(parse_load_limit(value)?),
            "sort_date_newest_first" => self.sort_date_newest_first = Some(parse_bool(key, value)?),
            "scm_url_templates" => {
                let templates: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                self.scm_url_templates = (!templates.is_empty()).then_some(templates);
            }
            "confirm_push_and_fetch" => self.confirm_push_and_fetch = Some(parse_bool(key, value)?),
            "confirm_removal" => self.confirm_removal = Some(parse_bool(key, value)?),
            "confirm_prune" => self.confirm_prune = Some(parse_bool(key, value)?),
            _ => bail!(
                "unknown config key '{key}'. Expected one of: {}",
                CONFIG_KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Resolve effective settings.
    ///
    /// The local notes ref and the load limit use layered precedence
    /// (highest wins):
    /// 1. CLI flag for this invocation
    /// 2. `NOTEKEEPER_NOTES_REF` / `NOTEKEEPER_LOAD_LIMIT`
    /// 3. the persisted config file
    /// 4. defaults
    ///
    /// Empty or whitespace-only values fall through. The remote notes ref
    /// follows the local one unless it is configured separately.
    pub fn resolve(&self, cli: &CliOverrides<'_>) -> Result<Settings> {
        self.resolve_with_env(
            cli,
            std::env::var(NOTES_REF_ENV_VAR).ok(),
            std::env::var(LOAD_LIMIT_ENV_VAR).ok(),
        )
    }

    fn resolve_with_env(
        &self,
        cli: &CliOverrides<'_>,
        env_notes_ref: Option<String>,
        env_load_limit: Option<String>,
    ) -> Result<Settings> {
        let defaults = Settings::default();

        let local_note_ref = non_empty_trimmed(cli.notes_ref.map(str::to_string))
            .or_else(|| non_empty_trimmed(env_notes_ref))
            .or_else(|| non_empty_trimmed(self.local_note_ref.clone()))
            .unwrap_or(defaults.local_note_ref);

        let remote_note_ref = non_empty_trimmed(self.remote_note_ref.clone())
            .unwrap_or_else(|| local_note_ref.clone());

        let env_load_limit = match non_empty_trimmed(env_load_limit) {
            Some(value) => Some(
                parse_load_limit(&value)
                    .with_context(|| format!("invalid {LOAD_LIMIT_ENV_VAR} value"))?,
            ),
            None => None,
        };
        let load_limit = cli
            .load_limit
            .or(env_load_limit)
            .or(self.load_limit)
            .unwrap_or(defaults.load_limit);

        Ok(Settings {
            local_note_ref,
            remote_note_ref,
            remote: non_empty_trimmed(self.remote.clone()).unwrap_or(defaults.remote),
            load_limit,
            sort_date_newest_first: self
                .sort_date_newest_first
                .unwrap_or(defaults.sort_date_newest_first),
            scm_url_templates: self
                .scm_url_templates
                .clone()
                .unwrap_or(defaults.scm_url_templates),
            confirm_push_and_fetch: self
                .confirm_push_and_fetch
                .unwrap_or(defaults.confirm_push_and_fetch),
            confirm_removal: self.confirm_removal.unwrap_or(defaults.confirm_removal),
            confirm_prune: self.confirm_prune.unwrap_or(defaults.confirm_prune),
        })
    }
}

fn parse_load_limit(value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("load limit must be a non-negative integer, got '{value}': {e}"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("{key} expects true or false, got '{value}'"),
    }
}

/// Return the trimmed value if non-empty after trimming, otherwise `None`.
fn non_empty_trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Resolve the user's home directory from the `HOME` environment variable.
fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
