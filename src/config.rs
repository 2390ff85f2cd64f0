//! Command-line and environment configuration for the embedding job.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;

use crate::store::TableName;

/// Environment file consulted before flags are parsed.
pub const DEFAULT_ENV_FILE: &str = ".env.local";
/// Variable that overrides the environment file location.
pub const ENV_FILE_VAR: &str = "NOTES_EMBEDDER_ENV_FILE";
/// Embedding model used when none is configured.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
/// Base URL of the OpenAI-compatible API.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
/// Table holding the notes to embed.
pub const DEFAULT_TABLE: &str = "notes";
/// Tracing filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Raw, unvalidated inputs for a run. Every flag falls back to an environment variable.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "notes-embedder",
    about = "Backfill embeddings for notes that do not have one yet"
)]
pub struct Settings {
    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Embedding model identifier
    #[arg(long, env = "NOTES_EMBEDDER_OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub openai_model: String,

    /// Base URL for the OpenAI-compatible API
    #[arg(long, env = "NOTES_EMBEDDER_OPENAI_BASE", default_value = DEFAULT_OPENAI_BASE)]
    pub openai_base_url: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "NOTES_EMBEDDER_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// Schema qualifying the notes table (defaults to the connection's search_path)
    #[arg(long, env = "NOTES_EMBEDDER_SCHEMA")]
    pub schema: Option<String>,

    /// Table holding the notes
    #[arg(long, env = "NOTES_EMBEDDER_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Tracing filter used when RUST_LOG is unset
    #[arg(long, env = "NOTES_EMBEDDER_LOG", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            openai_api_key: None,
            openai_model: DEFAULT_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE.to_string(),
            openai_dimensions: None,
            schema: None,
            table: DEFAULT_TABLE.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Pre-flight failures. Any of these aborts the run before the database or API is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No API credential was supplied.
    #[error("OPENAI_API_KEY environment variable is required")]
    MissingApiKey,
    /// The model name was blank.
    #[error("embedding model name must not be empty")]
    EmptyModel,
    /// The API base URL was not an http(s) URL.
    #[error("OpenAI base URL must be an http(s) URL, got {0:?}")]
    InvalidBaseUrl(String),
    /// The schema or table name was rejected.
    #[error("invalid notes table: {0}")]
    InvalidTable(String),
}

/// Validated configuration shared by the embedder and the store.
#[derive(Clone)]
pub struct Config {
    /// Connection string; checked only when the connection is attempted.
    pub database_url: Option<String>,
    /// Bearer credential for the embedding provider.
    pub openai_api_key: String,
    /// Embedding model identifier.
    pub openai_model: String,
    /// Base URL of the embedding provider.
    pub openai_base_url: String,
    /// Optional dimension override forwarded to the provider.
    pub openai_dimensions: Option<usize>,
    /// Table holding the notes.
    pub table: TableName,
}

impl TryFrom<Settings> for Config {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        let openai_api_key = settings
            .openai_api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let openai_model = settings.openai_model.trim().to_string();
        if openai_model.is_empty() {
            return Err(ConfigError::EmptyModel);
        }

        let openai_base_url = settings.openai_base_url.trim().to_string();
        if !(openai_base_url.starts_with("http://") || openai_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(openai_base_url));
        }

        let table = TableName::new(settings.schema, settings.table)
            .map_err(|err| ConfigError::InvalidTable(err.to_string()))?;

        Ok(Self {
            database_url: settings.database_url,
            openai_api_key,
            openai_model,
            openai_base_url,
            openai_dimensions: settings.openai_dimensions,
            table,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("openai_api_key", &"<redacted>")
            .field("openai_model", &self.openai_model)
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_dimensions", &self.openai_dimensions)
            .field("table", &self.table.qualified())
            .finish()
    }
}

/// Resolves the environment file location from `NOTES_EMBEDDER_ENV_FILE`.
pub fn env_file_path() -> PathBuf {
    std::env::var_os(ENV_FILE_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE))
}

/// What happened while reading the environment file.
#[derive(Debug, Default)]
pub struct EnvFileReport {
    /// Whether the file could be opened.
    pub found: bool,
    /// Variables set from the file.
    pub applied: Vec<String>,
    /// Lines or read errors that were ignored.
    pub skipped: Vec<String>,
}

/// Loads `path` into the process environment without overriding variables that are
/// already set. Best effort: a missing file is silent and bad lines are skipped.
pub fn load_env_file(path: &Path) -> EnvFileReport {
    let mut report = EnvFileReport::default();
    let entries = match dotenvy::from_filename_iter(path) {
        Ok(entries) => entries,
        Err(err) if err.not_found() => return report,
        Err(err) => {
            report.skipped.push(err.to_string());
            return report;
        }
    };
    report.found = true;
    for entry in entries {
        match entry {
            Ok((key, value)) => {
                if std::env::var_os(&key).is_none() {
                    std::env::set_var(&key, value);
                    report.applied.push(key);
                }
            }
            Err(err) => report.skipped.push(err.to_string()),
        }
    }
    report
}
