#![warn(missing_docs)]
//! Backfills vector embeddings for rows in a Postgres `notes` table.

pub mod config;
pub mod embedder;
pub mod logging;
pub mod notes;
pub mod processor;
pub mod store;
pub mod tls;

pub use config::{Config, ConfigError, Settings};
pub use embedder::{Embedder, OpenAiEmbedder};
pub use notes::{Note, NoteId, MAX_REQUEST_CHARS};
pub use processor::{run, Backend, BatchReport, LiveBackend, NoteOutcome, Processor};
pub use store::{NoteStore, PgNoteStore, TableName};
