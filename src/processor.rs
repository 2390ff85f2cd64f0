//! Sequential embedding backfill over the notes table.

use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::config::{Config, Settings};
use crate::embedder::{compute_embedding, Embedder, OpenAiEmbedder};
use crate::notes::{Note, NoteId};
use crate::store::{NoteStore, PgNoteStore};

/// Result of processing a single note.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteOutcome {
    /// The embedding was computed and committed.
    Embedded {
        /// Note that was updated.
        id: NoteId,
        /// Its title, echoed in progress output.
        title: String,
        /// Vector written to the row.
        embedding: Vec<f32>,
    },
    /// Nothing was written for this note. Causes: the provider call failed, the update
    /// or commit failed, or the row vanished between selection and update.
    Failed {
        /// Note that was skipped.
        id: NoteId,
        /// Rendered error chain.
        message: String,
    },
}

/// Summary of one batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Wall-clock time the batch started.
    pub started_at: SystemTime,
    /// Number of candidates selected.
    pub candidates: usize,
    /// Notes embedded and committed, in processing order.
    pub embedded: Vec<NoteId>,
    /// Notes that failed, in processing order.
    pub failed: Vec<NoteId>,
}

impl BatchReport {
    fn new(started_at: SystemTime, candidates: usize) -> Self {
        Self {
            started_at,
            candidates,
            embedded: Vec::with_capacity(candidates),
            failed: Vec::new(),
        }
    }
}

/// Walks every candidate note once, embedding and committing them one at a time.
pub struct Processor<S, E> {
    store: S,
    embedder: E,
}

impl<S: NoteStore, E: Embedder> Processor<S, E> {
    /// Wraps a store and an embedder.
    pub fn new(store: S, embedder: E) -> Self {
        Self { store, embedder }
    }

    /// Selects all unembedded notes and processes them in selection order.
    ///
    /// Only the selection can fail the batch; per-note failures are reported and skipped.
    pub async fn run(&mut self) -> Result<BatchReport> {
        let started_at = SystemTime::now();
        let notes = self.store.fetch_candidates().await?;
        println!("Found {} notes to process.", notes.len());
        tracing::info!(candidates = notes.len(), "starting embedding batch");

        let mut report = BatchReport::new(started_at, notes.len());
        for note in &notes {
            match self.process_note(note).await {
                NoteOutcome::Embedded { id, title, .. } => {
                    println!("Processed note {id}: {title}");
                    report.embedded.push(id);
                }
                NoteOutcome::Failed { id, message } => {
                    println!("Error processing note {id}: {message}");
                    tracing::warn!(note = %id, error = %message, "note skipped");
                    report.failed.push(id);
                }
            }
        }

        println!("Finished processing notes.");
        tracing::info!(
            embedded = report.embedded.len(),
            failed = report.failed.len(),
            "embedding batch complete"
        );
        Ok(report)
    }

    /// Embeds one note and persists the vector.
    pub async fn process_note(&mut self, note: &Note) -> NoteOutcome {
        match self.embed_and_store(note).await {
            Ok(embedding) => NoteOutcome::Embedded {
                id: note.id,
                title: note.title.clone(),
                embedding,
            },
            Err(err) => NoteOutcome::Failed {
                id: note.id,
                message: format!("{err:#}"),
            },
        }
    }

    async fn embed_and_store(&mut self, note: &Note) -> Result<Vec<f32>> {
        let text = note.request_text();
        let embedding = compute_embedding(&self.embedder, &text).await?;
        self.store.store_embedding(note.id, &embedding).await?;
        Ok(embedding)
    }

    /// Gives back the store and embedder, e.g. to close the store.
    pub fn into_parts(self) -> (S, E) {
        (self.store, self.embedder)
    }
}

/// Builds the collaborators a run needs from validated configuration.
#[allow(async_fn_in_trait)]
pub trait Backend {
    /// Store implementation.
    type Store: NoteStore;
    /// Embedder implementation.
    type Embedder: Embedder;

    /// Constructs the embedding client.
    fn embedder(&self, config: &Config) -> Result<Self::Embedder>;

    /// Opens the datastore connection.
    async fn connect(&self, config: &Config) -> Result<Self::Store>;
}

/// Postgres + OpenAI backend used by the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveBackend;

impl Backend for LiveBackend {
    type Store = PgNoteStore;
    type Embedder = OpenAiEmbedder;

    fn embedder(&self, config: &Config) -> Result<Self::Embedder> {
        OpenAiEmbedder::from_config(config)
    }

    async fn connect(&self, config: &Config) -> Result<Self::Store> {
        PgNoteStore::connect(config).await
    }
}

/// Validates `settings`, then runs one batch against `backend`.
///
/// A missing API key fails here before the backend is asked for anything.
pub async fn run<B: Backend>(settings: Settings, backend: &B) -> Result<BatchReport> {
    let config = Config::try_from(settings)?;
    tracing::debug!(?config, "configuration loaded");
    let embedder = backend
        .embedder(&config)
        .context("failed to build embedding client")?;
    let store = backend.connect(&config).await?;

    let mut processor = Processor::new(store, embedder);
    let report = processor.run().await;
    let (store, _) = processor.into_parts();
    let closed = store.close().await;
    let report = report?;
    closed?;
    Ok(report)
}
