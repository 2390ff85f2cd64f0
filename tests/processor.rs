use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};
use pretty_assertions::assert_eq;

use notes_embedder::{
    run, Backend, Config, ConfigError, Embedder, Note, NoteId, NoteOutcome, NoteStore, Processor,
    Settings, MAX_REQUEST_CHARS,
};

const FIXED_VECTOR: [f32; 3] = [0.25, -0.5, 1.0];

#[derive(Debug, Clone)]
struct Row {
    id: i64,
    title: String,
    content: String,
    embedding: Option<Vec<f32>>,
    indexed_at: Option<SystemTime>,
}

impl Row {
    fn pending(id: i64, title: &str, content: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            content: content.to_string(),
            embedding: None,
            indexed_at: None,
        }
    }
}

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    failing_updates: Vec<i64>,
    failing_select: bool,
    update_attempts: Vec<i64>,
    closed: bool,
}

#[derive(Clone)]
struct MemoryStore {
    table: Rc<RefCell<Table>>,
}

impl NoteStore for MemoryStore {
    async fn fetch_candidates(&mut self) -> Result<Vec<Note>> {
        let table = self.table.borrow();
        if table.failing_select {
            return Err(anyhow!("relation \"notes\" does not exist"));
        }
        Ok(table
            .rows
            .iter()
            .filter(|row| row.embedding.is_none())
            .map(|row| Note::new(NoteId::new(row.id), row.title.clone(), row.content.clone()))
            .collect())
    }

    async fn store_embedding(&mut self, id: NoteId, embedding: &[f32]) -> Result<()> {
        let mut table = self.table.borrow_mut();
        table.update_attempts.push(id.get());
        if table.failing_updates.contains(&id.get()) {
            return Err(anyhow!("simulated write failure for note {id}"));
        }
        let row = table
            .rows
            .iter_mut()
            .find(|row| row.id == id.get())
            .ok_or_else(|| anyhow!("note {id} no longer exists"))?;
        row.embedding = Some(embedding.to_vec());
        row.indexed_at = Some(SystemTime::now());
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.table.borrow_mut().closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct FixedEmbedder {
    inputs: RefCell<Vec<String>>,
    fail_containing: Option<&'static str>,
}

impl Embedder for FixedEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        self.inputs.borrow_mut().push(input.to_string());
        if let Some(marker) = self.fail_containing {
            if input.contains(marker) {
                return Err(anyhow!("OpenAI embeddings request failed (429): quota exceeded"));
            }
        }
        Ok(FIXED_VECTOR.to_vec())
    }
}

#[derive(Default)]
struct MockBackend {
    table: Rc<RefCell<Table>>,
    connects: Cell<usize>,
    embedder_builds: Cell<usize>,
}

impl MockBackend {
    fn with_rows(rows: Vec<Row>) -> Self {
        let backend = Self::default();
        backend.table.borrow_mut().rows = rows;
        backend
    }

    fn row(&self, id: i64) -> Row {
        self.table
            .borrow()
            .rows
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .expect("row exists")
    }
}

impl Backend for MockBackend {
    type Store = MemoryStore;
    type Embedder = FixedEmbedder;

    fn embedder(&self, _config: &Config) -> Result<Self::Embedder> {
        self.embedder_builds.set(self.embedder_builds.get() + 1);
        Ok(FixedEmbedder::default())
    }

    async fn connect(&self, _config: &Config) -> Result<Self::Store> {
        self.connects.set(self.connects.get() + 1);
        Ok(MemoryStore {
            table: Rc::clone(&self.table),
        })
    }
}

fn settings_with_key() -> Settings {
    Settings {
        openai_api_key: Some("sk-test".to_string()),
        database_url: Some("postgres://localhost/notes".to_string()),
        ..Settings::default()
    }
}

#[tokio::test]
async fn embeds_every_candidate_in_one_run() {
    let old = SystemTime::now() - Duration::from_secs(3600);
    let mut rows = vec![
        Row::pending(1, "First", "alpha"),
        Row::pending(2, "Second", "beta"),
        Row::pending(3, "Third", "gamma"),
    ];
    rows.push(Row {
        embedding: Some(vec![9.0]),
        indexed_at: Some(old),
        ..Row::pending(4, "Done", "already embedded")
    });
    let backend = MockBackend::with_rows(rows);

    let report = run(settings_with_key(), &backend).await.expect("run");

    assert_eq!(report.candidates, 3);
    assert_eq!(
        report.embedded,
        vec![NoteId::new(1), NoteId::new(2), NoteId::new(3)]
    );
    assert!(report.failed.is_empty());
    for id in 1..=3 {
        let row = backend.row(id);
        assert_eq!(row.embedding, Some(FIXED_VECTOR.to_vec()));
        let indexed_at = row.indexed_at.expect("indexed_at set");
        assert!(indexed_at >= report.started_at);
    }

    let untouched = backend.row(4);
    assert_eq!(untouched.embedding, Some(vec![9.0]));
    assert_eq!(untouched.indexed_at, Some(old));
    assert!(!backend.table.borrow().update_attempts.contains(&4));

    let remaining = backend
        .table
        .borrow()
        .rows
        .iter()
        .filter(|row| row.embedding.is_none())
        .count();
    assert_eq!(remaining, 0);
    assert_eq!(backend.connects.get(), 1);
    assert!(backend.table.borrow().closed);
}

#[tokio::test]
async fn missing_api_key_fails_before_connecting() {
    let backend = MockBackend::with_rows(vec![Row::pending(1, "First", "alpha")]);
    let settings = Settings {
        database_url: Some("postgres://localhost/notes".to_string()),
        ..Settings::default()
    };

    let err = run(settings, &backend).await.unwrap_err();

    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::MissingApiKey)
    );
    assert_eq!(backend.connects.get(), 0);
    assert_eq!(backend.embedder_builds.get(), 0);
    assert!(backend.table.borrow().update_attempts.is_empty());
}

#[tokio::test]
async fn failed_write_does_not_stop_later_notes() {
    let backend = MockBackend::with_rows(vec![
        Row::pending(1, "A", "will fail"),
        Row::pending(2, "B", "will succeed"),
    ]);
    backend.table.borrow_mut().failing_updates.push(1);

    let report = run(settings_with_key(), &backend).await.expect("run");

    assert_eq!(report.failed, vec![NoteId::new(1)]);
    assert_eq!(report.embedded, vec![NoteId::new(2)]);
    assert_eq!(backend.table.borrow().update_attempts, vec![1, 2]);
    assert_eq!(backend.row(1).embedding, None);
    assert_eq!(backend.row(1).indexed_at, None);
    assert_eq!(backend.row(2).embedding, Some(FIXED_VECTOR.to_vec()));
}

#[tokio::test]
async fn failed_embedding_is_reported_and_skipped() {
    let table = Rc::new(RefCell::new(Table {
        rows: vec![
            Row::pending(10, "Quota", "trips the provider"),
            Row::pending(11, "Fine", "works"),
        ],
        ..Table::default()
    }));
    let embedder = FixedEmbedder {
        fail_containing: Some("trips"),
        ..FixedEmbedder::default()
    };
    let mut processor = Processor::new(
        MemoryStore {
            table: Rc::clone(&table),
        },
        embedder,
    );

    let report = processor.run().await.expect("run");

    assert_eq!(report.failed, vec![NoteId::new(10)]);
    assert_eq!(report.embedded, vec![NoteId::new(11)]);
    assert_eq!(table.borrow().update_attempts, vec![11]);
}

#[tokio::test]
async fn process_note_reports_failure_message() {
    let table = Rc::new(RefCell::new(Table {
        rows: vec![Row::pending(5, "Broken", "body")],
        failing_updates: vec![5],
        ..Table::default()
    }));
    let mut processor = Processor::new(MemoryStore { table }, FixedEmbedder::default());

    let outcome = processor
        .process_note(&Note::new(NoteId::new(5), "Broken", "body"))
        .await;

    assert_eq!(
        outcome,
        NoteOutcome::Failed {
            id: NoteId::new(5),
            message: "simulated write failure for note 5".to_string(),
        }
    );
}

#[tokio::test]
async fn vanished_note_is_reported_as_failed() {
    let table = Rc::new(RefCell::new(Table {
        rows: vec![Row::pending(8, "Kept", "body")],
        ..Table::default()
    }));
    let mut processor = Processor::new(
        MemoryStore {
            table: Rc::clone(&table),
        },
        FixedEmbedder::default(),
    );

    // Selected earlier, deleted before the update.
    let outcome = processor
        .process_note(&Note::new(NoteId::new(7), "Gone", "body"))
        .await;

    assert_eq!(
        outcome,
        NoteOutcome::Failed {
            id: NoteId::new(7),
            message: "note 7 no longer exists".to_string(),
        }
    );
    assert_eq!(table.borrow().rows[0].embedding, None);
}

#[tokio::test]
async fn provider_receives_truncated_single_line_text() {
    let content = "line one\nline two\n".repeat(1000);
    let table = Rc::new(RefCell::new(Table {
        rows: vec![
            Row::pending(1, "Long\nTitle", &content),
            Row::pending(2, "Short", "a\nb"),
        ],
        ..Table::default()
    }));
    let mut processor = Processor::new(
        MemoryStore {
            table: Rc::clone(&table),
        },
        FixedEmbedder::default(),
    );

    processor.run().await.expect("run");

    let inputs = processor_inputs(processor);
    assert_eq!(inputs.len(), 2);
    assert!(inputs.iter().all(|input| !input.contains('\n')));
    assert_eq!(inputs[0].chars().count(), MAX_REQUEST_CHARS);
    assert_eq!(inputs[1], "Short  a b");
}

#[tokio::test]
async fn selection_failure_aborts_the_batch() {
    let backend = MockBackend::default();
    backend.table.borrow_mut().failing_select = true;

    let err = run(settings_with_key(), &backend).await.unwrap_err();

    assert!(err.to_string().contains("does not exist"));
    assert!(backend.table.borrow().update_attempts.is_empty());
    assert!(backend.table.borrow().closed);
}

#[tokio::test]
async fn empty_table_is_a_successful_noop() {
    let backend = MockBackend::default();

    let report = run(settings_with_key(), &backend).await.expect("run");

    assert_eq!(report.candidates, 0);
    assert!(report.embedded.is_empty());
    assert!(report.failed.is_empty());
}

fn processor_inputs(processor: Processor<MemoryStore, FixedEmbedder>) -> Vec<String> {
    let (_, embedder) = processor.into_parts();
    embedder.inputs.into_inner()
}
