//! Postgres-backed note storage.

use anyhow::{anyhow, Context, Result};
use pgvector::Vector;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Row};

use crate::config::Config;
use crate::notes::{Note, NoteId};
use crate::tls::postgres_tls;

/// Read/update access to the notes table.
///
/// Implementations never create or delete notes.
#[allow(async_fn_in_trait)]
pub trait NoteStore {
    /// Returns every note whose embedding is still unset, materialized in full.
    async fn fetch_candidates(&mut self) -> Result<Vec<Note>>;

    /// Writes `embedding` and the current server time into the note and commits.
    /// On failure nothing is persisted for that note.
    async fn store_embedding(&mut self, id: NoteId, embedding: &[f32]) -> Result<()>;

    /// Releases the underlying connection.
    async fn close(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Postgres table name with an optional schema qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    table: String,
}

impl TableName {
    /// Builds a new table identifier. A `None` schema leaves resolution to `search_path`.
    pub fn new<T>(schema: Option<String>, table: T) -> Result<Self>
    where
        T: Into<String>,
    {
        let table = table.into();
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        if let Some(schema) = &schema {
            anyhow::ensure!(!schema.trim().is_empty(), "schema name must not be blank");
        }
        Ok(Self { schema, table })
    }

    /// Table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.table)),
            None => quote_ident(&self.table),
        }
    }

    /// Query listing every note that still needs an embedding.
    pub fn select_candidates_sql(&self) -> String {
        format!(
            "SELECT id::bigint, title, content FROM {} WHERE embedding IS NULL",
            self.qualified()
        )
    }

    /// Statement writing one embedding and its timestamp.
    pub fn update_embedding_sql(&self) -> String {
        format!(
            "UPDATE {} SET embedding = $1, indexed_at = NOW() WHERE id = $2::bigint",
            self.qualified()
        )
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// [`NoteStore`] over a single tokio-postgres connection.
pub struct PgNoteStore {
    client: Client,
    connection: JoinHandle<()>,
    table: TableName,
    update_sql: String,
}

impl PgNoteStore {
    /// Opens the connection described by `config.database_url`.
    ///
    /// TLS is negotiated according to the URL's `sslmode` (default `prefer`).
    pub async fn connect(config: &Config) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL is not set; cannot connect to Postgres"))?;
        let (client, connection) = tokio_postgres::connect(database_url, postgres_tls()?)
            .await
            .context("failed to connect to Postgres")?;
        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection error");
            }
        });
        tracing::debug!(table = %config.table.qualified(), "connected to Postgres");
        Ok(Self::from_parts(client, connection, config.table.clone()))
    }

    fn from_parts(client: Client, connection: JoinHandle<()>, table: TableName) -> Self {
        let update_sql = table.update_embedding_sql();
        Self {
            client,
            connection,
            table,
            update_sql,
        }
    }
}

impl NoteStore for PgNoteStore {
    async fn fetch_candidates(&mut self) -> Result<Vec<Note>> {
        let rows = self
            .client
            .query(&self.table.select_candidates_sql(), &[])
            .await
            .context("failed to select notes without embeddings")?;
        rows.iter().map(note_from_row).collect()
    }

    async fn store_embedding(&mut self, id: NoteId, embedding: &[f32]) -> Result<()> {
        let transaction = self
            .client
            .transaction()
            .await
            .context("failed to open transaction")?;
        let vector = Vector::from(embedding.to_vec());
        let updated = transaction
            .execute(self.update_sql.as_str(), &[&vector, &id.get()])
            .await;
        match check_update(id, updated) {
            Ok(()) => transaction
                .commit()
                .await
                .with_context(|| format!("failed to commit embedding for note {id}")),
            Err(err) => {
                rollback(transaction, id).await;
                Err(err)
            }
        }
    }

    async fn close(self) -> Result<()> {
        drop(self.client);
        self.connection
            .await
            .context("postgres connection task panicked")?;
        tracing::debug!("closed Postgres connection");
        Ok(())
    }
}

/// Decides whether an `UPDATE` result may be committed. Zero rows means the note vanished.
fn check_update<E>(id: NoteId, updated: std::result::Result<u64, E>) -> Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match updated {
        Ok(0) => Err(anyhow!("note {id} no longer exists")),
        Ok(_) => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to update embedding for note {id}")),
    }
}

async fn rollback(transaction: tokio_postgres::Transaction<'_>, id: NoteId) {
    if let Err(err) = transaction.rollback().await {
        tracing::warn!(note = %id, error = %err, "rollback failed");
    }
}

fn note_from_row(row: &Row) -> Result<Note> {
    let id: i64 = row.try_get(0).context("invalid note id column")?;
    let title: Option<String> = row
        .try_get(1)
        .with_context(|| format!("invalid title for note {id}"))?;
    let content: Option<String> = row
        .try_get(2)
        .with_context(|| format!("invalid content for note {id}"))?;
    Ok(Note::new(
        NoteId::new(id),
        title.unwrap_or_default(),
        content.unwrap_or_default(),
    ))
}
