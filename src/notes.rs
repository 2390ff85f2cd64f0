//! Note records and the text submitted for embedding.

use std::fmt;

/// Upper bound on request text, in characters. Stands in for the model's token limit.
pub const MAX_REQUEST_CHARS: usize = 8000;

/// Primary key of a note row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(i64);

impl NoteId {
    /// Wraps a raw key.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw key value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for NoteId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A note selected for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Row identifier.
    pub id: NoteId,
    /// Note title.
    pub title: String,
    /// Note body.
    pub content: String,
}

impl Note {
    /// Creates a note from its columns.
    pub fn new(id: NoteId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
        }
    }

    /// Title and content separated by a blank line, cut to [`MAX_REQUEST_CHARS`].
    pub fn request_text(&self) -> String {
        let full = format!("{}\n\n{}", self.title, self.content);
        truncate_chars(full, MAX_REQUEST_CHARS)
    }
}

/// Keeps the first `max_chars` characters of `text`. May cut mid-word.
pub fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((byte_idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_idx);
    }
    text
}
