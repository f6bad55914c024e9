//! Game record persistence.
//!
//! The core only ever talks to [`GameRepository`]. Two adapters ship with
//! the crate: [`InMemoryRepository`] for tests and dev mode, and
//! [`SupabaseRepository`] for a PostgREST endpoint.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;

use crate::record::GameRecord;

pub use memory::InMemoryRepository;
pub use supabase::{SupabaseConfig, SupabaseRepository};

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store returned an error status
    #[error("Store error {status}: {message}")]
    Server { status: u16, message: String },

    /// Store answered with something unexpected
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Record has neither `source_url` nor `slug` to upsert on
    #[error("record has no upsert key (source_url or slug)")]
    MissingKey,

    /// Client could not be set up
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Upsert conflict column for a record: `source_url` when set, else `slug`.
pub fn conflict_key(record: &GameRecord) -> Result<(&'static str, &str)> {
    if let Some(url) = record.source_url.as_deref().filter(|s| !s.is_empty()) {
        return Ok(("source_url", url));
    }
    record
        .slug
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|slug| ("slug", slug))
        .ok_or(RepositoryError::MissingKey)
}

/// Storage for game records.
#[async_trait]
pub trait GameRepository: Send + Sync {
    /// Case-insensitive match on title or description.
    async fn search(&self, query: &str) -> Result<Vec<GameRecord>>;

    /// Insert or update keyed by [`conflict_key`]; returns the stored row.
    async fn upsert(&self, record: &GameRecord) -> Result<GameRecord>;

    async fn get_by_id(&self, id: &str) -> Result<Option<GameRecord>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<GameRecord>>;

    /// Most recently updated first.
    async fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<GameRecord>>;

    async fn increment_view_count(&self, id: &str) -> Result<()>;
}
