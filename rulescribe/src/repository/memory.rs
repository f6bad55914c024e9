//! In-memory repository.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{conflict_key, GameRepository, Result};
use crate::record::GameRecord;

/// Vector-backed repository. Ids are assigned sequentially.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    games: Arc<RwLock<Vec<GameRecord>>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing records (ids are assigned where missing).
    pub async fn with_games(games: impl IntoIterator<Item = GameRecord>) -> Result<Self> {
        let repo = Self::new();
        for game in games {
            repo.upsert(&game).await?;
        }
        Ok(repo)
    }

    pub async fn len(&self) -> usize {
        self.games.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.games.read().await.is_empty()
    }

    fn assign_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

fn matches_query(game: &GameRecord, needle: &str) -> bool {
    let contains = |s: &str| s.to_lowercase().contains(needle);
    contains(&game.title) || game.description.as_deref().is_some_and(contains)
}

#[async_trait]
impl GameRepository for InMemoryRepository {
    async fn search(&self, query: &str) -> Result<Vec<GameRecord>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .games
            .read()
            .await
            .iter()
            .filter(|g| matches_query(g, &needle))
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: &GameRecord) -> Result<GameRecord> {
        let (column, key) = conflict_key(record)?;
        let mut stored = record.clone();
        stored.normalize_links();

        let mut games = self.games.write().await;
        let existing = games.iter_mut().find(|g| match column {
            "source_url" => g.source_url.as_deref() == Some(key),
            _ => g.slug.as_deref() == Some(key),
        });

        match existing {
            Some(slot) => {
                stored.id = slot.id.clone().or(stored.id);
                *slot = stored.clone();
            }
            None => {
                if stored.id.is_none() {
                    stored.id = Some(self.assign_id());
                }
                games.push(stored.clone());
            }
        }
        Ok(stored)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<GameRecord>> {
        Ok(self
            .games
            .read()
            .await
            .iter()
            .find(|g| g.id.as_deref() == Some(id))
            .cloned())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<GameRecord>> {
        Ok(self
            .games
            .read()
            .await
            .iter()
            .find(|g| g.slug.as_deref() == Some(slug))
            .cloned())
    }

    async fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<GameRecord>> {
        let mut games = self.games.read().await.clone();
        games.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(games.into_iter().skip(offset).take(limit).collect())
    }

    async fn increment_view_count(&self, id: &str) -> Result<()> {
        if let Some(game) = self
            .games
            .write()
            .await
            .iter_mut()
            .find(|g| g.id.as_deref() == Some(id))
        {
            game.view_count += 1;
        }
        Ok(())
    }
}
