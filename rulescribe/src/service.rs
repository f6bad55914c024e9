//! Service layer: wires the pipeline, link resolver and repository together.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, ScribeError};
use crate::links::{LinkResolver, ResolveOutcome};
use crate::pipeline::{rebase, Pipeline};
use crate::prompt::PromptAssembler;
use crate::record::GameRecord;
use crate::repository::GameRepository;
use crate::slug::slugify;

/// Entry points used by the CLI (or an HTTP layer).
#[derive(Clone)]
pub struct GameService {
    repository: Arc<dyn GameRepository>,
    pipeline: Pipeline,
    resolver: LinkResolver,
    context_match_limit: usize,
}

impl GameService {
    pub fn new(
        repository: Arc<dyn GameRepository>,
        pipeline: Pipeline,
        resolver: LinkResolver,
    ) -> Self {
        Self {
            repository,
            pipeline,
            resolver,
            context_match_limit: 3,
        }
    }

    pub fn with_context_match_limit(mut self, limit: usize) -> Self {
        self.context_match_limit = limit;
        self
    }

    pub async fn search_games(&self, query: &str) -> Result<Vec<GameRecord>> {
        Ok(self.repository.search(query).await?)
    }

    pub async fn list_recent_games(&self, limit: usize, offset: usize) -> Result<Vec<GameRecord>> {
        Ok(self.repository.list_recent(limit, offset).await?)
    }

    /// Fetch a game and count the view.
    pub async fn get_game_by_slug(&self, slug: &str) -> Result<GameRecord> {
        let game = self
            .repository
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| ScribeError::NotFound(slug.to_string()))?;

        if let Some(id) = &game.id {
            if let Err(e) = self.repository.increment_view_count(id).await {
                warn!(slug = %slug, error = %e, "Failed to count view");
            }
        }
        Ok(game)
    }

    /// Generate a record for `query`, store it, then resolve its links.
    ///
    /// A stored record owning the same slug is updated in place, keeping its
    /// identity and counters and bumping its version. Nothing is stored when
    /// generation fails.
    pub async fn create_game_from_query(&self, query: &str) -> Result<GameRecord> {
        let matches = self.repository.search(query).await?;
        let context = PromptAssembler::matches_context(&matches, self.context_match_limit);

        let existing = match slugify(query) {
            Some(slug) => self.repository.get_by_slug(&slug).await?,
            None => None,
        };
        let output = self.pipeline.run(query, &context, existing.as_ref()).await?;

        let mut record = output.record;
        if existing.is_none() {
            if let Some(slug) = record.slug.clone() {
                if let Some(stored) = self.repository.get_by_slug(&slug).await? {
                    warn!(slug = %slug, data_version = stored.data_version, "Slug already stored, updating it");
                    rebase(&mut record, &stored);
                }
            }
        }

        let saved = self.repository.upsert(&record).await?;
        info!(slug = ?saved.slug, run_id = %output.run_id, data_version = saved.data_version, "Game stored");

        self.resolve_and_store(saved, true).await
    }

    /// Regenerate a stored record using itself as context.
    pub async fn regenerate(&self, slug: &str) -> Result<GameRecord> {
        let existing = self
            .repository
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| ScribeError::NotFound(slug.to_string()))?;

        let query = existing.title.trim().to_string();
        if query.is_empty() {
            warn!(slug = %slug, "Skipping regeneration, record has no title");
            return Err(ScribeError::MissingTitle(slug.to_string()));
        }

        let context = PromptAssembler::existing_context(&existing);
        let output = self.pipeline.run(&query, &context, Some(&existing)).await?;
        let saved = self.repository.upsert(&output.record).await?;
        info!(slug = %slug, data_version = saved.data_version, "Metadata regenerated");

        let reread = match saved.id.clone() {
            Some(id) => self.repository.get_by_id(&id).await?.unwrap_or(saved),
            None => saved,
        };
        self.resolve_and_store(reread, true).await
    }

    /// Re-check the links of a stored record.
    pub async fn refresh_links(&self, slug: &str, force: bool) -> Result<GameRecord> {
        let game = self
            .repository
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| ScribeError::NotFound(slug.to_string()))?;
        self.resolve_and_store(game, force).await
    }

    async fn resolve_and_store(&self, game: GameRecord, force: bool) -> Result<GameRecord> {
        match self.resolver.resolve(&game, force).await {
            ResolveOutcome::Updated { record, changed } => {
                let saved = self.repository.upsert(&record).await?;
                info!(slug = ?saved.slug, changed = ?changed, "Links stored");
                Ok(saved)
            }
            ResolveOutcome::Skipped | ResolveOutcome::Unchanged => Ok(game),
        }
    }
}
