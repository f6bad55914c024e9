//! PostgREST (Supabase) repository over reqwest.

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{conflict_key, GameRepository, RepositoryError, Result};
use crate::record::GameRecord;

/// Connection settings for the game table.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    /// Service role key
    pub api_key: String,
    /// Table name
    pub table: String,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl SupabaseConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            table: "games".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Repository backed by the PostgREST API.
pub struct SupabaseRepository {
    endpoint: Url,
    client: Client,
}

/// Characters with meaning inside a PostgREST `or=(...)` filter.
fn sanitize_filter_term(query: &str) -> String {
    query
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
        .collect::<String>()
        .trim()
        .to_string()
}

impl SupabaseRepository {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let key = header::HeaderValue::from_str(&config.api_key)
            .map_err(|e| RepositoryError::Config(format!("invalid API key: {}", e)))?;
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| RepositoryError::Config(format!("invalid API key: {}", e)))?;
        headers.insert("apikey", key);
        headers.insert(header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RepositoryError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = Url::parse(&format!(
            "{}/rest/v1/{}",
            config.base_url.trim_end_matches('/'),
            config.table
        ))
        .map_err(|e| RepositoryError::Config(format!("invalid base URL: {}", e)))?;

        Ok(Self { endpoint, client })
    }

    fn url(&self, params: &[(&str, String)]) -> Url {
        let mut url = self.endpoint.clone();
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        url
    }

    async fn select(&self, params: &[(&str, String)]) -> Result<Vec<GameRecord>> {
        let mut params = params.to_vec();
        params.push(("select", "*".to_string()));
        let response = self.client.get(self.url(&params)).send().await?;
        self.handle_response(response).await
    }

    async fn select_one(&self, column: &str, value: &str) -> Result<Option<GameRecord>> {
        let rows = self
            .select(&[(column, format!("eq.{}", value)), ("limit", "1".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Server {
                status,
                message: body,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl GameRepository for SupabaseRepository {
    async fn search(&self, query: &str) -> Result<Vec<GameRecord>> {
        let term = sanitize_filter_term(query);
        if term.is_empty() {
            return Ok(Vec::new());
        }
        self.select(&[(
            "or",
            format!("(title.ilike.*{term}*,description.ilike.*{term}*)"),
        )])
        .await
    }

    async fn upsert(&self, record: &GameRecord) -> Result<GameRecord> {
        let (column, _) = conflict_key(record)?;
        let mut row = record.clone();
        row.normalize_links();

        let response = self
            .client
            .post(self.url(&[("on_conflict", column.to_string())]))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<GameRecord> = self.handle_response(response).await?;

        debug!(slug = ?row.slug, on_conflict = column, "Upserted game");
        rows.into_iter()
            .next()
            .ok_or_else(|| RepositoryError::InvalidResponse("upsert returned no rows".to_string()))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<GameRecord>> {
        self.select_one("id", id).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<GameRecord>> {
        self.select_one("slug", slug).await
    }

    async fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<GameRecord>> {
        self.select(&[
            ("order", "updated_at.desc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ])
        .await
    }

    async fn increment_view_count(&self, id: &str) -> Result<()> {
        let Some(game) = self.get_by_id(id).await? else {
            return Ok(());
        };

        let response = self
            .client
            .patch(self.url(&[("id", format!("eq.{}", id))]))
            .json(&json!({"view_count": game.view_count + 1}))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(RepositoryError::Server { status, message })
        }
    }
}
