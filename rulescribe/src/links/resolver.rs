//! Link resolution runs.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scribe_agent::CompletionClient;

use super::staleness::{RefreshReason, StalenessPolicy};
use super::verify::LinkVerifier;
use crate::audit::{AuditRecord, AuditSink, ACTION_RESOLVE_LINKS};
use crate::prompt::PromptAssembler;
use crate::record::{GameRecord, LinkField};

/// Shapes a link proposal reply can take.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalReply {
    /// Candidate per field; `None` when the model had nothing usable
    Candidates(BTreeMap<LinkField, Option<String>>),
    /// `{"error": ...}`
    Failed(String),
    /// Not an object
    Malformed,
}

fn candidate(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(String::from)
}

impl ProposalReply {
    pub fn from_value(value: Value) -> Self {
        let Value::Object(object) = value else {
            return ProposalReply::Malformed;
        };
        if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
            return ProposalReply::Failed(match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        // Some replies nest the links under "data"
        let links = match object.get("data") {
            Some(Value::Object(inner)) => inner,
            _ => &object,
        };
        ProposalReply::Candidates(
            LinkField::ALL
                .into_iter()
                .map(|f| (f, candidate(links.get(f.as_str()))))
                .collect(),
        )
    }
}

/// Result of a resolution run.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// Cooldown not elapsed and no link missing
    Skipped,
    /// Nothing changed (including a failed proposal call)
    Unchanged,
    /// At least one link changed; record is versioned and time-stamped
    Updated {
        record: GameRecord,
        changed: Vec<LinkField>,
    },
}

impl ResolveOutcome {
    /// The record to keep: the updated one, or `original`.
    pub fn into_record(self, original: GameRecord) -> GameRecord {
        match self {
            ResolveOutcome::Updated { record, .. } => record,
            _ => original,
        }
    }
}

/// Proposes, verifies and merges link fields.
#[derive(Clone)]
pub struct LinkResolver {
    client: CompletionClient,
    verifier: LinkVerifier,
    staleness: StalenessPolicy,
    audit: Arc<dyn AuditSink>,
}

impl LinkResolver {
    pub fn new(
        client: CompletionClient,
        verifier: LinkVerifier,
        staleness: StalenessPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            client,
            verifier,
            staleness,
            audit,
        }
    }

    /// Resolve the tracked links of `record`.
    pub async fn resolve(&self, record: &GameRecord, force: bool) -> ResolveOutcome {
        let slug = record.slug.as_deref().unwrap_or_default();
        let Some(reason) = self.staleness.check(record, force, Utc::now()) else {
            debug!(slug = %slug, "Links fresh, skipping");
            return ResolveOutcome::Skipped;
        };

        let prompt = PromptAssembler::build_link_prompt(record);
        let candidates = match self.client.complete_json(&prompt).await {
            Ok(completion) => match ProposalReply::from_value(completion.value) {
                ProposalReply::Candidates(c) => c,
                ProposalReply::Failed(error) => {
                    warn!(slug = %slug, error = %error, "Link proposal reported an error");
                    return ResolveOutcome::Unchanged;
                }
                ProposalReply::Malformed => {
                    warn!(slug = %slug, "Link proposal was not an object");
                    return ResolveOutcome::Unchanged;
                }
            },
            Err(e) => {
                warn!(slug = %slug, error = %e, "Link proposal failed");
                return ResolveOutcome::Unchanged;
            }
        };

        let titles = record.title_variants();
        let proposed = |field: LinkField| candidates.get(&field).cloned().flatten();
        let (official, amazon, image) = tokio::join!(
            self.resolve_field(LinkField::Official, proposed(LinkField::Official), record, &titles),
            self.resolve_field(LinkField::Amazon, proposed(LinkField::Amazon), record, &titles),
            self.resolve_field(LinkField::Image, proposed(LinkField::Image), record, &titles),
        );

        let mut updated = record.clone();
        let mut changed = Vec::new();
        for (field, value) in [
            (LinkField::Official, official),
            (LinkField::Amazon, amazon),
            (LinkField::Image, image),
        ] {
            if record.link(field) != value.as_deref() {
                updated.set_link(field, value);
                changed.push(field);
            }
        }

        if changed.is_empty() {
            info!(slug = %slug, "Links verified, nothing changed");
            return ResolveOutcome::Unchanged;
        }

        updated.data_version = record.data_version + 1;
        updated.updated_at = Some(Utc::now());

        let mut metrics = Map::new();
        metrics.insert("changed_fields".to_string(), json!(changed));
        metrics.insert("force".to_string(), json!(force));
        metrics.insert("trigger".to_string(), json!(reason));
        metrics.insert("data_version_before".to_string(), json!(record.data_version));
        metrics.insert("data_version_after".to_string(), json!(updated.data_version));
        self.audit
            .record(AuditRecord::new(
                ACTION_RESOLVE_LINKS,
                Uuid::new_v4().to_string(),
                record.slug.clone(),
                Some(&record.to_payload()),
                &updated.to_payload(),
                metrics,
            ))
            .await;

        info!(slug = %slug, changed = ?changed, trigger = ?reason_label(&reason), "Links updated");
        ResolveOutcome::Updated {
            record: updated,
            changed,
        }
    }

    /// Candidate if it verifies, else the previous value if it still
    /// verifies, else nothing. Errors only make the URL invalid.
    async fn resolve_field(
        &self,
        field: LinkField,
        proposed: Option<String>,
        record: &GameRecord,
        titles: &[String],
    ) -> Option<String> {
        let previous = record.link(field).map(String::from);

        if let Some(url) = &proposed {
            match self.verifier.verify(field, url, titles).await {
                Ok(accepted) => return Some(accepted),
                Err(e) => debug!(field = %field, url = %url, error = %e, "Candidate rejected"),
            }
        }

        let previous = previous.filter(|p| proposed.as_deref() != Some(p.as_str()))?;
        match self.verifier.verify(field, &previous, titles).await {
            Ok(accepted) => Some(accepted),
            Err(e) => {
                debug!(field = %field, url = %previous, error = %e, "Previous link no longer valid");
                None
            }
        }
    }
}

fn reason_label(reason: &RefreshReason) -> &'static str {
    match reason {
        RefreshReason::Forced => "forced",
        RefreshReason::MissingLinks { .. } => "missing_links",
        RefreshReason::Stale { .. } => "stale",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::DEFAULT_USER_AGENT;
    use crate::links::affiliate::MarketplacePolicy;
    use chrono::Duration as ChronoDuration;
    use scribe_agent::backend::MockBackend;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(backend: Arc<MockBackend>, audit: Arc<MemoryAuditSink>) -> LinkResolver {
        let verifier = LinkVerifier::new(
            DEFAULT_USER_AGENT,
            Duration::from_secs(2),
            MarketplacePolicy::new(
                vec!["amazon.co.jp".into(), "amazon.com".into()],
                Some("scribe-22".into()),
            ),
        )
        .unwrap();
        LinkResolver::new(
            CompletionClient::new(backend),
            verifier,
            StalenessPolicy::default(),
            audit,
        )
    }

    async fn game_site() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/official"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/official"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><title>Catan | Official Site</title></html>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/box.png"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/not-an-image"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;
        server
    }

    fn catan() -> GameRecord {
        GameRecord {
            id: Some("1".into()),
            slug: Some("catan".into()),
            title: "Catan".into(),
            title_ja: Some("カタン".into()),
            data_version: 3,
            updated_at: Some(Utc::now() - ChronoDuration::days(2)),
            ..Default::default()
        }
    }

    #[test]
    fn test_proposal_reply() {
        let reply = ProposalReply::from_value(json!({
            "official_url": "https://www.catan.com",
            "amazon_url": "null",
            "image_url": ""
        }));
        let ProposalReply::Candidates(c) = reply else {
            panic!("expected candidates");
        };
        assert_eq!(c[&LinkField::Official].as_deref(), Some("https://www.catan.com"));
        assert_eq!(c[&LinkField::Amazon], None);
        assert_eq!(c[&LinkField::Image], None);

        assert_eq!(
            ProposalReply::from_value(json!({"error": "quota"})),
            ProposalReply::Failed("quota".into())
        );
        assert_eq!(ProposalReply::from_value(json!(null)), ProposalReply::Malformed);
    }

    #[tokio::test]
    async fn test_fresh_record_is_skipped() {
        let backend = Arc::new(MockBackend::default().with_response("{}"));
        let audit = Arc::new(MemoryAuditSink::new());
        let mut record = catan();
        record.official_url = Some("https://www.catan.com".into());
        record.amazon_url = Some("https://www.amazon.co.jp/dp/B01?tag=scribe-22".into());
        record.image_url = Some("https://img.example/catan.png".into());

        let outcome = resolver(backend.clone(), audit.clone()).resolve(&record, false).await;

        assert_eq!(outcome, ResolveOutcome::Skipped);
        assert_eq!(outcome.into_record(record.clone()), record);
        assert_eq!(backend.call_count(), 0);
        assert_eq!(audit.count().await, 0);
    }

    #[tokio::test]
    async fn test_forced_run_with_valid_links_changes_nothing() {
        let server = game_site().await;
        let official = format!("{}/official", server.uri());
        let image = format!("{}/box.png", server.uri());
        let amazon = "https://www.amazon.co.jp/dp/B01?tag=scribe-22".to_string();

        let mut record = catan();
        record.official_url = Some(official.clone());
        record.amazon_url = Some(amazon.clone());
        record.image_url = Some(image.clone());

        let backend = Arc::new(MockBackend::default().with_response(
            json!({"official_url": official, "amazon_url": amazon, "image_url": image}).to_string(),
        ));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = resolver(backend, audit.clone()).resolve(&record, true).await;
        assert_eq!(outcome, ResolveOutcome::Unchanged);
        assert_eq!(audit.count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_bare_host_links_unchanged() {
        let server = game_site().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<title>Catan</title>", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let official = server.uri();
        let image = format!("{}/box.png", server.uri());
        let amazon = "https://www.amazon.co.jp/dp/B01?tag=scribe-22".to_string();
        let mut record = catan();
        record.official_url = Some(official.clone());
        record.amazon_url = Some(amazon.clone());
        record.image_url = Some(image.clone());
        record.updated_at = Some(Utc::now() - ChronoDuration::days(40));

        let backend = Arc::new(MockBackend::default().with_response(
            json!({"official_url": official, "amazon_url": amazon, "image_url": image}).to_string(),
        ));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = resolver(backend.clone(), audit.clone()).resolve(&record, false).await;
        assert_eq!(outcome, ResolveOutcome::Unchanged);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(audit.count().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_image_host_isolated() {
        let server = game_site().await;
        let official = format!("{}/official", server.uri());
        let backend = Arc::new(MockBackend::default().with_response(
            json!({
                "official_url": official,
                "amazon_url": "https://www.amazon.com/dp/B02",
                "image_url": "http://127.0.0.1:9/catan.png"
            })
            .to_string(),
        ));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = resolver(backend, audit.clone()).resolve(&catan(), false).await;

        let ResolveOutcome::Updated { record: updated, changed } = outcome else {
            panic!("expected an update");
        };
        assert_eq!(changed, vec![LinkField::Official, LinkField::Amazon]);
        assert_eq!(updated.official_url.as_deref(), Some(official.as_str()));
        assert_eq!(
            updated.amazon_url.as_deref(),
            Some("https://www.amazon.com/dp/B02?tag=scribe-22")
        );
        assert_eq!(updated.image_url, None);
        assert_eq!(audit.count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_links_resolved() {
        let server = game_site().await;
        let official = format!("{}/official", server.uri());
        let backend = Arc::new(MockBackend::default().with_response(
            json!({
                "official_url": official,
                "amazon_url": "https://www.amazon.co.jp/dp/4910000000",
                "image_url": format!("{}/not-an-image", server.uri())
            })
            .to_string(),
        ));
        let audit = Arc::new(MemoryAuditSink::new());
        let record = catan();

        let outcome = resolver(backend, audit.clone()).resolve(&record, false).await;

        let ResolveOutcome::Updated { record: updated, changed } = outcome else {
            panic!("expected an update");
        };
        assert_eq!(changed, vec![LinkField::Official, LinkField::Amazon]);
        assert_eq!(updated.official_url.as_deref(), Some(official.as_str()));
        assert_eq!(
            updated.amazon_url.as_deref(),
            Some("https://www.amazon.co.jp/dp/4910000000?tag=scribe-22")
        );
        assert_eq!(updated.image_url, None);
        assert_eq!(updated.data_version, record.data_version + 1);
        assert!(updated.updated_at > record.updated_at);

        let entries = audit.by_action(ACTION_RESOLVE_LINKS).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metrics["changed_fields"], json!(["official_url", "amazon_url"]));
        assert!(entries[0].diff.contains_key("amazon_url"));
    }

    #[tokio::test]
    async fn test_previous_link_kept_when_candidate_fails() {
        let server = game_site().await;
        let image = format!("{}/box.png", server.uri());
        let mut record = catan();
        record.image_url = Some(image.clone());

        let backend = Arc::new(MockBackend::default().with_response(
            json!({"image_url": format!("{}/not-an-image", server.uri())}).to_string(),
        ));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = resolver(backend, audit).resolve(&record, false).await;
        let updated = outcome.into_record(record.clone());
        assert_eq!(updated.image_url.as_deref(), Some(image.as_str()));
    }

    #[tokio::test]
    async fn test_dead_previous_link_cleared() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut record = catan();
        record.image_url = Some(format!("{}/gone.png", server.uri()));
        let backend = Arc::new(MockBackend::default().with_response("{}"));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = resolver(backend, audit).resolve(&record, true).await;
        let ResolveOutcome::Updated { record: updated, changed } = outcome else {
            panic!("expected an update");
        };
        assert_eq!(changed, vec![LinkField::Image]);
        assert_eq!(updated.image_url, None);
    }

    #[tokio::test]
    async fn test_proposal_failure_leaves_record() {
        let backend = Arc::new(MockBackend::default().with_response("no json at all"));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = resolver(backend, audit.clone()).resolve(&catan(), true).await;
        assert_eq!(outcome, ResolveOutcome::Unchanged);
        assert_eq!(audit.count().await, 0);
    }
}
