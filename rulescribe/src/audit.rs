//! Audit trail for generation and link resolution runs.
//!
//! Each run emits exactly one [`AuditRecord`]: the action, a run id, the
//! slug, a before/after diff over [`AUDIT_FIELDS`] and free-form metrics.
//! Records are write-only from the core's point of view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::record::{Payload, AUDIT_FIELDS};

/// Maximum entries kept by [`MemoryAuditSink`] before pruning.
const MAX_AUDIT_ENTRIES: usize = 10_000;

/// Audit action names.
pub const ACTION_GENERATE: &str = "generate_and_critic";
pub const ACTION_RESOLVE_LINKS: &str = "resolve_links";

/// Before/after pair for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub before: Value,
    pub after: Value,
}

/// One immutable audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub action: String,
    pub run_id: String,
    pub slug: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub diff: BTreeMap<String, FieldDiff>,
    #[serde(flatten)]
    pub metrics: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(
        action: &str,
        run_id: impl Into<String>,
        slug: Option<String>,
        before: Option<&Payload>,
        after: &Payload,
        metrics: Map<String, Value>,
    ) -> Self {
        Self {
            action: action.to_string(),
            run_id: run_id.into(),
            slug,
            timestamp: Utc::now(),
            diff: diff_fields(before, after),
            metrics,
        }
    }
}

/// Field-level differences restricted to [`AUDIT_FIELDS`]. A missing key
/// and an explicit `null` compare equal.
pub fn diff_fields(before: Option<&Payload>, after: &Payload) -> BTreeMap<String, FieldDiff> {
    AUDIT_FIELDS
        .iter()
        .filter_map(|field| {
            let old = before
                .and_then(|b| b.get(*field))
                .cloned()
                .unwrap_or(Value::Null);
            let new = after.get(*field).cloned().unwrap_or(Value::Null);
            (old != new).then(|| {
                (
                    field.to_string(),
                    FieldDiff {
                        before: old,
                        after: new,
                    },
                )
            })
        })
        .collect()
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Writes `AUDIT {json}` lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => info!(target: "rulescribe::audit", "AUDIT {}", line),
            Err(e) => error!(
                target: "rulescribe::audit",
                action = %record.action,
                run_id = %record.run_id,
                error = %e,
                "Failed to write audit record"
            ),
        }
    }
}

/// In-memory audit log, newest first.
#[derive(Clone)]
pub struct MemoryAuditSink {
    entries: Arc<RwLock<VecDeque<AuditRecord>>>,
    max_entries: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_max_entries(MAX_AUDIT_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
        }
    }

    /// Snapshot of all entries.
    pub async fn entries(&self) -> Vec<AuditRecord> {
        self.entries.read().await.iter().cloned().collect()
    }

    /// Entries for one action.
    pub async fn by_action(&self, action: &str) -> Vec<AuditRecord> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        let mut entries = self.entries.write().await;
        entries.push_front(record);

        while entries.len() > self.max_entries {
            entries.pop_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_diff_allow_list() {
        let before = payload(json!({"title": "Catan", "summary": "a", "view_count": 1}));
        let after = payload(json!({
            "title": "Catan",
            "summary": "b",
            "view_count": 2,
            "data_version": 2,
            "image_url": "https://img.example/c.png"
        }));

        let diff = diff_fields(Some(&before), &after);
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec!["image_url", "summary"]);
        assert_eq!(diff["summary"].before, json!("a"));
        assert_eq!(diff["image_url"].before, Value::Null);
    }

    #[test]
    fn test_new_record_diff() {
        let after = payload(json!({"title": "Azul", "min_players": null}));
        let diff = diff_fields(None, &after);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["title"].after, json!("Azul"));
    }

    #[test]
    fn test_serialized_shape() {
        let mut metrics = Map::new();
        metrics.insert("latency_ms_total".into(), json!(12));
        let record = AuditRecord::new(
            ACTION_GENERATE,
            "run-1",
            Some("azul".into()),
            None,
            &payload(json!({"title": "Azul"})),
            metrics,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["action"], "generate_and_critic");
        assert_eq!(value["latency_ms_total"], 12);
        assert_eq!(value["diff"]["title"]["after"], "Azul");
    }

    #[tokio::test]
    async fn test_memory_sink_prunes() {
        let sink = MemoryAuditSink::with_max_entries(2);
        for i in 0..3 {
            sink.record(AuditRecord::new(
                ACTION_RESOLVE_LINKS,
                format!("run-{i}"),
                None,
                None,
                &Payload::new(),
                Map::new(),
            ))
            .await;
        }
        let entries = sink.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].run_id, "run-2");
        assert_eq!(sink.by_action(ACTION_RESOLVE_LINKS).await.len(), 2);
    }

    #[tokio::test]
    async fn test_tracing_sink_does_not_panic() {
        TracingAuditSink
            .record(AuditRecord::new(
                ACTION_GENERATE,
                "run",
                None,
                None,
                &Payload::new(),
                Map::new(),
            ))
            .await;
    }
}
