//! Generate → critique → validate orchestration.
//!
//! ```text
//! DRAFTING ──► CRITIQUING ──► VALIDATING ──► FINALIZING
//!    │                          │    ▲
//!    ▼                          ▼    │
//!  FAILED                    REPAIRING (once)
//!                               │
//!                     still invalid ──► FAILED
//! ```
//!
//! A run holds no state after it returns. The caller persists the record.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use scribe_agent::CompletionClient;

use crate::audit::{AuditRecord, AuditSink, ACTION_GENERATE};
use crate::config::DEFAULT_PROTECTION_THRESHOLD;
use crate::critic::{Critic, CritiqueInput, CritiqueOutcome};
use crate::error::{Result, ScribeError};
use crate::generator::{Draft, Generator};
use crate::record::{GameRecord, Payload};
use crate::slug::slug_for;
use crate::validator::{validate, ValidationIssue};

/// Run metrics, flattened into the audit record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub query: String,
    pub latency_ms_generator: u64,
    pub latency_ms_critic: u64,
    pub latency_ms_repair: Option<u64>,
    pub latency_ms_total: u64,
    pub generator_attempts: u32,
    pub critic_attempts: u32,
    pub critic_calls: u32,
    pub issues: Vec<Value>,
    pub unresolved: Vec<String>,
    pub notes: Vec<String>,
    pub changed_fields: Vec<String>,
    pub protected_fields: Vec<String>,
    pub summary_len: usize,
    pub rules_len: usize,
    pub data_version_before: Option<i64>,
    pub data_version_after: i64,
}

impl RunMetrics {
    fn into_map(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn absorb(&mut self, critique: &CritiqueOutcome) {
        self.critic_calls += 1;
        self.critic_attempts += critique.attempts;
        self.notes.extend(critique.notes.iter().cloned());
        self.unresolved = critique.unresolved.clone();
        for field in &critique.changed_fields {
            if !self.changed_fields.contains(field) {
                self.changed_fields.push(field.clone());
            }
        }
        self.changed_fields.sort();
    }
}

/// What a successful run hands back.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub run_id: String,
    pub record: GameRecord,
    pub metrics: RunMetrics,
}

enum Stage {
    Drafting,
    Critiquing(Draft),
    Validating {
        draft: Draft,
        critique: CritiqueOutcome,
        repaired: bool,
    },
    Repairing {
        draft: Draft,
        critique: CritiqueOutcome,
        fix_requests: Vec<String>,
    },
    Finalizing(Payload),
    Failed(ScribeError),
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Orchestrates one generation run end to end.
#[derive(Clone)]
pub struct Pipeline {
    generator: Generator,
    critic: Critic,
    audit: Arc<dyn AuditSink>,
    protection_threshold: f64,
}

impl Pipeline {
    pub fn new(client: CompletionClient, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            generator: Generator::new(client.clone()),
            critic: Critic::new(client),
            audit,
            protection_threshold: DEFAULT_PROTECTION_THRESHOLD,
        }
    }

    pub fn with_protection_threshold(mut self, threshold: f64) -> Self {
        self.protection_threshold = threshold;
        self
    }

    /// Run the pipeline for `query`.
    ///
    /// `existing` is the stored record when regenerating; it supplies
    /// identity, bookkeeping and any field the run leaves empty.
    pub async fn run(
        &self,
        query: &str,
        context: &str,
        existing: Option<&GameRecord>,
    ) -> Result<GenerationOutput> {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut metrics = RunMetrics {
            query: query.to_string(),
            data_version_before: existing.map(|e| e.data_version),
            ..Default::default()
        };
        let mut protected: Vec<String> = Vec::new();

        let mut stage = Stage::Drafting;
        let payload = loop {
            stage = match stage {
                Stage::Drafting => match self.generator.generate(query, context).await {
                    Ok(draft) => {
                        metrics.latency_ms_generator = millis(draft.latency);
                        metrics.generator_attempts = draft.attempts;
                        metrics.issues = draft.issues.clone();
                        protected = draft.confidence.protected_fields(self.protection_threshold);
                        info!(run_id = %run_id, protected = ?protected, "Draft done");
                        Stage::Critiquing(draft)
                    }
                    Err(e) => Stage::Failed(e),
                },

                Stage::Critiquing(draft) => {
                    let input = CritiqueInput {
                        query,
                        draft: &draft.payload,
                        confidence: &draft.confidence,
                        issues: &draft.issues,
                        context,
                        fix_requests: &[],
                        protected_fields: &protected,
                    };
                    match self.critic.critique(input).await {
                        Ok(critique) => {
                            metrics.latency_ms_critic = millis(critique.latency);
                            metrics.absorb(&critique);
                            Stage::Validating {
                                draft,
                                critique,
                                repaired: false,
                            }
                        }
                        Err(e) => Stage::Failed(e),
                    }
                }

                Stage::Validating {
                    draft,
                    critique,
                    repaired,
                } => {
                    let issues = validate(Some(&critique.payload));
                    if issues.is_empty() && (repaired || critique.unresolved.is_empty()) {
                        Stage::Finalizing(critique.payload)
                    } else if repaired {
                        Stage::Failed(ScribeError::ValidationFailed { issues })
                    } else {
                        let fix_requests: Vec<String> = issues
                            .iter()
                            .map(ValidationIssue::code)
                            .chain(critique.unresolved.iter().cloned())
                            .collect();
                        warn!(run_id = %run_id, fix_requests = ?fix_requests, "Repairing draft");
                        Stage::Repairing {
                            draft,
                            critique,
                            fix_requests,
                        }
                    }
                }

                Stage::Repairing {
                    draft,
                    critique,
                    fix_requests,
                } => {
                    let input = CritiqueInput {
                        query,
                        draft: &critique.payload,
                        confidence: &draft.confidence,
                        issues: &draft.issues,
                        context,
                        fix_requests: &fix_requests,
                        protected_fields: &protected,
                    };
                    match self.critic.critique(input).await {
                        Ok(repair) => {
                            metrics.latency_ms_repair = Some(millis(repair.latency));
                            metrics.absorb(&repair);
                            Stage::Validating {
                                draft,
                                critique: repair,
                                repaired: true,
                            }
                        }
                        Err(e) => Stage::Failed(e),
                    }
                }

                Stage::Finalizing(payload) => break payload,

                Stage::Failed(e) => {
                    error!(run_id = %run_id, query = %query, error = %e, "Generation failed");
                    return Err(e);
                }
            };
        };

        if !metrics.unresolved.is_empty() {
            warn!(run_id = %run_id, unresolved = ?metrics.unresolved, "Finalizing with unresolved issues");
        }

        let record = finalize(&payload, query, existing);
        metrics.protected_fields = protected;
        metrics.summary_len = record.summary.as_deref().map_or(0, |s| s.chars().count());
        metrics.rules_len = record.rules_content.as_deref().map_or(0, |s| s.chars().count());
        metrics.data_version_after = record.data_version;
        metrics.latency_ms_total = millis(started.elapsed());

        let before = existing.map(GameRecord::to_payload);
        self.audit
            .record(AuditRecord::new(
                ACTION_GENERATE,
                run_id.clone(),
                record.slug.clone(),
                before.as_ref(),
                &record.to_payload(),
                metrics.clone().into_map(),
            ))
            .await;

        info!(
            run_id = %run_id,
            slug = ?record.slug,
            data_version = record.data_version,
            critic_calls = metrics.critic_calls,
            "Generation finalized"
        );

        Ok(GenerationOutput {
            run_id,
            record,
            metrics,
        })
    }
}

/// Turn a validated payload into a versioned, time-stamped record.
pub fn finalize(payload: &Payload, query: &str, existing: Option<&GameRecord>) -> GameRecord {
    let mut record = GameRecord::from_payload(payload);

    match existing {
        Some(existing) => {
            record.inherit_from(existing);
            record.data_version = existing.data_version + 1;
        }
        None => record.data_version = 1,
    }

    if existing.map_or(true, |e| e.slug.is_none()) {
        let candidates = [
            record.slug.clone().unwrap_or_default(),
            record.title.clone(),
            query.to_string(),
        ];
        record.slug = Some(slug_for(candidates.iter().map(String::as_str)));
    }

    record.updated_at = Some(Utc::now());
    record
}

/// Re-version a finalized record against the stored row that owns its slug.
pub fn rebase(record: &mut GameRecord, stored: &GameRecord) {
    let updated_at = record.updated_at;
    record.inherit_from(stored);
    record.data_version = stored.data_version + 1;
    record.updated_at = updated_at;
}
