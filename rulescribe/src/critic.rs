//! Critic stage: reviews a draft and returns a refined payload.
//!
//! The critic sees the draft, its confidence map, the protected fields and
//! (on the repair pass) the fix requests. Protection is only a hint in the
//! prompt; whatever the critic changes is recorded in `changed_fields`.

use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

use scribe_agent::CompletionClient;

use crate::confidence::FieldConfidence;
use crate::error::Result;
use crate::prompt::PromptAssembler;
use crate::record::Payload;

/// Shapes a critic reply can take.
#[derive(Debug, Clone, PartialEq)]
pub enum CriticReply {
    Refined {
        data: Payload,
        notes: Vec<String>,
        unresolved: Vec<String>,
        changed: Vec<String>,
    },
    /// No `data` object in the reply
    Malformed,
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                Value::Null | Value::String(_) => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}

impl CriticReply {
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return CriticReply::Malformed;
        };
        match object.remove("data") {
            Some(Value::Object(data)) => CriticReply::Refined {
                data,
                notes: string_list(object.remove("notes")),
                unresolved: string_list(object.remove("unresolved_issues")),
                changed: string_list(object.remove("changed_fields")),
            },
            _ => CriticReply::Malformed,
        }
    }
}

/// Overlay the critic's data on the draft, key by key.
///
/// Every key the critic returns wins, including an explicit `null`. Draft
/// keys the critic leaves out are kept.
pub fn merge_critique(draft: &Payload, critic_data: &Payload) -> Payload {
    let mut merged = draft.clone();
    for (key, value) in critic_data {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Keys whose values differ between two payloads.
pub fn diff_keys(before: &Payload, after: &Payload) -> BTreeSet<String> {
    before
        .keys()
        .chain(after.keys())
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect()
}

/// Inputs for one critic call.
#[derive(Debug, Clone, Copy)]
pub struct CritiqueInput<'a> {
    pub query: &'a str,
    pub draft: &'a Payload,
    pub confidence: &'a FieldConfidence,
    pub issues: &'a [Value],
    pub context: &'a str,
    pub fix_requests: &'a [String],
    pub protected_fields: &'a [String],
}

/// Result of one critic call.
#[derive(Debug, Clone)]
pub struct CritiqueOutcome {
    pub payload: Payload,
    pub notes: Vec<String>,
    pub unresolved: Vec<String>,
    /// Reported by the critic or observed in the diff, sorted
    pub changed_fields: Vec<String>,
    /// False when the reply was malformed and the draft was kept
    pub refined: bool,
    pub attempts: u32,
    pub latency: Duration,
}

impl CritiqueOutcome {
    /// Interpret a reply against the draft it reviewed.
    pub fn from_reply(
        reply: CriticReply,
        draft: &Payload,
        protected_fields: &[String],
        attempts: u32,
        latency: Duration,
    ) -> Self {
        match reply {
            CriticReply::Malformed => Self {
                payload: draft.clone(),
                notes: Vec::new(),
                unresolved: Vec::new(),
                changed_fields: Vec::new(),
                refined: false,
                attempts,
                latency,
            },
            CriticReply::Refined {
                data,
                notes,
                unresolved,
                changed,
            } => {
                let payload = merge_critique(draft, &data);
                let observed = diff_keys(draft, &payload);

                let overridden: Vec<&String> = observed
                    .iter()
                    .filter(|f| protected_fields.contains(*f))
                    .collect();
                if !overridden.is_empty() {
                    warn!(fields = ?overridden, "Critic changed protected fields");
                }

                let mut changed_fields: BTreeSet<String> = changed.into_iter().collect();
                changed_fields.extend(observed);

                Self {
                    payload,
                    notes,
                    unresolved,
                    changed_fields: changed_fields.into_iter().collect(),
                    refined: true,
                    attempts,
                    latency,
                }
            }
        }
    }
}

/// Runs critique passes.
#[derive(Clone)]
pub struct Critic {
    client: CompletionClient,
}

impl Critic {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    pub async fn critique(&self, input: CritiqueInput<'_>) -> Result<CritiqueOutcome> {
        let prompt = PromptAssembler::build_critic_prompt(
            input.query,
            input.draft,
            input.confidence,
            input.issues,
            input.context,
            input.fix_requests,
            input.protected_fields,
        );
        let completion = self.client.complete_json(&prompt).await?;

        let reply = CriticReply::from_value(completion.value);
        if matches!(reply, CriticReply::Malformed) {
            warn!(query = %input.query, "Critic reply had no data object, keeping draft");
        }

        let outcome = CritiqueOutcome::from_reply(
            reply,
            input.draft,
            input.protected_fields,
            completion.attempts,
            completion.latency,
        );

        if !outcome.unresolved.is_empty() {
            warn!(query = %input.query, unresolved = ?outcome.unresolved, "Critic left issues unresolved");
        }
        info!(
            query = %input.query,
            repair = !input.fix_requests.is_empty(),
            changed = ?outcome.changed_fields,
            "Critique done"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_agent::backend::MockBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_precedence() {
        let draft = payload(json!({"title": "Catan", "summary": "old", "min_age": 10}));
        let critic = payload(json!({"summary": "new", "min_age": null, "title_en": "Catan"}));

        let merged = merge_critique(&draft, &critic);
        assert_eq!(
            Value::Object(merged),
            json!({"title": "Catan", "summary": "new", "min_age": null, "title_en": "Catan"})
        );
    }

    #[test]
    fn test_merge_identity() {
        let draft = payload(json!({"title": "Catan"}));
        let merged = merge_critique(&draft, &draft);
        assert_eq!(merged, draft);
        assert!(diff_keys(&draft, &merged).is_empty());
    }

    #[test]
    fn test_malformed_keeps_draft() {
        let draft = payload(json!({"title": "Catan"}));
        let reply = CriticReply::from_value(json!({"notes": ["no data"]}));
        assert_eq!(reply, CriticReply::Malformed);

        let outcome = CritiqueOutcome::from_reply(reply, &draft, &[], 1, Duration::ZERO);
        assert_eq!(outcome.payload, draft);
        assert!(outcome.notes.is_empty());
        assert!(outcome.unresolved.is_empty());
        assert!(!outcome.refined);
    }

    #[test]
    fn test_protected_change_is_recorded() {
        let draft = payload(json!({"title": "Catan", "summary": "s"}));
        let reply = CriticReply::from_value(json!({
            "data": {"title": "Settlers of Catan"},
            "changed_fields": []
        }));
        let protected = vec!["title".to_string()];

        let outcome = CritiqueOutcome::from_reply(reply, &draft, &protected, 1, Duration::ZERO);
        assert_eq!(outcome.payload["title"], "Settlers of Catan");
        assert_eq!(outcome.changed_fields, vec!["title"]);
    }

    #[test]
    fn test_changed_fields_union() {
        let draft = payload(json!({"title": "Catan", "summary": "s"}));
        let reply = CriticReply::from_value(json!({
            "data": {"summary": "better"},
            "changed_fields": ["rules_content"]
        }));
        let outcome = CritiqueOutcome::from_reply(reply, &draft, &[], 1, Duration::ZERO);
        assert_eq!(outcome.changed_fields, vec!["rules_content", "summary"]);
    }

    #[tokio::test]
    async fn test_critique_call() {
        let backend = Arc::new(MockBackend::default().with_response(
            r#"{"data": {"summary": "fixed"}, "notes": ["ok"], "unresolved_issues": ["year?"]}"#,
        ));
        let critic = Critic::new(CompletionClient::new(backend.clone()));
        let draft = payload(json!({"title": "Catan"}));
        let confidence = FieldConfidence::from_raw(None);

        let outcome = critic
            .critique(CritiqueInput {
                query: "catan",
                draft: &draft,
                confidence: &confidence,
                issues: &[],
                context: "ctx",
                fix_requests: &["summary_missing".to_string()],
                protected_fields: &[],
            })
            .await
            .unwrap();

        assert_eq!(outcome.payload["summary"], "fixed");
        assert_eq!(outcome.notes, vec!["ok"]);
        assert_eq!(outcome.unresolved, vec!["year?"]);
        assert!(backend.prompts()[0].contains("- summary_missing"));
    }
}
