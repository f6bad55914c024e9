//! Generator stage: the first-pass draft.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use scribe_agent::CompletionClient;

use crate::confidence::FieldConfidence;
use crate::error::{Result, ScribeError};
use crate::prompt::PromptAssembler;
use crate::record::Payload;

/// Shapes a generator reply can take.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorReply {
    /// `{"error": ...}` without data
    Failed { error: String },
    /// `{"data": {...}, "data_confidence": {...}, "issues": [...]}`
    Wrapped {
        data: Payload,
        confidence: Option<Value>,
        issues: Vec<Value>,
    },
    /// The record itself, no envelope
    Bare(Payload),
    /// Not a JSON object at all
    Malformed,
}

impl GeneratorReply {
    /// Classify a parsed completion.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return GeneratorReply::Malformed;
        };

        if !object.contains_key("data") {
            if let Some(error) = object.get("error") {
                let error = match error {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return GeneratorReply::Failed { error };
            }
            return GeneratorReply::Bare(object);
        }

        let data = match object.remove("data") {
            Some(Value::Object(data)) => data,
            _ => Payload::new(),
        };
        let issues = match object.remove("issues") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        GeneratorReply::Wrapped {
            data,
            confidence: object.remove("data_confidence"),
            issues,
        }
    }
}

/// Output of the generator stage.
#[derive(Debug, Clone)]
pub struct Draft {
    pub payload: Payload,
    pub confidence: FieldConfidence,
    pub issues: Vec<Value>,
    pub attempts: u32,
    pub latency: Duration,
}

impl Draft {
    fn from_reply(reply: GeneratorReply, attempts: u32, latency: Duration) -> Result<Self> {
        let (payload, confidence, issues) = match reply {
            GeneratorReply::Failed { error } => return Err(ScribeError::ServiceReported(error)),
            GeneratorReply::Wrapped {
                data,
                confidence,
                issues,
            } => (data, FieldConfidence::from_raw(confidence.as_ref()), issues),
            GeneratorReply::Bare(payload) => (payload, FieldConfidence::from_raw(None), Vec::new()),
            GeneratorReply::Malformed => {
                (Payload::new(), FieldConfidence::from_raw(None), Vec::new())
            }
        };
        Ok(Self {
            payload,
            confidence,
            issues,
            attempts,
            latency,
        })
    }
}

/// Drafts a record from a query and context.
#[derive(Clone)]
pub struct Generator {
    client: CompletionClient,
}

impl Generator {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    /// One completion call. Service and parse errors are returned as is.
    pub async fn generate(&self, query: &str, context: &str) -> Result<Draft> {
        let prompt = PromptAssembler::build_generator_prompt(query, context);
        let completion = self.client.complete_json(&prompt).await?;

        let reply = GeneratorReply::from_value(completion.value);
        if matches!(reply, GeneratorReply::Malformed) {
            debug!(query = %query, "Generator reply was not an object");
        }

        let draft = Draft::from_reply(reply, completion.attempts, completion.latency)?;
        info!(
            query = %query,
            fields = draft.payload.len(),
            issues = draft.issues.len(),
            "Generator draft ready"
        );
        Ok(draft)
    }
}
