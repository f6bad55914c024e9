//! Error types for RuleScribe.

use scribe_agent::{CompletionError, LlmError};

use crate::repository::RepositoryError;
use crate::validator::ValidationIssue;

/// Result type for RuleScribe operations.
pub type Result<T> = std::result::Result<T, ScribeError>;

/// Errors surfaced by the pipeline and service layer.
#[derive(Debug, thiserror::Error)]
pub enum ScribeError {
    /// Completion service failed after retries
    #[error("completion service error: {source}")]
    CompletionService {
        #[source]
        source: LlmError,
        attempts: u32,
    },

    /// Completion text could not be parsed as JSON
    #[error("completion parse error: {0}")]
    CompletionParse(String),

    /// The service answered with an error object instead of data
    #[error("completion service reported an error: {0}")]
    ServiceReported(String),

    /// Record still invalid after the repair pass
    #[error("validation failed: {}", format_issues(.issues))]
    ValidationFailed { issues: Vec<ValidationIssue> },

    /// Persistence failure
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// No record for the given key
    #[error("game not found: {0}")]
    NotFound(String),

    /// Stored record has no title to regenerate from
    #[error("game {0} has no title")]
    MissingTitle(String),
}

impl From<CompletionError> for ScribeError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Service { source, attempts } => {
                ScribeError::CompletionService { source, attempts }
            }
            CompletionError::Parse(e) => ScribeError::CompletionParse(e.to_string()),
        }
    }
}

impl ScribeError {
    /// Whether the failure came from the completion service.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            ScribeError::CompletionService { .. }
                | ScribeError::CompletionParse(_)
                | ScribeError::ServiceReported(_)
        )
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.code())
        .collect::<Vec<_>>()
        .join(", ")
}
