//! RuleScribe - board game metadata backfill
//!
//! Fills in titles, rules text, player counts and outbound links for board
//! games using a completion service, and keeps those links alive.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       GameService                        │
//! └──────┬───────────────────────┬───────────────────┬───────┘
//!        │                       │                   │
//!        ▼                       ▼                   ▼
//! ┌──────────────┐      ┌─────────────────┐   ┌──────────────┐
//! │   Pipeline   │      │  LinkResolver   │   │  Repository  │
//! │ gen → critic │      │ staleness gate  │   │ memory/REST  │
//! │ → validate   │      │ propose, verify │   └──────────────┘
//! │ (1 repair)   │      │ (3 in parallel) │
//! └──────┬───────┘      └────────┬────────┘
//!        │                       │
//!        └──────────┬────────────┘
//!                   ▼
//!       ┌──────────────────────┐
//!       │  CompletionClient    │  (scribe-agent)
//!       │  + AuditSink         │
//!       └──────────────────────┘
//! ```

pub mod audit;
pub mod confidence;
pub mod config;
pub mod critic;
pub mod error;
pub mod generator;
pub mod links;
pub mod pipeline;
pub mod prompt;
pub mod record;
pub mod repository;
pub mod service;
pub mod slug;
pub mod validator;

// Re-export main types for convenience
pub use audit::{AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use confidence::FieldConfidence;
pub use config::{ScribeConfig, DEFAULT_LINK_COOLDOWN_DAYS, DEFAULT_PROTECTION_THRESHOLD};
pub use critic::{merge_critique, Critic, CriticReply, CritiqueOutcome};
pub use error::{Result, ScribeError};
pub use generator::{Draft, Generator, GeneratorReply};
pub use links::{LinkResolver, LinkVerifier, ResolveOutcome, StalenessPolicy};
pub use pipeline::{GenerationOutput, Pipeline, RunMetrics};
pub use record::{GameRecord, LinkField, Payload, StructuredData};
pub use repository::{GameRepository, InMemoryRepository, RepositoryError, SupabaseRepository};
pub use service::GameService;
pub use slug::slugify;
pub use validator::{validate, ValidationIssue};
