//! Scribe Agent - JSON completion client
//!
//! Provides the completion-service side of RuleScribe:
//! - Trait-based LLM backends (Gemini REST, scripted mock)
//! - A retrying client that turns free-form model text into JSON
//! - Fence and brace extraction for chatty model output
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           CompletionClient              │
//! │  (retry with backoff, JSON extraction)  │
//! └────────────────┬────────────────────────┘
//!                  │
//!                  ▼
//!          ┌──────────────┐
//!          │  LlmBackend  │
//!          │ (Gemini/Mock)│
//!          └──────────────┘
//! ```

pub mod backend;
pub mod client;
pub mod extract;

// Re-export main types for convenience
pub use backend::traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};
pub use client::{CompletionClient, CompletionError, JsonCompletion, RetryPolicy};
pub use extract::{extract_json, ExtractError};
