//! LLM Backend abstraction layer.
//!
//! Provides a trait-based interface for completion backends:
//! - Gemini `generateContent` REST API
//! - Mock backend with scripted replies for testing

pub mod gemini;
pub mod mock;
pub mod traits;

pub use gemini::GeminiBackend;
pub use mock::MockBackend;
pub use traits::{
    CompletionRequest, CompletionResponse, FinishReason, LlmBackend, LlmError, ResponseFormat, Usage,
};
