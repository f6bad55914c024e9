//! External link resolution.
//!
//! Keeps `official_url`, `amazon_url` and `image_url` pointing at live
//! pages. A run is gated by [`StalenessPolicy`], asks the completion service
//! for candidates once, then verifies the three fields concurrently. Each
//! field ends as the verified candidate, the still-valid previous value, or
//! empty.

pub mod affiliate;
pub mod resolver;
pub mod staleness;
pub mod verify;

pub use affiliate::MarketplacePolicy;
pub use resolver::{LinkResolver, ProposalReply, ResolveOutcome};
pub use staleness::{RefreshReason, StalenessPolicy};
pub use verify::{LinkVerifier, VerifyError};
