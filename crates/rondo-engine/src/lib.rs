//! Multi-provider conversation orchestration engine.
//!
//! The engine drives the bounded `model → tool-call → tool-result →
//! model` loop against one of several LLM vendors:
//!
//! - [`adapters`] translate canonical history into and out of each
//!   vendor's wire schema (OpenAI chat, Responses, Claude, Gemini).
//! - [`transport`] sends vendor requests over a shared HTTP client and
//!   classifies failures for retry.
//! - [`retry`] decides backoff delays under rate limiting.
//! - [`cache`] manages vendor-side context caches for static payloads.
//! - [`runner`] is the round state machine tying it all together.
//!
//! A session picks its provider once via [`adapters::adapter_for`];
//! configuration is read-only from then on.

/// Vendor wire-format adapters and the adapter contract.
pub mod adapters;
/// Context cache manager for vendors with server-side prompt caching.
pub mod cache;
/// Provider selection and session configuration.
pub mod config;
/// Retry/backoff decision logic.
pub mod retry;
/// Round orchestrator state machine.
pub mod runner;
/// Vendor request transport and error classification.
pub mod transport;

pub use adapters::{adapter_for, AdapterResponse, GeminiCacheBackend, ProviderAdapter};
pub use cache::{CacheBackend, CacheHandle, CachePayload, ContextCacheManager};
pub use config::{ProviderConfig, ProviderKind};
pub use retry::{RetryController, RetryDecision, RetryPolicy};
pub use runner::{Orchestrator, RoundPhase, RoundState};
pub use transport::{HttpTransport, Transport, VendorRequest};
