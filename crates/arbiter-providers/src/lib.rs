//! Target providers for the Arbiter agent evaluation engine.
//!
//! A [`Provider`](provider_trait::Provider) is the capability through which
//! the scheduler reaches the target under test: one `invoke` per case
//! attempt, optionally one `invoke_batch` per suite. This crate holds the
//! trait and its request/response types, the per-target provider registry,
//! the response cache consulted before invocation, a subprocess-backed
//! provider for local command targets, and fake providers for tests.

pub mod cache;
pub mod command;
pub mod fakes;
pub mod provider_trait;
pub mod registry;

pub use cache::{response_cache_key, MemoryCache, ResponseCache};
pub use command::CommandProvider;
pub use provider_trait::{InvokeRequest, InvokeResponse, Provider, ResolvedTarget};
pub use registry::ProviderRegistry;
