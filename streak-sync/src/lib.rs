//! STREAK Sync - Retry Engine, Origin Clients, Orchestrator
//!
//! Everything that talks to the network lives here. The orchestrator ties
//! the origin and the optional edge tier to a [`streak_storage::YearCache`].

pub mod edge;
pub mod orchestrator;
pub mod origin;
pub mod retry;

pub use edge::{EdgeCache, EdgeHit, HttpEdgeCache};
pub use orchestrator::{operation_id, SyncOrchestrator};
pub use origin::{parse_retry_at, ContributionSource, HttpOrigin};
pub use retry::{
    backoff_delay, base_delay_for, compute_delay, RetryAttempt, RetryEngine, RetryResult,
    Retryable, RECENT_RETRY_WINDOW,
};
