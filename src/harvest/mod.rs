//! Harvest module - incremental inspection harvesting and deduplication.
//!
//! This module provides the stages of one harvest run:
//! - **Directory**: source discovery via [`EndpointDirectory`]
//! - **Fetch**: windowed provider queries via [`FetchClient`]
//! - **Normalize**: canonical records via [`Normalizer`]
//! - **Store**: novelty detection via [`NoveltyStore`]
//! - **Pipeline**: the sequential orchestrator [`HarvestPipeline`]

pub mod directory;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use traits::{DiscoveryError, HarvestStage, RejectReason, StoreError};

pub use directory::EndpointDirectory;
pub use fetch::{FetchClient, FetchOutcome, HarvestWindow, PacingPolicy, QueryStrategy};
pub use normalize::Normalizer;
pub use pipeline::{HarvestPipeline, HarvestResult, HarvestStats};
pub use store::{NoveltyStore, StoreBatch};
