//! Core pipeline orchestration and domain logic for obituary discovery.
//!
//! This crate ties together search, filtering, classification, enrichment,
//! deduplication and persistence into a single run ([`DiscoveryPipeline`]).

pub mod classifier;
pub mod context;
pub mod dedup;
pub mod filter;
pub mod openrouter;
pub mod pipeline;
pub mod sink;
pub mod slug;

#[cfg(test)]
mod testing;

pub use classifier::{ClassificationService, Classifier, ClassifierOptions, ModelVerdict};
pub use context::{CapabilitySnapshot, ContextEnricher};
pub use dedup::{DedupGate, DedupOutcome};
pub use openrouter::OpenRouterClassifier;
pub use pipeline::{
    ConfigPresence, DiscoveryPipeline, PipelineDeps, PipelineOptions, ProgressReporter,
    RunOutcome, RunStage, SilentProgress, constant_time_eq,
};
pub use sink::{PersistOutcome, PersistenceSink};
pub use slug::slug_for;
