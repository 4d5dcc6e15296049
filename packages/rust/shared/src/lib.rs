//! Shared types, error model, and configuration for the discovery pipeline.
//!
//! This crate is the foundation depended on by all other workspace crates.
//! It provides:
//! - [`ObituaryError`], the unified error type
//! - Domain types ([`Candidate`], [`ClassifiedCandidate`], [`ObituaryDraft`],
//!   [`DiscoveryRunResult`])
//! - Configuration ([`AppConfig`], [`DiscoveryConfig`], config loading)
//! - Source URL normalization ([`normalize_source_url`])

pub mod config;
pub mod error;
pub mod types;
pub mod urls;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DiscoveryConfig, DiscoverySettings, OpenRouterConfig, SearchSettings,
    ServerSettings, StoreCredentials, StoreSettings, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{ObituaryError, Result};
pub use types::{
    Author, CapabilityContext, Candidate, Category, ClassificationOutcome, ClassificationResult,
    ClassifiedCandidate, DiscoveryMeta, DiscoveryRunResult, OBITUARY_DOC_TYPE, ObituaryDraft,
    RunId, SourceType,
};
pub use urls::normalize_source_url;
