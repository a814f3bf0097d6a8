//! Configuration for the crawl engine.
//!
//! This module provides the `EngineConfig` struct and its fluent builder for
//! configuring a crawl run: concurrency bounds, retry and rotation limits,
//! timeouts, session and browser pool options, and proxy selection.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod methods;
pub mod types;

// Re-exports for public API
pub use builder::EngineConfigBuilder;
pub use types::EngineConfig;
