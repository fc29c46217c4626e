//! UDS Bundler Core - Foundational Types and Abstractions
//!
//! This module provides the foundational types, traits, and abstractions
//! used across the UDS bundle assembly engine.

pub mod cancel;
pub mod config;
pub mod error;
pub mod progress;
pub mod types;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use error::{BundleError, Result};
pub use progress::{NoProgress, ProgressSink, TracingProgress};
pub use types::{UdsBuildData, UdsBundle, UdsMetadata, ZarfPackage, ZarfPackageManifest};

/// UDS Bundler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
