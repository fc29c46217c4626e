//! UDS Bundler - OCI bundle assembly engine.
//!
//! Aggregates a set of previously built Zarf packages (remote OCI artifacts
//! or local `tar.zst` archives) into a single bundle-level OCI artifact and
//! emits it either as a compressed OCI image layout tarball on disk or as a
//! published artifact in a remote registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Bundle Assembly                         │
//! │                                                              │
//! │  bundle definition ─► package mirrors ─► content store       │
//! │                  (remote / local)    (OCI image layout)      │
//! │                                         │                    │
//! │             root manifest builder ──────┤                    │
//! │                                         ▼                    │
//! │                        archiver (tar.zst)  /  publisher      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod bundle;
pub mod oci;

// Re-export common types
pub use bundle::{BundleCreator, CreateReport, PublishSummary};
pub use oci::{Descriptor, Digest, ImageReference, Index, Manifest, OciStore, PathMap};
pub use oci::{RegistryAuth, RemoteClient};

/// UDS Bundler engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
