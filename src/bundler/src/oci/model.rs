//! OCI document model: descriptors, manifests, indexes.
//!
//! Serde representations of the OCI image-spec JSON documents the bundler
//! reads and writes. Field names follow the wire format (`mediaType`,
//! `schemaVersion`, ...). Annotations use a `BTreeMap` so serialized
//! documents are byte-stable for a given input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::digest::Digest;

/// Media types used by bundle artifacts.
pub mod media_types {
    /// OCI image manifest.
    pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index.
    pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

    /// OCI image config.
    pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

    /// Opaque Zarf blob: bundle YAML, signatures, and package layers.
    pub const ZARF_BLOB: &str = "application/vnd.zarf.layer.v1.blob";
}

/// Standard OCI annotation keys surfaced on bundle manifests.
pub mod annotations {
    pub const TITLE: &str = "org.opencontainers.image.title";
    pub const DESCRIPTION: &str = "org.opencontainers.image.description";
    pub const URL: &str = "org.opencontainers.image.url";
    pub const AUTHORS: &str = "org.opencontainers.image.authors";
    pub const DOCUMENTATION: &str = "org.opencontainers.image.documentation";
    pub const SOURCE: &str = "org.opencontainers.image.source";
    pub const VENDOR: &str = "org.opencontainers.image.vendor";
}

/// A content descriptor: the (media-type, digest, size) triple that names a
/// blob in any store, plus optional annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,

    pub digest: Digest,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Describe a byte slice: digest and size are computed from `bytes`.
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: Digest::from_bytes(bytes),
            size: bytes.len() as u64,
            annotations: None,
        }
    }

    /// Attach a `org.opencontainers.image.title` annotation.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(annotations::TITLE.to_string(), title.into());
        self
    }

    /// The annotation map, or an empty one if none was set.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

/// An OCI image manifest (schema version 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    pub config: Descriptor,

    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    /// All blobs this manifest references, config first, then layers in
    /// declared order.
    pub fn referenced(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// An OCI image index. The bundle store's `index.json` always holds exactly
/// one entry after assembly: the bundle root manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    pub manifests: Vec<Descriptor>,
}

impl Index {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: media_types::IMAGE_INDEX.to_string(),
            manifests,
        }
    }
}

/// The bundle root config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPartial {
    pub architecture: String,

    #[serde(rename = "ociVersion")]
    pub oci_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}
