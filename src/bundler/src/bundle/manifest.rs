//! Bundle root manifest construction.
//!
//! Builds the manifest that ties the bundle together: one layer per child
//! package manifest (in assembly order), then the bundle definition blob,
//! then the optional signature, with a config blob carrying architecture
//! and registry-UI annotations derived from the bundle metadata.

use std::collections::BTreeMap;

use uds_bundler_core::error::Result;
use uds_bundler_core::types::{UdsBundle, UdsMetadata};

use crate::oci::{annotations, media_types, ConfigPartial, Descriptor, Manifest};

/// OCI version string recorded in the bundle config blob.
const OCI_VERSION: &str = "1.0.1";

/// The built root manifest and config, as descriptors plus their bytes.
pub struct RootManifest {
    pub manifest_desc: Descriptor,
    pub manifest_bytes: Vec<u8>,
    pub config_desc: Descriptor,
    pub config_bytes: Vec<u8>,
}

/// Build the bundle root manifest.
///
/// `child_descs` must be in the order the children were mirrored; layer
/// order in the produced manifest is children, then the bundle YAML
/// descriptor, then the signature descriptor when present.
pub fn build(
    bundle: &UdsBundle,
    child_descs: &[Descriptor],
    bundle_yaml_desc: &Descriptor,
    signature_desc: Option<&Descriptor>,
) -> Result<RootManifest> {
    let (config_desc, config_bytes) = build_config(bundle)?;

    let mut layers: Vec<Descriptor> = child_descs.to_vec();
    layers.push(bundle_yaml_desc.clone());
    if let Some(sig) = signature_desc {
        layers.push(sig.clone());
    }

    let manifest = Manifest {
        schema_version: 2,
        media_type: media_types::IMAGE_MANIFEST.to_string(),
        config: config_desc.clone(),
        layers,
        annotations: Some(metadata_annotations(&bundle.metadata)),
    };
    let manifest_bytes = serde_json::to_vec(&manifest)?;
    let manifest_desc = Descriptor::from_bytes(media_types::IMAGE_MANIFEST, &manifest_bytes);

    Ok(RootManifest {
        manifest_desc,
        manifest_bytes,
        config_desc,
        config_bytes,
    })
}

/// Build the bundle config blob: architecture, OCI version, and title /
/// description annotations.
fn build_config(bundle: &UdsBundle) -> Result<(Descriptor, Vec<u8>)> {
    let architecture = if bundle.build.architecture.is_empty() {
        bundle.metadata.architecture.clone()
    } else {
        bundle.build.architecture.clone()
    };

    let mut config_annotations = BTreeMap::new();
    config_annotations.insert(
        annotations::TITLE.to_string(),
        bundle.metadata.name.clone(),
    );
    config_annotations.insert(
        annotations::DESCRIPTION.to_string(),
        bundle.metadata.description.clone(),
    );

    let config = ConfigPartial {
        architecture,
        oci_version: OCI_VERSION.to_string(),
        annotations: Some(config_annotations),
    };
    let config_bytes = serde_json::to_vec(&config)?;
    let config_desc = Descriptor::from_bytes(media_types::IMAGE_CONFIG, &config_bytes);

    Ok((config_desc, config_bytes))
}

/// Manifest annotations shown by registry UIs. Description is always
/// present; the rest only when the metadata sets them.
fn metadata_annotations(metadata: &UdsMetadata) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert(
        annotations::DESCRIPTION.to_string(),
        metadata.description.clone(),
    );

    let optional = [
        (annotations::URL, &metadata.url),
        (annotations::AUTHORS, &metadata.authors),
        (annotations::DOCUMENTATION, &metadata.documentation),
        (annotations::SOURCE, &metadata.source),
        (annotations::VENDOR, &metadata.vendor),
    ];
    for (key, value) in optional {
        if !value.is_empty() {
            out.insert(key.to_string(), value.clone());
        }
    }

    out
}
