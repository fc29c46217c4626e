//! Direct-to-registry bundle publishing.
//!
//! The remote counterpart of the archiver: once the child packages have
//! been mirrored into the destination repository, pushes the bundle YAML,
//! the optional signature, the config blob, and finally the tagged root
//! manifest.

use bytes::Bytes;

use uds_bundler_core::config::{BUNDLE_YAML, BUNDLE_YAML_SIGNATURE};
use uds_bundler_core::error::{BundleError, Result};
use uds_bundler_core::types::UdsBundle;

use crate::oci::{media_types, Descriptor, ImageReference, RemoteClient};

use super::manifest;

/// Outcome of a publish run: where the bundle landed and example follow-up
/// commands for the operator.
#[derive(Debug, Clone)]
pub struct PublishSummary {
    /// The tagged reference the root manifest lives under.
    pub reference: String,
    /// Digest of the published root manifest.
    pub digest: String,
    /// Example follow-up commands.
    pub commands: Vec<String>,
}

/// Push the bundle-level blobs and the tagged root manifest.
///
/// `child_descs` are the package manifest descriptors already mirrored into
/// the destination, in assembly order.
pub async fn publish_bundle(
    dst: &RemoteClient,
    dst_ref: &ImageReference,
    bundle: &UdsBundle,
    child_descs: &[Descriptor],
    signature: &[u8],
) -> Result<PublishSummary> {
    // bundle definition blob
    let yaml_bytes = serde_yaml::to_string(bundle)?.into_bytes();
    let yaml_desc =
        Descriptor::from_bytes(media_types::ZARF_BLOB, &yaml_bytes).with_title(BUNDLE_YAML);
    dst.push_bytes(&yaml_desc, Bytes::from(yaml_bytes)).await?;
    tracing::debug!(digest = %yaml_desc.digest, "Pushed {}", BUNDLE_YAML);

    // optional signature blob
    let signature_desc = if signature.is_empty() {
        None
    } else {
        let desc = Descriptor::from_bytes(media_types::ZARF_BLOB, signature)
            .with_title(BUNDLE_YAML_SIGNATURE);
        dst.push_bytes(&desc, Bytes::copy_from_slice(signature))
            .await?;
        tracing::debug!(digest = %desc.digest, "Pushed {}", BUNDLE_YAML_SIGNATURE);
        Some(desc)
    };

    // config blob, then the root manifest that references everything
    let root = manifest::build(bundle, child_descs, &yaml_desc, signature_desc.as_ref())?;
    dst.push_bytes(&root.config_desc, Bytes::from(root.config_bytes))
        .await?;

    let tag = dst_ref.reference().ok_or_else(|| {
        BundleError::Config(format!(
            "destination {} has no tag to publish under",
            dst_ref
        ))
    })?;
    dst.push_manifest(tag, &root.manifest_desc, Bytes::from(root.manifest_bytes))
        .await?;

    let reference = dst_ref.full_reference();
    tracing::info!(
        %reference,
        digest = %root.manifest_desc.digest,
        "Published bundle"
    );

    Ok(PublishSummary {
        reference: reference.clone(),
        digest: root.manifest_desc.digest.to_string(),
        commands: vec![
            format!("inspect oci://{}", reference),
            format!("deploy oci://{}", reference),
            format!("pull oci://{}", reference),
        ],
    })
}
