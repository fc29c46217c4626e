//! Mirror for child packages living in a remote registry.
//!
//! Streams the package manifest and its blobs from the source repository
//! into the destination without ever buffering a full layer in memory.
//! Blobs the destination already holds are skipped.

use async_trait::async_trait;

use uds_bundler_core::error::{BundleError, Result};
use uds_bundler_core::progress::ProgressSink;
use uds_bundler_core::types::ZarfPackage;

use crate::oci::media_types;
use crate::oci::{Descriptor, ImageReference, Manifest, OciStore, RegistryAuth, RemoteClient};

use super::PackageMirror;

/// Where mirrored content lands.
pub enum MirrorTarget<'a> {
    /// The shared bundle content store (local assembly).
    Store(&'a OciStore),
    /// The destination repository (publish mode).
    Remote(&'a RemoteClient),
}

/// Mirrors one remote package into the bundle destination.
pub struct RemoteMirror<'a> {
    package_name: String,
    reference: ImageReference,
    source: RemoteClient,
    target: MirrorTarget<'a>,
    manifest: Option<Manifest>,
}

impl<'a> RemoteMirror<'a> {
    pub fn new(
        package: &ZarfPackage,
        auth: RegistryAuth,
        insecure: bool,
        target: MirrorTarget<'a>,
    ) -> Result<Self> {
        let repository = package.repository.as_deref().ok_or_else(|| {
            BundleError::Config(format!(
                "package {} has no repository to mirror from",
                package.name
            ))
        })?;
        let reference = ImageReference::with_ref(repository, &package.package_ref)?;
        let source = RemoteClient::new(&reference, auth, insecure);

        Ok(Self {
            package_name: package.name.clone(),
            reference,
            source,
            target,
            manifest: None,
        })
    }

    /// Fetch and cache the source manifest, pushing its bytes to the
    /// destination.
    async fn mirror_manifest(&mut self) -> Result<Descriptor> {
        let tag = self.reference.reference().ok_or_else(|| {
            BundleError::Config(format!(
                "package {} has no tag or digest to resolve",
                self.package_name
            ))
        })?;

        let (mut desc, bytes) = self.source.fetch_manifest(tag).await?;
        let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| {
            BundleError::Format(format!(
                "package {} manifest is not an OCI image manifest: {}",
                self.package_name, e
            ))
        })?;

        // Zarf sources label their manifests inconsistently; the bundle
        // always references them as OCI image manifests.
        desc.media_type = media_types::IMAGE_MANIFEST.to_string();

        match &self.target {
            MirrorTarget::Store(store) => {
                store.put_bytes(&desc, &bytes).await?;
            }
            MirrorTarget::Remote(dst) => {
                dst.push_manifest(&desc.digest.to_string(), &desc, bytes)
                    .await?;
            }
        }

        tracing::debug!(
            package = %self.package_name,
            reference = %self.reference,
            digest = %desc.digest,
            "Mirrored package manifest"
        );

        self.manifest = Some(manifest);
        Ok(desc)
    }
}

#[async_trait]
impl PackageMirror for RemoteMirror<'_> {
    async fn push_manifest(&mut self) -> Result<Descriptor> {
        self.mirror_manifest().await
    }

    async fn push_layers(
        &mut self,
        progress: &dyn ProgressSink,
        index: usize,
        total: usize,
    ) -> Result<Vec<Descriptor>> {
        if self.manifest.is_none() {
            self.mirror_manifest().await?;
        }
        let manifest = self.manifest.clone().ok_or_else(|| {
            BundleError::Format(format!(
                "package {} manifest unavailable",
                self.package_name
            ))
        })?;

        let blobs: Vec<Descriptor> = manifest.referenced().cloned().collect();
        tracing::info!(
            package = %self.package_name,
            index,
            total,
            blobs = blobs.len(),
            "Fetching package layers"
        );
        progress.start(blobs.len() as u64);

        for desc in &blobs {
            match &self.target {
                MirrorTarget::Store(store) => {
                    if store.has(&desc.digest).await {
                        tracing::debug!(digest = %desc.digest, "Layer already mirrored");
                    } else {
                        let stream = self.source.fetch_stream(&desc.digest).await?;
                        store.put_stream(desc, stream).await?;
                    }
                }
                MirrorTarget::Remote(dst) => {
                    dst.copy_blob_from(&self.source, desc).await?;
                }
            }
            progress.advance(1);
        }

        Ok(blobs)
    }
}
