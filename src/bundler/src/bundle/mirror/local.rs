//! Mirror for child packages stored as local `tar.zst` archives.
//!
//! A local package archive is a zstd-compressed tar of an OCI image layout
//! (`oci-layout`, `index.json`, `blobs/sha256/*`) with the package's
//! `zarf.yaml` alongside. The mirror extracts it into a per-package scratch
//! directory, rewrites the package manifest for bundle consumers, and copies
//! every referenced blob into the shared content store. The scratch
//! directory is released when the mirror is dropped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;

use uds_bundler_core::config::{BLOBS_DIR, INDEX_FILE, ZARF_YAML};
use uds_bundler_core::error::{BundleError, Result};
use uds_bundler_core::progress::ProgressSink;
use uds_bundler_core::types::{ZarfPackage, ZarfPackageManifest};

use crate::oci::media_types;
use crate::oci::{Descriptor, Index, Manifest, OciStore};

use super::PackageMirror;

/// Mirrors one local package archive into the bundle content store.
#[derive(Debug)]
pub struct LocalMirror<'a> {
    package_name: String,
    archive_path: PathBuf,
    store: &'a OciStore,
    scratch: TempDir,
    extracted: bool,
    manifest: Option<Manifest>,
}

impl<'a> LocalMirror<'a> {
    pub fn new(package: &ZarfPackage, store: &'a OciStore) -> Result<Self> {
        let path = package.path.as_deref().ok_or_else(|| {
            BundleError::Config(format!(
                "package {} has no path to mirror from",
                package.name
            ))
        })?;

        Ok(Self {
            package_name: package.name.clone(),
            archive_path: PathBuf::from(path),
            store,
            scratch: TempDir::new()?,
            extracted: false,
            manifest: None,
        })
    }

    /// Extract the package archive into the scratch directory.
    pub async fn extract(&mut self) -> Result<()> {
        if self.extracted {
            return Ok(());
        }

        let archive = self.archive_path.clone();
        let target = self.scratch.path().to_path_buf();
        let name = self.package_name.clone();

        tokio::task::spawn_blocking(move || unpack_archive(&archive, &target, &name))
            .await
            .map_err(|e| BundleError::Archive(format!("extraction task failed: {}", e)))??;

        self.extracted = true;
        tracing::debug!(
            package = %self.package_name,
            archive = %self.archive_path.display(),
            "Extracted package archive"
        );
        Ok(())
    }

    /// Parse the package's `zarf.yaml` from the extracted tree.
    pub async fn load(&self) -> Result<ZarfPackageManifest> {
        let path = self.scratch.path().join(ZARF_YAML);
        let bytes = tokio::fs::read(&path).await.map_err(|_| {
            BundleError::Format(format!(
                "package {} archive has no {}",
                self.package_name, ZARF_YAML
            ))
        })?;
        let manifest = serde_yaml::from_slice(&bytes).map_err(|e| {
            BundleError::Format(format!(
                "package {} has a malformed {}: {}",
                self.package_name, ZARF_YAML, e
            ))
        })?;
        Ok(manifest)
    }

    /// Read the package's own manifest out of its extracted OCI layout.
    async fn read_source_manifest(&self) -> Result<Manifest> {
        let index_bytes = tokio::fs::read(self.scratch.path().join(INDEX_FILE))
            .await
            .map_err(|_| {
                BundleError::Format(format!(
                    "package {} archive has no {}",
                    self.package_name, INDEX_FILE
                ))
            })?;
        let index: Index = serde_json::from_slice(&index_bytes).map_err(|e| {
            BundleError::Format(format!(
                "package {} has a malformed index: {}",
                self.package_name, e
            ))
        })?;

        let manifest_desc = index.manifests.first().ok_or_else(|| {
            BundleError::Format(format!(
                "package {} index lists no manifest",
                self.package_name
            ))
        })?;

        let manifest_bytes = tokio::fs::read(self.scratch_blob(&manifest_desc.digest))
            .await
            .map_err(|_| {
                BundleError::Integrity(format!(
                    "package {} manifest blob {} missing after extraction",
                    self.package_name, manifest_desc.digest
                ))
            })?;
        serde_json::from_slice(&manifest_bytes).map_err(|e| {
            BundleError::Format(format!(
                "package {} has a malformed manifest: {}",
                self.package_name, e
            ))
        })
    }

    /// Rewrite the source manifest the way bundle consumers expect it:
    /// schema version 2, image-manifest media type, opaque Zarf blob layers
    /// named by their title annotation.
    fn rewrite_manifest(&self, mut manifest: Manifest, title: &str) -> Manifest {
        manifest.schema_version = 2;
        manifest.media_type = media_types::IMAGE_MANIFEST.to_string();
        manifest.config.media_type = media_types::ZARF_BLOB.to_string();
        for layer in &mut manifest.layers {
            layer.media_type = media_types::ZARF_BLOB.to_string();
        }
        manifest.annotations = Some(
            [(
                crate::oci::annotations::TITLE.to_string(),
                title.to_string(),
            )]
            .into(),
        );
        manifest
    }

    fn scratch_blob(&self, digest: &crate::oci::Digest) -> PathBuf {
        self.scratch.path().join(BLOBS_DIR).join(digest.encoded())
    }
}

#[async_trait]
impl PackageMirror for LocalMirror<'_> {
    async fn push_manifest(&mut self) -> Result<Descriptor> {
        self.extract().await?;
        let pkg = self.load().await?;
        let source = self.read_source_manifest().await?;

        let rewritten = self.rewrite_manifest(source, &pkg.metadata.name);
        let bytes = serde_json::to_vec(&rewritten)?;
        let desc = Descriptor::from_bytes(media_types::IMAGE_MANIFEST, &bytes)
            .with_title(&self.package_name);
        self.store.put_bytes(&desc, &bytes).await?;

        tracing::debug!(
            package = %self.package_name,
            digest = %desc.digest,
            "Pushed rewritten package manifest"
        );

        self.manifest = Some(rewritten);
        Ok(desc)
    }

    async fn push_layers(
        &mut self,
        progress: &dyn ProgressSink,
        index: usize,
        total: usize,
    ) -> Result<Vec<Descriptor>> {
        if self.manifest.is_none() {
            self.push_manifest().await?;
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
            "Copying package layers"
        );
        progress.start(blobs.len() as u64);

        for desc in &blobs {
            let bytes = tokio::fs::read(self.scratch_blob(&desc.digest))
                .await
                .map_err(|_| {
                    BundleError::Integrity(format!(
                        "package {} blob {} missing after extraction",
                        self.package_name, desc.digest
                    ))
                })?;
            self.store.put_bytes(desc, &bytes).await?;
            progress.advance(1);
        }

        Ok(blobs)
    }
}

/// Unpack a `tar.zst` archive. Decode failures mean a corrupt archive, not
/// a malformed document, so they surface as integrity errors.
fn unpack_archive(archive: &Path, target: &Path, package: &str) -> Result<()> {
    let file = std::fs::File::open(archive)?;
    let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| {
        BundleError::Integrity(format!("package {} archive is not zstd: {}", package, e))
    })?;
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(target).map_err(|e| {
        BundleError::Integrity(format!(
            "package {} archive failed to extract: {}",
            package, e
        ))
    })
}
