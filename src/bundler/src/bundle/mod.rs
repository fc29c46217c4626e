//! Bundle assembly orchestration.
//!
//! Drives the whole pipeline: validate the bundle definition, mirror each
//! child package (remote or local) into the destination, build and store
//! the root manifest, then serialize the result: a `tar.zst` OCI image
//! layout for local creation, or a tagged artifact for publishing.
//!
//! Children are mirrored strictly in definition order, one at a time; the
//! first error aborts the run. Mirrored blobs are not rolled back: the
//! scratch store belongs to the invocation and is released with it.

pub mod archive;
pub mod manifest;
pub mod mirror;
pub mod publish;

use std::path::PathBuf;

use uds_bundler_core::cancel::CancelToken;
use uds_bundler_core::config::{bundle_file_name, BUNDLE_YAML, BUNDLE_YAML_SIGNATURE};
use uds_bundler_core::error::{BundleError, Result};
use uds_bundler_core::progress::ProgressSink;
use uds_bundler_core::types::UdsBundle;

use crate::oci::{
    media_types, Descriptor, ImageReference, OciStore, RegistryAuth, RemoteClient,
};

use mirror::{LocalMirror, MirrorTarget, PackageMirror, RemoteMirror};
pub use publish::PublishSummary;

/// Outcome of a local bundle creation.
#[derive(Debug)]
pub struct CreateReport {
    /// Where the bundle tarball was written.
    pub archive_path: PathBuf,
    /// Descriptor of the bundle root manifest.
    pub root_manifest: Descriptor,
    /// Human-readable milestones accumulated during the run.
    pub log: Vec<String>,
}

/// Assembles bundles from a bundle definition.
pub struct BundleCreator {
    auth: RegistryAuth,
    insecure: bool,
    output_dir: PathBuf,
}

impl Default for BundleCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleCreator {
    /// Create an assembler with anonymous registry auth, HTTPS transport,
    /// and the current directory as output.
    pub fn new() -> Self {
        Self {
            auth: RegistryAuth::anonymous(),
            insecure: false,
            output_dir: PathBuf::from("."),
        }
    }

    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Allow plain-HTTP registries (local development).
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Directory the bundle tarball is written into.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Assemble the bundle into a local `tar.zst` archive.
    ///
    /// Mutates `bundle`: local packages get their `ref` rewritten to embed
    /// the digest their manifest was mirrored under.
    pub async fn create(
        &self,
        bundle: &mut UdsBundle,
        signature: &[u8],
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<CreateReport> {
        bundle.validate()?;

        let mut log = Vec::new();
        let arch = bundle.metadata.architecture.clone();

        // The content store lives in a scratch directory owned by this
        // call; it is released after the archive is written.
        let scratch = tempfile::tempdir()?;
        let store = OciStore::create(scratch.path()).await?;
        tracing::debug!(
            bundle = %bundle.metadata.name,
            store = %scratch.path().display(),
            "Assembling bundle"
        );

        let mut child_descs = Vec::new();
        let total = bundle.zarf_packages.len();

        for i in 0..total {
            cancel.ensure_active()?;
            let pkg = bundle.zarf_packages[i].clone();

            let has_repository = pkg.repository.as_deref().is_some_and(|r| !r.is_empty());
            let mut mirror: Box<dyn PackageMirror + '_> = if has_repository {
                Box::new(RemoteMirror::new(
                    &pkg,
                    self.auth.clone(),
                    self.insecure,
                    MirrorTarget::Store(&store),
                )?)
            } else {
                Box::new(LocalMirror::new(&pkg, &store)?)
            };

            let manifest_desc = mirror.push_manifest().await?;
            mirror.push_layers(progress, i + 1, total).await?;
            drop(mirror);

            // Local packages become addressable through the digest their
            // manifest was stored under.
            if !has_repository {
                bundle.zarf_packages[i].package_ref = format!(
                    "{}-{}@sha256:{}",
                    pkg.package_ref,
                    arch,
                    manifest_desc.digest.encoded()
                );
            }

            child_descs.push(manifest_desc);
            let msg = format!("Fetched package: {}", pkg.name);
            progress.success(&msg);
            log.push(msg);
        }

        cancel.ensure_active()?;

        // Bundle definition blob, serialized after ref rewriting so
        // consumers see the mirrored digests.
        let yaml_bytes = serde_yaml::to_string(bundle)?.into_bytes();
        let yaml_desc =
            Descriptor::from_bytes(media_types::ZARF_BLOB, &yaml_bytes).with_title(BUNDLE_YAML);
        store.put_bytes(&yaml_desc, &yaml_bytes).await?;

        let signature_desc = if signature.is_empty() {
            None
        } else {
            let desc = Descriptor::from_bytes(media_types::ZARF_BLOB, signature)
                .with_title(BUNDLE_YAML_SIGNATURE);
            store.put_bytes(&desc, signature).await?;
            Some(desc)
        };

        let root = manifest::build(bundle, &child_descs, &yaml_desc, signature_desc.as_ref())?;
        store.put_bytes(&root.config_desc, &root.config_bytes).await?;
        store
            .put_bytes(&root.manifest_desc, &root.manifest_bytes)
            .await?;

        // The index lists exactly the bundle root, whatever was pushed
        // along the way.
        store
            .rewrite_index(std::slice::from_ref(&root.manifest_desc))
            .await?;

        let file_name = bundle_file_name(
            &bundle.metadata.name,
            &arch,
            &bundle.metadata.version,
        );
        let dest = self.output_dir.join(file_name);
        let _ = tokio::fs::remove_file(&dest).await;

        let path_map = store.enumerate().await?;
        archive::write_archive(&path_map, &dest, progress, cancel).await?;
        log.push(format!("Created bundle archive at: {}", dest.display()));

        Ok(CreateReport {
            archive_path: dest,
            root_manifest: root.manifest_desc,
            log,
        })
    }

    /// Assemble the bundle directly into a remote repository and tag it at
    /// `destination` (e.g. `ghcr.io/org/bundles/example:0.0.1`).
    ///
    /// Every child package must come from a repository; local archives
    /// cannot be published directly.
    pub async fn create_and_publish(
        &self,
        destination: &str,
        bundle: &mut UdsBundle,
        signature: &[u8],
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<PublishSummary> {
        bundle.validate()?;

        if let Some(pkg) = bundle
            .zarf_packages
            .iter()
            .find(|pkg| pkg.repository.is_none())
        {
            return Err(BundleError::Config(format!(
                "package {} is a local archive and cannot be published directly",
                pkg.name
            )));
        }

        let dst_ref = ImageReference::parse(destination)?;
        let dst = RemoteClient::new(&dst_ref, self.auth.clone(), self.insecure);
        tracing::debug!(
            bundle = %bundle.metadata.name,
            destination = %dst_ref,
            "Publishing bundle"
        );

        let mut child_descs = Vec::new();
        let total = bundle.zarf_packages.len();

        for i in 0..total {
            cancel.ensure_active()?;
            let pkg = bundle.zarf_packages[i].clone();

            let mut mirror = RemoteMirror::new(
                &pkg,
                self.auth.clone(),
                self.insecure,
                MirrorTarget::Remote(&dst),
            )?;
            let manifest_desc = mirror.push_manifest().await?;
            mirror.push_layers(progress, i + 1, total).await?;

            child_descs.push(manifest_desc);
            progress.success(&format!("Pushed package: {}", pkg.name));
        }

        cancel.ensure_active()?;
        let summary =
            publish::publish_bundle(&dst, &dst_ref, bundle, &child_descs, signature).await?;
        progress.success(&format!("Published {}", summary.reference));
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uds_bundler_core::types::{UdsMetadata, ZarfPackage};
    use uds_bundler_core::NoProgress;

    #[tokio::test]
    async fn test_create_rejects_missing_architecture() {
        let mut bundle = UdsBundle {
            metadata: UdsMetadata {
                name: "example".to_string(),
                version: "0.0.1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = BundleCreator::new()
            .create(&mut bundle, &[], &NoProgress, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Config(_)));
        assert!(err.to_string().contains("architecture is required"));
    }

    #[tokio::test]
    async fn test_publish_rejects_local_packages() {
        let mut bundle = UdsBundle {
            metadata: UdsMetadata {
                name: "example".to_string(),
                version: "0.0.1".to_string(),
                architecture: "amd64".to_string(),
                ..Default::default()
            },
            zarf_packages: vec![ZarfPackage {
                name: "local-pkg".to_string(),
                repository: None,
                package_ref: "0.0.1".to_string(),
                path: Some("./local-pkg.tar.zst".to_string()),
            }],
            ..Default::default()
        };

        let err = BundleCreator::new()
            .create_and_publish(
                "registry.example/bundles/example:0.0.1",
                &mut bundle,
                &[],
                &NoProgress,
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("local-pkg"));
    }

    #[tokio::test]
    async fn test_create_cancelled_immediately() {
        let mut bundle = UdsBundle {
            metadata: UdsMetadata {
                name: "example".to_string(),
                version: "0.0.1".to_string(),
                architecture: "amd64".to_string(),
                ..Default::default()
            },
            zarf_packages: vec![ZarfPackage {
                name: "pkg".to_string(),
                repository: Some("registry.example/pkg".to_string()),
                package_ref: "0.0.1".to_string(),
                path: None,
            }],
            ..Default::default()
        };

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = BundleCreator::new()
            .create(&mut bundle, &[], &NoProgress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Cancelled));
    }
}
