//! OCI image reference parsing.
//!
//! Parses references like `ghcr.io/org/pkg:0.0.1` or
//! `registry.example/pkg@sha256:...` into structured components. Bundle
//! package repositories always name their registry host explicitly; there
//! is no default-registry shorthand.

use uds_bundler_core::error::{BundleError, Result};

/// Parsed OCI reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, possibly with port (e.g. `ghcr.io`, `localhost:5000`)
    pub registry: String,
    /// Repository path (e.g. `org/pkg`)
    pub repository: String,
    /// Tag (e.g. `0.0.1`)
    pub tag: Option<String>,
    /// Digest (e.g. `sha256:abc...`)
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// Supported forms:
    /// - `host/repo:tag`
    /// - `host/repo@sha256:hex`
    /// - `host/repo:tag@sha256:hex`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(BundleError::Config("empty image reference".to_string()));
        }

        // Split off the digest first.
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(BundleError::Config(format!(
                        "invalid digest in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag. A colon before it
        // is a registry port.
        let (name, tag) = match name_tag.rfind('/') {
            Some(slash) => match name_tag[slash..].rfind(':') {
                Some(colon) => {
                    let colon = slash + colon;
                    (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
                }
                None => (name_tag, None),
            },
            None => (name_tag, None),
        };

        let (registry, repository) = Self::split_registry_repository(name)?;

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Join a repository locator and a package ref into a full reference.
    ///
    /// A ref of the form `sha256:hex` or `...@sha256:hex` pins by digest;
    /// anything else is a tag.
    pub fn with_ref(repository: &str, package_ref: &str) -> Result<Self> {
        if package_ref.starts_with("sha256:") {
            Self::parse(&format!("{}@{}", repository, package_ref))
        } else {
            // plain tags and tag-and-digest refs produced by local mirroring
            Self::parse(&format!("{}:{}", repository, package_ref))
        }
    }

    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        let slash = name.find('/').ok_or_else(|| {
            BundleError::Config(format!(
                "reference '{}' must name its registry host",
                name
            ))
        })?;

        let host = &name[..slash];
        if !(host.contains('.') || host.contains(':') || host == "localhost") {
            return Err(BundleError::Config(format!(
                "reference '{}' must name its registry host",
                name
            )));
        }

        let repository = &name[slash + 1..];
        if repository.is_empty() {
            return Err(BundleError::Config(format!(
                "empty repository in reference '{}'",
                name
            )));
        }

        Ok((host.to_string(), repository.to_string()))
    }

    /// Tag if present, otherwise digest. This is what gets appended to
    /// `/manifests/` in distribution URLs.
    pub fn reference(&self) -> Option<&str> {
        self.tag
            .as_deref()
            .or(self.digest.as_deref())
    }

    /// Base URL of the registry's distribution endpoint.
    pub fn registry_endpoint(&self, insecure: bool) -> String {
        let scheme = if insecure { "http" } else { "https" };
        format!("{}://{}", scheme, self.registry)
    }

    /// The full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}
