//! The bundle data model.
//!
//! These types mirror the `uds-bundle.yaml` schema: bundle metadata, build
//! provenance, and the ordered list of Zarf packages the bundle aggregates.
//! Parsing of the YAML document itself happens outside the engine; the
//! engine consumes and mutates these structs.

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

/// A bundle definition: metadata plus the packages it aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdsBundle {
    pub metadata: UdsMetadata,

    #[serde(default)]
    pub build: UdsBuildData,

    #[serde(rename = "zarfPackages")]
    pub zarf_packages: Vec<ZarfPackage>,
}

/// Human-facing bundle metadata, surfaced as OCI annotations on the root
/// manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdsMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authors: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub documentation: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
}

/// Build provenance recorded in the bundle definition. Only `architecture`
/// affects assembly; the rest is carried through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdsBuildData {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminal: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// One child package entry in the bundle definition.
///
/// Exactly one of `repository` (remote locator) or `path` (local archive)
/// must be set. After a local package is mirrored, `ref` is rewritten to
/// `<ref>-<arch>@sha256:<manifest-digest>` so consumers can address the
/// mirrored manifest directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZarfPackage {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(rename = "ref")]
    pub package_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The subset of a Zarf package's `zarf.yaml` the bundler reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZarfPackageManifest {
    #[serde(default)]
    pub kind: String,

    pub metadata: ZarfPackageMetadata,
}

/// Package metadata from `zarf.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZarfPackageMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
}

impl UdsBundle {
    /// Validate the parts of the definition assembly depends on.
    ///
    /// Checked before any network or disk activity: a non-empty
    /// architecture, and exactly one source (repository or path) per
    /// package.
    pub fn validate(&self) -> Result<()> {
        if self.metadata.architecture.is_empty() {
            return Err(BundleError::Config(
                "architecture is required for bundling".to_string(),
            ));
        }

        for pkg in &self.zarf_packages {
            let has_repo = pkg.repository.as_deref().is_some_and(|r| !r.is_empty());
            let has_path = pkg.path.as_deref().is_some_and(|p| !p.is_empty());
            match (has_repo, has_path) {
                (true, true) => {
                    return Err(BundleError::Config(format!(
                        "package {} declares both a repository and a path",
                        pkg.name
                    )));
                }
                (false, false) => {
                    return Err(BundleError::Config(format!(
                        "package {} declares neither a repository nor a path",
                        pkg.name
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with(packages: Vec<ZarfPackage>) -> UdsBundle {
        UdsBundle {
            metadata: UdsMetadata {
                name: "example".to_string(),
                version: "0.0.1".to_string(),
                architecture: "amd64".to_string(),
                ..Default::default()
            },
            build: UdsBuildData::default(),
            zarf_packages: packages,
        }
    }

    #[test]
    fn test_validate_ok() {
        let bundle = bundle_with(vec![ZarfPackage {
            name: "a".to_string(),
            repository: Some("registry.example/a".to_string()),
            package_ref: "1.0.0".to_string(),
            path: None,
        }]);
        assert!(bundle.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_architecture() {
        let mut bundle = bundle_with(vec![]);
        bundle.metadata.architecture.clear();
        let err = bundle.validate().unwrap_err();
        assert!(err.to_string().contains("architecture is required"));
    }

    #[test]
    fn test_validate_package_without_source() {
        let bundle = bundle_with(vec![ZarfPackage {
            name: "orphan".to_string(),
            repository: None,
            package_ref: "1.0.0".to_string(),
            path: None,
        }]);
        let err = bundle.validate().unwrap_err();
        assert!(err.to_string().contains("orphan"));
    }

    #[test]
    fn test_validate_package_with_both_sources() {
        let bundle = bundle_with(vec![ZarfPackage {
            name: "greedy".to_string(),
            repository: Some("registry.example/greedy".to_string()),
            package_ref: "1.0.0".to_string(),
            path: Some("./greedy.tar.zst".to_string()),
        }]);
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip_field_names() {
        let yaml = r#"
metadata:
  name: example
  version: 0.0.1
  architecture: amd64
zarfPackages:
  - name: a
    repository: registry.example/a
    ref: 1.0.0
"#;
        let bundle: UdsBundle = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(bundle.zarf_packages[0].package_ref, "1.0.0");

        let out = serde_yaml::to_string(&bundle).unwrap();
        assert!(out.contains("zarfPackages"));
        assert!(out.contains("ref: 1.0.0"));
        // Empty optional metadata must not serialize as empty strings
        assert!(!out.contains("vendor"));
    }
}
