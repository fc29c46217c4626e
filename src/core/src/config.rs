//! Well-known names and layout constants for UDS bundles.

/// File name of the package definition inside a Zarf package archive.
pub const ZARF_YAML: &str = "zarf.yaml";

/// Relative path of the blob directory in an OCI artifact.
pub const BLOBS_DIR: &str = "blobs/sha256";

/// File name of the bundle definition blob.
pub const BUNDLE_YAML: &str = "uds-bundle.yaml";

/// File name of the bundle signature blob.
pub const BUNDLE_YAML_SIGNATURE: &str = "uds-bundle.yaml.sig";

/// Prefix of compiled bundle tarballs.
pub const BUNDLE_PREFIX: &str = "uds-bundle-";

/// OCI image layout marker file name.
pub const OCI_LAYOUT_FILE: &str = "oci-layout";

/// Contents of the OCI image layout marker.
pub const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Index file name in an OCI image layout.
pub const INDEX_FILE: &str = "index.json";

/// Resolve the bundle architecture from a priority list of overrides.
///
/// The first non-empty entry wins; when every override is empty the host
/// architecture is used, spelled the way OCI platforms spell it
/// (`amd64`, `arm64`, ...).
pub fn get_arch(overrides: &[&str]) -> String {
    for arch in overrides {
        if !arch.is_empty() {
            return arch.to_string();
        }
    }
    host_arch().to_string()
}

/// Host architecture in OCI platform notation.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Build the canonical bundle tarball file name:
/// `uds-bundle-<name>-<arch>-<version>.tar.zst`.
pub fn bundle_file_name(name: &str, arch: &str, version: &str) -> String {
    format!("{}{}-{}-{}.tar.zst", BUNDLE_PREFIX, name, arch, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_arch_prefers_first_override() {
        assert_eq!(get_arch(&["arm64", "amd64"]), "arm64");
    }

    #[test]
    fn test_get_arch_skips_empty_overrides() {
        assert_eq!(get_arch(&["", "amd64"]), "amd64");
    }

    #[test]
    fn test_get_arch_falls_back_to_host() {
        assert_eq!(get_arch(&[]), host_arch());
        assert_eq!(get_arch(&["", ""]), host_arch());
    }

    #[test]
    fn test_bundle_file_name() {
        assert_eq!(
            bundle_file_name("example", "amd64", "0.0.1"),
            "uds-bundle-example-amd64-0.0.1.tar.zst"
        );
    }
}
