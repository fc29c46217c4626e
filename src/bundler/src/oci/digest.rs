//! OCI content digests.
//!
//! A digest is the sole identity of a blob. Only `sha256` is supported.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

use uds_bundler_core::error::{BundleError, Result};

/// An OCI content digest, e.g. `sha256:8f4a...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Compute the sha256 digest of a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            algorithm: "sha256".to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Build a digest from an already-computed sha256 hex string.
    pub fn from_sha256_hex(hex: impl Into<String>) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hex: hex.into(),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The hex part, without the algorithm prefix. This is the blob's file
    /// name under `blobs/sha256/`.
    pub fn encoded(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| BundleError::Format(format!("invalid digest: {}", s)))?;

        if algorithm != "sha256" {
            return Err(BundleError::Format(format!(
                "unsupported digest algorithm: {}",
                algorithm
            )));
        }
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BundleError::Format(format!("invalid digest hex: {}", s)));
        }

        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_from_bytes_empty() {
        let d = Digest::from_bytes(b"");
        assert_eq!(d.encoded(), EMPTY_SHA256);
        assert_eq!(d.to_string(), format!("sha256:{}", EMPTY_SHA256));
    }

    #[test]
    fn test_parse_round_trip() {
        let s = format!("sha256:{}", EMPTY_SHA256);
        let d: Digest = s.parse().unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.to_string(), s);
    }

    #[test]
    fn test_parse_rejects_missing_algorithm() {
        assert!(Digest::from_str(EMPTY_SHA256).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_algorithm() {
        assert!(Digest::from_str(&format!("sha512:{}", EMPTY_SHA256)).is_err());
    }

    #[test]
    fn test_parse_rejects_short_hex() {
        assert!(Digest::from_str("sha256:abc123").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let d = Digest::from_bytes(b"hello");
        let json = serde_json::to_string(&d).unwrap();
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
