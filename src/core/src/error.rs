use thiserror::Error;

/// Bundler error types
#[derive(Error, Debug)]
pub enum BundleError {
    /// Invalid bundle definition or missing required field
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure while talking to a registry
    #[error("Network error: {0}")]
    Network(String),

    /// Registry denied the request (401/403)
    #[error("Authentication denied: {0}")]
    Auth(String),

    /// Reference does not name a manifest in the registry (404)
    #[error("Failed to resolve reference: {0}")]
    Resolve(String),

    /// Digest or size mismatch on a blob
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Malformed manifest, index, or YAML document
    #[error("Format error: {0}")]
    Format(String),

    /// Archival pipeline failure
    #[error("Archive error: {0}")]
    Archive(String),

    /// Assembly was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for BundleError {
    fn from(err: serde_json::Error) -> Self {
        BundleError::Format(err.to_string())
    }
}

impl From<serde_yaml::Error> for BundleError {
    fn from(err: serde_yaml::Error) -> Self {
        BundleError::Format(err.to_string())
    }
}

/// Result type alias for bundler operations
pub type Result<T> = std::result::Result<T, BundleError>;
