use ociclient::image_reference::ImageReferenceError;
use ociclient::OciDigest;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(#[from] ImageReferenceError),

    #[error("Copying image {reference} failed: {cause}")]
    CopyFailed {
        reference: String,
        cause: anyhow::Error,
    },

    #[error(
        "Conflicting relocation for {original}: already mapped to {existing}, refusing {requested}"
    )]
    RelocationConflict {
        original: String,
        existing: String,
        requested: String,
    },

    #[error("Image {reference} declares digest {declared} but the registry holds {resolved}")]
    DigestMismatch {
        reference: String,
        declared: OciDigest,
        resolved: OciDigest,
    },

    #[error("Inconsistent artifact: {0}")]
    InconsistentArtifact(String),

    #[error("Image {0} carries no content digest")]
    MissingDigest(String),

    #[error("Malformed bundle document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Registry(anyhow::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DistributionError>;
