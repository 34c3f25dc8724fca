pub mod client;
pub mod digest;
pub mod image_reference;
pub mod models;

// Re-export main client types for convenience
pub use client::{Client, ClientSession};
pub use digest::{DigestError, OciDigest};
pub use image_reference::{ImageReference, ImageReferenceError, NormalizationRules};
pub use models::{Descriptor, ImageManifest, OCI_MANIFEST_MEDIA_TYPE, Platform};
