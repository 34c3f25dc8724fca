use indexmap::IndexMap;
use ociclient::OciDigest;
use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::{DistributionError, Result};

/// A named application descriptor: one invocation image plus the named
/// component images and custom actions it ships with.
///
/// Component order is declaration order; serialization and fixup both walk
/// the images invocation-first, then components as declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub schema_version: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub invocation_image: BundleImage,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub images: IndexMap<String, BundleImage>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub actions: IndexMap<String, Action>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, String>,
}

/// A single image entry inside a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleImage {
    /// Reference string as declared, or the relocated reference after fixup
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<OciDigest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl BundleImage {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            digest: None,
            media_type: None,
            size: None,
        }
    }
}

/// A custom action a bundle's invocation image understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub modifies: bool,
    #[serde(default)]
    pub stateless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Bundle {
    /// Deserialize a bundle from its JSON document.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialize the bundle into canonical JSON bytes.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        canonical::to_canonical_vec(self).map_err(DistributionError::Serialization)
    }

    /// All image entries, invocation image first, then components in
    /// declared order.
    pub fn iter_images(&self) -> impl Iterator<Item = &BundleImage> {
        std::iter::once(&self.invocation_image).chain(self.images.values())
    }

    /// The declared reference strings, in the same deterministic order as
    /// [`Bundle::iter_images`].
    pub fn image_references(&self) -> Vec<&str> {
        self.iter_images().map(|image| image.image.as_str()).collect()
    }

    /// Fail unless every image entry is pinned to a content digest.
    pub fn ensure_digests(&self) -> Result<()> {
        for image in self.iter_images() {
            if image.digest.is_none() {
                return Err(DistributionError::MissingDigest(image.image.clone()));
            }
        }
        Ok(())
    }
}
