#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use ociclient::models::OCI_MANIFEST_MEDIA_TYPE;
use ociclient::{Descriptor, ImageManifest, ImageReference, OciDigest};

use bundlereg::bundle::{Bundle, BundleImage};
use bundlereg::canonical;
use bundlereg::registry::{RegistryClient, ResolvedManifest};

const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// In-memory registry stub. Repositories are keyed by full name
/// (`host/repository`), so one stub can stand in for the source and the
/// target registry at once. Counters only track operations issued through
/// the `RegistryClient` trait; seeding writes to the maps directly.
#[derive(Default)]
pub struct MemoryRegistry {
    blobs: Mutex<HashMap<(String, String), (String, Bytes)>>,
    manifests: Mutex<HashMap<(String, String), Bytes>>,
    manifest_puts: AtomicUsize,
    blob_pushes: AtomicUsize,
    fail_blobs: Mutex<HashSet<String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a one-layer image under the given reference; returns the
    /// manifest digest a fixup of that image must end up pinned to.
    pub fn seed_image(&self, reference: &ImageReference, layer: &[u8]) -> OciDigest {
        let name = reference.name();
        let config_bytes =
            canonical::to_canonical_vec(&serde_json::json!({"architecture": "amd64", "os": "linux"}))
                .unwrap();
        let config = self.store_blob(&name, CONFIG_MEDIA_TYPE, &config_bytes);
        let layer = self.store_blob(&name, LAYER_MEDIA_TYPE, layer);

        let manifest = ImageManifest {
            schema_version: 2,
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers: vec![layer],
            annotations: None,
        };
        let payload = canonical::to_canonical_vec(&manifest).unwrap();
        let digest = OciDigest::from_bytes(&payload);

        let mut manifests = self.manifests.lock().unwrap();
        manifests.insert((name.clone(), reference.locator()), Bytes::from(payload.clone()));
        manifests.insert((name, digest.to_string()), Bytes::from(payload));
        digest
    }

    /// Make fetching the given blob fail, simulating an unreachable or
    /// corrupt source image.
    pub fn fail_blob_fetch(&self, digest: &OciDigest) {
        self.fail_blobs.lock().unwrap().insert(digest.to_string());
    }

    /// The layer digest seeding produced for the given content.
    pub fn layer_digest(layer: &[u8]) -> OciDigest {
        OciDigest::from_bytes(layer)
    }

    pub fn manifest_put_count(&self) -> usize {
        self.manifest_puts.load(Ordering::SeqCst)
    }

    pub fn blob_push_count(&self) -> usize {
        self.blob_pushes.load(Ordering::SeqCst)
    }

    fn store_blob(&self, name: &str, media_type: &str, content: &[u8]) -> Descriptor {
        let digest = OciDigest::from_bytes(content);
        self.blobs.lock().unwrap().insert(
            (name.to_string(), digest.to_string()),
            (media_type.to_string(), Bytes::copy_from_slice(content)),
        );
        Descriptor {
            media_type: media_type.to_string(),
            digest,
            size: content.len() as u64,
            platform: None,
        }
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn resolve_manifest(
        &self,
        reference: &ImageReference,
    ) -> Result<Option<ResolvedManifest>> {
        let manifests = self.manifests.lock().unwrap();
        let Some(payload) = manifests.get(&(reference.name(), reference.locator())) else {
            return Ok(None);
        };
        Ok(Some(ResolvedManifest {
            descriptor: Descriptor {
                media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
                digest: OciDigest::from_bytes(payload),
                size: payload.len() as u64,
                platform: None,
            },
            payload: payload.clone(),
        }))
    }

    async fn manifest_exists(
        &self,
        reference: &ImageReference,
        digest: &OciDigest,
    ) -> Result<bool> {
        let manifests = self.manifests.lock().unwrap();
        Ok(manifests.contains_key(&(reference.name(), digest.to_string())))
    }

    async fn put_manifest(
        &self,
        reference: &ImageReference,
        media_type: &str,
        payload: Bytes,
    ) -> Result<Descriptor> {
        self.manifest_puts.fetch_add(1, Ordering::SeqCst);
        let digest = OciDigest::from_bytes(&payload);
        let mut manifests = self.manifests.lock().unwrap();
        manifests.insert((reference.name(), reference.locator()), payload.clone());
        manifests.insert((reference.name(), digest.to_string()), payload.clone());
        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest,
            size: payload.len() as u64,
            platform: None,
        })
    }

    async fn blob_exists(&self, reference: &ImageReference, digest: &OciDigest) -> Result<bool> {
        let blobs = self.blobs.lock().unwrap();
        Ok(blobs.contains_key(&(reference.name(), digest.to_string())))
    }

    async fn fetch_blob(&self, reference: &ImageReference, digest: &OciDigest) -> Result<Bytes> {
        if self.fail_blobs.lock().unwrap().contains(&digest.to_string()) {
            anyhow::bail!("blob {digest} unreachable");
        }
        let blobs = self.blobs.lock().unwrap();
        let (_, content) = blobs
            .get(&(reference.name(), digest.to_string()))
            .ok_or_else(|| anyhow::anyhow!("blob {digest} not found"))?;
        Ok(content.clone())
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        media_type: &str,
        payload: Bytes,
    ) -> Result<Descriptor> {
        self.blob_pushes.fetch_add(1, Ordering::SeqCst);
        let digest = OciDigest::from_bytes(&payload);
        let mut blobs = self.blobs.lock().unwrap();
        blobs.insert(
            (reference.name(), digest.to_string()),
            (media_type.to_string(), payload.clone()),
        );
        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest,
            size: payload.len() as u64,
            platform: None,
        })
    }
}

/// A bundle whose invocation image is the first reference and whose
/// components carry the rest, in declared order.
pub fn bundle_with(name: &str, references: &[&str]) -> Bundle {
    let mut iter = references.iter();
    let invocation_image = BundleImage::new(*iter.next().expect("at least one reference"));
    let mut images = IndexMap::new();
    for (index, reference) in iter.enumerate() {
        images.insert(format!("component-{index}"), BundleImage::new(*reference));
    }
    Bundle {
        schema_version: "v1.0.0".to_string(),
        name: name.to_string(),
        version: "1.0.0".to_string(),
        description: None,
        invocation_image,
        images,
        actions: IndexMap::new(),
        annotations: IndexMap::new(),
    }
}
