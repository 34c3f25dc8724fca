use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use ociclient::models::OCI_MANIFEST_MEDIA_TYPE;
use ociclient::{ImageManifest, ImageReference, OciDigest};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bundle::Bundle;
use crate::canonical;
use crate::error::{DistributionError, Result};
use crate::registry::RegistryClient;
use crate::relocation::RelocationMap;

/// Media type of the bundle document stored as the artifact's config blob
pub const BUNDLE_CONFIG_MEDIA_TYPE: &str = "application/vnd.bundlereg.bundle.config.v1+json";
/// Media type of the relocation map stored as the artifact's only layer
pub const RELOCATION_MAP_MEDIA_TYPE: &str = "application/vnd.bundlereg.relocation-map.v1+json";

/// Serialize the bundle and relocation map canonically and upload them as
/// one OCI artifact at the target reference.
///
/// Logically identical inputs produce byte-identical blobs and manifests,
/// so pushing twice returns the same digest. The returned digest is computed
/// over the canonical manifest bytes.
pub async fn push_bundle(
    bundle: &Bundle,
    map: &RelocationMap,
    target: &ImageReference,
    registry: &dyn RegistryClient,
    cancellation: &CancellationToken,
) -> Result<OciDigest> {
    if cancellation.is_cancelled() {
        return Err(DistributionError::Cancelled);
    }
    bundle.ensure_digests()?;

    let bundle_bytes = bundle.to_canonical_json()?;
    let map_bytes = canonical::to_canonical_vec(map)?;

    let config = registry
        .push_blob(target, BUNDLE_CONFIG_MEDIA_TYPE, Bytes::from(bundle_bytes))
        .await
        .map_err(DistributionError::Registry)?;
    let layer = registry
        .push_blob(target, RELOCATION_MAP_MEDIA_TYPE, Bytes::from(map_bytes))
        .await
        .map_err(DistributionError::Registry)?;

    let mut annotations = HashMap::new();
    annotations.insert("org.opencontainers.image.title".to_string(), bundle.name.clone());
    annotations.insert("org.opencontainers.image.version".to_string(), bundle.version.clone());
    let manifest = ImageManifest {
        schema_version: 2,
        media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
        config,
        layers: vec![layer],
        annotations: Some(annotations),
    };
    let payload = canonical::to_canonical_vec(&manifest)?;

    // blobs without a manifest stay invisible, so this is the last point
    // where cancellation can still leave the target untouched
    if cancellation.is_cancelled() {
        return Err(DistributionError::Cancelled);
    }
    let descriptor = registry
        .put_manifest(target, OCI_MANIFEST_MEDIA_TYPE, Bytes::from(payload))
        .await
        .map_err(DistributionError::Registry)?;
    debug!(reference = %target, digest = %descriptor.digest, "pushed bundle artifact");
    Ok(descriptor.digest)
}

/// Fetch the artifact at the source reference and split it back into the
/// bundle and the relocation map, validating that the two agree.
pub async fn pull_bundle(
    source: &ImageReference,
    registry: &dyn RegistryClient,
    cancellation: &CancellationToken,
) -> Result<(Bundle, RelocationMap)> {
    if cancellation.is_cancelled() {
        return Err(DistributionError::Cancelled);
    }
    let resolved = registry
        .resolve_manifest(source)
        .await
        .map_err(DistributionError::Registry)?
        .ok_or_else(|| {
            DistributionError::Registry(anyhow::anyhow!("no artifact found at {source}"))
        })?;
    let manifest: ImageManifest = serde_json::from_slice(&resolved.payload)?;

    if manifest.config.media_type != BUNDLE_CONFIG_MEDIA_TYPE {
        return Err(DistributionError::InconsistentArtifact(format!(
            "config media type {} is not a bundle document",
            manifest.config.media_type
        )));
    }
    let layer = manifest
        .layers
        .iter()
        .find(|layer| layer.media_type == RELOCATION_MAP_MEDIA_TYPE)
        .ok_or_else(|| {
            DistributionError::InconsistentArtifact(
                "artifact carries no relocation map layer".to_string(),
            )
        })?;

    let bundle_bytes = registry
        .fetch_blob(source, &manifest.config.digest)
        .await
        .map_err(DistributionError::Registry)?;
    let map_bytes = registry
        .fetch_blob(source, &layer.digest)
        .await
        .map_err(DistributionError::Registry)?;

    let bundle = Bundle::from_json(&bundle_bytes)?;
    let map: RelocationMap = serde_json::from_slice(&map_bytes)?;

    validate_consistency(&bundle, &map)?;
    Ok((bundle, map))
}

/// Check that the relocation map covers exactly the bundle's declared image
/// references.
///
/// A declared reference counts as covered when it appears as a map key (the
/// bundle kept its original references) or as a map value (the bundle was
/// rewritten during fixup). Every map entry must correspond to a declared
/// reference the same way, so dropped, renamed, or extra entries all fail.
fn validate_consistency(bundle: &Bundle, map: &RelocationMap) -> Result<()> {
    let declared: HashSet<&str> = bundle.image_references().into_iter().collect();
    let values: HashSet<&str> = map.iter().map(|(_, relocated)| relocated).collect();

    for reference in &declared {
        if map.lookup(reference).is_none() && !values.contains(reference) {
            return Err(DistributionError::InconsistentArtifact(format!(
                "bundle image {reference} has no relocation entry"
            )));
        }
    }
    for (original, relocated) in map.iter() {
        if !declared.contains(original) && !declared.contains(relocated) {
            return Err(DistributionError::InconsistentArtifact(format!(
                "relocation entry {original} -> {relocated} matches no bundle image"
            )));
        }
    }
    Ok(())
}
