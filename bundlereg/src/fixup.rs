use std::collections::HashMap;

use ociclient::image_reference::NormalizationRules;
use ociclient::{Descriptor, ImageManifest, ImageReference};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bundle::{Bundle, BundleImage};
use crate::error::{DistributionError, Result};
use crate::events::{EventHandler, FixupEvent};
use crate::registry::{RegistryClient, ResolvedManifest};
use crate::relocation::RelocationMap;

/// Per-operation knobs for [`fixup_bundle`]
pub struct FixupOptions {
    /// How source references are normalized
    pub rules: NormalizationRules,
    /// Synchronous progress observer
    pub event_handler: Option<EventHandler>,
    /// Cooperative cancellation for the whole operation
    pub cancellation: CancellationToken,
    /// Overwrite digests already declared in the bundle with the resolved
    /// ones instead of treating a mismatch as an integrity fault
    pub auto_update_digests: bool,
}

impl Default for FixupOptions {
    fn default() -> Self {
        Self {
            rules: NormalizationRules::default(),
            event_handler: None,
            cancellation: CancellationToken::new(),
            auto_update_digests: false,
        }
    }
}

/// Where one source image ended up, cached per normalized source reference
/// so shared images are copied at most once.
struct Relocated {
    reference: String,
    descriptor: Descriptor,
}

/// Rewrite every image reference in `bundle` to point at a digest-pinned
/// copy under the target repository, copying images the target is missing.
///
/// The input bundle is never mutated; the relocated bundle and the completed
/// relocation map are returned together. Images are processed invocation
/// image first, then components in declared order. Any failed image aborts
/// the whole fixup, so a caller never observes a partial relocation map.
pub async fn fixup_bundle(
    bundle: &Bundle,
    target: &ImageReference,
    registry: &dyn RegistryClient,
    options: &FixupOptions,
) -> Result<(Bundle, RelocationMap)> {
    let mut fixed = bundle.clone();
    let mut map = RelocationMap::new();
    let mut seen: HashMap<ImageReference, Relocated> = HashMap::new();

    fixup_image(
        &mut fixed.invocation_image,
        target,
        registry,
        options,
        &mut map,
        &mut seen,
    )
    .await?;
    for image in fixed.images.values_mut() {
        fixup_image(image, target, registry, options, &mut map, &mut seen).await?;
    }

    Ok((fixed, map))
}

async fn fixup_image(
    image: &mut BundleImage,
    target: &ImageReference,
    registry: &dyn RegistryClient,
    options: &FixupOptions,
    map: &mut RelocationMap,
    seen: &mut HashMap<ImageReference, Relocated>,
) -> Result<()> {
    if options.cancellation.is_cancelled() {
        return Err(DistributionError::Cancelled);
    }

    let declared = image.image.clone();
    let source = ImageReference::parse(&declared, &options.rules)?;

    // shared image, already relocated in this session
    if let Some(done) = seen.get(&source) {
        map.record(&declared, &done.reference)?;
        apply_relocation(image, done);
        return Ok(());
    }

    let resolved = registry
        .resolve_manifest(&source)
        .await
        .map_err(|cause| copy_failed(&declared, cause))?
        .ok_or_else(|| copy_failed(&declared, anyhow::anyhow!("manifest not found at {source}")))?;

    if let Some(declared_digest) = &image.digest {
        if *declared_digest != resolved.descriptor.digest && !options.auto_update_digests {
            return Err(DistributionError::DigestMismatch {
                reference: declared,
                declared: declared_digest.clone(),
                resolved: resolved.descriptor.digest.clone(),
            });
        }
    }

    let digest = resolved.descriptor.digest.clone();
    let destination = target.with_digest(digest.clone());

    let present = registry
        .manifest_exists(&destination, &digest)
        .await
        .map_err(|cause| copy_failed(&declared, cause))?;
    if present {
        debug!(image = %declared, %digest, "image already present at target, skipping copy");
    } else {
        emit(options, FixupEvent::start(&declared));
        match copy_image(registry, &source, &destination, &resolved).await {
            Ok(()) => emit(options, FixupEvent::end(&declared, None)),
            Err(cause) => {
                emit(options, FixupEvent::end(&declared, Some(cause.to_string())));
                return Err(copy_failed(&declared, cause));
            }
        }
    }

    let done = Relocated {
        reference: destination.to_string(),
        descriptor: resolved.descriptor.clone(),
    };
    map.record(&declared, &done.reference)?;
    apply_relocation(image, &done);
    seen.insert(source, done);
    Ok(())
}

/// Full content copy: config and layer blobs first, manifest last so the
/// target never exposes a manifest with missing blobs.
async fn copy_image(
    registry: &dyn RegistryClient,
    source: &ImageReference,
    destination: &ImageReference,
    resolved: &ResolvedManifest,
) -> anyhow::Result<()> {
    let manifest: ImageManifest = serde_json::from_slice(&resolved.payload)?;

    for descriptor in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
        if registry.blob_exists(destination, &descriptor.digest).await? {
            continue;
        }
        let data = registry.fetch_blob(source, &descriptor.digest).await?;
        registry
            .push_blob(destination, &descriptor.media_type, data)
            .await?;
    }

    registry
        .put_manifest(
            destination,
            &resolved.descriptor.media_type,
            resolved.payload.clone(),
        )
        .await?;
    Ok(())
}

fn apply_relocation(image: &mut BundleImage, done: &Relocated) {
    image.image = done.reference.clone();
    image.digest = Some(done.descriptor.digest.clone());
    image.media_type = Some(done.descriptor.media_type.clone());
    image.size = Some(done.descriptor.size);
}

fn copy_failed(reference: &str, cause: anyhow::Error) -> DistributionError {
    DistributionError::CopyFailed {
        reference: reference.to_string(),
        cause,
    }
}

fn emit(options: &FixupOptions, event: FixupEvent) {
    if let Some(handler) = &options.event_handler {
        handler(&event);
    }
}
