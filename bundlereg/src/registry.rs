use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use ociclient::{Client, ClientSession, Descriptor, ImageReference, OciDigest};

/// A manifest fetched from a registry: its descriptor plus the raw payload
/// the digest was computed over.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub descriptor: Descriptor,
    pub payload: Bytes,
}

/// Content-addressable registry capability the engine and the push/pull
/// protocol are written against.
///
/// One handle is configured per operation (credentials, insecure allowlist)
/// and shared read-only by every copy within that operation. Tests implement
/// this over in-memory maps.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the manifest the reference points at, or `None` if absent.
    async fn resolve_manifest(&self, reference: &ImageReference)
    -> Result<Option<ResolvedManifest>>;

    /// Check whether a manifest with the given digest exists in the
    /// reference's repository.
    async fn manifest_exists(&self, reference: &ImageReference, digest: &OciDigest)
    -> Result<bool>;

    /// Register a manifest payload at the reference's locator.
    async fn put_manifest(
        &self,
        reference: &ImageReference,
        media_type: &str,
        payload: Bytes,
    ) -> Result<Descriptor>;

    /// Check whether a blob exists in the reference's repository.
    async fn blob_exists(&self, reference: &ImageReference, digest: &OciDigest) -> Result<bool>;

    /// Fetch a blob from the reference's repository.
    async fn fetch_blob(&self, reference: &ImageReference, digest: &OciDigest) -> Result<Bytes>;

    /// Upload a blob into the reference's repository.
    async fn push_blob(
        &self,
        reference: &ImageReference,
        media_type: &str,
        payload: Bytes,
    ) -> Result<Descriptor>;
}

/// [`RegistryClient`] over the HTTP distribution API.
///
/// Registries on the insecure allowlist are spoken to over plain http,
/// everything else over https. Credentials are one basic-auth token applied
/// to every registry involved in the operation.
pub struct HttpRegistry {
    auth: Option<String>,
    insecure_registries: Vec<String>,
}

impl HttpRegistry {
    pub fn new(auth: Option<String>, insecure_registries: Vec<String>) -> Self {
        Self {
            auth,
            insecure_registries,
        }
    }

    fn session(&self, reference: &ImageReference) -> ClientSession {
        let scheme = if self
            .insecure_registries
            .iter()
            .any(|registry| registry == reference.registry())
        {
            "http"
        } else {
            "https"
        };
        let url = format!("{}://{}", scheme, reference.registry());
        Client::new(url, self.auth.clone()).new_session(reference.repository().to_string())
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn resolve_manifest(
        &self,
        reference: &ImageReference,
    ) -> Result<Option<ResolvedManifest>> {
        let mut session = self.session(reference);
        let fetched = session.fetch_manifest(&reference.locator()).await?;
        Ok(fetched.map(|(descriptor, payload)| ResolvedManifest {
            descriptor,
            payload,
        }))
    }

    async fn manifest_exists(
        &self,
        reference: &ImageReference,
        digest: &OciDigest,
    ) -> Result<bool> {
        let mut session = self.session(reference);
        session.manifest_exists(&digest.to_string()).await
    }

    async fn put_manifest(
        &self,
        reference: &ImageReference,
        media_type: &str,
        payload: Bytes,
    ) -> Result<Descriptor> {
        let mut session = self.session(reference);
        session
            .put_manifest(&reference.locator(), media_type, &payload)
            .await
    }

    async fn blob_exists(&self, reference: &ImageReference, digest: &OciDigest) -> Result<bool> {
        let mut session = self.session(reference);
        session.blob_exists(digest).await
    }

    async fn fetch_blob(&self, reference: &ImageReference, digest: &OciDigest) -> Result<Bytes> {
        let mut session = self.session(reference);
        session.fetch_blob(digest).await
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        media_type: &str,
        payload: Bytes,
    ) -> Result<Descriptor> {
        let mut session = self.session(reference);
        session.upload_bytes(media_type, &payload).await
    }
}
