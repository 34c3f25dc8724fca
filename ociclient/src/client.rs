use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use reqwest::{Client as ReqwestClient, Method, Response, StatusCode, header};
use serde::Deserialize;

use crate::digest::OciDigest;
use crate::models::{Descriptor, OCI_MANIFEST_MEDIA_TYPE};

/// A client for interacting with an OCI registry.
pub struct Client {
    registry_url: String,
    auth: Option<String>,
    client: ReqwestClient,
}

impl Client {
    /// Create a new client for the given registry URL.
    pub fn new(registry_url: String, auth: Option<String>) -> Self {
        Self {
            registry_url,
            auth,
            client: ReqwestClient::new(),
        }
    }

    /// Encode a username/password pair into the basic auth token the client
    /// sends in Authorization headers.
    pub fn basic_auth_token(username: &str, password: &str) -> String {
        BASE64.encode(format!("{username}:{password}"))
    }

    /// Create a new session for the given repository.
    pub fn new_session(&self, repository: String) -> ClientSession {
        ClientSession {
            repository,
            registry_url: self.registry_url.clone(),
            client: self.client.clone(),
            auth: self.auth.clone(),
            token: None,
        }
    }
}

/// A session for interacting with a specific repository in an OCI registry.
///
/// The session caches the bearer token it obtains from the registry's auth
/// service, so consecutive requests against one repository authenticate once.
pub struct ClientSession {
    repository: String,
    registry_url: String,
    client: ReqwestClient,
    auth: Option<String>,
    token: Option<String>,
}

// Token authentication response from the auth service
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

// Fields of a WWW-Authenticate Bearer challenge
#[derive(Debug, Default)]
struct BearerChallenge {
    realm: Option<String>,
    service: Option<String>,
    scope: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut challenge = BearerChallenge::default();
    for part in rest.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim_matches('"').to_string();
            match key {
                "realm" => challenge.realm = Some(value),
                "service" => challenge.service = Some(value),
                "scope" => challenge.scope = Some(value),
                _ => {}
            }
        }
    }
    Some(challenge)
}

impl ClientSession {
    /// Send a request, obtaining a bearer token and retrying once when the
    /// registry answers 401 with a Bearer challenge.
    async fn send(
        &mut self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &[(header::HeaderName, String)],
    ) -> Result<Response> {
        let response = self.send_once(method.clone(), url, body.clone(), headers).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_bearer_challenge)
        else {
            return Ok(response);
        };
        let Some(realm) = challenge.realm else {
            return Ok(response);
        };

        let mut token_url = reqwest::Url::parse(&realm)?;
        if let Some(service) = challenge.service {
            token_url.query_pairs_mut().append_pair("service", &service);
        }
        if let Some(scope) = challenge.scope {
            token_url.query_pairs_mut().append_pair("scope", &scope);
        }

        let mut token_request = self.client.get(token_url);
        if let Some(auth) = &self.auth {
            token_request = token_request.header(header::AUTHORIZATION, format!("Basic {}", auth));
        }
        let token_response = token_request.send().await?;
        if !token_response.status().is_success() {
            return Ok(response);
        }
        let token_data: TokenResponse = token_response.json().await?;
        self.token = Some(token_data.token);

        self.send_once(method, url, body, headers).await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &[(header::HeaderName, String)],
    ) -> Result<Response> {
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value.as_str());
        }
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        } else if let Some(auth) = &self.auth {
            request = request.header(header::AUTHORIZATION, format!("Basic {}", auth));
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        Ok(request.send().await?)
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url, self.repository, reference
        )
    }

    fn blob_url(&self, digest: &OciDigest) -> String {
        format!("{}/v2/{}/blobs/{}", self.registry_url, self.repository, digest)
    }

    /// Fetch the raw manifest addressed by a tag or digest.
    ///
    /// Returns the descriptor (with the digest computed over the exact bytes
    /// received) together with the payload, or `None` when the registry has
    /// no such manifest.
    pub async fn fetch_manifest(&mut self, reference: &str) -> Result<Option<(Descriptor, Bytes)>> {
        let url = self.manifest_url(reference);
        let response = self
            .send(
                Method::GET,
                &url,
                None,
                &[(header::ACCEPT, OCI_MANIFEST_MEDIA_TYPE.to_string())],
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status() != StatusCode::OK {
            return Err(anyhow::anyhow!(
                "Failed to fetch manifest {}: {}",
                reference,
                response.status()
            ));
        }

        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or(OCI_MANIFEST_MEDIA_TYPE)
            .to_string();
        let payload = response.bytes().await?;
        let descriptor = Descriptor {
            media_type,
            digest: OciDigest::from_bytes(&payload),
            size: payload.len() as u64,
            platform: None,
        };
        Ok(Some((descriptor, payload)))
    }

    /// Check whether a manifest with the given tag or digest exists.
    pub async fn manifest_exists(&mut self, reference: &str) -> Result<bool> {
        let url = self.manifest_url(reference);
        let response = self
            .send(
                Method::HEAD,
                &url,
                None,
                &[(header::ACCEPT, OCI_MANIFEST_MEDIA_TYPE.to_string())],
            )
            .await?;
        Ok(response.status() == StatusCode::OK)
    }

    /// Register a manifest payload under the given tag or digest.
    ///
    /// The payload is uploaded verbatim so the digest computed here matches
    /// what the registry stores.
    pub async fn put_manifest(
        &mut self,
        reference: &str,
        media_type: &str,
        payload: &[u8],
    ) -> Result<Descriptor> {
        let url = self.manifest_url(reference);
        let response = self
            .send(
                Method::PUT,
                &url,
                Some(payload.to_vec()),
                &[(header::CONTENT_TYPE, media_type.to_string())],
            )
            .await?;

        if response.status() != StatusCode::CREATED && response.status() != StatusCode::OK {
            return Err(anyhow::anyhow!(
                "Failed to register manifest {}: {}",
                reference,
                response.status()
            ));
        }

        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest: OciDigest::from_bytes(payload),
            size: payload.len() as u64,
            platform: None,
        })
    }

    /// Check if a blob with the given digest exists.
    pub async fn blob_exists(&mut self, digest: &OciDigest) -> Result<bool> {
        let url = self.blob_url(digest);
        let response = self.send(Method::HEAD, &url, None, &[]).await?;
        Ok(response.status() == StatusCode::OK)
    }

    /// Fetch a blob with the given digest.
    pub async fn fetch_blob(&mut self, digest: &OciDigest) -> Result<Bytes> {
        let url = self.blob_url(digest);
        let response = self.send(Method::GET, &url, None, &[]).await?;

        if response.status() != StatusCode::OK {
            return Err(anyhow::anyhow!("Failed to fetch blob: {}", response.status()));
        }

        Ok(response.bytes().await?)
    }

    /// Upload content from a byte slice.
    ///
    /// Uses the two-step upload flow: POST to start, PUT with the digest to
    /// complete.
    pub async fn upload_bytes(&mut self, media_type: &str, content: &[u8]) -> Result<Descriptor> {
        let digest = OciDigest::from_bytes(content);

        let start_url = format!("{}/v2/{}/blobs/uploads/", self.registry_url, self.repository);
        let start_response = self.send(Method::POST, &start_url, None, &[]).await?;
        if start_response.status() != StatusCode::ACCEPTED {
            return Err(anyhow::anyhow!(
                "Failed to start upload: {}",
                start_response.status()
            ));
        }

        let location = start_response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| anyhow::anyhow!("No location header in response"))?
            .to_str()?;
        let upload_url = if location.starts_with("http") {
            location.to_string()
        } else {
            format!("{}{}", self.registry_url, location)
        };

        let separator = if upload_url.contains('?') { '&' } else { '?' };
        let complete_url = format!("{upload_url}{separator}digest={digest}");
        let complete_response = self
            .send(Method::PUT, &complete_url, Some(content.to_vec()), &[])
            .await?;
        if complete_response.status() != StatusCode::CREATED {
            return Err(anyhow::anyhow!(
                "Failed to complete upload: {}",
                complete_response.status()
            ));
        }

        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest,
            size: content.len() as u64,
            platform: None,
        })
    }
}
