//! OCI distribution-protocol client.
//!
//! Talks to container registries (GHCR, Harbor, `registry:2`, ...) for both
//! sides of bundle assembly: resolving and fetching child package content,
//! and pushing mirrored blobs and manifests when publishing. Transient
//! transport failures are retried with exponential backoff; auth failures
//! and digest mismatches are fatal.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Body, Client, Response, StatusCode};
use tokio::sync::Mutex;

use uds_bundler_core::error::{BundleError, Result};

use super::digest::Digest;
use super::model::{media_types, Descriptor};
use super::reference::ImageReference;

/// Transient-failure retry attempts.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }
}

/// A client bound to one repository in one registry.
pub struct RemoteClient {
    endpoint: String,
    repository: String,
    client: Client,
    auth: RegistryAuth,
    token: Mutex<Option<String>>,
}

impl RemoteClient {
    /// Create a client for the repository named by `reference`.
    pub fn new(reference: &ImageReference, auth: RegistryAuth, insecure: bool) -> Self {
        Self {
            endpoint: reference.registry_endpoint(insecure),
            repository: reference.repository.clone(),
            client: Client::new(),
            auth,
            token: Mutex::new(None),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Resolve a tag or digest reference to the manifest descriptor it
    /// names.
    pub async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let (desc, _) = self.fetch_manifest(reference).await?;
        Ok(desc)
    }

    /// Fetch a manifest and the descriptor describing its bytes.
    ///
    /// The digest is taken from the `Docker-Content-Digest` header when the
    /// registry provides it, otherwise computed from the body.
    pub async fn fetch_manifest(&self, reference: &str) -> Result<(Descriptor, Bytes)> {
        let url = self.manifest_url(reference);

        self.with_retry(|| async {
            let resp = self
                .send(self.client.get(&url).header(
                    header::ACCEPT,
                    media_types::IMAGE_MANIFEST,
                ))
                .await?;
            let resp = check_status(resp, &url)?;

            let media_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(media_types::IMAGE_MANIFEST)
                .to_string();
            let header_digest = resp
                .headers()
                .get("docker-content-digest")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = resp.bytes().await.map_err(transport_error)?;
            let digest = match header_digest {
                Some(s) => s.parse::<Digest>()?,
                None => Digest::from_bytes(&body),
            };

            let desc = Descriptor {
                media_type,
                digest,
                size: body.len() as u64,
                annotations: None,
            };

            tracing::debug!(
                repository = %self.repository,
                reference,
                digest = %desc.digest,
                "Resolved manifest"
            );

            Ok((desc, body))
        })
        .await
    }

    /// Fetch a blob into memory. For manifests and configs only; layers go
    /// through [`RemoteClient::fetch_stream`].
    pub async fn fetch_bytes(&self, digest: &Digest) -> Result<Bytes> {
        let url = self.blob_url(digest);
        self.with_retry(|| async {
            let resp = self.send(self.client.get(&url)).await?;
            let resp = check_status(resp, &url)?;
            resp.bytes().await.map_err(transport_error)
        })
        .await
    }

    /// Open a streaming reader over a blob. The caller is responsible for
    /// verifying the digest of what it reads.
    pub async fn fetch_stream(
        &self,
        digest: &Digest,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let url = self.blob_url(digest);
        let resp = self.send(self.client.get(&url)).await?;
        let resp = check_status(resp, &url)?;
        Ok(resp.bytes_stream().map_err(transport_error).boxed())
    }

    /// Check whether the repository already holds a blob.
    pub async fn blob_exists(&self, digest: &Digest) -> Result<bool> {
        let url = self.blob_url(digest);
        self.with_retry(|| async {
            let resp = self.send(self.client.head(&url)).await?;
            match resp.status() {
                StatusCode::OK => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                _ => {
                    check_status(resp, &url)?;
                    Ok(false)
                }
            }
        })
        .await
    }

    /// Upload a blob from memory. A blob already present is left alone.
    /// Idempotent across retries: the registry keys uploads by digest.
    pub async fn push_bytes(&self, desc: &Descriptor, bytes: Bytes) -> Result<()> {
        if self.blob_exists(&desc.digest).await? {
            tracing::debug!(digest = %desc.digest, "Blob already present, skipping push");
            return Ok(());
        }

        self.with_retry(|| {
            let bytes = bytes.clone();
            async move { self.upload(desc, Body::from(bytes), true).await }
        })
        .await
    }

    /// Copy a blob from another repository into this one without buffering
    /// it in memory. Transient failures restart the copy from the source.
    pub async fn copy_blob_from(&self, source: &RemoteClient, desc: &Descriptor) -> Result<()> {
        if self.blob_exists(&desc.digest).await? {
            tracing::debug!(digest = %desc.digest, "Blob already present, skipping copy");
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            let stream = source.fetch_stream(&desc.digest).await?;
            match self.upload(desc, Body::wrap_stream(stream), false).await {
                Err(BundleError::Network(reason)) if attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        digest = %desc.digest,
                        attempt,
                        %reason,
                        "Blob copy failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Upload a manifest and tag it with `reference`.
    pub async fn push_manifest(
        &self,
        reference: &str,
        desc: &Descriptor,
        bytes: Bytes,
    ) -> Result<()> {
        let url = self.manifest_url(reference);
        self.with_retry(|| {
            let url = url.clone();
            let bytes = bytes.clone();
            async move {
                let resp = self
                    .send(
                        self.client
                            .put(&url)
                            .header(header::CONTENT_TYPE, desc.media_type.as_str())
                            .body(bytes),
                    )
                    .await?;
                expect_status(resp, &url, &[StatusCode::CREATED, StatusCode::OK])
            }
        })
        .await?;

        tracing::debug!(
            repository = %self.repository,
            reference,
            digest = %desc.digest,
            "Pushed manifest"
        );
        Ok(())
    }

    /// Two-step monolithic blob upload: POST an upload session, PUT the
    /// content against the returned location.
    async fn upload(&self, desc: &Descriptor, body: Body, cloneable: bool) -> Result<()> {
        let start_url = format!("{}/v2/{}/blobs/uploads/", self.endpoint, self.repository);
        let resp = self.send(self.client.post(&start_url)).await?;
        let resp = expect_response(resp, &start_url, &[StatusCode::ACCEPTED])?;

        let location = resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                BundleError::Network(format!("{}: upload session without location", start_url))
            })?;
        let location = if location.starts_with("http") {
            location.to_string()
        } else {
            format!("{}{}", self.endpoint, location)
        };

        // The location may already carry registry session state in its query.
        let sep = if location.contains('?') { '&' } else { '?' };
        let commit_url = format!("{}{}digest={}", location, sep, desc.digest);

        let request = self
            .client
            .put(&commit_url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, desc.size)
            .body(body);
        let resp = if cloneable {
            self.send(request).await?
        } else {
            // Streaming bodies cannot be replayed for a token retry; rely on
            // the token negotiated by the session POST above.
            self.send_once(request).await?
        };
        expect_status(resp, &commit_url, &[StatusCode::CREATED])
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.endpoint, self.repository, reference
        )
    }

    fn blob_url(&self, digest: &Digest) -> String {
        format!("{}/v2/{}/blobs/{}", self.endpoint, self.repository, digest)
    }

    /// Send a request, negotiating a bearer token and replaying once on 401.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let replay = request.try_clone();
        let resp = self.send_once(request).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            if let Some(replay) = replay {
                if self.negotiate_token(&resp).await? {
                    return self.send_once(replay).await;
                }
            }
        }

        Ok(resp)
    }

    /// Send a request with whatever credentials are currently held.
    async fn send_once(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let request = {
            let token = self.token.lock().await;
            match (token.as_ref(), &self.auth.username, &self.auth.password) {
                (Some(token), _, _) => request.bearer_auth(token),
                (None, Some(user), Some(pass)) => request.basic_auth(user, Some(pass)),
                _ => request,
            }
        };
        request.send().await.map_err(transport_error)
    }

    /// Obtain a bearer token from the challenge in a 401 response.
    /// Returns false when the response carries no usable challenge.
    async fn negotiate_token(&self, resp: &Response) -> Result<bool> {
        let challenge = match resp
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge)
        {
            Some(challenge) => challenge,
            None => return Ok(false),
        };

        let mut token_url = reqwest::Url::parse(&challenge.realm)
            .map_err(|e| BundleError::Auth(format!("invalid token realm: {}", e)))?;
        if let Some(service) = &challenge.service {
            token_url.query_pairs_mut().append_pair("service", service);
        }
        if let Some(scope) = &challenge.scope {
            token_url.query_pairs_mut().append_pair("scope", scope);
        }

        let mut request = self.client.get(token_url);
        if let (Some(user), Some(pass)) = (&self.auth.username, &self.auth.password) {
            request = request.basic_auth(user, Some(pass.clone()));
        }

        let resp = request.send().await.map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(BundleError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            token: String,
        }
        let token: TokenResponse = resp.json().await.map_err(transport_error)?;
        *self.token.lock().await = Some(token.token);
        Ok(true)
    }

    /// Retry an operation with exponential backoff on transport failures.
    /// All other error kinds surface immediately.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(BundleError::Network(reason)) if attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::warn!(attempt, %reason, "Transient registry failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// A parsed `WWW-Authenticate: Bearer ...` challenge.
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let params = header.strip_prefix("Bearer ")?;

    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in params.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"').to_string();
        match key {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
        scope,
    })
}

fn transport_error(err: reqwest::Error) -> BundleError {
    BundleError::Network(err.to_string())
}

/// Map a non-success status to the bundler error taxonomy and pass success
/// responses through.
fn check_status(resp: Response, url: &str) -> Result<Response> {
    match resp.status() {
        s if s.is_success() => Ok(resp),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BundleError::Auth(format!(
            "{}: {}",
            url,
            resp.status()
        ))),
        StatusCode::NOT_FOUND => Err(BundleError::Resolve(format!("{}: not found", url))),
        s => Err(BundleError::Network(format!("{}: {}", url, s))),
    }
}

fn expect_status(resp: Response, url: &str, accepted: &[StatusCode]) -> Result<()> {
    expect_response(resp, url, accepted).map(|_| ())
}

fn expect_response(resp: Response, url: &str, accepted: &[StatusCode]) -> Result<Response> {
    let status = resp.status();
    if accepted.contains(&status) {
        Ok(resp)
    } else {
        check_status(resp, url)?;
        Err(BundleError::Network(format!(
            "{}: unexpected status {}",
            url,
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RemoteClient {
        let reference = ImageReference::parse("registry.example/org/pkg:1.0.0").unwrap();
        RemoteClient::new(&reference, RegistryAuth::anonymous(), false)
    }

    #[test]
    fn test_registry_auth_anonymous() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.username.is_none());
        assert!(auth.password.is_none());
    }

    #[test]
    fn test_registry_auth_basic() {
        let auth = RegistryAuth::basic("user", "pass");
        assert_eq!(auth.username, Some("user".to_string()));
        assert_eq!(auth.password, Some("pass".to_string()));
    }

    #[test]
    fn test_manifest_url() {
        assert_eq!(
            client().manifest_url("1.0.0"),
            "https://registry.example/v2/org/pkg/manifests/1.0.0"
        );
    }

    #[test]
    fn test_blob_url() {
        let digest = Digest::from_bytes(b"blob");
        assert_eq!(
            client().blob_url(&digest),
            format!("https://registry.example/v2/org/pkg/blobs/{}", digest)
        );
    }

    #[test]
    fn test_insecure_endpoint() {
        let reference = ImageReference::parse("localhost:5000/pkg:v1").unwrap();
        let client = RemoteClient::new(&reference, RegistryAuth::anonymous(), true);
        assert!(client.endpoint.starts_with("http://"));
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://auth.example/token",service="registry.example",scope="repository:org/pkg:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.example/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.example"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:org/pkg:pull")
        );
    }

    #[test]
    fn test_parse_bearer_challenge_rejects_basic() {
        assert!(parse_bearer_challenge(r#"Basic realm="registry""#).is_none());
    }
}
