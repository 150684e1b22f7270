//! [`RegistryClient`] over the OCI distribution HTTP API.
use std::future::Future;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use http::header::{self, HeaderMap};
use http::request::Builder;
use http::{Method, Request, Response, StatusCode};
use hyper::body::Body;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::oneshot;
use url::Url;

use ferry_core::registry::{BlobBody, RegistryClient};
use ferry_core::{BoxError, Manifest, OciDigest};

use super::auth::{Challenge, Credentials, Scope, TokenCache, TokenResponse};
use super::config::RegistryConfig;
use super::errors::{Error, Result};

/// Redirects followed when downloading a blob.
pub const MAX_REDIRECTS: usize = 5;

const CATALOG_PAGE_SIZE: usize = 100;

// multi-platform types are accepted only so they can be reported as unsupported
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
                               application/vnd.oci.image.manifest.v1+json, \
                               application/vnd.docker.distribution.manifest.list.v2+json, \
                               application/vnd.oci.image.index.v1+json";

type HttpsClient = hyper::Client<HttpsConnector<HttpConnector>, Body>;

/// A registry reached over HTTP(S). Cheap to clone; clones share connections and tokens.
#[derive(Clone)]
pub struct HttpRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    base: String,
    client: HttpsClient,
    credentials: Option<Credentials>,
    tokens: TokenCache,
    timeout: Duration,
}

impl HttpRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let base = config.base_url()?;
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = hyper::Client::builder().build::<_, Body>(https);

        Ok(Self {
            inner: Arc::new(Inner {
                base,
                client,
                credentials: config.credentials(),
                tokens: TokenCache::default(),
                timeout: config.timeout(),
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{path}", self.inner.base))?)
    }

    fn authorize(&self, scope: &Scope, builder: Builder) -> Builder {
        if let Some(token) = self.inner.tokens.get(scope) {
            return builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match &self.inner.credentials {
            Some(credentials) => builder.header(header::AUTHORIZATION, credentials.basic()),
            None => builder,
        }
    }

    async fn dispatch(&self, request: Request<Body>) -> Result<Response<Body>> {
        self.dispatch_after(request, future::ready(())).await
    }

    /// Sends `request`, waiting at most the configured timeout for response headers once `sent`
    /// resolves. Streaming request bodies are never cut off.
    async fn dispatch_after<F>(&self, request: Request<Body>, sent: F) -> Result<Response<Body>>
    where
        F: Future<Output = ()>,
    {
        let method = request.method().clone();
        let url = request.uri().to_string();
        tracing::debug!("{method} {url}");

        let response = self.inner.client.request(request);
        tokio::pin!(response);
        tokio::select! {
            biased;
            response = &mut response => return Ok(response?),
            _ = sent => {}
        }

        match tokio::time::timeout(self.inner.timeout, response).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(Error::Timeout {
                method,
                url,
                seconds: self.inner.timeout.as_secs(),
            }),
        }
    }

    /// Sends a single authorized request without answering any challenge.
    async fn send_once(&self, scope: &Scope, builder: Builder, body: Body) -> Result<Response<Body>> {
        let request = self.authorize(scope, builder).body(body)?;
        self.dispatch(request).await
    }

    /// Sends the request made by `build`, answering at most one authentication challenge.
    async fn send<F>(&self, scope: &Scope, build: F, body: Option<Bytes>) -> Result<Response<Body>>
    where
        F: Fn() -> Builder,
    {
        let into_body = || body.clone().map(Body::from).unwrap_or_else(Body::empty);

        let response = self.send_once(scope, build(), into_body()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let challenge = match response.headers().get(header::WWW_AUTHENTICATE) {
            Some(challenge) => challenge.to_str()?.to_string(),
            None => return Ok(response),
        };
        if !self.authenticate(scope, &challenge).await? {
            return Ok(response);
        }
        self.send_once(scope, build(), into_body()).await
    }

    /// Answers a `WWW-Authenticate` challenge, returning whether a retry may succeed.
    async fn authenticate(&self, scope: &Scope, challenge: &str) -> Result<bool> {
        match Challenge::try_from(challenge)? {
            // basic credentials, if any, were already sent
            Challenge::Basic { .. } => Ok(false),
            Challenge::Bearer {
                realm,
                service,
                scope: challenged,
            } => {
                let token_scope = scope.as_token_scope().or(challenged);
                let token = self
                    .fetch_token(&realm, service.as_deref(), token_scope.as_deref())
                    .await?;
                self.inner.tokens.insert(scope.clone(), token);
                Ok(true)
            }
        }
    }

    async fn fetch_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: Option<&str>,
    ) -> Result<String> {
        let mut url = Url::parse(realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            if let Some(scope) = scope {
                query.append_pair("scope", scope);
            }
        }
        tracing::debug!("requesting token for {}", scope.unwrap_or("registry"));

        let mut builder = Request::get(url.as_str());
        if let Some(credentials) = &self.inner.credentials {
            builder = builder.header(header::AUTHORIZATION, credentials.basic());
        }
        let response = self.dispatch(builder.body(Body::empty())?).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::AuthenticationFailed(format!(
                "token endpoint {realm} returned {status}"
            )));
        }
        let body = hyper::body::to_bytes(response.into_body()).await?;
        let token: TokenResponse = serde_json::from_slice(&body)?;
        token.into_token().ok_or_else(|| {
            Error::AuthenticationFailed(format!("token endpoint {realm} returned no token"))
        })
    }

    /// Connection test: `GET /v2/`.
    pub async fn ping(&self) -> Result<()> {
        let url = self.endpoint("/v2/")?;
        let response = self
            .send(&Scope::Registry, || Request::get(url.as_str()), None)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(Method::GET, &url, response).await)
        }
    }

    /// Every repository in the registry catalog.
    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&format!("/v2/_catalog?n={CATALOG_PAGE_SIZE}"))?;
        let pages: Vec<Catalog> = self.paginate(&Scope::Catalog, url).await?;
        Ok(pages.into_iter().flat_map(|p| p.repositories).collect())
    }

    /// Every tag of `repository`.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = self.endpoint(&format!("/v2/{repository}/tags/list"))?;
        let scope = Scope::Pull(repository.to_string());
        let pages: Vec<TagList> = self.paginate(&scope, url).await?;
        Ok(pages
            .into_iter()
            .flat_map(|p| p.tags.unwrap_or_default())
            .collect())
    }

    /// Follows `Link: <...>; rel="next"` headers collecting each page.
    async fn paginate<T: DeserializeOwned>(&self, scope: &Scope, mut url: Url) -> Result<Vec<T>> {
        let mut pages = Vec::new();
        loop {
            let response = self.send(scope, || Request::get(url.as_str()), None).await?;
            match response.status() {
                StatusCode::OK => {}
                StatusCode::NOT_FOUND => return Err(Error::NotFound(url.to_string())),
                _ => return Err(unexpected(Method::GET, &url, response).await),
            }

            let next = next_link(response.headers());
            let body = hyper::body::to_bytes(response.into_body()).await?;
            pages.push(serde_json::from_slice(&body)?);

            match next {
                Some(next) => {
                    let next = url.join(&next)?;
                    if next == url {
                        break;
                    }
                    url = next;
                }
                None => break,
            }
        }
        Ok(pages)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    type Error = Error;

    async fn blob_exists(&self, repository: &str, digest: &OciDigest) -> Result<bool> {
        let url = self.endpoint(&format!("/v2/{repository}/blobs/{digest}"))?;
        let scope = Scope::Pull(repository.to_string());
        let response = self.send(&scope, || Request::head(url.as_str()), None).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(unexpected(Method::HEAD, &url, response).await),
        }
    }

    async fn download_blob(&self, repository: &str, digest: &OciDigest) -> Result<BlobBody> {
        let origin = self.endpoint(&format!("/v2/{repository}/blobs/{digest}"))?;
        let scope = Scope::Pull(repository.to_string());
        let mut response = self
            .send(&scope, || Request::get(origin.as_str()), None)
            .await?;

        let mut url = origin.clone();
        let mut redirects = 0;
        while response.status().is_redirection() {
            if redirects == MAX_REDIRECTS {
                return Err(Error::TooManyRedirects(MAX_REDIRECTS));
            }
            redirects += 1;

            let location = response
                .headers()
                .get(header::LOCATION)
                .ok_or(Error::MissingHeader("location"))?
                .to_str()?;
            url = url.join(location)?;
            tracing::debug!("blob {digest} redirected to {}", url.origin().ascii_serialization());

            // object storage behind a redirect rejects the registry's credentials
            let builder = Request::get(url.as_str());
            let builder = if url.origin() == origin.origin() {
                self.authorize(&scope, builder)
            } else {
                builder
            };
            response = self.dispatch(builder.body(Body::empty())?).await?;
        }

        match response.status() {
            StatusCode::OK => Ok(response.into_body().map_err(BoxError::from).boxed()),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("blob {digest} in {repository}"))),
            _ => Err(unexpected(Method::GET, &url, response).await),
        }
    }

    async fn upload_blob(
        &self,
        repository: &str,
        digest: &OciDigest,
        content_length: Option<u64>,
        body: BlobBody,
    ) -> Result<()> {
        let start = self.endpoint(&format!("/v2/{repository}/blobs/uploads/"))?;
        let scope = Scope::Push(repository.to_string());
        let response = self
            .send(
                &scope,
                || Request::post(start.as_str()).header(header::CONTENT_LENGTH, 0),
                None,
            )
            .await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(unexpected(Method::POST, &start, response).await);
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .ok_or(Error::MissingHeader("location"))?
            .to_str()?;
        let mut url = start.join(location)?;
        url.query_pairs_mut()
            .append_pair("digest", &digest.to_string());

        let mut builder = Request::put(url.as_str())
            .header(header::CONTENT_TYPE, "application/octet-stream");
        if let Some(content_length) = content_length {
            builder = builder.header(header::CONTENT_LENGTH, content_length);
        }
        // the body is consumed while it is sent, so this request is never retried
        let (sent_tx, sent_rx) = oneshot::channel::<()>();
        let mut sent_tx = Some(sent_tx);
        let body = body.chain(stream::poll_fn(move |_| {
            if let Some(tx) = sent_tx.take() {
                let _ = tx.send(());
            }
            Poll::<Option<std::result::Result<Bytes, BoxError>>>::Ready(None)
        }));
        let request = self
            .authorize(&scope, builder)
            .body(Body::wrap_stream(body))?;
        // a body dropped part way through also drops the sender
        let sent = async {
            let _ = sent_rx.await;
        };
        let response = self.dispatch_after(request, sent).await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::BAD_REQUEST => {
                let errors = ErrorBody::read(response).await;
                if errors.has_code("DIGEST_INVALID") {
                    Err(Error::DigestInvalid {
                        digest: digest.to_string(),
                        message: errors.message,
                    })
                } else {
                    Err(Error::UnexpectedStatus {
                        method: Method::PUT,
                        url: url.to_string(),
                        status: StatusCode::BAD_REQUEST,
                        message: errors.message,
                    })
                }
            }
            _ => Err(unexpected(Method::PUT, &url, response).await),
        }
    }

    async fn fetch_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let url = self.endpoint(&format!("/v2/{repository}/manifests/{reference}"))?;
        let scope = Scope::Pull(repository.to_string());
        let response = self
            .send(
                &scope,
                || Request::get(url.as_str()).header(header::ACCEPT, MANIFEST_ACCEPT),
                None,
            )
            .await?;

        match response.status() {
            StatusCode::OK => {
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let raw = hyper::body::to_bytes(response.into_body()).await?;
                Ok(Manifest::from_bytes(content_type.as_deref(), raw)?)
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!(
                "manifest {repository}:{reference}"
            ))),
            _ => Err(unexpected(Method::GET, &url, response).await),
        }
    }

    async fn publish_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: &Manifest,
    ) -> Result<()> {
        let url = self.endpoint(&format!("/v2/{repository}/manifests/{reference}"))?;
        let scope = Scope::Push(repository.to_string());
        let media_type = manifest.media_type();
        let response = self
            .send(
                &scope,
                || Request::put(url.as_str()).header(header::CONTENT_TYPE, media_type),
                Some(manifest.raw().clone()),
            )
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            s if s.is_client_error() && s != StatusCode::UNAUTHORIZED && s != StatusCode::FORBIDDEN => {
                let errors = ErrorBody::read(response).await;
                Err(Error::ManifestRejected {
                    status: s,
                    message: errors.message,
                })
            }
            _ => Err(unexpected(Method::PUT, &url, response).await),
        }
    }
}

#[derive(Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<ErrorInfo>,
}

#[derive(Deserialize)]
struct ErrorInfo {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

/// Error codes and a readable message from a failed response body.
struct ErrorBody {
    codes: Vec<String>,
    message: String,
}

impl ErrorBody {
    async fn read(response: Response<Body>) -> ErrorBody {
        let body = match hyper::body::to_bytes(response.into_body()).await {
            Ok(body) => body,
            Err(e) => {
                return ErrorBody {
                    codes: Vec::new(),
                    message: format!("failed to read response body: {e}"),
                }
            }
        };

        match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(parsed) if !parsed.errors.is_empty() => ErrorBody {
                codes: parsed.errors.iter().map(|e| e.code.clone()).collect(),
                message: parsed
                    .errors
                    .iter()
                    .map(|e| match &e.message {
                        Some(m) => format!("{}: {m}", e.code),
                        None => e.code.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
            },
            _ => ErrorBody {
                codes: Vec::new(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            },
        }
    }

    fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

async fn unexpected(method: Method, url: &Url, response: Response<Body>) -> Error {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Error::AuthenticationFailed(format!("{method} {url} returned {status}"));
    }
    Error::UnexpectedStatus {
        method,
        url: url.to_string(),
        status,
        message: ErrorBody::read(response).await.message,
    }
}

fn next_link(headers: &HeaderMap) -> Option<String> {
    static NEXT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("link regex must compile")
    });
    headers
        .get_all(header::LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| NEXT.captures(v)?.get(1).map(|m| m.as_str().to_string()))
}
