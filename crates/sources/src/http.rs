//! HTTP plumbing shared by the collectors.
//!
//! [`OAuthClient`] performs a client-credentials grant before every outbound
//! request and attaches the resulting bearer token. [`ApiRequestor`] binds an
//! `OAuthClient` to a base URL and exposes the path-based [`Requestor`] seam
//! the Ops Manager and core consumption collectors talk through.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
pub use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::RequestError;

/// Timeout for token acquisition.
pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for authenticated requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared client. `insecure_skip_tls_verify` disables certificate
/// validation for foundations fronted by self-signed certificates.
pub fn build_http_client(
    insecure_skip_tls_verify: bool,
    timeout: Duration,
) -> Result<reqwest::Client, RequestError> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(insecure_skip_tls_verify)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(RequestError::Client)
}

/// Parse `raw`, mapping failures to [`RequestError::InvalidUrl`].
pub fn parse_url(raw: &str) -> Result<Url, RequestError> {
    Url::parse(raw).map_err(|source| RequestError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Append `path` to `base` without discarding any path prefix `base` has.
pub fn join_path(base: &Url, path: &str) -> Result<Url, RequestError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    parse_url(&joined)
}

/// Status and fully-read body of an upstream response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Fail with [`RequestError::UnexpectedStatus`] unless the status is 200.
    pub fn require_ok(self, label: &str) -> Result<Bytes, RequestError> {
        if self.is_ok() {
            Ok(self.body)
        } else {
            Err(RequestError::unexpected_status(self.status.as_u16(), label))
        }
    }
}

/// Client id and secret for a client-credentials grant.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// Bearer-token HTTP client bound to one auth server.
///
/// Each instance belongs to a single collector; it is never shared.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: Url,
    credentials: ClientCredentials,
    token_timeout: Duration,
    request_timeout: Duration,
}

impl OAuthClient {
    /// `auth_server` is the UAA base; the token endpoint is `<auth_server>/oauth/token`.
    pub fn new(
        http: reqwest::Client,
        auth_server: &Url,
        credentials: ClientCredentials,
    ) -> Result<Self, RequestError> {
        Ok(Self {
            http,
            token_url: join_path(auth_server, "oauth/token")?,
            credentials,
            token_timeout: TOKEN_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    async fn fetch_token(&self) -> Result<String, RequestError> {
        let token_err = |reason: String| RequestError::Token {
            token_url: self.token_url.to_string(),
            reason,
        };

        let response = self
            .http
            .post(self.token_url.clone())
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .header("Accept", "application/json")
            .form(&[("grant_type", "client_credentials")])
            .timeout(self.token_timeout)
            .send()
            .await
            .map_err(|e| token_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(token_err(format!("unexpected status {}", status.as_u16())));
        }

        let body = response.bytes().await.map_err(|e| token_err(e.to_string()))?;
        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| token_err(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(token_err("response did not include an access_token".into()));
        }
        Ok(token.access_token)
    }

    /// Send `method url` with a freshly acquired bearer token.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
    ) -> Result<HttpResponse, RequestError> {
        let token = self.fetch_token().await?;
        let label = url.path().to_string();

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .timeout(self.request_timeout);
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RequestError::transport(label.clone(), e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RequestError::transport(label.clone(), e))?;
        debug!(path = %label, status = status.as_u16(), size = body.len(), "upstream_response");
        Ok(HttpResponse { status, body })
    }

    pub async fn get(&self, url: Url) -> Result<HttpResponse, RequestError> {
        self.send(Method::GET, url, None).await
    }
}

/// Path-based request seam over one upstream API.
#[async_trait]
pub trait Requestor: Send + Sync {
    async fn curl(&self, method: Method, path: &str) -> Result<HttpResponse, RequestError>;
}

/// [`Requestor`] backed by an [`OAuthClient`] and a base URL.
#[derive(Debug, Clone)]
pub struct ApiRequestor {
    base: Url,
    oauth: OAuthClient,
}

impl ApiRequestor {
    pub fn new(base: Url, oauth: OAuthClient) -> Self {
        Self { base, oauth }
    }
}

#[async_trait]
impl Requestor for ApiRequestor {
    async fn curl(&self, method: Method, path: &str) -> Result<HttpResponse, RequestError> {
        let url = join_path(&self.base, path)?;
        self.oauth.send(method, url, None).await
    }
}
