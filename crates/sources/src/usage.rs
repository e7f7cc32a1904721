//! Usage service reports.
//!
//! The usage service sits behind the platform's UAA, whose address is only
//! known to the Cloud Controller. Collection therefore resolves the token
//! endpoint from `/v2/info` first, then pulls the three system reports with a
//! bearer token obtained through a client-credentials grant.
use std::io::Cursor;

use archive::DataItem;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::http::{join_path, ClientCredentials, OAuthClient};
use crate::{RequestError, UsageError, UsageSource};

pub const APP_USAGE_DATA_TYPE: &str = "app_usage";
pub const SERVICE_USAGE_DATA_TYPE: &str = "service_usage";
pub const TASK_USAGE_DATA_TYPE: &str = "task_usage";

/// Client for the Cloud Controller info endpoint.
#[derive(Debug, Clone)]
pub struct CfApiClient {
    http: reqwest::Client,
    api_url: Url,
}

#[derive(Deserialize)]
struct InfoResponse {
    #[serde(default)]
    token_endpoint: String,
}

impl CfApiClient {
    pub fn new(http: reqwest::Client, api_url: Url) -> Self {
        Self { http, api_url }
    }

    /// Resolve the UAA base URL advertised by `GET /v2/info`.
    pub async fn get_uaa_url(&self) -> Result<Url, RequestError> {
        const LABEL: &str = "cf api info";
        let url = join_path(&self.api_url, "v2/info")?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RequestError::transport(LABEL, e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RequestError::transport(LABEL, e))?;

        if status != StatusCode::OK {
            return Err(RequestError::unexpected_status(status.as_u16(), LABEL));
        }
        let info: InfoResponse =
            serde_json::from_slice(&body).map_err(|e| RequestError::decode(LABEL, e))?;
        if info.token_endpoint.is_empty() {
            return Err(RequestError::MissingField {
                label: LABEL.to_string(),
                field: "token_endpoint",
            });
        }
        crate::http::parse_url(&info.token_endpoint)
    }
}

/// The three system reports of the usage service.
#[derive(Debug, Clone)]
pub struct UsageService {
    oauth: OAuthClient,
    base: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Report {
    App,
    Service,
    Task,
}

impl Report {
    fn endpoint(self) -> &'static str {
        match self {
            Report::App => "app_usages",
            Report::Service => "service_usages",
            Report::Task => "task_usages",
        }
    }

    fn data_type(self) -> &'static str {
        match self {
            Report::App => APP_USAGE_DATA_TYPE,
            Report::Service => SERVICE_USAGE_DATA_TYPE,
            Report::Task => TASK_USAGE_DATA_TYPE,
        }
    }
}

impl UsageService {
    pub fn new(oauth: OAuthClient, base: Url) -> Self {
        Self { oauth, base }
    }

    pub async fn app_usages(&self) -> Result<Bytes, UsageError> {
        self.report(Report::App).await
    }

    pub async fn service_usages(&self) -> Result<Bytes, UsageError> {
        self.report(Report::Service).await
    }

    pub async fn task_usages(&self) -> Result<Bytes, UsageError> {
        self.report(Report::Task).await
    }

    async fn report(&self, report: Report) -> Result<Bytes, UsageError> {
        let name = report.endpoint();
        let request_err = |source: RequestError| UsageError::UsageServiceRequest {
            report: name,
            source,
        };
        let url = join_path(&self.base, &format!("system_report/{name}")).map_err(request_err)?;
        let response = self.oauth.get(url).await.map_err(request_err)?;
        if !response.is_ok() {
            return Err(UsageError::UsageServiceUnexpectedResponseStatus {
                status: response.status.as_u16(),
                report: name,
            });
        }
        Ok(response.body)
    }
}

/// Collects the app, service, and task usage reports.
pub struct UsageCollector {
    http: reqwest::Client,
    usage_service_url: String,
    cf_api: CfApiClient,
    credentials: ClientCredentials,
}

impl UsageCollector {
    pub fn new(
        http: reqwest::Client,
        usage_service_url: impl Into<String>,
        cf_api: CfApiClient,
        credentials: ClientCredentials,
    ) -> Self {
        Self {
            http,
            usage_service_url: usage_service_url.into(),
            cf_api,
            credentials,
        }
    }

    pub async fn collect(&self) -> Result<Vec<DataItem>, UsageError> {
        let base = Url::parse(&self.usage_service_url).map_err(|source| {
            UsageError::UsageServiceUrlParsing {
                url: self.usage_service_url.clone(),
                source,
            }
        })?;
        let uaa_url = self
            .cf_api
            .get_uaa_url()
            .await
            .map_err(UsageError::GetUaaUrl)?;
        let oauth = OAuthClient::new(self.http.clone(), &uaa_url, self.credentials.clone())
            .map_err(UsageError::OAuthClient)?;
        let service = UsageService::new(oauth, base);

        let mut items = Vec::with_capacity(3);
        for report in [Report::App, Report::Service, Report::Task] {
            let body = match report {
                Report::App => service.app_usages().await?,
                Report::Service => service.service_usages().await?,
                Report::Task => service.task_usages().await?,
            };
            items.push(DataItem::bare("", report.data_type(), Cursor::new(body)));
        }

        info!(items = items.len(), uaa = %uaa_url, "usage_collected");
        Ok(items)
    }
}

#[async_trait]
impl UsageSource for UsageCollector {
    async fn collect(&self) -> Result<Vec<DataItem>, UsageError> {
        UsageCollector::collect(self).await
    }
}
