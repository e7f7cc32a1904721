//! Error types produced by the upstream collectors.
//!
//! | Error | Raised by |
//! |-------|-----------|
//! | [`RequestError`] | any HTTP interaction (transport, status, decoding, token) |
//! | [`OpsManagerError`] | [`OpsManagerCollector`](crate::OpsManagerCollector) |
//! | [`CredhubError`] | [`CredhubCollector`](crate::CredhubCollector) |
//! | [`UsageError`] | [`UsageCollector`](crate::UsageCollector) |
//! | [`CoreConsumptionError`] | [`CoreConsumptionCollector`](crate::CoreConsumptionCollector) |
use std::io;

use thiserror::Error;

/// Failure of a single upstream HTTP call.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request for {label} failed: {source}")]
    Transport {
        label: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} while requesting {label}")]
    UnexpectedStatus { status: u16, label: String },
    #[error("could not decode {label} response: {source}")]
    Decode {
        label: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{label} response is missing {field}")]
    MissingField { label: String, field: &'static str },
    #[error("failed acquiring token from {token_url}: {reason}")]
    Token { token_url: String, reason: String },
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed building HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl RequestError {
    pub(crate) fn transport(label: impl Into<String>, source: reqwest::Error) -> Self {
        RequestError::Transport {
            label: label.into(),
            source,
        }
    }

    pub(crate) fn decode(label: impl Into<String>, source: serde_json::Error) -> Self {
        RequestError::Decode {
            label: label.into(),
            source,
        }
    }

    pub fn unexpected_status(status: u16, label: impl Into<String>) -> Self {
        RequestError::UnexpectedStatus {
            status,
            label: label.into(),
        }
    }
}

/// Failures of the Ops Manager collector.
#[derive(Debug, Error)]
pub enum OpsManagerError {
    #[error("failed listing pending changes: {0}")]
    PendingChangesFailed(#[source] RequestError),
    #[error("there are pending changes on this Ops Manager, please apply or revert them before collecting")]
    PendingChangesExists,
    #[error("failed listing deployed products: {0}")]
    DeployedProductsFailed(#[source] RequestError),
    #[error("failed collecting {data_type} for {product}: {source}")]
    RequestorFailure {
        product: String,
        data_type: String,
        #[source]
        source: RequestError,
    },
}

/// Failures of the Credhub certificate collector.
#[derive(Debug, Error)]
pub enum CredhubError {
    #[error("failed listing certificates: {0}")]
    ListCertificates(#[source] RequestError),
    #[error("failed reading certificate listing: {0}")]
    ListCertificatesRead(#[source] io::Error),
    #[error("failed parsing certificate listing: {0}")]
    ParseCertificates(#[source] serde_json::Error),
    #[error("failed getting data for certificate {name}: {source}")]
    GetCertificateData {
        name: String,
        #[source]
        source: RequestError,
    },
    #[error("failed reading data for certificate {name}: {source}")]
    GetCertificateDataRead {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed parsing data for certificate {name}: {source}")]
    ParseCertificateData {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no certificate value returned for {name}")]
    MissingCertificateValue { name: String },
    #[error("failed to parse PEM block for certificate {name}")]
    CertificatePemParse { name: String },
    #[error("failed to parse X.509 certificate {name}: {reason}")]
    CertificateParse { name: String, reason: String },
    #[error("failed encoding certificate summary: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failures of the usage service collector.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("error parsing usage service url {url}: {source}")]
    UsageServiceUrlParsing {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("error getting UAA url from cf api: {0}")]
    GetUaaUrl(#[source] RequestError),
    #[error("error creating oauth client: {0}")]
    OAuthClient(#[source] RequestError),
    #[error("error requesting {report} from usage service: {source}")]
    UsageServiceRequest {
        report: &'static str,
        #[source]
        source: RequestError,
    },
    #[error("unexpected status {status} from usage service for {report}")]
    UsageServiceUnexpectedResponseStatus { status: u16, report: &'static str },
}

/// Failures of the core consumption collector.
#[derive(Debug, Error)]
pub enum CoreConsumptionError {
    #[error("failed requesting core consumption report: {0}")]
    Request(#[source] RequestError),
    #[error("unexpected status {0} from core consumption endpoint")]
    UnexpectedStatus(u16),
    #[error("Failed to parse row in CSV with index {index}: {reason}")]
    RowParse { index: usize, reason: String },
    #[error("failed encoding core counts: {0}")]
    Encode(#[source] serde_json::Error),
}
