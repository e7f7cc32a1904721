//! Credhub certificate inventory.
//!
//! Lists every certificate known to Credhub, fetches its current value,
//! decodes the PEM/X.509 payload, and summarizes validity and issuer into a
//! single `p-bosh_certificates` item.
use std::io::{Cursor, Read};

use archive::DataItem;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;
use x509_parser::pem::parse_x509_pem;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

use crate::http::{join_path, OAuthClient};
use crate::{CredhubError, CredhubSource, RequestError};

pub const CERTIFICATES_DATA_TYPE: &str = "certificates";
const CERTIFICATES_PRODUCT_TYPE: &str = "p-bosh";

/// Raw response from the credential store; the body is read by the caller.
pub struct CredhubResponse {
    pub status: StatusCode,
    pub body: Box<dyn Read + Send>,
}

/// Request seam over the Credhub API.
#[async_trait]
pub trait CredhubRequestor: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Bytes>,
        check_server_errors: bool,
    ) -> Result<CredhubResponse, RequestError>;
}

/// [`CredhubRequestor`] over HTTP with a UAA-issued bearer token.
#[derive(Debug, Clone)]
pub struct CredhubClient {
    base: Url,
    oauth: OAuthClient,
}

impl CredhubClient {
    pub fn new(base: Url, oauth: OAuthClient) -> Self {
        Self { base, oauth }
    }
}

#[async_trait]
impl CredhubRequestor for CredhubClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Bytes>,
        check_server_errors: bool,
    ) -> Result<CredhubResponse, RequestError> {
        let mut url = join_path(&self.base, path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }

        let response = self.oauth.send(method, url, body).await?;
        if check_server_errors && !response.status.is_success() {
            return Err(RequestError::unexpected_status(
                response.status.as_u16(),
                path,
            ));
        }
        Ok(CredhubResponse {
            status: response.status,
            body: Box::new(Cursor::new(response.body)),
        })
    }
}

#[derive(Deserialize)]
struct CertificateList {
    #[serde(default)]
    certificates: Vec<CertificateRef>,
}

#[derive(Deserialize)]
struct CertificateRef {
    name: String,
}

#[derive(Deserialize)]
struct CertificateData {
    #[serde(default)]
    data: Vec<CertificateVersion>,
}

#[derive(Deserialize)]
struct CertificateVersion {
    value: CertificateValue,
}

#[derive(Deserialize)]
struct CertificateValue {
    #[serde(default)]
    certificate: String,
}

/// Validity summary of one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub name: String,
    pub not_before: String,
    pub not_after: String,
    pub issuer: String,
}

#[derive(Serialize)]
struct CertificateReport<'a> {
    credhub_certificates: &'a [CertificateSummary],
}

/// Decode the first PEM block of `pem` and summarize the certificate.
pub fn summarize_certificate(name: &str, pem: &str) -> Result<CertificateSummary, CredhubError> {
    let (_, block) =
        parse_x509_pem(pem.as_bytes()).map_err(|_| CredhubError::CertificatePemParse {
            name: name.to_string(),
        })?;
    let cert = block
        .parse_x509()
        .map_err(|e| CredhubError::CertificateParse {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    let validity = cert.validity();
    Ok(CertificateSummary {
        name: name.to_string(),
        not_before: rfc3339(name, validity.not_before.timestamp())?,
        not_after: rfc3339(name, validity.not_after.timestamp())?,
        issuer: distinguished_name(cert.issuer()),
    })
}

/// RFC 2253 rendering: most specific RDN first, RDNs joined by `,`,
/// multi-valued RDNs by `+`.
fn distinguished_name(name: &X509Name<'_>) -> String {
    let rdns: Vec<String> = name
        .iter_rdn()
        .map(|rdn| rdn.iter().map(attribute).collect::<Vec<_>>().join("+"))
        .collect();
    rdns.into_iter().rev().collect::<Vec<_>>().join(",")
}

fn attribute(attr: &AttributeTypeAndValue<'_>) -> String {
    let oid = attr.attr_type().to_id_string();
    let key = match oid.as_str() {
        "2.5.4.3" => "CN",
        "2.5.4.5" => "SERIALNUMBER",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.9" => "STREET",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.17" => "POSTALCODE",
        other => other,
    };
    match attr.as_str() {
        Ok(value) => format!("{key}={}", escape_dn_value(value)),
        Err(_) => {
            let hex: String = attr
                .attr_value()
                .data
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            format!("{key}=#{hex}")
        }
    }
}

fn escape_dn_value(value: &str) -> String {
    let last = value.len().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.char_indices() {
        let needs_escape = match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => true,
            ' ' => i == 0 || i == last,
            '#' => i == 0,
            _ => false,
        };
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn rfc3339(name: &str, timestamp: i64) -> Result<String, CredhubError> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| CredhubError::CertificateParse {
            name: name.to_string(),
            reason: format!("validity timestamp {timestamp} out of range"),
        })
}

pub struct CredhubCollector<C> {
    requestor: C,
}

impl<C: CredhubRequestor> CredhubCollector<C> {
    pub fn new(requestor: C) -> Self {
        Self { requestor }
    }

    pub async fn collect(&self) -> Result<DataItem, CredhubError> {
        let mut listing = self
            .requestor
            .request(Method::GET, "/api/v1/certificates", &[], None, true)
            .await
            .map_err(CredhubError::ListCertificates)?;
        let mut raw = Vec::new();
        listing
            .body
            .read_to_end(&mut raw)
            .map_err(CredhubError::ListCertificatesRead)?;
        let list: CertificateList =
            serde_json::from_slice(&raw).map_err(CredhubError::ParseCertificates)?;

        let mut summaries = Vec::with_capacity(list.certificates.len());
        for cert in &list.certificates {
            summaries.push(self.certificate_summary(&cert.name).await?);
        }

        let content = serde_json::to_vec(&CertificateReport {
            credhub_certificates: &summaries,
        })
        .map_err(CredhubError::Encode)?;

        info!(certificates = summaries.len(), "credhub_collected");
        Ok(DataItem::for_product(
            CERTIFICATES_PRODUCT_TYPE,
            CERTIFICATES_DATA_TYPE,
            Cursor::new(content),
        ))
    }

    async fn certificate_summary(&self, name: &str) -> Result<CertificateSummary, CredhubError> {
        let mut response = self
            .requestor
            .request(Method::GET, "/api/v1/data", &[("name", name)], None, true)
            .await
            .map_err(|source| CredhubError::GetCertificateData {
                name: name.to_string(),
                source,
            })?;

        let mut raw = Vec::new();
        response
            .body
            .read_to_end(&mut raw)
            .map_err(|source| CredhubError::GetCertificateDataRead {
                name: name.to_string(),
                source,
            })?;
        let data: CertificateData =
            serde_json::from_slice(&raw).map_err(|source| CredhubError::ParseCertificateData {
                name: name.to_string(),
                source,
            })?;

        let version = data
            .data
            .first()
            .ok_or_else(|| CredhubError::MissingCertificateValue {
                name: name.to_string(),
            })?;
        debug!(name, "credhub_certificate_fetched");
        summarize_certificate(name, &version.value.certificate)
    }
}

#[async_trait]
impl<C: CredhubRequestor> CredhubSource for CredhubCollector<C> {
    async fn collect(&self) -> Result<DataItem, CredhubError> {
        CredhubCollector::collect(self).await
    }
}
