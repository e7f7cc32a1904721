//! Upstream collectors for foundation telemetry.
//!
//! Each collector talks to one administrative API of a foundation and turns
//! what it finds into [`DataItem`]s:
//!
//! - [`OpsManagerCollector`] - director properties, tile resources, VM types,
//!   and the diagnostic report. Mandatory; also yields the foundation id.
//! - [`CredhubCollector`] - certificate validity summary.
//! - [`UsageCollector`] - app, service, and task usage reports.
//! - [`CoreConsumptionCollector`] - core counts, transcoded from CSV to JSON.
//!
//! The executor in the root crate holds collectors behind the source traits
//! defined here so any of them can be replaced in tests.
use archive::DataItem;
use async_trait::async_trait;

mod consumption;
mod credhub;
mod error;
pub mod http;
mod opsmanager;
mod usage;

pub use crate::consumption::{
    parse_core_counts, CoreConsumptionCollector, CoreCount, CORE_CONSUMPTION_PATH,
    CORE_COUNTS_DATA_TYPE,
};
pub use crate::credhub::{
    summarize_certificate, CertificateSummary, CredhubClient, CredhubCollector, CredhubRequestor,
    CredhubResponse, CERTIFICATES_DATA_TYPE,
};
pub use crate::error::{
    CoreConsumptionError, CredhubError, OpsManagerError, RequestError, UsageError,
};
pub use crate::http::{ApiRequestor, ClientCredentials, HttpResponse, OAuthClient, Requestor};
pub use crate::opsmanager::{
    ByteSource, DeployedProduct, DeployedProductsLister, OmService, OpsManagerApi,
    OpsManagerCollection, OpsManagerCollector, PendingChanges, PendingChangesLister,
    ProductChange, DIAGNOSTIC_REPORT_DATA_TYPE, DIRECTOR_PRODUCT_TYPE, OPS_MANAGER_PRODUCT,
    PROPERTIES_DATA_TYPE, RESOURCES_DATA_TYPE, VM_TYPES_DATA_TYPE,
};
pub use crate::usage::{
    CfApiClient, UsageCollector, UsageService, APP_USAGE_DATA_TYPE, SERVICE_USAGE_DATA_TYPE,
    TASK_USAGE_DATA_TYPE,
};

#[async_trait]
pub trait OpsManagerSource: Send + Sync {
    async fn collect(&self) -> Result<OpsManagerCollection, OpsManagerError>;
}

#[async_trait]
pub trait CredhubSource: Send + Sync {
    async fn collect(&self) -> Result<DataItem, CredhubError>;
}

#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn collect(&self) -> Result<Vec<DataItem>, UsageError>;
}

/// Core consumption may legitimately be unavailable; callers decide whether
/// an error is fatal.
#[async_trait]
pub trait CoreConsumptionSource: Send + Sync {
    async fn collect(&self) -> Result<Vec<DataItem>, CoreConsumptionError>;
}
