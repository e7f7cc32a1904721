//! Ops Manager collection.
//!
//! The collector refuses to run while changes are staged but not applied,
//! then walks the deployed products in listing order: the director
//! contributes its properties (and the foundation id), every other tile its
//! resources. VM types and the diagnostic report close the set.
use std::io::{Cursor, Read};
use std::sync::Arc;

use archive::DataItem;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::http::Requestor;
use crate::{OpsManagerError, OpsManagerSource, RequestError};

/// Product type of the BOSH director tile.
pub const DIRECTOR_PRODUCT_TYPE: &str = "p-bosh";
/// Product label for the Ops Manager-wide reports.
pub const OPS_MANAGER_PRODUCT: &str = "ops_manager";

pub const PROPERTIES_DATA_TYPE: &str = "properties";
pub const RESOURCES_DATA_TYPE: &str = "resources";
pub const VM_TYPES_DATA_TYPE: &str = "vm_types";
pub const DIAGNOSTIC_REPORT_DATA_TYPE: &str = "diagnostic_report";

/// One-shot response body handed to a [`DataItem`].
pub type ByteSource = Box<dyn Read + Send>;

/// A staged change to one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChange {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChanges {
    #[serde(rename = "product_changes", default)]
    pub change_list: Vec<ProductChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedProduct {
    #[serde(rename = "type")]
    pub product_type: String,
    pub guid: String,
}

#[async_trait]
pub trait PendingChangesLister: Send + Sync {
    async fn list(&self) -> Result<PendingChanges, RequestError>;
}

#[async_trait]
pub trait DeployedProductsLister: Send + Sync {
    async fn list(&self) -> Result<Vec<DeployedProduct>, RequestError>;
}

/// Report endpoints of Ops Manager.
#[async_trait]
pub trait OmService: Send + Sync {
    async fn director_properties(&self) -> Result<ByteSource, RequestError>;
    async fn product_resources(&self, guid: &str) -> Result<ByteSource, RequestError>;
    async fn vm_types(&self) -> Result<ByteSource, RequestError>;
    async fn diagnostic_report(&self) -> Result<ByteSource, RequestError>;
}

/// Ops Manager REST API over a [`Requestor`].
pub struct OpsManagerApi<R> {
    requestor: R,
}

impl<R: Requestor> OpsManagerApi<R> {
    pub fn new(requestor: R) -> Self {
        Self { requestor }
    }

    async fn fetch(&self, path: &str, label: &str) -> Result<bytes::Bytes, RequestError> {
        self.requestor
            .curl(Method::GET, path)
            .await?
            .require_ok(label)
    }

    async fn fetch_source(&self, path: &str, label: &str) -> Result<ByteSource, RequestError> {
        let body = self.fetch(path, label).await?;
        Ok(Box::new(Cursor::new(body)))
    }
}

#[async_trait]
impl<R: Requestor> PendingChangesLister for OpsManagerApi<R> {
    async fn list(&self) -> Result<PendingChanges, RequestError> {
        const LABEL: &str = "pending changes";
        let body = self.fetch("/api/v0/staged/pending_changes", LABEL).await?;
        let mut changes: PendingChanges =
            serde_json::from_slice(&body).map_err(|e| RequestError::decode(LABEL, e))?;
        changes
            .change_list
            .retain(|change| change.action != "unchanged");
        Ok(changes)
    }
}

#[async_trait]
impl<R: Requestor> DeployedProductsLister for OpsManagerApi<R> {
    async fn list(&self) -> Result<Vec<DeployedProduct>, RequestError> {
        const LABEL: &str = "deployed products";
        let body = self.fetch("/api/v0/deployed/products", LABEL).await?;
        serde_json::from_slice(&body).map_err(|e| RequestError::decode(LABEL, e))
    }
}

#[async_trait]
impl<R: Requestor> OmService for OpsManagerApi<R> {
    async fn director_properties(&self) -> Result<ByteSource, RequestError> {
        self.fetch_source("/api/v0/staged/director/properties", "director properties")
            .await
    }

    async fn product_resources(&self, guid: &str) -> Result<ByteSource, RequestError> {
        let path = format!("/api/v0/staged/products/{guid}/resources");
        self.fetch_source(&path, &format!("{guid} resources")).await
    }

    async fn vm_types(&self) -> Result<ByteSource, RequestError> {
        self.fetch_source("/api/v0/vm_types", "vm types").await
    }

    async fn diagnostic_report(&self) -> Result<ByteSource, RequestError> {
        self.fetch_source("/api/v0/diagnostic_report", "diagnostic report")
            .await
    }
}

/// Items gathered from Ops Manager plus the foundation they describe.
#[derive(Debug)]
pub struct OpsManagerCollection {
    pub items: Vec<DataItem>,
    pub foundation_id: String,
}

pub struct OpsManagerCollector {
    pending_changes: Arc<dyn PendingChangesLister>,
    deployed_products: Arc<dyn DeployedProductsLister>,
    service: Arc<dyn OmService>,
}

impl OpsManagerCollector {
    pub fn new(
        pending_changes: Arc<dyn PendingChangesLister>,
        deployed_products: Arc<dyn DeployedProductsLister>,
        service: Arc<dyn OmService>,
    ) -> Self {
        Self {
            pending_changes,
            deployed_products,
            service,
        }
    }

    /// Wire all three collaborators to the same API client.
    pub fn from_api<R: Requestor + 'static>(api: OpsManagerApi<R>) -> Self {
        let api = Arc::new(api);
        Self::new(api.clone(), api.clone(), api)
    }

    pub async fn collect(&self) -> Result<OpsManagerCollection, OpsManagerError> {
        let pending = self
            .pending_changes
            .list()
            .await
            .map_err(OpsManagerError::PendingChangesFailed)?;
        if !pending.change_list.is_empty() {
            return Err(OpsManagerError::PendingChangesExists);
        }

        let products = self
            .deployed_products
            .list()
            .await
            .map_err(OpsManagerError::DeployedProductsFailed)?;

        let mut items = Vec::with_capacity(products.len() + 2);
        let mut foundation_id = String::new();

        for product in &products {
            if product.product_type == DIRECTOR_PRODUCT_TYPE {
                let content = self.service.director_properties().await.map_err(|source| {
                    failure(DIRECTOR_PRODUCT_TYPE, PROPERTIES_DATA_TYPE, source)
                })?;
                items.push(DataItem::for_product(
                    DIRECTOR_PRODUCT_TYPE,
                    PROPERTIES_DATA_TYPE,
                    content,
                ));
                foundation_id = product.guid.clone();
            } else {
                let content = self
                    .service
                    .product_resources(&product.guid)
                    .await
                    .map_err(|source| {
                        failure(&product.product_type, RESOURCES_DATA_TYPE, source)
                    })?;
                items.push(DataItem::for_product(
                    product.product_type.as_str(),
                    RESOURCES_DATA_TYPE,
                    content,
                ));
            }
        }

        let vm_types = self
            .service
            .vm_types()
            .await
            .map_err(|source| failure(OPS_MANAGER_PRODUCT, VM_TYPES_DATA_TYPE, source))?;
        items.push(DataItem::for_product(
            OPS_MANAGER_PRODUCT,
            VM_TYPES_DATA_TYPE,
            vm_types,
        ));

        let report = self.service.diagnostic_report().await.map_err(|source| {
            failure(OPS_MANAGER_PRODUCT, DIAGNOSTIC_REPORT_DATA_TYPE, source)
        })?;
        items.push(DataItem::for_product(
            OPS_MANAGER_PRODUCT,
            DIAGNOSTIC_REPORT_DATA_TYPE,
            report,
        ));

        info!(
            products = products.len(),
            items = items.len(),
            foundation_id = %foundation_id,
            "opsmanager_collected"
        );
        Ok(OpsManagerCollection {
            items,
            foundation_id,
        })
    }
}

fn failure(product: &str, data_type: &str, source: RequestError) -> OpsManagerError {
    OpsManagerError::RequestorFailure {
        product: product.to_string(),
        data_type: data_type.to_string(),
        source,
    }
}

#[async_trait]
impl OpsManagerSource for OpsManagerCollector {
    async fn collect(&self) -> Result<OpsManagerCollection, OpsManagerError> {
        OpsManagerCollector::collect(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn deployed_product_ignores_unused_listing_fields() {
        let products: Vec<DeployedProduct> = serde_json::from_str(
            r#"[{"type":"cf","guid":"cf-guid","installation_name":"cf-1","product_version":"4.0.1"}]"#,
        )
        .unwrap();
        assert_eq!(
            products,
            vec![DeployedProduct {
                product_type: "cf".into(),
                guid: "cf-guid".into(),
            }]
        );
    }

    /// Canned responses keyed by path; records every path requested.
    #[derive(Default)]
    struct FakeRequestor {
        responses: HashMap<String, (u16, &'static str)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRequestor {
        fn with(mut self, path: &str, status: u16, body: &'static str) -> Self {
            self.responses.insert(path.to_string(), (status, body));
            self
        }
    }

    #[async_trait]
    impl Requestor for Arc<FakeRequestor> {
        async fn curl(&self, _method: Method, path: &str) -> Result<HttpResponse, RequestError> {
            self.calls.lock().unwrap().push(path.to_string());
            let (status, body) = self
                .responses
                .get(path)
                .copied()
                .unwrap_or((404, "not found"));
            Ok(HttpResponse {
                status: StatusCode::from_u16(status).unwrap(),
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    const PRODUCTS: &str =
        r#"[{"type":"p-bosh","guid":"bosh-guid"},{"type":"cf","guid":"cf-guid"}]"#;

    fn happy_requestor() -> FakeRequestor {
        FakeRequestor::default()
            .with(
                "/api/v0/staged/pending_changes",
                200,
                r#"{"product_changes":[{"guid":"cf-guid","action":"unchanged"}]}"#,
            )
            .with("/api/v0/deployed/products", 200, PRODUCTS)
            .with("/api/v0/staged/director/properties", 200, "a")
            .with("/api/v0/staged/products/cf-guid/resources", 200, "b")
            .with("/api/v0/vm_types", 200, "c")
            .with("/api/v0/diagnostic_report", 200, "d")
    }

    #[tokio::test]
    async fn collects_items_in_product_order() {
        let requestor = Arc::new(happy_requestor());
        let collector = OpsManagerCollector::from_api(OpsManagerApi::new(requestor.clone()));

        let mut collection = collector.collect().await.unwrap();
        assert_eq!(collection.foundation_id, "bosh-guid");

        let names: Vec<_> = collection.items.iter().map(|i| i.name()).collect();
        assert_eq!(
            names,
            vec![
                "p-bosh_properties",
                "cf_resources",
                "ops_manager_vm_types",
                "ops_manager_diagnostic_report",
            ]
        );
        let bodies: Vec<_> = collection
            .items
            .iter_mut()
            .map(|i| i.read_content().unwrap())
            .collect();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[tokio::test]
    async fn pending_changes_block_collection() {
        let requestor = Arc::new(happy_requestor().with(
            "/api/v0/staged/pending_changes",
            200,
            r#"{"product_changes":[{"guid":"cf-guid","action":"update"}]}"#,
        ));
        let collector = OpsManagerCollector::from_api(OpsManagerApi::new(requestor.clone()));

        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, OpsManagerError::PendingChangesExists));
        assert_eq!(
            *requestor.calls.lock().unwrap(),
            vec!["/api/v0/staged/pending_changes".to_string()]
        );
    }

    #[tokio::test]
    async fn pending_changes_failure_is_wrapped() {
        let requestor =
            Arc::new(happy_requestor().with("/api/v0/staged/pending_changes", 500, "boom"));
        let collector = OpsManagerCollector::from_api(OpsManagerApi::new(requestor));
        let err = collector.collect().await.unwrap_err();
        assert!(matches!(
            err,
            OpsManagerError::PendingChangesFailed(RequestError::UnexpectedStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn deployed_products_decode_failure_is_wrapped() {
        let requestor =
            Arc::new(happy_requestor().with("/api/v0/deployed/products", 200, "not json"));
        let collector = OpsManagerCollector::from_api(OpsManagerApi::new(requestor));
        let err = collector.collect().await.unwrap_err();
        assert!(matches!(
            err,
            OpsManagerError::DeployedProductsFailed(RequestError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn resource_failure_names_the_product() {
        let requestor = Arc::new(happy_requestor().with(
            "/api/v0/staged/products/cf-guid/resources",
            503,
            "",
        ));
        let collector = OpsManagerCollector::from_api(OpsManagerApi::new(requestor.clone()));
        let err = collector.collect().await.unwrap_err();
        match err {
            OpsManagerError::RequestorFailure {
                product, data_type, ..
            } => {
                assert_eq!(product, "cf");
                assert_eq!(data_type, "resources");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Strictly sequential: nothing after the failing call is requested.
        assert!(!requestor
            .calls
            .lock()
            .unwrap()
            .iter()
            .any(|p| p == "/api/v0/vm_types"));
    }

    #[tokio::test]
    async fn diagnostic_report_failure_is_reported() {
        let requestor =
            Arc::new(happy_requestor().with("/api/v0/diagnostic_report", 500, ""));
        let collector = OpsManagerCollector::from_api(OpsManagerApi::new(requestor));
        let err = collector.collect().await.unwrap_err();
        assert!(matches!(
            err,
            OpsManagerError::RequestorFailure { ref product, ref data_type, .. }
                if product == "ops_manager" && data_type == "diagnostic_report"
        ));
    }
}
