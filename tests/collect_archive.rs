//! Full collection runs against in-memory collaborators, read back from the
//! written tar file.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use sources::http::{HttpResponse, Method, StatusCode};
use sources::{
    ByteSource, CoreConsumptionCollector, CredhubError, DeployedProduct, DeployedProductsLister,
    OmService, OpsManagerCollector, PendingChanges, PendingChangesLister, ProductChange,
    RequestError, Requestor, UsageError,
};
use telemetry_collector::{
    CollectError, CollectExecutor, CredhubSource, DataItem, IdGenerationError, IdGenerator,
    TarAssembler, UsageSource, md5_base64,
};
use tempfile::TempDir;
use uuid::Uuid;

struct FakeOm {
    pending: Vec<ProductChange>,
}

fn body(bytes: &'static str) -> ByteSource {
    Box::new(Cursor::new(bytes.as_bytes()))
}

#[async_trait]
impl PendingChangesLister for FakeOm {
    async fn list(&self) -> Result<PendingChanges, RequestError> {
        Ok(PendingChanges {
            change_list: self.pending.clone(),
        })
    }
}

#[async_trait]
impl DeployedProductsLister for FakeOm {
    async fn list(&self) -> Result<Vec<DeployedProduct>, RequestError> {
        Ok(vec![
            DeployedProduct {
                product_type: "p-bosh".into(),
                guid: "bosh-guid".into(),
            },
            DeployedProduct {
                product_type: "cf".into(),
                guid: "cf-guid".into(),
            },
        ])
    }
}

#[async_trait]
impl OmService for FakeOm {
    async fn director_properties(&self) -> Result<ByteSource, RequestError> {
        Ok(body("a"))
    }

    async fn product_resources(&self, guid: &str) -> Result<ByteSource, RequestError> {
        assert_eq!(guid, "cf-guid");
        Ok(body("b"))
    }

    async fn vm_types(&self) -> Result<ByteSource, RequestError> {
        Ok(body("c"))
    }

    async fn diagnostic_report(&self) -> Result<ByteSource, RequestError> {
        Ok(body("d"))
    }
}

fn opsmanager(pending: Vec<ProductChange>) -> Box<OpsManagerCollector> {
    let om = Arc::new(FakeOm { pending });
    Box::new(OpsManagerCollector::new(om.clone(), om.clone(), om))
}

/// Core consumption endpoint with a canned status and CSV body.
struct CannedCore(u16, &'static str);

#[async_trait]
impl Requestor for CannedCore {
    async fn curl(&self, _method: Method, _path: &str) -> Result<HttpResponse, RequestError> {
        Ok(HttpResponse {
            status: StatusCode::from_u16(self.0).unwrap(),
            body: self.1.as_bytes().to_vec().into(),
        })
    }
}

fn core(status: u16, csv: &'static str) -> Box<CoreConsumptionCollector> {
    Box::new(CoreConsumptionCollector::new(Arc::new(CannedCore(status, csv))))
}

struct FakeCredhub;

#[async_trait]
impl CredhubSource for FakeCredhub {
    async fn collect(&self) -> Result<DataItem, CredhubError> {
        let content = json!({"credhub_certificates": [{
            "name": "c1",
            "not_before": "2023-01-01T00:00:00Z",
            "not_after": "2024-01-01T00:00:00Z",
            "issuer": "CN=c1",
        }]});
        Ok(DataItem::from_bytes("p-bosh", "certificates", content.to_string()))
    }
}

struct FakeUsage;

#[async_trait]
impl UsageSource for FakeUsage {
    async fn collect(&self) -> Result<Vec<DataItem>, UsageError> {
        Ok(vec![
            DataItem::bare("", "app_usage", Cursor::new(b"app".to_vec())),
            DataItem::bare("", "service_usage", Cursor::new(b"svc".to_vec())),
            DataItem::bare("", "task_usage", Cursor::new(b"task".to_vec())),
        ])
    }
}

struct FixedId(Uuid);

impl IdGenerator for FixedId {
    fn generate(&self) -> Result<Uuid, IdGenerationError> {
        Ok(self.0)
    }
}

struct Archive {
    _dir: TempDir,
    path: std::path::PathBuf,
}

impl Archive {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FoundationDetails_1700000000.tar");
        Self { _dir: dir, path }
    }

    fn assembler(&self) -> TarAssembler<File> {
        TarAssembler::new(File::create(&self.path).unwrap())
    }

    /// `(path, bytes, mode)` of every entry, in archive order.
    fn entries(&self) -> Vec<(String, Vec<u8>, u32)> {
        read_entries(&self.path)
    }

    fn names(&self) -> Vec<String> {
        self.entries().into_iter().map(|(name, _, _)| name).collect()
    }

    fn json(&self, name: &str) -> Value {
        let (_, bytes, _) = self
            .entries()
            .into_iter()
            .find(|(n, _, _)| n == name)
            .unwrap_or_else(|| panic!("{name} missing from archive"));
        serde_json::from_slice(&bytes).unwrap()
    }
}

fn read_entries(path: &Path) -> Vec<(String, Vec<u8>, u32)> {
    let mut archive = tar::Archive::new(File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mode = entry.header().mode().unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            (name, bytes, mode)
        })
        .collect()
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn opsmanager_only_run_writes_items_then_manifest() {
    let archive = Archive::new();
    let mut executor = CollectExecutor::new(opsmanager(vec![]), archive.assembler());
    executor
        .collect("production", "1.2.3", "east")
        .await
        .unwrap();
    assert!(executor.into_tar().is_closed());

    assert_eq!(
        archive.names(),
        vec![
            "opsmanager/p-bosh_properties",
            "opsmanager/cf_resources",
            "opsmanager/ops_manager_vm_types",
            "opsmanager/ops_manager_diagnostic_report",
            "opsmanager/metadata",
        ]
    );
    assert!(archive.entries().iter().all(|(_, _, mode)| *mode == 0o644));

    let manifest = archive.json("opsmanager/metadata");
    assert_eq!(manifest["FoundationId"], "bosh-guid");
    assert_eq!(manifest["EnvType"], "production");
    assert_eq!(manifest["CollectorVersion"], "1.2.3");
    assert_eq!(manifest["FoundationNickname"], "east");
    assert_eq!(
        manifest["FileDigests"],
        json!([
            {"Name": "p-bosh_properties", "MimeType": "application/json", "MD5Checksum": md5_base64(b"a"), "ProductType": "p-bosh", "DataType": "properties"},
            {"Name": "cf_resources", "MimeType": "application/json", "MD5Checksum": md5_base64(b"b"), "ProductType": "cf", "DataType": "resources"},
            {"Name": "ops_manager_vm_types", "MimeType": "application/json", "MD5Checksum": md5_base64(b"c"), "ProductType": "ops_manager", "DataType": "vm_types"},
            {"Name": "ops_manager_diagnostic_report", "MimeType": "application/json", "MD5Checksum": md5_base64(b"d"), "ProductType": "ops_manager", "DataType": "diagnostic_report"},
        ])
    );
}

#[tokio::test]
async fn pending_changes_abort_with_empty_closed_archive() {
    let archive = Archive::new();
    let mut executor = CollectExecutor::new(
        opsmanager(vec![ProductChange {
            guid: "cf-guid".into(),
            action: "update".into(),
        }]),
        archive.assembler(),
    )
    .with_usage(Box::new(FakeUsage));

    let err = executor
        .collect("production", "1.2.3", "east")
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::OpsManagerCollectFailure(_)));
    assert!(err.to_string().contains("pending changes"));
    assert!(executor.into_tar().is_closed());
    assert!(archive.names().is_empty());
}

#[tokio::test]
async fn full_run_orders_datasets_and_shares_run_fields() {
    let archive = Archive::new();
    let id = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
    let mut executor = CollectExecutor::new(opsmanager(vec![]), archive.assembler())
        .with_credhub(Box::new(FakeCredhub))
        .with_usage(Box::new(FakeUsage))
        .with_core_consumption(core(200, "1691950071,TAS,1,2\n1691953671,TAS,3,4\n"))
        .with_id_generator(Box::new(FixedId(id)));
    executor.collect("qa", "1.2.3", "west").await.unwrap();

    assert_eq!(
        archive.names(),
        vec![
            "opsmanager/p-bosh_properties",
            "opsmanager/cf_resources",
            "opsmanager/ops_manager_vm_types",
            "opsmanager/ops_manager_diagnostic_report",
            "opsmanager/p-bosh_certificates",
            "opsmanager/metadata",
            "usage_service/app_usage",
            "usage_service/service_usage",
            "usage_service/task_usage",
            "usage_service/metadata",
            "core_consumption/core_counts",
            "core_consumption/metadata",
        ]
    );

    let manifests: Vec<Value> = ["opsmanager", "usage_service", "core_consumption"]
        .iter()
        .map(|set| archive.json(&format!("{set}/metadata")))
        .collect();
    for manifest in &manifests {
        assert_eq!(manifest["CollectionId"], id.to_string());
        assert_eq!(manifest["CollectedAt"], manifests[0]["CollectedAt"]);
        assert_eq!(manifest["FoundationId"], "bosh-guid");
        assert_eq!(manifest["EnvType"], "qa");
    }
    assert!(
        chrono::DateTime::parse_from_rfc3339(manifests[0]["CollectedAt"].as_str().unwrap())
            .is_ok()
    );

    let usage_names: Vec<&str> = manifests[1]["FileDigests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["Name"].as_str().unwrap())
        .collect();
    assert_eq!(usage_names, vec!["app_usage", "service_usage", "task_usage"]);
    assert_eq!(manifests[1]["FileDigests"][0]["ProductType"], "");

    assert_eq!(
        archive.json("core_consumption/core_counts"),
        json!([
            {"TimeReported": "2023-08-13T18:07:51Z", "ProductIdentifier": "TAS", "PhysicalCoreCount": 1, "VirtualCoreCount": 2},
            {"TimeReported": "2023-08-13T19:07:51Z", "ProductIdentifier": "TAS", "PhysicalCoreCount": 3, "VirtualCoreCount": 4},
        ])
    );
    assert_eq!(
        archive.json("opsmanager/p-bosh_certificates")["credhub_certificates"][0]["name"],
        "c1"
    );
}

#[tokio::test]
async fn every_digest_matches_its_entry_and_no_stray_files() {
    let archive = Archive::new();
    let mut executor = CollectExecutor::new(opsmanager(vec![]), archive.assembler())
        .with_credhub(Box::new(FakeCredhub))
        .with_usage(Box::new(FakeUsage))
        .with_core_consumption(core(200, "1691950071,TAS,1,2\n"));
    executor.collect("development", "1.2.3", "lab").await.unwrap();

    let entries = archive.entries();
    let mut listed = HashSet::new();
    for (path, bytes, _) in &entries {
        let Some((set, name)) = path.split_once('/') else {
            panic!("entry outside a data set: {path}");
        };
        if name == "metadata" {
            continue;
        }
        let manifest = archive.json(&format!("{set}/metadata"));
        let digest = manifest["FileDigests"]
            .as_array()
            .unwrap()
            .iter()
            .find(|d| d["Name"] == name)
            .unwrap_or_else(|| panic!("{path} not listed in its manifest"));
        assert_eq!(digest["MD5Checksum"], md5_base64(bytes));
        listed.insert(path.clone());
    }
    let data_entries = entries.iter().filter(|(p, _, _)| !p.ends_with("/metadata")).count();
    assert_eq!(listed.len(), data_entries);
}

#[tokio::test]
async fn operational_data_only_withholds_only_the_opsmanager_manifest() {
    let archive = Archive::new();
    let mut executor = CollectExecutor::new(opsmanager(vec![]), archive.assembler())
        .with_usage(Box::new(FakeUsage))
        .with_core_consumption(core(200, "1691950071,TAS,1,2\n"))
        .operational_data_only(true);
    executor.collect("production", "1.2.3", "east").await.unwrap();

    let names = archive.names();
    assert!(!names.contains(&"opsmanager/metadata".to_string()));
    assert!(names.contains(&"opsmanager/p-bosh_properties".to_string()));
    assert!(names.contains(&"usage_service/metadata".to_string()));
    assert!(names.contains(&"core_consumption/metadata".to_string()));
}

#[tokio::test]
async fn core_failure_is_logged_and_tolerated() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let archive = Archive::new();
    let mut executor = CollectExecutor::new(opsmanager(vec![]), archive.assembler())
        .with_usage(Box::new(FakeUsage))
        .with_core_consumption(core(500, ""));
    executor.collect("production", "1.2.3", "east").await.unwrap();

    assert!(
        archive
            .names()
            .iter()
            .all(|name| !name.starts_with("core_consumption/"))
    );
    assert!(archive.names().contains(&"usage_service/metadata".to_string()));

    let output = logs.contents();
    assert!(output.contains("WARN"));
    assert!(output.contains("Failed collecting from Core Counting API"));
    assert!(output.contains("500"));
}
