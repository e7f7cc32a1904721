//! Per data-set metadata sidecar.
//!
//! Each data set directory in the archive ends with a `metadata` entry: the
//! run-wide fields shared by every data set plus one digest record per file
//! written before it. The JSON field names are consumed by an external
//! validator and must not change.
use serde::{Deserialize, Serialize};

use crate::ArchiveError;

/// Name of the manifest entry inside each data-set directory.
pub const METADATA_FILE_NAME: &str = "metadata";

/// Run-wide fields, identical across all manifests of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionInfo {
    pub collector_version: String,
    pub env_type: String,
    pub foundation_nickname: String,
    pub collection_id: String,
    pub foundation_id: String,
    pub collected_at: String,
}

/// Digest record for one archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MimeType")]
    pub mime_type: String,
    /// Base64 of the MD5 over the bytes as written.
    #[serde(rename = "MD5Checksum")]
    pub md5_checksum: String,
    #[serde(rename = "ProductType")]
    pub product_type: String,
    #[serde(rename = "DataType")]
    pub data_type: String,
}

/// Metadata document for one data set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "EnvType")]
    pub env_type: String,
    #[serde(rename = "CollectedAt")]
    pub collected_at: String,
    #[serde(rename = "CollectionId")]
    pub collection_id: String,
    #[serde(rename = "FoundationId")]
    pub foundation_id: String,
    #[serde(rename = "FoundationNickname")]
    pub foundation_nickname: String,
    #[serde(rename = "CollectorVersion")]
    pub collector_version: String,
    #[serde(rename = "FileDigests")]
    pub file_digests: Vec<FileDigest>,
}

impl Manifest {
    pub fn new(info: &CollectionInfo) -> Self {
        Self {
            env_type: info.env_type.clone(),
            collected_at: info.collected_at.clone(),
            collection_id: info.collection_id.clone(),
            foundation_id: info.foundation_id.clone(),
            foundation_nickname: info.foundation_nickname.clone(),
            collector_version: info.collector_version.clone(),
            file_digests: Vec::new(),
        }
    }

    /// Append one digest entry; insertion order is preserved.
    pub fn record(
        &mut self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        product_type: impl Into<String>,
        data_type: impl Into<String>,
        md5_base64: impl Into<String>,
    ) {
        self.file_digests.push(FileDigest {
            name: name.into(),
            mime_type: mime_type.into(),
            md5_checksum: md5_base64.into(),
            product_type: product_type.into(),
            data_type: data_type.into(),
        });
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ArchiveError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn info() -> CollectionInfo {
        CollectionInfo {
            collector_version: "1.2.3".into(),
            env_type: "production".into(),
            foundation_nickname: "east".into(),
            collection_id: "9a7c5a5e-7c39-4b8e-9d65-6e3f0d1f2a11".into(),
            foundation_id: "bosh-guid".into(),
            collected_at: "2023-08-13T18:07:51Z".into(),
        }
    }

    #[test]
    fn serialize_uses_external_field_names() {
        let mut manifest = Manifest::new(&info());
        manifest.record(
            "p-bosh_properties",
            "application/json",
            "p-bosh",
            "properties",
            "DMF1ucDxtqgxw5niaXcmYQ==",
        );

        let value: Value = serde_json::from_slice(&manifest.serialize().unwrap()).unwrap();
        assert_eq!(value["EnvType"], "production");
        assert_eq!(value["CollectedAt"], "2023-08-13T18:07:51Z");
        assert_eq!(value["CollectionId"], "9a7c5a5e-7c39-4b8e-9d65-6e3f0d1f2a11");
        assert_eq!(value["FoundationId"], "bosh-guid");
        assert_eq!(value["FoundationNickname"], "east");
        assert_eq!(value["CollectorVersion"], "1.2.3");

        let digest = &value["FileDigests"][0];
        assert_eq!(digest["Name"], "p-bosh_properties");
        assert_eq!(digest["MimeType"], "application/json");
        assert_eq!(digest["MD5Checksum"], "DMF1ucDxtqgxw5niaXcmYQ==");
        assert_eq!(digest["ProductType"], "p-bosh");
        assert_eq!(digest["DataType"], "properties");
    }

    #[test]
    fn field_order_is_stable() {
        let manifest = Manifest::new(&info());
        let text = String::from_utf8(manifest.serialize().unwrap()).unwrap();
        let env = text.find("\"EnvType\"").unwrap();
        let collected = text.find("\"CollectedAt\"").unwrap();
        let digests = text.find("\"FileDigests\"").unwrap();
        assert!(env < collected && collected < digests);
        assert!(text.ends_with("\"FileDigests\":[]}"));
    }

    #[test]
    fn digests_keep_insertion_order() {
        let mut manifest = Manifest::new(&info());
        for name in ["z", "a", "m"] {
            manifest.record(name, "application/json", "", name, "");
        }
        let names: Vec<_> = manifest
            .file_digests
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}
