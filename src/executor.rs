//! Collection run orchestration.
//!
//! [`CollectExecutor`] drives the collectors strictly in order (Ops Manager,
//! Credhub, usage service, core consumption), writes every item under its
//! data-set directory, and follows each directory's items with a `metadata`
//! manifest. The archive is closed on every exit path.
use std::io::Write;

use archive::{CollectionInfo, DataItem, Manifest, TarAssembler, METADATA_FILE_NAME};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use sources::{CoreConsumptionSource, CredhubSource, OpsManagerSource, UsageSource};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CollectError, IdGenerationError};

pub const OPSMANAGER_DATASET: &str = "opsmanager";
pub const USAGE_DATASET: &str = "usage_service";
pub const CORE_CONSUMPTION_DATASET: &str = "core_consumption";

/// Source of collection ids.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Result<Uuid, IdGenerationError>;
}

/// Random (version 4) collection ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> Result<Uuid, IdGenerationError> {
        Ok(Uuid::new_v4())
    }
}

/// Run-level labels copied into every manifest.
struct RunLabels<'a> {
    env_type: &'a str,
    collector_version: &'a str,
    foundation_nickname: &'a str,
}

pub struct CollectExecutor<W: Write> {
    opsmanager: Box<dyn OpsManagerSource>,
    credhub: Option<Box<dyn CredhubSource>>,
    usage: Option<Box<dyn UsageSource>>,
    core_consumption: Option<Box<dyn CoreConsumptionSource>>,
    tar: TarAssembler<W>,
    ids: Box<dyn IdGenerator>,
    operational_data_only: bool,
}

impl<W: Write> CollectExecutor<W> {
    /// Executor with only the mandatory Ops Manager collector.
    pub fn new(opsmanager: Box<dyn OpsManagerSource>, tar: TarAssembler<W>) -> Self {
        Self {
            opsmanager,
            credhub: None,
            usage: None,
            core_consumption: None,
            tar,
            ids: Box::new(RandomIdGenerator),
            operational_data_only: false,
        }
    }

    pub fn with_credhub(mut self, credhub: Box<dyn CredhubSource>) -> Self {
        self.credhub = Some(credhub);
        self
    }

    pub fn with_usage(mut self, usage: Box<dyn UsageSource>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_core_consumption(mut self, core: Box<dyn CoreConsumptionSource>) -> Self {
        self.core_consumption = Some(core);
        self
    }

    pub fn with_id_generator(mut self, ids: Box<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Withhold the Ops Manager manifest; the data entries are still written.
    pub fn operational_data_only(mut self, enabled: bool) -> Self {
        self.operational_data_only = enabled;
        self
    }

    /// Hand back the (closed) archive.
    pub fn into_tar(self) -> TarAssembler<W> {
        self.tar
    }

    /// Run one collection into the archive, then close it.
    pub async fn collect(
        &mut self,
        env_type: &str,
        collector_version: &str,
        foundation_nickname: &str,
    ) -> Result<(), CollectError> {
        let labels = RunLabels {
            env_type,
            collector_version,
            foundation_nickname,
        };
        let outcome = self.run(&labels).await;
        let closed = self.tar.close();

        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                info!("collection_complete");
                Ok(())
            }
            (Ok(()), Err(err)) => Err(CollectError::ArchiveCloseFailure(err)),
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "archive_close_failed");
                }
                Err(err)
            }
        }
    }

    async fn run(&mut self, labels: &RunLabels<'_>) -> Result<(), CollectError> {
        let collection_id = self
            .ids
            .generate()
            .map_err(CollectError::UuidGeneration)?;
        let collected_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        info!(
            collection_id = %collection_id,
            env_type = %labels.env_type,
            foundation_nickname = %labels.foundation_nickname,
            "collection_started"
        );

        let opsmanager = self.opsmanager.collect().await?;

        let info = CollectionInfo {
            collector_version: labels.collector_version.to_string(),
            env_type: labels.env_type.to_string(),
            foundation_nickname: labels.foundation_nickname.to_string(),
            collection_id: collection_id.to_string(),
            foundation_id: opsmanager.foundation_id,
            collected_at,
        };
        let mut om_manifest = Manifest::new(&info);
        let mut usage_manifest = Manifest::new(&info);
        let mut core_manifest = Manifest::new(&info);

        for item in opsmanager.items {
            add_item_to_archive(&mut self.tar, item, &mut om_manifest, OPSMANAGER_DATASET)?;
        }

        if let Some(credhub) = &self.credhub {
            let item = credhub.collect().await?;
            add_item_to_archive(&mut self.tar, item, &mut om_manifest, OPSMANAGER_DATASET)?;
        }

        if !self.operational_data_only {
            add_manifest_to_archive(&mut self.tar, &om_manifest, OPSMANAGER_DATASET)?;
        }
        info!(
            files = om_manifest.file_digests.len(),
            manifest = !self.operational_data_only,
            "opsmanager_dataset_written"
        );

        if let Some(usage) = &self.usage {
            let items = usage.collect().await?;
            for item in items {
                add_item_to_archive(&mut self.tar, item, &mut usage_manifest, USAGE_DATASET)?;
            }
            add_manifest_to_archive(&mut self.tar, &usage_manifest, USAGE_DATASET)?;
            info!(
                files = usage_manifest.file_digests.len(),
                "usage_dataset_written"
            );
        }

        if let Some(core) = &self.core_consumption {
            match core.collect().await {
                Ok(items) => {
                    for item in items {
                        add_item_to_archive(
                            &mut self.tar,
                            item,
                            &mut core_manifest,
                            CORE_CONSUMPTION_DATASET,
                        )?;
                    }
                    add_manifest_to_archive(&mut self.tar, &core_manifest, CORE_CONSUMPTION_DATASET)?;
                    info!(
                        files = core_manifest.file_digests.len(),
                        "core_consumption_dataset_written"
                    );
                }
                Err(err) => {
                    warn!(error = %err, "Failed collecting from Core Counting API");
                }
            }
        }

        Ok(())
    }
}

/// Base64 of the MD5 digest of `bytes`.
pub fn md5_base64(bytes: &[u8]) -> String {
    STANDARD.encode(md5::compute(bytes).0)
}

fn add_item_to_archive<W: Write>(
    tar: &mut TarAssembler<W>,
    mut item: DataItem,
    manifest: &mut Manifest,
    prefix: &str,
) -> Result<(), CollectError> {
    let name = item.name();
    let bytes = item
        .read_content()
        .map_err(|source| CollectError::ContentReadingFailure {
            name: name.clone(),
            source,
        })?;

    let path = format!("{prefix}/{name}");
    tar.add_file(&bytes, &path)
        .map_err(|source| CollectError::DataWriteFailure {
            path: path.clone(),
            source,
        })?;

    let digest = md5_base64(&bytes);
    debug!(path = %path, md5 = %digest, "item_archived");
    manifest.record(
        name,
        item.mime_type(),
        item.product_type(),
        item.data_type(),
        digest,
    );
    Ok(())
}

fn add_manifest_to_archive<W: Write>(
    tar: &mut TarAssembler<W>,
    manifest: &Manifest,
    prefix: &str,
) -> Result<(), CollectError> {
    let path = format!("{prefix}/{METADATA_FILE_NAME}");
    manifest
        .serialize()
        .and_then(|bytes| tar.add_file(&bytes, &path))
        .map_err(|source| CollectError::DataWriteFailure { path, source })
}
