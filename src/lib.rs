//! One-shot telemetry collection for a foundation.
//!
//! This crate ties the collectors from [`sources`] to the archive writer from
//! [`archive`]: a [`CollectExecutor`] runs every configured collector in a
//! fixed order and writes the results into a single tar archive with one
//! `metadata` manifest per data set.
//!
//! ```no_run
//! use std::fs::File;
//!
//! use telemetry_collector::{CollectExecutor, TarAssembler};
//! # async fn run(opsmanager: Box<dyn telemetry_collector::OpsManagerSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::create("FoundationDetails_1700000000.tar")?;
//! let mut executor = CollectExecutor::new(opsmanager, TarAssembler::new(file));
//! executor.collect("production", "0.1.0", "east").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod executor;

pub use crate::config::{CollectorConfig, ConfigError, CredhubConfig, OpsManagerConfig, UsageConfig};
pub use crate::error::{CollectError, IdGenerationError};
pub use crate::executor::{
    md5_base64, CollectExecutor, IdGenerator, RandomIdGenerator, CORE_CONSUMPTION_DATASET,
    OPSMANAGER_DATASET, USAGE_DATASET,
};

pub use archive::{DataItem, Manifest, TarAssembler, METADATA_FILE_NAME};
pub use sources::{CoreConsumptionSource, CredhubSource, OpsManagerSource, UsageSource};
