//! Archive layer of the telemetry collector.
//!
//! Collected artifacts arrive as [`DataItem`]s, are appended to a single tar
//! stream by [`TarAssembler`], and are accounted for in a per data-set
//! [`Manifest`] whose digests let a downstream validator check every file.
//!
//! ```
//! use archive::{CollectionInfo, DataItem, Manifest, TarAssembler};
//!
//! let mut tar = TarAssembler::new(Vec::new());
//! let mut manifest = Manifest::new(&CollectionInfo::default());
//!
//! let mut item = DataItem::from_bytes("ops_manager", "vm_types", "[]");
//! let bytes = item.read_content().unwrap();
//! tar.add_file(&bytes, &format!("opsmanager/{}", item.name())).unwrap();
//! manifest.record(item.name(), item.mime_type(), item.product_type(), item.data_type(), "digest");
//!
//! tar.add_file(&manifest.serialize().unwrap(), "opsmanager/metadata").unwrap();
//! tar.close().unwrap();
//! ```
mod data_item;
mod error;
mod manifest;
mod tar_assembler;

pub use crate::data_item::{DataItem, JSON_MIME_TYPE};
pub use crate::error::ArchiveError;
pub use crate::manifest::{CollectionInfo, FileDigest, Manifest, METADATA_FILE_NAME};
pub use crate::tar_assembler::{TarAssembler, ENTRY_MODE};
