//! The uniform description of one collected artifact.
//!
//! Every collector hands its results to the executor as [`DataItem`]s. An item
//! carries the labels that end up in the manifest (`product_type`,
//! `data_type`, mime type) and a one-shot content reader. The archive entry
//! name is derived from the labels and never stored separately.
use std::fmt;
use std::io::{self, Cursor, Read};

use bytes::Bytes;

/// Mime type of every item the collectors produce.
pub const JSON_MIME_TYPE: &str = "application/json";

/// How the archive entry name is derived from the item labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Naming {
    /// `<product>_<data_type>`, used for Ops Manager and Credhub items.
    Qualified,
    /// The bare data type, used for usage and core consumption items.
    Bare,
}

/// One collected artifact: a single-drain content stream plus its labels.
pub struct DataItem {
    product_type: String,
    data_type: String,
    naming: Naming,
    content: Box<dyn Read + Send>,
}

impl DataItem {
    /// Item named `<product>_<data_type>`.
    pub fn for_product(
        product_type: impl Into<String>,
        data_type: impl Into<String>,
        content: impl Read + Send + 'static,
    ) -> Self {
        Self {
            product_type: product_type.into(),
            data_type: data_type.into(),
            naming: Naming::Qualified,
            content: Box::new(content),
        }
    }

    /// Item named after its data type alone.
    pub fn bare(
        product_type: impl Into<String>,
        data_type: impl Into<String>,
        content: impl Read + Send + 'static,
    ) -> Self {
        Self {
            product_type: product_type.into(),
            data_type: data_type.into(),
            naming: Naming::Bare,
            content: Box::new(content),
        }
    }

    /// Convenience for in-memory payloads.
    pub fn from_bytes(
        product_type: impl Into<String>,
        data_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self::for_product(product_type, data_type, Cursor::new(content.into()))
    }

    pub fn name(&self) -> String {
        match self.naming {
            Naming::Qualified => format!("{}_{}", self.product_type, self.data_type),
            Naming::Bare => self.data_type.clone(),
        }
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn mime_type(&self) -> &'static str {
        JSON_MIME_TYPE
    }

    /// Direct access to the content stream.
    pub fn content(&mut self) -> &mut (dyn Read + Send + 'static) {
        self.content.as_mut()
    }

    /// Drain the content stream into memory. The stream is one-shot: a second
    /// call yields whatever was left, normally nothing.
    pub fn read_content(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.content.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataItem")
            .field("name", &self.name())
            .field("product_type", &self.product_type)
            .field("data_type", &self.data_type)
            .finish_non_exhaustive()
    }
}
