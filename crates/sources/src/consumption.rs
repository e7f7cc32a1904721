//! Core consumption report.
//!
//! Ops Manager exports core counts as a header-less CSV of
//! `<unix_ts>,<product_id>,<physical_cores>,<virtual_cores>` rows. The
//! collector transcodes it into a JSON array. Older Ops Managers lack the
//! endpoint entirely; the executor tolerates this collector failing.
use std::io::Cursor;
use std::sync::Arc;

use archive::DataItem;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::http::Requestor;
use crate::{CoreConsumptionError, CoreConsumptionSource};

pub const CORE_COUNTS_DATA_TYPE: &str = "core_counts";
pub const CORE_CONSUMPTION_PATH: &str = "/api/v0/download_core_consumption";

/// One CSV row, as emitted in the JSON report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CoreCount {
    /// RFC3339 UTC.
    pub time_reported: String,
    pub product_identifier: String,
    pub physical_core_count: u64,
    pub virtual_core_count: u64,
}

/// Parse the core consumption CSV into rows. Any malformed row fails the
/// whole report.
pub fn parse_core_counts(csv_body: &[u8]) -> Result<Vec<CoreCount>, CoreConsumptionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_body);

    let mut counts = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let row_err = |reason: String| CoreConsumptionError::RowParse { index, reason };
        let record = record.map_err(|e| row_err(e.to_string()))?;
        if record.len() != 4 {
            return Err(row_err(format!("expected 4 fields, found {}", record.len())));
        }

        let seconds = record[0]
            .parse::<i64>()
            .map_err(|e| row_err(format!("invalid timestamp {:?}: {e}", &record[0])))?;
        let time_reported = DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| row_err(format!("timestamp {seconds} out of range")))?;
        let physical_core_count = record[2]
            .parse::<u64>()
            .map_err(|e| row_err(format!("invalid physical core count {:?}: {e}", &record[2])))?;
        let virtual_core_count = record[3]
            .parse::<u64>()
            .map_err(|e| row_err(format!("invalid virtual core count {:?}: {e}", &record[3])))?;

        counts.push(CoreCount {
            time_reported: time_reported.to_rfc3339_opts(SecondsFormat::Secs, true),
            product_identifier: record[1].to_string(),
            physical_core_count,
            virtual_core_count,
        });
    }
    Ok(counts)
}

pub struct CoreConsumptionCollector {
    requestor: Arc<dyn Requestor>,
}

impl CoreConsumptionCollector {
    pub fn new(requestor: Arc<dyn Requestor>) -> Self {
        Self { requestor }
    }

    pub async fn collect(&self) -> Result<Vec<DataItem>, CoreConsumptionError> {
        let response = self
            .requestor
            .curl(Method::GET, CORE_CONSUMPTION_PATH)
            .await
            .map_err(CoreConsumptionError::Request)?;
        if !response.is_ok() {
            return Err(CoreConsumptionError::UnexpectedStatus(
                response.status.as_u16(),
            ));
        }

        let counts = parse_core_counts(&response.body)?;
        let content = serde_json::to_vec(&counts).map_err(CoreConsumptionError::Encode)?;
        info!(rows = counts.len(), "core_consumption_collected");
        Ok(vec![DataItem::bare(
            "",
            CORE_COUNTS_DATA_TYPE,
            Cursor::new(content),
        )])
    }
}

#[async_trait]
impl CoreConsumptionSource for CoreConsumptionCollector {
    async fn collect(&self) -> Result<Vec<DataItem>, CoreConsumptionError> {
        CoreConsumptionCollector::collect(self).await
    }
}
