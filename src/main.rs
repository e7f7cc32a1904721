//! telemetry-collector - collect one foundation's telemetry into a tar archive.
//!
//! Reads configuration (see [`telemetry_collector::config`]), runs every
//! configured collector, and writes
//! `<output_dir>/FoundationDetails_<unix-seconds>.tar`. A failed run removes
//! its partial archive and exits non-zero.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use sources::http::{build_http_client, parse_url};
use sources::{
    ApiRequestor, CfApiClient, ClientCredentials, CoreConsumptionCollector, CredhubClient,
    CredhubCollector, OAuthClient, OpsManagerApi, OpsManagerCollector, UsageCollector,
};
use telemetry_collector::{CollectExecutor, CollectorConfig, TarAssembler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CollectorConfig::load()?;
    init_tracing(&config);

    let archive_path = archive_path(&config.output_dir, Utc::now().timestamp());
    tracing::info!(
        path = %archive_path.display(),
        env_type = %config.env_type,
        credhub = config.credhub.is_some(),
        usage = config.usage.is_some(),
        core_consumption = config.collect_core_consumption,
        "Starting telemetry collection"
    );

    match run(&config, &archive_path).await {
        Ok(()) => {
            tracing::info!(path = %archive_path.display(), "Collection written");
            Ok(())
        }
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(&archive_path) {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %archive_path.display(),
                        error = %remove_err,
                        "Failed to remove partial archive"
                    );
                }
            }
            Err(err)
        }
    }
}

fn init_tracing(config: &CollectorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn archive_path(output_dir: &Path, unix_seconds: i64) -> PathBuf {
    output_dir.join(format!("FoundationDetails_{unix_seconds}.tar"))
}

async fn run(config: &CollectorConfig, archive_path: &Path) -> anyhow::Result<()> {
    let http = build_http_client(config.insecure_skip_tls_verify, config.request_timeout())
        .context("building HTTP client")?;

    let opsmanager_url = parse_url(&config.opsmanager.url)?;
    let opsmanager_uaa = parse_url(&config.opsmanager.uaa_url())?;
    let opsmanager_credentials = ClientCredentials::new(
        config.opsmanager.client_id.clone(),
        config.opsmanager.client_secret.clone(),
    );
    let opsmanager_oauth =
        OAuthClient::new(http.clone(), &opsmanager_uaa, opsmanager_credentials.clone())?;
    let opsmanager = OpsManagerCollector::from_api(OpsManagerApi::new(ApiRequestor::new(
        opsmanager_url.clone(),
        opsmanager_oauth,
    )));

    let file = File::create(archive_path)
        .with_context(|| format!("creating archive {}", archive_path.display()))?;
    let mut executor = CollectExecutor::new(
        Box::new(opsmanager),
        TarAssembler::new(BufWriter::new(file)),
    )
    .operational_data_only(config.operational_data_only);

    if let Some(credhub) = &config.credhub {
        let oauth = OAuthClient::new(
            http.clone(),
            &parse_url(&credhub.uaa_url)?,
            ClientCredentials::new(credhub.client_id.clone(), credhub.client_secret.clone()),
        )?;
        let client = CredhubClient::new(parse_url(&credhub.url)?, oauth);
        executor = executor.with_credhub(Box::new(CredhubCollector::new(client)));
    }

    if let Some(usage) = &config.usage {
        let cf_api = CfApiClient::new(http.clone(), parse_url(&usage.cf_api_url)?);
        let collector = UsageCollector::new(
            http.clone(),
            usage.usage_service_url.clone(),
            cf_api,
            ClientCredentials::new(usage.client_id.clone(), usage.client_secret.clone()),
        );
        executor = executor.with_usage(Box::new(collector));
    }

    if config.collect_core_consumption {
        let oauth = OAuthClient::new(http.clone(), &opsmanager_uaa, opsmanager_credentials)?;
        let requestor = Arc::new(ApiRequestor::new(opsmanager_url, oauth));
        executor = executor.with_core_consumption(Box::new(CoreConsumptionCollector::new(requestor)));
    }

    executor
        .collect(
            &config.env_type,
            config.collector_version(),
            &config.foundation_nickname,
        )
        .await?;
    Ok(())
}
