//! `component-transport run` command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use comfy_table::Table;
use tokio_util::sync::CancellationToken;
use transport_core::config::{TransportConfig, TransportRequest};
use transport_core::descriptor::{OciRegistryAccess, Resource, OCI_REGISTRY_TYPE};
use transport_runtime::process::{ProcessContext, ResourceJob, TransportDriver, TransportReport};
use transport_runtime::{
    DiskBlobCache, FilterFactory, OciDistributionClient, Pipeline, ProcessorDeps, ProcessorFactory,
};

use crate::output;

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline configuration (YAML, or JSON with a .json extension)
    #[arg(long)]
    pub config: PathBuf,

    /// Component and resources to transport
    #[arg(long)]
    pub component: PathBuf,

    /// Directory receiving the final message of every resource
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Override the configured parallelism
    #[arg(long)]
    pub parallelism: Option<usize>,
}

pub async fn execute(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = TransportConfig::load(&args.config)?;
    let request = TransportRequest::load(&args.component)?;

    let cache = Arc::new(DiskBlobCache::new(&super::cache_dir(config.cache.dir.clone()))?);
    let deps = ProcessorDeps::new(Arc::new(OciDistributionClient::new()), cache.clone());
    let pipeline = Pipeline::from_config(
        &config.stages,
        &FilterFactory::new(),
        &ProcessorFactory::new(deps),
    )?;

    let parallelism = args.parallelism.unwrap_or(config.parallelism);
    let mut driver = TransportDriver::new(Arc::new(pipeline), parallelism);
    if let Some(dir) = args.output_dir {
        driver = driver.with_output_dir(dir);
    }

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight transfers");
            interrupt.cancel();
        }
    });

    let report = driver
        .run(&ProcessContext::new(token), ResourceJob::from_request(&request))
        .await;
    println!("{}", report_table(&report));

    if let Some(max_bytes) = config.cache.max_size_bytes {
        let evicted = cache.prune(max_bytes).await?;
        if evicted > 0 {
            tracing::info!(evicted, max_bytes, "Pruned blob cache");
        }
    }

    if !report.is_success() {
        return Err(format!(
            "{} of {} resources failed",
            report.failed(),
            report.resources.len()
        )
        .into());
    }
    Ok(())
}

/// Where a transported resource can now be found.
fn location(resource: &Resource) -> String {
    if resource.access.access_type == OCI_REGISTRY_TYPE {
        if let Ok(access) = resource.access.decode::<OciRegistryAccess>() {
            return access.image_reference;
        }
    }
    resource.access.access_type.clone()
}

fn report_table(report: &TransportReport) -> Table {
    let mut table = output::new_table(&["COMPONENT", "RESOURCE", "STATUS", "DETAIL"]);
    for entry in &report.resources {
        let (status, detail) = match &entry.result {
            Ok(resource) => ("ok".to_string(), location(resource)),
            Err(e) => ("failed".to_string(), e.to_string()),
        };
        table.add_row(vec![entry.component.clone(), entry.resource.clone(), status, detail]);
    }
    table
}
