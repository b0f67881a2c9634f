//! `component-transport inspect` command.

use std::path::PathBuf;

use clap::Args;
use tokio::io::AsyncRead;
use transport_core::error::Result;
use transport_runtime::process::read_message;

use crate::output;

#[derive(Args)]
pub struct InspectArgs {
    /// Processor message file, as written by `run --output-dir`
    pub file: PathBuf,
}

pub async fn execute(args: InspectArgs) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut file = tokio::fs::File::open(&args.file).await?;
    println!("{}", describe(&mut file).await?);
    Ok(())
}

/// Pretty-printed metadata sections plus the blob size.
async fn describe<R>(input: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let (component, resource, mut blob) = read_message(input).await?;
    let blob_bytes = blob.drain().await?;

    Ok(format!(
        "Component:\n{}\n\nResource:\n{}\n\nBlob: {} ({} bytes)",
        serde_json::to_string_pretty(&component)?,
        serde_json::to_string_pretty(&resource)?,
        output::format_bytes(blob_bytes),
        blob_bytes
    ))
}
