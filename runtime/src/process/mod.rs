//! Stream processors
//!
//! A stage reads exactly one processor message from its input, transforms
//! it, and writes exactly one message to its output. Stages never see each
//! other; the [`Pipeline`] chains them and the [`TransportDriver`] runs the
//! pipeline once per resource.

pub mod downloader;
pub mod driver;
pub mod executable;
pub mod factory;
pub mod message;
pub mod pipeline;
pub mod uploader;

pub use downloader::OciImageDownloader;
pub use driver::{ResourceJob, ResourceReport, TransportDriver, TransportReport};
pub use executable::{Executable, ExecutableSpec};
pub use factory::{ProcessorConstructor, ProcessorDeps, ProcessorFactory};
pub use message::{read_message, read_message_header, spool_blob, write_message, SpooledBlob};
pub use pipeline::Pipeline;
pub use uploader::{OciImageUploader, OciImageUploaderSpec};

use std::future::Future;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use transport_core::error::{Result, TransportError};

/// Per-invocation context handed to a stage.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    cancel: CancellationToken,
    stage: String,
}

impl ProcessContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            stage: String::new(),
        }
    }

    /// Same cancellation signal, attributed to `stage`.
    pub fn for_stage(&self, stage: impl Into<String>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            stage: stage.into(),
        }
    }

    /// Name of the stage being run; empty outside a pipeline.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` unless cancellation fires first, in which case `fut` is
    /// dropped and [`TransportError::Cancelled`] returned.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
            result = fut => result,
        }
    }
}

/// A pipeline stage.
#[async_trait]
pub trait ResourceStreamProcessor: Send + Sync {
    /// Consume one message from `input` and emit one message to `output`.
    ///
    /// On error nothing is guaranteed about `output`, except that stages
    /// rejecting a resource outright leave it unwritten.
    async fn process(
        &self,
        ctx: &ProcessContext,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()>;
}
