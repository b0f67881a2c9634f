//! Linear chain of filtered stages.
//!
//! Stages run strictly in order. Between stages the message lives in an
//! anonymous temp file, which lets the pipeline peek at the metadata to
//! evaluate a stage's filter and then hand the whole message to the stage.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use transport_core::config::StageConfig;
use transport_core::error::{Result, TransportError};

use super::factory::ProcessorFactory;
use super::message::{read_message_header, SpooledBlob};
use super::{ProcessContext, ResourceStreamProcessor};
use crate::filters::{AllOf, Filter, FilterFactory};

struct Stage {
    name: String,
    filter: Box<dyn Filter>,
    processor: Arc<dyn ResourceStreamProcessor>,
}

/// Ordered stages, each guarded by a filter.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every stage of `configs` up front.
    ///
    /// Fails on the first unknown filter or stage type, or spec that does
    /// not decode, so a pipeline never starts half-configured.
    pub fn from_config(
        configs: &[StageConfig],
        filters: &FilterFactory,
        processors: &ProcessorFactory,
    ) -> Result<Self> {
        let mut pipeline = Self::new();
        for config in configs {
            let filter = filters.create_all(&config.filters, config.match_policy)?;
            let processor = processors.create(&config.processor_type, &config.spec)?;
            tracing::debug!(
                stage = %config.name,
                processor = %config.processor_type,
                filters = config.filters.len(),
                "Configured stage"
            );
            pipeline.push_stage(config.name.clone(), filter, processor);
        }
        Ok(pipeline)
    }

    /// Append a stage guarded by `filter`.
    pub fn push_stage(
        &mut self,
        name: impl Into<String>,
        filter: Box<dyn Filter>,
        processor: Arc<dyn ResourceStreamProcessor>,
    ) {
        self.stages.push(Stage {
            name: name.into(),
            filter,
            processor,
        });
    }

    /// Append a stage that applies to every resource.
    pub fn with_stage(
        mut self,
        name: impl Into<String>,
        processor: Arc<dyn ResourceStreamProcessor>,
    ) -> Self {
        self.push_stage(name, Box::new(AllOf::default()), processor);
        self
    }

    /// Append a stage guarded by `filter`.
    pub fn with_filtered_stage(
        mut self,
        name: impl Into<String>,
        filter: Box<dyn Filter>,
        processor: Arc<dyn ResourceStreamProcessor>,
    ) -> Self {
        self.push_stage(name, filter, processor);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

#[async_trait]
impl ResourceStreamProcessor for Pipeline {
    async fn process(
        &self,
        ctx: &ProcessContext,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let mut current = SpooledBlob::empty()?;
        tokio::io::copy(input, current.writer()).await?;
        current.finish().await?;

        for stage in &self.stages {
            if ctx.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let (component, resource) = read_message_header(&mut current)
                .await
                .map_err(|e| e.in_stage(&stage.name, "<unreadable>"))?;
            current.rewind().await?;

            if !stage.filter.matches(&component, &resource) {
                tracing::debug!(
                    stage = %stage.name,
                    resource = %resource.identity(),
                    "Stage does not apply, passing message through"
                );
                continue;
            }

            tracing::debug!(stage = %stage.name, resource = %resource.identity(), "Running stage");
            let mut next = SpooledBlob::empty()?;
            stage
                .processor
                .process(&ctx.for_stage(&stage.name), &mut current, next.writer())
                .await
                .map_err(|e| e.in_stage(&stage.name, resource.identity()))?;
            next.finish().await?;

            // A stage must emit exactly one readable message.
            read_message_header(&mut next)
                .await
                .map_err(|e| e.in_stage(&stage.name, resource.identity()))?;
            next.rewind().await?;
            current = next;
        }

        tokio::io::copy(&mut current, output).await?;
        output.flush().await?;
        Ok(())
    }
}
