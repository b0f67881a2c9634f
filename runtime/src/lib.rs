//! Component Transport Runtime - stream processing pipeline.
//!
//! This crate implements the resource transport pipeline, including the
//! processor message framing, the OCI artifact codec, content caches,
//! resource filters, and the built-in stages.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod filters;
pub mod frame;
pub mod oci;
pub mod process;
pub mod serialize;

// Re-export common types
pub use cache::{BlobCache, DiskBlobCache, InMemoryBlobCache};
pub use filters::{Filter, FilterFactory};
pub use oci::{ImageReference, OciArtifact, OciDistributionClient, RegistryClient};
pub use process::{
    Pipeline, ProcessContext, ProcessorDeps, ProcessorFactory, ResourceJob, ResourceStreamProcessor,
    TransportDriver, TransportReport,
};
pub use serialize::{deserialize_artifact, serialize_artifact};

/// Component Transport Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
