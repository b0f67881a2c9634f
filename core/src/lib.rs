//! Component Transport Core - data model, configuration and errors
//!
//! Types shared by the transport runtime and the command line. Nothing
//! in this crate performs network or stream I/O.

pub mod config;
pub mod descriptor;
pub mod error;

// Re-export commonly used types
pub use config::{
    decode_spec, CacheConfig, FilterConfig, MatchPolicy, StageConfig, TransportConfig, TransportRequest,
};
pub use descriptor::{
    Access, ComponentDescriptor, OciRegistryAccess, Resource, OCI_IMAGE_TYPE, OCI_REGISTRY_TYPE,
};
pub use error::{Result, TransportError};

/// Component Transport version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
