//! OCI artifact support.
//!
//! - `reference`: image reference parsing and target rewriting
//! - `artifact`: manifest and descriptor types
//! - `registry`: push/pull client

pub mod artifact;
pub mod reference;
pub mod registry;

pub use artifact::{sha256_digest, Descriptor, ImageManifest, OciArtifact};
pub use reference::{target_reference, ImageReference};
pub use registry::{OciDistributionClient, RegistryClient};
