//! Conversion between structured artifacts and blob byte streams.

pub mod oci_artifact;

pub use oci_artifact::{deserialize_artifact, serialize_artifact, write_artifact, ARTIFACT_MEDIA_TYPE};
