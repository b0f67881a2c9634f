//! Processor registry
//!
//! Maps stage type tags to constructors. Constructors receive the stage
//! spec and the shared collaborators (registry client, blob cache).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use transport_core::config::decode_spec;
use transport_core::error::{Result, TransportError};

use super::downloader::OciImageDownloader;
use super::executable::{Executable, ExecutableSpec};
use super::uploader::{OciImageUploader, OciImageUploaderSpec};
use super::ResourceStreamProcessor;
use crate::cache::BlobCache;
use crate::oci::registry::RegistryClient;

pub const OCI_IMAGE_UPLOADER: &str = "OciImageUploader";
pub const OCI_IMAGE_DOWNLOADER: &str = "OciImageDownloader";
pub const EXECUTABLE: &str = "Executable";

/// Collaborators shared by every stage of a pipeline.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub registry: Arc<dyn RegistryClient>,
    pub cache: Arc<dyn BlobCache>,
}

impl ProcessorDeps {
    pub fn new(registry: Arc<dyn RegistryClient>, cache: Arc<dyn BlobCache>) -> Self {
        Self { registry, cache }
    }
}

/// Builds a stage from its spec.
pub type ProcessorConstructor = Arc<
    dyn Fn(&Value, &ProcessorDeps) -> Result<Arc<dyn ResourceStreamProcessor>> + Send + Sync,
>;

/// Registry of stage constructors keyed by type tag.
#[derive(Clone)]
pub struct ProcessorFactory {
    constructors: HashMap<String, ProcessorConstructor>,
    deps: ProcessorDeps,
}

impl ProcessorFactory {
    /// Registry with the built-in stage types.
    pub fn new(deps: ProcessorDeps) -> Self {
        let mut factory = Self::empty(deps);
        factory.register(OCI_IMAGE_UPLOADER, |spec, deps| {
            let spec: OciImageUploaderSpec = decode_spec(OCI_IMAGE_UPLOADER, spec)?;
            Ok(Arc::new(OciImageUploader::new(
                spec,
                Arc::clone(&deps.registry),
                Arc::clone(&deps.cache),
            )))
        });
        factory.register(OCI_IMAGE_DOWNLOADER, |_spec, deps| {
            Ok(Arc::new(OciImageDownloader::new(
                Arc::clone(&deps.registry),
                Arc::clone(&deps.cache),
            )))
        });
        factory.register(EXECUTABLE, |spec, _deps| {
            let spec: ExecutableSpec = decode_spec(EXECUTABLE, spec)?;
            Ok(Arc::new(Executable::new(spec)))
        });
        factory
    }

    /// Registry without any stage types.
    pub fn empty(deps: ProcessorDeps) -> Self {
        Self {
            constructors: HashMap::new(),
            deps,
        }
    }

    /// Register a constructor for `tag`, replacing any existing one.
    pub fn register<F>(&mut self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(&Value, &ProcessorDeps) -> Result<Arc<dyn ResourceStreamProcessor>>
            + Send
            + Sync
            + 'static,
    {
        let tag = tag.into();
        tracing::debug!(tag = %tag, "Registering processor type");
        self.constructors.insert(tag, Arc::new(constructor));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.constructors.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn deps(&self) -> &ProcessorDeps {
        &self.deps
    }

    /// Build the stage registered under `tag` from `spec`.
    pub fn create(&self, tag: &str, spec: &Value) -> Result<Arc<dyn ResourceStreamProcessor>> {
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| TransportError::UnknownProcessorType(tag.to_string()))?;
        constructor(spec, &self.deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBlobCache;
    use crate::oci::artifact::OciArtifact;
    use crate::oci::reference::ImageReference;
    use async_trait::async_trait;
    use serde_json::json;

    struct NoRegistry;

    #[async_trait]
    impl RegistryClient for NoRegistry {
        async fn pull_artifact(
            &self,
            reference: &ImageReference,
            _cache: &dyn BlobCache,
        ) -> Result<OciArtifact> {
            Err(TransportError::RegistryError {
                registry: reference.registry.clone(),
                message: "offline".to_string(),
            })
        }

        async fn push_artifact(
            &self,
            reference: &ImageReference,
            _artifact: &OciArtifact,
            _cache: &dyn BlobCache,
        ) -> Result<()> {
            Err(TransportError::RegistryError {
                registry: reference.registry.clone(),
                message: "offline".to_string(),
            })
        }
    }

    fn deps() -> ProcessorDeps {
        ProcessorDeps::new(Arc::new(NoRegistry), Arc::new(InMemoryBlobCache::new()))
    }

    #[test]
    fn test_builtin_tags() {
        assert_eq!(
            ProcessorFactory::new(deps()).tags(),
            vec![EXECUTABLE, OCI_IMAGE_DOWNLOADER, OCI_IMAGE_UPLOADER]
        );
    }

    #[test]
    fn test_create_uploader() {
        let factory = ProcessorFactory::new(deps());
        assert!(factory
            .create(
                OCI_IMAGE_UPLOADER,
                &json!({"baseUrl": "dst.registry", "keepSourceRepo": true})
            )
            .is_ok());
    }

    #[test]
    fn test_uploader_requires_base_url() {
        let err = ProcessorFactory::new(deps())
            .create(OCI_IMAGE_UPLOADER, &json!({"keepSourceRepo": true}))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::ConfigDeserialization { ref kind, .. } if kind == OCI_IMAGE_UPLOADER));
    }

    #[test]
    fn test_unknown_processor_type() {
        let err = ProcessorFactory::new(deps())
            .create("Signer", &Value::Null)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::UnknownProcessorType(_)));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_empty_registry() {
        let factory = ProcessorFactory::empty(deps());
        assert!(!factory.contains(OCI_IMAGE_DOWNLOADER));
        assert!(factory.create(OCI_IMAGE_DOWNLOADER, &Value::Null).is_err());
    }
}
