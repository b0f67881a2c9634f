//! End-to-end pipeline tests against an in-memory registry.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use transport_core::config::TransportConfig;
use transport_core::descriptor::{
    Access, ComponentDescriptor, OciRegistryAccess, Resource, OCI_IMAGE_TYPE,
};
use transport_core::error::{Result, TransportError};
use transport_runtime::cache::{BlobCache, InMemoryBlobCache};
use transport_runtime::filters::FilterFactory;
use transport_runtime::oci::artifact::{Descriptor, ImageManifest, OciArtifact};
use transport_runtime::oci::reference::ImageReference;
use transport_runtime::oci::registry::RegistryClient;
use transport_runtime::process::message::{read_message, write_message};
use transport_runtime::process::{
    OciImageUploader, OciImageUploaderSpec, Pipeline, ProcessContext, ProcessorDeps,
    ProcessorFactory, ResourceJob, ResourceStreamProcessor, TransportDriver,
};
use transport_runtime::serialize::{deserialize_artifact, serialize_artifact};

const CONFIG: &[u8] = br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers"}}"#;
const LAYERS: [&[u8]; 2] = [b"base layer tarball", b"application layer tarball"];

/// Registry keeping manifests by reference and blobs by digest.
#[derive(Default)]
struct FakeRegistry {
    manifests: Mutex<HashMap<String, ImageManifest>>,
    blobs: InMemoryBlobCache,
    pushes: AtomicUsize,
}

impl FakeRegistry {
    fn seed(&self, reference: &str) -> OciArtifact {
        let artifact = sample_artifact(&self.blobs);
        self.manifests
            .lock()
            .unwrap()
            .insert(reference.to_string(), artifact.manifest().clone());
        artifact
    }

    fn manifest(&self, reference: &str) -> Option<ImageManifest> {
        self.manifests.lock().unwrap().get(reference).cloned()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn pull_artifact(
        &self,
        reference: &ImageReference,
        cache: &dyn BlobCache,
    ) -> Result<OciArtifact> {
        let manifest = self
            .manifest(&reference.to_string())
            .ok_or_else(|| TransportError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("manifest unknown: {}", reference),
            })?;
        for descriptor in manifest.blobs() {
            if cache.contains(&descriptor.digest).await? {
                continue;
            }
            let mut content = self
                .blobs
                .get(&descriptor.digest)
                .await?
                .ok_or_else(|| TransportError::RegistryError {
                    registry: reference.registry.clone(),
                    message: format!("blob unknown: {}", descriptor.digest),
                })?;
            cache.put(&descriptor.digest, &mut content).await?;
        }
        Ok(OciArtifact::new(manifest))
    }

    async fn push_artifact(
        &self,
        reference: &ImageReference,
        artifact: &OciArtifact,
        cache: &dyn BlobCache,
    ) -> Result<()> {
        for descriptor in artifact.manifest().blobs() {
            if self.blobs.contains(&descriptor.digest).await? {
                continue;
            }
            let mut content = cache.get(&descriptor.digest).await?.ok_or_else(|| {
                TransportError::CacheRead(format!("blob {} is not cached", descriptor.digest))
            })?;
            self.blobs.put(&descriptor.digest, &mut content).await?;
        }
        self.manifests
            .lock()
            .unwrap()
            .insert(reference.to_string(), artifact.manifest().clone());
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry whose pushes never complete.
struct StalledRegistry;

#[async_trait]
impl RegistryClient for StalledRegistry {
    async fn pull_artifact(
        &self,
        _reference: &ImageReference,
        _cache: &dyn BlobCache,
    ) -> Result<OciArtifact> {
        std::future::pending().await
    }

    async fn push_artifact(
        &self,
        _reference: &ImageReference,
        _artifact: &OciArtifact,
        _cache: &dyn BlobCache,
    ) -> Result<()> {
        std::future::pending().await
    }
}

fn sample_artifact(cache: &InMemoryBlobCache) -> OciArtifact {
    cache.insert(transport_runtime::oci::sha256_digest(CONFIG), CONFIG.to_vec());
    let layers = LAYERS
        .iter()
        .map(|data| {
            cache.insert(transport_runtime::oci::sha256_digest(data), data.to_vec());
            Descriptor::for_content("application/vnd.oci.image.layer.v1.tar+gzip", data)
        })
        .collect();
    OciArtifact::new(ImageManifest::new(
        Descriptor::for_content("application/vnd.oci.image.config.v1+json", CONFIG),
        layers,
    ))
}

fn component() -> ComponentDescriptor {
    ComponentDescriptor::new("github.com/acme/app", "v1.0.0")
}

fn image(name: &str, reference: &str) -> Resource {
    Resource::new(name, "v1", OCI_IMAGE_TYPE, Access::oci_registry(reference))
}

async fn image_message(resource: &Resource) -> Vec<u8> {
    let source_cache = InMemoryBlobCache::new();
    let artifact = sample_artifact(&source_cache);
    let blob = serialize_artifact(&artifact, &source_cache).await.unwrap();
    let mut out = Vec::new();
    write_message(&mut out, &component(), resource, blob)
        .await
        .unwrap();
    out
}

fn image_reference_of(resource: &Resource) -> String {
    resource
        .access
        .decode::<OciRegistryAccess>()
        .unwrap()
        .image_reference
}

fn uploader(
    registry: Arc<dyn RegistryClient>,
    base_url: &str,
    keep_source_repo: bool,
) -> OciImageUploader {
    OciImageUploader::new(
        OciImageUploaderSpec {
            base_url: base_url.to_string(),
            keep_source_repo,
        },
        registry,
        Arc::new(InMemoryBlobCache::new()),
    )
}

#[tokio::test]
async fn test_upload_rewrites_location_and_pushes() {
    let registry = Arc::new(FakeRegistry::default());
    let stage = uploader(registry.clone(), "dst.registry", true);
    let input = image_message(&image("app", "src.registry/acme/app:v1")).await;

    let mut output = Vec::new();
    stage
        .process(&ProcessContext::default(), &mut Cursor::new(input), &mut output)
        .await
        .unwrap();

    let mut cursor = Cursor::new(output);
    let (cd, resource, mut blob) = read_message(&mut cursor).await.unwrap();
    assert_eq!(cd, component());
    assert_eq!(image_reference_of(&resource), "dst.registry/acme/app:v1");

    let forwarded = deserialize_artifact(&mut blob, &InMemoryBlobCache::new())
        .await
        .unwrap();
    let expected = sample_artifact(&InMemoryBlobCache::new());
    assert_eq!(forwarded, expected);

    let pushed = registry.manifest("dst.registry/acme/app:v1").unwrap();
    assert_eq!(&pushed, expected.manifest());
    assert_eq!(registry.pushes.load(Ordering::SeqCst), 1);
    for descriptor in expected.manifest().blobs() {
        assert!(registry.blobs.contains(&descriptor.digest).await.unwrap());
    }
}

#[tokio::test]
async fn test_upload_rejects_non_image_without_writing() {
    let registry = Arc::new(FakeRegistry::default());
    let stage = uploader(registry.clone(), "dst.registry", true);

    let chart = Resource::new("chart", "v1", "helmChart", Access::oci_registry("src.registry/acme/chart:v1"));
    let input = image_message(&chart).await;

    let mut output = Vec::new();
    let err = stage
        .process(&ProcessContext::default(), &mut Cursor::new(input), &mut output)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UnsupportedResource { ref resource_type, .. } if resource_type == "helmChart"));
    assert!(output.is_empty());
    assert_eq!(registry.pushes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_truncated_blob() {
    let stage = uploader(Arc::new(FakeRegistry::default()), "dst.registry", true);
    let input = image_message(&image("app", "src.registry/acme/app:v1")).await;
    let truncated = input[..input.len() - 40].to_vec();

    let mut output = Vec::new();
    let err = stage
        .process(&ProcessContext::default(), &mut Cursor::new(truncated), &mut output)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::TruncatedMessage(_)), "{err:?}");
    assert!(output.is_empty());
}

#[tokio::test]
async fn test_upload_rewrite_is_idempotent() {
    let registry = Arc::new(FakeRegistry::default());
    let stage = uploader(registry.clone(), "dst.registry", false);

    let mut message = image_message(&image("app", "src.registry/acme/team/app:v1")).await;
    let mut references = Vec::new();
    for _ in 0..2 {
        let mut output = Vec::new();
        stage
            .process(&ProcessContext::default(), &mut Cursor::new(message), &mut output)
            .await
            .unwrap();
        let (_, resource, _) = read_message(&mut Cursor::new(output.clone())).await.unwrap();
        references.push(image_reference_of(&resource));
        message = output;
    }
    assert_eq!(references, vec!["dst.registry/app:v1", "dst.registry/app:v1"]);
}

#[tokio::test]
async fn test_upload_cancellation() {
    let stage = uploader(Arc::new(StalledRegistry), "dst.registry", true);
    let input = image_message(&image("app", "src.registry/acme/app:v1")).await;

    let token = CancellationToken::new();
    let ctx = ProcessContext::new(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let mut output = Vec::new();
    let err = stage
        .process(&ctx, &mut Cursor::new(input), &mut output)
        .await
        .unwrap_err();
    canceller.await.unwrap();
    assert!(matches!(err, TransportError::Cancelled));
    assert!(output.is_empty());
}

const PIPELINE: &str = r#"
parallelism: 2
stages:
  - name: download
    type: OciImageDownloader
    filters:
      - type: ResourceTypeFilter
        spec:
          includeResourceTypes: [ociImage]
  - name: upload
    type: OciImageUploader
    spec:
      baseUrl: https://dst.registry/mirror
      keepSourceRepo: false
    filters:
      - type: ResourceTypeFilter
        spec:
          includeResourceTypes: [ociImage]
      - type: ResourceAccessTypeFilter
        spec:
          includeAccessTypes: [ociRegistry]
"#;

fn configured_pipeline(registry: Arc<FakeRegistry>, cache: Arc<InMemoryBlobCache>) -> Pipeline {
    let config = TransportConfig::from_yaml_str(PIPELINE).unwrap();
    let processors = ProcessorFactory::new(ProcessorDeps::new(registry, cache));
    Pipeline::from_config(&config.stages, &FilterFactory::new(), &processors).unwrap()
}

#[tokio::test]
async fn test_configured_pipeline_moves_images_only() {
    let registry = Arc::new(FakeRegistry::default());
    let source = registry.seed("src.registry/acme/app:v1");
    let cache = Arc::new(InMemoryBlobCache::new());
    let pipeline = configured_pipeline(registry.clone(), cache.clone());
    assert_eq!(pipeline.stage_names(), vec!["download", "upload"]);

    let chart = Resource::new("chart", "v2", "helmChart", Access::new("localBlob"));
    let jobs = vec![
        ResourceJob::new(component(), image("app", "src.registry/acme/app:v1")),
        ResourceJob::new(component(), image("missing", "src.registry/acme/missing:v1")),
        ResourceJob::new(component(), chart.clone()),
    ];

    let driver = TransportDriver::new(Arc::new(pipeline), 2);
    let report = driver.run(&ProcessContext::default(), jobs).await;
    assert_eq!(report.resources.len(), 3);
    assert_eq!(report.succeeded(), 2);

    let moved = report.resources[0].result.as_ref().unwrap();
    assert_eq!(image_reference_of(moved), "dst.registry/mirror/app:v1");
    assert_eq!(
        registry.manifest("dst.registry/mirror/app:v1").as_ref(),
        Some(source.manifest())
    );

    let missing = report.resources[1].result.as_ref().unwrap_err();
    match missing {
        TransportError::Stage { stage, resource, .. } => {
            assert_eq!(stage, "download");
            assert_eq!(resource, "missing:v1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(missing.root(), TransportError::RegistryError { .. }));

    let untouched = report.resources[2].result.as_ref().unwrap();
    assert_eq!(untouched, &chart);
    assert_eq!(registry.pushes.load(Ordering::SeqCst), 1);

    // pushed blobs came from the local cache filled by the download stage
    for descriptor in source.manifest().blobs() {
        assert!(cache.contains(&descriptor.digest).await.unwrap());
    }
}

#[test]
fn test_invalid_configuration_fails_before_running() {
    let registry = Arc::new(FakeRegistry::default());
    let deps = ProcessorDeps::new(registry, Arc::new(InMemoryBlobCache::new()));
    let processors = ProcessorFactory::new(deps);

    let unknown_filter = TransportConfig::from_yaml_str(
        r#"
stages:
  - name: upload
    type: OciImageUploader
    spec: { baseUrl: dst.registry }
    filters:
      - type: LabelFilter
        spec: {}
"#,
    )
    .unwrap();
    let err = Pipeline::from_config(&unknown_filter.stages, &FilterFactory::new(), &processors)
        .err()
        .unwrap();
    assert!(matches!(err, TransportError::UnknownFilterType(_)));
    assert!(err.is_config_error());

    let bad_spec = TransportConfig::from_yaml_str(
        r#"
stages:
  - name: upload
    type: OciImageUploader
    spec: { keepSourceRepo: yes-please }
"#,
    )
    .unwrap();
    let err = Pipeline::from_config(&bad_spec.stages, &FilterFactory::new(), &processors)
        .err()
        .unwrap();
    assert!(matches!(err, TransportError::ConfigDeserialization { .. }));
}
