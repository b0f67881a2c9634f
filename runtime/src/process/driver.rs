//! Transport driver: runs the pipeline once per resource.
//!
//! Resources are independent. Up to `parallelism` of them are in flight at
//! once; a failure is recorded against its resource and the others carry on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::Instrument;
use transport_core::config::TransportRequest;
use transport_core::descriptor::{ComponentDescriptor, Resource};
use transport_core::error::{Result, TransportError};

use super::message::{read_message_header, write_message, SpooledBlob};
use super::pipeline::Pipeline;
use super::{ProcessContext, ResourceStreamProcessor};

/// One resource to transport.
#[derive(Debug, Clone)]
pub struct ResourceJob {
    pub component: ComponentDescriptor,
    pub resource: Resource,
}

impl ResourceJob {
    pub fn new(component: ComponentDescriptor, resource: Resource) -> Self {
        Self {
            component,
            resource,
        }
    }

    /// One job per resource of `request`.
    pub fn from_request(request: &TransportRequest) -> Vec<Self> {
        request
            .resources
            .iter()
            .map(|r| Self::new(request.component.clone(), r.clone()))
            .collect()
    }

    fn output_file_name(&self) -> String {
        let raw = format!(
            "{}_{}_{}.msg",
            self.component.name(),
            self.resource.name,
            self.resource.version
        );
        raw.chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
                _ => '_',
            })
            .collect()
    }
}

/// Outcome for one resource.
#[derive(Debug)]
pub struct ResourceReport {
    pub component: String,
    /// `name:version` of the resource as submitted.
    pub resource: String,
    /// Final resource descriptor, or the attributed error.
    pub result: Result<Resource>,
    /// Where the final message was written, if an output directory was set.
    pub output: Option<PathBuf>,
}

impl ResourceReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of a transport run, in submission order.
#[derive(Debug, Default)]
pub struct TransportReport {
    pub resources: Vec<ResourceReport>,
}

impl TransportReport {
    pub fn succeeded(&self) -> usize {
        self.resources.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.resources.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &TransportError)> {
        self.resources
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.resource.as_str(), e)))
    }
}

/// Runs a [`Pipeline`] over a set of resources.
pub struct TransportDriver {
    pipeline: Arc<Pipeline>,
    parallelism: usize,
    output_dir: Option<PathBuf>,
}

impl TransportDriver {
    pub fn new(pipeline: Arc<Pipeline>, parallelism: usize) -> Self {
        Self {
            pipeline,
            parallelism: parallelism.max(1),
            output_dir: None,
        }
    }

    /// Write each final message to `dir` as `<component>_<resource>_<version>.msg`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub async fn run(&self, ctx: &ProcessContext, jobs: Vec<ResourceJob>) -> TransportReport {
        if let Some(dir) = &self.output_dir {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to create output directory");
            }
        }

        tracing::info!(
            resources = jobs.len(),
            parallelism = self.parallelism,
            stages = self.pipeline.len(),
            "Starting transport"
        );

        let outputs = self.output_paths(&jobs);
        let mut indexed: Vec<(usize, ResourceReport)> =
            stream::iter(jobs.into_iter().zip(outputs).enumerate())
                .map(|(index, (job, output))| async move {
                    (index, self.run_job(ctx, job, output).await)
                })
                .buffer_unordered(self.parallelism)
                .collect()
                .await;
        indexed.sort_by_key(|(index, _)| *index);

        let report = TransportReport {
            resources: indexed.into_iter().map(|(_, r)| r).collect(),
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Transport finished"
        );
        report
    }

    /// One output path per job. Names that collide after sanitizing get the
    /// job index appended, so no two jobs share a file.
    fn output_paths(&self, jobs: &[ResourceJob]) -> Vec<Option<PathBuf>> {
        let Some(dir) = &self.output_dir else {
            return vec![None; jobs.len()];
        };
        let mut taken = HashSet::new();
        jobs.iter()
            .enumerate()
            .map(|(index, job)| {
                let mut name = job.output_file_name();
                if !taken.insert(name.clone()) {
                    let stem = name.trim_end_matches(".msg").to_string();
                    name = format!("{}.{}.msg", stem, index);
                    taken.insert(name.clone());
                }
                Some(dir.join(name))
            })
            .collect()
    }

    async fn run_job(
        &self,
        ctx: &ProcessContext,
        job: ResourceJob,
        output_path: Option<PathBuf>,
    ) -> ResourceReport {
        let identity = job.resource.identity();
        let span = tracing::info_span!(
            "resource",
            component = %job.component.name(),
            resource = %identity
        );

        let result = self
            .transport(ctx, &job, output_path.as_deref())
            .instrument(span)
            .await;

        match &result {
            Ok(_) => tracing::info!(resource = %identity, "Resource transported"),
            Err(e) => tracing::error!(resource = %identity, error = %e, "Resource failed"),
        }

        ResourceReport {
            component: job.component.name().to_string(),
            resource: identity,
            output: output_path.filter(|_| result.is_ok()),
            result,
        }
    }

    async fn transport(
        &self,
        ctx: &ProcessContext,
        job: &ResourceJob,
        output_path: Option<&Path>,
    ) -> Result<Resource> {
        let mut input = SpooledBlob::empty()?;
        write_message(input.writer(), &job.component, &job.resource, tokio::io::empty()).await?;
        input.finish().await?;

        let mut output = SpooledBlob::empty()?;
        self.pipeline
            .process(ctx, &mut input, output.writer())
            .await?;
        drop(input);
        output.finish().await?;

        let (_, resource) = read_message_header(&mut output).await?;

        if let Some(path) = output_path {
            output.rewind().await?;
            let mut file = tokio::fs::File::create(path).await?;
            tokio::io::copy(&mut output, &mut file).await?;
            file.sync_all().await?;
            tracing::debug!(path = %path.display(), "Wrote final message");
        }
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncWrite};
    use transport_core::descriptor::{Access, OCI_IMAGE_TYPE};

    use crate::process::message::{read_message, spool_blob};

    /// Fails resources named "bad", tracks peak concurrency.
    #[derive(Default)]
    struct Probe {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ResourceStreamProcessor for Probe {
        async fn process(
            &self,
            _ctx: &ProcessContext,
            input: &mut (dyn AsyncRead + Send + Unpin),
            output: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let (cd, mut res, blob) = read_message(input).await?;
            if res.name == "bad" {
                return Err(TransportError::UnsupportedResource {
                    resource_type: res.resource_type.clone(),
                    access_type: res.access.access_type.clone(),
                });
            }
            let spooled = spool_blob(blob).await?;
            res.access = Access::oci_registry(format!("dst.registry/{}:{}", res.name, res.version));
            write_message(output, &cd, &res, spooled).await?;
            Ok(())
        }
    }

    fn jobs(names: &[&str]) -> Vec<ResourceJob> {
        let cd = ComponentDescriptor::new("github.com/acme/app", "v1.0.0");
        names
            .iter()
            .map(|name| {
                ResourceJob::new(
                    cd.clone(),
                    Resource::new(
                        *name,
                        "v1",
                        OCI_IMAGE_TYPE,
                        Access::oci_registry(format!("src.registry/acme/{}:v1", name)),
                    ),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_resource() {
        let pipeline = Pipeline::new().with_stage("probe", Arc::new(Probe::default()));
        let driver = TransportDriver::new(Arc::new(pipeline), 2);
        let report = driver
            .run(&ProcessContext::default(), jobs(&["a", "bad", "c"]))
            .await;

        assert_eq!(report.resources.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());

        let names: Vec<&str> = report.resources.iter().map(|r| r.resource.as_str()).collect();
        assert_eq!(names, vec!["a:v1", "bad:v1", "c:v1"]);

        let (failed, err) = report.errors().next().unwrap();
        assert_eq!(failed, "bad:v1");
        assert!(matches!(err, TransportError::Stage { stage, .. } if stage == "probe"));
        assert!(err.is_resource_error());

        let moved = report.resources[2].result.as_ref().unwrap();
        assert_eq!(
            moved.access.decode::<transport_core::OciRegistryAccess>().unwrap().image_reference,
            "dst.registry/c:v1"
        );
    }

    #[tokio::test]
    async fn test_parallelism_bound() {
        let probe = Arc::new(Probe::default());
        let pipeline = Pipeline::new().with_stage("probe", probe.clone());
        let driver = TransportDriver::new(Arc::new(pipeline), 2);
        let report = driver
            .run(&ProcessContext::default(), jobs(&["a", "b", "c", "d", "e"]))
            .await;
        assert!(report.is_success());
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_parallelism_is_clamped() {
        let driver = TransportDriver::new(Arc::new(Pipeline::new()), 0);
        assert_eq!(driver.parallelism(), 1);
        let report = driver.run(&ProcessContext::default(), jobs(&["a"])).await;
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_output_dir_receives_messages() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let driver = TransportDriver::new(Arc::new(Pipeline::new()), 1).with_output_dir(&out);
        let report = driver.run(&ProcessContext::default(), jobs(&["app"])).await;

        let path = report.resources[0].output.clone().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "github.com_acme_app_app_v1.msg"
        );
        let mut file = tokio::fs::File::open(&path).await.unwrap();
        let (cd, res) = read_message_header(&mut file).await.unwrap();
        assert_eq!(cd.name(), "github.com/acme/app");
        assert_eq!(res.name, "app");
    }

    #[tokio::test]
    async fn test_colliding_output_names_do_not_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let driver = TransportDriver::new(Arc::new(Pipeline::new()), 2).with_output_dir(tmp.path());
        let report = driver
            .run(&ProcessContext::default(), jobs(&["a/b", "a_b"]))
            .await;
        assert!(report.is_success());

        let first = report.resources[0].output.clone().unwrap();
        let second = report.resources[1].output.clone().unwrap();
        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "github.com_acme_app_a_b_v1.1.msg"
        );

        for (path, name) in [(first, "a/b"), (second, "a_b")] {
            let mut file = tokio::fs::File::open(&path).await.unwrap();
            let (_, res) = read_message_header(&mut file).await.unwrap();
            assert_eq!(res.name, name);
        }
    }

    #[test]
    fn test_jobs_from_request() {
        let request = TransportRequest {
            component: ComponentDescriptor::new("github.com/acme/app", "v1.0.0"),
            resources: jobs(&["a", "b"]).into_iter().map(|j| j.resource).collect(),
        };
        let jobs = ResourceJob::from_request(&request);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].component.name(), "github.com/acme/app");
    }
}
