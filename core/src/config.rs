use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::descriptor::{ComponentDescriptor, Resource};
use crate::error::{Result, TransportError};

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Number of resources processed concurrently
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Content cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Ordered stage list; every resource runs through it front to back
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

fn default_parallelism() -> usize {
    1
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            cache: CacheConfig::default(),
            stages: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. `.json` files are read as JSON, everything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransportError::Config(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(TransportError::Config(
                "parallelism must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(TransportError::Config(format!(
                    "stage of type '{}' has an empty name",
                    stage.processor_type
                )));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(TransportError::Config(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
        }
        Ok(())
    }
}

/// Content cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Cache directory (defaults to the user cache directory)
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Prune bound applied after a run
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

/// One pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    /// Processor type tag, resolved through the processor registry
    #[serde(rename = "type")]
    pub processor_type: String,

    /// Processor-specific spec, decoded by the processor constructor
    #[serde(default)]
    pub spec: Value,

    /// Filters deciding whether the stage applies to a resource
    #[serde(default)]
    pub filters: Vec<FilterConfig>,

    /// How `filters` are combined
    #[serde(default, rename = "match")]
    pub match_policy: MatchPolicy,
}

/// Filter definition: a type tag plus an untyped spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub filter_type: String,

    #[serde(default)]
    pub spec: Value,
}

/// Combination of a stage's filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Every filter must match
    #[default]
    All,
    /// At least one filter must match
    Any,
}

/// A component and the resources to transport for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRequest {
    pub component: ComponentDescriptor,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl TransportRequest {
    /// Load from a file. `.json` files are read as JSON, everything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if is_json(path) {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }
}

/// Decode a filter or stage spec into its typed shape.
///
/// An absent (`null`) spec decodes like an empty mapping, so shapes whose
/// fields all have defaults need no spec at all.
pub fn decode_spec<T: DeserializeOwned>(kind: &str, spec: &Value) -> Result<T> {
    let value = if spec.is_null() {
        Value::Object(Default::default())
    } else {
        spec.clone()
    };
    serde_json::from_value(value).map_err(|e| TransportError::ConfigDeserialization {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
parallelism: 4
cache:
  dir: /tmp/transport-cache
  maxSizeBytes: 1024
stages:
  - name: download
    type: OciImageDownloader
  - name: upload
    type: OciImageUploader
    spec:
      baseUrl: dst.registry
      keepSourceRepo: true
    match: any
    filters:
      - type: ResourceTypeFilter
        spec:
          includeResourceTypes: [ociImage]
      - type: ComponentNameFilter
        spec:
          includeComponentNames: [github.com/acme/app]
"#;

    #[test]
    fn test_parse_pipeline_yaml() {
        let config = TransportConfig::from_yaml_str(PIPELINE).unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/transport-cache")));
        assert_eq!(config.cache.max_size_bytes, Some(1024));
        assert_eq!(config.stages.len(), 2);

        let download = &config.stages[0];
        assert_eq!(download.processor_type, "OciImageDownloader");
        assert!(download.spec.is_null());
        assert!(download.filters.is_empty());
        assert_eq!(download.match_policy, MatchPolicy::All);

        let upload = &config.stages[1];
        assert_eq!(upload.spec["baseUrl"], "dst.registry");
        assert_eq!(upload.match_policy, MatchPolicy::Any);
        assert_eq!(upload.filters[0].filter_type, "ResourceTypeFilter");
        assert_eq!(upload.filters[0].spec["includeResourceTypes"][0], "ociImage");
    }

    #[test]
    fn test_defaults() {
        let config = TransportConfig::from_yaml_str("stages: []").unwrap();
        assert_eq!(config.parallelism, 1);
        assert!(config.cache.dir.is_none());
        assert!(config.stages.is_empty());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let result = TransportConfig::from_yaml_str("parallelism: 0");
        assert!(matches!(result, Err(TransportError::Config(_))));
    }

    #[test]
    fn test_duplicate_stage_names_rejected() {
        let yaml = r#"
stages:
  - name: upload
    type: OciImageUploader
  - name: upload
    type: OciImageUploader
"#;
        let err = TransportConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate stage name 'upload'"));
    }

    #[test]
    fn test_empty_stage_name_rejected() {
        let yaml = r#"
stages:
  - name: " "
    type: OciImageUploader
"#;
        assert!(TransportConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_json_by_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"parallelism": 2, "stages": [{"name": "up", "type": "OciImageUploader"}]}"#,
        )
        .unwrap();
        let config = TransportConfig::load(&path).unwrap();
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.stages[0].name, "up");
    }

    #[test]
    fn test_load_missing_file() {
        let result = TransportConfig::load(Path::new("/nonexistent/pipeline.yaml"));
        assert!(matches!(result, Err(TransportError::Config(_))));
    }

    #[test]
    fn test_transport_request_yaml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("component.yaml");
        std::fs::write(
            &path,
            r#"
component:
  meta:
    schemaVersion: v2
  component:
    name: github.com/acme/app
    version: v1.0.0
resources:
  - name: app
    version: v1
    type: ociImage
    access:
      type: ociRegistry
      imageReference: src.registry/acme/app:v1
"#,
        )
        .unwrap();
        let request = TransportRequest::load(&path).unwrap();
        assert_eq!(request.component.name(), "github.com/acme/app");
        assert_eq!(request.resources.len(), 1);
        assert!(request.resources[0].is_oci_image_in_registry());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Shape {
        #[serde(default)]
        include_names: Vec<String>,
    }

    #[test]
    fn test_decode_spec_null_is_empty_mapping() {
        let shape: Shape = decode_spec("Shape", &Value::Null).unwrap();
        assert!(shape.include_names.is_empty());
    }

    #[test]
    fn test_decode_spec_wrong_shape() {
        let spec = serde_json::json!({"includeNames": "not-a-list"});
        let err = decode_spec::<Shape>("Shape", &spec).unwrap_err();
        assert!(
            matches!(err, TransportError::ConfigDeserialization { ref kind, .. } if kind == "Shape")
        );
    }
}
