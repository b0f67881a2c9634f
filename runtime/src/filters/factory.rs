//! Filter registry
//!
//! Maps filter type tags to constructors. Each constructor decodes the
//! untyped spec into its own shape and builds the filter.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use transport_core::config::{decode_spec, FilterConfig, MatchPolicy};
use transport_core::error::{Result, TransportError};

use super::{
    AllOf, AnyOf, ComponentNameFilter, Filter, ResourceAccessTypeFilter, ResourceTypeFilter,
};

/// Builds a filter from its spec.
pub type FilterConstructor = Arc<dyn Fn(&Value) -> Result<Box<dyn Filter>> + Send + Sync>;

pub const COMPONENT_NAME_FILTER: &str = "ComponentNameFilter";
pub const RESOURCE_TYPE_FILTER: &str = "ResourceTypeFilter";
pub const RESOURCE_ACCESS_TYPE_FILTER: &str = "ResourceAccessTypeFilter";

/// Registry of filter constructors keyed by type tag.
#[derive(Clone)]
pub struct FilterFactory {
    constructors: HashMap<String, FilterConstructor>,
}

impl FilterFactory {
    /// Registry with the built-in filter types.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(COMPONENT_NAME_FILTER, |spec| {
            Ok(Box::new(ComponentNameFilter::new(decode_spec(
                COMPONENT_NAME_FILTER,
                spec,
            )?)))
        });
        factory.register(RESOURCE_TYPE_FILTER, |spec| {
            Ok(Box::new(ResourceTypeFilter::new(decode_spec(
                RESOURCE_TYPE_FILTER,
                spec,
            )?)))
        });
        factory.register(RESOURCE_ACCESS_TYPE_FILTER, |spec| {
            Ok(Box::new(ResourceAccessTypeFilter::new(decode_spec(
                RESOURCE_ACCESS_TYPE_FILTER,
                spec,
            )?)))
        });
        factory
    }

    /// Registry without any filter types.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor for `tag`, replacing any existing one.
    pub fn register<F>(&mut self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Filter>> + Send + Sync + 'static,
    {
        let tag = tag.into();
        tracing::debug!(tag = %tag, "Registering filter type");
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

    /// Build the filter registered under `tag` from `spec`.
    pub fn create(&self, tag: &str, spec: &Value) -> Result<Box<dyn Filter>> {
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| TransportError::UnknownFilterType(tag.to_string()))?;
        constructor(spec)
    }

    /// Build one filter combining `configs` under `policy`.
    pub fn create_all(&self, configs: &[FilterConfig], policy: MatchPolicy) -> Result<Box<dyn Filter>> {
        let filters = configs
            .iter()
            .map(|c| self.create(&c.filter_type, &c.spec))
            .collect::<Result<Vec<_>>>()?;
        Ok(match policy {
            MatchPolicy::All => Box::new(AllOf(filters)),
            MatchPolicy::Any => Box::new(AnyOf(filters)),
        })
    }
}

impl Default for FilterFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use transport_core::descriptor::{Access, ComponentDescriptor, Resource, OCI_IMAGE_TYPE};

    fn resource(resource_type: &str) -> Resource {
        Resource::new(
            "app",
            "v1",
            resource_type,
            Access::oci_registry("src.registry/acme/app:v1"),
        )
    }

    #[test]
    fn test_builtin_tags() {
        assert_eq!(
            FilterFactory::new().tags(),
            vec![
                COMPONENT_NAME_FILTER,
                RESOURCE_ACCESS_TYPE_FILTER,
                RESOURCE_TYPE_FILTER
            ]
        );
        assert!(FilterFactory::empty().tags().is_empty());
    }

    #[test]
    fn test_create_resource_type_filter() {
        let filter = FilterFactory::new()
            .create(RESOURCE_TYPE_FILTER, &json!({"includeResourceTypes": ["ociImage"]}))
            .unwrap();
        let cd = ComponentDescriptor::new("github.com/acme/app", "v1");
        assert!(filter.matches(&cd, &resource(OCI_IMAGE_TYPE)));
        assert!(!filter.matches(&cd, &resource("helmChart")));
        assert!(!filter.matches(&cd, &resource("OCIImage")));
    }

    #[test]
    fn test_absent_spec_matches_everything() {
        let filter = FilterFactory::new()
            .create(COMPONENT_NAME_FILTER, &Value::Null)
            .unwrap();
        let cd = ComponentDescriptor::new("anything", "v1");
        assert!(filter.matches(&cd, &resource("helmChart")));
    }

    #[test]
    fn test_unknown_filter_type() {
        let err = FilterFactory::new()
            .create("LabelFilter", &json!({}))
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownFilterType(ref t) if t == "LabelFilter"));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_bad_spec_shape() {
        let err = FilterFactory::new()
            .create(RESOURCE_ACCESS_TYPE_FILTER, &json!({"includeAccessTypes": 42}))
            .unwrap_err();
        assert!(matches!(err, TransportError::ConfigDeserialization { .. }));
    }

    #[test]
    fn test_register_custom_filter() {
        #[derive(Debug)]
        struct Never;
        impl Filter for Never {
            fn matches(&self, _: &ComponentDescriptor, _: &Resource) -> bool {
                false
            }
        }

        let mut factory = FilterFactory::empty();
        factory.register("Never", |_| Ok(Box::new(Never)));
        let filter = factory.create("Never", &Value::Null).unwrap();
        assert!(!filter.matches(&ComponentDescriptor::new("x", "v1"), &resource(OCI_IMAGE_TYPE)));
        assert!(factory.create(RESOURCE_TYPE_FILTER, &Value::Null).is_err());
    }

    #[test]
    fn test_create_all_policies() {
        let configs = vec![
            FilterConfig {
                filter_type: RESOURCE_TYPE_FILTER.to_string(),
                spec: json!({"includeResourceTypes": ["helmChart"]}),
            },
            FilterConfig {
                filter_type: COMPONENT_NAME_FILTER.to_string(),
                spec: json!({"includeComponentNames": ["github.com/acme/app"]}),
            },
        ];
        let factory = FilterFactory::new();
        let cd = ComponentDescriptor::new("github.com/acme/app", "v1");
        let image = resource(OCI_IMAGE_TYPE);

        let all = factory.create_all(&configs, MatchPolicy::All).unwrap();
        assert!(!all.matches(&cd, &image));
        let any = factory.create_all(&configs, MatchPolicy::Any).unwrap();
        assert!(any.matches(&cd, &image));

        let mut broken = configs.clone();
        broken[1].filter_type = "Bogus".to_string();
        assert!(factory.create_all(&broken, MatchPolicy::Any).is_err());
    }
}
