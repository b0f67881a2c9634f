//! Resource filters.
//!
//! A filter decides whether a stage applies to a (component, resource) pair.
//! Filters are pure predicates, immutable once built.
//!
//! All built-in filters share one include policy, implemented by
//! [`IncludeSet`]: an empty include set matches everything.

pub mod factory;

pub use factory::{FilterConstructor, FilterFactory};

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use transport_core::descriptor::{ComponentDescriptor, Resource};

/// Predicate over a component and one of its resources.
pub trait Filter: Send + Sync + fmt::Debug {
    fn matches(&self, component: &ComponentDescriptor, resource: &Resource) -> bool;
}

/// Set of allowed values. Empty allows every value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeSet(BTreeSet<String>);

impl IncludeSet {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn allows(&self, value: &str) -> bool {
        self.0.is_empty() || self.0.contains(value)
    }
}

/// Spec of [`ComponentNameFilter`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNameFilterSpec {
    #[serde(default)]
    pub include_component_names: Vec<String>,
}

/// Matches components by name.
#[derive(Debug, Clone)]
pub struct ComponentNameFilter {
    include: IncludeSet,
}

impl ComponentNameFilter {
    /// An empty spec matches every component.
    pub fn new(spec: ComponentNameFilterSpec) -> Self {
        Self {
            include: IncludeSet::new(spec.include_component_names),
        }
    }
}

impl Filter for ComponentNameFilter {
    fn matches(&self, component: &ComponentDescriptor, _resource: &Resource) -> bool {
        self.include.allows(component.name())
    }
}

/// Spec of [`ResourceTypeFilter`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeFilterSpec {
    #[serde(default)]
    pub include_resource_types: Vec<String>,
}

/// Matches resources by type tag.
#[derive(Debug, Clone)]
pub struct ResourceTypeFilter {
    include: IncludeSet,
}

impl ResourceTypeFilter {
    /// An empty spec matches every resource type.
    pub fn new(spec: ResourceTypeFilterSpec) -> Self {
        Self {
            include: IncludeSet::new(spec.include_resource_types),
        }
    }
}

impl Filter for ResourceTypeFilter {
    fn matches(&self, _component: &ComponentDescriptor, resource: &Resource) -> bool {
        self.include.allows(&resource.resource_type)
    }
}

/// Spec of [`ResourceAccessTypeFilter`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAccessTypeFilterSpec {
    #[serde(default)]
    pub include_access_types: Vec<String>,
}

/// Matches resources by access method tag.
#[derive(Debug, Clone)]
pub struct ResourceAccessTypeFilter {
    include: IncludeSet,
}

impl ResourceAccessTypeFilter {
    /// An empty spec matches every access type.
    pub fn new(spec: ResourceAccessTypeFilterSpec) -> Self {
        Self {
            include: IncludeSet::new(spec.include_access_types),
        }
    }
}

impl Filter for ResourceAccessTypeFilter {
    fn matches(&self, _component: &ComponentDescriptor, resource: &Resource) -> bool {
        self.include.allows(&resource.access.access_type)
    }
}

/// Conjunction. Matches when every inner filter matches (vacuously true when empty).
#[derive(Debug, Default)]
pub struct AllOf(pub Vec<Box<dyn Filter>>);

impl Filter for AllOf {
    fn matches(&self, component: &ComponentDescriptor, resource: &Resource) -> bool {
        self.0.iter().all(|f| f.matches(component, resource))
    }
}

/// Disjunction. Matches when any inner filter matches; an empty list matches.
#[derive(Debug, Default)]
pub struct AnyOf(pub Vec<Box<dyn Filter>>);

impl Filter for AnyOf {
    fn matches(&self, component: &ComponentDescriptor, resource: &Resource) -> bool {
        self.0.is_empty() || self.0.iter().any(|f| f.matches(component, resource))
    }
}
