//! Component and resource descriptors.
//!
//! The component descriptor is carried by value between stages; only its
//! name and version are interpreted here. Unknown fields are kept in
//! `extra` maps so documents survive a pass through the pipeline unchanged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TransportError};

/// Resource type of an OCI container image.
pub const OCI_IMAGE_TYPE: &str = "ociImage";

/// Access type of an artifact stored in an OCI registry.
pub const OCI_REGISTRY_TYPE: &str = "ociRegistry";

/// Schema version written by [`ComponentDescriptor::new`].
pub const DEFAULT_SCHEMA_VERSION: &str = "v2";

/// Metadata document identifying a component and its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub meta: DescriptorMeta,
    pub component: ComponentSpec,
    /// Top-level fields such as `signatures`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorMeta {
    pub schema_version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub version: String,
    /// Fields not interpreted by the transport (provider, repositoryContexts, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            meta: DescriptorMeta {
                schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
                extra: Map::new(),
            },
            component: ComponentSpec {
                name: name.into(),
                version: version.into(),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn version(&self) -> &str {
        &self.component.version
    }
}

/// One artifact within a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub version: String,
    /// Type tag, e.g. `ociImage`
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    pub access: Access,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        resource_type: impl Into<String>,
        access: Access,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            resource_type: resource_type.into(),
            relation: None,
            access,
            extra: Map::new(),
        }
    }

    /// `name:version`, used to attribute log lines and errors.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// Whether this resource is an OCI image stored in an OCI registry.
    pub fn is_oci_image_in_registry(&self) -> bool {
        self.resource_type == OCI_IMAGE_TYPE && self.access.access_type == OCI_REGISTRY_TYPE
    }
}

/// Access method of a resource: a type tag plus a type-specific spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Access {
    #[serde(rename = "type")]
    pub access_type: String,
    #[serde(flatten)]
    pub spec: Map<String, Value>,
}

impl Access {
    pub fn new(access_type: impl Into<String>) -> Self {
        Self {
            access_type: access_type.into(),
            spec: Map::new(),
        }
    }

    /// Access for an image at `image_reference` in an OCI registry.
    pub fn oci_registry(image_reference: impl Into<String>) -> Self {
        let mut spec = Map::new();
        spec.insert(
            "imageReference".to_string(),
            Value::String(image_reference.into()),
        );
        Self {
            access_type: OCI_REGISTRY_TYPE.to_string(),
            spec,
        }
    }

    /// Decode the type-specific spec into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.spec.clone())).map_err(|e| {
            TransportError::MalformedHeader(format!(
                "Unable to decode '{}' access: {}",
                self.access_type, e
            ))
        })
    }
}

/// Spec of an `ociRegistry` access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciRegistryAccess {
    pub image_reference: String,
}

impl From<OciRegistryAccess> for Access {
    fn from(access: OciRegistryAccess) -> Self {
        Access::oci_registry(access.image_reference)
    }
}
