use thiserror::Error;

/// Component transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// A filter or stage spec could not be parsed into its expected shape
    #[error("Invalid spec for {kind}: {message}")]
    ConfigDeserialization { kind: String, message: String },

    /// Filter type tag not present in the filter registry
    #[error("Unknown filter type: {0}")]
    UnknownFilterType(String),

    /// Stage type tag not present in the processor registry
    #[error("Unknown processor type: {0}")]
    UnknownProcessorType(String),

    /// Input ended in the middle of a processor message frame
    #[error("Truncated processor message: {0}")]
    TruncatedMessage(String),

    /// A metadata section of a processor message is not valid
    #[error("Malformed processor message header: {0}")]
    MalformedHeader(String),

    /// Blob envelope is not a recognized artifact encoding
    #[error("Unsupported artifact encoding: {0}")]
    UnsupportedArtifactEncoding(String),

    /// Content does not hash to the digest it was declared with
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Stage cannot handle the resource type / access type combination
    #[error("Unsupported resource: type '{resource_type}' with access '{access_type}'")]
    UnsupportedResource {
        resource_type: String,
        access_type: String,
    },

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Reading from the content cache failed
    #[error("Cache read error: {0}")]
    CacheRead(String),

    /// Writing to the content cache failed
    #[error("Cache write error: {0}")]
    CacheWrite(String),

    /// External stage process failed
    #[error("Process '{bin}' failed: {message}")]
    ProcessFailed { bin: String, message: String },

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Failure attributed to a stage and resource
    #[error("Stage '{stage}' failed for resource {resource}: {source}")]
    Stage {
        stage: String,
        resource: String,
        #[source]
        source: Box<TransportError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Attribute this error to a stage and resource.
    ///
    /// Errors that already carry attribution are returned unchanged.
    pub fn in_stage(self, stage: impl Into<String>, resource: impl Into<String>) -> Self {
        match self {
            err @ TransportError::Stage { .. } => err,
            other => TransportError::Stage {
                stage: stage.into(),
                resource: resource.into(),
                source: Box::new(other),
            },
        }
    }

    /// The error beneath any stage attribution.
    pub fn root(&self) -> &TransportError {
        match self {
            TransportError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Errors that must stop pipeline construction.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self.root(),
            TransportError::ConfigDeserialization { .. }
                | TransportError::UnknownFilterType(_)
                | TransportError::UnknownProcessorType(_)
                | TransportError::Config(_)
        )
    }

    /// Errors that abort one resource while the driver moves on to the next.
    pub fn is_resource_error(&self) -> bool {
        !self.is_config_error()
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TransportError {
    fn from(err: serde_yaml::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
