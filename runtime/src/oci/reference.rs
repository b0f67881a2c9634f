//! OCI image reference parsing and target rewriting.
//!
//! Parses image references like `ghcr.io/acme/app:v1.0.0` into structured
//! components and computes where a transported image lands in a target
//! registry.

use transport_core::error::{Result, TransportError};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, optionally with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "acme/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v1.0.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(TransportError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !digest_part.contains(':') {
                    return Err(TransportError::InvalidReference(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry_repository(name)?;

        // Apply default tag if no tag and no digest
        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Last path segment of the repository (`acme/app` → `app`).
    pub fn image_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split `name[:tag]`. A colon in the first path segment followed by digits
/// only is a registry port, not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    match name_tag.rfind('/') {
        Some(slash_pos) => {
            let after_slash = &name_tag[slash_pos + 1..];
            match after_slash.rfind(':') {
                Some(colon_pos) => (
                    &name_tag[..slash_pos + 1 + colon_pos],
                    Some(&after_slash[colon_pos + 1..]),
                ),
                None => (name_tag, None),
            }
        }
        None => match name_tag.rfind(':') {
            Some(colon_pos) => {
                let after_colon = &name_tag[colon_pos + 1..];
                if after_colon.chars().all(|c| c.is_ascii_digit()) {
                    (name_tag, None)
                } else {
                    (&name_tag[..colon_pos], Some(after_colon))
                }
            }
            None => (name_tag, None),
        },
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    // The first component is a registry if it contains a dot or colon, or is "localhost"
    if let Some(slash_pos) = name.find('/') {
        let first = &name[..slash_pos];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repo = &name[slash_pos + 1..];
            if repo.is_empty() {
                return Err(TransportError::InvalidReference(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), repo.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        // Single name like "nginx" → "library/nginx" for Docker Hub
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

/// Split a base URL such as `https://dst.registry/mirror/` into host and path prefix.
fn split_base_url(base_url: &str) -> Result<(String, Option<String>)> {
    let trimmed = base_url.trim();
    let without_scheme = match trimmed.find("://") {
        Some(pos) => &trimmed[pos + 3..],
        None => trimmed,
    };
    let without_scheme = without_scheme.trim_matches('/');

    let (host, prefix) = match without_scheme.find('/') {
        Some(pos) => (
            &without_scheme[..pos],
            Some(without_scheme[pos + 1..].trim_matches('/')),
        ),
        None => (without_scheme, None),
    };

    if host.is_empty() {
        return Err(TransportError::InvalidReference(format!(
            "Base URL '{}' has no host",
            base_url
        )));
    }

    let prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
    Ok((host.to_string(), prefix))
}

/// Compute the target reference of `source` under `base_url`.
///
/// With `keep_source_repo` the full source repository path is kept below
/// the base URL (`src.registry/acme/app:v1` → `dst.registry/acme/app:v1`);
/// without it only the image name is kept (`dst.registry/app:v1`), which
/// maps an already rewritten reference onto itself. Tag and digest are
/// carried over unchanged.
pub fn target_reference(
    base_url: &str,
    source: &ImageReference,
    keep_source_repo: bool,
) -> Result<ImageReference> {
    let (host, prefix) = split_base_url(base_url)?;

    let tail = if keep_source_repo {
        source.repository.as_str()
    } else {
        source.image_name()
    };
    let repository = match prefix {
        Some(prefix) => format!("{}/{}", prefix, tail),
        None => tail.to_string(),
    };

    Ok(ImageReference {
        registry: host,
        repository,
        tag: source.tag.clone(),
        digest: source.digest.clone(),
    })
}
