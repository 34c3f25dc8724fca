use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::digest::{DigestError, OciDigest};

/// Error type for image reference parsing
#[derive(Debug, Error)]
pub enum ImageReferenceError {
    #[error("Invalid image reference format: {0}")]
    InvalidFormat(String),
    #[error("Reference {0} names no registry host and no default registry is allowed")]
    MissingRegistry(String),
    #[error("Reference {0} has no tag or digest and implicit tags are not allowed")]
    MissingTag(String),
    #[error(transparent)]
    Digest(#[from] DigestError),
}

/// Controls how much the parser is allowed to guess.
///
/// With the default rules a reference must spell out its registry host and
/// its tag or digest; anything ambiguous is rejected instead of defaulted.
#[derive(Debug, Clone, Default)]
pub struct NormalizationRules {
    /// Registry host to assume for host-less references, e.g. `docker.io`.
    pub default_registry: Option<String>,
    /// Permit tag-less references to mean `latest`.
    pub implicit_latest_tag: bool,
}

/// Tag or digest part of a reference. A digest pins content; a tag is mutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Tag(String),
    Digest(OciDigest),
}

/// A normalized OCI image reference: registry host, repository path, and a
/// tag or digest locator.
///
/// Two references are the same image iff their normalized forms are
/// byte-identical, which `PartialEq` and `Display` both reflect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    locator: Locator,
}

impl ImageReference {
    /// Parse and normalize a reference string under the given rules.
    ///
    /// The registry host is the first path component when it contains a `.`
    /// or `:` or is `localhost`; otherwise the reference is host-less and
    /// only valid when the rules supply a default registry. When a reference
    /// carries both a tag and a digest the digest wins.
    pub fn parse(s: &str, rules: &NormalizationRules) -> Result<Self, ImageReferenceError> {
        if s.is_empty() {
            return Err(ImageReferenceError::InvalidFormat(s.to_string()));
        }

        let (name_part, digest) = match s.rsplit_once('@') {
            Some((name, digest)) => (name, Some(OciDigest::from_str(digest)?)),
            None => (s, None),
        };

        let (registry, remainder) = match name_part.split_once('/') {
            Some((head, rest))
                if head.contains('.') || head.contains(':') || head == "localhost" =>
            {
                (Some(head.to_string()), rest)
            }
            _ => (None, name_part),
        };

        let (repository, tag) = match remainder.rsplit_once(':') {
            Some((repo, tag)) => (repo.to_string(), Some(tag.to_string())),
            None => (remainder.to_string(), None),
        };

        validate_repository(s, &repository)?;
        if let Some(registry) = &registry {
            validate_registry(s, registry)?;
        }
        if let Some(tag) = &tag {
            validate_tag(s, tag)?;
        }

        let registry = match registry.or_else(|| rules.default_registry.clone()) {
            Some(registry) => registry,
            None => return Err(ImageReferenceError::MissingRegistry(s.to_string())),
        };

        let locator = match (digest, tag) {
            (Some(digest), _) => Locator::Digest(digest),
            (None, Some(tag)) => Locator::Tag(tag),
            (None, None) if rules.implicit_latest_tag => Locator::Tag("latest".to_string()),
            (None, None) => return Err(ImageReferenceError::MissingTag(s.to_string())),
        };

        Ok(ImageReference {
            registry,
            repository,
            locator,
        })
    }

    /// Get the registry host
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Get the repository path
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Registry host and repository path without the locator
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Get the tag, if this reference is tag-addressed
    pub fn tag(&self) -> Option<&str> {
        match &self.locator {
            Locator::Tag(tag) => Some(tag),
            Locator::Digest(_) => None,
        }
    }

    /// Get the digest, if this reference is digest-pinned
    pub fn digest(&self) -> Option<&OciDigest> {
        match &self.locator {
            Locator::Digest(digest) => Some(digest),
            Locator::Tag(_) => None,
        }
    }

    /// The tag or digest string the registry API addresses manifests by
    pub fn locator(&self) -> String {
        match &self.locator {
            Locator::Tag(tag) => tag.clone(),
            Locator::Digest(digest) => digest.to_string(),
        }
    }

    /// Same registry and repository, pinned to the given digest
    pub fn with_digest(&self, digest: OciDigest) -> Self {
        ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            locator: Locator::Digest(digest),
        }
    }
}

fn validate_repository(reference: &str, repository: &str) -> Result<(), ImageReferenceError> {
    if repository.is_empty() {
        return Err(ImageReferenceError::InvalidFormat(reference.to_string()));
    }
    for component in repository.split('/') {
        let valid = !component.is_empty()
            && component
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
            && component.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
            && component.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(ImageReferenceError::InvalidFormat(reference.to_string()));
        }
    }
    Ok(())
}

fn validate_registry(reference: &str, registry: &str) -> Result<(), ImageReferenceError> {
    let valid = !registry.is_empty()
        && registry
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'));
    if !valid {
        return Err(ImageReferenceError::InvalidFormat(reference.to_string()));
    }
    Ok(())
}

fn validate_tag(reference: &str, tag: &str) -> Result<(), ImageReferenceError> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && tag.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(ImageReferenceError::InvalidFormat(reference.to_string()));
    }
    Ok(())
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageReference::parse(s, &NormalizationRules::default())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            Locator::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            Locator::Digest(digest) => {
                write!(f, "{}/{}@{}", self.registry, self.repository, digest)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn lenient() -> NormalizationRules {
        NormalizationRules {
            default_registry: Some("docker.io".to_string()),
            implicit_latest_tag: true,
        }
    }

    #[test]
    fn parses_fully_qualified_reference() {
        let reference: ImageReference = "registry.example.com/ns/bundle:1.0".parse().unwrap();
        assert_eq!(reference.registry(), "registry.example.com");
        assert_eq!(reference.repository(), "ns/bundle");
        assert_eq!(reference.tag(), Some("1.0"));
        assert_eq!(reference.to_string(), "registry.example.com/ns/bundle:1.0");
    }

    #[test]
    fn parses_digest_reference() {
        let reference: ImageReference =
            format!("localhost:5000/app@{DIGEST}").parse().unwrap();
        assert_eq!(reference.registry(), "localhost:5000");
        assert_eq!(reference.digest().unwrap().to_string(), DIGEST);
        assert_eq!(reference.tag(), None);
    }

    #[test]
    fn digest_wins_over_tag() {
        let reference: ImageReference =
            format!("registry.example.com/app:1.0@{DIGEST}").parse().unwrap();
        assert_eq!(reference.digest().unwrap().to_string(), DIGEST);
        assert_eq!(reference.locator(), DIGEST);
    }

    #[test]
    fn strict_rules_reject_ambiguity() {
        assert!(matches!(
            "app/invoke:1.0".parse::<ImageReference>(),
            Err(ImageReferenceError::MissingRegistry(_))
        ));
        assert!(matches!(
            "registry.example.com/app".parse::<ImageReference>(),
            Err(ImageReferenceError::MissingTag(_))
        ));
    }

    #[test]
    fn lenient_rules_fill_defaults() {
        let reference = ImageReference::parse("app/invoke", &lenient()).unwrap();
        assert_eq!(reference.to_string(), "docker.io/app/invoke:latest");
    }

    #[test]
    fn identical_normalized_forms_are_equal() {
        let a = ImageReference::parse("docker.io/app/invoke:1.0", &lenient()).unwrap();
        let b = ImageReference::parse("app/invoke:1.0", &lenient()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_illegal_characters() {
        assert!("registry.example.com/App:1.0".parse::<ImageReference>().is_err());
        assert!("registry.example.com/ns//app:1.0".parse::<ImageReference>().is_err());
        assert!("registry.example.com/-app:1.0".parse::<ImageReference>().is_err());
        assert!("".parse::<ImageReference>().is_err());
        assert!("registry.example.com/app:".parse::<ImageReference>().is_err());
    }

    #[test]
    fn rejects_malformed_digest() {
        assert!(
            "registry.example.com/app@sha256:short"
                .parse::<ImageReference>()
                .is_err()
        );
    }

    #[test]
    fn with_digest_pins_the_same_repository() {
        let reference: ImageReference = "registry.example.com/ns/bundle:1.0".parse().unwrap();
        let pinned = reference.with_digest(DIGEST.parse().unwrap());
        assert_eq!(pinned.name(), "registry.example.com/ns/bundle");
        assert_eq!(
            pinned.to_string(),
            format!("registry.example.com/ns/bundle@{DIGEST}")
        );
    }
}
