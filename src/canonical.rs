//! Dependency reference canonicalization
//!
//! Parses raw dependency reference strings into typed, normalized identifiers.
//! External references must be fully qualified
//! (`external://<ecosystem>/<package>/<version>`); internal references use
//! `internal://<namespace>/<entity-name>`. Canonicalization is idempotent and
//! total on well-formed input: malformed input always yields a typed error.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CanonicalizationError;

/// URI prefix for external dependency references
pub const EXTERNAL_PREFIX: &str = "external://";
/// URI prefix for internal dependency references
pub const INTERNAL_PREFIX: &str = "internal://";

/// Ecosystems accepted in external references
pub const SUPPORTED_ECOSYSTEMS: &[&str] =
    &["pypi", "npm", "golang.org", "github.com", "crates.io"];

/// Well-known renamed packages, applied after case normalization
const PACKAGE_ALIASES: &[(&str, &str, &str)] = &[
    ("pypi", "python-requests", "requests"),
    ("pypi", "python-dateutil", "dateutil"),
    ("npm", "node-sass", "sass"),
];

static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]$|^[a-z][a-z0-9_-]*[a-z0-9]$").expect("static pattern"));

/// Whether a namespace is acceptable (lowercase kebab/snake, no leading or
/// trailing separators)
pub fn is_valid_namespace(namespace: &str) -> bool {
    NAMESPACE_RE.is_match(namespace)
}

/// A canonicalized dependency reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalRef {
    /// An external package version, e.g. `external://pypi/requests/2.31.0`
    External {
        ecosystem: String,
        package: String,
        version: String,
    },
    /// An internal entity, e.g. `internal://platform/billing-service`
    Internal { namespace: String, name: String },
}

impl CanonicalRef {
    /// Canonicalize any dependency reference string
    pub fn canonicalize(raw: &str) -> Result<Self, CanonicalizationError> {
        if let Some(rest) = raw.strip_prefix(EXTERNAL_PREFIX) {
            Self::canonicalize_external_parts(raw, rest)
        } else if let Some(rest) = raw.strip_prefix(INTERNAL_PREFIX) {
            Self::canonicalize_internal_parts(raw, rest)
        } else {
            Err(CanonicalizationError::MissingEcosystem(raw.to_string()))
        }
    }

    /// Canonicalize a reference that must be external
    pub fn canonicalize_external(raw: &str) -> Result<Self, CanonicalizationError> {
        match Self::canonicalize(raw)? {
            r @ CanonicalRef::External { .. } => Ok(r),
            CanonicalRef::Internal { .. } => Err(CanonicalizationError::Malformed {
                reference: raw.to_string(),
                reason: "expected an external:// reference".to_string(),
            }),
        }
    }

    /// Canonicalize a reference that must be internal
    pub fn canonicalize_internal(raw: &str) -> Result<Self, CanonicalizationError> {
        match Self::canonicalize(raw)? {
            r @ CanonicalRef::Internal { .. } => Ok(r),
            CanonicalRef::External { .. } => Err(CanonicalizationError::Malformed {
                reference: raw.to_string(),
                reason: "expected an internal:// reference".to_string(),
            }),
        }
    }

    fn canonicalize_external_parts(
        raw: &str,
        rest: &str,
    ) -> Result<Self, CanonicalizationError> {
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 3 {
            return Err(CanonicalizationError::Malformed {
                reference: raw.to_string(),
                reason: "expected external://<ecosystem>/<package>/<version>".to_string(),
            });
        }

        let ecosystem = segments[0];
        let package = segments[1..segments.len() - 1].join("/");
        let version = segments[segments.len() - 1];

        if ecosystem.is_empty() || package.is_empty() || version.is_empty() {
            return Err(CanonicalizationError::Malformed {
                reference: raw.to_string(),
                reason: "ecosystem, package, and version must be non-empty".to_string(),
            });
        }

        if !SUPPORTED_ECOSYSTEMS.contains(&ecosystem) {
            return Err(CanonicalizationError::UnsupportedEcosystem {
                reference: raw.to_string(),
                ecosystem: ecosystem.to_string(),
            });
        }

        check_version_pinned(raw, version)?;

        let package = normalize_package(ecosystem, &package);
        let version = normalize_version(ecosystem, version);

        Ok(CanonicalRef::External {
            ecosystem: ecosystem.to_string(),
            package,
            version,
        })
    }

    fn canonicalize_internal_parts(
        raw: &str,
        rest: &str,
    ) -> Result<Self, CanonicalizationError> {
        let mut parts = rest.splitn(2, '/');
        let namespace = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();

        if namespace.is_empty() || name.is_empty() {
            return Err(CanonicalizationError::Malformed {
                reference: raw.to_string(),
                reason: "expected internal://<namespace>/<entity-name>".to_string(),
            });
        }

        if !NAMESPACE_RE.is_match(namespace) {
            return Err(CanonicalizationError::InvalidNamespace {
                reference: raw.to_string(),
                namespace: namespace.to_string(),
            });
        }

        Ok(CanonicalRef::Internal {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Canonical identifier of the parent package for external refs
    pub fn package_id(&self) -> Option<String> {
        match self {
            CanonicalRef::External {
                ecosystem, package, ..
            } => Some(format!("{EXTERNAL_PREFIX}{ecosystem}/{package}")),
            CanonicalRef::Internal { .. } => None,
        }
    }

    /// Entity ID form used by the store: full URI for external refs,
    /// `namespace/name` for internal ones
    pub fn entity_id(&self) -> String {
        match self {
            CanonicalRef::External { .. } => self.to_string(),
            CanonicalRef::Internal { namespace, name } => format!("{namespace}/{name}"),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, CanonicalRef::External { .. })
    }
}

impl fmt::Display for CanonicalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalRef::External {
                ecosystem,
                package,
                version,
            } => write!(f, "{EXTERNAL_PREFIX}{ecosystem}/{package}/{version}"),
            CanonicalRef::Internal { namespace, name } => {
                write!(f, "{INTERNAL_PREFIX}{namespace}/{name}")
            }
        }
    }
}

impl FromStr for CanonicalRef {
    type Err = CanonicalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::canonicalize(s)
    }
}

/// Reject version ranges and mutable tags; only pinned versions are canonical
fn check_version_pinned(raw: &str, version: &str) -> Result<(), CanonicalizationError> {
    let reject = |reason: &str| {
        Err(CanonicalizationError::InvalidVersion {
            reference: raw.to_string(),
            version: version.to_string(),
            reason: reason.to_string(),
        })
    };

    if version.eq_ignore_ascii_case("latest") {
        return reject("mutable tags are not allowed");
    }
    if version.starts_with(['^', '~', '>', '<', '=']) {
        return reject("version ranges are not allowed");
    }
    if version.contains('*') || version.split('.').any(|p| p == "x" || p == "X") {
        return reject("wildcard versions are not allowed");
    }
    Ok(())
}

/// Go modules use domain-qualified paths and keep the `v` version prefix
fn is_go_ecosystem(ecosystem: &str) -> bool {
    matches!(ecosystem, "golang.org" | "github.com")
}

fn normalize_package(ecosystem: &str, package: &str) -> String {
    // Scoped npm names and Go module paths are case-significant
    let case_preserving =
        (ecosystem == "npm" && package.starts_with('@')) || is_go_ecosystem(ecosystem);
    let normalized = if case_preserving {
        package.to_string()
    } else {
        package.to_ascii_lowercase()
    };

    for (eco, from, to) in PACKAGE_ALIASES {
        if *eco == ecosystem && *from == normalized {
            return (*to).to_string();
        }
    }
    normalized
}

fn normalize_version(ecosystem: &str, version: &str) -> String {
    if is_go_ecosystem(ecosystem) {
        return version.to_string();
    }
    version
        .strip_prefix('v')
        .filter(|rest| rest.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .unwrap_or(version)
        .to_string()
}
