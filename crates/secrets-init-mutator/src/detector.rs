//! Secret manager reference detection
//!
//! A value needs secret-aware execution when it names an entry in one of
//! the supported secret managers. Detection is purely prefix based; adding a
//! backend means adding a row to [`REFERENCE_PATTERNS`].

/// A recognised secret-manager reference shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePattern {
    /// Backend the reference points at
    pub backend: &'static str,
    /// Required prefix of the value
    pub prefix: &'static str,
    /// Substring that must also appear, when the prefix alone is ambiguous
    pub marker: Option<&'static str>,
}

impl ReferencePattern {
    fn matches(&self, value: &str) -> bool {
        value.starts_with(self.prefix) && self.marker.is_none_or(|m| value.contains(m))
    }
}

/// Every supported reference shape
pub const REFERENCE_PATTERNS: &[ReferencePattern] = &[
    ReferencePattern {
        backend: "aws-secrets-manager",
        prefix: "arn:aws:secretsmanager",
        marker: None,
    },
    // SSM ARNs also name documents and sessions; only parameters are secrets
    ReferencePattern {
        backend: "aws-ssm-parameter-store",
        prefix: "arn:aws:ssm",
        marker: Some(":parameter/"),
    },
    ReferencePattern {
        backend: "gcp-secret-manager",
        prefix: "gcp:secretmanager:",
        marker: None,
    },
];

/// Whether `value` names a supported secret-manager reference
pub fn is_secret_reference(value: &str) -> bool {
    REFERENCE_PATTERNS.iter().any(|p| p.matches(value))
}

/// The backend a reference points at, if any
pub fn reference_backend(value: &str) -> Option<&'static str> {
    REFERENCE_PATTERNS
        .iter()
        .find(|p| p.matches(value))
        .map(|p| p.backend)
}
