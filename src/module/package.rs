use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Namespace prefixed to every field label when fingerprinting.
pub const FINGERPRINT_NAMESPACE: &str = "FOSSA";

/// Uniquely identifies one resolved package.
///
/// Two ids with equal `(package_type, location, name, revision)` are the same
/// package. `package_type` is a fetcher label (`npm`, `mvn`, `archive`, ...)
/// and is a separate namespace from the module [`Type`](super::Type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    #[serde(rename = "type")]
    pub package_type: String,
    pub location: String,
    pub name: String,
    pub revision: String,
}

impl PackageId {
    pub fn new(
        package_type: impl Into<String>,
        location: impl Into<String>,
        name: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            package_type: package_type.into(),
            location: location.into(),
            name: name.into(),
            revision: revision.into(),
        }
    }

    /// Opaque, stable identifier for this package: hex-encoded SHA-256 of the
    /// field-labeled tuple. Empty fields are valid input.
    pub fn fingerprint(&self) -> String {
        self.fingerprint_in(FINGERPRINT_NAMESPACE)
    }

    pub fn fingerprint_in(&self, namespace: &str) -> String {
        let canonical = [
            format!("{namespace}-PackageID-Type: {}", self.package_type),
            format!("{namespace}-PackageID-Location: {}", self.location),
            format!("{namespace}-PackageID-Name: {}", self.name),
            format!("{namespace}-PackageID-Revision: {}", self.revision),
        ]
        .join("\n");

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Renders `type+name$revision@location`.
///
/// The delimiters are not escaped, and names (`@scope/pkg`), revisions and
/// locations may contain them, so this form cannot be parsed back into a
/// [`PackageId`]. Use [`PackageId::fingerprint`] as a key.
impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}${}@{}",
            self.package_type, self.name, self.revision, self.location
        )
    }
}
