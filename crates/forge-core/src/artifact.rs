//! Artifact model.
//!
//! An artifact is one generated source file. Its kind is classified once at
//! registration from the project's naming conventions and carried as an
//! explicit tag, so downstream decisions (test template flavor, fixture
//! sizing) never re-derive it by string matching.

use serde::{Deserialize, Serialize};

/// What role an artifact plays in the generated project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// A plain data-holding entity.
    Entity,
    /// An ingestion/upload counterpart of an entity (the `XUpload` convention).
    Ingestion,
    /// A report artifact asserting over a bounded, known dataset.
    Report,
}

impl ArtifactKind {
    /// Classify an artifact name by convention.
    ///
    /// `*Upload` marks the data-entry counterpart of an entity; a name
    /// containing `Report` marks a report.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        if name.ends_with("Upload") {
            Self::Ingestion
        } else if name.contains("Report") {
            Self::Report
        } else {
            Self::Entity
        }
    }
}

/// One generated source file tracked by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact name (class name within the generated project).
    pub name: String,
    /// Relative file path within the project layout.
    pub path: String,
    /// Generated source text.
    pub source: String,
    /// Names of artifacts this one references, in declaration order.
    pub declared_dependencies: Vec<String>,
    /// Kind tag, assigned at registration.
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Name of this artifact's upload counterpart (`<name>Upload`).
    #[must_use]
    pub fn upload_counterpart(&self) -> String {
        upload_counterpart(&self.name)
    }
}

/// Upload-counterpart name for an entity name.
#[must_use]
pub fn upload_counterpart(name: &str) -> String {
    format!("{name}Upload")
}

/// Base entity name for an ingestion artifact name, if it follows the
/// `XUpload` convention.
#[must_use]
pub fn base_of_upload(name: &str) -> Option<&str> {
    name.strip_suffix("Upload").filter(|base| !base.is_empty())
}
