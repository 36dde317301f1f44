//! Artifact store.
//!
//! The store is the exclusive owner of [`Artifact`] values. Registration
//! order is recorded so that dependency-group ordering stays deterministic
//! across runs (hash-map iteration order is never observable from outside).

use std::collections::{BTreeSet, HashMap};

use regex::Regex;
use tracing::debug;

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::StoreError;

/// Keyed map from artifact name to its generated source and declared
/// dependencies, plus the import pool used for dependency extraction.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    artifacts: HashMap<String, Artifact>,
    registration_order: Vec<String>,
    /// Class name -> canonical import path, as offered to the oracle.
    import_pool: HashMap<String, String>,
}

impl ArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the import pool (name -> canonical import path).
    #[must_use]
    pub fn with_import_pool(mut self, pool: HashMap<String, String>) -> Self {
        self.import_pool = pool;
        self
    }

    /// Add a single import-pool entry.
    pub fn add_import(&mut self, name: impl Into<String>, path: impl Into<String>) {
        self.import_pool.insert(name.into(), path.into());
    }

    pub fn import_pool(&self) -> &HashMap<String, String> {
        &self.import_pool
    }

    /// Insert or overwrite an artifact with explicit dependencies.
    ///
    /// Overwrite replaces the whole record in one map insert, so a reader
    /// never observes the old path paired with the new source.
    pub fn put(
        &mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
        dependencies: Vec<String>,
    ) {
        let name = name.into();
        let artifact = Artifact {
            kind: ArtifactKind::classify(&name),
            name: name.clone(),
            path: path.into(),
            source: source.into(),
            declared_dependencies: dependencies,
        };

        if !self.artifacts.contains_key(&name) {
            self.registration_order.push(name.clone());
        }
        debug!(artifact = %name, deps = artifact.declared_dependencies.len(), "Artifact stored");
        self.artifacts.insert(name, artifact);
    }

    /// Insert or overwrite an artifact, extracting its declared dependencies
    /// from the source's import lines against the import pool.
    pub fn register_source(
        &mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) {
        let name = name.into();
        let source = source.into();
        let deps = extract_dependencies(&source, &self.import_pool, &name);
        self.put(name, path, source, deps);
    }

    /// Look up an artifact by name.
    pub fn get(&self, name: &str) -> Result<&Artifact, StoreError> {
        self.artifacts
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }

    /// Artifact names in first-registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registration_order.iter().map(String::as_str)
    }

    /// Position of an artifact in registration order.
    #[must_use]
    pub fn registration_index(&self, name: &str) -> Option<usize> {
        self.registration_order.iter().position(|n| n == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// One-hop union of declared dependencies across a set of artifacts.
    ///
    /// This is the extraction used to build minimal relevant-code contexts
    /// for regeneration prompts; it is deliberately not transitive.
    pub fn all_dependencies_of<'a, I>(&self, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut union = BTreeSet::new();
        for name in names {
            if let Ok(artifact) = self.get(name) {
                union.extend(artifact.declared_dependencies.iter().cloned());
            }
        }
        union
    }
}

/// Extract declared dependencies from import lines.
///
/// Any line that looks like an import statement is scanned for import-pool
/// names; matches are collected in first-appearance order, deduplicated,
/// and the artifact's own name is skipped.
fn extract_dependencies(
    source: &str,
    pool: &HashMap<String, String>,
    own_name: &str,
) -> Vec<String> {
    // Compiled per call; registration is not a hot path.
    let import_line = Regex::new(r"^\s*(?:from|import|use)\b").unwrap();
    let word = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();

    let mut deps = Vec::new();
    for line in source.lines() {
        if !import_line.is_match(line) {
            continue;
        }
        for m in word.find_iter(line) {
            let candidate = m.as_str();
            if candidate != own_name
                && pool.contains_key(candidate)
                && !deps.iter().any(|d| d == candidate)
            {
                deps.push(candidate.to_string());
            }
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> HashMap<String, String> {
        [
            ("Trade".to_string(), "app.models.trade".to_string()),
            ("Position".to_string(), "app.models.position".to_string()),
        ]
        .into()
    }

    #[test]
    fn test_get_not_found() {
        let store = ArtifactStore::new();
        let err = store.get("Missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(name) if name == "Missing"));
    }

    #[test]
    fn test_put_overwrites_atomically() {
        let mut store = ArtifactStore::new();
        store.put("Trade", "models/trade.py", "v1", vec![]);
        store.put("Trade", "models/trade2.py", "v2", vec!["Position".into()]);

        let artifact = store.get("Trade").unwrap();
        assert_eq!(artifact.path, "models/trade2.py");
        assert_eq!(artifact.source, "v2");
        assert_eq!(artifact.declared_dependencies, vec!["Position".to_string()]);
        // Overwrite does not duplicate the registration order entry.
        assert_eq!(store.names().count(), 1);
    }

    #[test]
    fn test_registration_order_is_stable() {
        let mut store = ArtifactStore::new();
        store.put("B", "b.py", "", vec![]);
        store.put("A", "a.py", "", vec![]);
        store.put("C", "c.py", "", vec![]);

        let names: Vec<_> = store.names().collect();
        assert_eq!(names, vec!["B", "A", "C"]);
        assert_eq!(store.registration_index("A"), Some(1));
    }

    #[test]
    fn test_import_extraction() {
        let mut store = ArtifactStore::new().with_import_pool(pool());
        let source = "from app.models.trade import Trade\n\
                      from app.models.position import Position, Trade\n\
                      class Settlement:\n    pass\n";
        store.register_source("Settlement", "models/settlement.py", source);

        let artifact = store.get("Settlement").unwrap();
        assert_eq!(
            artifact.declared_dependencies,
            vec!["Trade".to_string(), "Position".to_string()]
        );
    }

    #[test]
    fn test_import_extraction_skips_own_name_and_body() {
        let mut store = ArtifactStore::new().with_import_pool(pool());
        // "Position" only appears in the class body, not in an import line.
        let source = "from app.models.trade import Trade\n\
                      class Trade:\n    p = Position()\n";
        store.register_source("Trade", "models/trade.py", source);

        assert!(store.get("Trade").unwrap().declared_dependencies.is_empty());
    }

    #[test]
    fn test_all_dependencies_of_is_one_hop() {
        let mut store = ArtifactStore::new();
        store.put("A", "a.py", "", vec!["B".into()]);
        store.put("B", "b.py", "", vec!["C".into()]);
        store.put("C", "c.py", "", vec![]);

        let union = store.all_dependencies_of(["A", "B"]);
        // Only direct dependencies of A and B, not C's (empty) closure beyond.
        assert_eq!(
            union,
            BTreeSet::from(["B".to_string(), "C".to_string()])
        );
    }
}
