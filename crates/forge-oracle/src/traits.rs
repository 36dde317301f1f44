//! Oracle trait and context bundle.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::OracleError;

/// Everything the oracle gets to see for one generation call.
///
/// Ordered maps keep the rendered prompt deterministic.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    /// What to do with the rest of the bundle (generate, analyze, regenerate).
    pub instruction: String,
    /// Project specification text.
    pub specification: String,
    /// Schema/model description.
    pub schema: String,
    /// Already-generated code, keyed by artifact name.
    pub prior_code: BTreeMap<String, String>,
    /// Free-form user feedback.
    pub user_feedback: Option<String>,
    /// Available class names mapped to their canonical import paths.
    pub import_pool: BTreeMap<String, String>,
    /// Accumulated reflection analyses from earlier failed attempts.
    pub reflections: Vec<String>,
}

impl ContextBundle {
    #[must_use]
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_specification(mut self, spec: impl Into<String>) -> Self {
        self.specification = spec.into();
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    #[must_use]
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.user_feedback = Some(feedback.into());
        self
    }

    #[must_use]
    pub fn with_import_pool(mut self, pool: BTreeMap<String, String>) -> Self {
        self.import_pool = pool;
        self
    }

    #[must_use]
    pub fn with_reflections(mut self, reflections: Vec<String>) -> Self {
        self.reflections = reflections;
        self
    }

    /// Add one already-generated source.
    pub fn add_prior_code(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.prior_code.insert(name.into(), source.into());
    }

    /// Flatten the bundle into a single prompt text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("=== INSTRUCTION ===\n");
        out.push_str(&self.instruction);
        out.push('\n');

        if !self.specification.is_empty() {
            out.push_str("\n=== SPECIFICATION ===\n");
            out.push_str(&self.specification);
            out.push('\n');
        }

        if !self.schema.is_empty() {
            out.push_str("\n=== SCHEMA ===\n");
            out.push_str(&self.schema);
            out.push('\n');
        }

        if !self.import_pool.is_empty() {
            out.push_str("\n=== AVAILABLE IMPORTS ===\n");
            for (name, path) in &self.import_pool {
                out.push_str(&format!("{name}: {path}\n"));
            }
        }

        if !self.prior_code.is_empty() {
            out.push_str("\n=== EXISTING CODE ===\n");
            for (name, source) in &self.prior_code {
                out.push_str(&format!("--- {name} ---\n{source}\n"));
            }
        }

        if let Some(feedback) = &self.user_feedback {
            out.push_str("\n=== USER FEEDBACK ===\n");
            out.push_str(feedback);
            out.push('\n');
        }

        if !self.reflections.is_empty() {
            out.push_str("\n=== PRIOR FAILURE ANALYSES ===\n");
            for (i, reflection) in self.reflections.iter().enumerate() {
                out.push_str(&format!("--- Analysis {} ---\n{}\n", i + 1, reflection));
            }
        }

        out
    }
}

/// Trait for the code-generation oracle.
///
/// Implement this to plug in a concrete LLM provider; the engine only ever
/// calls `generate` and never retries oracle failures itself.
#[async_trait]
pub trait GenerationOracle: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// Generate source text for the given context.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails or returns nothing.
    async fn generate(&self, bundle: &ContextBundle) -> Result<String, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sections() {
        let mut bundle = ContextBundle::new("Generate the Trade model")
            .with_specification("A trading system")
            .with_import_pool(BTreeMap::from([(
                "Trade".to_string(),
                "app.models.trade".to_string(),
            )]))
            .with_reflections(vec!["off-by-one in row count".to_string()]);
        bundle.add_prior_code("Counterparty", "class Counterparty: pass");

        let prompt = bundle.render();
        assert!(prompt.contains("=== INSTRUCTION ===\nGenerate the Trade model"));
        assert!(prompt.contains("Trade: app.models.trade"));
        assert!(prompt.contains("--- Counterparty ---"));
        assert!(prompt.contains("Analysis 1"));
        // No feedback section when none was given.
        assert!(!prompt.contains("USER FEEDBACK"));
    }
}
