//! Failure reflection.
//!
//! Reflection and regeneration are two separate oracle calls on purpose:
//! the reflection call is framed "analyze, do not fix" and produces a
//! concise natural-language diagnosis, which the later regeneration call
//! consumes instead of re-deriving the root cause. The analyses accumulate
//! across retries of the same group and double as an audit trail.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument};

use forge_oracle::{ContextBundle, GenerationOracle, OracleError};

/// What the reflection call gets to look at.
#[derive(Debug, Clone)]
pub struct FailureContext {
    /// The generated test that failed.
    pub test_code: String,
    /// The generated class under test.
    pub class_code: String,
    /// Diagnostic extracted from the test outcome.
    pub error_message: String,
    /// The most recent regeneration attempt for this artifact, if any.
    pub latest_correction: Option<String>,
}

/// Drives the analyze-then-regenerate repair cycle.
pub struct ReflectionEngine {
    oracle: Arc<dyn GenerationOracle>,
}

impl ReflectionEngine {
    #[must_use]
    pub fn new(oracle: Arc<dyn GenerationOracle>) -> Self {
        Self { oracle }
    }

    #[must_use]
    pub fn oracle(&self) -> &Arc<dyn GenerationOracle> {
        &self.oracle
    }

    /// Produce a root-cause analysis of one failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the oracle call fails; reflection is never
    /// retried here.
    #[instrument(skip_all, fields(oracle = self.oracle.name()))]
    pub async fn reflect(
        &self,
        context: &FailureContext,
        specification: &str,
        relevant_code: &BTreeMap<String, String>,
    ) -> Result<String, OracleError> {
        let mut bundle = ContextBundle::new(
            "Analyze why the test below fails against the class code. \
             Identify the root cause only. Do not fix the code and do not \
             rewrite it; respond with a short diagnosis.",
        )
        .with_specification(specification);

        for (name, source) in relevant_code {
            bundle.add_prior_code(name.clone(), source.clone());
        }
        bundle.add_prior_code("failing test", &context.test_code);
        bundle.add_prior_code("class under test", &context.class_code);
        if let Some(correction) = &context.latest_correction {
            bundle.add_prior_code("latest attempted correction", correction);
        }
        bundle = bundle.with_feedback(format!("Test error: {}", context.error_message));

        let analysis = self.oracle.generate(&bundle).await?;
        debug!(chars = analysis.len(), "Reflection produced");
        Ok(analysis)
    }

    /// Regenerate an artifact, feeding the accumulated analyses to a
    /// caller-supplied regeneration closure.
    ///
    /// The closure owns the exact generation-call shape; this keeps the
    /// engine decoupled from how each artifact kind is prompted.
    ///
    /// # Errors
    ///
    /// Propagates the closure's oracle error unchanged.
    pub async fn regenerate<F, Fut>(
        &self,
        accumulated_reflections: &[String],
        regenerate_fn: F,
    ) -> Result<String, OracleError>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<String, OracleError>>,
    {
        regenerate_fn(accumulated_reflections.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Oracle that records the rendered prompt and echoes a canned reply.
    struct RecordingOracle {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    impl RecordingOracle {
        fn new(reply: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl GenerationOracle for RecordingOracle {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, bundle: &ContextBundle) -> Result<String, OracleError> {
            self.prompts.lock().unwrap().push(bundle.render());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_reflect_frames_analysis_not_fix() {
        let oracle = Arc::new(RecordingOracle::new("the fixture count is off by one"));
        let engine = ReflectionEngine::new(oracle.clone());

        let context = FailureContext {
            test_code: "def test_rows(): assert count == 2".to_string(),
            class_code: "class Trade: pass".to_string(),
            error_message: "AssertionError: 1 != 2".to_string(),
            latest_correction: None,
        };
        let analysis = engine
            .reflect(&context, "trading system", &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(analysis, "the fixture count is off by one");
        let prompt = oracle.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Do not fix"));
        assert!(prompt.contains("AssertionError: 1 != 2"));
        assert!(prompt.contains("failing test"));
    }

    #[tokio::test]
    async fn test_regenerate_passes_accumulated_reflections() {
        let engine = ReflectionEngine::new(Arc::new(RecordingOracle::new("")));
        let reflections = vec!["first analysis".to_string(), "second analysis".to_string()];

        let source = engine
            .regenerate(&reflections, |received| async move {
                assert_eq!(received.len(), 2);
                assert_eq!(received[1], "second analysis");
                Ok("class Trade: pass".to_string())
            })
            .await
            .unwrap();

        assert_eq!(source, "class Trade: pass");
    }
}
