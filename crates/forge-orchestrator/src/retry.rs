//! Per-group retry loop.
//!
//! State machine: `GenerateTest -> Execute -> Done` on success, or
//! `Execute -> ReflectAndRegenerate -> Execute` on failure, up to the
//! attempt budget, after which the group is `Exhausted`. Exhaustion is a
//! recorded failure, not a pipeline abort.
//!
//! A worker setup error (failed migration) short-circuits the group
//! immediately without reflecting: it signals a systemic problem that
//! regenerating the class code cannot fix, so burning the remaining
//! attempts on it would be pointless.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use forge_core::{base_of_upload, upload_counterpart, ArtifactStore};
use forge_oracle::{split_response, ContextBundle};
use forge_worker::{TestOutcome, TestWorker};

use crate::error::OrchestratorError;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::reflection::{FailureContext, ReflectionEngine};

/// Where a group currently is in its retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    GenerateTest,
    Execute,
    ReflectAndRegenerate,
    Done,
    Exhausted,
}

/// Final report for one group's retry loop.
#[derive(Debug)]
pub struct GroupReport {
    /// Terminal state, `Done` or `Exhausted`.
    pub state: GroupState,
    /// Outcome of the last execution.
    pub outcome: TestOutcome,
    /// Number of executions performed.
    pub attempts: u32,
    /// Accumulated reflection analyses, in order.
    pub reflections: Vec<String>,
}

/// Everything the retry loop needs for one group.
pub struct GroupRunContext<'a> {
    pub store: &'a mut ArtifactStore,
    pub reflection: &'a ReflectionEngine,
    /// Group member artifact names.
    pub members: &'a [String],
    /// Source of the generated test, for reflection prompts.
    pub test_source: &'a str,
    /// File name sent to the isolated worker.
    pub test_file_name: &'a str,
    pub project_name: &'a str,
    pub specification: &'a str,
    pub schema: &'a str,
    pub progress: &'a ProgressSender,
}

/// Bounded generate/execute/reflect loop for one group.
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_attempts: u32,
}

impl Default for RetryController {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryController {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Execute the group's test, reflecting and regenerating between failed
    /// attempts, until success or the attempt budget runs out.
    ///
    /// # Errors
    ///
    /// Returns an error when an oracle call or a store lookup fails; test
    /// failures are not errors, they drive the loop.
    #[instrument(skip_all, fields(members = ?ctx.members, max_attempts = self.max_attempts))]
    pub async fn run_group_with_retry<W>(
        &self,
        ctx: &mut GroupRunContext<'_>,
        worker: &W,
    ) -> Result<GroupReport, OrchestratorError>
    where
        W: TestWorker + ?Sized,
    {
        let mut reflections: Vec<String> = Vec::new();
        let mut latest_corrections: HashMap<String, String> = HashMap::new();
        let mut attempts = 0u32;
        let mut state = GroupState::GenerateTest;
        debug!(?state, "Entering group");

        loop {
            state = GroupState::Execute;
            debug!(?state, attempt = attempts + 1, "Executing group test");
            attempts += 1;
            let outcome = worker
                .execute_test(ctx.test_file_name, ctx.project_name)
                .await?;

            if outcome.success {
                info!(attempts, "Group passed");
                return Ok(GroupReport {
                    state: GroupState::Done,
                    outcome,
                    attempts,
                    reflections,
                });
            }

            ctx.progress
                .emit(ProgressEvent::AttemptFailed {
                    members: ctx.members.to_vec(),
                    attempt: attempts,
                    diagnostic: outcome.diagnostic(),
                })
                .await;

            if outcome.is_setup_error() {
                warn!("Worker setup error, group short-circuited");
                return Ok(GroupReport {
                    state: GroupState::Exhausted,
                    outcome,
                    attempts,
                    reflections,
                });
            }

            if attempts >= self.max_attempts {
                warn!(attempts, "Attempt budget exhausted");
                return Ok(GroupReport {
                    state: GroupState::Exhausted,
                    outcome,
                    attempts,
                    reflections,
                });
            }

            state = GroupState::ReflectAndRegenerate;
            debug!(?state, "Reflecting and regenerating group members");
            self.reflect_and_regenerate(ctx, &outcome, &mut reflections, &mut latest_corrections)
                .await?;
        }
    }

    /// One repair cycle: reflect on the failure and regenerate every member
    /// artifact, plus each member's upload or base counterpart when one
    /// exists, since the test exercises both in lockstep.
    async fn reflect_and_regenerate(
        &self,
        ctx: &mut GroupRunContext<'_>,
        outcome: &TestOutcome,
        reflections: &mut Vec<String>,
        latest_corrections: &mut HashMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        let relevant = relevant_sources(ctx.store, ctx.members);
        let test_code = ctx.test_source.to_string();

        for target in regeneration_targets(ctx.store, ctx.members) {
            let (class_code, path) = {
                let artifact = ctx.store.get(&target)?;
                (artifact.source.clone(), artifact.path.clone())
            };

            let failure = FailureContext {
                test_code: test_code.clone(),
                class_code: class_code.clone(),
                error_message: outcome.diagnostic(),
                latest_correction: latest_corrections.get(&target).cloned(),
            };
            let analysis = ctx
                .reflection
                .reflect(&failure, ctx.specification, &relevant)
                .await?;
            reflections.push(analysis);

            let oracle = Arc::clone(ctx.reflection.oracle());
            let mut bundle = ContextBundle::new(format!(
                "Regenerate the complete source for {target}, correcting the \
                 diagnosed failure. Respond with the new source only."
            ))
            .with_specification(ctx.specification)
            .with_schema(ctx.schema)
            .with_import_pool(
                ctx.store
                    .import_pool()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
            for (name, source) in &relevant {
                bundle.add_prior_code(name.clone(), source.clone());
            }
            bundle.add_prior_code(&target, &class_code);
            bundle.add_prior_code("failing test", &test_code);

            let new_source = ctx
                .reflection
                .regenerate(reflections, |accumulated| async move {
                    let bundle = bundle.with_reflections(accumulated);
                    let text = oracle.generate(&bundle).await?;
                    let first = split_response(&text)?.into_iter().next();
                    Ok(first.map_or(text, |file| file.source))
                })
                .await?;

            latest_corrections.insert(target.clone(), new_source.clone());
            ctx.store.register_source(&target, path, new_source);
            debug!(artifact = %target, "Artifact regenerated");
        }
        Ok(())
    }
}

/// Sources of the group's one-hop dependency union, for prompt context.
fn relevant_sources(store: &ArtifactStore, members: &[String]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in store.all_dependencies_of(members.iter().map(String::as_str)) {
        if let Ok(artifact) = store.get(&name) {
            out.insert(name.clone(), artifact.source.clone());
        }
    }
    out
}

/// Members plus their upload/base counterparts, deduplicated, in member
/// order.
fn regeneration_targets(store: &ArtifactStore, members: &[String]) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    let push = |name: String, targets: &mut Vec<String>| {
        if !targets.contains(&name) {
            targets.push(name);
        }
    };
    for member in members {
        push(member.clone(), &mut targets);
        let upload = upload_counterpart(member);
        if store.contains(&upload) {
            push(upload, &mut targets);
        }
        if let Some(base) = base_of_upload(member) {
            if store.contains(base) {
                push(base.to_string(), &mut targets);
            }
        }
    }
    targets
}
