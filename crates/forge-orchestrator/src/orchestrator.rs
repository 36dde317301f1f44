//! Top-level pipeline.
//!
//! One cooperative loop drives everything: build the dependency graph,
//! partition it into strongly-connected groups, then for each group in
//! order generate a test, run the bounded execute/reflect/regenerate loop,
//! checkpoint the result and stream progress. Groups are processed strictly
//! one at a time; the only OS-level concurrency is the isolated worker
//! process. A failed group is recorded and the pipeline moves on.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use forge_core::{ArtifactKind, ArtifactStore, DependencyGraph, ProjectWriter};
use forge_oracle::{split_response, ContextBundle, GenerationOracle, OracleError};
use forge_worker::TestWorker;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::error::OrchestratorError;
use crate::progress::{progress_channel, ProgressEvent, ProgressSender};
use crate::reflection::ReflectionEngine;
use crate::retry::{GroupRunContext, GroupState, RetryController};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub project_name: String,
    /// Project specification text passed to every oracle call.
    pub specification: String,
    /// Schema/model description passed to every oracle call.
    pub schema: String,
    /// Execution budget per group.
    pub max_attempts: u32,
    /// Directory tests are written under, relative to the project root.
    pub tests_dir: String,
    /// Upstream fixture cardinality for report-artifact tests.
    pub report_fixture_count: u32,
    /// Progress channel capacity.
    pub progress_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            specification: String::new(),
            schema: String::new(),
            max_attempts: 5,
            tests_dir: "tests".to_string(),
            report_fixture_count: 1,
            progress_capacity: 64,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
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
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// One strongly-connected group scheduled for testing.
#[derive(Debug, Clone)]
pub struct TestGroup {
    pub members: Vec<String>,
    /// Dependencies of the member set that fall outside it.
    pub external_dependencies: BTreeSet<String>,
    /// Store name of the group's generated test artifact.
    pub test_artifact: String,
}

/// A group whose attempt budget ran out, with its last diagnostic.
#[derive(Debug, Clone)]
pub struct ExhaustedGroup {
    pub members: Vec<String>,
    pub diagnostic: String,
}

/// Per-group reporting line in the pipeline result.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub members: Vec<String>,
    /// Executions performed; zero when test generation itself failed.
    pub attempts: u32,
    pub duration: Duration,
    pub success: bool,
}

/// What the pipeline produced.
#[derive(Debug)]
pub struct PipelineResult {
    /// Identifies this run in logs and events.
    pub run_id: Uuid,
    /// Member sets that passed, in processing order.
    pub succeeded: Vec<Vec<String>>,
    /// Member sets that failed for good, with the last captured diagnostic.
    pub exhausted: Vec<ExhaustedGroup>,
    /// One summary per processed group, in processing order.
    pub groups: Vec<GroupSummary>,
    /// Checkpoint ids in creation order.
    pub checkpoint_ids: Vec<String>,
}

impl PipelineResult {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            succeeded: Vec::new(),
            exhausted: Vec::new(),
            groups: Vec::new(),
            checkpoint_ids: Vec::new(),
        }
    }
}

/// Which test template a group gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupFlavor {
    /// Sole-member ingestion artifact nothing else depends on: the test
    /// reads a real input file and asserts per-row/per-column equality
    /// against the persisted records.
    Upload,
    /// Report artifact: upstream fixtures use a fixed small cardinality.
    Report,
    /// Everything else: generic fixture-replay test.
    Generic,
}

fn group_flavor(store: &ArtifactStore, graph: &DependencyGraph, members: &[String]) -> GroupFlavor {
    if let [sole] = members {
        let is_ingestion = store
            .get(sole)
            .map(|a| a.kind == ArtifactKind::Ingestion)
            .unwrap_or(false);
        if is_ingestion && graph.dependents_of(sole).is_empty() {
            return GroupFlavor::Upload;
        }
    }
    let any_report = members.iter().any(|m| {
        store
            .get(m)
            .map(|a| a.kind == ArtifactKind::Report)
            .unwrap_or(false)
    });
    if any_report {
        GroupFlavor::Report
    } else {
        GroupFlavor::Generic
    }
}

/// Store name for a group's test artifact.
fn test_artifact_name(members: &[String]) -> String {
    let joined = members
        .iter()
        .map(|m| m.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");
    format!("test_{joined}")
}

/// Drives the full generate/test/retry pipeline.
pub struct Orchestrator<W> {
    oracle: Arc<dyn GenerationOracle>,
    worker: W,
    store: ArtifactStore,
    writer: Option<ProjectWriter>,
    checkpoints: CheckpointManager,
    reflection: ReflectionEngine,
    retry: RetryController,
    config: OrchestratorConfig,
    progress: ProgressSender,
    progress_rx: Option<mpsc::Receiver<ProgressEvent>>,
}

impl<W: TestWorker> Orchestrator<W> {
    #[must_use]
    pub fn new(
        oracle: Arc<dyn GenerationOracle>,
        worker: W,
        store: ArtifactStore,
        config: OrchestratorConfig,
    ) -> Self {
        let (progress, progress_rx) = progress_channel(config.progress_capacity);
        Self {
            reflection: ReflectionEngine::new(Arc::clone(&oracle)),
            retry: RetryController::new(config.max_attempts),
            oracle,
            worker,
            store,
            writer: None,
            checkpoints: CheckpointManager::new(),
            config,
            progress,
            progress_rx: Some(progress_rx),
        }
    }

    /// Mirror generated tests to an on-disk project layout.
    #[must_use]
    pub fn with_writer(mut self, writer: ProjectWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Take the receiving half of the progress stream.
    ///
    /// Must happen before [`run`](Self::run): an untaken receiver is
    /// dropped when the run starts, and this then yields `None`.
    pub fn take_progress(&mut self) -> Option<mpsc::Receiver<ProgressEvent>> {
        self.progress_rx.take()
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Read-only checkpoint retrieval by id.
    pub fn restore_from_checkpoint(&self, id: &str) -> Result<&Checkpoint, OrchestratorError> {
        self.checkpoints.restore(id)
    }

    /// Run the pipeline over every dependency group.
    ///
    /// # Errors
    ///
    /// Returns an error only when the pipeline itself cannot proceed (store
    /// miss, worker misconfiguration). Oracle failures and exhausted groups
    /// are recorded in the result and do not abort the run.
    #[instrument(skip(self), fields(project = %self.config.project_name))]
    pub async fn run(&mut self) -> Result<PipelineResult, OrchestratorError> {
        // An untaken receiver would fill the bounded channel and stall the
        // loop once enough events accumulate.
        drop(self.progress_rx.take());
        let run_id = Uuid::new_v4();
        let graph = DependencyGraph::build(&self.store);
        let groups = graph.strongly_connected_components();
        info!(%run_id, groups = groups.len(), "Pipeline started");

        let mut result = PipelineResult::new(run_id);
        let mut prior_tests: Vec<(String, String)> = Vec::new();

        for members in groups {
            let started = Instant::now();
            self.progress
                .emit(ProgressEvent::GroupStarted {
                    members: members.clone(),
                })
                .await;

            let group = TestGroup {
                external_dependencies: graph.external_dependencies_of_group(&members),
                test_artifact: test_artifact_name(&members),
                members,
            };

            let (test_path, test_source) =
                match self.generate_group_test(&group, &graph, &prior_tests).await {
                    Ok(written) => written,
                    Err(OrchestratorError::Oracle(err)) => {
                        warn!(%err, members = ?group.members, "Test generation failed");
                        self.record_oracle_failure(&mut result, &group, &err, started.elapsed())
                            .await;
                        continue;
                    }
                    Err(other) => return Err(other),
                };
            prior_tests.push((group.test_artifact.clone(), test_source.clone()));
            self.progress
                .emit(ProgressEvent::TestWritten {
                    path: test_path.clone(),
                })
                .await;

            let test_file_name = test_path
                .rsplit('/')
                .next()
                .unwrap_or(test_path.as_str())
                .to_string();
            let report = {
                let mut ctx = GroupRunContext {
                    store: &mut self.store,
                    reflection: &self.reflection,
                    members: &group.members,
                    test_source: &test_source,
                    test_file_name: &test_file_name,
                    project_name: &self.config.project_name,
                    specification: &self.config.specification,
                    schema: &self.config.schema,
                    progress: &self.progress,
                };
                self.retry.run_group_with_retry(&mut ctx, &self.worker).await
            };

            match report {
                Ok(report) => {
                    let success = report.state == GroupState::Done;
                    // Regenerated member sources are mirrored to disk once
                    // the group settles, in their final form.
                    if !report.reflections.is_empty() {
                        self.mirror_members(&group.members).await?;
                    }
                    // Snapshot the graph as it stands now, so checkpoints
                    // record edges added by regenerated sources.
                    let id = self.checkpoints.save(
                        &group.members,
                        report.outcome.clone(),
                        DependencyGraph::build(&self.store).snapshot(),
                    );
                    result.checkpoint_ids.push(id);
                    result.groups.push(GroupSummary {
                        members: group.members.clone(),
                        attempts: report.attempts,
                        duration: started.elapsed(),
                        success,
                    });
                    if success {
                        result.succeeded.push(group.members.clone());
                    } else {
                        result.exhausted.push(ExhaustedGroup {
                            members: group.members.clone(),
                            diagnostic: report.outcome.diagnostic(),
                        });
                    }
                    self.progress
                        .emit(ProgressEvent::GroupCompleted {
                            members: group.members.clone(),
                            success,
                        })
                        .await;
                }
                Err(OrchestratorError::Oracle(err)) => {
                    warn!(%err, members = ?group.members, "Regeneration failed");
                    self.record_oracle_failure(&mut result, &group, &err, started.elapsed())
                        .await;
                }
                Err(other) => return Err(other),
            }
        }

        self.progress.emit(ProgressEvent::Done).await;
        info!(
            succeeded = result.succeeded.len(),
            exhausted = result.exhausted.len(),
            "Pipeline finished"
        );
        Ok(result)
    }

    /// Generate the group's test artifact and mirror it to disk.
    ///
    /// Returns the relative path the test was written under together with
    /// its source. Tests stay out of the artifact store so dependency
    /// snapshots only cover class artifacts.
    async fn generate_group_test(
        &self,
        group: &TestGroup,
        graph: &DependencyGraph,
        prior_tests: &[(String, String)],
    ) -> Result<(String, String), OrchestratorError> {
        let instruction = self.test_instruction(group, graph);
        let mut bundle = ContextBundle::new(instruction)
            .with_specification(&self.config.specification)
            .with_schema(&self.config.schema)
            .with_import_pool(
                self.store
                    .import_pool()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );

        for member in &group.members {
            bundle.add_prior_code(member.clone(), self.store.get(member)?.source.clone());
        }
        let one_hop = self
            .store
            .all_dependencies_of(group.members.iter().map(String::as_str));
        for dep in &one_hop {
            if let Ok(artifact) = self.store.get(dep) {
                bundle.add_prior_code(dep.clone(), artifact.source.clone());
            }
        }
        // Earlier groups' tests, so this one can reuse established fixtures.
        for (name, source) in prior_tests {
            bundle.add_prior_code(name.clone(), source.clone());
        }

        let text = self.oracle.generate(&bundle).await?;
        let file = split_response(&text)?
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::Unparseable("empty test response".to_string()))?;

        let path = if file.path.is_empty() {
            format!("{}/{}.py", self.config.tests_dir, group.test_artifact)
        } else {
            file.path
        };
        if let Some(writer) = &self.writer {
            writer.write(&path, &file.source).await?;
        }
        Ok((path, file.source))
    }

    /// Write the current source of each member (and its regenerated upload
    /// or base counterpart) to the project layout.
    async fn mirror_members(&self, members: &[String]) -> Result<(), OrchestratorError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let mut names: Vec<String> = members.to_vec();
        for member in members {
            let upload = forge_core::upload_counterpart(member);
            if self.store.contains(&upload) && !names.contains(&upload) {
                names.push(upload);
            }
            if let Some(base) = forge_core::base_of_upload(member) {
                if self.store.contains(base) && !names.iter().any(|n| n == base) {
                    names.push(base.to_string());
                }
            }
        }
        for name in names {
            let artifact = self.store.get(&name)?;
            writer.write(&artifact.path, &artifact.source).await?;
        }
        Ok(())
    }

    fn test_instruction(&self, group: &TestGroup, graph: &DependencyGraph) -> String {
        let members = group.members.join(", ");
        match group_flavor(&self.store, graph, &group.members) {
            GroupFlavor::Upload => format!(
                "Generate a test for the ingestion artifact {members}. The \
                 test reads the real input file, ingests it, and asserts \
                 per-row and per-column equality between the file contents \
                 and the persisted records. Compare floating-point values \
                 rounded to 2 decimal places. Respond with a single file \
                 under a '### <path>' header."
            ),
            GroupFlavor::Report => format!(
                "Generate a test for the report artifact group [{members}]. \
                 Create exactly {count} instance(s) of each upstream \
                 dependency as fixture data, then assert the report's \
                 output against that known dataset. Respond with a single \
                 file under a '### <path>' header.",
                count = self.config.report_fixture_count
            ),
            GroupFlavor::Generic => format!(
                "Generate a test for the artifact group [{members}]. Build \
                 fixture data for the group's dependencies, exercise each \
                 member's behavior, and assert the results. Respond with a \
                 single file under a '### <path>' header."
            ),
        }
    }

    async fn record_oracle_failure(
        &self,
        result: &mut PipelineResult,
        group: &TestGroup,
        err: &OracleError,
        duration: Duration,
    ) {
        self.progress
            .emit(ProgressEvent::OracleFailed {
                members: group.members.clone(),
                message: err.to_string(),
            })
            .await;
        result.exhausted.push(ExhaustedGroup {
            members: group.members.clone(),
            diagnostic: err.to_string(),
        });
        result.groups.push(GroupSummary {
            members: group.members.clone(),
            attempts: 0,
            duration,
            success: false,
        });
    }
}
