//! End-to-end pipeline scenarios with scripted oracle and worker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use forge_core::ArtifactStore;
use forge_oracle::{ContextBundle, GenerationOracle, OracleError};
use forge_orchestrator::{Orchestrator, OrchestratorConfig, ProgressEvent};
use forge_worker::{ConsoleOutput, TestOutcome, TestResponse, TestWorker, WorkerError};

/// Oracle that answers test-generation, reflection and regeneration
/// prompts with canned text, recording how many accumulated reflections
/// each regeneration call saw.
struct ScriptedOracle {
    regen_reflection_counts: Mutex<Vec<usize>>,
    regen_reply: String,
}

impl ScriptedOracle {
    fn new() -> Self {
        Self::with_regen_reply("class Fixed: pass")
    }

    fn with_regen_reply(reply: &str) -> Self {
        Self {
            regen_reflection_counts: Mutex::new(Vec::new()),
            regen_reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl GenerationOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, bundle: &ContextBundle) -> Result<String, OracleError> {
        if bundle.instruction.starts_with("Analyze") {
            return Ok("fixture cardinality is wrong".to_string());
        }
        if bundle.instruction.starts_with("Regenerate") {
            self.regen_reflection_counts
                .lock()
                .unwrap()
                .push(bundle.reflections.len());
            return Ok(self.regen_reply.clone());
        }
        Ok("### tests/test_generated.py\nassert True".to_string())
    }
}

/// Worker serving a scripted outcome sequence; the last entry repeats.
struct ScriptedWorker {
    script: Mutex<Vec<TestOutcome>>,
    executions: Arc<AtomicU32>,
}

impl ScriptedWorker {
    fn new(script: Vec<TestOutcome>) -> Self {
        Self {
            script: Mutex::new(script),
            executions: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Counter handle that stays valid after the worker moves into the
    /// orchestrator.
    fn execution_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.executions)
    }

    fn always_passing() -> Self {
        Self::new(vec![TestOutcome::passed(vec!["ok".into()], vec![])])
    }
}

#[async_trait]
impl TestWorker for ScriptedWorker {
    async fn execute_test(
        &self,
        _test_file_name: &str,
        _project_name: &str,
    ) -> Result<TestOutcome, WorkerError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.remove(0))
        } else {
            Ok(script[0].clone())
        }
    }
}

fn assertion_failure() -> TestOutcome {
    TestOutcome::from_response(TestResponse {
        success: false,
        console_output: ConsoleOutput {
            stdout: vec![],
            stderr: vec!["FAIL: test_generated".to_string()],
        },
        exit: None,
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn store_with(entries: &[(&str, &[&str])]) -> ArtifactStore {
    let mut store = ArtifactStore::new();
    for (name, deps) in entries {
        store.put(
            *name,
            format!("models/{}.py", name.to_lowercase()),
            format!("class {name}: pass"),
            deps.iter().map(|d| (*d).to_string()).collect(),
        );
    }
    store
}

fn orchestrator(
    store: ArtifactStore,
    worker: ScriptedWorker,
    max_attempts: u32,
) -> (Orchestrator<ScriptedWorker>, Arc<ScriptedOracle>) {
    let oracle = Arc::new(ScriptedOracle::new());
    let config = OrchestratorConfig::new("demo")
        .with_specification("a trading system")
        .with_max_attempts(max_attempts);
    (
        Orchestrator::new(oracle.clone(), worker, store, config),
        oracle,
    )
}

#[tokio::test]
async fn test_chain_processes_dependency_first() {
    init_tracing();
    let store = store_with(&[("Position", &["Trade"]), ("Trade", &[])]);
    let (mut orch, _) = orchestrator(store, ScriptedWorker::always_passing(), 5);

    let result = orch.run().await.unwrap();

    assert_eq!(
        result.succeeded,
        vec![vec!["Trade".to_string()], vec!["Position".to_string()]]
    );
    assert!(result.exhausted.is_empty());
    assert_eq!(
        result.checkpoint_ids,
        vec!["checkpoint_0_Trade", "checkpoint_1_Position"]
    );
}

#[tokio::test]
async fn test_mutual_dependency_is_tested_as_one_group() {
    init_tracing();
    let store = store_with(&[("Order", &["Invoice"]), ("Invoice", &["Order"])]);
    let (mut orch, _) = orchestrator(store, ScriptedWorker::always_passing(), 5);

    let result = orch.run().await.unwrap();

    assert_eq!(result.succeeded.len(), 1);
    assert_eq!(
        result.succeeded[0],
        vec!["Order".to_string(), "Invoice".to_string()]
    );
}

#[tokio::test]
async fn test_two_failures_then_success_runs_two_repair_cycles() {
    init_tracing();
    let store = store_with(&[("Trade", &[])]);
    let worker = ScriptedWorker::new(vec![
        assertion_failure(),
        assertion_failure(),
        TestOutcome::passed(vec![], vec![]),
    ]);
    let (mut orch, oracle) = orchestrator(store, worker, 5);

    let result = orch.run().await.unwrap();

    assert_eq!(result.succeeded, vec![vec!["Trade".to_string()]]);
    let counts = oracle.regen_reflection_counts.lock().unwrap().clone();
    // Two repair cycles; the regeneration before the third execution saw
    // both accumulated analyses.
    assert_eq!(counts, vec![1, 2]);
    // The regenerated source landed in the store.
    assert_eq!(orch.store().get("Trade").unwrap().source, "class Fixed: pass");
    // The summary counts all three executions.
    assert_eq!(result.groups.len(), 1);
    assert_eq!(result.groups[0].attempts, 3);
    assert!(result.groups[0].success);
}

#[tokio::test]
async fn test_setup_error_short_circuits_the_group() {
    init_tracing();
    let store = store_with(&[("Trade", &[])]);
    let worker = ScriptedWorker::new(vec![TestOutcome::setup_error(serde_json::json!({
        "error": "relation does not exist"
    }))]);
    let executions = worker.execution_counter();
    let (mut orch, oracle) = orchestrator(store, worker, 5);

    let result = orch.run().await.unwrap();

    assert_eq!(result.exhausted.len(), 1);
    assert!(result.exhausted[0]
        .diagnostic
        .contains("environment setup failed"));
    // No repair cycle ran.
    assert!(oracle.regen_reflection_counts.lock().unwrap().is_empty());
    // One execution despite an attempt limit of 5; the script would have
    // kept serving the setup error.
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_group_does_not_abort_the_pipeline() {
    init_tracing();
    // First group always fails; the second, independent group still runs.
    let store = store_with(&[("Broken", &[]), ("Healthy", &["Broken"])]);
    let worker = ScriptedWorker::new(vec![
        assertion_failure(),
        assertion_failure(),
        TestOutcome::passed(vec![], vec![]),
    ]);
    let (mut orch, _) = orchestrator(store, worker, 2);

    let result = orch.run().await.unwrap();

    assert_eq!(
        result.exhausted.iter().map(|g| &g.members).collect::<Vec<_>>(),
        vec![&vec!["Broken".to_string()]]
    );
    assert_eq!(result.succeeded, vec![vec!["Healthy".to_string()]]);
    // Both groups were checkpointed, failed one included.
    assert_eq!(result.checkpoint_ids.len(), 2);
}

#[tokio::test]
async fn test_checkpoint_round_trip_and_not_found() {
    init_tracing();
    let store = store_with(&[("Trade", &[])]);
    let (mut orch, _) = orchestrator(store, ScriptedWorker::always_passing(), 5);

    let result = orch.run().await.unwrap();
    let id = &result.checkpoint_ids[0];

    let checkpoint = orch.restore_from_checkpoint(id).unwrap();
    assert!(checkpoint.outcome.success);
    assert_eq!(checkpoint.group_members, vec!["Trade".to_string()]);
    assert!(checkpoint
        .dependency_snapshot
        .dependencies
        .contains_key("Trade"));

    assert!(orch.restore_from_checkpoint("nonexistent").is_err());
}

#[tokio::test]
async fn test_progress_stream_ends_with_done_sentinel() {
    init_tracing();
    let store = store_with(&[("Trade", &[])]);
    let (mut orch, _) = orchestrator(store, ScriptedWorker::always_passing(), 5);
    let mut progress = orch.take_progress().unwrap();

    orch.run().await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(ProgressEvent::GroupStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::TestWritten { .. })));
    assert_eq!(events.last(), Some(&ProgressEvent::Done));
    assert_eq!(events.last().unwrap().to_string(), "DONE");
}

#[tokio::test]
async fn test_run_completes_when_progress_stream_is_unread() {
    init_tracing();
    // More than three events per group times 70 groups overflows the
    // default channel capacity many times over.
    let mut store = ArtifactStore::new();
    for i in 0..70 {
        let name = format!("Model{i}");
        store.put(
            &name,
            format!("models/model{i}.py"),
            format!("class {name}: pass"),
            vec![],
        );
    }
    let (mut orch, _) = orchestrator(store, ScriptedWorker::always_passing(), 5);

    let result = tokio::time::timeout(std::time::Duration::from_secs(10), orch.run())
        .await
        .expect("run stalled with nobody reading progress")
        .unwrap();

    assert_eq!(result.succeeded.len(), 70);
    // The untaken receiver was consumed by the run.
    assert!(orch.take_progress().is_none());
}

#[tokio::test]
async fn test_checkpoint_snapshot_reflects_regenerated_dependencies() {
    init_tracing();
    let mut store = ArtifactStore::new();
    store.add_import("Helper", "app.models.helper");
    store.put("Trade", "models/trade.py", "class Trade: pass", vec![]);
    let worker = ScriptedWorker::new(vec![
        assertion_failure(),
        TestOutcome::passed(vec![], vec![]),
    ]);
    // The repaired source pulls in a dependency the original lacked.
    let oracle = Arc::new(ScriptedOracle::with_regen_reply(
        "import Helper\nclass Trade: pass",
    ));
    let config = OrchestratorConfig::new("demo").with_max_attempts(5);
    let mut orch = Orchestrator::new(oracle, worker, store, config);

    let result = orch.run().await.unwrap();

    let checkpoint = orch.restore_from_checkpoint(&result.checkpoint_ids[0]).unwrap();
    // The snapshot was taken after the repair cycle, so the new edge is
    // recorded.
    assert_eq!(
        checkpoint.dependency_snapshot.dependencies["Trade"],
        vec!["Helper".to_string()]
    );
    // Generated tests never show up as graph nodes.
    assert!(!checkpoint
        .dependency_snapshot
        .dependencies
        .keys()
        .any(|k| k.starts_with("test_")));
}

#[tokio::test]
async fn test_upload_shadowing_tests_only_the_ingestion_path() {
    init_tracing();
    let store = store_with(&[("Trade", &[]), ("TradeUpload", &["Trade"])]);
    let (mut orch, _) = orchestrator(store, ScriptedWorker::always_passing(), 5);

    let result = orch.run().await.unwrap();

    // Trade is shadowed by its upload counterpart; only one group runs.
    assert_eq!(result.succeeded, vec![vec!["TradeUpload".to_string()]]);
}
