//! End-to-end orchestration tests.
//!
//! Drives the [`Orchestrator`] facade with in-process agents and checks the
//! task lifecycle: legal status progressions, result/error exclusivity,
//! cancellation, failure propagation, admission limits, and eviction.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use futures_util::future::join_all;
use mas_agent::{Agent, DelayAgent, EchoAgent, ExecutionContext, FailingAgent, FnAgent};
use mas_core::{MasError, MasResult, Payload};
use mas_orchestrator::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Test agents
// ---------------------------------------------------------------------------

/// Blocks until cancelled, ignoring its input.
struct BlockingAgent;

#[async_trait]
impl Agent for BlockingAgent {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn process(&self, ctx: &ExecutionContext, _input: Payload) -> MasResult<Payload> {
        ctx.cancelled().await;
        Err(MasError::Cancelled)
    }
}

/// Counts invocations and tracks the peak number running at once.
struct GaugeAgent {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugeAgent {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Agent for GaugeAgent {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn process(&self, _ctx: &ExecutionContext, input: Payload) -> MasResult<Payload> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(input)
    }
}

/// Ignores its context entirely: returns its input only once released.
struct StubbornAgent {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl StubbornAgent {
    fn new() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let agent = Self {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        };
        (agent, entered, release)
    }
}

#[async_trait]
impl Agent for StubbornAgent {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn process(&self, _ctx: &ExecutionContext, input: Payload) -> MasResult<Payload> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(input)
    }
}

/// Cancels the context it was given, then succeeds anyway.
struct SelfCancellingAgent;

#[async_trait]
impl Agent for SelfCancellingAgent {
    fn name(&self) -> &str {
        "self-cancelling"
    }

    async fn process(&self, ctx: &ExecutionContext, input: Payload) -> MasResult<Payload> {
        ctx.token().cancel();
        Ok(input)
    }
}

fn started(config: OrchestratorConfig) -> Orchestrator {
    let orch = Orchestrator::new(config);
    orch.register_agent(Arc::new(EchoAgent::new("echo"))).unwrap();
    orch.register_agent(Arc::new(BlockingAgent)).unwrap();
    orch.register_agent(Arc::new(FailingAgent::new("broken", "X failed")))
        .unwrap();
    orch.start();
    orch
}

fn assert_outcome_exclusive(task: &Task) {
    match task.status {
        TaskStatus::Completed => {
            assert!(task.result.is_some(), "completed task without result");
            assert!(task.error.is_none(), "completed task with error");
        }
        TaskStatus::Failed | TaskStatus::Cancelled => {
            assert!(task.result.is_none(), "{} task with result", task.status);
            assert!(task.error.is_some(), "{} task without error", task.status);
        }
        other => panic!("task is not terminal: {other}"),
    }
}

async fn running(orch: &Orchestrator, id: Uuid) {
    for _ in 0..200 {
        if orch.get_task(id).unwrap().status == TaskStatus::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never started");
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_observed_statuses_only_move_forward() {
    let orch = started(OrchestratorConfig::default());
    orch.register_agent(Arc::new(DelayAgent::new("short", Duration::from_millis(30))))
        .unwrap();

    let id = orch
        .submit_task(TaskRequest::single("short", json!("x")))
        .unwrap();

    let rank = |s: TaskStatus| match s {
        TaskStatus::Pending => 0,
        TaskStatus::Running => 1,
        _ => 2,
    };
    let mut observed = vec![orch.get_task(id).unwrap().status];
    while !observed.last().unwrap().is_terminal() {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let status = orch.get_task(id).unwrap().status;
        if Some(&status) != observed.last() {
            observed.push(status);
        }
    }

    for pair in observed.windows(2) {
        assert!(rank(pair[0]) < rank(pair[1]), "went backwards: {observed:?}");
    }
    assert_eq!(observed.last(), Some(&TaskStatus::Completed));
    orch.stop();
}

#[tokio::test]
async fn test_echo_task_completes() {
    let orch = started(OrchestratorConfig::default());
    let id = orch
        .submit_task(TaskRequest::single("echo", json!({"msg": "hi"})))
        .unwrap();

    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"msg": "hi"})));
    assert_eq!(task.agent_ids, vec!["echo"]);
    assert!(task.updated_at >= task.created_at);
    assert_outcome_exclusive(&task);
    orch.stop();
}

#[tokio::test]
async fn test_submit_before_start_is_rejected() {
    let orch = Orchestrator::new(OrchestratorConfig::default());
    orch.register_agent(Arc::new(EchoAgent::new("echo"))).unwrap();

    let err = orch
        .submit_task(TaskRequest::single("echo", json!(null)))
        .unwrap_err();
    assert!(matches!(err, MasError::NotRunning));
    assert_eq!(err.to_string(), "orchestrator not running");
}

#[tokio::test]
async fn test_submit_after_stop_is_rejected() {
    let orch = started(OrchestratorConfig::default());
    orch.stop();
    let err = orch
        .submit_task(TaskRequest::single("echo", json!(null)))
        .unwrap_err();
    assert!(matches!(err, MasError::NotRunning));
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_agent_stores_nothing() {
    let orch = started(OrchestratorConfig::default());
    let err = orch
        .submit_task(TaskRequest::new(["echo", "nobody"], json!(1)))
        .unwrap_err();

    match err {
        MasError::UnknownAgent(names) => assert_eq!(names, vec!["nobody"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(orch.list_tasks().is_empty());
    assert_eq!(orch.task_summary().total, 0);
    orch.stop();
}

#[tokio::test]
async fn test_empty_agent_list_rejected() {
    let orch = started(OrchestratorConfig::default());
    let err = orch
        .submit_task(TaskRequest::new(Vec::<String>::new(), json!(1)))
        .unwrap_err();
    assert!(matches!(err, MasError::InvalidTask(_)));
    assert!(orch.list_tasks().is_empty());
    orch.stop();
}

#[tokio::test]
async fn test_duplicate_registration_keeps_first() {
    let orch = Orchestrator::new(OrchestratorConfig::default());
    orch.register_agent(Arc::new(FnAgent::new("dup", |_| Ok(json!("first")))))
        .unwrap();
    let err = orch
        .register_agent(Arc::new(FnAgent::new("dup", |_| Ok(json!("second")))))
        .unwrap_err();
    assert!(matches!(err, MasError::DuplicateName(ref n) if n == "dup"));

    orch.start();
    let id = orch
        .submit_task(TaskRequest::single("dup", json!(null)))
        .unwrap();
    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.result, Some(json!("first")));
    orch.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_get_distinct_ids() {
    let orch = Arc::new(started(OrchestratorConfig::default()));

    let submissions = (0..64).map(|i| {
        let orch = Arc::clone(&orch);
        async move {
            tokio::spawn(async move {
                orch.submit_task(TaskRequest::single("echo", json!(i)))
            })
            .await
            .unwrap()
        }
    });
    let ids: Vec<Uuid> = join_all(submissions)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let distinct: HashSet<Uuid> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), ids.len());

    for id in ids {
        let task = orch.wait_for(id, WAIT).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_outcome_exclusive(&task);
    }
    assert_eq!(orch.task_summary().completed, 64);
    orch.stop();
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_blocking_task() {
    let orch = started(OrchestratorConfig::default());
    let id = orch
        .submit_task(TaskRequest::single("blocking", json!(null)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    orch.cancel_task(id).unwrap();

    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_outcome_exclusive(&task);
    orch.stop();
}

#[tokio::test]
async fn test_cancel_twice_is_harmless() {
    let orch = started(OrchestratorConfig::default());
    let id = orch
        .submit_task(TaskRequest::single("blocking", json!(null)))
        .unwrap();
    running(&orch, id).await;

    orch.cancel_task(id).unwrap();
    orch.cancel_task(id).unwrap();
    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    orch.stop();
}

#[tokio::test]
async fn test_cancel_unknown_task() {
    let orch = started(OrchestratorConfig::default());
    let err = orch.cancel_task(Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, MasError::TaskNotFound));
    assert_eq!(err.to_string(), "task not found");
    orch.stop();
}

#[tokio::test]
async fn test_cancel_finished_task_is_noop() {
    let orch = started(OrchestratorConfig::default());
    let id = orch
        .submit_task(TaskRequest::single("echo", json!("done")))
        .unwrap();
    let before = orch.wait_for(id, WAIT).await.unwrap();

    orch.cancel_task(id).unwrap();
    let after = orch.get_task(id).unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.result, before.result);
    assert_eq!(after.updated_at, before.updated_at);
    orch.stop();
}

#[tokio::test]
async fn test_stop_cancels_in_flight_tasks() {
    let orch = started(OrchestratorConfig::default());
    let ids: Vec<Uuid> = (0..3)
        .map(|_| {
            orch.submit_task(TaskRequest::single("blocking", json!(null)))
                .unwrap()
        })
        .collect();
    for id in &ids {
        running(&orch, *id).await;
    }

    orch.stop();
    for id in ids {
        let task = orch.wait_for(id, WAIT).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }
}

#[tokio::test]
async fn test_stop_without_cancel_lets_tasks_finish() {
    let orch = started(OrchestratorConfig::default().with_cancel_on_stop(false));
    orch.register_agent(Arc::new(DelayAgent::new("short", Duration::from_millis(30))))
        .unwrap();
    let id = orch
        .submit_task(TaskRequest::single("short", json!(7)))
        .unwrap();
    running(&orch, id).await;

    orch.stop();
    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!(7)));
}

#[tokio::test]
async fn test_agent_ignoring_cancel_keeps_task_running() {
    let orch = started(OrchestratorConfig::default());
    let (agent, entered, release) = StubbornAgent::new();
    orch.register_agent(Arc::new(agent)).unwrap();

    let id = orch
        .submit_task(TaskRequest::single("stubborn", json!("late")))
        .unwrap();
    tokio::time::timeout(WAIT, entered.notified()).await.unwrap();
    orch.cancel_task(id).unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(orch.get_task(id).unwrap().status, TaskStatus::Running);
    assert!(matches!(
        orch.wait_for(id, Duration::from_millis(20)).await,
        Err(MasError::Timeout(_))
    ));

    release.notify_one();
    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert!(task.is_terminal());
    orch.stop();
}

#[tokio::test]
async fn test_success_after_cancel_request_ends_cancelled() {
    let orch = started(OrchestratorConfig::default());
    let (agent, entered, release) = StubbornAgent::new();
    orch.register_agent(Arc::new(agent)).unwrap();

    let id = orch
        .submit_task(TaskRequest::single("stubborn", json!("discarded")))
        .unwrap();
    tokio::time::timeout(WAIT, entered.notified()).await.unwrap();
    orch.cancel_task(id).unwrap();
    release.notify_one();

    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
    assert_eq!(task.error.as_deref(), Some("task cancelled"));
    assert_outcome_exclusive(&task);
    orch.stop();
}

#[tokio::test]
async fn test_agent_cannot_cancel_its_own_task() {
    let orch = started(OrchestratorConfig::default());
    orch.register_agent(Arc::new(SelfCancellingAgent)).unwrap();

    let id = orch
        .submit_task(TaskRequest::new(["self-cancelling", "echo"], json!("kept")))
        .unwrap();
    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!("kept")));
    orch.stop();
}

// ---------------------------------------------------------------------------
// Submission from other threads
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_from_plain_thread() {
    let orch = Arc::new(started(OrchestratorConfig::default()));

    let submitter = Arc::clone(&orch);
    let id = std::thread::spawn(move || {
        submitter.submit_task(TaskRequest::single("echo", json!("from a thread")))
    })
    .join()
    .unwrap()
    .unwrap();

    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!("from a thread")));
    orch.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_task_admitted_after_stop_survives() {
    let orch = Arc::new(started(OrchestratorConfig::default()));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let orch = Arc::clone(&orch);
            std::thread::spawn(move || {
                let mut ids = Vec::new();
                loop {
                    match orch.submit_task(TaskRequest::single("blocking", json!(null))) {
                        Ok(id) => ids.push(id),
                        Err(MasError::NotRunning) => return ids,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                    std::thread::sleep(Duration::from_micros(200));
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    orch.stop();

    let ids: Vec<Uuid> = submitters
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert!(!ids.is_empty());

    // Every accepted task was in the store before stop() cancelled in-flight work.
    for id in ids {
        let task = orch.wait_for(id, WAIT).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }
}

// ---------------------------------------------------------------------------
// Failure and chaining
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_agent_failure_recorded() {
    let orch = started(OrchestratorConfig::default());
    let id = orch
        .submit_task(TaskRequest::single("broken", json!(null)))
        .unwrap();

    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("X failed"));
    assert_outcome_exclusive(&task);

    let state = orch.monitor().get_state("broken").await.unwrap();
    assert_eq!(state.status, WorkerStatus::Error);
    assert_eq!(state.metrics.failed, 1);
    orch.stop();
}

#[tokio::test]
async fn test_panicking_agent_fails_task() {
    let orch = started(OrchestratorConfig::default());
    orch.register_agent(Arc::new(FnAgent::new("panicky", |_| {
        panic!("agent blew up")
    })))
    .unwrap();

    let id = orch
        .submit_task(TaskRequest::single("panicky", json!(null)))
        .unwrap();
    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("agent blew up"));
    orch.stop();
}

#[tokio::test]
async fn test_agents_chain_in_order() {
    let orch = started(OrchestratorConfig::default());
    orch.register_agent(Arc::new(FnAgent::new("hello", |v| {
        Ok(json!(format!("hello {}", v.as_str().unwrap_or_default())))
    })))
    .unwrap();
    orch.register_agent(Arc::new(FnAgent::new("shout", |v| {
        Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
    })))
    .unwrap();

    let id = orch
        .submit_task(TaskRequest::new(["hello", "echo", "shout"], json!("world")))
        .unwrap();
    let task = orch.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.result, Some(json!("HELLO WORLD")));

    let failing = orch
        .submit_task(TaskRequest::new(["hello", "broken", "shout"], json!("world")))
        .unwrap();
    let task = orch.wait_for(failing, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("agent 'broken': X failed"));
    orch.stop();
}

// ---------------------------------------------------------------------------
// Admission limit
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_concurrent_tasks_bounds_running() {
    let gauge = Arc::new(GaugeAgent::new());
    let orch = Orchestrator::new(OrchestratorConfig::default().with_max_concurrent_tasks(2));
    orch.register_agent(Arc::clone(&gauge) as Arc<dyn Agent>)
        .unwrap();
    orch.start();

    let ids: Vec<Uuid> = (0..8)
        .map(|i| {
            orch.submit_task(TaskRequest::single("gauge", json!(i)))
                .unwrap()
        })
        .collect();
    for id in ids {
        assert_eq!(
            orch.wait_for(id, WAIT).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    let metrics = orch.monitor().aggregate_metrics().await;
    assert_eq!(metrics.runs, 8);
    assert_eq!(metrics.active, 0);
    orch.stop();
}

// ---------------------------------------------------------------------------
// Eviction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_janitor_evicts_finished_tasks() {
    let orch = started(
        OrchestratorConfig::default()
            .with_task_ttl(Duration::from_millis(10))
            .with_poll_interval(Duration::from_millis(10)),
    );
    let done = orch
        .submit_task(TaskRequest::single("echo", json!(1)))
        .unwrap();
    let blocked = orch
        .submit_task(TaskRequest::single("blocking", json!(null)))
        .unwrap();
    orch.wait_for(done, WAIT).await.unwrap();
    running(&orch, blocked).await;

    let mut evicted = false;
    for _ in 0..200 {
        if matches!(orch.get_task(done), Err(MasError::TaskNotFound)) {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(evicted, "finished task was never evicted");

    // Running tasks are never evicted.
    assert_eq!(orch.get_task(blocked).unwrap().status, TaskStatus::Running);
    orch.stop();
}

#[tokio::test]
async fn test_sweep_now_respects_ttl() {
    let orch = started(OrchestratorConfig::default().with_task_ttl(Duration::from_secs(3600)));
    let id = orch
        .submit_task(TaskRequest::single("echo", json!(1)))
        .unwrap();
    orch.wait_for(id, WAIT).await.unwrap();

    assert_eq!(orch.sweep_now(), 0);
    assert!(orch.get_task(id).is_ok());
    orch.stop();
}
