//! Building-stage policy tests: failure ratio, concurrency bound and
//! dispatch order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use synapse_core::worker::contracts::has_required_shape;
use synapse_core::{
    CancellationToken, FailureKind, RunStatus, ScriptedResponse, ScriptedWorker, Stage, Synapse,
    SynapseConfig, Task, Worker, WorkerRegistry, WorkerRequest, WorkerResult, WorkerRole,
};

/// Generator that records dispatch order and peak concurrency.
#[derive(Default)]
struct TrackingGenerator {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl Worker for TrackingGenerator {
    fn role(&self) -> WorkerRole {
        WorkerRole::Generator
    }

    async fn process(&self, request: &WorkerRequest) -> WorkerResult<serde_json::Value> {
        let path = request.target_path().unwrap_or_default().to_string();
        self.order.lock().unwrap().push(path.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut files = serde_json::Map::new();
        files.insert(path.clone(), json!(format!("// {path}")));
        Ok(json!({ "files": files }))
    }

    fn validate(&self, output: &serde_json::Value) -> bool {
        has_required_shape(WorkerRole::Generator, output)
    }
}

/// Reviewer that keeps the request it was given.
#[derive(Default)]
struct RecordingReviewer {
    seen: Mutex<Option<WorkerRequest>>,
}

#[async_trait]
impl Worker for RecordingReviewer {
    fn role(&self) -> WorkerRole {
        WorkerRole::Reviewer
    }

    async fn process(&self, request: &WorkerRequest) -> WorkerResult<serde_json::Value> {
        *self.seen.lock().unwrap() = Some(request.clone());
        Ok(json!({ "status": "approved" }))
    }

    fn validate(&self, output: &serde_json::Value) -> bool {
        has_required_shape(WorkerRole::Reviewer, output)
    }
}

fn planner(structure: serde_json::Value) -> Arc<ScriptedWorker> {
    Arc::new(ScriptedWorker::new(
        WorkerRole::Planner,
        vec![ScriptedResponse::reply(json!({ "structure": structure }))],
    ))
}

fn four_files() -> serde_json::Value {
    json!({ "a.rs": "P", "b.rs": "P", "c.rs": "P", "d.rs": "P" })
}

/// Generator where `c.rs` fails on every attempt.
fn generator_failing_c() -> Arc<ScriptedWorker> {
    Arc::new(
        ScriptedWorker::new(
            WorkerRole::Generator,
            (0..3)
                .map(|_| ScriptedResponse::Generate("// {path}".into()))
                .collect(),
        )
        .with_path_script(
            "c.rs",
            vec![
                ScriptedResponse::Transient("quota".into()),
                ScriptedResponse::Transient("quota".into()),
                ScriptedResponse::Transient("quota".into()),
            ],
        ),
    )
}

fn config(max_failure_ratio: f64) -> SynapseConfig {
    SynapseConfig {
        base_delay_ms: 10,
        max_failure_ratio,
        ..SynapseConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_exhausted_subtask_fails_run_by_default() {
    let generator = generator_failing_c();
    let reviewer = Arc::new(ScriptedWorker::new(WorkerRole::Reviewer, vec![]));
    let registry = WorkerRegistry::new()
        .with(planner(four_files()))
        .with(generator.clone())
        .with(reviewer.clone());

    let result = Synapse::new(registry, config(0.0))
        .run(Task::new("four files").unwrap(), CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Building);
    assert_eq!(failure.kind, FailureKind::FailureThresholdExceeded);
    assert_eq!(failure.failed_paths, vec!["c.rs".to_string()]);

    let paths: Vec<&str> = result.modules.keys().map(String::as_str).collect();
    assert_eq!(paths, vec!["a.rs", "b.rs", "d.rs"]);
    assert_eq!(generator.calls_for("c.rs"), 3);
    assert_eq!(reviewer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tolerated_failure_reaches_review_with_failed_paths() {
    let reviewer = Arc::new(RecordingReviewer::default());
    let registry = WorkerRegistry::new()
        .with(planner(four_files()))
        .with(generator_failing_c())
        .with(reviewer.clone());

    let result = Synapse::new(registry, config(0.25))
        .run(Task::new("four files").unwrap(), CancellationToken::new())
        .await;

    assert!(result.is_done(), "{:?}", result.failure);
    assert_eq!(result.modules.len(), 3);

    let request = reviewer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(request.context["failed_paths"], json!(["c.rs"]));
    let reviewed = request.context["modules"].as_object().unwrap();
    assert_eq!(reviewed.len(), 3);
    assert!(!reviewed.contains_key("c.rs"));
}

#[tokio::test(start_paused = true)]
async fn test_all_failed_is_failed_whatever_the_ratio() {
    let registry = WorkerRegistry::new()
        .with(planner(json!({ "a.rs": "P", "b.rs": "P" })))
        .with(Arc::new(ScriptedWorker::new(
            WorkerRole::Generator,
            vec![
                ScriptedResponse::Fatal("unsupported language".into()),
                ScriptedResponse::Fatal("unsupported language".into()),
            ],
        )))
        .with(Arc::new(ScriptedWorker::new(WorkerRole::Reviewer, vec![])));

    let result = Synapse::new(registry, config(1.0))
        .run(Task::new("x").unwrap(), CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::FailureThresholdExceeded);
    assert_eq!(failure.failed_paths.len(), 2);
    assert!(result.modules.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_limit() {
    let generator = Arc::new(TrackingGenerator::default());
    let structure: serde_json::Map<String, serde_json::Value> = (0..10)
        .map(|i| (format!("m{i}.rs"), json!("P")))
        .collect();
    let registry = WorkerRegistry::new()
        .with(planner(serde_json::Value::Object(structure)))
        .with(generator.clone())
        .with(Arc::new(RecordingReviewer::default()));

    let config = SynapseConfig {
        max_concurrency: 3,
        ..SynapseConfig::default()
    };
    let result = Synapse::new(registry, config)
        .run(Task::new("ten files").unwrap(), CancellationToken::new())
        .await;

    assert!(result.is_done(), "{:?}", result.failure);
    assert_eq!(result.modules.len(), 10);
    assert_eq!(generator.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_follows_plan_order() {
    let generator = Arc::new(TrackingGenerator::default());
    let registry = WorkerRegistry::new()
        .with(planner(json!({
            "zeta.rs": "P",
            "alpha": { "one.rs": "P", "two.rs": "P" },
            "mid.rs": "P"
        })))
        .with(generator.clone())
        .with(Arc::new(RecordingReviewer::default()));

    let config = SynapseConfig {
        max_concurrency: 1,
        ..SynapseConfig::default()
    };
    let result = Synapse::new(registry, config)
        .run(Task::new("ordered").unwrap(), CancellationToken::new())
        .await;

    assert!(result.is_done());
    assert_eq!(
        *generator.order.lock().unwrap(),
        vec!["zeta.rs", "alpha/one.rs", "alpha/two.rs", "mid.rs"]
    );
    assert_eq!(generator.peak.load(Ordering::SeqCst), 1);
}
