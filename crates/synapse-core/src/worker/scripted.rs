//! Scripted worker that replays canned responses (tests and fixture runs).
//!
//! Responses are consumed in order from a shared queue, or from a per-path
//! queue when the request targets a path that has its own script. Running
//! out of script is a fatal failure.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::worker::contracts::{has_required_shape, WorkerRequest};
use crate::worker::{Worker, WorkerError, WorkerResult, WorkerRole};

/// One scripted reaction to a `process` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedResponse {
    /// Return this JSON as-is.
    Reply(serde_json::Value),
    /// Reply `{files: {<target path>: content}}`; `{path}` in `content` is
    /// replaced with the request's target path.
    Generate(String),
    Transient(String),
    Fatal(String),
    /// Sleep, then behave like `then`.
    Delayed {
        delay_ms: u64,
        then: Box<ScriptedResponse>,
    },
    /// Never resolve; only cancellation ends the call.
    Pending,
}

impl ScriptedResponse {
    pub fn reply(value: serde_json::Value) -> Self {
        ScriptedResponse::Reply(value)
    }

    pub fn delayed(delay: Duration, then: ScriptedResponse) -> Self {
        ScriptedResponse::Delayed {
            delay_ms: delay.as_millis() as u64,
            then: Box::new(then),
        }
    }
}

type Validator = Box<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// A [`Worker`] whose behaviour is fully determined by its script.
pub struct ScriptedWorker {
    role: WorkerRole,
    shared: Mutex<VecDeque<ScriptedResponse>>,
    by_path: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: AtomicU32,
    calls_by_path: Mutex<HashMap<String, u32>>,
    validator: Option<Validator>,
}

impl ScriptedWorker {
    pub fn new(role: WorkerRole, responses: Vec<ScriptedResponse>) -> Self {
        Self {
            role,
            shared: Mutex::new(responses.into()),
            by_path: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
            calls_by_path: Mutex::new(HashMap::new()),
            validator: None,
        }
    }

    /// Script the calls that target `path`; they no longer draw from the shared queue.
    pub fn with_path_script(
        self,
        path: impl Into<String>,
        responses: Vec<ScriptedResponse>,
    ) -> Self {
        self.by_path
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), responses.into());
        self
    }

    /// Replace the default shape check used by [`Worker::validate`].
    pub fn with_validator(
        mut self,
        validator: impl Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Total number of `process` calls.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `process` calls that targeted `path`.
    pub fn calls_for(&self, path: &str) -> u32 {
        self.calls_by_path
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn next_response(&self, target: Option<&str>) -> Option<ScriptedResponse> {
        if let Some(path) = target {
            let mut by_path = self.by_path.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(queue) = by_path.get_mut(path) {
                return queue.pop_front();
            }
        }
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn role(&self) -> WorkerRole {
        self.role
    }

    async fn process(&self, request: &WorkerRequest) -> WorkerResult<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let target = request.target_path();
        if let Some(path) = target {
            *self
                .calls_by_path
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(path.to_string())
                .or_default() += 1;
        }

        let mut response = self.next_response(target).ok_or_else(|| {
            WorkerError::Fatal(format!(
                "{} script exhausted{}",
                self.role,
                target.map(|p| format!(" for '{p}'")).unwrap_or_default()
            ))
        })?;

        loop {
            match response {
                ScriptedResponse::Reply(value) => return Ok(value),
                ScriptedResponse::Generate(template) => {
                    let path = target.ok_or_else(|| {
                        WorkerError::Fatal("generate response needs a target path".to_string())
                    })?;
                    let mut files = serde_json::Map::new();
                    files.insert(
                        path.to_string(),
                        serde_json::Value::from(template.replace("{path}", path)),
                    );
                    return Ok(serde_json::json!({ "files": files }));
                }
                ScriptedResponse::Transient(msg) => return Err(WorkerError::Transient(msg)),
                ScriptedResponse::Fatal(msg) => return Err(WorkerError::Fatal(msg)),
                ScriptedResponse::Delayed { delay_ms, then } => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    response = *then;
                }
                ScriptedResponse::Pending => return std::future::pending().await,
            }
        }
    }

    fn validate(&self, output: &serde_json::Value) -> bool {
        match &self.validator {
            Some(validator) => validator(output),
            None => has_required_shape(self.role, output),
        }
    }
}

impl std::fmt::Debug for ScriptedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedWorker")
            .field("role", &self.role)
            .field("calls", &self.calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;

    fn request() -> WorkerRequest {
        WorkerRequest::for_planner(&Task::new("x").unwrap())
    }

    fn request_for(path: &str) -> WorkerRequest {
        let mut req = request();
        req.context = serde_json::json!({ "path": path });
        req
    }

    #[tokio::test]
    async fn test_replays_in_order_then_exhausts() {
        let worker = ScriptedWorker::new(
            WorkerRole::Planner,
            vec![
                ScriptedResponse::Transient("quota".into()),
                ScriptedResponse::reply(serde_json::json!({"structure": {}})),
            ],
        );
        assert_eq!(
            worker.process(&request()).await,
            Err(WorkerError::Transient("quota".into()))
        );
        assert!(worker.process(&request()).await.is_ok());
        assert!(matches!(
            worker.process(&request()).await,
            Err(WorkerError::Fatal(_))
        ));
        assert_eq!(worker.calls(), 3);
    }

    #[tokio::test]
    async fn test_path_script_takes_precedence() {
        let worker = ScriptedWorker::new(
            WorkerRole::Generator,
            vec![ScriptedResponse::Generate("shared {path}".into())],
        )
        .with_path_script("b.rs", vec![ScriptedResponse::Fatal("nope".into())]);

        assert!(matches!(
            worker.process(&request_for("b.rs")).await,
            Err(WorkerError::Fatal(_))
        ));
        let out = worker.process(&request_for("a.rs")).await.unwrap();
        assert_eq!(out["files"]["a.rs"], "shared a.rs");
        assert_eq!(worker.calls_for("b.rs"), 1);
        assert_eq!(worker.calls_for("a.rs"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_response_sleeps_first() {
        let worker = ScriptedWorker::new(
            WorkerRole::Reviewer,
            vec![ScriptedResponse::delayed(
                Duration::from_secs(5),
                ScriptedResponse::reply(serde_json::json!({"status": "approved"})),
            )],
        );
        let start = tokio::time::Instant::now();
        worker.process(&request()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_custom_validator_overrides_shape_check() {
        let worker = ScriptedWorker::new(WorkerRole::Planner, vec![]).with_validator(|_| false);
        assert!(!worker.validate(&serde_json::json!({"structure": {}})));
    }

    #[test]
    fn test_response_fixture_format() {
        let json = r#"[
            {"transient": "rate limited"},
            {"delayed": {"delay_ms": 10, "then": {"generate": "// {path}"}}},
            "pending"
        ]"#;
        let responses: Vec<ScriptedResponse> = serde_json::from_str(json).unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[2], ScriptedResponse::Pending);
    }
}
