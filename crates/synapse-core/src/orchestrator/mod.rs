//! The Synapse orchestrator: plan, parallel build, review.
//!
//! [`Synapse::run`] drives one task through the pipeline and always returns a
//! [`RunResult`]. Failures and cancellation are reported through
//! `RunResult::status` and `RunResult::failure`, together with whatever
//! artifacts the run produced before it stopped.
//!
//! Cancellation is a single [`CancellationToken`]. The orchestrator works on a
//! child of the caller's token and cancels that child itself when planning or
//! review fails, so no worker call outlives the run.

mod build;
pub mod state;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::SynapseConfig;
use crate::domain::{
    FailureDetail, FailureKind, MaterializationReport, Module, Plan, ReviewReport, RunResult,
    RunState, RunStatus, Stage, Subtask, Task,
};
use crate::materializer::Materializer;
use crate::obs;
use crate::retry::{RetryError, RetryPolicy};
use crate::task_graph::{MalformedPlan, TaskGraph};
use crate::worker::{
    PlannerOutput, ReviewerOutput, Worker, WorkerError, WorkerRegistry, WorkerRequest,
    WorkerResult, WorkerRole,
};

use build::BuildStage;
pub use state::RunMachine;

/// Invoke `worker` once and apply its own validation to the result.
pub(crate) async fn call_validated(
    worker: &dyn Worker,
    request: &WorkerRequest,
) -> WorkerResult<serde_json::Value> {
    let value = worker.process(request).await?;
    if !worker.validate(&value) {
        return Err(WorkerError::InvalidOutput(format!(
            "{} result failed validation",
            worker.role()
        )));
    }
    Ok(value)
}

/// Pipeline orchestrator for a single run.
pub struct Synapse {
    registry: WorkerRegistry,
    config: SynapseConfig,
    materializer: Option<Arc<dyn Materializer>>,
}

impl Synapse {
    pub fn new(registry: WorkerRegistry, config: SynapseConfig) -> Self {
        Self {
            registry,
            config,
            materializer: None,
        }
    }

    /// Persist the files of a successful run through `materializer`.
    pub fn with_materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn config(&self) -> &SynapseConfig {
        &self.config
    }

    /// Run `task` to completion, failure or cancellation.
    ///
    /// Consumes the orchestrator; each run gets a fresh one.
    pub async fn run(self, task: Task, cancel: CancellationToken) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = obs::span(&run_id.to_string());
        self.execute(run_id, task, cancel).instrument(span).await
    }

    async fn execute(self, run_id: Uuid, task: Task, caller: CancellationToken) -> RunResult {
        let mut run = RunRecord::new(run_id);
        let id = run_id.to_string();
        obs::emit_run_started(&id, task.requirements());

        let cancel = caller.child_token();
        let task = Arc::new(task);

        if let Err(e) = self.config.validate() {
            return run.stop(
                FailureDetail::new(Stage::Planning, FailureKind::Fatal, e.to_string()),
                &cancel,
            );
        }
        let policy = self.config.retry_policy();

        // Planning
        obs::emit_stage_entered(&id, Stage::Planning);
        let plan = match self.plan(&task, policy, &cancel).await {
            Ok(plan) => plan,
            Err(detail) => return run.stop(detail, &cancel),
        };
        // A plan that fails derivation is still part of the run's record.
        run.plan = Some(plan.clone());
        let subtasks = match derive_subtasks(&plan) {
            Ok(subtasks) => subtasks,
            Err(detail) => return run.stop(detail, &cancel),
        };
        let plan = Arc::new(plan);

        // Building
        if let Err(detail) = run.enter(Stage::Building, &cancel) {
            return run.stop(detail, &cancel);
        }
        obs::emit_stage_entered(&id, Stage::Building);
        let built = self
            .build(&id, &task, &plan, subtasks, policy, &cancel, &mut run)
            .await;
        let failed_paths = match built {
            Ok(failed_paths) => failed_paths,
            Err(detail) => return run.stop(detail, &cancel),
        };

        // Reviewing
        if let Err(detail) = run.enter(Stage::Reviewing, &cancel) {
            return run.stop(detail, &cancel);
        }
        obs::emit_stage_entered(&id, Stage::Reviewing);
        let reviewed = self
            .review(&task, &plan, &run.modules, &failed_paths, policy, &cancel)
            .await;
        match reviewed {
            Ok(report) => run.review = Some(report),
            Err(detail) => return run.stop(detail, &cancel),
        }

        let mut result = run.finish();
        if let Some(materializer) = &self.materializer {
            result.materialization = Some(materialize(&id, materializer.as_ref(), &result).await);
        }
        result
    }

    #[instrument(skip_all)]
    async fn plan(
        &self,
        task: &Task,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Plan, FailureDetail> {
        let planner = self
            .registry
            .require(WorkerRole::Planner)
            .map_err(|e| FailureDetail::new(Stage::Planning, FailureKind::Fatal, e.to_string()))?;
        let request = WorkerRequest::for_planner(task);

        let output = policy
            .execute(cancel, |_| {
                let planner = planner.as_ref();
                let request = &request;
                async move { PlannerOutput::parse(call_validated(planner, request).await?) }
            })
            .await
            .map_err(|e| FailureDetail::from_retry(Stage::Planning, e))?;

        let plan = output.value.into_plan();
        info!(plan_id = %plan.id, attempts = output.attempts, "plan received");
        Ok(plan)
    }

    /// Returns the failed paths the review should know about, or the detail
    /// that stops the run.
    #[allow(clippy::too_many_arguments)]
    async fn build(
        &self,
        run_id: &str,
        task: &Arc<Task>,
        plan: &Arc<Plan>,
        subtasks: Vec<Subtask>,
        policy: RetryPolicy,
        cancel: &CancellationToken,
        run: &mut RunRecord,
    ) -> Result<Vec<String>, FailureDetail> {
        let generator = self
            .registry
            .require(WorkerRole::Generator)
            .map_err(|e| FailureDetail::new(Stage::Building, FailureKind::Fatal, e.to_string()))?;

        let total = subtasks.len();
        let stage = BuildStage {
            run_id: run_id.to_string(),
            task: Arc::clone(task),
            plan: Arc::clone(plan),
            generator,
            policy,
            max_concurrency: self.config.max_concurrency,
            cancel: cancel.clone(),
        };
        let aggregate = stage
            .run(subtasks)
            .await
            .map_err(|e| FailureDetail::new(Stage::Building, FailureKind::Fatal, e.to_string()))?;

        let failed_paths = aggregate.failed_paths();
        let cancelled = aggregate.cancelled_count();
        run.modules = aggregate.into_modules();

        if cancel.is_cancelled() || cancelled > 0 {
            return Err(FailureDetail {
                failed_paths,
                ..FailureDetail::new(
                    Stage::Building,
                    FailureKind::Cancelled,
                    format!("cancelled with {} of {total} module(s) generated", run.modules.len()),
                )
            });
        }

        let failed = failed_paths.len();
        let ratio = failed as f64 / total as f64;
        if failed == total || ratio > self.config.max_failure_ratio {
            let message = if failed == total {
                format!("all {total} subtask(s) failed")
            } else {
                format!(
                    "{failed} of {total} subtask(s) failed, above the tolerated ratio {}",
                    self.config.max_failure_ratio
                )
            };
            return Err(FailureDetail {
                failed_paths,
                ..FailureDetail::new(
                    Stage::Building,
                    FailureKind::FailureThresholdExceeded,
                    message,
                )
            });
        }

        if failed > 0 {
            warn!(failed, total, "continuing to review with partial modules");
        }
        Ok(failed_paths)
    }

    #[instrument(skip_all, fields(modules = modules.len()))]
    async fn review(
        &self,
        task: &Task,
        plan: &Plan,
        modules: &BTreeMap<String, Module>,
        failed_paths: &[String],
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ReviewReport, FailureDetail> {
        let reviewer = self
            .registry
            .require(WorkerRole::Reviewer)
            .map_err(|e| FailureDetail::new(Stage::Reviewing, FailureKind::Fatal, e.to_string()))?;
        let request = WorkerRequest::for_reviewer(task, plan, modules, failed_paths);

        let output = policy
            .execute(cancel, |_| {
                let reviewer = reviewer.as_ref();
                let request = &request;
                async move { ReviewerOutput::parse(call_validated(reviewer, request).await?) }
            })
            .await
            .map_err(|e| FailureDetail::from_retry(Stage::Reviewing, e))?;

        let report = output.value.into_report();
        info!(
            status = ?report.status,
            findings = report.finding_count(),
            "review finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Synapse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synapse")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("materializer", &self.materializer.is_some())
            .finish()
    }
}

fn malformed(err: MalformedPlan) -> FailureDetail {
    FailureDetail::new(Stage::Planning, FailureKind::MalformedPlan, err.to_string())
}

/// Derive the build subtasks of `plan`. A plan with no files is malformed.
fn derive_subtasks(plan: &Plan) -> Result<Vec<Subtask>, FailureDetail> {
    let subtasks = TaskGraph::derive(plan).map_err(malformed)?;
    if subtasks.is_empty() {
        return Err(malformed(MalformedPlan::Empty));
    }
    info!(plan_id = %plan.id, subtasks = subtasks.len(), "plan accepted");
    Ok(subtasks)
}

impl FailureDetail {
    fn new(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            failed_paths: Vec::new(),
        }
    }

    fn from_retry(stage: Stage, err: RetryError) -> Self {
        let kind = match err {
            RetryError::Exhausted { .. } => FailureKind::RetriesExhausted,
            RetryError::Fatal(_) => FailureKind::Fatal,
            RetryError::Cancelled { .. } => FailureKind::Cancelled,
        };
        Self::new(stage, kind, err.to_string())
    }
}

async fn materialize(
    run_id: &str,
    materializer: &dyn Materializer,
    result: &RunResult,
) -> MaterializationReport {
    match materializer.write(&result.files()).await {
        Ok(files_written) => MaterializationReport {
            files_written,
            error: None,
        },
        Err(e) => {
            obs::emit_materialize_error(run_id, &e);
            MaterializationReport {
                files_written: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Mutable bookkeeping for a run in progress.
struct RunRecord {
    run_id: Uuid,
    machine: RunMachine,
    plan: Option<Plan>,
    modules: BTreeMap<String, Module>,
    review: Option<ReviewReport>,
    started_at: DateTime<Utc>,
}

impl RunRecord {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            machine: RunMachine::new(),
            plan: None,
            modules: BTreeMap::new(),
            review: None,
            started_at: Utc::now(),
        }
    }

    /// Enter the next working stage unless the run was cancelled meanwhile.
    fn enter(&mut self, stage: Stage, cancel: &CancellationToken) -> Result<(), FailureDetail> {
        if cancel.is_cancelled() {
            return Err(FailureDetail::new(
                stage,
                FailureKind::Cancelled,
                format!("cancelled before {stage}"),
            ));
        }
        self.machine
            .advance(RunState::from(stage))
            .map_err(|e| FailureDetail::new(stage, FailureKind::Fatal, e.to_string()))
    }

    /// End the run early with `detail`.
    ///
    /// A fatal planning or review failure cancels the run's token so that no
    /// worker call keeps running on its behalf.
    fn stop(mut self, detail: FailureDetail, cancel: &CancellationToken) -> RunResult {
        let (state, status) = if detail.kind == FailureKind::Cancelled {
            (RunState::Cancelled, RunStatus::Cancelled)
        } else {
            (RunState::Failed, RunStatus::Failed)
        };
        if status == RunStatus::Failed && detail.stage != Stage::Building {
            cancel.cancel();
        }
        if let Err(e) = self.machine.advance(state) {
            warn!(error = %e, "run already terminal");
        }
        warn!(
            stage = %detail.stage,
            kind = ?detail.kind,
            error = %detail.message,
            "run stopped"
        );
        self.into_result(status, Some(detail))
    }

    fn finish(mut self) -> RunResult {
        if let Err(e) = self.machine.advance(RunState::Done) {
            warn!(error = %e, "could not complete run");
            let detail = FailureDetail::new(Stage::Reviewing, FailureKind::Fatal, e.to_string());
            return self.into_result(RunStatus::Failed, Some(detail));
        }
        self.into_result(RunStatus::Done, None)
    }

    fn into_result(self, status: RunStatus, failure: Option<FailureDetail>) -> RunResult {
        let result = RunResult {
            run_id: self.run_id,
            status,
            plan: self.plan,
            modules: self.modules,
            review: self.review,
            failure,
            transitions: self.machine.into_history(),
            materialization: None,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        obs::emit_run_finished(
            &result.run_id.to_string(),
            status,
            result.duration_ms(),
            result.modules.len(),
        );
        result
    }
}
