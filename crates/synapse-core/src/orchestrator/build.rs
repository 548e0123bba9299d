//! Building stage: bounded parallel generation of every subtask.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::aggregator::{Aggregate, AggregatorError, ResultAggregator, SubtaskOutcome};
use crate::domain::{Module, Plan, Result, Subtask, Task};
use crate::obs;
use crate::retry::{RetryError, RetryPolicy};
use crate::worker::{GeneratorOutput, Worker, WorkerRequest};

use super::call_validated;

/// Everything the build stage shares across its subtasks.
pub(crate) struct BuildStage {
    pub run_id: String,
    pub task: Arc<Task>,
    pub plan: Arc<Plan>,
    pub generator: Arc<dyn Worker>,
    pub policy: RetryPolicy,
    pub max_concurrency: usize,
    pub cancel: CancellationToken,
}

impl BuildStage {
    /// Generate every subtask and return the finalized aggregate.
    ///
    /// Subtasks are dispatched in order; a slot is acquired before each
    /// dispatch. Once cancellation fires, subtasks not yet dispatched are
    /// reported as cancelled and in-flight ones abandon their worker call.
    pub(crate) async fn run(self, subtasks: Vec<Subtask>) -> Result<Aggregate> {
        let aggregator = Arc::new(ResultAggregator::new(&subtasks));
        let all = subtasks.clone();
        let total = all.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let mut set = JoinSet::new();

        let mut pending = subtasks.into_iter();
        while let Some(subtask) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                for skipped in std::iter::once(subtask).chain(pending.by_ref()) {
                    aggregator.collect(&skipped, SubtaskOutcome::Cancelled).await?;
                }
                break;
            };

            debug!(path = %subtask.path, index = subtask.index, "dispatching subtask");
            let aggregator = Arc::clone(&aggregator);
            let ctx = SubtaskContext {
                run_id: self.run_id.clone(),
                task: Arc::clone(&self.task),
                plan: Arc::clone(&self.plan),
                generator: Arc::clone(&self.generator),
                policy: self.policy,
                cancel: self.cancel.clone(),
            };
            set.spawn(
                async move {
                    let outcome = ctx.generate(&subtask).await;
                    drop(permit);
                    aggregator.collect(&subtask, outcome).await?;
                    let reported = aggregator.reported().await;
                    debug!(path = %subtask.path, reported, total, "subtask reported");
                    Ok::<_, AggregatorError>(())
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(collected) => collected?,
                Err(e) => warn!(error = %e, "subtask task ended without reporting"),
            }
        }

        // A panicking generator never reports; account for it so the
        // aggregate still covers every subtask.
        match aggregator.finalize().await {
            Err(AggregatorError::Incomplete { missing }) => {
                for orphan in all.iter().filter(|s| missing.contains(&s.path)) {
                    let outcome = SubtaskOutcome::Failed {
                        attempts: 0,
                        reason: "subtask task aborted".to_string(),
                    };
                    aggregator.collect(orphan, outcome).await?;
                }
                Ok(aggregator.finalize().await?)
            }
            other => Ok(other?),
        }
    }
}

struct SubtaskContext {
    run_id: String,
    task: Arc<Task>,
    plan: Arc<Plan>,
    generator: Arc<dyn Worker>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl SubtaskContext {
    async fn generate(&self, subtask: &Subtask) -> SubtaskOutcome {
        let request = WorkerRequest::for_generator(&self.task, &self.plan, subtask);
        let generator = self.generator.as_ref();
        let path = subtask.path.as_str();
        let mut last_attempt = 0;

        let result = self
            .policy
            .execute(&self.cancel, |attempt| {
                last_attempt = attempt;
                let request = &request;
                async move {
                    let value = call_validated(generator, request).await?;
                    GeneratorOutput::parse(value)?.take(path)
                }
            })
            .await;

        let (outcome, attempts) = match result {
            Ok(done) => (
                SubtaskOutcome::Generated(Module::generated(path, done.value, done.attempts)),
                done.attempts,
            ),
            Err(RetryError::Cancelled { attempts }) => (SubtaskOutcome::Cancelled, attempts),
            Err(err @ RetryError::Exhausted { attempts, .. }) => (
                SubtaskOutcome::Failed {
                    attempts,
                    reason: err.to_string(),
                },
                attempts,
            ),
            Err(err @ RetryError::Fatal(_)) => (
                SubtaskOutcome::Failed {
                    attempts: last_attempt,
                    reason: err.to_string(),
                },
                last_attempt,
            ),
        };

        obs::emit_subtask_finished(&self.run_id, path, outcome_label(&outcome), attempts);
        outcome
    }
}

fn outcome_label(outcome: &SubtaskOutcome) -> &'static str {
    match outcome {
        SubtaskOutcome::Generated(_) => "generated",
        SubtaskOutcome::Failed { .. } => "failed",
        SubtaskOutcome::Cancelled => "cancelled",
    }
}
