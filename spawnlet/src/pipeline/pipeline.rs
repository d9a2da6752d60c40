//! Generic pipeline execution framework.
//!
//! Provides a table-driven pipeline executor that can run stages containing tasks
//! in parallel or sequential mode.

use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::task::BoxedTask;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use spawnlet_shared::{SpawnletError, SpawnletResult, TaskFailure};
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }

    pub fn stages(self) -> Vec<Stage<BoxedTask<Ctx>>> {
        self.stages
    }
}

pub struct Pipeline<Ctx> {
    operation: String,
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> Pipeline<Ctx> {
    pub fn new(operation: impl Into<String>, stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self {
            operation: operation.into(),
            stages,
        }
    }
}

pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn from_plan<Ctx>(operation: impl Into<String>, plan: ExecutionPlan<Ctx>) -> Pipeline<Ctx> {
        Pipeline::new(operation, plan.stages())
    }
}

/// Outcome of one task: (position in stage, task name, duration, result).
type TaskOutcome = (usize, String, u128, SpawnletResult<()>);

/// Pipeline executor framework.
///
/// The actual task execution logic is provided by task implementations.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a pipeline.
    ///
    /// Iterates through stages and executes their tasks according to the stage's
    /// execution mode. A parallel stage always waits for every task it dispatched;
    /// if any of them failed, the pipeline returns `SpawnletError::Aggregate` and
    /// no later stage runs. A sequential stage stops at its first failure and
    /// returns that error unchanged.
    ///
    /// Generic over:
    /// - `Ctx`: Shared pipeline context (use interior mutability for writes)
    pub async fn execute<Ctx>(pipeline: Pipeline<Ctx>, ctx: Ctx) -> SpawnletResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::new();
        let operation = pipeline.operation;

        for (index, stage) in pipeline.stages.into_iter().enumerate() {
            let execution = stage.execution;
            let stage_start = Instant::now();

            let task_metrics = match execution {
                ExecutionMode::Parallel => {
                    let limit = stage.max_parallel;
                    let outcomes = run_parallel(stage.tasks, ctx.clone(), limit).await;
                    collect_parallel(&operation, outcomes)?
                }
                ExecutionMode::Sequential => {
                    let mut task_metrics = Vec::new();
                    for task in stage.tasks {
                        let name = task.name().to_string();
                        let task_start = Instant::now();
                        task.run(ctx.clone()).await.inspect_err(|e| {
                            tracing::error!(operation = %operation, task = %name, "Task failed: {}", e);
                        })?;
                        tracing::info!(operation = %operation, task = %name, "Task succeeded");
                        task_metrics.push(TaskMetrics {
                            name,
                            duration_ms: task_start.elapsed().as_millis(),
                            succeeded: true,
                        });
                    }
                    task_metrics
                }
            };

            stage_metrics.push(StageMetrics {
                index,
                execution,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        })
    }
}

/// Run every task to completion, optionally bounded to `limit` at a time.
///
/// A failing task never cancels its siblings.
async fn run_parallel<Ctx>(
    tasks: Vec<BoxedTask<Ctx>>,
    ctx: Ctx,
    limit: Option<usize>,
) -> Vec<TaskOutcome>
where
    Ctx: Clone,
{
    let futures = tasks.into_iter().enumerate().map(|(position, task)| {
        let ctx = ctx.clone();
        async move {
            let name = task.name().to_string();
            let task_start = Instant::now();
            let result = task.run(ctx).await;
            (position, name, task_start.elapsed().as_millis(), result)
        }
    });

    let mut outcomes: Vec<TaskOutcome> = match limit {
        Some(limit) => stream::iter(futures).buffer_unordered(limit).collect().await,
        None => join_all(futures).await,
    };
    outcomes.sort_by_key(|(position, ..)| *position);
    outcomes
}

fn collect_parallel(
    operation: &str,
    outcomes: Vec<TaskOutcome>,
) -> SpawnletResult<Vec<TaskMetrics>> {
    let mut metrics = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for (position, name, duration_ms, result) in outcomes {
        let succeeded = result.is_ok();
        if let Err(error) = result {
            tracing::error!(operation = %operation, task = %name, "Task failed: {}", error);
            failures.push(TaskFailure {
                index: position,
                task: name.clone(),
                error,
            });
        } else {
            tracing::info!(operation = %operation, task = %name, duration_ms, "Task succeeded");
        }
        metrics.push(TaskMetrics {
            name,
            duration_ms,
            succeeded,
        });
    }

    if failures.is_empty() {
        Ok(metrics)
    } else {
        Err(SpawnletError::Aggregate {
            operation: operation.to_string(),
            failures,
        })
    }
}
