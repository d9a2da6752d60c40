//! Generic table-driven pipeline execution framework.
//!
//! This module provides the fan-out primitive every cluster operation is built on:
//! - Table-driven execution plans (a list of stages)
//! - Parallel and sequential task execution modes
//! - Parallel stages that never cancel siblings: every task runs to completion and
//!   failures are collected into one aggregate error
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Stages → Tasks
//!
//! - Pipeline: Orchestrates execution of all stages, in order
//! - Stage: Groups related tasks with an execution mode (parallel/sequential)
//! - Task: Atomic unit of work (usually "one node")
//! ```
//!
//! A stage only starts once every task of the previous stage has finished, and
//! the pipeline stops after the first stage that reports a failure.
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{ExecutionPlan, PipelineBuilder, PipelineExecutor, Stage};
//!
//! let plan = ExecutionPlan::new(vec![
//!     Stage::parallel(vec![Box::new(LaunchNode(0)), Box::new(LaunchNode(1))]),
//!     Stage::sequential(vec![Box::new(InitMaster)]),
//! ]);
//!
//! let pipeline = PipelineBuilder::from_plan("start", plan);
//! let metrics = PipelineExecutor::execute(pipeline, ctx).await?;
//! println!("start took {}ms", metrics.total_duration_ms);
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, Pipeline, PipelineBuilder, PipelineExecutor};
pub use stage::{ExecutionMode, Stage};
pub use task::{BoxedTask, PipelineTask};
