//! Stage definition for table-driven pipeline execution.

/// Execution mode for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run every task concurrently and wait for all of them
    Parallel,
    /// Run tasks one after another, stopping at the first failure
    Sequential,
}

/// A stage contains multiple tasks and an execution mode.
///
/// Stages are executed in order, and each stage's tasks are executed
/// according to the stage's execution mode (parallel or sequential).
#[derive(Debug, Clone)]
pub struct Stage<T> {
    pub tasks: Vec<T>,
    pub execution: ExecutionMode,
    /// Upper bound on concurrently running tasks (parallel stages only).
    pub max_parallel: Option<usize>,
}

impl<T> Stage<T> {
    /// Create a stage with parallel task execution.
    pub fn parallel(tasks: Vec<T>) -> Self {
        Self {
            tasks,
            execution: ExecutionMode::Parallel,
            max_parallel: None,
        }
    }

    /// Create a stage with sequential task execution.
    pub fn sequential(tasks: Vec<T>) -> Self {
        Self {
            tasks,
            execution: ExecutionMode::Sequential,
            max_parallel: None,
        }
    }

    /// Cap the number of tasks running at once. `None` or `Some(0)` means unbounded.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.max_parallel = limit.filter(|n| *n > 0);
        self
    }
}
