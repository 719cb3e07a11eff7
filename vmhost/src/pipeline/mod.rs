//! Table-driven sequential pipeline.
//!
//! ```text
//! ExecutionPlan → [task, task, ...] → PipelineMetrics
//! ```
//!
//! Tasks run one after another against a shared context. After each task
//! the executor calls an observer with the task's metrics and position, so
//! callers can report progress per durable step. The first failing task
//! stops the pipeline and its error is returned unchanged.
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![Box::new(TaskA), Box::new(TaskB)]);
//! let ctx = Arc::new(Mutex::new(Context::default()));
//! let metrics = PipelineExecutor::execute(plan, ctx, |step| {
//!     println!("{} done ({}/{})", step.task.name, step.completed, step.total);
//! })
//! .await?;
//! ```

mod metrics;
mod task;

use std::time::Instant;

pub use metrics::{PipelineMetrics, TaskMetrics};
pub use task::{BoxedTask, PipelineTask};

use crate::errors::VmhostResult;

/// Ordered list of tasks to run.
pub struct ExecutionPlan<Ctx> {
    tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Reported to the observer after each successful task.
#[derive(Debug, Clone)]
pub struct StepReport<'a> {
    pub task: &'a TaskMetrics,
    pub completed: usize,
    pub total: usize,
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Run every task in `plan` in order.
    ///
    /// `Ctx` is cloned per task (use `Arc<Mutex<_>>` for shared writes).
    pub async fn execute<Ctx, F>(
        plan: ExecutionPlan<Ctx>,
        ctx: Ctx,
        mut on_step: F,
    ) -> VmhostResult<PipelineMetrics>
    where
        Ctx: Clone,
        F: FnMut(StepReport<'_>),
    {
        let total_start = Instant::now();
        let total = plan.tasks.len();
        let mut tasks = Vec::with_capacity(total);

        for (index, task) in plan.tasks.into_iter().enumerate() {
            let name = task.name().to_string();
            let task_start = Instant::now();
            task.run(ctx.clone()).await?;

            tasks.push(TaskMetrics {
                name,
                duration_ms: task_start.elapsed().as_millis(),
            });
            if let Some(last) = tasks.last() {
                on_step(StepReport {
                    task: last,
                    completed: index + 1,
                    total,
                });
            }
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            tasks,
        })
    }
}
