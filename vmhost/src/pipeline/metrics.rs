#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

impl PipelineMetrics {
    pub fn task_duration_ms(&self, name: &str) -> Option<u128> {
        self.tasks
            .iter()
            .find(|task| task.name == name)
            .map(|task| task.duration_ms)
    }

    /// Emit one debug line with every task duration.
    pub fn log(&self, operation: &str) {
        let per_task = self
            .tasks
            .iter()
            .map(|task| format!("{}={}ms", task.name, task.duration_ms))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(
            operation,
            total_ms = self.total_duration_ms as u64,
            tasks = %per_task,
            "Pipeline finished"
        );
    }
}
