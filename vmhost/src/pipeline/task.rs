//! Task trait for pipeline execution.

use async_trait::async_trait;

use crate::errors::VmhostResult;

/// One step of a pipeline.
///
/// Tasks receive a clone of the shared context; write results back through
/// interior mutability.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> VmhostResult<()>;

    /// Stable name used in metrics and logs.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
