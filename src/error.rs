use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
#[error("pipeline stage `{stage}` failed: {source:#}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("real-world outcomes unavailable: {0:#}")]
    OutcomesUnavailable(anyhow::Error),
    #[error("predictions store failure: {0:#}")]
    Store(anyhow::Error),
}
