use crate::harvest::pipeline::{HarvestPipeline, HarvestResult};
use crate::traits::Transport;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Run lock unavailable: {0}")]
    RunLock(String),
}

/// Serializes harvest runs that share a store.
///
/// Two concurrent runs against one store could both see an inspection as new,
/// so every run goes through a single permit.
#[derive(Clone)]
pub struct HarvestExecutor {
    semaphore: Arc<Semaphore>,
}

impl HarvestExecutor {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    #[instrument(skip(self, pipeline))]
    pub async fn execute<T>(
        &self,
        pipeline: &HarvestPipeline<T>,
    ) -> Result<HarvestResult, ExecutorError>
    where
        T: Transport,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ExecutorError::RunLock(e.to_string()))?;

        info!("Starting harvest run");
        let result = pipeline.run_with_stats().await;
        info!(new = result.new_inspections.len(), "Finished harvest run");

        Ok(result)
    }

    /// Stops accepting runs; pending and future `execute` calls fail.
    pub fn shutdown(&self) {
        self.semaphore.close();
    }
}

impl Default for HarvestExecutor {
    fn default() -> Self {
        Self::new()
    }
}
