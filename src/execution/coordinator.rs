use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::api::ActionExecutor;
use crate::models::{ExecutionOutcome, Instrument, Partition};
use crate::persistence::InstrumentStore;
use crate::{Error, Result};

/// What happened to the work set of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub attempted: usize,
    pub executed: usize,
    pub failed: usize,
    pub unreachable: usize,
    pub errored: usize,
    pub last_execution_timestamp: i64,
}

/// Drives the action executor and applies its outcome to the store
///
/// ```text
/// PENDING(trigger=R) --SUCCEEDED--> REMOVED
/// PENDING(trigger=R) --FAILED--> FAILED(trigger=R)
/// FAILED(trigger=R)  --SUCCEEDED--> REMOVED
/// FAILED(trigger=R)  --FAILED--> FAILED(trigger=R)
/// any                --UNREACHABLE--> unchanged
/// ```
pub struct ExecutionCoordinator {
    executor: Arc<dyn ActionExecutor>,
    store: InstrumentStore,
    execution_timeout: Duration,
}

impl ExecutionCoordinator {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        store: InstrumentStore,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            store,
            execution_timeout,
        }
    }

    /// Execute `candidates` plus every instrument in the FAILED partition
    pub async fn run(
        &self,
        candidates: Vec<Instrument>,
        last_execution_timestamp: i64,
    ) -> Result<ExecutionReport> {
        let retry_set = self.store.values(Partition::Failed).await?;

        let mut report = ExecutionReport {
            last_execution_timestamp,
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for instrument in candidates.into_iter().chain(retry_set) {
            if !seen.insert(instrument.id.clone()) {
                continue;
            }
            report.attempted += 1;

            match self.execute_one(&instrument).await {
                Ok(()) => {
                    report.executed += 1;
                    if let Some(ts) = instrument.trigger_timestamp {
                        report.last_execution_timestamp = report.last_execution_timestamp.max(ts);
                    }
                }
                Err(Error::ExecutionFailed { .. }) => report.failed += 1,
                Err(Error::ExecutionUnreachable { .. }) => report.unreachable += 1,
                Err(e) => {
                    tracing::error!(id = %instrument.id, error = %e, "Execution errored, instrument left in place");
                    report.errored += 1;
                }
            }
        }

        Ok(report)
    }

    /// One executor call and the resulting store transition
    pub async fn execute_one(&self, instrument: &Instrument) -> Result<()> {
        // A deadline hit on either side of the executor counts as FAILED
        let outcome = match timeout(self.execution_timeout, self.executor.execute(instrument)).await {
            Ok(Err(Error::Timeout(reason))) => {
                tracing::warn!(id = %instrument.id, reason = %reason, "Executor timed out");
                ExecutionOutcome::Failed
            }
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    id = %instrument.id,
                    timeout_ms = self.execution_timeout.as_millis() as u64,
                    "Execution timed out"
                );
                ExecutionOutcome::Failed
            }
        };

        match outcome {
            ExecutionOutcome::Succeeded => {
                self.store.settle(instrument).await?;
                tracing::info!(
                    id = %instrument.id,
                    round_id = instrument.trigger_round_id,
                    from = %instrument.status,
                    "✅ Executed"
                );
                Ok(())
            }
            ExecutionOutcome::Failed => {
                self.store.upsert(Partition::Failed, instrument).await?;
                tracing::warn!(
                    id = %instrument.id,
                    round_id = instrument.trigger_round_id,
                    "❌ Execution failed, queued for retry"
                );
                Err(Error::ExecutionFailed {
                    id: instrument.id.clone(),
                })
            }
            ExecutionOutcome::Unreachable => {
                tracing::info!(id = %instrument.id, "Execution not reachable yet");
                Err(Error::ExecutionUnreachable {
                    id: instrument.id.clone(),
                })
            }
        }
    }
}
