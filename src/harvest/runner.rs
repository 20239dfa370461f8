//! Concurrent multi-target runner
//!
//! Runs any number of independent targets with a bounded number in flight at
//! once. Each target gets its own orchestrator and its own clone of the
//! credential pool, so one target's rotation never disturbs another's. One
//! failed target never stops the rest; every target produces a report.

use crate::checkpoint::CheckpointStore;
use crate::credentials::CredentialPool;
use crate::filter::ValidityFilter;
use crate::harvest::orchestrator::{HarvestOrchestrator, HarvestSettings};
use crate::harvest::{HarvestResult, HarvestTarget, TerminationReason};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of one target within a run
#[derive(Debug)]
pub struct TargetReport {
    pub target: HarvestTarget,
    pub result: HarvestResult,
}

impl TargetReport {
    /// Whether the target ran to natural completion
    pub fn is_complete(&self) -> bool {
        self.result.reason.is_complete()
    }
}

/// Runs all targets to completion, at most `max_concurrent` at a time
///
/// Reports come back in the order the targets were given, regardless of
/// which finished first. Every target yields a report: a panicking target
/// surfaces as `AbortedError` instead of disappearing from the output.
pub async fn run_targets(
    targets: Vec<HarvestTarget>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CheckpointStore>,
    filter: Arc<dyn ValidityFilter>,
    pool: CredentialPool,
    settings: HarvestSettings,
    max_concurrent: usize,
) -> Vec<TargetReport> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks: JoinSet<(usize, TargetReport)> = JoinSet::new();

    tracing::info!(
        "Running {} targets ({} at a time)",
        targets.len(),
        max_concurrent.max(1)
    );

    for (position, target) in targets.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let transport = Arc::clone(&transport);
        let store = Arc::clone(&store);
        let filter = Arc::clone(&filter);
        // Each target rotates through its own clone of the pool
        let pool = pool.clone();
        let settings = settings.clone();

        tasks.spawn(async move {
            // Semaphore is never closed while tasks run
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("admission semaphore closed");

            let orchestrator =
                HarvestOrchestrator::new(target.clone(), transport, store, filter, pool, settings);
            // The orchestrator runs in its own task so a panic inside it is
            // contained to this target
            let result = match tokio::spawn(orchestrator.run()).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Target {} task failed: {}", target.key(), e);
                    HarvestResult {
                        items: Vec::new(),
                        reason: TerminationReason::AbortedError {
                            detail: format!("target task failed: {}", e),
                        },
                    }
                }
            };
            (position, TargetReport { target, result })
        });
    }

    let mut slots: Vec<Option<TargetReport>> = targets.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, report)) => slots[position] = Some(report),
            Err(e) => tracing::error!("Target task failed: {}", e),
        }
    }

    // Any slot a task never filled still gets an abort report
    slots
        .into_iter()
        .zip(targets)
        .map(|(slot, target)| {
            slot.unwrap_or_else(|| TargetReport {
                target,
                result: HarvestResult {
                    items: Vec::new(),
                    reason: TerminationReason::AbortedError {
                        detail: "target task failed before reporting".to_string(),
                    },
                },
            })
        })
        .collect()
}
