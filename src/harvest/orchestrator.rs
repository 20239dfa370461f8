//! Per-target harvest orchestration
//!
//! One orchestrator drives one target through
//! `Idle → Fetching → {Merging → Checkpointing → Fetching}* → Terminated`.
//! It owns the cursor, invokes the transport, consults the error policy, and
//! persists progress after every page. Whatever happens, the caller gets a
//! [`HarvestResult`] with a definite termination reason; recoverable errors
//! never surface.

use crate::checkpoint::{CheckpointStore, Cursor};
use crate::credentials::CredentialPool;
use crate::filter::ValidityFilter;
use crate::harvest::{HarvestResult, HarvestTarget, TerminationReason};
use crate::merge::{keys_of, merge};
use crate::policy::{AbortCause, Action, AttemptState, ErrorPolicy};
use crate::transport::{FetchOutcome, Protocol, Transport};
use std::sync::Arc;
use std::time::Duration;

/// Knobs shared by every orchestrator of one run
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Protocol to start with (forcing `Rest` skips the primary entirely)
    pub initial_protocol: Protocol,
    /// Whether the policy may switch to the other protocol
    pub fallback_enabled: bool,
    /// Fixed pause before each retry
    pub retry_backoff: Duration,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            initial_protocol: Protocol::GraphQl,
            fallback_enabled: true,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Drives the fetch loop for a single target
///
/// Built fresh per target; retains nothing after [`run`](Self::run) returns.
pub struct HarvestOrchestrator {
    target: HarvestTarget,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CheckpointStore>,
    filter: Arc<dyn ValidityFilter>,
    pool: CredentialPool,
    policy: ErrorPolicy,
    settings: HarvestSettings,
}

impl HarvestOrchestrator {
    pub fn new(
        target: HarvestTarget,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CheckpointStore>,
        filter: Arc<dyn ValidityFilter>,
        pool: CredentialPool,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            target,
            transport,
            store,
            filter,
            pool,
            policy: ErrorPolicy::new(settings.retry_backoff),
            settings,
        }
    }

    /// Runs the harvest to a terminal state
    ///
    /// Partial success is a first-class outcome: on abort the result still
    /// carries every item merged so far, plus the reason the loop stopped.
    pub async fn run(mut self) -> HarvestResult {
        let key = self.target.key();
        tracing::info!(
            "Starting harvest for {} (limit: {}, resume: {})",
            key,
            self.target.limit,
            self.target.resume
        );

        let (mut items, mut cursor) = self.bootstrap(&key);

        // A resumed target may already be satisfied
        if items.len() >= self.target.limit {
            tracing::info!(
                "{} already has {} items, limit {} met without fetching",
                key,
                items.len(),
                self.target.limit
            );
            return HarvestResult {
                items,
                reason: TerminationReason::LimitReached,
            };
        }

        let mut attempts = AttemptState::new(
            self.settings.initial_protocol,
            self.pool.len(),
            self.settings.fallback_enabled,
        );

        // A persisted continuation token only means something to the
        // protocol that produced it
        if cursor.after.is_some() && cursor.protocol != attempts.protocol {
            tracing::info!(
                "Dropping {} cursor token, resuming via {} from the start",
                cursor.protocol,
                attempts.protocol
            );
            cursor.after = None;
        }

        loop {
            // Fetching
            let outcome = self
                .transport
                .fetch(
                    &self.target,
                    cursor.after.as_deref(),
                    self.pool.current(),
                    attempts.protocol,
                )
                .await;

            match self.policy.decide(&outcome, &attempts) {
                Action::Proceed => {
                    let (page_items, next_cursor, has_more) = match outcome {
                        FetchOutcome::Page {
                            items,
                            next_cursor,
                            has_more,
                        } => (items, next_cursor, has_more),
                        // The policy only answers Proceed for pages
                        _ => unreachable!("Proceed decided for a non-page outcome"),
                    };
                    attempts.record_success();

                    // Merging: validity filter, then dedup + append
                    let fetched = page_items.len();
                    let accepted: Vec<_> = page_items
                        .into_iter()
                        .filter(|item| self.filter.accept(item))
                        .collect();
                    if accepted.len() < fetched {
                        tracing::debug!(
                            "Validity filter dropped {} of {} items",
                            fetched - accepted.len(),
                            fetched
                        );
                    }

                    let seen = std::mem::take(&mut cursor.seen);
                    let (mut merged, mut keys) = merge(items, seen, accepted);

                    // Respect the limit exactly; a trimmed item's key must
                    // not linger in the seen set or resume would skip it
                    let overflowed = merged.len() > self.target.limit;
                    while merged.len() > self.target.limit {
                        if let Some(extra) = merged.pop() {
                            keys.remove(&extra.identity_key());
                        }
                    }

                    // After a trim the cursor stays on this page; a later
                    // run with a higher limit re-fetches it and picks the
                    // trimmed items up
                    if !overflowed {
                        cursor.after = next_cursor;
                    }
                    cursor.seen = keys;
                    cursor.protocol = attempts.protocol;

                    // Checkpointing: items first, cursor second, so the
                    // cursor never points past durably-merged data
                    let saved = self
                        .store
                        .save_items(&key, &merged)
                        .and_then(|_| self.store.save_cursor(&key, &cursor));
                    if let Err(e) = saved {
                        tracing::error!("Checkpoint write failed for {}: {}", key, e);
                        return HarvestResult {
                            items: merged,
                            reason: TerminationReason::AbortedError {
                                detail: format!("checkpoint write failed: {}", e),
                            },
                        };
                    }

                    items = merged;
                    tracing::info!(
                        "{}: {}/{} items collected",
                        key,
                        items.len(),
                        self.target.limit
                    );

                    if items.len() >= self.target.limit {
                        return HarvestResult {
                            items,
                            reason: TerminationReason::LimitReached,
                        };
                    }
                    if !has_more {
                        return HarvestResult {
                            items,
                            reason: TerminationReason::SourceExhausted,
                        };
                    }
                }

                Action::RotateAndRetry { backoff } => {
                    self.pool.rotate();
                    attempts.record_rotation();
                    tracing::info!(
                        "{}: retrying with credential {}/{}",
                        key,
                        self.pool.current().index() + 1,
                        self.pool.len()
                    );
                    tokio::time::sleep(backoff).await;
                }

                Action::SwitchProtocol { backoff } => {
                    attempts.switch_to_fallback();
                    tracing::info!("{}: switching to {} protocol", key, attempts.protocol);
                    // The old continuation token is foreign to the new
                    // protocol; the seen set keeps dedup intact
                    cursor.after = None;
                    tokio::time::sleep(backoff).await;
                }

                Action::Abort(cause) => {
                    let reason = match cause {
                        AbortCause::Fatal { detail } => {
                            tracing::error!("{}: fatal error: {}", key, detail);
                            TerminationReason::AbortedError { detail }
                        }
                        AbortCause::CredentialsExhausted => {
                            tracing::warn!("{}: all recovery options exhausted", key);
                            TerminationReason::CredentialsExhausted
                        }
                    };
                    return HarvestResult { items, reason };
                }
            }
        }
    }

    /// Loads resume state, or clears it for a full rescan
    fn bootstrap(&self, key: &str) -> (Vec<crate::harvest::HarvestedItem>, Cursor) {
        if !self.target.resume {
            tracing::info!("{}: full rescan requested, clearing checkpoint", key);
            if let Err(e) = self.store.clear(key) {
                tracing::warn!("Failed to clear checkpoint for {}: {}", key, e);
            }
            return (Vec::new(), Cursor::default());
        }

        let mut cursor = match self.store.load_cursor(key) {
            Ok(Some(c)) => c,
            Ok(None) => Cursor::default(),
            Err(e) => {
                tracing::warn!("Failed to load cursor for {}, starting fresh: {}", key, e);
                Cursor::default()
            }
        };

        let items = match self.store.load_items(key) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Failed to load items for {}, starting fresh: {}", key, e);
                Vec::new()
            }
        };

        if !items.is_empty() {
            tracing::info!("{}: resuming with {} persisted items", key, items.len());
        }

        // The seen set must cover every persisted item, even if the cursor
        // blob lags behind the item snapshot
        cursor.seen.append(&mut keys_of(&items));

        (items, cursor)
    }
}
