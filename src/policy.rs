//! Retry policy: one decision table for every failure path
//!
//! Every "rotate token or fall back to REST" decision lives in a single
//! table consulted by the orchestrator after each classified fetch, so no
//! call site carries its own retry logic. Evaluation order:
//!
//! | Outcome                  | Rotation left | Fallback untried | Action            |
//! |--------------------------|---------------|------------------|-------------------|
//! | RateLimited / Transient  | yes           | -                | rotate + retry    |
//! | RateLimited / Transient  | no            | yes              | switch protocol   |
//! | RateLimited / Transient  | no            | no               | abort (exhausted) |
//! | Fatal                    | -             | -                | abort (fatal)     |
//! | Page                     | -             | -                | proceed           |
//!
//! Every retry carries a short fixed backoff so a just-rate-limited endpoint
//! is not hammered immediately after rotation.

use crate::transport::{FetchOutcome, Protocol};
use std::time::Duration;

/// Tracks what has already been tried for one target
#[derive(Debug, Clone)]
pub struct AttemptState {
    /// Protocol currently in use
    pub protocol: Protocol,
    /// Credential rotations performed since the last success or protocol
    /// switch
    pub rotations_used: u32,
    /// Size of the credential pool this target draws from
    pub pool_size: u32,
    /// Whether switching to the fallback protocol is allowed at all
    pub fallback_enabled: bool,
    /// Whether the fallback protocol has already been switched to
    pub fallback_tried: bool,
}

impl AttemptState {
    pub fn new(protocol: Protocol, pool_size: usize, fallback_enabled: bool) -> Self {
        Self {
            protocol,
            rotations_used: 0,
            pool_size: pool_size as u32,
            fallback_enabled,
            fallback_tried: false,
        }
    }

    /// Whether another rotation is worth attempting
    ///
    /// A single-credential pool has nothing to rotate to; a full lap through
    /// the pool means every credential has had its chance for this page.
    pub fn rotation_available(&self) -> bool {
        self.pool_size > 1 && self.rotations_used < self.pool_size
    }

    /// Whether the fallback protocol is still an option
    pub fn fallback_available(&self) -> bool {
        self.fallback_enabled && !self.fallback_tried
    }

    /// Records a performed rotation
    pub fn record_rotation(&mut self) {
        self.rotations_used += 1;
    }

    /// Switches to the fallback protocol, resetting the rotation budget
    pub fn switch_to_fallback(&mut self) {
        self.protocol = self.protocol.fallback();
        self.fallback_tried = true;
        self.rotations_used = 0;
    }

    /// A successful page clears the rotation tally; later errors get a fresh
    /// budget
    pub fn record_success(&mut self) {
        self.rotations_used = 0;
    }
}

/// Why a target must stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortCause {
    /// The query itself is broken; retrying cannot fix it
    Fatal { detail: String },
    /// Rotation and fallback are both spent
    CredentialsExhausted,
}

/// What the orchestrator should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The outcome was a page; carry on normally
    Proceed,
    /// Rotate to the next credential, wait, and re-fetch the same page
    RotateAndRetry { backoff: Duration },
    /// Switch to the fallback protocol, wait, and re-fetch
    SwitchProtocol { backoff: Duration },
    /// Terminate the target with the given cause
    Abort(AbortCause),
}

/// The decision table, parameterized only by the retry backoff
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    backoff: Duration,
}

impl ErrorPolicy {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Decides the next action for a classified outcome
    pub fn decide(&self, outcome: &FetchOutcome, attempts: &AttemptState) -> Action {
        match outcome {
            FetchOutcome::Page { .. } => Action::Proceed,

            FetchOutcome::RateLimited { retry_after } => {
                if let Some(hint) = retry_after {
                    tracing::debug!("Source asked for a {:?} pause before retrying", hint);
                }
                self.recoverable(attempts)
            }

            FetchOutcome::Transient { kind } => {
                tracing::debug!("Transient outcome: {}", kind);
                self.recoverable(attempts)
            }

            FetchOutcome::Fatal { detail } => Action::Abort(AbortCause::Fatal {
                detail: detail.clone(),
            }),
        }
    }

    fn recoverable(&self, attempts: &AttemptState) -> Action {
        if attempts.rotation_available() {
            Action::RotateAndRetry {
                backoff: self.backoff,
            }
        } else if attempts.fallback_available() {
            Action::SwitchProtocol {
                backoff: self.backoff,
            }
        } else {
            Action::Abort(AbortCause::CredentialsExhausted)
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}
