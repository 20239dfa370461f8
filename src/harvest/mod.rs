//! Harvesting engine: targets, items, results, and the orchestrator
//!
//! This module defines the data model shared by the whole engine and hosts
//! the per-target orchestrator plus the concurrent multi-target runner.

pub mod orchestrator;
pub mod runner;

pub use orchestrator::HarvestOrchestrator;
pub use runner::{run_targets, TargetReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What kind of data a target collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// PR review comments authored by one GitHub user
    Comments,
    /// Candidate expert profiles matching one search query
    Experts,
}

/// One unit of harvesting work
///
/// Created by the caller and read-only to the engine. `resume == false`
/// requests a full historical rescan: any persisted cursor for the target is
/// ignored and cleared, and previously seen items may be re-emitted.
#[derive(Debug, Clone)]
pub struct HarvestTarget {
    pub kind: TargetKind,
    /// Username for `Comments`, search query for `Experts`
    pub name: String,
    /// Stop once this many items have been merged
    pub limit: usize,
    /// Continue from the persisted cursor if one exists
    pub resume: bool,
}

impl HarvestTarget {
    pub fn comments(username: impl Into<String>, limit: usize) -> Self {
        Self {
            kind: TargetKind::Comments,
            name: username.into(),
            limit,
            resume: true,
        }
    }

    pub fn experts(query: impl Into<String>, limit: usize) -> Self {
        Self {
            kind: TargetKind::Experts,
            name: query.into(),
            limit,
            resume: true,
        }
    }

    /// Opaque key identifying this target in the checkpoint store
    pub fn key(&self) -> String {
        match self.kind {
            TargetKind::Comments => format!("comments/{}", self.name),
            TargetKind::Experts => format!("experts/{}", self.name),
        }
    }
}

/// A single PR review comment collected for an expert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// "owner/name" of the repository
    pub repo: String,
    pub pr_number: u64,
    pub pr_title: String,
    /// Path of the file the comment is attached to
    pub file_path: Option<String>,
    /// The comment text itself
    pub body: String,
    /// The diff hunk the comment was made against
    pub diff_context: Option<String>,
    /// Canonical URL of the comment; empty when the source gave none
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A candidate expert profile found by a search query
///
/// Raw activity counts only; turning these into a ranking score is a
/// downstream concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub login: String,
    pub followers: u64,
    /// Stars across non-fork repositories the user owns
    pub stars: u64,
    pub pull_requests: u64,
    /// Count of PR review contributions
    pub review_contributions: u64,
}

/// A single unit of collected data, immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HarvestedItem {
    Comment(ReviewComment),
    Profile(ExpertProfile),
}

impl HarvestedItem {
    /// Stable unique key used for deduplication
    ///
    /// Comments use their canonical URL; when the source provided none, a
    /// composite hash of the identifying fields stands in. Profiles are keyed
    /// by login.
    pub fn identity_key(&self) -> String {
        match self {
            HarvestedItem::Comment(c) => {
                if !c.url.is_empty() {
                    c.url.clone()
                } else {
                    let mut hasher = Sha256::new();
                    hasher.update(c.repo.as_bytes());
                    hasher.update(c.pr_number.to_le_bytes());
                    hasher.update(c.file_path.as_deref().unwrap_or("").as_bytes());
                    hasher.update(c.body.as_bytes());
                    format!("comment:{}", hex::encode(hasher.finalize()))
                }
            }
            HarvestedItem::Profile(p) => format!("user:{}", p.login),
        }
    }
}

/// Why a harvest stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The target item limit was reached
    LimitReached,
    /// The remote source signaled no more pages
    SourceExhausted,
    /// A non-retryable error ended the harvest
    AbortedError { detail: String },
    /// Every credential and the fallback protocol were tried and failed
    CredentialsExhausted,
}

impl TerminationReason {
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            TerminationReason::LimitReached | TerminationReason::SourceExhausted
        )
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::LimitReached => write!(f, "limit reached"),
            TerminationReason::SourceExhausted => write!(f, "source exhausted"),
            TerminationReason::AbortedError { detail } => write!(f, "aborted: {}", detail),
            TerminationReason::CredentialsExhausted => {
                write!(f, "all credentials exhausted")
            }
        }
    }
}

/// What a completed or partial harvest hands to the downstream consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestResult {
    /// Items in fetch order, unique by identity key
    pub items: Vec<HarvestedItem>,
    pub reason: TerminationReason,
}
