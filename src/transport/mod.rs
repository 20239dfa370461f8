//! Transport layer: one classified page fetch per call
//!
//! This module handles all HTTP traffic against the remote source:
//! - Building the shared HTTP client
//! - The primary structured-query protocol (GraphQL)
//! - The fallback resource-oriented protocol (REST search + detail fetches)
//! - Classifying raw responses into a small outcome taxonomy
//!
//! No retries happen here; retry policy lives in [`crate::policy`].

pub mod graphql;
pub mod rest;

pub use graphql::GithubGraphQlClient;
pub use rest::GithubRestClient;

use crate::credentials::Credential;
use crate::harvest::{HarvestTarget, HarvestedItem};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default endpoints of the real service
pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
pub const GITHUB_REST_URL: &str = "https://api.github.com";

/// Which request shape to use against the remote source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Primary: parameterized query + pagination cursor in one round trip
    #[default]
    GraphQl,
    /// Fallback: paged search plus per-item detail fetches
    Rest,
}

impl Protocol {
    pub fn fallback(self) -> Protocol {
        match self {
            Protocol::GraphQl => Protocol::Rest,
            Protocol::Rest => Protocol::GraphQl,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::GraphQl => write!(f, "graphql"),
            Protocol::Rest => write!(f, "rest"),
        }
    }
}

/// Flavors of errors that are worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Connection refused or reset
    Connect,
    /// Request timed out
    Timeout,
    /// Some other request-level failure
    Request,
    /// A success envelope whose shape made no sense
    MalformedResponse,
    /// An empty result on the very first page; indistinguishable from a
    /// hiccup of the remote search index, so not treated as end-of-data
    EmptyFirstPage,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientKind::Connect => write!(f, "connection error"),
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::Request => write!(f, "request error"),
            TransientKind::MalformedResponse => write!(f, "malformed response"),
            TransientKind::EmptyFirstPage => write!(f, "empty first page"),
        }
    }
}

/// Classified result of a single page fetch
#[derive(Debug)]
pub enum FetchOutcome {
    /// Successfully fetched and parsed one page
    Page {
        /// Items extracted from this page, in source order
        items: Vec<HarvestedItem>,
        /// Continuation token for the next page, if the source gave one
        next_cursor: Option<String>,
        /// Whether the source reports more pages
        has_more: bool,
    },

    /// The source explicitly signaled quota exhaustion
    RateLimited {
        /// How long the source asked us to wait, when it said
        retry_after: Option<Duration>,
    },

    /// Something went wrong that a retry may fix
    Transient { kind: TransientKind },

    /// The query itself is invalid; neither rotation nor fallback can help
    Fatal { detail: String },
}

/// Issues a single paginated fetch against the remote source
///
/// `cursor` is the opaque continuation token from the previous page (None for
/// the first page). Implementations perform exactly one logical page fetch
/// and classify the response; they never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        target: &HarvestTarget,
        cursor: Option<&str>,
        credential: &Credential,
        protocol: Protocol,
    ) -> FetchOutcome;
}

/// Combined client speaking both protocols against one service
pub struct GithubTransport {
    graphql: GithubGraphQlClient,
    rest: GithubRestClient,
}

impl GithubTransport {
    /// Creates a transport against the real GitHub endpoints
    pub fn new(client: Client, page_size: u32) -> Self {
        Self::with_endpoints(client, GITHUB_GRAPHQL_URL, GITHUB_REST_URL, page_size)
    }

    /// Creates a transport against custom endpoints (tests point this at a
    /// mock server)
    pub fn with_endpoints(
        client: Client,
        graphql_url: impl Into<String>,
        rest_url: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            graphql: GithubGraphQlClient::new(client.clone(), graphql_url, page_size),
            rest: GithubRestClient::new(client, rest_url, page_size),
        }
    }
}

#[async_trait]
impl Transport for GithubTransport {
    async fn fetch(
        &self,
        target: &HarvestTarget,
        cursor: Option<&str>,
        credential: &Credential,
        protocol: Protocol,
    ) -> FetchOutcome {
        tracing::debug!(
            "Fetching page for {} via {} (cursor: {:?}, credential #{})",
            target.key(),
            protocol,
            cursor,
            credential.index() + 1
        );

        match protocol {
            Protocol::GraphQl => self.graphql.fetch_page(target, cursor, credential).await,
            Protocol::Rest => self.rest.fetch_page(target, cursor, credential).await,
        }
    }
}

/// Builds the shared HTTP client
///
/// One client serves every target; reqwest multiplexes connections
/// internally.
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Extracts the quota-reset hint from rate-limit response headers
pub(crate) fn rate_limit_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let reset = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()?;
    let wait = reset.saturating_sub(chrono::Utc::now().timestamp()).max(0);
    Some(Duration::from_secs(wait as u64))
}

/// Whether the quota headers say this credential is spent
pub(crate) fn quota_exhausted(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "0")
        .unwrap_or(false)
}

/// Clips an error body for detail strings
pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Maps a reqwest error to the transient taxonomy
pub(crate) fn classify_request_error(e: &reqwest::Error) -> TransientKind {
    if e.is_timeout() {
        TransientKind::Timeout
    } else if e.is_connect() {
        TransientKind::Connect
    } else {
        TransientKind::Request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        let client = build_http_client("Gleaner/1.0");
        assert!(client.is_ok());
    }

    #[test]
    fn test_protocol_fallback_is_involutive() {
        assert_eq!(Protocol::GraphQl.fallback(), Protocol::Rest);
        assert_eq!(Protocol::Rest.fallback(), Protocol::GraphQl);
    }

    #[test]
    fn test_protocol_default_is_primary() {
        assert_eq!(Protocol::default(), Protocol::GraphQl);
    }
}
