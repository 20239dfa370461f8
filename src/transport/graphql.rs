//! Primary protocol: GitHub GraphQL
//!
//! One query per target kind, both paginated by an opaque `after` cursor.
//! The response envelope carries data, errors, and rate-limit signals all in
//! one shape; classification distinguishes a quota error inside a 200
//! envelope from transport-level failures.

use crate::credentials::Credential;
use crate::harvest::{
    ExpertProfile, HarvestTarget, HarvestedItem, ReviewComment, TargetKind,
};
use crate::transport::{
    classify_request_error, quota_exhausted, rate_limit_hint, truncate_body, FetchOutcome,
    TransientKind,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Query for PR review comments authored by one user
const COMMENTS_QUERY: &str = r#"
query ($login: String!, $first: Int!, $after: String) {
  user(login: $login) {
    pullRequests(first: $first, after: $after) {
      pageInfo {
        endCursor
        hasNextPage
      }
      nodes {
        number
        title
        repository {
          nameWithOwner
        }
        reviewThreads(first: 50) {
          nodes {
            comments(first: 50) {
              nodes {
                author {
                  login
                }
                body
                path
                diffHunk
                createdAt
                url
              }
            }
          }
        }
      }
    }
  }
}
"#;

/// Query for candidate expert profiles matching a search string
const EXPERTS_QUERY: &str = r#"
query ($queryString: String!, $first: Int!, $after: String) {
  search(query: $queryString, type: USER, first: $first, after: $after) {
    pageInfo {
      endCursor
      hasNextPage
    }
    edges {
      node {
        ... on User {
          login
          followers {
            totalCount
          }
          repositories(first: 50, isFork: false, ownerAffiliations: OWNER) {
            nodes {
              stargazerCount
            }
          }
          pullRequests {
            totalCount
          }
          contributionsCollection {
            pullRequestReviewContributions {
              totalCount
            }
          }
        }
      }
    }
  }
}
"#;

/// GraphQL client for the primary protocol
pub struct GithubGraphQlClient {
    client: Client,
    url: String,
    page_size: u32,
}

impl GithubGraphQlClient {
    pub fn new(client: Client, url: impl Into<String>, page_size: u32) -> Self {
        Self {
            client,
            url: url.into(),
            page_size,
        }
    }

    /// Fetches and classifies a single page for the target
    pub async fn fetch_page(
        &self,
        target: &HarvestTarget,
        cursor: Option<&str>,
        credential: &Credential,
    ) -> FetchOutcome {
        let (query, variables) = match target.kind {
            TargetKind::Comments => (
                COMMENTS_QUERY,
                json!({
                    "login": target.name,
                    "first": self.page_size,
                    "after": cursor,
                }),
            ),
            TargetKind::Experts => (
                EXPERTS_QUERY,
                json!({
                    "queryString": target.name,
                    "first": self.page_size.min(10),
                    "after": cursor,
                }),
            ),
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(credential.secret())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("GraphQL request failed: {}", e);
                return FetchOutcome::Transient {
                    kind: classify_request_error(&e),
                };
            }
        };

        let status = response.status();
        let headers = response.headers().clone();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return FetchOutcome::RateLimited {
                retry_after: rate_limit_hint(&headers),
            };
        }

        if status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return classify_forbidden(&headers, &body);
        }

        if !status.is_success() {
            tracing::warn!("GraphQL endpoint returned HTTP {}", status);
            return FetchOutcome::Transient {
                kind: TransientKind::Request,
            };
        }

        let envelope: Envelope = match response.json().await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("GraphQL envelope did not parse: {}", e);
                return FetchOutcome::Transient {
                    kind: TransientKind::MalformedResponse,
                };
            }
        };

        if let Some(outcome) = classify_errors(envelope.errors.as_deref()) {
            return outcome;
        }

        let data = match envelope.data {
            Some(d) => d,
            None => {
                return FetchOutcome::Transient {
                    kind: TransientKind::MalformedResponse,
                }
            }
        };

        match target.kind {
            TargetKind::Comments => extract_comments(data, &target.name, cursor),
            TargetKind::Experts => extract_experts(data, cursor),
        }
    }
}

/// Classifies an HTTP 403 from the GraphQL endpoint
///
/// A 403 only means quota exhaustion when the response says so, in the body
/// or in the remaining-quota header. Anything else (SAML enforcement, a
/// blocked token) cannot be fixed by rotation or fallback.
fn classify_forbidden(headers: &reqwest::header::HeaderMap, body: &str) -> FetchOutcome {
    if quota_exhausted(headers) || body.to_lowercase().contains("rate limit") {
        FetchOutcome::RateLimited {
            retry_after: rate_limit_hint(headers),
        }
    } else {
        FetchOutcome::Fatal {
            detail: format!("HTTP 403: {}", truncate_body(body)),
        }
    }
}

/// Classifies the GraphQL `errors` array, if present
///
/// A `RATE_LIMITED` error type is a same-response quota signal; `NOT_FOUND`
/// means the query names something that does not exist, which no amount of
/// retrying will fix. Anything else is treated as a server-side hiccup.
fn classify_errors(errors: Option<&[ApiError]>) -> Option<FetchOutcome> {
    let errors = errors?;
    if errors.is_empty() {
        return None;
    }

    let describe = || {
        errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    };

    for error in errors {
        let kind = error.kind.as_deref().unwrap_or("");
        let message = error.message.to_lowercase();

        if kind == "RATE_LIMITED" || message.contains("rate limit") || message.contains("ratelimit")
        {
            tracing::info!("Quota exhaustion reported inside the response envelope");
            return Some(FetchOutcome::RateLimited { retry_after: None });
        }

        if kind == "NOT_FOUND" {
            return Some(FetchOutcome::Fatal { detail: describe() });
        }
    }

    tracing::warn!("GraphQL errors: {}", describe());
    Some(FetchOutcome::Transient {
        kind: TransientKind::MalformedResponse,
    })
}

fn extract_comments(data: serde_json::Value, username: &str, cursor: Option<&str>) -> FetchOutcome {
    let data: CommentsData = match serde_json::from_value(data) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Unexpected comments payload shape: {}", e);
            return FetchOutcome::Transient {
                kind: TransientKind::MalformedResponse,
            };
        }
    };

    let user = match data.user {
        Some(u) => u,
        None => {
            // The user object vanished from a 200 envelope; likely a hiccup
            return FetchOutcome::Transient {
                kind: TransientKind::MalformedResponse,
            };
        }
    };

    let connection = user.pull_requests;

    if connection.nodes.is_empty() && cursor.is_none() {
        // Suspicious: indistinguishable from a transient search-index failure
        return FetchOutcome::Transient {
            kind: TransientKind::EmptyFirstPage,
        };
    }

    let mut items = Vec::new();
    for pr in &connection.nodes {
        for thread in &pr.review_threads.nodes {
            for comment in &thread.comments.nodes {
                let author = match &comment.author {
                    Some(a) => a.login.as_str(),
                    None => continue,
                };
                if !author.eq_ignore_ascii_case(username) {
                    continue;
                }

                items.push(HarvestedItem::Comment(ReviewComment {
                    repo: pr.repository.name_with_owner.clone(),
                    pr_number: pr.number,
                    pr_title: pr.title.clone(),
                    file_path: comment.path.clone(),
                    body: comment.body.clone(),
                    diff_context: comment.diff_hunk.clone(),
                    url: comment.url.clone().unwrap_or_default(),
                    created_at: comment.created_at,
                }));
            }
        }
    }

    FetchOutcome::Page {
        items,
        next_cursor: connection.page_info.end_cursor,
        has_more: connection.page_info.has_next_page,
    }
}

fn extract_experts(data: serde_json::Value, cursor: Option<&str>) -> FetchOutcome {
    let data: ExpertsData = match serde_json::from_value(data) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Unexpected experts payload shape: {}", e);
            return FetchOutcome::Transient {
                kind: TransientKind::MalformedResponse,
            };
        }
    };

    let connection = data.search;

    if connection.edges.is_empty() && cursor.is_none() {
        return FetchOutcome::Transient {
            kind: TransientKind::EmptyFirstPage,
        };
    }

    let mut items = Vec::new();
    for edge in &connection.edges {
        // Non-user search hits deserialize to an empty node
        let node = match &edge.node {
            Some(n) if n.login.is_some() => n,
            _ => continue,
        };

        let stars = node
            .repositories
            .as_ref()
            .map(|r| r.nodes.iter().map(|repo| repo.stargazer_count).sum())
            .unwrap_or(0);

        items.push(HarvestedItem::Profile(ExpertProfile {
            login: node.login.clone().unwrap_or_default(),
            followers: node.followers.as_ref().map(|f| f.total_count).unwrap_or(0),
            stars,
            pull_requests: node
                .pull_requests
                .as_ref()
                .map(|p| p.total_count)
                .unwrap_or(0),
            review_contributions: node
                .contributions_collection
                .as_ref()
                .map(|c| c.pull_request_review_contributions.total_count)
                .unwrap_or(0),
        }));
    }

    FetchOutcome::Page {
        items,
        next_cursor: connection.page_info.end_cursor,
        has_more: connection.page_info.has_next_page,
    }
}

// --- Wire envelope types ---

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<serde_json::Value>,
    errors: Option<Vec<ApiError>>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct CommentsData {
    user: Option<UserNode>,
}

#[derive(Debug, Deserialize)]
struct UserNode {
    #[serde(rename = "pullRequests")]
    pull_requests: PrConnection,
}

#[derive(Debug, Deserialize)]
struct PrConnection {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<PrNode>,
}

#[derive(Debug, Deserialize)]
struct PrNode {
    number: u64,
    title: String,
    repository: RepositoryNode,
    #[serde(rename = "reviewThreads")]
    review_threads: ThreadConnection,
}

#[derive(Debug, Deserialize)]
struct RepositoryNode {
    #[serde(rename = "nameWithOwner")]
    name_with_owner: String,
}

#[derive(Debug, Deserialize)]
struct ThreadConnection {
    #[serde(default)]
    nodes: Vec<ThreadNode>,
}

#[derive(Debug, Deserialize)]
struct ThreadNode {
    comments: CommentConnection,
}

#[derive(Debug, Deserialize)]
struct CommentConnection {
    #[serde(default)]
    nodes: Vec<CommentNode>,
}

#[derive(Debug, Deserialize)]
struct CommentNode {
    author: Option<AuthorNode>,
    body: String,
    path: Option<String>,
    #[serde(rename = "diffHunk")]
    diff_hunk: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorNode {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ExpertsData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
struct SearchConnection {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<SearchEdge>,
}

#[derive(Debug, Deserialize)]
struct SearchEdge {
    node: Option<SearchUserNode>,
}

#[derive(Debug, Deserialize)]
struct SearchUserNode {
    login: Option<String>,
    followers: Option<CountNode>,
    repositories: Option<RepoConnection>,
    #[serde(rename = "pullRequests")]
    pull_requests: Option<CountNode>,
    #[serde(rename = "contributionsCollection")]
    contributions_collection: Option<ContributionsNode>,
}

#[derive(Debug, Deserialize)]
struct CountNode {
    #[serde(rename = "totalCount")]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct RepoConnection {
    #[serde(default)]
    nodes: Vec<RepoNode>,
}

#[derive(Debug, Deserialize)]
struct RepoNode {
    #[serde(rename = "stargazerCount")]
    stargazer_count: u64,
}

#[derive(Debug, Deserialize)]
struct ContributionsNode {
    #[serde(rename = "pullRequestReviewContributions")]
    pull_request_review_contributions: CountNode,
}
