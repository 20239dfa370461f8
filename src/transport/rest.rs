//! Fallback protocol: GitHub REST
//!
//! The fallback trades the single-round-trip query of the primary protocol
//! for a paged search plus per-item detail fetches. Its continuation token is
//! the stringified next page number. The search request drives the page's
//! classification; a failing detail fetch only skips that one item, except
//! for rate limits, which bubble up so the policy can rotate credentials.

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
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// REST client for the fallback protocol
pub struct GithubRestClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

/// Classified failure of one REST request
enum RestError {
    RateLimited(Option<Duration>),
    Fatal(String),
    Transient(TransientKind),
}

impl From<RestError> for FetchOutcome {
    fn from(e: RestError) -> Self {
        match e {
            RestError::RateLimited(retry_after) => FetchOutcome::RateLimited { retry_after },
            RestError::Fatal(detail) => FetchOutcome::Fatal { detail },
            RestError::Transient(kind) => FetchOutcome::Transient { kind },
        }
    }
}

impl GithubRestClient {
    pub fn new(client: Client, base_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            client,
            base_url: base_url.into(),
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
        let page: u32 = cursor.and_then(|c| c.parse().ok()).unwrap_or(1);

        match target.kind {
            TargetKind::Comments => {
                self.fetch_comments_page(&target.name, page, cursor.is_none(), credential)
                    .await
            }
            TargetKind::Experts => {
                self.fetch_experts_page(&target.name, page, cursor.is_none(), credential)
                    .await
            }
        }
    }

    async fn fetch_comments_page(
        &self,
        username: &str,
        page: u32,
        first_page: bool,
        credential: &Credential,
    ) -> FetchOutcome {
        let search_url = format!("{}/search/issues", self.base_url);
        let q = format!("commenter:{} type:pr", username);
        let search: SearchIssuesResponse = match self
            .get_json(
                &search_url,
                &[
                    ("q", q),
                    ("page", page.to_string()),
                    ("per_page", self.page_size.to_string()),
                ],
                credential,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => return e.into(),
        };

        if search.items.is_empty() {
            if first_page {
                return FetchOutcome::Transient {
                    kind: TransientKind::EmptyFirstPage,
                };
            }
            return FetchOutcome::Page {
                items: vec![],
                next_cursor: None,
                has_more: false,
            };
        }

        let mut items = Vec::new();
        for issue in &search.items {
            let pr_url = match &issue.pull_request {
                Some(pr) => &pr.url,
                None => continue,
            };

            match self.fetch_pr_comments(pr_url, username, credential).await {
                Ok(mut comments) => items.append(&mut comments),
                Err(RestError::RateLimited(hint)) => {
                    // Quota died mid-page; surface it so the policy rotates
                    return FetchOutcome::RateLimited { retry_after: hint };
                }
                Err(_) => {
                    tracing::warn!("Skipping PR {} after detail fetch failure", pr_url);
                }
            }
        }

        let has_more = search.items.len() as u32 == self.page_size;
        FetchOutcome::Page {
            items,
            next_cursor: has_more.then(|| (page + 1).to_string()),
            has_more,
        }
    }

    /// Fetches review comments of one PR and keeps the target user's
    async fn fetch_pr_comments(
        &self,
        pr_url: &str,
        username: &str,
        credential: &Credential,
    ) -> Result<Vec<HarvestedItem>, RestError> {
        let detail: PrDetail = self.get_json(pr_url, &[], credential).await?;

        let comments_url = match &detail.review_comments_url {
            Some(u) => u.clone(),
            None => {
                tracing::warn!("PR {} exposes no review comments URL", pr_url);
                return Ok(vec![]);
            }
        };

        let comments: Vec<RestComment> = self.get_json(&comments_url, &[], credential).await?;
        let repo = repo_from_pr_url(pr_url).unwrap_or_default();

        Ok(comments
            .into_iter()
            .filter(|c| {
                c.user
                    .as_ref()
                    .map(|u| u.login.eq_ignore_ascii_case(username))
                    .unwrap_or(false)
            })
            .map(|c| {
                HarvestedItem::Comment(ReviewComment {
                    repo: repo.clone(),
                    pr_number: detail.number,
                    pr_title: detail.title.clone(),
                    file_path: c.path,
                    body: c.body,
                    diff_context: c.diff_hunk,
                    url: c.html_url.unwrap_or_default(),
                    created_at: c.created_at,
                })
            })
            .collect())
    }

    async fn fetch_experts_page(
        &self,
        query: &str,
        page: u32,
        first_page: bool,
        credential: &Credential,
    ) -> FetchOutcome {
        let search_url = format!("{}/search/users", self.base_url);
        let q = format!("{} followers:>1000 repos:>50", query);
        let search: SearchUsersResponse = match self
            .get_json(
                &search_url,
                &[
                    ("q", q),
                    ("page", page.to_string()),
                    ("per_page", self.page_size.to_string()),
                    ("sort", "followers".to_string()),
                    ("order", "desc".to_string()),
                ],
                credential,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => return e.into(),
        };

        if search.items.is_empty() {
            if first_page {
                return FetchOutcome::Transient {
                    kind: TransientKind::EmptyFirstPage,
                };
            }
            return FetchOutcome::Page {
                items: vec![],
                next_cursor: None,
                has_more: false,
            };
        }

        let mut items = Vec::new();
        for user in &search.items {
            match self.fetch_user_profile(&user.login, credential).await {
                Ok(profile) => items.push(HarvestedItem::Profile(profile)),
                Err(RestError::RateLimited(hint)) => {
                    return FetchOutcome::RateLimited { retry_after: hint };
                }
                Err(_) => {
                    tracing::warn!("Skipping user {} after detail fetch failure", user.login);
                }
            }
        }

        let has_more = search.items.len() as u32 == self.page_size;
        FetchOutcome::Page {
            items,
            next_cursor: has_more.then(|| (page + 1).to_string()),
            has_more,
        }
    }

    /// Assembles one profile from the per-user detail endpoints
    async fn fetch_user_profile(
        &self,
        login: &str,
        credential: &Credential,
    ) -> Result<ExpertProfile, RestError> {
        let user: UserDetail = self
            .get_json(&format!("{}/users/{}", self.base_url, login), &[], credential)
            .await?;

        let repos: Vec<RepoDetail> = self
            .get_json(
                &format!("{}/users/{}/repos", self.base_url, login),
                &[
                    ("per_page", "100".to_string()),
                    ("type", "owner".to_string()),
                ],
                credential,
            )
            .await?;
        let stars = repos.iter().map(|r| r.stargazers_count).sum();

        // The search API gives approximate counts for authored and
        // commented-on PRs
        let search_url = format!("{}/search/issues", self.base_url);
        let authored: CountResponse = self
            .get_json(
                &search_url,
                &[
                    ("q", format!("author:{} is:pr is:public", login)),
                    ("per_page", "1".to_string()),
                ],
                credential,
            )
            .await?;
        let reviewed: CountResponse = self
            .get_json(
                &search_url,
                &[
                    ("q", format!("commenter:{} is:pr is:public", login)),
                    ("per_page", "1".to_string()),
                ],
                credential,
            )
            .await?;

        Ok(ExpertProfile {
            login: login.to_string(),
            followers: user.followers,
            stars,
            pull_requests: authored.total_count,
            review_contributions: reviewed.total_count,
        })
    }

    /// One GET with classification; never retries
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        credential: &Credential,
    ) -> Result<T, RestError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Authorization", format!("token {}", credential.secret()))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("REST request to {} failed: {}", url, e);
                RestError::Transient(classify_request_error(&e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &body));
        }

        response.json().await.map_err(|e| {
            tracing::warn!("REST response from {} did not parse: {}", url, e);
            RestError::Transient(TransientKind::MalformedResponse)
        })
    }
}

/// Maps a non-success REST status to the error taxonomy
fn classify_status(
    status: StatusCode,
    headers: &reqwest::header::HeaderMap,
    body: &str,
) -> RestError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RestError::RateLimited(rate_limit_hint(headers)),
        StatusCode::FORBIDDEN => {
            if quota_exhausted(headers) || body.to_lowercase().contains("rate limit") {
                RestError::RateLimited(rate_limit_hint(headers))
            } else {
                RestError::Fatal(format!("HTTP 403: {}", truncate_body(body)))
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            RestError::Fatal(format!("HTTP {}: {}", status.as_u16(), truncate_body(body)))
        }
        _ => RestError::Transient(TransientKind::Request),
    }
}

/// Derives "owner/name" from an API PR URL
/// (`https://api.github.com/repos/{owner}/{name}/pulls/{n}`)
fn repo_from_pr_url(pr_url: &str) -> Option<String> {
    let url = Url::parse(pr_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    let repos_at = segments.iter().position(|s| *s == "repos")?;
    let owner = segments.get(repos_at + 1)?;
    let name = segments.get(repos_at + 2)?;
    Some(format!("{}/{}", owner, name))
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct SearchIssuesResponse {
    #[serde(default)]
    items: Vec<IssueItem>,
}

#[derive(Debug, Deserialize)]
struct IssueItem {
    pull_request: Option<PrRef>,
}

#[derive(Debug, Deserialize)]
struct PrRef {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PrDetail {
    number: u64,
    title: String,
    review_comments_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestComment {
    user: Option<UserRef>,
    body: String,
    path: Option<String>,
    diff_hunk: Option<String>,
    html_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct SearchUsersResponse {
    #[serde(default)]
    items: Vec<UserItem>,
}

#[derive(Debug, Deserialize)]
struct UserItem {
    login: String,
}

#[derive(Debug, Deserialize)]
struct UserDetail {
    #[serde(default)]
    followers: u64,
}

#[derive(Debug, Deserialize)]
struct RepoDetail {
    #[serde(default)]
    stargazers_count: u64,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    #[serde(default)]
    total_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_from_pr_url() {
        assert_eq!(
            repo_from_pr_url("https://api.github.com/repos/octo/widgets/pulls/42").as_deref(),
            Some("octo/widgets")
        );
    }

    #[test]
    fn test_repo_from_pr_url_rejects_garbage() {
        assert!(repo_from_pr_url("not a url").is_none());
        assert!(repo_from_pr_url("https://api.github.com/users/octo").is_none());
    }

    #[test]
    fn test_classify_403_rate_limit_body() {
        let headers = reqwest::header::HeaderMap::new();
        let e = classify_status(
            StatusCode::FORBIDDEN,
            &headers,
            "API rate limit exceeded for user",
        );
        assert!(matches!(e, RestError::RateLimited(None)));
    }

    #[test]
    fn test_classify_403_other_is_fatal() {
        let headers = reqwest::header::HeaderMap::new();
        let e = classify_status(StatusCode::FORBIDDEN, &headers, "Resource blocked");
        assert!(matches!(e, RestError::Fatal(_)));
    }

    #[test]
    fn test_classify_422_is_fatal() {
        let headers = reqwest::header::HeaderMap::new();
        let e = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            &headers,
            "Validation Failed",
        );
        assert!(matches!(e, RestError::Fatal(_)));
    }

    #[test]
    fn test_classify_5xx_is_transient() {
        let headers = reqwest::header::HeaderMap::new();
        let e = classify_status(StatusCode::BAD_GATEWAY, &headers, "");
        assert!(matches!(e, RestError::Transient(TransientKind::Request)));
    }

    #[test]
    fn test_rate_limit_hint_from_reset_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        let reset = chrono::Utc::now().timestamp() + 30;
        headers.insert("x-ratelimit-reset", reset.to_string().parse().unwrap());

        let e = classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        match e {
            RestError::RateLimited(Some(wait)) => {
                assert!(wait <= Duration::from_secs(31));
            }
            _ => panic!("expected rate limited with hint"),
        }
    }
}
