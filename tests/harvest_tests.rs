//! Integration tests for the harvesting engine
//!
//! These tests use wiremock to stand in for the remote API and exercise the
//! full fetch-classify-merge-checkpoint cycle end-to-end, including credential
//! rotation and the REST fallback.

use gleaner::checkpoint::{CheckpointStore, FsCheckpointStore};
use gleaner::credentials::CredentialPool;
use gleaner::filter::AcceptAll;
use gleaner::harvest::orchestrator::{HarvestOrchestrator, HarvestSettings};
use gleaner::harvest::{HarvestTarget, HarvestedItem, TerminationReason};
use gleaner::transport::{build_http_client, GithubTransport, Protocol};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a GraphQL comments page envelope with one review comment per body
fn comments_envelope(bodies: &[&str], end_cursor: Option<&str>, has_next: bool) -> Value {
    let comments: Vec<Value> = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| {
            json!({
                "author": { "login": "octocat" },
                "body": body,
                "path": "src/lib.rs",
                "diffHunk": "@@ -1 +1 @@",
                "createdAt": "2024-05-01T12:00:00Z",
                "url": format!("https://github.com/octo/widgets/pull/7#r{}-{}", body.len(), i)
            })
        })
        .collect();

    json!({
        "data": {
            "user": {
                "pullRequests": {
                    "pageInfo": { "endCursor": end_cursor, "hasNextPage": has_next },
                    "nodes": [{
                        "number": 7,
                        "title": "Fix parser",
                        "repository": { "nameWithOwner": "octo/widgets" },
                        "reviewThreads": { "nodes": [{
                            "comments": { "nodes": comments }
                        }]}
                    }]
                }
            }
        }
    })
}

fn rate_limited_envelope() -> Value {
    json!({
        "data": null,
        "errors": [{
            "type": "RATE_LIMITED",
            "message": "API rate limit exceeded"
        }]
    })
}

struct Harness {
    server: MockServer,
    store: Arc<FsCheckpointStore>,
    _dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsCheckpointStore::new(dir.path()).unwrap());
        Self {
            server,
            store,
            _dir: dir,
        }
    }

    fn transport(&self) -> Arc<GithubTransport> {
        let client = build_http_client("Gleaner-tests/1.0").unwrap();
        Arc::new(GithubTransport::with_endpoints(
            client,
            format!("{}/graphql", self.server.uri()),
            self.server.uri(),
            30,
        ))
    }

    fn orchestrator(
        &self,
        target: HarvestTarget,
        tokens: Vec<&str>,
        settings: HarvestSettings,
    ) -> HarvestOrchestrator {
        let pool = CredentialPool::new(tokens.into_iter().map(String::from).collect());
        HarvestOrchestrator::new(
            target,
            self.transport(),
            self.store.clone(),
            Arc::new(AcceptAll),
            pool,
            settings,
        )
    }
}

fn fast_settings() -> HarvestSettings {
    HarvestSettings {
        retry_backoff: Duration::from_millis(0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_graphql_comments_harvest_end_to_end() {
    let harness = Harness::new().await;

    // First page carries a cursor, second page ends the stream
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"after\":\"C1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(comments_envelope(
            &["A third thoughtful review comment."],
            None,
            false,
        )))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"after\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(comments_envelope(
            &[
                "Consider a BTreeMap here instead.",
                "This unwrap can panic on empty input.",
            ],
            Some("C1"),
            true,
        )))
        .mount(&harness.server)
        .await;

    let target = HarvestTarget::comments("octocat", 10);
    let result = harness
        .orchestrator(target.clone(), vec!["token-a"], fast_settings())
        .run()
        .await;

    assert_eq!(result.reason, TerminationReason::SourceExhausted);
    assert_eq!(result.items.len(), 3);
    for item in &result.items {
        match item {
            HarvestedItem::Comment(c) => assert_eq!(c.repo, "octo/widgets"),
            other => panic!("expected comment, got {:?}", other),
        }
    }

    // The checkpoint survives the run for later resumes
    let persisted = harness.store.load_items(&target.key()).unwrap();
    assert_eq!(persisted.len(), 3);
}

#[tokio::test]
async fn test_rotation_recovers_from_rate_limited_token() {
    let harness = Harness::new().await;

    // The first token is over quota; the second works
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer tired-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limited_envelope()))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(comments_envelope(
            &["Looks like an off-by-one in the loop bound."],
            None,
            false,
        )))
        .mount(&harness.server)
        .await;

    let result = harness
        .orchestrator(
            HarvestTarget::comments("octocat", 10),
            vec!["tired-token", "fresh-token"],
            fast_settings(),
        )
        .run()
        .await;

    assert_eq!(result.reason, TerminationReason::SourceExhausted);
    assert_eq!(result.items.len(), 1);
}

#[tokio::test]
async fn test_graphql_quota_falls_back_to_rest() {
    let harness = Harness::new().await;

    // GraphQL never recovers
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limited_envelope()))
        .mount(&harness.server)
        .await;

    // REST path: search, PR detail, then the PR's review comments
    let pr_url = format!("{}/repos/octo/widgets/pulls/7", harness.server.uri());
    let comments_url = format!(
        "{}/repos/octo/widgets/pulls/7/comments",
        harness.server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/search/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "items": [{ "pull_request": { "url": pr_url } }]
        })))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/widgets/pulls/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 7,
            "title": "Fix parser",
            "review_comments_url": comments_url
        })))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/widgets/pulls/7/comments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "user": { "login": "octocat" },
            "body": "The error path leaks the file handle.",
            "path": "src/io.rs",
            "diff_hunk": "@@ -10 +10 @@",
            "html_url": "https://github.com/octo/widgets/pull/7#discussion_r100",
            "created_at": "2024-05-02T08:00:00Z"
        }])))
        .mount(&harness.server)
        .await;

    let result = harness
        .orchestrator(
            HarvestTarget::comments("octocat", 10),
            vec!["only-token"],
            fast_settings(),
        )
        .run()
        .await;

    // One search page smaller than per_page means the source is drained
    assert_eq!(result.reason, TerminationReason::SourceExhausted);
    assert_eq!(result.items.len(), 1);
    match &result.items[0] {
        HarvestedItem::Comment(c) => {
            assert_eq!(c.repo, "octo/widgets");
            assert_eq!(c.pr_number, 7);
            assert_eq!(
                c.url,
                "https://github.com/octo/widgets/pull/7#discussion_r100"
            );
        }
        other => panic!("expected comment, got {:?}", other),
    }
}

#[tokio::test]
async fn test_blocked_token_403_aborts_without_rotation() {
    let harness = Harness::new().await;

    // A 403 that says nothing about quota cannot be fixed by another token
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string("Resource protected by organization SAML enforcement"),
        )
        .mount(&harness.server)
        .await;

    let settings = HarvestSettings {
        fallback_enabled: false,
        retry_backoff: Duration::from_millis(0),
        ..Default::default()
    };
    let result = harness
        .orchestrator(
            HarvestTarget::comments("octocat", 10),
            vec!["token-a", "token-b"],
            settings,
        )
        .run()
        .await;

    match &result.reason {
        TerminationReason::AbortedError { detail } => assert!(detail.contains("SAML")),
        other => panic!("expected fatal abort, got {:?}", other),
    }

    // No credential was burned trying to outrun a non-quota 403
    let requests = harness
        .server
        .received_requests()
        .await
        .expect("request recording enabled");
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_everything_rate_limited_exhausts_credentials() {
    let harness = Harness::new().await;

    // Both protocols answer 403 with a rate-limit body
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API rate limit exceeded"))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/issues"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API rate limit exceeded"))
        .mount(&harness.server)
        .await;

    let result = harness
        .orchestrator(
            HarvestTarget::comments("octocat", 10),
            vec!["only-token"],
            fast_settings(),
        )
        .run()
        .await;

    assert_eq!(result.reason, TerminationReason::CredentialsExhausted);
    assert!(result.items.is_empty());
}

#[tokio::test]
async fn test_rest_only_experts_harvest() {
    let harness = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/search/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "items": [{ "login": "rustacean" }]
        })))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/rustacean"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "login": "rustacean", "followers": 1200 })),
        )
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/rustacean/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "stargazers_count": 40 },
            { "stargazers_count": 60 }
        ])))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/issues"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "total_count": 310, "items": [] })),
        )
        .mount(&harness.server)
        .await;

    let settings = HarvestSettings {
        initial_protocol: Protocol::Rest,
        fallback_enabled: false,
        retry_backoff: Duration::from_millis(0),
    };
    let result = harness
        .orchestrator(HarvestTarget::experts("Rust", 5), vec!["token"], settings)
        .run()
        .await;

    assert_eq!(result.reason, TerminationReason::SourceExhausted);
    assert_eq!(result.items.len(), 1);
    match &result.items[0] {
        HarvestedItem::Profile(p) => {
            assert_eq!(p.login, "rustacean");
            assert_eq!(p.followers, 1200);
            assert_eq!(p.stars, 100);
            assert_eq!(p.pull_requests, 310);
        }
        other => panic!("expected profile, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fatal_user_not_found_aborts() {
    let harness = Harness::new().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{
                "type": "NOT_FOUND",
                "message": "Could not resolve to a User with the login of 'nobody'"
            }]
        })))
        .mount(&harness.server)
        .await;

    let result = harness
        .orchestrator(
            HarvestTarget::comments("nobody", 10),
            vec!["token-a", "token-b"],
            fast_settings(),
        )
        .run()
        .await;

    match &result.reason {
        TerminationReason::AbortedError { detail } => assert!(detail.contains("nobody")),
        other => panic!("expected abort, got {:?}", other),
    }
    assert!(result.items.is_empty());

    // Fatal errors never burn extra requests on rotation
    let requests = harness
        .server
        .received_requests()
        .await
        .expect("request recording enabled");
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_cursor() {
    let harness = Harness::new().await;
    let target = HarvestTarget::comments("octocat", 10);

    // First run: one good page, then quota death with nothing left to try
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"after\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(comments_envelope(
            &["First page comment about iterator invalidation."],
            Some("C1"),
            true,
        )))
        .mount(&harness.server)
        .await;
    let quota_guard = Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"after\":\"C1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(rate_limited_envelope()))
        .expect(1)
        .mount_as_scoped(&harness.server)
        .await;

    let settings = HarvestSettings {
        fallback_enabled: false,
        retry_backoff: Duration::from_millis(0),
        ..Default::default()
    };
    let first = harness
        .orchestrator(target.clone(), vec!["token"], settings.clone())
        .run()
        .await;
    assert_eq!(first.reason, TerminationReason::CredentialsExhausted);
    assert_eq!(first.items.len(), 1);
    drop(quota_guard);

    // Second run: the quota mock is gone; C1 now serves the final page
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"after\":\"C1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(comments_envelope(
            &["Second page comment about lifetime elision."],
            None,
            false,
        )))
        .mount(&harness.server)
        .await;

    let second = harness
        .orchestrator(target, vec!["token"], settings)
        .run()
        .await;

    assert_eq!(second.reason, TerminationReason::SourceExhausted);
    assert_eq!(second.items.len(), 2);
}
