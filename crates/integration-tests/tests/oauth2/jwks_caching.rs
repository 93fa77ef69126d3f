use std::time::Duration;

use integration_tests::{IdentityProvider, TestServer};
use reqwest::Method;

use super::{RequestBuilderExt, oauth_config, oauth_config_with};

async fn status(server: &TestServer, token: &str) -> u16 {
    server
        .client
        .request(Method::POST, "/mcp")
        .authorization(token)
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

#[tokio::test]
async fn key_set_is_fetched_once() {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config(&provider)).await;

    let token = provider.token(&["mcp:tools"]);

    for _ in 0..3 {
        assert_eq!(status(&server, &token).await, 200);
    }

    assert_eq!(provider.fetch_count(), 1);
}

#[tokio::test]
async fn rotated_key_triggers_refresh() {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config_with(&provider, r#"min_refresh_interval = "50ms""#)).await;

    assert_eq!(status(&server, &provider.token(&["mcp:tools"])).await, 200);
    assert_eq!(provider.fetch_count(), 1);

    provider.rotate("key-2", b"second-signing-secret-of-the-identity-provider");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(status(&server, &provider.token(&["mcp:tools"])).await, 200);
    assert_eq!(provider.fetch_count(), 2);
}

#[tokio::test]
async fn unknown_keys_do_not_stampede_the_provider() {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config_with(&provider, r#"min_refresh_interval = "1m""#)).await;

    assert_eq!(status(&server, &provider.token(&["mcp:tools"])).await, 200);

    provider.rotate("key-2", b"second-signing-secret-of-the-identity-provider");
    let token = provider.token(&["mcp:tools"]);

    // The first unknown key forces a refresh, later ones wait for the interval.
    assert_eq!(status(&server, &token).await, 200);

    provider.rotate("key-3", b"third-signing-secret-of-the-identity-provider");
    let token = provider.token(&["mcp:tools"]);

    assert_eq!(status(&server, &token).await, 401);
    assert_eq!(status(&server, &token).await, 401);
    assert_eq!(provider.fetch_count(), 2);
}

#[tokio::test]
async fn unreachable_provider_is_temporarily_unavailable() {
    let provider = IdentityProvider::start().await;
    provider.set_failing(true);

    let server = TestServer::start(&oauth_config(&provider)).await;

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&provider.token(&["mcp:tools"]))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    assert!(response.headers().get("www-authenticate").is_none());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "temporarily_unavailable");
}

#[tokio::test]
async fn stale_keys_are_used_while_provider_is_down() {
    let provider = IdentityProvider::start().await;

    let config = oauth_config(&provider).replace(r#"poll_interval = "5m""#, r#"poll_interval = "100ms""#);
    let server = TestServer::start(&config).await;

    let token = provider.token(&["mcp:tools"]);
    assert_eq!(status(&server, &token).await, 200);

    provider.set_failing(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The cached set expired, the refresh fails, the stale set is within its grace period.
    assert_eq!(status(&server, &token).await, 200);
    assert_eq!(provider.fetch_count(), 2);
}
