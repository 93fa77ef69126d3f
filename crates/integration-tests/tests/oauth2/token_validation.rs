use chrono::Duration;
use insta::assert_snapshot;
use integration_tests::{IdentityProvider, TestServer, TokenSpec};
use reqwest::{Method, header::WWW_AUTHENTICATE};

use super::{PING, RequestBuilderExt, oauth_config};

async fn setup() -> (IdentityProvider, TestServer) {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config(&provider)).await;

    (provider, server)
}

fn challenge(response: &reqwest::Response) -> String {
    response.headers()[WWW_AUTHENTICATE].to_str().unwrap().to_string()
}

#[tokio::test]
async fn missing_token_gets_challenge() {
    let (provider, server) = setup().await;

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .mcp_json(PING)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_snapshot!(challenge(&response), @r#"Bearer resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource/mcp""#);

    let body = response.text().await.unwrap();
    assert_snapshot!(body, @r#"{"error":"unauthorized","error_description":"missing bearer token","resource_metadata":"https://mcp.example.com/.well-known/oauth-protected-resource/mcp"}"#);

    assert_eq!(provider.fetch_count(), 0);
}

#[tokio::test]
async fn valid_token_is_forwarded_unchanged() {
    let (provider, server) = setup().await;
    let token = provider.token(&["mcp:tools"]);

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&token)
        .mcp_json(PING)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(response.text().await.unwrap(), PING);
}

#[tokio::test]
async fn expired_token_is_reported_as_expired() {
    let (provider, server) = setup().await;

    let token = provider.mint(TokenSpec {
        scopes: &["mcp:tools"],
        expires_in: Duration::minutes(-10),
        ..TokenSpec::valid(&provider)
    });

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&token)
        .mcp_json(PING)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_snapshot!(challenge(&response), @r#"Bearer error="invalid_token", error_description="token has expired", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource/mcp""#);

    // Expiry is decided before the signature, no keys needed.
    assert_eq!(provider.fetch_count(), 0);
}

#[tokio::test]
async fn expired_token_with_bad_signature_is_still_expired() {
    let (provider, server) = setup().await;

    let token = provider.mint(TokenSpec {
        scopes: &["mcp:tools"],
        expires_in: Duration::minutes(-10),
        secret: Some(b"a-secret-the-provider-never-published"),
        ..TokenSpec::valid(&provider)
    });

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_description"], "token has expired");
}

#[tokio::test]
async fn forged_signature_is_rejected() {
    let (provider, server) = setup().await;

    let token = provider.mint(TokenSpec {
        scopes: &["mcp:tools"],
        secret: Some(b"a-secret-the-provider-never-published"),
        ..TokenSpec::valid(&provider)
    });

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_snapshot!(challenge(&response), @r#"Bearer error="invalid_token", error_description="token signature could not be verified", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource/mcp""#);
}

#[tokio::test]
async fn wrong_issuer_is_rejected() {
    let (provider, server) = setup().await;

    let token = provider.mint(TokenSpec {
        issuer: "https://evil.example.com".to_string(),
        scopes: &["mcp:tools"],
        ..TokenSpec::valid(&provider)
    });

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_description"], "token issuer is not accepted");
}

#[tokio::test]
async fn wrong_audience_is_rejected() {
    let (provider, server) = setup().await;

    let token = provider.mint(TokenSpec {
        audience: "https://other-service.example.com".to_string(),
        scopes: &["mcp:tools"],
        ..TokenSpec::valid(&provider)
    });

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_description"], "token audience does not include this resource");
}

#[tokio::test]
async fn malformed_tokens_are_rejected() {
    let (provider, server) = setup().await;

    for header in ["Bearer not-a-jwt", "Basic dXNlcjpwYXNz", "Bearer"] {
        let response = server
            .client
            .request(Method::POST, "/mcp")
            .header("Authorization", header)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 401, "{header}");

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "invalid_token", "{header}");
    }

    assert_eq!(provider.fetch_count(), 0);
}

#[tokio::test]
async fn upstream_rejection_becomes_gateway_challenge() {
    let (provider, server) = setup().await;
    let token = provider.token(&["mcp:tools"]);

    let response = server
        .client
        .request(Method::GET, "/status/401")
        .authorization(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_snapshot!(challenge(&response), @r#"Bearer error="invalid_token", error_description="token was rejected by the resource server", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource/mcp""#);
}

#[tokio::test]
async fn validated_identity_reaches_upstream() {
    let (provider, server) = setup().await;
    let token = provider.token(&["mcp:tools", "mcp:read"]);

    let response = server
        .client
        .request(Method::GET, "/describe")
        .authorization(&token)
        .header("x-gatehouse-subject", "admin")
        .header("x-gatehouse-scopes", "mcp:admin")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    let headers = &body["headers"];

    assert_eq!(headers["x-gatehouse-subject"], "user-1");
    assert_eq!(headers["x-gatehouse-scopes"], "mcp:tools mcp:read");
    assert_eq!(headers["authorization"], format!("Bearer {token}"));
}
