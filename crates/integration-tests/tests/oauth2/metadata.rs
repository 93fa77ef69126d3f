use insta::assert_snapshot;
use integration_tests::{IdentityProvider, TestServer};

use super::oauth_config;

#[tokio::test]
async fn metadata_document() {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config(&provider)).await;

    let response = server.client.get("/.well-known/oauth-protected-resource/mcp").await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body["resource"], "https://mcp.example.com/mcp");
    assert_eq!(body["authorization_servers"][0], provider.issuer());
    assert_snapshot!(body["scopes_supported"], @r#"["mcp:tools","mcp:admin"]"#);
    assert_snapshot!(body["bearer_methods_supported"], @r#"["header"]"#);
}

#[tokio::test]
async fn metadata_is_public_and_stable() {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config(&provider)).await;

    let first = server
        .client
        .get("/.well-known/oauth-protected-resource")
        .await
        .bytes()
        .await
        .unwrap();

    for path in [
        "/.well-known/oauth-protected-resource",
        "/.well-known/oauth-protected-resource/mcp",
    ] {
        let again = server.client.get(path).await.bytes().await.unwrap();
        assert_eq!(first, again, "{path}");
    }

    assert_eq!(provider.fetch_count(), 0);
}
