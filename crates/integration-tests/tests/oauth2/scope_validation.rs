use insta::assert_snapshot;
use integration_tests::{IdentityProvider, TestServer};
use reqwest::{Method, header::WWW_AUTHENTICATE};

use super::{PING, RequestBuilderExt, oauth_config};

#[tokio::test]
async fn missing_global_scope_is_forbidden() {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config(&provider)).await;

    let token = provider.token(&["profile"]);

    let response = server
        .client
        .request(Method::POST, "/mcp")
        .authorization(&token)
        .mcp_json(PING)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);

    let challenge = response.headers()[WWW_AUTHENTICATE].to_str().unwrap().to_string();
    assert_snapshot!(challenge, @r#"Bearer error="insufficient_scope", scope="mcp:tools", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource/mcp""#);

    let body = response.text().await.unwrap();
    assert_snapshot!(body, @r#"{"error":"insufficient_scope","error_description":"token lacks the required scope","resource_metadata":"https://mcp.example.com/.well-known/oauth-protected-resource/mcp"}"#);
}

#[tokio::test]
async fn path_scopes_apply_below_their_prefix() {
    let provider = IdentityProvider::start().await;
    let server = TestServer::start(&oauth_config(&provider)).await;

    let tools_only = provider.token(&["mcp:tools"]);
    let admin = provider.token(&["mcp:tools", "mcp:admin"]);

    let response = server
        .client
        .request(Method::GET, "/admin/users")
        .authorization(&tools_only)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);

    let challenge = response.headers()[WWW_AUTHENTICATE].to_str().unwrap().to_string();
    assert!(challenge.contains(r#"scope="mcp:tools mcp:admin""#), "{challenge}");

    let response = server
        .client
        .request(Method::GET, "/admin/users")
        .authorization(&admin)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    // Segment boundaries matter.
    let response = server
        .client
        .request(Method::GET, "/administrator")
        .authorization(&tools_only)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}
