use indoc::formatdoc;
use integration_tests::{TestServer, TestClient, free_port};

use crate::{anonymous_config, upstream_process};

#[tokio::test]
async fn reports_process_state() {
    let server = TestServer::start(&anonymous_config()).await;

    let response = server.client.get("/health").await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["upstream"]["lifecycle"], "running");
    assert_eq!(body["upstream"]["restart_count"], 0);
    assert!(body["upstream"]["pid"].is_u64());
    assert!(body["upstream"]["last_start"].is_string());
}

#[tokio::test]
async fn custom_path() {
    let config = formatdoc! {r#"
        [server]
        auth_mode = "anonymous"

        [server.health]
        path = "/healthz"

        {process}
    "#,
        process = upstream_process(),
    };

    let server = TestServer::start(&config).await;

    let response = server.client.get("/healthz").await;
    assert_eq!(response.status(), 200);

    // Everything else belongs to the process.
    let response = server.client.get("/health").await;
    assert_eq!(response.headers()["x-upstream"], "mock");
}

#[tokio::test]
async fn separate_listener() {
    let health_port = free_port();

    let config = formatdoc! {r#"
        [server]
        auth_mode = "anonymous"

        [server.health]
        listen = "127.0.0.1:{health_port}"

        {process}
    "#,
        process = upstream_process(),
    };

    let server = TestServer::start(&config).await;
    let health = TestClient::new(format!("http://127.0.0.1:{health_port}"));

    let mut status = None;

    for _ in 0..50 {
        if let Ok(response) = health.request(reqwest::Method::GET, "/health").send().await {
            status = Some(response.status());
            break;
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(status.map(|s| s.as_u16()), Some(200));

    let response = server.client.get("/health").await;
    assert_eq!(response.headers()["x-upstream"], "mock");
}
