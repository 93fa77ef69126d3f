mod identity;

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    time::Duration,
};

use config::Config;
use server::ServeConfig;
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub use identity::{AUDIENCE, IdentityProvider, TokenSpec};

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path).send().await.unwrap()
    }

    /// Start building a request to the given path
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }
}

/// A running gateway with its supervised process.
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration
    pub async fn start(config_toml: &str) -> Self {
        Self::try_start(config_toml).await.unwrap()
    }

    /// Like [`TestServer::start`], returning the error when the gateway does not come up.
    pub async fn try_start(config_toml: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(config_toml)?;
        let address = SocketAddr::from(([127, 0, 0, 1], free_port()));
        let shutdown = CancellationToken::new();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
            shutdown: shutdown.clone(),
        };

        let mut handle = tokio::spawn(server::serve(serve_config));

        // The gateway listens only after the process is confirmed running.
        loop {
            if handle.is_finished() {
                return match (&mut handle).await? {
                    Ok(()) => Err(anyhow::anyhow!("server exited before listening")),
                    Err(e) => Err(e),
                };
            }

            if TcpStream::connect(address).await.is_ok() {
                break;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Ok(TestServer {
            client: TestClient::new(format!("http://{address}")),
            address,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Waits for the gateway to stop on its own, e.g. after the process failed for good.
    pub async fn finished(mut self, timeout: Duration) -> anyhow::Result<()> {
        let handle = self.handle.take().ok_or_else(|| anyhow::anyhow!("server already awaited"))?;
        let result = tokio::time::timeout(timeout, handle).await;

        self.shutdown.cancel();

        result??
    }

    /// Shuts the gateway down and waits for the process to be terminated.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();

        match self.handle.take() {
            Some(handle) => handle.await?,
            None => Ok(()),
        }
    }

    /// Polls the health endpoint until `condition` holds for the reported status.
    pub async fn wait_for_health(&self, condition: impl Fn(&serde_json::Value) -> bool) -> serde_json::Value {
        let mut health = serde_json::Value::Null;

        for _ in 0..200 {
            health = self.client.get("/health").await.json().await.unwrap();

            if condition(&health) {
                break;
            }

            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert!(condition(&health), "health condition not reached, last report: {health}");

        health
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
