//! HTTP readiness probe for the inference server.
//!
//! Text-generation servers answer `GET /health` with 200 once the model is
//! loaded. The probe URL is derived from the chat-completion base URL by
//! dropping its `/v1` suffix.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HealthProbe {
    http: Client,
    root: String,
    url: String,
}

impl HealthProbe {
    /// Probe for the server behind `base_url`, each check bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        let root = server_root(base_url);
        Ok(Self {
            http,
            url: format!("{root}/health"),
            root,
        })
    }

    /// Server root the probe targets, e.g. `http://localhost:8080`.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One probe. Any transport error or non-2xx status counts as not ready.
    pub async fn check(&self) -> bool {
        match self.http.get(&self.url).send().await {
            Ok(resp) => {
                let ready = resp.status().is_success();
                debug!(url = self.url, status = %resp.status(), ready, "Health probe");
                ready
            }
            Err(e) => {
                debug!(url = self.url, error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// `http://host:port/v1` → `http://host:port`.
pub fn server_root(base_url: &str) -> String {
    let root = base_url.trim_end_matches('/');
    root.strip_suffix("/v1").unwrap_or(root).to_string()
}


#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_server_root() {
        assert_eq!(server_root("http://localhost:8080/v1"), "http://localhost:8080");
        assert_eq!(server_root("http://localhost:8080/v1/"), "http://localhost:8080");
        assert_eq!(server_root("http://10.0.0.2:80"), "http://10.0.0.2:80");
    }

    async fn serve(status: StatusCode) -> String {
        let app = Router::new().route("/health", get(move || async move { status }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn test_probe_status() {
        let ok = HealthProbe::new(&serve(StatusCode::OK).await, Duration::from_secs(2)).unwrap();
        assert!(ok.check().await);
        assert!(ok.url().starts_with(ok.root()));
        assert!(!ok.root().ends_with("/v1"));

        let loading = HealthProbe::new(&serve(StatusCode::SERVICE_UNAVAILABLE).await, Duration::from_secs(2)).unwrap();
        assert!(!loading.check().await);
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HealthProbe::new(&format!("http://{addr}/v1"), Duration::from_millis(500)).unwrap();
        assert!(!probe.check().await);
    }
}
