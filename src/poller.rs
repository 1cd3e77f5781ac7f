use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Expected failure while the engine is starting up or after it has exited;
/// the detector debounces these, they are never fatal on their own.
#[derive(Debug, thiserror::Error)]
pub enum PollFailure {
    #[error("control channel unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("control channel returned HTTP {0}")]
    Status(StatusCode),

    #[error("malformed stats payload: {0}")]
    Malformed(#[source] reqwest::Error),
}

pub type PollOutcome = std::result::Result<ProgressSnapshot, PollFailure>;

/// One normalized reading of the engine's live counters: bytes and
/// bytes-per-second, no unit ambiguity.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub bytes_transferred: u64,
    pub files_checked: u64,
    pub transfer_rate: f64,
    pub sampled_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn gigabytes(&self) -> f64 {
        self.bytes_transferred as f64 / 1e9
    }

    pub fn rate_mb_per_sec(&self) -> f64 {
        self.transfer_rate / 1e6
    }
}

#[derive(Debug, Deserialize)]
struct CoreStats {
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    checks: u64,
    #[serde(default)]
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct CorePid {
    pid: u32,
}

/// Read-only view of a running engine instance.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn stats(&self) -> PollOutcome;
    async fn pid(&self) -> std::result::Result<u32, PollFailure>;
}

/// HTTP client for the engine's remote-control endpoint.
pub struct RcClient {
    client: Client,
    stats_url: Url,
    pid_url: Url,
}

impl RcClient {
    pub fn new(rc_addr: &str) -> Result<Self> {
        let base = Url::parse(&format!("http://{rc_addr}/")).map_err(|e| {
            Error::Config(format!("invalid control channel address {rc_addr:?}: {e}"))
        })?;
        let stats_url = base
            .join("core/stats")
            .map_err(|e| Error::Config(e.to_string()))?;
        let pid_url = base
            .join("core/pid")
            .map_err(|e| Error::Config(e.to_string()))?;

        let client = Client::builder()
            .timeout(POLL_TIMEOUT)
            .build()
            .expect("Building HTTP client");

        Ok(Self {
            client,
            stats_url,
            pid_url,
        })
    }

    async fn call(&self, url: &Url) -> std::result::Result<reqwest::Response, PollFailure> {
        let response = self
            .client
            .post(url.clone())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(PollFailure::Unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollFailure::Status(status));
        }
        Ok(response)
    }
}

#[async_trait]
impl StatsSource for RcClient {
    async fn stats(&self) -> PollOutcome {
        let response = self.call(&self.stats_url).await?;
        let stats: CoreStats = response.json().await.map_err(PollFailure::Malformed)?;
        Ok(ProgressSnapshot {
            bytes_transferred: stats.bytes,
            files_checked: stats.checks,
            transfer_rate: stats.speed,
            sampled_at: Utc::now(),
        })
    }

    async fn pid(&self) -> std::result::Result<u32, PollFailure> {
        let response = self.call(&self.pid_url).await?;
        let pid: CorePid = response.json().await.map_err(PollFailure::Malformed)?;
        Ok(pid.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> RcClient {
        RcClient::new(&server.address().to_string()).unwrap()
    }

    #[tokio::test]
    async fn normalizes_stats_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/core/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bytes": 1_234_567_890u64,
                "checks": 42,
                "speed": 1.5e6,
                "transfers": 3,
                "elapsedTime": 12.5,
            })))
            .mount(&server)
            .await;

        let snapshot = client_for(&server).await.stats().await.unwrap();
        assert_eq!(snapshot.bytes_transferred, 1_234_567_890);
        assert_eq!(snapshot.files_checked, 42);
        assert!((snapshot.transfer_rate - 1.5e6).abs() < f64::EPSILON);
        assert!((snapshot.gigabytes() - 1.23456789).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_counters_default_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/core/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let snapshot = client_for(&server).await.stats().await.unwrap();
        assert_eq!(snapshot.bytes_transferred, 0);
        assert_eq!(snapshot.files_checked, 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_poll_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/core/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.stats().await.unwrap_err();
        assert!(matches!(err, PollFailure::Malformed(_)));
    }

    #[tokio::test]
    async fn http_error_is_a_poll_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/core/stats"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).await.stats().await.unwrap_err();
        assert!(matches!(err, PollFailure::Status(status) if status.as_u16() == 500));
    }

    #[tokio::test]
    async fn dead_endpoint_is_unreachable() {
        // nothing listens on the discard port
        let client = RcClient::new("127.0.0.1:9").unwrap();
        let err = client.stats().await.unwrap_err();
        assert!(matches!(err, PollFailure::Unreachable(_)));
    }

    #[tokio::test]
    async fn resolves_engine_pid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/core/pid"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"pid": 4242})),
            )
            .mount(&server)
            .await;

        let pid = client_for(&server).await.pid().await.unwrap();
        assert_eq!(pid, 4242);
    }

    #[test]
    fn rejects_garbage_address() {
        assert!(RcClient::new("not a host:port at all").is_err());
    }
}
