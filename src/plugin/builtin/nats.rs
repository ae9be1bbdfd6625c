//! NATS server monitoring source.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::plugin::{PluginError, Source};
use crate::report::Record;

/// Default request timeout (5 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Subset of the `/varz` monitoring document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Varz {
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    cores: u64,
    cpu: f64,
    mem: u64,
    in_msgs: u64,
    out_msgs: u64,
    in_bytes: u64,
    out_bytes: u64,
    subscriptions: u64,
    slow_consumers: u64,
    connections: u64,
    total_connections: u64,
}

impl Varz {
    fn records(&self) -> Vec<Record> {
        let uptime = (self.now - self.start).num_seconds();
        vec![
            Record::new("nats.uptime", uptime as f64, 0),
            Record::new("nats.cores", self.cores as f64, 0),
            Record::new("nats.cpu", self.cpu, 0),
            Record::new("nats.mem", self.mem as f64, 0),
            Record::new("nats.in_msgs", self.in_msgs as f64, 0),
            Record::new("nats.out_msgs", self.out_msgs as f64, 0),
            Record::new("nats.in_bytes", self.in_bytes as f64, 0),
            Record::new("nats.out_bytes", self.out_bytes as f64, 0),
            Record::new("nats.subscriptions", self.subscriptions as f64, 0),
            Record::new("nats.slow_consumers", self.slow_consumers as f64, 0),
            Record::new("nats.connections", self.connections as f64, 0),
            Record::new("nats.total_connections", self.total_connections as f64, 0),
        ]
    }
}

/// Server statistics from a NATS monitoring endpoint (`nats.*`).
///
/// Argument: the monitoring base URL (e.g. `http://localhost:8222`); the
/// source polls `<base>/varz`.
pub struct NatsSource {
    server: String,
    timeout: Duration,
    endpoint: Option<(Url, Client)>,
}

impl NatsSource {
    pub fn new(args: &[String]) -> Self {
        Self {
            server: args.first().cloned().unwrap_or_default(),
            timeout: DEFAULT_TIMEOUT,
            endpoint: None,
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for NatsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsSource")
            .field("server", &self.server)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// `<server>/varz`, keeping any path prefix of `server`.
fn varz_url(server: &str) -> Result<Url, PluginError> {
    let invalid = |e: url::ParseError| {
        PluginError::InvalidArgument(format!("invalid NATS monitoring URL '{server}': {e}"))
    };
    let mut url = Url::parse(server).map_err(invalid)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PluginError::InvalidArgument(format!(
            "unsupported URL scheme '{}', expected http or https",
            url.scheme()
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join("varz").map_err(invalid)
}

#[async_trait::async_trait]
impl Source for NatsSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        let url = varz_url(&self.server)?;
        let client = Client::builder().timeout(self.timeout).build()?;
        tracing::debug!(url = %url, "NATS monitoring endpoint resolved");
        self.endpoint = Some((url, client));
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        let (url, client) = self.endpoint.as_ref().ok_or(PluginError::NotOpen)?;

        let response = client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::Unavailable(format!(
                "NATS monitoring responded {status}"
            )));
        }
        let varz: Varz = serde_json::from_slice(&response.bytes().await?)?;
        Ok(varz.records())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.endpoint = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const VARZ: &str = r#"{
        "server_id": "NDX4",
        "start": "2024-05-01T10:00:00.5Z",
        "now": "2024-05-01T11:00:00.5Z",
        "cores": 8,
        "cpu": 1.5,
        "mem": 16777216,
        "in_msgs": 100,
        "out_msgs": 200,
        "in_bytes": 1000,
        "out_bytes": 2000,
        "subscriptions": 12,
        "slow_consumers": 0,
        "connections": 3,
        "total_connections": 9
    }"#;

    /// Answer one GET with `body`, returning the request line.
    async fn serve_json(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let request = String::from_utf8_lossy(&raw).into_owned();
            request.lines().next().unwrap_or_default().to_string()
        });

        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_varz_url() {
        assert_eq!(
            varz_url("http://localhost:8222").unwrap().as_str(),
            "http://localhost:8222/varz"
        );
        assert_eq!(
            varz_url("http://localhost:8222/nats").unwrap().as_str(),
            "http://localhost:8222/nats/varz"
        );
        assert!(matches!(
            varz_url("nats://localhost:4222"),
            Err(PluginError::InvalidArgument(_))
        ));
        assert!(varz_url("").is_err());
    }

    #[test]
    fn test_varz_records() {
        let varz: Varz = serde_json::from_str(VARZ).unwrap();
        let records = varz.records();
        assert_eq!(records.len(), 12);
        assert_eq!(records[0], Record::new("nats.uptime", 3600.0, 0));
        assert_eq!(records[2], Record::new("nats.cpu", 1.5, 0));
        assert_eq!(records[11], Record::new("nats.total_connections", 9.0, 0));
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let varz: Varz = serde_json::from_str(r#"{"connections": 4}"#).unwrap();
        let records = varz.records();
        assert_eq!(records[0].value, 0.0);
        assert_eq!(records[10], Record::new("nats.connections", 4.0, 0));
    }

    #[tokio::test]
    async fn test_nats_source_polls_varz() {
        let (server, request) = serve_json("200 OK", VARZ).await;

        let mut source = NatsSource::new(&[server]);
        source.open().await.unwrap();
        let records = source.sample().await.unwrap();
        source.close().await.unwrap();

        assert_eq!(request.await.unwrap(), "GET /varz HTTP/1.1");
        assert_eq!(records[4], Record::new("nats.in_msgs", 100.0, 0));
    }

    #[tokio::test]
    async fn test_malformed_document_is_sample_error() {
        let (server, request) = serve_json("200 OK", "not json").await;

        let mut source = NatsSource::new(&[server]);
        source.open().await.unwrap();
        assert!(matches!(source.sample().await, Err(PluginError::Json(_))));
        request.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let (server, request) = serve_json("503 Service Unavailable", "{}").await;

        let mut source = NatsSource::new(&[server]);
        source.open().await.unwrap();
        assert!(matches!(
            source.sample().await,
            Err(PluginError::Unavailable(msg)) if msg.contains("503")
        ));
        request.await.unwrap();
    }

    #[tokio::test]
    async fn test_sample_before_open() {
        let mut source = NatsSource::new(&["http://127.0.0.1:1".to_string()]);
        assert!(matches!(source.sample().await, Err(PluginError::NotOpen)));
    }
}
