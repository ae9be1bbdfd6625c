//! HTTP outlet posting CSV batches.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::plugin::{PluginError, Sink};
use crate::report::{Report, write_csv};

/// Default request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs each batch as `text/csv` to a fixed URL
/// (e.g. `http://localhost:5654/db/write/EXAMPLE?timeformat=s&method=append`).
pub struct HttpSink {
    addr: String,
    timeout: Duration,
    endpoint: Option<(Url, Client)>,
}

impl HttpSink {
    pub fn new(args: &[String]) -> Self {
        Self {
            addr: args.first().cloned().unwrap_or_default(),
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

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSink")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Sink for HttpSink {
    async fn open(&mut self) -> Result<(), PluginError> {
        let url = Url::parse(&self.addr).map_err(|e| {
            PluginError::InvalidArgument(format!("invalid URL '{}': {}", self.addr, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PluginError::InvalidArgument(format!(
                "unsupported URL scheme '{}', expected http or https",
                url.scheme()
            )));
        }

        let client = Client::builder().timeout(self.timeout).build()?;
        self.endpoint = Some((url, client));
        Ok(())
    }

    async fn handle(&mut self, batch: &[Arc<Report>]) -> Result<(), PluginError> {
        let (url, client) = self.endpoint.as_ref().ok_or(PluginError::NotOpen)?;

        let mut body = String::new();
        write_csv(batch, &mut body);

        let response = client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PluginError::Unavailable(format!(
                "server responded {status}: {text}"
            )));
        }
        tracing::debug!(status = %status, response = %text, "Batch posted");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.endpoint = None;
        Ok(())
    }
}
