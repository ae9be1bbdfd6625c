//! MQTT outlet publishing CSV batches.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use url::Url;

use crate::plugin::{PluginError, Sink};
use crate::report::{Report, TimeUnit, write_csv_in};

/// Connect and disconnect timeout (3 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Broker port when the address has none.
const DEFAULT_PORT: u16 = 1883;

const CLIENT_ID: &str = "pstag";
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 16;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker endpoint parsed from `tcp://host:port/topic`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: u16,
    topic: String,
}

impl Endpoint {
    fn parse(addr: &str) -> Result<Self, PluginError> {
        let url = Url::parse(addr)
            .map_err(|e| PluginError::InvalidArgument(format!("invalid MQTT address '{addr}': {e}")))?;
        if !matches!(url.scheme(), "tcp" | "mqtt") {
            return Err(PluginError::InvalidArgument(format!(
                "unsupported MQTT scheme '{}', expected tcp or mqtt",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PluginError::InvalidArgument(format!("MQTT address '{addr}' has no host")))?;
        let topic = url.path().trim_start_matches('/');
        if topic.is_empty() {
            return Err(PluginError::InvalidArgument(format!(
                "MQTT address '{addr}' has no topic"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            topic: topic.to_string(),
        })
    }
}

/// A connected client and the task driving its event loop.
struct Session {
    client: AsyncClient,
    topic: String,
    driver: JoinHandle<()>,
}

/// Publishes each batch as one CSV message with QoS 1
/// (e.g. `tcp://localhost:5653/db/append/EXAMPLE:csv`).
///
/// Rows carry nanosecond timestamps.
pub struct MqttSink {
    addr: String,
    timeout: Duration,
    session: Option<Session>,
}

impl MqttSink {
    pub fn new(args: &[String]) -> Self {
        Self {
            addr: args.first().cloned().unwrap_or_default(),
            timeout: DEFAULT_TIMEOUT,
            session: None,
        }
    }

    /// Set the connect and disconnect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for MqttSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSink")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .field("connected", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

/// Poll until the broker acknowledges the connection.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), PluginError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(PluginError::Unavailable(format!("MQTT connect failed: {e}"))),
        }
    }
}

/// Keep the connection alive until a disconnect has been sent.
///
/// Connection errors are logged; the next poll reconnects.
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection error, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink for MqttSink {
    async fn open(&mut self) -> Result<(), PluginError> {
        let endpoint = Endpoint::parse(&self.addr)?;

        let mut options = MqttOptions::new(CLIENT_ID, endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        tokio::time::timeout(self.timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| {
                PluginError::Unavailable(format!(
                    "MQTT connect to {}:{} timed out",
                    endpoint.host, endpoint.port
                ))
            })??;
        tracing::debug!(host = %endpoint.host, port = endpoint.port, topic = %endpoint.topic, "MQTT connected");

        self.session = Some(Session {
            client,
            topic: endpoint.topic,
            driver: tokio::spawn(drive(eventloop)),
        });
        Ok(())
    }

    async fn handle(&mut self, batch: &[Arc<Report>]) -> Result<(), PluginError> {
        let session = self.session.as_ref().ok_or(PluginError::NotOpen)?;

        let mut payload = String::new();
        write_csv_in(batch, TimeUnit::Nanoseconds, &mut payload);
        session
            .client
            .publish(session.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = session.client.disconnect().await;
        if tokio::time::timeout(self.timeout, &mut session.driver).await.is_err() {
            tracing::warn!("MQTT disconnect timed out");
            session.driver.abort();
        }
        result.map_err(PluginError::from)
    }
}
