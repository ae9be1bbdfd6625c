//! Per-protocol network counters from the kernel's SNMP table.

use std::path::PathBuf;

use crate::plugin::{PluginError, Source};
use crate::report::Record;

/// Kernel SNMP counters on Linux.
const SNMP_PATH: &str = "/proc/net/snmp";

/// Protocols present in the SNMP table.
pub const PROTOCOLS: [&str; 6] = ["ip", "icmp", "icmpmsg", "tcp", "udp", "udplite"];

/// Network counters per protocol (`proto.<protocol>.<counter>`).
///
/// Argument: comma separated protocols out of [`PROTOCOLS`], or `all`.
/// Counter names keep the kernel's spelling, e.g. `proto.tcp.ActiveOpens`.
pub struct ProtoSource {
    protocols: Vec<String>,
    path: PathBuf,
}

impl ProtoSource {
    pub fn new(args: &[String]) -> Self {
        let protocols = args
            .first()
            .map(|a| {
                a.split(',')
                    .map(|p| p.trim().to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            protocols,
            path: PathBuf::from(SNMP_PATH),
        }
    }

    fn selects(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p == "all" || p == protocol)
    }
}

#[async_trait::async_trait]
impl Source for ProtoSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        if self.protocols.is_empty() {
            return Err(PluginError::InvalidArgument(format!(
                "in-proto requires a protocol list out of {}",
                PROTOCOLS.join(",")
            )));
        }
        if let Some(unknown) = self
            .protocols
            .iter()
            .find(|p| *p != "all" && !PROTOCOLS.contains(&p.as_str()))
        {
            return Err(PluginError::InvalidArgument(format!(
                "unknown protocol '{unknown}', expected one of {}",
                PROTOCOLS.join(",")
            )));
        }
        tokio::fs::metadata(&self.path).await.map_err(|e| {
            PluginError::Unavailable(format!(
                "protocol counters unavailable ({}): {e}",
                self.path.display()
            ))
        })?;
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(parse_snmp(&content)
            .into_iter()
            .filter(|(protocol, _)| self.selects(protocol))
            .flat_map(|(protocol, counters)| {
                counters.into_iter().map(move |(counter, value)| {
                    Record::new(format!("proto.{protocol}.{counter}"), value, 0)
                })
            })
            .collect())
    }
}

/// Parse SNMP table text: per protocol, a line of counter names followed by a
/// line of values, both prefixed with `Protocol:`.
///
/// Protocols come back lowercased in table order. Unpaired or malformed
/// lines are skipped.
fn parse_snmp(content: &str) -> Vec<(String, Vec<(String, f64)>)> {
    let mut tables = Vec::new();
    let mut lines = content.lines();
    while let (Some(header), Some(values)) = (lines.next(), lines.next()) {
        let (Some((protocol, names)), Some((value_protocol, values))) =
            (header.split_once(':'), values.split_once(':'))
        else {
            continue;
        };
        if protocol != value_protocol {
            tracing::debug!(header = %protocol, values = %value_protocol, "Unpaired SNMP lines");
            continue;
        }
        let counters = names
            .split_whitespace()
            .zip(values.split_whitespace())
            .filter_map(|(name, value)| Some((name.to_string(), value.parse::<i64>().ok()? as f64)))
            .collect();
        tables.push((protocol.to_lowercase(), counters));
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNMP: &str = "\
Ip: Forwarding DefaultTTL InReceives
Ip: 1 64 12345
Icmp: InMsgs InErrors
Icmp: 45 0
Tcp: RtoAlgorithm MaxConn ActiveOpens
Tcp: 1 -1 300
Udp: InDatagrams NoPorts
Udp: 99 2
";

    fn source(arg: &str, path: PathBuf) -> ProtoSource {
        ProtoSource {
            path,
            ..ProtoSource::new(&[arg.to_string()])
        }
    }

    #[test]
    fn test_parse_snmp_pairs_lines() {
        let tables = parse_snmp(SNMP);
        let protocols: Vec<_> = tables.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(protocols, vec!["ip", "icmp", "tcp", "udp"]);
        assert_eq!(
            tables[2].1,
            vec![
                ("RtoAlgorithm".to_string(), 1.0),
                ("MaxConn".to_string(), -1.0),
                ("ActiveOpens".to_string(), 300.0),
            ]
        );
    }

    #[test]
    fn test_parse_snmp_skips_unpaired_lines() {
        let tables = parse_snmp("Ip: Forwarding\nTcp: 1\nUdp: NoPorts\nUdp: 3\n");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].0, "udp");
    }

    #[tokio::test]
    async fn test_selected_protocols_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snmp");
        std::fs::write(&path, SNMP).unwrap();

        let mut proto = source("TCP, udp", path);
        proto.open().await.unwrap();
        let records = proto.sample().await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "proto.tcp.RtoAlgorithm",
                "proto.tcp.MaxConn",
                "proto.tcp.ActiveOpens",
                "proto.udp.InDatagrams",
                "proto.udp.NoPorts",
            ]
        );
        assert!(records.iter().all(|r| r.precision == 0));
    }

    #[tokio::test]
    async fn test_all_selects_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snmp");
        std::fs::write(&path, SNMP).unwrap();

        let mut proto = source("all", path);
        proto.open().await.unwrap();
        assert_eq!(proto.sample().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_arguments() {
        assert!(matches!(
            ProtoSource::new(&[]).open().await,
            Err(PluginError::InvalidArgument(_))
        ));
        assert!(matches!(
            ProtoSource::new(&["tcp,sctp".to_string()]).open().await,
            Err(PluginError::InvalidArgument(msg)) if msg.contains("sctp")
        ));
    }

    #[tokio::test]
    async fn test_open_fails_without_counter_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut proto = source("tcp", dir.path().join("missing"));
        assert!(matches!(proto.open().await, Err(PluginError::Unavailable(_))));
    }
}
