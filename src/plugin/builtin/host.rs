//! Host counter sources backed by `sysinfo`.

use std::collections::HashSet;

use regex::Regex;
use sysinfo::{Components, Disks, Networks, ProcessRefreshKind, RefreshKind, System};

use crate::plugin::{PluginError, Source};
use crate::report::Record;

/// Fail `open` on platforms `sysinfo` cannot read.
fn ensure_supported() -> Result<(), PluginError> {
    if sysinfo::IS_SUPPORTED_SYSTEM {
        Ok(())
    } else {
        Err(PluginError::Unavailable(
            "host counters are not supported on this platform".to_string(),
        ))
    }
}

/// Split a comma separated argument, dropping blanks.
fn split_list(arg: Option<&String>) -> Vec<String> {
    arg.map(|a| {
        a.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Compile a shell-style pattern where `*` matches any run of characters.
fn glob_to_regex(pattern: &str) -> Result<Regex, PluginError> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
        .map_err(|e| PluginError::InvalidArgument(format!("invalid pattern '{pattern}': {e}")))
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, PluginError> {
    patterns.iter().map(|p| glob_to_regex(p)).collect()
}

fn matches_any(matchers: &[Regex], name: &str) -> bool {
    matchers.iter().any(|re| re.is_match(name))
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

// =============================================================================
// CPU / load / memory / host
// =============================================================================

/// Global CPU usage (`cpu.percent`).
///
/// The first sample after `open` reports the usage since `open`.
#[derive(Default)]
pub struct CpuSource {
    sys: System,
}

#[async_trait::async_trait]
impl Source for CpuSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()?;
        self.sys.refresh_cpu_usage();
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        self.sys.refresh_cpu_usage();
        Ok(vec![Record::new(
            "cpu.percent",
            f64::from(self.sys.global_cpu_usage()),
            1,
        )])
    }
}

/// Load averages (`load1`, `load5`, `load15`).
pub struct LoadSource;

#[async_trait::async_trait]
impl Source for LoadSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        let load = System::load_average();
        Ok(vec![
            Record::new("load1", load.one, 2),
            Record::new("load5", load.five, 2),
            Record::new("load15", load.fifteen, 2),
        ])
    }
}

/// Virtual memory usage (`mem.*`).
#[derive(Default)]
pub struct MemSource {
    sys: System,
}

#[async_trait::async_trait]
impl Source for MemSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        let used = self.sys.used_memory();
        Ok(vec![
            Record::new("mem.total", total as f64, 0),
            Record::new("mem.free", self.sys.free_memory() as f64, 0),
            Record::new("mem.used", used as f64, 0),
            Record::new("mem.used_percent", percent(used, total), 1),
        ])
    }
}

/// Host uptime and process count (`host.uptime`, `host.procs`).
pub struct HostSource;

#[async_trait::async_trait]
impl Source for HostSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        Ok(vec![
            Record::new("host.uptime", System::uptime() as f64, 0),
            Record::new("host.procs", sys.processes().len() as f64, 0),
        ])
    }
}

// =============================================================================
// Disk usage
// =============================================================================

/// Disk usage per mount point (`disk.<mount>.*`).
///
/// Argument: comma separated mount points, or `all`.
pub struct DiskSource {
    mounts: Vec<String>,
}

impl DiskSource {
    pub fn new(args: &[String]) -> Self {
        Self {
            mounts: split_list(args.first()),
        }
    }

    fn selects(&self, mount: &str) -> bool {
        self.mounts.iter().any(|m| m == "all" || m == mount)
    }
}

#[async_trait::async_trait]
impl Source for DiskSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()?;
        if self.mounts.is_empty() {
            return Err(PluginError::InvalidArgument(
                "in-disk requires a mount point list (e.g. /,/mnt/data) or 'all'".to_string(),
            ));
        }
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        let disks = Disks::new_with_refreshed_list();
        let mut records = Vec::new();
        for disk in disks.list() {
            let mount = disk.mount_point().to_string_lossy();
            if !self.selects(&mount) {
                continue;
            }
            let total = disk.total_space();
            let free = disk.available_space();
            let used = total.saturating_sub(free);
            records.extend([
                Record::new(format!("disk.{mount}.total"), total as f64, 0),
                Record::new(format!("disk.{mount}.free"), free as f64, 0),
                Record::new(format!("disk.{mount}.used"), used as f64, 0),
                Record::new(format!("disk.{mount}.used_percent"), percent(used, total), 1),
            ]);
            #[cfg(unix)]
            records.extend(inode_records(&mount, disk.mount_point()));
        }
        Ok(records)
    }
}

/// Inode counters of the filesystem mounted at `path` (`disk.<mount>.inodes_*`).
#[cfg(unix)]
fn inode_records(mount: &str, path: &std::path::Path) -> Vec<Record> {
    let stat = match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => stat,
        Err(e) => {
            tracing::debug!(mount = %mount, error = %e, "Failed to read inode counters");
            return Vec::new();
        }
    };
    let total = u64::from(stat.files());
    let free = u64::from(stat.files_free());
    let used = total.saturating_sub(free);
    vec![
        Record::new(format!("disk.{mount}.inodes_total"), total as f64, 0),
        Record::new(format!("disk.{mount}.inodes_free"), free as f64, 0),
        Record::new(format!("disk.{mount}.inodes_used"), used as f64, 0),
        Record::new(format!("disk.{mount}.inodes_used_percent"), percent(used, total), 1),
    ]
}

// =============================================================================
// Disk I/O
// =============================================================================

/// Cumulative I/O per block device (`diskio.<dev>.read_bytes`, `write_bytes`).
///
/// Argument: comma separated device names; `*` is a wildcard (e.g. `sda,nvme*`).
/// Device names drop a leading `/dev/`.
pub struct DiskIoSource {
    patterns: Vec<String>,
    matchers: Vec<Regex>,
}

impl DiskIoSource {
    pub fn new(args: &[String]) -> Self {
        Self {
            patterns: split_list(args.first()),
            matchers: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl Source for DiskIoSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()?;
        if self.patterns.is_empty() {
            return Err(PluginError::InvalidArgument(
                "in-diskio requires a device list (e.g. sda,sd*)".to_string(),
            ));
        }
        self.matchers = compile_patterns(&self.patterns)?;
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        if self.matchers.is_empty() {
            return Err(PluginError::NotOpen);
        }
        let disks = Disks::new_with_refreshed_list();
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for disk in disks.list() {
            let name = disk.name().to_string_lossy();
            let dev = device_name(&name);
            if !matches_any(&self.matchers, dev) || !seen.insert(dev.to_string()) {
                continue;
            }
            let usage = disk.usage();
            records.extend([
                Record::new(format!("diskio.{dev}.read_bytes"), usage.total_read_bytes as f64, 0),
                Record::new(format!("diskio.{dev}.write_bytes"), usage.total_written_bytes as f64, 0),
            ]);
        }
        Ok(records)
    }
}

fn device_name(name: &str) -> &str {
    name.strip_prefix("/dev/").unwrap_or(name)
}

// =============================================================================
// Sensors
// =============================================================================

/// Temperature per hardware sensor (`sensor.<label>.temperature`).
///
/// Sensors without a current reading are skipped.
pub struct SensorSource;

#[async_trait::async_trait]
impl Source for SensorSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()?;
        let components = Components::new_with_refreshed_list();
        tracing::debug!(sensors = components.list().len(), "Sensors discovered");
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        let components = Components::new_with_refreshed_list();
        Ok(components
            .list()
            .iter()
            .filter_map(|c| {
                let celsius = c.temperature()?;
                Some(Record::new(
                    format!("sensor.{}.temperature", sensor_key(c.label())),
                    f64::from(celsius),
                    1,
                ))
            })
            .collect())
    }
}

/// Labels such as `coretemp Package id 0` become `coretemp_package_id_0`.
fn sensor_key(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

// =============================================================================
// Network I/O
// =============================================================================

/// Network counters per interface (`net.<iface>.*`).
///
/// Argument: comma separated interface names; `*` is a wildcard (e.g. `eth0,enp*`).
pub struct NetSource {
    patterns: Vec<String>,
    matchers: Vec<Regex>,
}

impl NetSource {
    pub fn new(args: &[String]) -> Self {
        Self {
            patterns: split_list(args.first()),
            matchers: Vec::new(),
        }
    }

}

#[async_trait::async_trait]
impl Source for NetSource {
    async fn open(&mut self) -> Result<(), PluginError> {
        ensure_supported()?;
        if self.patterns.is_empty() {
            return Err(PluginError::InvalidArgument(
                "in-net requires an interface list (e.g. eth0,enp*)".to_string(),
            ));
        }
        self.matchers = compile_patterns(&self.patterns)?;
        Ok(())
    }

    async fn sample(&mut self) -> Result<Vec<Record>, PluginError> {
        if self.matchers.is_empty() {
            return Err(PluginError::NotOpen);
        }
        let networks = Networks::new_with_refreshed_list();
        let mut records = Vec::new();
        for (iface, data) in networks.list() {
            if !matches_any(&self.matchers, iface) {
                continue;
            }
            records.extend([
                Record::new(format!("net.{iface}.bytes_sent"), data.total_transmitted() as f64, 0),
                Record::new(format!("net.{iface}.bytes_recv"), data.total_received() as f64, 0),
                Record::new(
                    format!("net.{iface}.packets_sent"),
                    data.total_packets_transmitted() as f64,
                    0,
                ),
                Record::new(
                    format!("net.{iface}.packet_recv"),
                    data.total_packets_received() as f64,
                    0,
                ),
                Record::new(
                    format!("net.{iface}.errors_out"),
                    data.total_errors_on_transmitted() as f64,
                    0,
                ),
                Record::new(
                    format!("net.{iface}.errors_in"),
                    data.total_errors_on_received() as f64,
                    0,
                ),
            ]);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(Some(&" /, /mnt/data ,,".to_string())),
            vec!["/".to_string(), "/mnt/data".to_string()]
        );
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("enp*").unwrap();
        assert!(re.is_match("enp0s3"));
        assert!(re.is_match("enp"));
        assert!(!re.is_match("eth0"));

        let exact = glob_to_regex("eth0").unwrap();
        assert!(exact.is_match("eth0"));
        assert!(!exact.is_match("eth01"));

        // Regex metacharacters in interface names are literal.
        assert!(glob_to_regex("br.0").unwrap().is_match("br.0"));
        assert!(!glob_to_regex("br.0").unwrap().is_match("brx0"));
    }

    #[test]
    fn test_percent_handles_zero_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn test_disk_selection() {
        let all = DiskSource::new(&["all".to_string()]);
        assert!(all.selects("/"));
        assert!(all.selects("/boot"));

        let some = DiskSource::new(&["/,/mnt/data".to_string()]);
        assert!(some.selects("/"));
        assert!(some.selects("/mnt/data"));
        assert!(!some.selects("/boot"));
    }

    #[tokio::test]
    async fn test_disk_open_requires_argument() {
        let mut source = DiskSource::new(&[]);
        assert!(source.open().await.is_err());
    }

    #[test]
    fn test_device_name() {
        assert_eq!(device_name("/dev/nvme0n1p1"), "nvme0n1p1");
        assert_eq!(device_name("sda"), "sda");
    }

    #[test]
    fn test_sensor_key() {
        assert_eq!(sensor_key("coretemp Package id 0"), "coretemp_package_id_0");
        assert_eq!(sensor_key("acpitz"), "acpitz");
    }

    #[test]
    fn test_matches_any() {
        let matchers = compile_patterns(&["sda".to_string(), "nvme*".to_string()]).unwrap();
        assert!(matches_any(&matchers, "sda"));
        assert!(matches_any(&matchers, "nvme0n1"));
        assert!(!matches_any(&matchers, "sdb"));
    }

    #[tokio::test]
    async fn test_diskio_requires_argument_and_open() {
        assert!(DiskIoSource::new(&[]).open().await.is_err());

        let mut source = DiskIoSource::new(&["sd*".to_string()]);
        assert!(matches!(source.sample().await, Err(PluginError::NotOpen)));
    }

    #[cfg(unix)]
    #[test]
    fn test_root_inode_records() {
        let records = inode_records("/", std::path::Path::new("/"));
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "disk./.inodes_total",
                "disk./.inodes_free",
                "disk./.inodes_used",
                "disk./.inodes_used_percent",
            ]
        );
        assert_eq!(records[3].precision, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_mount_has_no_inode_records() {
        assert!(inode_records("/nope", std::path::Path::new("/no/such/mount")).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_loopback_record_names() {
        let mut source = NetSource::new(&["lo".to_string()]);
        source.open().await.unwrap();
        let records = source.sample().await.unwrap();
        // Sandboxes without /sys/class/net report no interfaces at all.
        if records.is_empty() {
            return;
        }
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "net.lo.bytes_sent",
                "net.lo.bytes_recv",
                "net.lo.packets_sent",
                "net.lo.packet_recv",
                "net.lo.errors_out",
                "net.lo.errors_in",
            ]
        );
    }

    #[tokio::test]
    async fn test_net_sample_before_open_fails() {
        let mut source = NetSource::new(&["eth*".to_string()]);
        assert!(matches!(source.sample().await, Err(PluginError::NotOpen)));
    }

    #[tokio::test]
    async fn test_load_source_reports_three_averages() {
        let mut source = LoadSource;
        let records = source.sample().await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["load1", "load5", "load15"]);
        assert!(records.iter().all(|r| r.precision == 2));
    }

    #[tokio::test]
    async fn test_mem_source_record_names() {
        let mut source = MemSource::default();
        let records = source.sample().await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["mem.total", "mem.free", "mem.used", "mem.used_percent"]
        );
    }
}
