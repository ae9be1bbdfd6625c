//! Built-in plugins and their registration.
//!
//! | Name        | Kind   | Argument                        |
//! |-------------|--------|---------------------------------|
//! | `in-cpu`    | source | -                               |
//! | `in-load`   | source | -                               |
//! | `in-mem`    | source | -                               |
//! | `in-disk`   | source | mount points, or `all`          |
//! | `in-diskio` | source | devices, `*` wildcard           |
//! | `in-net`    | source | interfaces, `*` wildcard        |
//! | `in-proto`  | source | protocols, or `all`             |
//! | `in-sensor` | source | -                               |
//! | `in-host`   | source | -                               |
//! | `in-nats`   | source | monitoring URL                  |
//! | `out-file`  | sink   | path, or `-` for stdout         |
//! | `out-http`  | sink   | URL                             |
//! | `out-mqtt`  | sink   | `tcp://host:port/topic`         |

pub mod file;
pub mod host;
pub mod http;
pub mod mqtt;
pub mod nats;
pub mod proto;

use crate::plugin::{PluginArg, PluginRegistry, RegistryError, Sink, Source};

pub use file::FileSink;
pub use host::{
    CpuSource, DiskIoSource, DiskSource, HostSource, LoadSource, MemSource, NetSource,
    SensorSource,
};
pub use http::HttpSink;
pub use mqtt::MqttSink;
pub use nats::NatsSource;
pub use proto::ProtoSource;

/// Register every built-in plugin.
pub fn register_builtins(registry: &mut PluginRegistry) -> Result<(), RegistryError> {
    // inputs
    registry.register_source(
        "in-cpu",
        |_: &[String]| Box::new(CpuSource::default()) as Box<dyn Source>,
        PluginArg::Switch,
        "Report CPU usage",
    )?;
    registry.register_source(
        "in-load",
        |_: &[String]| Box::new(LoadSource) as Box<dyn Source>,
        PluginArg::Switch,
        "Report load average",
    )?;
    registry.register_source(
        "in-mem",
        |_: &[String]| Box::new(MemSource::default()) as Box<dyn Source>,
        PluginArg::Switch,
        "Report memory usage",
    )?;
    registry.register_source(
        "in-disk",
        |args: &[String]| Box::new(DiskSource::new(args)) as Box<dyn Source>,
        PluginArg::value("path"),
        "Report disk usage by mount point, comma(,) separated,\n\
         (e.g. /,/mnt/disk/). Set 'all' for all mount points.",
    )?;
    registry.register_source(
        "in-diskio",
        |args: &[String]| Box::new(DiskIoSource::new(args)) as Box<dyn Source>,
        PluginArg::value("dev"),
        "Report disk I/O by dev name, comma(,) separated,\n\
         wildcard(*) is allowed (e.g. sda,sdb,sd*)",
    )?;
    registry.register_source(
        "in-net",
        |args: &[String]| Box::new(NetSource::new(args)) as Box<dyn Source>,
        PluginArg::value("iface"),
        "Report network I/O, comma(,) separated,\n\
         wildcard(*) is allowed (e.g. eth0,en0,enp*)",
    )?;
    registry.register_source(
        "in-proto",
        |args: &[String]| Box::new(ProtoSource::new(args)) as Box<dyn Source>,
        PluginArg::value("proto"),
        "Report network I/O by protocol, comma(,) separated\n\
         Availables: ip,icmp,icmpmsg,tcp,udp,udplite",
    )?;
    registry.register_source(
        "in-sensor",
        |_: &[String]| Box::new(SensorSource) as Box<dyn Source>,
        PluginArg::Switch,
        "Report sensors (temperature)",
    )?;
    registry.register_source(
        "in-host",
        |_: &[String]| Box::new(HostSource) as Box<dyn Source>,
        PluginArg::Switch,
        "Report host information",
    )?;
    registry.register_source(
        "in-nats",
        |args: &[String]| Box::new(NatsSource::new(args)) as Box<dyn Source>,
        PluginArg::value("addr"),
        "Report NATS server information (e.g. http://localhost:8222)",
    )?;

    // outputs
    registry.register_sink(
        "out-file",
        |args: &[String]| Box::new(FileSink::new(args)) as Box<dyn Sink>,
        PluginArg::value("path"),
        "Report output to the file ('-' for stdout)",
    )?;
    registry.register_sink(
        "out-http",
        |args: &[String]| Box::new(HttpSink::new(args)) as Box<dyn Sink>,
        PluginArg::value("addr"),
        "Report output to the HTTP server\n\
         e.g. http://localhost:5654/db/write/EXAMPLE?timeformat=s&method=append",
    )?;
    registry.register_sink(
        "out-mqtt",
        |args: &[String]| Box::new(MqttSink::new(args)) as Box<dyn Sink>,
        PluginArg::value("addr/topic"),
        "Report output to the MQTT server.\n\
         e.g. tcp://localhost:5653/db/append/EXAMPLE:csv",
    )?;
    Ok(())
}
