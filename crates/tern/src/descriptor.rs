//! Device descriptor parsing for `tern ring <builder> add`.
//!
//! Format: `[r<region>]z<zone>-<ip>:<port>[R<repl_ip>:<repl_port>]/<device>[_<meta>]`,
//! e.g. `r1z2-10.0.0.5:6200R10.1.0.5:6300/sdb1_rack7`.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tern_placement::NewDevice;

const PATTERN: &str = r"^(?:r(?P<region>\d+))?z(?P<zone>\d+)-(?P<ip>[\d\.]+):(?P<port>\d+)(?:R(?P<replication_ip>[\d\.]+):(?P<replication_port>\d+))?/(?P<device>[^_]+)(?:_(?P<meta>.+))?$";

/// Parse a descriptor and weight into a device to add.
///
/// Region defaults to 0. A missing replication address stays empty/0,
/// meaning "same as the primary address".
pub fn parse_device(descriptor: &str, weight: f64) -> Result<NewDevice> {
    let rx = Regex::new(PATTERN)?;
    let caps = rx
        .captures(descriptor)
        .ok_or_else(|| anyhow!("invalid device descriptor {descriptor:?}"))?;

    let text = |name: &str| caps.name(name).map_or("", |m| m.as_str());
    let region = match caps.name("region") {
        Some(m) => m.as_str().parse().context("invalid region")?,
        None => 0,
    };
    let replication_port = match caps.name("replication_port") {
        Some(m) => m.as_str().parse().context("invalid replication port")?,
        None => 0,
    };

    Ok(NewDevice {
        region,
        zone: text("zone").parse().context("invalid zone")?,
        ip: text("ip").to_string(),
        port: text("port").parse().context("invalid port")?,
        replication_ip: text("replication_ip").to_string(),
        replication_port,
        device: text("device").to_string(),
        meta: text("meta").to_string(),
        weight,
    })
}
