//! Plugin configuration (`[general]` section of the host-supplied TOML file).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::UdpSocket;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    general: General,
}

#[derive(Debug, Clone, Deserialize)]
struct General {
    local_ip: Option<String>,
    rtp_port_range: Option<String>,
    #[serde(default)]
    events: bool,
}

/// Resolved plugin configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub local_ip: String,
    pub rtp_range_min: u16,
    pub rtp_range_max: u16,
    pub events: bool,
}

const DEFAULT_RANGE_MIN: u16 = 10000;
const DEFAULT_RANGE_MAX: u16 = 60000;

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        let local_ip = match raw.general.local_ip {
            Some(ip) => ip,
            None => detect_local_ip().context("failed to auto-detect local_ip")?,
        };

        let (rtp_range_min, rtp_range_max) = match raw.general.rtp_port_range {
            Some(range) => parse_port_range(&range)?,
            None => (DEFAULT_RANGE_MIN, DEFAULT_RANGE_MAX),
        };

        Ok(Config {
            local_ip,
            rtp_range_min,
            rtp_range_max,
            events: raw.general.events,
        })
    }
}

/// Parse a `"min-max"` port range, swapping the bounds if inverted. A max of
/// `0` means "up to 65535".
fn parse_port_range(range: &str) -> Result<(u16, u16)> {
    let (min_str, max_str) = range
        .split_once('-')
        .with_context(|| format!("malformed rtp_port_range: {}", range))?;
    let min: u16 = min_str
        .trim()
        .parse()
        .with_context(|| format!("malformed rtp_port_range: {}", range))?;
    let mut max: u16 = max_str
        .trim()
        .parse()
        .with_context(|| format!("malformed rtp_port_range: {}", range))?;
    if max == 0 {
        max = u16::MAX;
    }
    if min > max {
        return Ok((max, min));
    }
    if min == max {
        bail!("rtp_port_range must span at least two ports: {}", range);
    }
    Ok((min, max))
}

/// Determine the local IP address by connecting a UDP socket to a public
/// address and reading back the source address the kernel picked — no
/// packet is actually sent. Equivalent to the teacher's ICE-oriented
/// `get_local_ip()`, generalized to not assume an ICE context.
fn detect_local_ip() -> Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind probe socket")?;
    socket
        .connect("8.8.8.8:80")
        .context("failed to connect probe socket")?;
    let addr = socket.local_addr().context("failed to read local address")?;
    Ok(addr.ip().to_string())
}
