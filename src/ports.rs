//! UDP port allocation for one RTP/RTCP pair.
//!
//! Ports are chosen randomly within a configured range rather than
//! sequentially, so that two sessions started back-to-back don't collide on
//! the same candidate before the OS has a chance to report it in use.

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;

const MAX_ATTEMPTS: u32 = 100;

/// A bound RTP/RTCP socket pair: `rtcp_port = rtp_port + 1`.
pub struct PortPair {
    pub rtp_socket: UdpSocket,
    pub rtcp_socket: UdpSocket,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

/// Pick a random even port in `[range_min, range_max]`. Returns `range_min`
/// rounded up to even if the range collapses to a single candidate.
fn random_even_port(range_min: u16, range_max: u16) -> Result<u16> {
    if range_min > range_max {
        bail!("invalid port range: {}-{}", range_min, range_max);
    }
    let span = (range_max - range_min) as u32 + 1;
    let mut bytes = [0u8; 4];
    getrandom::getrandom(&mut bytes).context("failed to read randomness for port selection")?;
    let offset = u32::from_be_bytes(bytes) % span;
    let mut port = range_min as u32 + offset;
    if port % 2 != 0 {
        port = if port + 1 <= range_max as u32 { port + 1 } else { port - 1 };
    }
    Ok(port as u16)
}

/// Allocate one RTP/RTCP port pair bound to `local_ip`, retrying on bind
/// failure up to `MAX_ATTEMPTS` times.
pub async fn allocate_port_pair(local_ip: &str, range_min: u16, range_max: u16) -> Result<PortPair> {
    let mut attempts_left = MAX_ATTEMPTS;

    loop {
        if attempts_left == 0 {
            bail!(
                "exhausted {} attempts allocating a port pair in {}-{}",
                MAX_ATTEMPTS,
                range_min,
                range_max
            );
        }
        attempts_left -= 1;

        let rtp_port = random_even_port(range_min, range_max)?;
        let rtp_socket = match UdpSocket::bind((local_ip, rtp_port)).await {
            Ok(socket) => socket,
            Err(err) => {
                tracing::debug!(port = rtp_port, error = %err, "rtp port bind failed, retrying");
                continue;
            }
        };

        let rtcp_port = rtp_port + 1;
        let rtcp_socket = match UdpSocket::bind((local_ip, rtcp_port)).await {
            Ok(socket) => socket,
            Err(err) => {
                tracing::debug!(port = rtcp_port, error = %err, "rtcp port bind failed, retrying pair");
                drop(rtp_socket);
                continue;
            }
        };

        return Ok(PortPair {
            rtp_socket,
            rtcp_socket,
            rtp_port,
            rtcp_port,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_even_port_is_even_and_in_range() {
        for _ in 0..100 {
            let port = random_even_port(20000, 20010).unwrap();
            assert!(port % 2 == 0);
            assert!((20000..=20010).contains(&port));
        }
    }

    #[test]
    fn test_random_even_port_rejects_inverted_range() {
        assert!(random_even_port(100, 50).is_err());
    }

    #[tokio::test]
    async fn test_allocate_port_pair_binds_consecutive_ports() {
        let pair = allocate_port_pair("127.0.0.1", 30000, 30100).await.unwrap();
        assert_eq!(pair.rtcp_port, pair.rtp_port + 1);
        assert!(pair.rtp_port % 2 == 0);
        assert!((30000..=30100).contains(&pair.rtp_port));
    }

    #[tokio::test]
    async fn test_allocate_port_pair_fails_when_range_exhausted() {
        // A single-port range whose port we hold open forces every attempt
        // to fail until attempts are exhausted.
        let _holder = UdpSocket::bind("127.0.0.1:30200").await.unwrap();
        let result = allocate_port_pair("127.0.0.1", 30200, 30200).await;
        assert!(result.is_err());
    }
}
