//! RTP header encoding/decoding (RFC 3550).
//!
//! RTP header format:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The plugin never decodes payloads — it only needs the header to latch
//! SSRCs, reconstruct a monotonic switching context, and hand the payload
//! untouched (or SRTP-transformed) to the relay side. There is no codec
//! here: this crate relays opaque media, it does not transcode it.

use anyhow::{bail, Result};

/// Minimum RTP header size in bytes (no CSRC, no extension).
pub const RTP_HEADER_SIZE: usize = 12;

/// Compute the full RTP header length from raw packet bytes.
///
/// Accounts for CSRC entries and header extensions (RFC 3550 §5.3.1).
/// Returns `None` if the packet is too short.
pub fn full_header_len(data: &[u8]) -> Option<usize> {
    if data.len() < RTP_HEADER_SIZE {
        return None;
    }
    let csrc_count = (data[0] & 0x0F) as usize;
    let has_extension = (data[0] >> 4) & 0x01 != 0;
    let mut len = RTP_HEADER_SIZE + csrc_count * 4;
    if data.len() < len {
        return None;
    }
    if has_extension {
        // Extension header: 2 bytes profile + 2 bytes length (in 32-bit words)
        if data.len() < len + 4 {
            return None;
        }
        let ext_words = u16::from_be_bytes([data[len + 2], data[len + 3]]) as usize;
        len += 4 + ext_words * 4;
        if data.len() < len {
            return None;
        }
    }
    Some(len)
}

/// Parsed RTP packet.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

/// Encode an RTP packet into bytes. No CSRC, no extension, no padding.
pub fn encode(payload_type: u8, seq: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RTP_HEADER_SIZE + payload.len());

    // Byte 0: V=2, P=0, X=0, CC=0 -> 0x80
    buf.push(0x80);
    // Byte 1: M=0, PT
    buf.push(payload_type & 0x7F);
    // Bytes 2-3: sequence number (big-endian)
    buf.extend_from_slice(&seq.to_be_bytes());
    // Bytes 4-7: timestamp (big-endian)
    buf.extend_from_slice(&timestamp.to_be_bytes());
    // Bytes 8-11: SSRC (big-endian)
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(payload);

    buf
}

/// Decode bytes into an RTP packet.
pub fn decode(data: &[u8]) -> Result<RtpPacket> {
    if data.len() < RTP_HEADER_SIZE {
        bail!("RTP packet too short: {} bytes", data.len());
    }

    let version = (data[0] >> 6) & 0x03;
    if version != 2 {
        bail!("unsupported RTP version: {}", version);
    }

    let padding = (data[0] >> 5) & 0x01 != 0;
    let extension = (data[0] >> 4) & 0x01 != 0;
    let csrc_count = data[0] & 0x0F;
    let marker = (data[1] >> 7) & 0x01 != 0;
    let payload_type = data[1] & 0x7F;
    let sequence_number = u16::from_be_bytes([data[2], data[3]]);
    let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let header_len = full_header_len(data).unwrap_or(RTP_HEADER_SIZE + (csrc_count as usize) * 4);
    if data.len() < header_len {
        bail!(
            "RTP packet too short for {} CSRCs: {} bytes",
            csrc_count,
            data.len()
        );
    }

    let payload = data[header_len..].to_vec();

    Ok(RtpPacket {
        version,
        padding,
        extension,
        csrc_count,
        marker,
        payload_type,
        sequence_number,
        timestamp,
        ssrc,
        payload,
    })
}

/// Rewrite the sequence number and timestamp of an already-encoded RTP
/// packet in place, leaving SSRC, payload type, and payload untouched.
///
/// Used by the relay loop's switching context to keep sequence numbers and
/// timestamps monotonic across re-offers without re-encoding the packet.
pub fn rewrite_seq_ts(packet: &mut [u8], seq: u16, timestamp: u32) {
    if packet.len() < RTP_HEADER_SIZE {
        return;
    }
    packet[2..4].copy_from_slice(&seq.to_be_bytes());
    packet[4..8].copy_from_slice(&timestamp.to_be_bytes());
}

/// Rewrite just the SSRC field of an already-encoded RTP packet.
pub fn rewrite_ssrc(packet: &mut [u8], ssrc: u32) {
    if packet.len() < RTP_HEADER_SIZE {
        return;
    }
    packet[8..12].copy_from_slice(&ssrc.to_be_bytes());
}

/// Tracks sequence number and timestamp continuity for one media kind
/// across re-offers (the `rtp_context` of the data model).
///
/// The remote peer may restart its own sequence/timestamp numbering when a
/// new offer/answer cycle replaces the underlying stream. The switching
/// context remaps incoming (seq, timestamp) pairs onto an output space that
/// only ever increases, so the WebRTC side never observes a backward jump.
///
/// The stride bootstrap (first packet records the baseline, the second
/// records the stride) is a known approximation, not a correctness
/// guarantee: packet loss between the first two packets throws the stride
/// estimate off for the remainder of the context's life.
#[derive(Debug, Default, Clone)]
pub struct SwitchingContext {
    baseline_in_seq: Option<u16>,
    baseline_in_ts: Option<u32>,
    stride: u32,
    out_seq: u16,
    out_ts: u32,
    packets_seen: u32,
}

impl SwitchingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an incoming (sequence, timestamp) pair to the output pair that
    /// should be forwarded to the WebRTC side, advancing internal state.
    pub fn remap(&mut self, in_seq: u16, in_ts: u32) -> (u16, u32) {
        match self.packets_seen {
            0 => {
                self.baseline_in_seq = Some(in_seq);
                self.baseline_in_ts = Some(in_ts);
                self.stride = 0;
                self.out_seq = in_seq;
                self.out_ts = in_ts;
            }
            1 => {
                let base_seq = self.baseline_in_seq.unwrap_or(in_seq);
                let base_ts = self.baseline_in_ts.unwrap_or(in_ts);
                self.stride = in_ts.wrapping_sub(base_ts);
                let seq_delta = in_seq.wrapping_sub(base_seq).max(1);
                self.out_seq = self.out_seq.wrapping_add(seq_delta);
                self.out_ts = self.out_ts.wrapping_add(self.stride);
            }
            _ => {
                self.out_seq = self.out_seq.wrapping_add(1);
                self.out_ts = self.out_ts.wrapping_add(self.stride);
            }
        }
        self.packets_seen = self.packets_seen.saturating_add(1);
        (self.out_seq, self.out_ts)
    }
}
