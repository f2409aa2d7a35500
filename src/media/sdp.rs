//! Plain-SDP parsing and serialization (RFC 4566).
//!
//! This is deliberately not a WebRTC SDP implementation: no ICE candidates,
//! no DTLS fingerprint, no BUNDLE/rtcp-mux. The plugin only ever emits or
//! ingests the plain `RTP/AVP` / `RTP/SAVP` subset a legacy peer speaks.
//! Session-level SDP rewriting (port substitution, SRTP key installation)
//! lives in `session.rs`, which uses the types here as its parse tree.

use anyhow::{bail, Context, Result};

/// Media kind. The plugin only bridges audio and video; anything else
/// (e.g. `m=application`) is rejected by the caller before SDP ever reaches
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Stream direction as negotiated by an `a=sendonly`/`a=recvonly`/
/// `a=sendrecv`/`a=inactive` attribute. Absence defaults to `SendRecv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    /// Whether this direction permits us to send media toward the peer.
    pub fn sends(self) -> bool {
        !matches!(self, Direction::SendOnly | Direction::Inactive)
    }

    fn as_str(self) -> &'static str {
        match self {
            Direction::SendRecv => "sendrecv",
            Direction::SendOnly => "sendonly",
            Direction::RecvOnly => "recvonly",
            Direction::Inactive => "inactive",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sendrecv" => Some(Direction::SendRecv),
            "sendonly" => Some(Direction::SendOnly),
            "recvonly" => Some(Direction::RecvOnly),
            "inactive" => Some(Direction::Inactive),
            _ => None,
        }
    }
}

/// A parsed `a=crypto` line: tag, suite name, and base64 keying material.
#[derive(Debug, Clone)]
pub struct CryptoAttribute {
    pub tag: u32,
    pub suite: String,
    pub key_params: String,
}

/// One `m=` media section and the attributes scoped to it.
#[derive(Debug, Clone)]
pub struct MediaSection {
    pub kind: MediaKind,
    pub proto: String,
    pub port: u16,
    pub payload_types: Vec<u8>,
    /// Connection address from a section-level `c=` line, if present.
    pub connection_addr: Option<String>,
    pub direction: Direction,
    pub crypto: Vec<CryptoAttribute>,
    /// Any other attribute lines, preserved verbatim for round-tripping
    /// (e.g. `a=rtpmap`, `a=fmtp`) in their original order.
    pub other_attrs: Vec<String>,
}

/// A parsed SDP message: session-level fields plus its media sections.
#[derive(Debug, Clone)]
pub struct ParsedSdp {
    pub origin: String,
    pub session_name: String,
    /// Session-level `c=` line, if present (may be overridden per-section).
    pub connection_addr: Option<String>,
    pub timing: String,
    pub media: Vec<MediaSection>,
}

impl ParsedSdp {
    /// Session-level connection address a media section should use absent
    /// its own `c=` line.
    pub fn effective_connection_addr(&self, section: &MediaSection) -> Option<&str> {
        section
            .connection_addr
            .as_deref()
            .or(self.connection_addr.as_deref())
    }

    pub fn audio_mut(&mut self) -> Option<&mut MediaSection> {
        self.media.iter_mut().find(|m| m.kind == MediaKind::Audio)
    }

    pub fn video_mut(&mut self) -> Option<&mut MediaSection> {
        self.media.iter_mut().find(|m| m.kind == MediaKind::Video)
    }

    pub fn audio(&self) -> Option<&MediaSection> {
        self.media.iter().find(|m| m.kind == MediaKind::Audio)
    }

    pub fn video(&self) -> Option<&MediaSection> {
        self.media.iter().find(|m| m.kind == MediaKind::Video)
    }
}

/// Parse a plain-SDP text blob.
///
/// Rejects `m=application` sections — the plugin bridges audio/video only.
pub fn parse(text: &str) -> Result<ParsedSdp> {
    let mut origin = String::new();
    let mut session_name = String::new();
    let mut session_connection: Option<String> = None;
    let mut timing = String::new();
    let mut media = Vec::new();

    // Index of the media section currently being parsed, or None while
    // still in the session-level block.
    let mut current: Option<usize> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (kind_char, value) = line
            .split_once('=')
            .with_context(|| format!("malformed SDP line: {}", line))?;

        match kind_char {
            "o" => origin = value.to_string(),
            "s" => session_name = value.to_string(),
            "t" => timing = value.to_string(),
            "c" => {
                let addr = parse_connection_line(value)?;
                match current {
                    Some(idx) => media[idx].connection_addr = Some(addr),
                    None => session_connection = Some(addr),
                }
            }
            "m" => {
                let section = parse_media_line(value)?;
                if let Some(section) = section {
                    media.push(section);
                    current = Some(media.len() - 1);
                } else {
                    // m=application or other unsupported kind: skip its
                    // attributes too by leaving `current` pointed at no
                    // section so following a=/c= lines are dropped.
                    current = None;
                    continue;
                }
            }
            "a" => {
                if let Some(idx) = current {
                    parse_attribute_line(&mut media[idx], value)?;
                }
                // Session-level attributes (before the first m=) are not
                // needed by this plugin and are dropped.
            }
            _ => {
                // Unhandled line types (b=, i=, u=, e=, p=, z=, k=, r=) carry
                // no information this plugin acts on.
            }
        }
    }

    Ok(ParsedSdp {
        origin,
        session_name,
        connection_addr: session_connection,
        timing,
        media,
    })
}

fn parse_connection_line(value: &str) -> Result<String> {
    // "IN IP4 <addr>" or "IN IP6 <addr>"
    let mut parts = value.split_whitespace();
    let _nettype = parts.next().context("malformed c= line")?;
    let _addrtype = parts.next().context("malformed c= line")?;
    let addr = parts.next().context("malformed c= line")?;
    Ok(addr.to_string())
}

fn parse_media_line(value: &str) -> Result<Option<MediaSection>> {
    let mut parts = value.split_whitespace();
    let kind_str = parts.next().context("malformed m= line")?;
    let kind = match kind_str {
        "audio" => MediaKind::Audio,
        "video" => MediaKind::Video,
        _ => return Ok(None),
    };
    let port: u16 = parts
        .next()
        .context("malformed m= line: missing port")?
        .parse()
        .context("malformed m= line: bad port")?;
    let proto = parts
        .next()
        .context("malformed m= line: missing proto")?
        .to_string();
    let payload_types = parts
        .map(|p| p.parse::<u8>().context("malformed m= line: bad payload type"))
        .collect::<Result<Vec<u8>>>()?;

    Ok(Some(MediaSection {
        kind,
        proto,
        port,
        payload_types,
        connection_addr: None,
        direction: Direction::SendRecv,
        crypto: Vec::new(),
        other_attrs: Vec::new(),
    }))
}

fn parse_attribute_line(section: &mut MediaSection, value: &str) -> Result<()> {
    if let Some(dir) = Direction::parse(value) {
        section.direction = dir;
        return Ok(());
    }

    if let Some(rest) = value.strip_prefix("crypto:") {
        let mut parts = rest.splitn(3, ' ');
        let tag: u32 = parts
            .next()
            .context("malformed a=crypto line")?
            .parse()
            .context("malformed a=crypto tag")?;
        let suite = parts.next().context("malformed a=crypto line")?.to_string();
        let key_params = parts.next().unwrap_or("").to_string();
        section.crypto.push(CryptoAttribute {
            tag,
            suite,
            key_params,
        });
        return Ok(());
    }

    section.other_attrs.push(value.to_string());
    Ok(())
}

/// Serialize a parsed SDP back to text, ending each line with `\r\n` per
/// RFC 4566.
pub fn to_text(sdp: &ParsedSdp) -> String {
    let mut out = String::new();
    out.push_str("v=0\r\n");
    out.push_str(&format!("o={}\r\n", sdp.origin));
    out.push_str(&format!("s={}\r\n", sdp.session_name));
    if let Some(addr) = &sdp.connection_addr {
        out.push_str(&format!("c=IN IP4 {}\r\n", addr));
    }
    out.push_str(&format!("t={}\r\n", sdp.timing));

    for section in &sdp.media {
        let pts = section
            .payload_types
            .iter()
            .map(|pt| pt.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!(
            "m={} {} {} {}\r\n",
            section.kind.as_str(),
            section.port,
            section.proto,
            pts
        ));
        if let Some(addr) = &section.connection_addr {
            out.push_str(&format!("c=IN IP4 {}\r\n", addr));
        }
        out.push_str(&format!("a={}\r\n", section.direction.as_str()));
        for crypto in &section.crypto {
            out.push_str(&format!(
                "a=crypto:{} {} {}\r\n",
                crypto.tag, crypto.suite, crypto.key_params
            ));
        }
        for attr in &section.other_attrs {
            out.push_str(&format!("a={}\r\n", attr));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 123 456 IN IP4 127.0.0.1\r\n\
s=-\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=audio 40000 RTP/AVP 0\r\n\
a=sendrecv\r\n\
a=rtpmap:0 PCMU/8000\r\n";

    #[test]
    fn test_parse_basic_offer() {
        let sdp = parse(OFFER).unwrap();
        assert_eq!(sdp.connection_addr.as_deref(), Some("127.0.0.1"));
        assert_eq!(sdp.media.len(), 1);
        let audio = sdp.audio().unwrap();
        assert_eq!(audio.port, 40000);
        assert_eq!(audio.proto, "RTP/AVP");
        assert_eq!(audio.payload_types, vec![0]);
        assert_eq!(audio.direction, Direction::SendRecv);
        assert_eq!(audio.other_attrs, vec!["rtpmap:0 PCMU/8000".to_string()]);
    }

    #[test]
    fn test_parse_rejects_application_section() {
        let sdp_text = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";
        let sdp = parse(sdp_text).unwrap();
        assert!(sdp.media.is_empty());
    }

    #[test]
    fn test_parse_crypto_attribute() {
        let sdp_text = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\n\
m=audio 40000 RTP/SAVP 0\r\na=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:d0RmdmcjVCMTIzNDU2Nzg5QUJDREUwMTIz|2^31\r\n";
        let sdp = parse(sdp_text).unwrap();
        let audio = sdp.audio().unwrap();
        assert_eq!(audio.crypto.len(), 1);
        assert_eq!(audio.crypto[0].tag, 1);
        assert_eq!(audio.crypto[0].suite, "AES_CM_128_HMAC_SHA1_80");
    }

    #[test]
    fn test_direction_sendonly_does_not_send() {
        assert!(!Direction::SendOnly.sends());
        assert!(!Direction::Inactive.sends());
        assert!(Direction::SendRecv.sends());
        assert!(Direction::RecvOnly.sends());
    }

    #[test]
    fn test_roundtrip_preserves_media_kind_and_ports() {
        let sdp = parse(OFFER).unwrap();
        let text = to_text(&sdp);
        let reparsed = parse(&text).unwrap();
        assert_eq!(reparsed.media.len(), sdp.media.len());
        assert_eq!(reparsed.audio().unwrap().port, sdp.audio().unwrap().port);
        assert_eq!(
            reparsed.audio().unwrap().payload_types,
            sdp.audio().unwrap().payload_types
        );
    }
}
