//! SDP rewriting: the generate (`manipulate`) and ingest (`process`) paths
//! that bridge a session's local port/SRTP state with `media::sdp`'s parse
//! tree.

use anyhow::Result;

use crate::media::sdp::{Direction, MediaKind, ParsedSdp};
use crate::media::srtp::SrtpSuite;
use crate::session::SessionState;
use crate::srtp_manager;

/// Rewrite a parsed SDP to advertise this session's locally bound ports,
/// address, and (if negotiated) SDES crypto. Mutates `parsed` in place and
/// returns the re-serialized text.
///
/// On answer, latches the first payload type of each section into `pt`.
pub fn manipulate(
    state: &mut SessionState,
    local_ip: &str,
    parsed: &mut ParsedSdp,
    is_answer: bool,
) -> Result<String> {
    parsed.connection_addr = Some(local_ip.to_string());

    for section in parsed.media.iter_mut() {
        let kind = section.kind;
        let kind_state = state.kind_mut(kind);

        section.proto = if state.require_srtp {
            "RTP/SAVP".to_string()
        } else {
            "RTP/AVP".to_string()
        };
        section.port = kind_state.local_rtp_port;
        section.connection_addr = None;

        if state.has_srtp_local {
            let kind_state = state.kind_mut(kind);
            let crypto_b64 = srtp_manager::set_local(kind_state)?;
            section.crypto.clear();
            section.crypto.push(crate::media::sdp::CryptoAttribute {
                tag: 1,
                suite: "AES_CM_128_HMAC_SHA1_80".to_string(),
                key_params: format!("inline:{}", crypto_b64),
            });
        }

        if is_answer {
            if let Some(&first_pt) = section.payload_types.first() {
                state.kind_mut(kind).pt = Some(first_pt);
            }
        }
    }

    Ok(crate::media::sdp::to_text(parsed))
}

/// Ingest a peer's plain SDP. Returns whether the remote endpoint changed
/// (meaningful only when `is_update` is true).
pub fn process(
    state: &mut SessionState,
    parsed: &ParsedSdp,
    is_answer: bool,
    is_update: bool,
) -> Result<bool> {
    let mut changed = false;

    if let Some(addr) = &parsed.connection_addr {
        if state.remote_ip.as_deref() != Some(addr.as_str()) {
            changed = true;
        }
        state.remote_ip = Some(addr.clone());
    }

    for section in &parsed.media {
        let kind = section.kind;

        if !is_update {
            state.require_srtp = state.require_srtp || section.proto == "RTP/SAVP";
        }

        if section.port != 0 {
            let kind_state = state.kind_mut(kind);
            kind_state.has = true;
            if kind_state.remote_rtp_port != section.port {
                changed = true;
            }
            kind_state.remote_rtp_port = section.port;
            kind_state.remote_rtcp_port = section.port + 1;
        }

        if let Some(addr) = &section.connection_addr {
            if state.remote_ip.as_deref() != Some(addr.as_str()) {
                changed = true;
            }
            state.remote_ip = Some(addr.clone());
        }

        if is_update {
            // During an update, only the remote endpoint (address/port) is
            // re-read; direction, crypto, and payload type are not
            // reprocessed.
            continue;
        }

        state.kind_mut(kind).send = section.direction != Direction::SendOnly
            && section.direction != Direction::Inactive;

        for crypto in &section.crypto {
            if let Ok(suite) = SrtpSuite::from_sdp_name(&crypto.suite) {
                let inline = crypto
                    .key_params
                    .strip_prefix("inline:")
                    .unwrap_or(&crypto.key_params);
                let b64 = inline.split('|').next().unwrap_or(inline);
                let kind_state = state.kind_mut(kind);
                if srtp_manager::set_remote(kind_state, b64, suite).is_ok() {
                    state.has_srtp_remote = true;
                }
                break;
            }
        }

        if is_answer {
            if let Some(&first_pt) = section.payload_types.first() {
                state.kind_mut(kind).pt = Some(first_pt);
            }
        }
    }

    if changed {
        state.updated = true;
    }

    Ok(changed)
}

/// Whether at least one negotiated kind exists and a remote address is known.
pub fn has_negotiated_media(state: &SessionState) -> bool {
    (state.audio.has || state.video.has) && state.remote_ip.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::sdp;

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\nm=audio 0 RTP/AVP 0\r\n";

    #[test]
    fn test_manipulate_sets_avp_proto_without_srtp() {
        let mut state = SessionState::default();
        state.audio.local_rtp_port = 40000;
        let mut parsed = sdp::parse(OFFER).unwrap();

        let text = manipulate(&mut state, "203.0.113.5", &mut parsed, false).unwrap();
        assert!(text.contains("RTP/AVP"));
        assert!(text.contains("m=audio 40000"));
        assert!(text.contains("c=IN IP4 203.0.113.5"));
        assert!(!text.contains("crypto"));
    }

    #[test]
    fn test_manipulate_adds_crypto_when_srtp_required() {
        let mut state = SessionState::default();
        state.audio.local_rtp_port = 40000;
        state.require_srtp = true;
        state.has_srtp_local = true;
        let mut parsed = sdp::parse(OFFER).unwrap();

        let text = manipulate(&mut state, "203.0.113.5", &mut parsed, false).unwrap();
        assert!(text.contains("RTP/SAVP"));
        assert!(text.contains("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:"));
    }

    #[test]
    fn test_process_ingests_remote_endpoint() {
        let answer = "v=0\r\no=- 1 1 IN IP4 198.51.100.9\r\ns=-\r\nc=IN IP4 198.51.100.9\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\na=sendrecv\r\n";
        let mut state = SessionState::default();
        let parsed = sdp::parse(answer).unwrap();

        process(&mut state, &parsed, true, false).unwrap();
        assert_eq!(state.remote_ip.as_deref(), Some("198.51.100.9"));
        assert!(state.audio.has);
        assert_eq!(state.audio.remote_rtp_port, 40000);
        assert_eq!(state.audio.remote_rtcp_port, 40001);
        assert_eq!(state.audio.pt, Some(0));
        assert!(state.audio.send);
    }

    #[test]
    fn test_process_sendonly_gates_send_false() {
        let offer = "v=0\r\no=- 1 1 IN IP4 198.51.100.9\r\ns=-\r\nc=IN IP4 198.51.100.9\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\na=sendonly\r\n";
        let mut state = SessionState::default();
        let parsed = sdp::parse(offer).unwrap();
        process(&mut state, &parsed, false, false).unwrap();
        assert!(!state.audio.send);
    }

    #[test]
    fn test_process_update_only_reconnects_endpoint() {
        let mut state = SessionState::default();
        let initial = sdp::parse(
            "v=0\r\no=- 1 1 IN IP4 198.51.100.9\r\ns=-\r\nc=IN IP4 198.51.100.9\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\na=sendrecv\r\n",
        )
        .unwrap();
        process(&mut state, &initial, false, false).unwrap();
        state.updated = false;

        let updated = sdp::parse(
            "v=0\r\no=- 1 1 IN IP4 198.51.100.9\r\ns=-\r\nc=IN IP4 198.51.100.9\r\nt=0 0\r\nm=audio 40100 RTP/AVP 0\r\na=sendonly\r\n",
        )
        .unwrap();
        let changed = process(&mut state, &updated, false, true).unwrap();
        assert!(changed);
        assert!(state.updated);
        assert_eq!(state.audio.remote_rtp_port, 40100);
        // direction is not reprocessed during an update
        assert!(state.audio.send);
    }

    #[test]
    fn test_has_negotiated_media_requires_remote_ip() {
        let mut state = SessionState::default();
        assert!(!has_negotiated_media(&state));
        state.audio.has = true;
        assert!(!has_negotiated_media(&state));
        state.remote_ip = Some("198.51.100.9".to_string());
        assert!(has_negotiated_media(&state));
    }
}
