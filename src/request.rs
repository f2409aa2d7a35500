//! The wire request schema: a flat `request: String` discriminator plus
//! per-request fields, parsed once into a tagged enum and matched
//! exhaustively — avoiding string comparisons at the dispatch hot path.

use serde::Deserialize;
use serde_json::Value;

use crate::error::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpRequirement {
    Optional,
    Mandatory,
}

impl SrtpRequirement {
    fn parse(value: &str) -> Result<Self, PluginError> {
        match value {
            "sdes_optional" => Ok(SrtpRequirement::Optional),
            "sdes_mandatory" => Ok(SrtpRequirement::Mandatory),
            other => Err(PluginError::InvalidElement(format!("srtp: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Jsep {
    pub type_: String,
    pub sdp: String,
}

#[derive(Debug, Clone)]
pub enum Request {
    Generate {
        jsep: Jsep,
        srtp: Option<SrtpRequirement>,
    },
    Process {
        type_: String,
        sdp: String,
        srtp: Option<SrtpRequirement>,
    },
    Hangup,
    Recording {
        action: RecordingAction,
        audio: bool,
        video: bool,
        peer_audio: bool,
        peer_video: bool,
        filename: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingAction {
    Start,
    Stop,
}

#[derive(Deserialize)]
struct RawEnvelope {
    request: Option<String>,
    jsep: Option<RawJsep>,
    #[serde(rename = "type")]
    type_: Option<String>,
    sdp: Option<String>,
    srtp: Option<String>,
    action: Option<String>,
    #[serde(default)]
    audio: bool,
    #[serde(default)]
    video: bool,
    #[serde(default)]
    peer_audio: bool,
    #[serde(default)]
    peer_video: bool,
    filename: Option<String>,
}

#[derive(Deserialize)]
struct RawJsep {
    #[serde(rename = "type")]
    type_: String,
    sdp: String,
}

/// Parse the flat wire JSON into a `Request`, validating required fields
/// and rejecting `m=application` sections early.
pub fn parse_request(body: &Value) -> Result<Request, PluginError> {
    let raw: RawEnvelope =
        serde_json::from_value(body.clone()).map_err(|e| PluginError::InvalidJson(e.to_string()))?;

    let request_name = raw
        .request
        .as_deref()
        .ok_or(PluginError::MissingElement("request"))?;

    let srtp = raw.srtp.as_deref().map(SrtpRequirement::parse).transpose()?;

    match request_name {
        "generate" => {
            let jsep = raw.jsep.ok_or(PluginError::MissingElement("jsep"))?;
            if jsep.type_ != "offer" && jsep.type_ != "answer" {
                return Err(PluginError::InvalidElement(format!("jsep.type: {}", jsep.type_)));
            }
            if jsep.sdp.is_empty() {
                return Err(PluginError::MissingSdp);
            }
            reject_application_sections(&jsep.sdp)?;
            Ok(Request::Generate {
                jsep: Jsep {
                    type_: jsep.type_,
                    sdp: jsep.sdp,
                },
                srtp,
            })
        }
        "process" => {
            let type_ = raw.type_.ok_or(PluginError::MissingElement("type"))?;
            if type_ != "offer" && type_ != "answer" {
                return Err(PluginError::InvalidElement(format!("type: {}", type_)));
            }
            let sdp = raw.sdp.ok_or(PluginError::MissingSdp)?;
            if sdp.is_empty() {
                return Err(PluginError::MissingSdp);
            }
            reject_application_sections(&sdp)?;
            Ok(Request::Process { type_, sdp, srtp })
        }
        "hangup" => Ok(Request::Hangup),
        "recording" => {
            let action = match raw.action.as_deref() {
                Some("start") => RecordingAction::Start,
                Some("stop") => RecordingAction::Stop,
                Some(other) => return Err(PluginError::InvalidElement(format!("action: {}", other))),
                None => return Err(PluginError::MissingElement("action")),
            };
            if !(raw.audio || raw.video || raw.peer_audio || raw.peer_video) {
                return Err(PluginError::MissingElement(
                    "one of audio, video, peer_audio, peer_video",
                ));
            }
            Ok(Request::Recording {
                action,
                audio: raw.audio,
                video: raw.video,
                peer_audio: raw.peer_audio,
                peer_video: raw.peer_video,
                filename: raw.filename,
            })
        }
        other => Err(PluginError::InvalidRequest(other.to_string())),
    }
}

fn reject_application_sections(sdp: &str) -> Result<(), PluginError> {
    if sdp.lines().any(|line| line.starts_with("m=application")) {
        return Err(PluginError::MissingSdp);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_generate_offer() {
        let body = json!({
            "request": "generate",
            "jsep": {"type": "offer", "sdp": "v=0\r\nm=audio 1 RTP/AVP 0\r\n"},
            "srtp": "sdes_mandatory",
        });
        match parse_request(&body).unwrap() {
            Request::Generate { jsep, srtp } => {
                assert_eq!(jsep.type_, "offer");
                assert_eq!(srtp, Some(SrtpRequirement::Mandatory));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_parse_rejects_application_sdp() {
        let body = json!({
            "request": "process",
            "type": "offer",
            "sdp": "v=0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
        });
        let err = parse_request(&body).unwrap_err();
        assert_eq!(err.code(), 446);
    }

    #[test]
    fn test_parse_invalid_srtp_value() {
        let body = json!({
            "request": "generate",
            "jsep": {"type": "offer", "sdp": "v=0\r\nm=audio 1 RTP/AVP 0\r\n"},
            "srtp": "nonsense",
        });
        let err = parse_request(&body).unwrap_err();
        assert_eq!(err.code(), 444);
    }

    #[test]
    fn test_parse_recording_requires_a_target() {
        let body = json!({"request": "recording", "action": "start"});
        let err = parse_request(&body).unwrap_err();
        assert_eq!(err.code(), 443);
    }

    #[test]
    fn test_parse_unknown_request() {
        let body = json!({"request": "frobnicate"});
        let err = parse_request(&body).unwrap_err();
        assert_eq!(err.code(), 442);
    }

    #[test]
    fn test_parse_hangup() {
        let body = json!({"request": "hangup"});
        assert!(matches!(parse_request(&body).unwrap(), Request::Hangup));
    }
}
