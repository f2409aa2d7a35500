//! Protocol-facing error codes.
//!
//! Everything else in this crate propagates errors as `anyhow::Error` — this
//! is the one place a `thiserror` enum earns its keep, because these codes
//! cross the plugin boundary as part of the wire contract (`{error_code,
//! error}`) and callers need to match on them, not just display them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown error")]
    Unknown,
    #[error("no message")]
    NoMessage,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("missing element: {0}")]
    MissingElement(&'static str),
    #[error("invalid element: {0}")]
    InvalidElement(String),
    #[error("wrong state: {0}")]
    WrongState(&'static str),
    #[error("missing SDP")]
    MissingSdp,
    #[error("invalid SDP: {0}")]
    InvalidSdp(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("recording error: {0}")]
    RecordingError(String),
    #[error("too strict: {0}")]
    TooStrict(&'static str),
}

impl PluginError {
    pub fn code(&self) -> u16 {
        match self {
            PluginError::Unknown => 499,
            PluginError::NoMessage => 440,
            PluginError::InvalidJson(_) => 441,
            PluginError::InvalidRequest(_) => 442,
            PluginError::MissingElement(_) => 443,
            PluginError::InvalidElement(_) => 444,
            PluginError::WrongState(_) => 445,
            PluginError::MissingSdp => 446,
            PluginError::InvalidSdp(_) => 447,
            PluginError::IoError(_) => 448,
            PluginError::RecordingError(_) => 449,
            PluginError::TooStrict(_) => 450,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_wire_contract() {
        assert_eq!(PluginError::Unknown.code(), 499);
        assert_eq!(PluginError::NoMessage.code(), 440);
        assert_eq!(PluginError::InvalidJson("x".into()).code(), 441);
        assert_eq!(PluginError::InvalidRequest("x".into()).code(), 442);
        assert_eq!(PluginError::MissingElement("jsep").code(), 443);
        assert_eq!(PluginError::InvalidElement("x".into()).code(), 444);
        assert_eq!(PluginError::WrongState("x").code(), 445);
        assert_eq!(PluginError::MissingSdp.code(), 446);
        assert_eq!(PluginError::InvalidSdp("x".into()).code(), 447);
        assert_eq!(PluginError::IoError("x".into()).code(), 448);
        assert_eq!(PluginError::RecordingError("x".into()).code(), 449);
        assert_eq!(PluginError::TooStrict("x").code(), 450);
    }
}
