//! Media recording sinks.
//!
//! Each active session may record up to four independent streams —
//! {local,peer} × {audio,video} — to disk. The plugin never transcodes: a
//! recorder just appends length-prefixed RTP frames (payload type,
//! timestamp, raw payload bytes) to a file, the same opaque-relay posture
//! `media/rtp.rs` and `media/srtp.rs` take toward the media itself. The
//! actual codec framing of the recorded file is left to whatever reads it
//! back — out of scope here (see crate-level non-goals).

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Which side of the bridge a recorder captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The WebRTC endpoint's media, after SRTP unprotect.
    Local,
    /// The legacy RTP/AVP or RTP/SAVP peer's media, after SRTP unprotect.
    Peer,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Local => "local",
            Role::Peer => "peer",
        }
    }
}

/// Which media kind a recorder captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Audio,
    Video,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Audio => "audio",
            Kind::Video => "video",
        }
    }
}

/// Build the filename for a recorder.
///
/// If the caller supplied an explicit base name, the file is
/// `{base}-{role}-{kind}`. Otherwise it defaults to
/// `nosip-{session}-{now}-{role}-{kind}`, where `now` disambiguates
/// recordings of the same session started at different times.
pub fn recorder_filename(
    session_handle: u64,
    now_unix: i64,
    role: Role,
    kind: Kind,
    base: Option<&str>,
) -> String {
    match base {
        Some(base) => format!("{}-{}-{}", base, role.as_str(), kind.as_str()),
        None => format!(
            "nosip-{}-{}-{}-{}",
            session_handle,
            now_unix,
            role.as_str(),
            kind.as_str()
        ),
    }
}

/// A single recording sink for one (role, kind) pair.
///
/// Frames are written under a plain `std::sync::Mutex` rather than the
/// session's async `rec_mutex` — `save_frame` is called from the relay
/// loop's hot path and must never await, so the lock here is held only
/// across a synchronous `write_all`.
pub struct MediaRecorder {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    frames_written: AtomicU64,
}

impl MediaRecorder {
    /// Open (creating or truncating) a recording file at `dir/filename`.
    pub fn open(dir: &Path, filename: &str) -> Result<Self> {
        let path = dir.join(filename);
        let file = File::create(&path)
            .with_context(|| format!("failed to open recording file {}", path.display()))?;

        tracing::info!(path = %path.display(), "recorder opened");

        Ok(MediaRecorder {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            frames_written: AtomicU64::new(0),
        })
    }

    /// Append one RTP frame: `[timestamp:u32][payload_type:u8][len:u32][payload]`,
    /// all integers big-endian.
    pub fn save_frame(&self, payload_type: u8, timestamp: u32, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().expect("recorder writer mutex poisoned");
        writer
            .write_all(&timestamp.to_be_bytes())
            .and_then(|_| writer.write_all(&[payload_type]))
            .and_then(|_| writer.write_all(&(payload.len() as u32).to_be_bytes()))
            .and_then(|_| writer.write_all(payload))
            .with_context(|| format!("failed to write frame to {}", self.path.display()))?;

        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Flush buffered writes to disk. Called on close so a stopped
    /// recording's tail isn't lost to buffering.
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().expect("recorder writer mutex poisoned");
        writer
            .flush()
            .with_context(|| format!("failed to flush recording file {}", self.path.display()))?;
        tracing::info!(
            path = %self.path.display(),
            frames = self.frames_written.load(Ordering::Relaxed),
            "recorder closed"
        );
        Ok(())
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %err, "error flushing recorder on drop");
        }
    }
}

/// The four optional recording sinks for one session, guarded together by
/// the session's `rec_mutex` (see `session.rs`) so opening one recorder
/// never races a concurrent `save_frame` on another.
#[derive(Default)]
pub struct Recorders {
    pub local_audio: Option<MediaRecorder>,
    pub local_video: Option<MediaRecorder>,
    pub peer_audio: Option<MediaRecorder>,
    pub peer_video: Option<MediaRecorder>,
}

impl Recorders {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no recorder is currently open.
    pub fn is_empty(&self) -> bool {
        self.local_audio.is_none()
            && self.local_video.is_none()
            && self.peer_audio.is_none()
            && self.peer_video.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_filename_default() {
        let name = recorder_filename(42, 1_700_000_000, Role::Peer, Kind::Video, None);
        assert_eq!(name, "nosip-42-1700000000-peer-video");
    }

    #[test]
    fn test_recorder_filename_explicit_base() {
        let name = recorder_filename(42, 0, Role::Local, Kind::Audio, Some("call-7"));
        assert_eq!(name, "call-7-local-audio");
    }

    #[test]
    fn test_save_and_read_frame_roundtrip() {
        let dir = std::env::temp_dir();
        let filename = format!("nosip-test-{}.rec", std::process::id());
        let rec = MediaRecorder::open(&dir, &filename).unwrap();

        rec.save_frame(96, 1000, &[1, 2, 3, 4]).unwrap();
        rec.save_frame(96, 1160, &[5, 6]).unwrap();
        assert_eq!(rec.frames_written(), 2);
        rec.close().unwrap();

        let bytes = std::fs::read(dir.join(&filename)).unwrap();
        // frame 1: ts(4) + pt(1) + len(4) + payload(4) = 13
        assert_eq!(&bytes[0..4], &1000u32.to_be_bytes());
        assert_eq!(bytes[4], 96);
        assert_eq!(&bytes[5..9], &4u32.to_be_bytes());
        assert_eq!(&bytes[9..13], &[1, 2, 3, 4]);

        std::fs::remove_file(dir.join(&filename)).ok();
    }

    #[test]
    fn test_recorders_is_empty() {
        let mut recorders = Recorders::new();
        assert!(recorders.is_empty());
        let dir = std::env::temp_dir();
        recorders.local_audio =
            Some(MediaRecorder::open(&dir, &format!("nosip-test-empty-{}.rec", std::process::id())).unwrap());
        assert!(!recorders.is_empty());
    }
}
