//! Session state and the process-wide session store.
//!
//! A `Session` is shared by `Arc` across the request handler, the relay
//! loop, and the host's ingress shims. Fields set once at setup (sockets,
//! ports) are read without locking; fields that genuinely change after
//! setup (SDP, SRTP contexts, SSRC latches, the `updated`/`remote_ip` pair)
//! live behind `tokio::sync::Mutex` or a plain `std::sync::Mutex` when
//! they must be touched from the synchronous ingress shims.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::media::recording::Recorders;
use crate::media::sdp::{MediaKind, ParsedSdp};
use crate::media::srtp::SrtpContext;
use crate::media::rtp::SwitchingContext;

/// Per-kind media-bridge state (the `audio`/`video` halves of `MediaState`).
pub struct KindState {
    pub has: bool,
    pub rtp_socket: Option<Arc<UdpSocket>>,
    pub rtcp_socket: Option<Arc<UdpSocket>>,
    pub local_rtp_port: u16,
    pub local_rtcp_port: u16,
    pub remote_rtp_port: u16,
    pub remote_rtcp_port: u16,
    /// 0 means "not yet latched". Shared with the ingress shim, which may
    /// latch it from a different OS thread while the relay loop is running.
    pub ssrc: Arc<AtomicU32>,
    pub ssrc_peer: Arc<AtomicU32>,
    pub pt: Option<u8>,
    /// Direction gate: false if the remote SDP said sendonly/inactive.
    pub send: bool,
    /// The one `SrtpContext` serving both directions for this kind, same as
    /// the teacher's media sessions share a single context between their
    /// send and recv loops. Populated once local and/or remote keying
    /// material is known; see `crate::srtp_manager`.
    pub srtp: Arc<StdMutex<Option<SrtpContext>>>,
    pub local_material: Option<crate::media::srtp::SrtpKeyingMaterial>,
    pub remote_material: Option<crate::media::srtp::SrtpKeyingMaterial>,
    pub rtp_context: SwitchingContext,
}

impl Default for KindState {
    fn default() -> Self {
        KindState {
            has: false,
            rtp_socket: None,
            rtcp_socket: None,
            local_rtp_port: 0,
            local_rtcp_port: 0,
            remote_rtp_port: 0,
            remote_rtcp_port: 0,
            ssrc: Arc::new(AtomicU32::new(0)),
            ssrc_peer: Arc::new(AtomicU32::new(0)),
            pt: None,
            send: true,
            srtp: Arc::new(StdMutex::new(None)),
            local_material: None,
            remote_material: None,
            rtp_context: SwitchingContext::new(),
        }
    }
}

impl KindState {
    /// Reset to a fresh state, closing any open sockets and SRTP contexts.
    /// Used for idempotent re-entry into port allocation and SRTP cleanup.
    pub fn reset(&mut self) {
        *self = KindState::default();
    }

    pub fn remote_addr(&self, remote_ip: &str, rtcp: bool) -> Option<SocketAddr> {
        let port = if rtcp { self.remote_rtcp_port } else { self.remote_rtp_port };
        if port == 0 {
            return None;
        }
        format!("{}:{}", remote_ip, port).parse().ok()
    }
}

/// The mutable half of a session, guarded by one `tokio::sync::Mutex` since
/// its fields are only ever touched by the request handler and the relay
/// loop (never from the ingress shims' synchronous call stack).
pub struct SessionState {
    pub sdp: Option<ParsedSdp>,
    pub audio: KindState,
    pub video: KindState,
    pub remote_ip: Option<String>,
    pub require_srtp: bool,
    pub has_srtp_local: bool,
    pub has_srtp_remote: bool,
    pub ready: bool,
    pub updated: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            sdp: None,
            audio: KindState::default(),
            video: KindState::default(),
            remote_ip: None,
            require_srtp: false,
            has_srtp_local: false,
            has_srtp_remote: false,
            ready: false,
            updated: false,
        }
    }
}

impl SessionState {
    pub fn kind(&self, kind: MediaKind) -> &KindState {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub fn kind_mut(&mut self, kind: MediaKind) -> &mut KindState {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    /// Undo everything the SRTP context manager installed, for both kinds.
    /// Safe to call on a partially-initialized session.
    pub fn srtp_cleanup(&mut self) {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let state = self.kind_mut(kind);
            *state.srtp.lock().expect("srtp mutex poisoned") = None;
            state.local_material = None;
            state.remote_material = None;
        }
        self.require_srtp = false;
        self.has_srtp_local = false;
        self.has_srtp_remote = false;
    }
}

/// One active or recently-destroyed bridging session.
pub struct Session {
    pub handle: u64,
    pub state: AsyncMutex<SessionState>,
    pub recorders: AsyncMutex<Recorders>,
    pub destroyed_at: StdMutex<Option<Instant>>,
    pub hanging_up: AtomicBool,
    pub wake: Notify,
}

impl Session {
    pub fn new(handle: u64) -> Arc<Session> {
        Arc::new(Session {
            handle,
            state: AsyncMutex::new(SessionState::default()),
            recorders: AsyncMutex::new(Recorders::new()),
            destroyed_at: StdMutex::new(None),
            hanging_up: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed_at.lock().expect("destroyed_at mutex poisoned").is_some()
    }

    /// Mark this session destroyed and wake the relay loop so it observes
    /// the flag within one select tick.
    pub fn mark_destroyed(&self) {
        let mut destroyed_at = self.destroyed_at.lock().expect("destroyed_at mutex poisoned");
        if destroyed_at.is_none() {
            *destroyed_at = Some(Instant::now());
        }
        drop(destroyed_at);
        self.hanging_up.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn destroyed_age(&self) -> Option<Duration> {
        self.destroyed_at
            .lock()
            .expect("destroyed_at mutex poisoned")
            .map(|at| at.elapsed())
    }
}

/// Process-wide mapping from opaque host handle to session, with a
/// deferred-reclamation list so the relay loop and ingress shims can race
/// against `destroy_session` without ever touching freed memory: they hold
/// their own `Arc<Session>` clone, and the destroyed list holds one too
/// until the reaper drops it after the grace period.
pub struct SessionStore {
    live: StdMutex<HashMap<u64, Arc<Session>>>,
    destroyed: StdMutex<Vec<Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            live: StdMutex::new(HashMap::new()),
            destroyed: StdMutex::new(Vec::new()),
        }
    }

    pub fn create(&self, handle: u64) -> Arc<Session> {
        let session = Session::new(handle);
        self.live
            .lock()
            .expect("session store mutex poisoned")
            .insert(handle, session.clone());
        session
    }

    pub fn get(&self, handle: u64) -> Option<Arc<Session>> {
        self.live.lock().expect("session store mutex poisoned").get(&handle).cloned()
    }

    /// Remove from the live map, mark destroyed, and move into the
    /// deferred-reclamation list. Returns the session if it was live.
    pub fn destroy(&self, handle: u64) -> Option<Arc<Session>> {
        let session = self.live.lock().expect("session store mutex poisoned").remove(&handle)?;
        session.mark_destroyed();
        self.destroyed.lock().expect("destroyed list mutex poisoned").push(session.clone());
        Some(session)
    }

    /// Sweep the destroyed list, dropping every entry older than `grace`.
    /// Returns the number of sessions freed.
    pub fn reap(&self, grace: Duration) -> usize {
        let mut destroyed = self.destroyed.lock().expect("destroyed list mutex poisoned");
        let before = destroyed.len();
        destroyed.retain(|session| session.destroyed_age().map(|age| age < grace).unwrap_or(true));
        before - destroyed.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().expect("session store mutex poisoned").len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new();
        let session = store.create(1);
        assert_eq!(session.handle, 1);
        assert!(store.get(1).is_some());
        assert!(store.get(2).is_none());
    }

    #[test]
    fn test_destroy_removes_from_live_map() {
        let store = SessionStore::new();
        store.create(1);
        let destroyed = store.destroy(1).unwrap();
        assert!(destroyed.is_destroyed());
        assert!(store.get(1).is_none());
    }

    #[test]
    fn test_reap_respects_grace_period() {
        let store = SessionStore::new();
        store.create(1);
        store.destroy(1);
        assert_eq!(store.reap(Duration::from_secs(5)), 0);
        assert_eq!(store.reap(Duration::from_secs(0)), 1);
    }

    #[test]
    fn test_mark_destroyed_is_idempotent() {
        let session = Session::new(1);
        session.mark_destroyed();
        let first = session.destroyed_age();
        std::thread::sleep(Duration::from_millis(5));
        session.mark_destroyed();
        let second = session.destroyed_age();
        assert!(second.unwrap() >= first.unwrap());
    }

    #[tokio::test]
    async fn test_srtp_cleanup_resets_flags() {
        let session = Session::new(1);
        {
            let mut state = session.state.lock().await;
            state.require_srtp = true;
            state.has_srtp_local = true;
            state.has_srtp_remote = true;
        }
        let mut state = session.state.lock().await;
        state.srtp_cleanup();
        assert!(!state.require_srtp);
        assert!(!state.has_srtp_local);
        assert!(!state.has_srtp_remote);
    }
}
