//! The plugin instance: ties the session store, gateway callbacks, and
//! config together and exposes the inherent API a host adapter would call.
//!
//! Replaces the source's process-scoped globals (`sessions`, `messages`,
//! `local_ip`, port range) with a `Plugin` struct threaded through every
//! operation as `&self`/`Arc<Self>`.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::PluginError;
use crate::gateway::GatewayCallbacks;
use crate::media::rtcp;
use crate::media::sdp::{self, MediaKind};
use crate::ports;
use crate::reaper;
use crate::relay;
use crate::request::{self, RecordingAction, Request, SrtpRequirement};
use crate::rewriter;
use crate::session::{Session, SessionStore};
use crate::srtp_manager;

const PLUGIN_NAME: &str = "nosip-bridge";

/// Acknowledgement returned synchronously from `handle_message`; the actual
/// result is delivered later via `GatewayCallbacks::push_event`, mirroring
/// how a Janus-style plugin ABI acks a request before doing the work.
#[derive(Debug, Clone, Copy)]
pub struct Ack {
    pub queued: bool,
}

struct QueuedRequest {
    handle: u64,
    transaction: String,
    body: Value,
}

pub struct Plugin {
    store: Arc<SessionStore>,
    callbacks: Arc<dyn GatewayCallbacks>,
    config: Config,
    sender: mpsc::Sender<QueuedRequest>,
    reaper_handle: tokio::task::JoinHandle<()>,
    worker_handle: tokio::task::JoinHandle<()>,
}

impl Plugin {
    pub async fn init(callbacks: Arc<dyn GatewayCallbacks>, config_path: &Path) -> Result<Plugin> {
        let config = Config::load(config_path)?;
        let store = Arc::new(SessionStore::new());

        let (sender, receiver) = mpsc::channel(256);
        let worker_handle = spawn_worker(receiver, store.clone(), callbacks.clone(), config.clone());
        let reaper_handle = reaper::spawn(store.clone());

        tracing::info!(local_ip = %config.local_ip, "nosip-bridge plugin initialized");

        Ok(Plugin {
            store,
            callbacks,
            config,
            sender,
            reaper_handle,
            worker_handle,
        })
    }

    pub fn destroy(&self) {
        self.worker_handle.abort();
        self.reaper_handle.abort();
        tracing::info!("nosip-bridge plugin destroyed");
    }

    pub fn create_session(&self, handle: u64) {
        tracing::debug!(handle, "create_session");
        self.store.create(handle);
    }

    pub fn destroy_session(&self, handle: u64) {
        tracing::debug!(handle, "destroy_session");
        self.store.destroy(handle);
    }

    pub async fn query_session(&self, handle: u64) -> Value {
        match self.store.get(handle) {
            Some(session) => {
                let state = session.state.lock().await;
                json!({
                    "handle": handle,
                    "ready": state.ready,
                    "has_audio": state.audio.has,
                    "has_video": state.video.has,
                    "require_srtp": state.require_srtp,
                })
            }
            None => json!({"handle": handle, "found": false}),
        }
    }

    /// Enqueue a request for the single worker to process, preserving FIFO
    /// order across concurrent callers. `jsep`, when present, is folded into
    /// `msg` under the `jsep` key before parsing — the host passes it as a
    /// separate parameter, but the wire schema nests it inside the request
    /// body.
    pub async fn handle_message(
        &self,
        handle: u64,
        transaction: String,
        mut msg: Value,
        jsep: Option<Value>,
    ) -> Result<Ack> {
        tracing::debug!(handle, transaction = %transaction, "handle_message");
        if let Some(jsep) = jsep {
            if let Value::Object(ref mut map) = msg {
                map.insert("jsep".to_string(), jsep);
            }
        }
        self.sender
            .send(QueuedRequest {
                handle,
                transaction,
                body: msg,
            })
            .await
            .map_err(|_| anyhow::anyhow!("request worker channel closed"))?;
        Ok(Ack { queued: true })
    }

    pub fn setup_media(&self, handle: u64) {
        tracing::debug!(handle, "setup_media");
    }

    pub fn hangup_media(&self, handle: u64) {
        tracing::debug!(handle, "hangup_media");
        self.store.destroy(handle);
    }

    pub fn incoming_rtp(&self, handle: u64, is_video: bool, buf: &[u8]) {
        if let Some(session) = self.store.get(handle) {
            crate::ingress::incoming_rtp(&session, is_video, buf);
        }
    }

    pub fn incoming_rtcp(&self, handle: u64, is_video: bool, buf: &[u8]) {
        if let Some(session) = self.store.get(handle) {
            crate::ingress::incoming_rtcp(&session, is_video, buf);
        }
    }
}

fn spawn_worker(
    mut receiver: mpsc::Receiver<QueuedRequest>,
    store: Arc<SessionStore>,
    callbacks: Arc<dyn GatewayCallbacks>,
    config: Config,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(queued) = receiver.recv().await {
            let Some(session) = store.get(queued.handle) else {
                tracing::warn!(handle = queued.handle, "request for unknown session");
                continue;
            };

            let (event, jsep) = match request::parse_request(&queued.body) {
                Ok(request) => dispatch(&session, &config, &callbacks, request).await,
                Err(err) => (error_envelope(&err), None),
            };

            callbacks.push_event(queued.handle, PLUGIN_NAME, &queued.transaction, event, jsep);
        }
    })
}

fn error_envelope(err: &PluginError) -> Value {
    json!({"nosip": "event", "error_code": err.code(), "error": err.to_string()})
}

fn success_envelope(result: Value) -> Value {
    json!({"nosip": "event", "result": result})
}

async fn dispatch(
    session: &Arc<Session>,
    config: &Config,
    callbacks: &Arc<dyn GatewayCallbacks>,
    request: Request,
) -> (Value, Option<Value>) {
    let outcome = match request {
        Request::Generate { jsep, srtp } => dispatch_generate(session, config, callbacks, jsep, srtp).await,
        Request::Process { type_, sdp, srtp } => dispatch_process(session, callbacks, type_, sdp, srtp).await,
        Request::Hangup => dispatch_hangup(session, callbacks).await,
        Request::Recording {
            action,
            audio,
            video,
            peer_audio,
            peer_video,
            filename,
        } => dispatch_recording(session, callbacks, action, audio, video, peer_audio, peer_video, filename).await,
    };

    match outcome {
        Ok((result, jsep)) => (success_envelope(result), jsep),
        Err(err) => (error_envelope(&err), None),
    }
}

fn srtp_flags(req: Option<SrtpRequirement>) -> (bool, bool) {
    match req {
        None => (false, false),
        Some(SrtpRequirement::Optional) => (true, false),
        Some(SrtpRequirement::Mandatory) => (true, true),
    }
}

async fn dispatch_generate(
    session: &Arc<Session>,
    config: &Config,
    callbacks: &Arc<dyn GatewayCallbacks>,
    jsep: request::Jsep,
    srtp: Option<SrtpRequirement>,
) -> Result<(Value, Option<Value>), PluginError> {
    let is_answer = jsep.type_ == "answer";
    let mut parsed = sdp::parse(&jsep.sdp).map_err(|e| PluginError::InvalidSdp(e.to_string()))?;

    let mut state = session.state.lock().await;

    if !is_answer {
        state.srtp_cleanup();
        let (has_local, require) = srtp_flags(srtp);
        state.has_srtp_local = has_local;
        state.require_srtp = require;
    } else {
        if state.require_srtp && !state.has_srtp_remote {
            return Err(PluginError::TooStrict("srtp mandatory offer had no remote crypto"));
        }
        state.has_srtp_local = state.has_srtp_local || state.has_srtp_remote;
    }

    for section in &parsed.media {
        state.kind_mut(section.kind).has = true;
    }

    for kind in [MediaKind::Audio, MediaKind::Video] {
        if state.kind(kind).has {
            let pair = ports::allocate_port_pair(&config.local_ip, config.rtp_range_min, config.rtp_range_max)
                .await
                .map_err(|e| PluginError::IoError(e.to_string()))?;
            let kind_state = state.kind_mut(kind);
            kind_state.local_rtp_port = pair.rtp_port;
            kind_state.local_rtcp_port = pair.rtcp_port;
            kind_state.rtp_socket = Some(Arc::new(pair.rtp_socket));
            kind_state.rtcp_socket = Some(Arc::new(pair.rtcp_socket));
        }
    }

    let text = rewriter::manipulate(&mut state, &config.local_ip, &mut parsed, is_answer)
        .map_err(|e| PluginError::InvalidSdp(e.to_string()))?;
    state.sdp = Some(parsed);

    let result = json!({"event": "generated", "type": jsep.type_, "sdp": text});

    if is_answer {
        state.ready = true;
        drop(state);
        relay::spawn(session.clone(), callbacks.clone());
    }

    Ok((result, None))
}

async fn dispatch_process(
    session: &Arc<Session>,
    callbacks: &Arc<dyn GatewayCallbacks>,
    type_: String,
    sdp_text: String,
    srtp: Option<SrtpRequirement>,
) -> Result<(Value, Option<Value>), PluginError> {
    let is_answer = type_ == "answer";
    let parsed = sdp::parse(&sdp_text).map_err(|e| PluginError::InvalidSdp(e.to_string()))?;

    let mut state = session.state.lock().await;

    if !is_answer {
        state.srtp_cleanup();
        let (has_local, _require) = srtp_flags(srtp);
        state.has_srtp_local = state.has_srtp_local || has_local;
    }

    let is_update = state.ready;
    rewriter::process(&mut state, &parsed, is_answer, is_update)
        .map_err(|e| PluginError::InvalidSdp(e.to_string()))?;

    if !is_update && !rewriter::has_negotiated_media(&state) {
        return Err(PluginError::InvalidSdp("no audio or video negotiated".to_string()));
    }

    if is_answer && state.require_srtp && !state.has_srtp_remote {
        return Err(PluginError::TooStrict("srtp mandatory offer answered in plain rtp"));
    }

    state.sdp = Some(parsed);

    let result = json!({
        "event": "processed",
        "srtp": state.has_srtp_remote,
        "type": type_,
        "sdp": sdp_text,
    });
    let jsep_mirror = json!({"type": type_, "sdp": sdp_text});

    if is_answer && !is_update {
        state.ready = true;
        drop(state);
        relay::spawn(session.clone(), callbacks.clone());
    }

    Ok((result, Some(jsep_mirror)))
}

async fn dispatch_hangup(
    session: &Arc<Session>,
    callbacks: &Arc<dyn GatewayCallbacks>,
) -> Result<(Value, Option<Value>), PluginError> {
    if !session.hanging_up.swap(true, Ordering::SeqCst) {
        callbacks.close_pc(session.handle);
        session.mark_destroyed();
    }
    Ok((json!({"event": "hangingup"}), None))
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_recording(
    session: &Arc<Session>,
    callbacks: &Arc<dyn GatewayCallbacks>,
    action: RecordingAction,
    audio: bool,
    video: bool,
    peer_audio: bool,
    peer_video: bool,
    filename: Option<String>,
) -> Result<(Value, Option<Value>), PluginError> {
    use crate::media::recording::{recorder_filename, Kind, MediaRecorder, Role};

    let dir = Path::new(".");
    let now_unix = chrono::Utc::now().timestamp();
    let mut recorders = session.recorders.lock().await;

    match action {
        RecordingAction::Start => {
            let targets: [(bool, Role, Kind); 4] = [
                (audio, Role::Local, Kind::Audio),
                (video, Role::Local, Kind::Video),
                (peer_audio, Role::Peer, Kind::Audio),
                (peer_video, Role::Peer, Kind::Video),
            ];
            for (enabled, role, kind) in targets {
                if !enabled {
                    continue;
                }
                let name = recorder_filename(session.handle, now_unix, role, kind, filename.as_deref());
                let recorder = MediaRecorder::open(dir, &name)
                    .map_err(|e| PluginError::RecordingError(e.to_string()))?;
                match (role, kind) {
                    (Role::Local, Kind::Audio) => recorders.local_audio = Some(recorder),
                    (Role::Local, Kind::Video) => recorders.local_video = Some(recorder),
                    (Role::Peer, Kind::Audio) => recorders.peer_audio = Some(recorder),
                    (Role::Peer, Kind::Video) => recorders.peer_video = Some(recorder),
                }
            }

            if video || peer_video {
                let state = session.state.lock().await;
                let media_ssrc = state.video.ssrc.load(Ordering::Relaxed);
                drop(state);
                let pli = rtcp::build_pli(1, media_ssrc);
                callbacks.relay_rtcp(session.handle, true, &pli);
            }
        }
        RecordingAction::Stop => {
            if audio {
                recorders.local_audio = None;
            }
            if video {
                recorders.local_video = None;
            }
            if peer_audio {
                recorders.peer_audio = None;
            }
            if peer_video {
                recorders.peer_video = None;
            }
        }
    }

    Ok((json!({"event": "recordingupdated"}), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeCallbacks {
        closed: StdMutex<Vec<u64>>,
        pushed: StdMutex<Vec<Value>>,
        rtcp: StdMutex<Vec<Vec<u8>>>,
    }

    impl FakeCallbacks {
        fn new() -> Self {
            FakeCallbacks {
                closed: StdMutex::new(Vec::new()),
                pushed: StdMutex::new(Vec::new()),
                rtcp: StdMutex::new(Vec::new()),
            }
        }
    }

    impl GatewayCallbacks for FakeCallbacks {
        fn notify_event(&self, _plugin: &str, _handle: u64, _json: Value) {}
        fn push_event(
            &self,
            _handle: u64,
            _plugin: &str,
            _transaction: &str,
            event_json: Value,
            _jsep_json: Option<Value>,
        ) {
            self.pushed.lock().unwrap().push(event_json);
        }
        fn relay_rtp(&self, _handle: u64, _is_video: bool, _buf: &[u8]) {}
        fn relay_rtcp(&self, _handle: u64, _is_video: bool, buf: &[u8]) {
            self.rtcp.lock().unwrap().push(buf.to_vec());
        }
        fn close_pc(&self, handle: u64) {
            self.closed.lock().unwrap().push(handle);
        }
        fn events_is_enabled(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_dispatch_generate_offer_audio_only() {
        let session = Session::new(1);
        let config = Config {
            local_ip: "127.0.0.1".to_string(),
            rtp_range_min: 31000,
            rtp_range_max: 31100,
            events: false,
        };
        let callbacks: Arc<dyn GatewayCallbacks> = Arc::new(FakeCallbacks::new());
        let jsep = request::Jsep {
            type_: "offer".to_string(),
            sdp: "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\nm=audio 1 RTP/AVP 0\r\n".to_string(),
        };

        let (result, jsep_out) = dispatch_generate(&session, &config, &callbacks, jsep, Some(SrtpRequirement::Optional))
            .await
            .unwrap();

        assert_eq!(result["event"], "generated");
        assert!(result["sdp"].as_str().unwrap().contains("RTP/AVP"));
        assert!(jsep_out.is_none());

        let state = session.state.lock().await;
        assert!(state.audio.has);
        assert!(state.audio.local_rtp_port >= 31000);
    }

    #[tokio::test]
    async fn test_dispatch_hangup_closes_pc_once() {
        let session = Session::new(1);
        let fake = Arc::new(FakeCallbacks::new());
        let callbacks: Arc<dyn GatewayCallbacks> = fake.clone();
        dispatch_hangup(&session, &callbacks).await.unwrap();
        dispatch_hangup(&session, &callbacks).await.unwrap();
        assert_eq!(fake.closed.lock().unwrap().as_slice(), &[1]);
    }

    #[tokio::test]
    async fn test_dispatch_recording_requires_open_then_close() {
        let session = Session::new(1);
        let callbacks: Arc<dyn GatewayCallbacks> = Arc::new(FakeCallbacks::new());

        let (result, _) = dispatch_recording(
            &session,
            &callbacks,
            RecordingAction::Start,
            true,
            false,
            false,
            false,
            Some(format!("nosip-test-plugin-{}", std::process::id())),
        )
        .await
        .unwrap();
        assert_eq!(result["event"], "recordingupdated");
        assert!(session.recorders.lock().await.local_audio.is_some());

        dispatch_recording(&session, &callbacks, RecordingAction::Stop, true, false, false, false, None)
            .await
            .unwrap();
        assert!(session.recorders.lock().await.local_audio.is_none());

        std::fs::remove_file(format!("nosip-test-plugin-{}-local-audio", std::process::id())).ok();
    }
}
