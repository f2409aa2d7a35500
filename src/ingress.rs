//! Synchronous ingress shims: the host gateway calls these directly from
//! its own ingress thread(s) when WebRTC-side RTP/RTCP arrives. They must
//! never `.await` — socket sends use `try_send`, and the SRTP context and
//! SSRC latch they touch are read through a plain (non-async) mutex/atomic
//! shared with the relay loop.

use std::sync::atomic::Ordering;

use crate::media::rtcp;
use crate::media::rtp;
use crate::media::sdp::MediaKind;
use crate::media::srtp;
use crate::session::Session;

/// Called by the host when WebRTC-side RTP for `handle` arrives. Transforms
/// and forwards it to the legacy peer's RTP socket.
pub fn incoming_rtp(session: &Session, is_video: bool, buf: &[u8]) {
    let kind = if is_video { MediaKind::Video } else { MediaKind::Audio };
    let kind_state = match read_kind_state(session, kind) {
        Some(ks) => ks,
        None => return,
    };

    if !kind_state.send {
        return;
    }

    let Some(socket) = kind_state.rtp_socket.clone() else {
        return;
    };

    if let Ok(decoded) = rtp::decode(buf) {
        let current = kind_state.ssrc.load(Ordering::Relaxed);
        if current == 0 {
            kind_state.ssrc.store(decoded.ssrc, Ordering::Relaxed);
        }
    }

    let has_srtp_local = kind_state.srtp.lock().expect("srtp mutex poisoned").is_some();

    let outgoing: Vec<u8> = if has_srtp_local {
        let mut guard = kind_state.srtp.lock().expect("srtp mutex poisoned");
        match guard.as_mut().and_then(|ctx| srtp::protect(ctx, buf).ok()) {
            Some(protected) => protected,
            None => {
                tracing::warn!(handle = session.handle, "srtp protect failed on ingress rtp, dropping");
                return;
            }
        }
    } else {
        buf.to_vec()
    };

    if let Err(err) = socket.try_send(&outgoing) {
        tracing::warn!(handle = session.handle, error = %err, "udp send failed on ingress rtp");
    }
}

/// Called by the host when WebRTC-side RTCP for `handle` arrives.
pub fn incoming_rtcp(session: &Session, is_video: bool, buf: &[u8]) {
    let kind = if is_video { MediaKind::Video } else { MediaKind::Audio };
    let kind_state = match read_kind_state(session, kind) {
        Some(ks) => ks,
        None => return,
    };

    let Some(socket) = kind_state.rtcp_socket.clone() else {
        return;
    };

    let mut rewritten = buf.to_vec();
    rtcp::rewrite_ssrc(
        &mut rewritten,
        kind_state.ssrc.load(Ordering::Relaxed),
        kind_state.ssrc_peer.load(Ordering::Relaxed),
    );

    let has_srtp_local = kind_state.srtp.lock().expect("srtp mutex poisoned").is_some();

    let outgoing: Vec<u8> = if has_srtp_local {
        let mut guard = kind_state.srtp.lock().expect("srtp mutex poisoned");
        match guard.as_mut().and_then(|ctx| srtp::protect_rtcp(ctx, &rewritten).ok()) {
            Some(protected) => protected,
            None => {
                tracing::warn!(handle = session.handle, "srtp protect failed on ingress rtcp, dropping");
                return;
            }
        }
    } else {
        rewritten
    };

    if let Err(err) = socket.try_send(&outgoing) {
        tracing::warn!(handle = session.handle, error = %err, "udp send failed on ingress rtcp");
    }
}

/// Snapshot the fields this shim needs without holding the session lock
/// across the packet transform.
///
/// Media-state fields the relay loop and ingress shims read (sockets, SSRC
/// atomics, the SRTP mutex) are frozen once setup completes and only ever
/// mutated through the atomics/mutex themselves, so a `try_lock` that loses
/// a brief race against the request handler and drops the packet is an
/// acceptable, self-healing outcome for this best-effort path — the next
/// packet retries.
fn read_kind_state(session: &Session, kind: MediaKind) -> Option<ShimView> {
    let state = session.state.try_lock().ok()?;
    let ks = state.kind(kind);
    Some(ShimView {
        send: ks.send,
        rtp_socket: ks.rtp_socket.clone(),
        rtcp_socket: ks.rtcp_socket.clone(),
        ssrc: ks.ssrc.clone(),
        ssrc_peer: ks.ssrc_peer.clone(),
        srtp: ks.srtp.clone(),
    })
}

struct ShimView {
    send: bool,
    rtp_socket: Option<std::sync::Arc<tokio::net::UdpSocket>>,
    rtcp_socket: Option<std::sync::Arc<tokio::net::UdpSocket>>,
    ssrc: std::sync::Arc<std::sync::atomic::AtomicU32>,
    ssrc_peer: std::sync::Arc<std::sync::atomic::AtomicU32>,
    srtp: std::sync::Arc<std::sync::Mutex<Option<srtp::SrtpContext>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[tokio::test]
    async fn test_incoming_rtp_respects_send_gate() {
        let session = Session::new(1);
        {
            let mut state = session.state.lock().await;
            state.audio.send = false;
        }
        // No socket bound; with send=false this must return without panicking
        // regardless, since the gate check happens first.
        incoming_rtp(&session, false, &[0x80, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
    }
}
