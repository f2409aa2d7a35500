//! The per-session relay loop: services peer→WebRTC media by multiplexing
//! up to four UDP sockets plus a wakeup notifier in one `tokio::select!`,
//! the idiomatic re-expression of a single-threaded poll(2) loop.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;

use crate::gateway::GatewayCallbacks;
use crate::media::rtcp;
use crate::media::rtp;
use crate::media::sdp::MediaKind;
use crate::media::srtp;
use crate::session::Session;

const RECV_BUF_SIZE: usize = 2048;
const INTERVAL: Duration = Duration::from_secs(1);

async fn recv_from_opt(socket: Option<&UdpSocket>, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(s) => s.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

/// Resolve `host` to a single `SocketAddr` for `port`, numeric first, then
/// via `tokio::net::lookup_host`.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    addrs
        .next()
        .ok_or_else(|| anyhow::anyhow!("no address found for host {}", host))
}

/// Connect every open socket for a kind to its negotiated remote endpoint.
async fn connect_kind_sockets(session: &Session, kind: MediaKind, remote_ip: &str) -> Result<()> {
    let (rtp_socket, rtcp_socket, rtp_port, rtcp_port) = {
        let state = session.state.lock().await;
        let ks = state.kind(kind);
        (
            ks.rtp_socket.clone(),
            ks.rtcp_socket.clone(),
            ks.remote_rtp_port,
            ks.remote_rtcp_port,
        )
    };

    if let Some(socket) = &rtp_socket {
        if rtp_port != 0 {
            let addr = resolve(remote_ip, rtp_port).await?;
            socket.connect(addr).await?;
        }
    }
    if let Some(socket) = &rtcp_socket {
        if rtcp_port != 0 {
            let addr = resolve(remote_ip, rtcp_port).await?;
            socket.connect(addr).await?;
        }
    }
    Ok(())
}

/// Spawn the relay loop task for a session that just became `ready`.
pub fn spawn(session: Arc<Session>, callbacks: Arc<dyn GatewayCallbacks>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = run(session.clone(), callbacks).await {
            tracing::error!(handle = session.handle, error = %err, "relay loop exited with error");
        }
    })
}

async fn run(session: Arc<Session>, callbacks: Arc<dyn GatewayCallbacks>) -> Result<()> {
    let remote_ip = {
        let state = session.state.lock().await;
        state.remote_ip.clone()
    }
    .ok_or_else(|| anyhow::anyhow!("relay loop started without a remote_ip"))?;

    for kind in [MediaKind::Audio, MediaKind::Video] {
        connect_kind_sockets(&session, kind, &remote_ip).await?;
    }

    let mut interval = tokio::time::interval(INTERVAL);

    let mut audio_rtp_buf = [0u8; RECV_BUF_SIZE];
    let mut audio_rtcp_buf = [0u8; RECV_BUF_SIZE];
    let mut video_rtp_buf = [0u8; RECV_BUF_SIZE];
    let mut video_rtcp_buf = [0u8; RECV_BUF_SIZE];

    tracing::info!(handle = session.handle, "relay loop started");

    loop {
        if session.is_destroyed() {
            break;
        }

        let (audio_rtp, audio_rtcp, video_rtp, video_rtcp) = {
            let state = session.state.lock().await;
            (
                state.audio.rtp_socket.clone(),
                state.audio.rtcp_socket.clone(),
                state.video.rtp_socket.clone(),
                state.video.rtcp_socket.clone(),
            )
        };

        tokio::select! {
            res = recv_from_opt(audio_rtp.as_deref(), &mut audio_rtp_buf) => {
                handle_socket_result(&session, &callbacks, MediaKind::Audio, false, res, &audio_rtp_buf).await;
            }
            res = recv_from_opt(audio_rtcp.as_deref(), &mut audio_rtcp_buf) => {
                handle_socket_result(&session, &callbacks, MediaKind::Audio, true, res, &audio_rtcp_buf).await;
            }
            res = recv_from_opt(video_rtp.as_deref(), &mut video_rtp_buf) => {
                handle_socket_result(&session, &callbacks, MediaKind::Video, false, res, &video_rtp_buf).await;
            }
            res = recv_from_opt(video_rtcp.as_deref(), &mut video_rtcp_buf) => {
                handle_socket_result(&session, &callbacks, MediaKind::Video, true, res, &video_rtcp_buf).await;
            }
            _ = session.wake.notified() => {
                let updated = {
                    let mut state = session.state.lock().await;
                    let was_updated = state.updated;
                    state.updated = false;
                    was_updated
                };
                if updated {
                    let remote_ip = {
                        let state = session.state.lock().await;
                        state.remote_ip.clone()
                    };
                    if let Some(remote_ip) = remote_ip {
                        for kind in [MediaKind::Audio, MediaKind::Video] {
                            if let Err(err) = connect_kind_sockets(&session, kind, &remote_ip).await {
                                tracing::warn!(handle = session.handle, error = %err, "failed to reconnect sockets after update");
                            }
                        }
                    }
                }
            }
            _ = interval.tick() => {
                // periodic wakeup to re-check destroyed/hanging_up even
                // absent socket or wake activity
            }
        }

        if session.hanging_up.load(Ordering::SeqCst) && session.is_destroyed() {
            break;
        }
    }

    {
        let mut state = session.state.lock().await;
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let ks = state.kind_mut(kind);
            ks.rtp_socket = None;
            ks.rtcp_socket = None;
            crate::srtp_manager::cleanup(ks);
        }
    }

    tracing::info!(handle = session.handle, "relay loop exited, sockets closed");
    Ok(())
}

/// One socket's `recv_from` resolved this select iteration: classify the
/// result and, on success, run the inbound RTP/RTCP pipeline.
async fn handle_socket_result(
    session: &Arc<Session>,
    callbacks: &Arc<dyn GatewayCallbacks>,
    kind: MediaKind,
    is_rtcp: bool,
    res: std::io::Result<(usize, SocketAddr)>,
    buf: &[u8],
) {
    let (len, _from) = match res {
        Ok(v) => v,
        Err(err) => {
            let refused = err.kind() == std::io::ErrorKind::ConnectionRefused;
            if refused && is_rtcp {
                tracing::debug!(handle = session.handle, ?kind, "ECONNREFUSED on rtcp socket, closing it");
                let mut state = session.state.lock().await;
                state.kind_mut(kind).rtcp_socket = None;
            } else {
                tracing::error!(handle = session.handle, ?kind, error = %err, "session-fatal socket error");
                callbacks.close_pc(session.handle);
                session.mark_destroyed();
            }
            return;
        }
    };

    let data = &buf[..len];
    let is_video = kind == MediaKind::Video;

    if is_rtcp {
        handle_incoming_rtcp(session, callbacks, kind, is_video, data).await;
    } else {
        handle_incoming_rtp(session, callbacks, kind, is_video, data).await;
    }
}

async fn handle_incoming_rtp(
    session: &Arc<Session>,
    callbacks: &Arc<dyn GatewayCallbacks>,
    kind: MediaKind,
    is_video: bool,
    data: &[u8],
) {
    let has_srtp_remote = session.state.lock().await.has_srtp_remote;

    let rtp_bytes: Vec<u8> = if has_srtp_remote {
        let srtp_arc = session.state.lock().await.kind(kind).srtp.clone();
        let mut guard = srtp_arc.lock().expect("srtp mutex poisoned");
        match guard.as_mut() {
            Some(ctx) => match srtp::unprotect(ctx, data) {
                Ok(plain) => plain,
                Err(err) => {
                    tracing::debug!(handle = session.handle, ?kind, error = %err, "dropping undecryptable rtp packet");
                    return;
                }
            },
            None => return,
        }
    } else {
        data.to_vec()
    };

    let decoded = match rtp::decode(&rtp_bytes) {
        Ok(pkt) => pkt,
        Err(err) => {
            tracing::debug!(handle = session.handle, ?kind, error = %err, "dropping malformed rtp packet");
            return;
        }
    };

    let mut state = session.state.lock().await;
    let kind_state = state.kind_mut(kind);

    let peer_ssrc = kind_state.ssrc_peer.load(Ordering::Relaxed);
    if peer_ssrc != decoded.ssrc {
        kind_state.ssrc_peer.store(decoded.ssrc, Ordering::Relaxed);
    }

    let (out_seq, out_ts) = kind_state.rtp_context.remap(decoded.sequence_number, decoded.timestamp);
    let mut outgoing = rtp_bytes.clone();
    rtp::rewrite_seq_ts(&mut outgoing, out_seq, out_ts);
    let payload_type = decoded.payload_type;
    let payload = decoded.payload.clone();
    drop(state);

    let recorders = session.recorders.lock().await;
    if let Some(rec) = if is_video { &recorders.peer_video } else { &recorders.peer_audio } {
        if let Err(err) = rec.save_frame(payload_type, out_ts, &payload) {
            tracing::warn!(handle = session.handle, error = %err, "failed to write recorder frame");
        }
    }
    drop(recorders);

    callbacks.relay_rtp(session.handle, is_video, &outgoing);
}

async fn handle_incoming_rtcp(
    session: &Arc<Session>,
    callbacks: &Arc<dyn GatewayCallbacks>,
    kind: MediaKind,
    is_video: bool,
    data: &[u8],
) {
    let has_srtp_remote = session.state.lock().await.has_srtp_remote;

    let plain: Vec<u8> = if has_srtp_remote {
        let srtp_arc = session.state.lock().await.kind(kind).srtp.clone();
        let mut guard = srtp_arc.lock().expect("srtp mutex poisoned");
        match guard.as_mut() {
            Some(ctx) => match srtp::unprotect_rtcp(ctx, data) {
                Ok(plain) => plain,
                Err(err) => {
                    tracing::debug!(handle = session.handle, ?kind, error = %err, "dropping undecryptable rtcp packet");
                    return;
                }
            },
            None => return,
        }
    } else {
        data.to_vec()
    };

    if rtcp::parse_rtcp(&plain).is_empty() {
        tracing::debug!(handle = session.handle, ?kind, "dropping unparseable rtcp packet");
        return;
    }

    callbacks.relay_rtcp(session.handle, is_video, &plain);
}
