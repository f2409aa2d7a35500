//! `nosip-bridge`: a media-bridging plugin that relays RTP/RTCP between a
//! WebRTC endpoint (through a host gateway's callbacks) and a legacy plain
//! RTP/AVP or RTP/SAVP (SDES-SRTP) peer.
//!
//! No signalling, ICE, DTLS, or TURN: the host gateway owns the WebRTC side
//! entirely and this crate only ever sees already-negotiated SDP and raw
//! media packets.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ingress;
pub mod media;
pub mod plugin;
pub mod ports;
pub mod reaper;
pub mod relay;
pub mod request;
pub mod rewriter;
pub mod session;
pub mod srtp_manager;

pub use error::PluginError;
pub use gateway::GatewayCallbacks;
pub use plugin::{Ack, Plugin};
