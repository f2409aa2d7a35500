//! Media-plane building blocks: RTP/RTCP framing, SRTP, plain SDP, and
//! disk recording. These modules are leaf-level — none of them know about
//! sessions, sockets, or the JSON request protocol.

pub mod recording;
pub mod rtcp;
pub mod rtp;
pub mod sdp;
pub mod srtp;
