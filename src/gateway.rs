//! The host gateway's side of the plugin ABI, modeled as an injected trait
//! object — mirroring how the teacher treats externally-owned transports
//! (Trouter, the Graph API client) as dependencies passed in rather than
//! constructed internally.

/// Callbacks the host gateway exposes to this plugin. An `Arc<dyn
/// GatewayCallbacks>` is handed to `Plugin::init` and held for the life of
/// the plugin instance.
pub trait GatewayCallbacks: Send + Sync {
    /// Emit an observability event, gated by `events_is_enabled`.
    fn notify_event(&self, plugin: &str, handle: u64, json: serde_json::Value);

    /// Reply to a request identified by `transaction`, optionally carrying a
    /// JSEP mirror for the WebRTC side.
    fn push_event(
        &self,
        handle: u64,
        plugin: &str,
        transaction: &str,
        event_json: serde_json::Value,
        jsep_json: Option<serde_json::Value>,
    );

    /// Forward a decrypted RTP frame to the WebRTC side.
    fn relay_rtp(&self, handle: u64, is_video: bool, buf: &[u8]);

    /// Forward a decrypted RTCP packet to the WebRTC side.
    fn relay_rtcp(&self, handle: u64, is_video: bool, buf: &[u8]);

    /// Ask the host to tear down the WebRTC peer connection for `handle`.
    fn close_pc(&self, handle: u64);

    /// Whether the host wants `notify_event` calls delivered at all.
    fn events_is_enabled(&self) -> bool;
}
