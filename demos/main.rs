//! Minimal smoke-test binary: spins up the plugin against a loopback config
//! file and a no-op gateway, generates an offer/answer pair, then exits.
//! Not part of the library's public contract — a thin shell over `Plugin`,
//! the same role the teacher's `main.rs` plays over `calling`/`api`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nosip_bridge::{GatewayCallbacks, Plugin};

struct DemoGateway;

impl GatewayCallbacks for DemoGateway {
    fn notify_event(&self, plugin: &str, handle: u64, json: Value) {
        tracing::info!(plugin, handle, %json, "notify_event");
    }

    fn push_event(
        &self,
        handle: u64,
        plugin: &str,
        transaction: &str,
        event_json: Value,
        jsep_json: Option<Value>,
    ) {
        tracing::info!(plugin, handle, transaction, %event_json, ?jsep_json, "push_event");
    }

    fn relay_rtp(&self, handle: u64, is_video: bool, buf: &[u8]) {
        tracing::debug!(handle, is_video, len = buf.len(), "relay_rtp");
    }

    fn relay_rtcp(&self, handle: u64, is_video: bool, buf: &[u8]) {
        tracing::debug!(handle, is_video, len = buf.len(), "relay_rtcp");
    }

    fn close_pc(&self, handle: u64) {
        tracing::info!(handle, "close_pc");
    }

    fn events_is_enabled(&self) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = write_demo_config()?;
    let callbacks: Arc<dyn GatewayCallbacks> = Arc::new(DemoGateway);
    let plugin = Plugin::init(callbacks, &config_path).await?;

    let handle = 1u64;
    plugin.create_session(handle);

    let offer = json!({
        "request": "generate",
        "jsep": {
            "type": "offer",
            "sdp": "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\nm=audio 0 RTP/AVP 0\r\n",
        },
        "srtp": "sdes_optional",
    });
    plugin.handle_message(handle, "demo-1".to_string(), offer, None).await?;

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let status = plugin.query_session(handle).await;
    tracing::info!(%status, "session status after generate");

    plugin.destroy_session(handle);
    plugin.destroy();
    std::fs::remove_file(&config_path).ok();

    Ok(())
}

fn write_demo_config() -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("nosip-bridge-demo-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "[general]\nlocal_ip = \"127.0.0.1\"\nrtp_port_range = \"31000-31100\"\nevents = true\n",
    )?;
    Ok(path)
}
