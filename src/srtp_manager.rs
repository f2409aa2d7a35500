//! SRTP context lifecycle for one media kind: generate local keying
//! material, ingest the peer's, and (re)build the `SrtpContext` that
//! `media::srtp::protect`/`unprotect` operate on.
//!
//! `media::srtp::create_context` takes both the local and remote keying
//! material at once, but `generate` and `process` learn them at different
//! times. `set_local` bootstraps a context paired with itself so outbound
//! protection works immediately after an offer is generated; `set_remote`
//! rebuilds it once the peer's crypto line arrives, which recomputes the
//! (unchanged) local keys and installs the real remote keys.

use anyhow::{bail, Context, Result};
use base64::Engine;

use crate::media::srtp::{self, SrtpKeyingMaterial, SrtpSuite};
use crate::session::KindState;

/// Generate fresh local keying material, install an outbound-capable
/// context, and return the base64 blob for an `a=crypto` line.
pub fn set_local(state: &mut KindState) -> Result<String> {
    let mut material = [0u8; 30];
    getrandom::getrandom(&mut material).context("failed to read randomness for SRTP key")?;

    let mut master_key = [0u8; 16];
    let mut master_salt = [0u8; 14];
    master_key.copy_from_slice(&material[..16]);
    master_salt.copy_from_slice(&material[16..]);

    let local = SrtpKeyingMaterial {
        master_key,
        master_salt,
        tag: 1,
        // Outbound crypto is always advertised at 80-bit (documented
        // non-goal: negotiating a 32-bit outbound suite is unsupported).
        suite: SrtpSuite::HmacSha1_80,
    };

    let ctx = match &state.remote_material {
        Some(remote) => srtp::create_context(&local, remote)?,
        None => srtp::create_context(&local, &local)?,
    };

    let crypto_b64 = base64::engine::general_purpose::STANDARD.encode(material);
    state.local_material = Some(local);
    *state.srtp.lock().expect("srtp mutex poisoned") = Some(ctx);

    Ok(crypto_b64)
}

/// Decode and install the peer's keying material, rebuilding the shared
/// context so inbound (and, if local material exists, outbound) protection
/// uses it.
pub fn set_remote(state: &mut KindState, crypto_b64: &str, suite: SrtpSuite) -> Result<()> {
    let material = base64::engine::general_purpose::STANDARD
        .decode(crypto_b64)
        .context("invalid base64 in a=crypto inline key")?;
    if material.len() < 30 {
        bail!("SRTP keying material too short: {} bytes", material.len());
    }

    let mut master_key = [0u8; 16];
    let mut master_salt = [0u8; 14];
    master_key.copy_from_slice(&material[..16]);
    master_salt.copy_from_slice(&material[16..30]);

    let remote = SrtpKeyingMaterial {
        master_key,
        master_salt,
        tag: 1,
        suite,
    };

    let local = state
        .local_material
        .clone()
        .unwrap_or_else(|| remote.clone());
    let ctx = srtp::create_context(&local, &remote)?;

    state.remote_material = Some(remote);
    *state.srtp.lock().expect("srtp mutex poisoned") = Some(ctx);

    Ok(())
}

/// Tear down SRTP for this kind. Safe to call on a partially-initialized
/// or already-clean state.
pub fn cleanup(state: &mut KindState) {
    *state.srtp.lock().expect("srtp mutex poisoned") = None;
    state.local_material = None;
    state.remote_material = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_local_then_set_remote_roundtrip() {
        let mut local_state = KindState::default();
        let crypto_b64 = set_local(&mut local_state).unwrap();
        assert!(local_state.srtp.lock().unwrap().is_some());

        let mut remote_state = KindState::default();
        set_remote(&mut remote_state, &crypto_b64, SrtpSuite::HmacSha1_80).unwrap();
        assert!(remote_state.srtp.lock().unwrap().is_some());

        let rtp = crate::media::rtp::encode(96, 1, 160, 0xAAAA, &[1, 2, 3, 4]);
        let protected = {
            let mut guard = local_state.srtp.lock().unwrap();
            srtp::protect(guard.as_mut().unwrap(), &rtp).unwrap()
        };
        let unprotected = {
            let mut guard = remote_state.srtp.lock().unwrap();
            srtp::unprotect(guard.as_mut().unwrap(), &protected).unwrap()
        };
        assert_eq!(unprotected, rtp);
    }

    #[test]
    fn test_set_remote_rejects_short_key() {
        let mut state = KindState::default();
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 10]);
        assert!(set_remote(&mut state, &short, SrtpSuite::HmacSha1_80).is_err());
    }

    #[test]
    fn test_cleanup_clears_state() {
        let mut state = KindState::default();
        set_local(&mut state).unwrap();
        cleanup(&mut state);
        assert!(state.srtp.lock().unwrap().is_none());
        assert!(state.local_material.is_none());
    }
}
