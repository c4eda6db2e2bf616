//! Small shared helpers: encoding conversions, stop signalling, time.

pub mod time;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Decodes a base64 string and returns its uppercase hex encoding.
///
/// Router status entries carry base64 identities with the trailing padding
/// stripped, so padding is restored before decoding.
pub fn base64_to_hex(identity: &str) -> Result<String> {
    let mut padded = identity.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let decoded = STANDARD
        .decode(padded.as_bytes())
        .with_context(|| format!("invalid base64 identity {identity:?}"))?;

    Ok(hex::encode_upper(decoded))
}

/// A one-shot stop signal that is safe to trigger from several owners.
///
/// Only the first call to [`StopSignal::signal`] closes the signal; later
/// calls are no-ops.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns a receiver that resolves once the signal fires.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Fires the signal. Returns true only for the call that actually
    /// performed the stop.
    pub fn signal(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }

        let _ = self.tx.send(true);
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_to_hex_restores_padding() {
        let got = base64_to_hex("g55eugbqhviysu7bi4qzjcru5r4q7wxb").unwrap();
        assert_eq!(got, "839E5EBA06EA86F8B2B2EEDB8B8AB38DCAEEE6BE2AEF0C5B");

        let got = base64_to_hex("YWJjZGVmZw==").unwrap();
        assert_eq!(got, "61626364656667");
    }

    #[test]
    fn base64_to_hex_rejects_garbage() {
        assert!(base64_to_hex("rrrrrrrrrrrrrrrrrr").is_err());
    }

    #[test]
    fn stop_signal_fires_once() {
        let stop = StopSignal::new();
        let mut rx = stop.subscribe();

        assert!(!stop.is_stopped());
        assert!(stop.signal());
        assert!(!stop.signal());
        assert!(stop.is_stopped());
        assert!(rx.has_changed().unwrap());
    }
}
