//! A scriptable in-memory controller for tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::descriptor::router_status::RouterStatusEntry;
use crate::descriptor::HiddenServiceDescriptor;
use crate::tor::control::{ControlClient, ControlEvent, EventKind};
use crate::tor::hsdir::DirectoryRing;

/// Controller double: canned descriptors and router status, recorded posts.
#[derive(Default)]
pub struct MockController {
    inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    descriptors: HashMap<String, HiddenServiceDescriptor>,
    router_status: Vec<RouterStatusEntry>,
    error: Option<String>,
    broadcast_posts: Vec<String>,
    targeted_posts: Vec<(String, String)>,
    router_status_fetches: usize,
    event_tx: Option<mpsc::Sender<ControlEvent>>,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with the given message.
    pub fn fail_with(&self, message: &str) {
        self.inner.lock().unwrap().error = Some(message.to_string());
    }

    pub fn clear_failure(&self) {
        self.inner.lock().unwrap().error = None;
    }

    /// Sets the descriptor returned for a backend address.
    pub fn set_descriptor(&self, address: &str, descriptor: HiddenServiceDescriptor) {
        self.inner
            .lock()
            .unwrap()
            .descriptors
            .insert(address.to_string(), descriptor);
    }

    pub fn set_router_status(&self, entries: Vec<RouterStatusEntry>) {
        self.inner.lock().unwrap().router_status = entries;
    }

    /// Descriptors posted without a target fingerprint, in post order.
    pub fn broadcast_posts(&self) -> Vec<String> {
        self.inner.lock().unwrap().broadcast_posts.clone()
    }

    /// Descriptors posted at a specific directory, as (fingerprint, text)
    /// pairs in post order.
    pub fn targeted_posts(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().targeted_posts.clone()
    }

    pub fn router_status_fetches(&self) -> usize {
        self.inner.lock().unwrap().router_status_fetches
    }

    /// Delivers an event to the current subscriber, if any.
    pub fn send_event(&self, kind: EventKind, payload: &str) {
        let state = self.inner.lock().unwrap();
        if let Some(tx) = &state.event_tx {
            let _ = tx.try_send(ControlEvent {
                kind,
                payload: payload.to_string(),
            });
        }
    }
}

#[async_trait]
impl ControlClient for MockController {
    async fn fetch_descriptor(
        &self,
        address: &str,
        _hsdir_hint: Option<&str>,
        _deadline: Instant,
    ) -> Result<HiddenServiceDescriptor> {
        let state = self.inner.lock().unwrap();
        if let Some(message) = &state.error {
            bail!("{message}");
        }

        // an unknown address yields an empty descriptor, like a controller
        // event with no content
        Ok(state.descriptors.get(address).cloned().unwrap_or_default())
    }

    async fn post_descriptor(
        &self,
        descriptor: &str,
        hsdirs: &[String],
        _address: Option<&str>,
    ) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if let Some(message) = &state.error {
            bail!("{message}");
        }

        match hsdirs.first() {
            None => state.broadcast_posts.push(descriptor.to_string()),
            Some(fingerprint) => state
                .targeted_posts
                .push((fingerprint.clone(), descriptor.to_string())),
        }

        Ok(())
    }

    async fn fetch_router_status(&self) -> Result<Vec<RouterStatusEntry>> {
        let mut state = self.inner.lock().unwrap();
        state.router_status_fetches += 1;
        if let Some(message) = &state.error {
            bail!("{message}");
        }

        Ok(state.router_status.clone())
    }

    async fn subscribe(&self, _kinds: &[EventKind]) -> Result<mpsc::Receiver<ControlEvent>> {
        let (tx, rx) = mpsc::channel(16);
        self.inner.lock().unwrap().event_tx = Some(tx);
        Ok(rx)
    }
}

/// Ring double: responsibility answers keyed by descriptor id.
#[derive(Default)]
pub struct MockDirectoryRing {
    responsible: HashMap<String, Vec<RouterStatusEntry>>,
}

impl MockDirectoryRing {
    pub fn new(responsible: HashMap<String, Vec<RouterStatusEntry>>) -> Self {
        Self { responsible }
    }
}

impl DirectoryRing for MockDirectoryRing {
    fn responsible(&self, descriptor_id: &str) -> Result<Vec<RouterStatusEntry>> {
        Ok(self
            .responsible
            .get(descriptor_id)
            .cloned()
            .unwrap_or_default())
    }
}
