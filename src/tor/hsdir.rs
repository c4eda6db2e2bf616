//! Directory ring tracker.
//!
//! Keeps a live, fingerprint-ordered list of the directory nodes carrying
//! the HSDir flag and answers responsibility queries against it. The list
//! is refreshed from the controller every time a STATUS_GENERAL event
//! arrives, and is safe for concurrent use: queries proceed in parallel
//! under a read lock while a refresh swaps the list under the write lock.

use anyhow::{bail, Context, Result};
use data_encoding::BASE32;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::descriptor::router_status::RouterStatusEntry;
use crate::tor::control::{ControlClient, EventKind};
use crate::util::StopSignal;

/// How many consecutive ring entries are responsible for one descriptor id.
pub const N_CONSECUTIVE_REPLICAS: usize = 3;

/// Responsibility queries against the directory ring.
pub trait DirectoryRing: Send + Sync + 'static {
    /// Returns the directory nodes responsible for storing a descriptor,
    /// in ring order.
    fn responsible(&self, descriptor_id: &str) -> Result<Vec<RouterStatusEntry>>;
}

/// Tracks the HSDir ring for the whole process.
pub struct HsDirTracker<C> {
    controller: Arc<C>,
    hsdirs: RwLock<Vec<RouterStatusEntry>>,
    stop: StopSignal,
}

impl<C: ControlClient> HsDirTracker<C> {
    pub fn new(controller: Arc<C>) -> Self {
        Self {
            controller,
            hsdirs: RwLock::new(Vec::new()),
            stop: StopSignal::new(),
        }
    }

    /// Pulls a fresh router status listing and atomically replaces the
    /// stored ring with its HSDir entries, sorted by fingerprint. On
    /// failure the previous ring is kept.
    pub async fn refresh(&self) -> Result<()> {
        let entries = self.controller.fetch_router_status().await?;
        if entries.is_empty() {
            bail!("failed to fetch router status entries");
        }

        let mut hsdirs: Vec<RouterStatusEntry> =
            entries.into_iter().filter(|e| e.flags.hsdir).collect();
        if hsdirs.is_empty() {
            bail!("router status listing contained no HSDir entries");
        }

        hsdirs.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        hsdirs.dedup_by(|a, b| a.fingerprint == b.fingerprint);

        debug!("directory ring refreshed, {} entries", hsdirs.len());
        *self.hsdirs.write().expect("directory ring lock poisoned") = hsdirs;

        Ok(())
    }

    /// Performs the initial refresh and spawns the event listener that
    /// refreshes the ring on every STATUS_GENERAL event.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        debug!("directory ring tracker starting");
        self.refresh().await?;

        let mut events = self
            .controller
            .subscribe(&[EventKind::StatusGeneral])
            .await
            .context("failed to subscribe to controller events")?;

        let tracker = self;
        let mut stop_rx = tracker.stop.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        debug!("directory ring tracker stopping");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(_) => {
                            debug!("status event received, refreshing directory ring");
                            if let Err(e) = tracker.refresh().await {
                                error!("failed to refresh directory ring: {e:#}");
                            }
                        }
                        None => {
                            warn!("controller event stream ended");
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Stops the event listener. Idempotent.
    pub fn stop(&self) {
        if self.stop.signal() {
            info!("directory ring tracker stopped");
        }
    }

    /// Number of entries currently in the ring.
    pub fn len(&self) -> usize {
        self.hsdirs.read().expect("directory ring lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ControlClient> DirectoryRing for HsDirTracker<C> {
    fn responsible(&self, descriptor_id: &str) -> Result<Vec<RouterStatusEntry>> {
        let decoded = BASE32
            .decode(descriptor_id.as_bytes())
            .with_context(|| format!("failed to decode descriptor id {descriptor_id:?}"))?;
        let query = hex::encode_upper(decoded);

        let hsdirs = self.hsdirs.read().expect("directory ring lock poisoned");
        let size = hsdirs.len();
        if size == 0 {
            bail!("directory ring is empty");
        }

        // first entry with fingerprint >= the query, wrapping to the ring
        // start when the query is beyond every fingerprint
        let mut start = hsdirs.partition_point(|e| e.fingerprint.as_str() < query.as_str());
        if start == size {
            start = 0;
        }

        let mut responsible = Vec::with_capacity(N_CONSECUTIVE_REPLICAS);
        let mut index = start;
        while responsible.len() < N_CONSECUTIVE_REPLICAS {
            responsible.push(hsdirs[index].clone());
            index += 1;
            if index >= size {
                index = 0;
            }
            if index == start {
                break;
            }
        }

        Ok(responsible)
    }
}
