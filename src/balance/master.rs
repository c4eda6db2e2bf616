//! The master service control loop.
//!
//! Each configured service runs one `Master`. On every tick it decides
//! whether the published descriptors need rebuilding (backend introduction
//! points changed, the descriptor id is about to rotate, or nothing was
//! published for too long) and, if so, regenerates and posts descriptors
//! either broadcast or per responsible directory.

use anyhow::{bail, Context, Result};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info};

use crate::crypto::ids::{self, PERMANENT_ID_LEN};
use crate::descriptor::rotation::IntroPointRotation;
use crate::descriptor::{generate_descriptor, HiddenServiceDescriptor, IntroductionPoint};
use crate::tor::control::ControlClient;
use crate::tor::hsdir::DirectoryRing;
use crate::util::time::Clock;
use crate::util::StopSignal;

/// Number of descriptor replicas published per period.
pub const REPLICA_SET_SIZE: u8 = 2;

/// Largest introduction point set that still fits a single descriptor.
pub const MAX_INTRO_POINTS: usize = 10;

/// Rebuild when the descriptor id changes within this many seconds.
pub const DESCRIPTOR_OVERLAP_PERIOD: i64 = 3600;

/// Deadline for the controller round trips of one tick.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(45);

/// The backend services a master balances over, with the descriptors seen
/// on the last fetch.
#[derive(Debug, Default)]
struct BackendState {
    addresses: Vec<String>,
    descriptors: Vec<HiddenServiceDescriptor>,
    total_intro_points: usize,
    /// Set when the stored descriptors were fetched by the trigger check of
    /// the current cycle, so balance can reuse them.
    fresh: bool,
}

/// One public-facing master service balancing a set of backends.
pub struct Master<C, R, T> {
    controller: Arc<C>,
    ring: Arc<R>,
    clock: T,
    address: String,
    permanent_id: [u8; PERMANENT_ID_LEN],
    public_key: RsaPublicKey,
    private_key: RsaPrivateKey,
    backends: BackendState,
    publish_interval: Duration,
    last_publish_time: i64,
    stop: Arc<StopSignal>,
}

/// Clonable handle that stops a master's loop. Idempotent.
#[derive(Clone)]
pub struct StopHandle {
    signal: Arc<StopSignal>,
    address: String,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.signal.signal() {
            info!("master {}: stopping service", self.address);
        }
    }
}

impl<C, R, T> Master<C, R, T>
where
    C: ControlClient,
    R: DirectoryRing,
    T: Clock,
{
    pub fn new(
        controller: Arc<C>,
        ring: Arc<R>,
        clock: T,
        backend_addresses: Vec<String>,
        public_key: RsaPublicKey,
        private_key: RsaPrivateKey,
        publish_interval: Duration,
    ) -> Result<Self> {
        let permanent_id =
            ids::permanent_id(&public_key).context("failed to calculate permanent id")?;

        Ok(Self {
            controller,
            ring,
            clock,
            address: ids::onion_address(&permanent_id),
            permanent_id,
            public_key,
            private_key,
            backends: BackendState {
                addresses: backend_addresses,
                ..BackendState::default()
            },
            publish_interval,
            last_publish_time: 0,
            stop: Arc::new(StopSignal::new()),
        })
    }

    /// The master's onion address (without the .onion suffix).
    pub fn onion_address(&self) -> &str {
        &self.address
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            signal: Arc::clone(&self.stop),
            address: self.address.clone(),
        }
    }

    /// Runs the balancing loop until the stop handle fires.
    pub async fn run(mut self, tick_interval: Duration) -> Result<()> {
        info!("master {}: starting service", self.address);

        let mut stop_rx = self.stop.subscribe();
        let mut ticker = interval(tick_interval);
        // consume the interval's immediate first tick; the loop body runs
        // once before the first wait either way
        ticker.tick().await;

        loop {
            let deadline = Instant::now() + FETCH_TIMEOUT;

            let changed = match self.introduction_points_changed(deadline).await {
                Ok(changed) => changed,
                Err(e) => {
                    error!(
                        "master {}: failed to check if introduction points changed: {e:#}",
                        self.address
                    );
                    false
                }
            };

            if changed || self.descriptor_id_changing_soon() || self.not_published_recently() {
                if let Err(e) = self.balance(deadline).await {
                    error!("master {}: failed to balance: {e:#}", self.address);
                }
            }

            tokio::select! {
                _ = stop_rx.changed() => return Ok(()),
                _ = ticker.tick() => {}
            }
        }
    }

    /// Fetches every backend's current descriptor and stores the set when
    /// it differs from what was seen last. A change in the number of
    /// reachable backends counts as a change.
    async fn introduction_points_changed(&mut self, deadline: Instant) -> Result<bool> {
        let (descriptors, total_intro_points) = self.fetch_backend_descriptors(deadline).await?;

        if self.backends.descriptors.is_empty() {
            debug!(
                "master {}: no backend descriptors stored yet, storing fetched set",
                self.address
            );
            self.store_backend_descriptors(descriptors, total_intro_points);
            return Ok(true);
        }

        let changed = self.backends.descriptors.len() != descriptors.len()
            || self
                .backends
                .descriptors
                .iter()
                .zip(&descriptors)
                .any(|(old, new)| old.introduction_points_raw != new.introduction_points_raw);

        if changed {
            debug!(
                "master {}: backend introduction points changed, storing fetched set",
                self.address
            );
            self.store_backend_descriptors(descriptors, total_intro_points);
        }

        Ok(changed)
    }

    fn store_backend_descriptors(
        &mut self,
        descriptors: Vec<HiddenServiceDescriptor>,
        total_intro_points: usize,
    ) {
        self.backends.descriptors = descriptors;
        self.backends.total_intro_points = total_intro_points;
        self.backends.fresh = true;
    }

    /// Fetches the descriptor of every backend in turn. Individual failures
    /// are logged and skipped; only collecting nothing at all is an error.
    async fn fetch_backend_descriptors(
        &self,
        deadline: Instant,
    ) -> Result<(Vec<HiddenServiceDescriptor>, usize)> {
        debug!("master {}: fetching backend descriptors", self.address);

        let mut descriptors = Vec::with_capacity(self.backends.addresses.len());
        let mut total_intro_points = 0;

        for address in &self.backends.addresses {
            let descriptor = match self
                .controller
                .fetch_descriptor(address, None, deadline)
                .await
            {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    error!(
                        "master {}: failed to fetch descriptor for {address}: {e:#}",
                        self.address
                    );
                    continue;
                }
            };

            if descriptor.descriptor_id.is_empty() && descriptor.introduction_points.is_empty() {
                error!(
                    "master {}: fetch returned an empty descriptor for {address}",
                    self.address
                );
                continue;
            }

            total_intro_points += descriptor.introduction_points.len();
            descriptors.push(descriptor);
        }

        if descriptors.is_empty() {
            bail!("failed to fetch any backend descriptors");
        }

        Ok((descriptors, total_intro_points))
    }

    /// Rebuilds and posts the master descriptors from the current backend
    /// set, choosing the publication strategy by total fan-out.
    async fn balance(&mut self, deadline: Instant) -> Result<()> {
        debug!("master {}: balancing", self.address);

        if !self.backends.fresh {
            debug!(
                "master {}: no freshly fetched backend descriptors, refetching",
                self.address
            );
            let (descriptors, total_intro_points) =
                self.fetch_backend_descriptors(deadline).await?;
            self.backends.descriptors = descriptors;
            self.backends.total_intro_points = total_intro_points;
        }
        self.backends.fresh = false;

        let now = self.clock.now_unix();
        if self.backends.total_intro_points > MAX_INTRO_POINTS {
            self.publish_per_directory(now).await?;
        } else {
            self.publish_broadcast(now).await?;
        }

        self.last_publish_time = now;
        info!("master {}: published descriptors", self.address);

        Ok(())
    }

    /// Single-descriptor strategy: every replica carries the concatenated
    /// introduction points of all backends and is posted broadcast.
    async fn publish_broadcast(&self, now: i64) -> Result<()> {
        debug!(
            "master {}: publishing one descriptor set to all directories",
            self.address
        );

        let introduction_points: Vec<IntroductionPoint> = self
            .backends
            .descriptors
            .iter()
            .flat_map(|d| d.introduction_points.iter().cloned())
            .collect();

        for replica in 0..REPLICA_SET_SIZE {
            let descriptor = generate_descriptor(
                &introduction_points,
                now,
                replica,
                0,
                "",
                &self.public_key,
                &self.private_key,
                None,
                None,
            )
            .context("failed to generate descriptor")?;

            self.controller
                .post_descriptor(&descriptor, &[], None)
                .await
                .context("failed to post descriptor")?;
        }

        Ok(())
    }

    /// Multi-descriptor strategy: each responsible directory gets its own
    /// descriptor carrying the next round-robin window of introduction
    /// points. Post failures are logged but do not abort the cycle.
    async fn publish_per_directory(&self, now: i64) -> Result<()> {
        debug!(
            "master {}: publishing per-directory descriptors",
            self.address
        );

        let backend_lists: Vec<Vec<IntroductionPoint>> = self
            .backends
            .descriptors
            .iter()
            .map(|d| d.introduction_points.clone())
            .collect();
        let mut rotation = IntroPointRotation::new(&backend_lists);

        for replica in 0..REPLICA_SET_SIZE {
            let descriptor_id = ids::descriptor_id(&self.permanent_id, now, replica, 0, "");

            let responsible = self
                .ring
                .responsible(&descriptor_id)
                .context("failed to calculate responsible directories")?;

            for hsdir in responsible {
                let window = rotation.next_window();
                let descriptor = generate_descriptor(
                    &window,
                    now,
                    replica,
                    0,
                    "",
                    &self.public_key,
                    &self.private_key,
                    Some(self.permanent_id),
                    Some(descriptor_id.clone()),
                )
                .context("failed to generate descriptor")?;

                if let Err(e) = self
                    .controller
                    .post_descriptor(&descriptor, std::slice::from_ref(&hsdir.fingerprint), None)
                    .await
                {
                    error!(
                        "master {}: failed to post descriptor to {}: {e:#}",
                        self.address, hsdir.fingerprint
                    );
                }
            }
        }

        Ok(())
    }

    fn descriptor_id_changing_soon(&self) -> bool {
        let remaining = ids::seconds_until_change(&self.permanent_id, self.clock.now_unix());
        if remaining < DESCRIPTOR_OVERLAP_PERIOD {
            debug!("master {}: descriptor id changing soon", self.address);
            return true;
        }

        false
    }

    fn not_published_recently(&self) -> bool {
        if self.last_publish_time == 0 {
            return true;
        }

        if self.clock.now_unix() - self.last_publish_time > self.publish_interval.as_secs() as i64 {
            debug!(
                "master {}: no descriptor published in a while",
                self.address
            );
            return true;
        }

        false
    }
}
