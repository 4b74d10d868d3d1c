//! Expiry of silent participants.
//!
//! A sweep pass reads a snapshot of the room, picks every participant whose
//! last activity is older than the threshold, and evicts each one only if its
//! `last_seen` is unchanged since the snapshot. Every actual eviction is
//! announced with a departure notice.

use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest interval the periodic sweeper will tick at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sweeper configuration.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    /// Time between sweep passes. A zero interval runs at [`MIN_INTERVAL`].
    pub interval: Duration,
    /// Silence after which a participant is evicted.
    pub stale_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            stale_after: Duration::from_secs(10),
        }
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Participants found stale in the snapshot.
    pub stale: usize,
    /// Participants actually removed.
    pub evicted: Vec<String>,
    /// Items whose eviction or departure notice failed.
    pub failed: usize,
    /// Participants left in the room after the pass.
    pub remaining: usize,
}

/// Clears the in-progress flag when a pass ends, even on panic.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically evicts stale participants.
pub struct ExpirySweeper {
    registry: PresenceRegistry,
    router: MessageRouter,
    config: SweeperConfig,
    running: AtomicBool,
}

impl ExpirySweeper {
    /// Create a sweeper.
    #[must_use]
    pub fn new(registry: PresenceRegistry, router: MessageRouter, config: SweeperConfig) -> Self {
        Self {
            registry,
            router,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// The sweeper configuration.
    #[must_use]
    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Run one pass unless another one is in progress.
    ///
    /// Returns `None` if a pass was already running.
    pub async fn try_sweep(&self) -> Option<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sweep already in progress, skipping");
            return None;
        }
        let _guard = PassGuard(&self.running);
        Some(self.sweep_once().await)
    }

    /// Run one pass.
    ///
    /// Failures are logged and counted per participant; they never abort the pass.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let participants = match self.registry.list_active().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Sweep could not read participants");
                report.failed += 1;
                return report;
            }
        };

        let now = self.registry.now();
        let total = participants.len();
        for participant in participants
            .into_iter()
            .filter(|p| p.is_stale(&now, self.config.stale_after))
        {
            report.stale += 1;
            let name = participant.name;

            match self
                .registry
                .evict_if_unchanged(&name, participant.last_seen)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(participant = %name, "Participant active again, not evicted");
                    continue;
                }
                Err(e) => {
                    warn!(participant = %name, error = %e, "Eviction failed");
                    report.failed += 1;
                    continue;
                }
            }

            if let Err(e) = self.router.announce_departure(&name).await {
                warn!(participant = %name, error = %e, "Departure notice failed");
                report.failed += 1;
            }
            report.evicted.push(name);
        }

        report.remaining = total - report.evicted.len();

        if report.stale > 0 || report.failed > 0 {
            info!(
                stale = report.stale,
                evicted = report.evicted.len(),
                failed = report.failed,
                "Sweep pass complete"
            );
        }
        report
    }

    /// Run passes on a fixed interval until the returned handle is shut down.
    ///
    /// A pass still running when the next tick is due causes that tick to be
    /// skipped. `on_pass` sees every completed report.
    pub fn spawn<F>(self: Arc<Self>, mut on_pass: F) -> SweeperHandle
    where
        F: FnMut(&SweepReport) + Send + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let period = self.config.interval.max(MIN_INTERVAL);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(
                interval = ?period,
                stale_after = ?self.config.stale_after,
                "Expiry sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(report) = self.try_sweep().await {
                            on_pass(&report);
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to end.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Expiry sweeper task ended abnormally");
        }
    }
}
