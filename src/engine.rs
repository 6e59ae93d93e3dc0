// src/engine.rs - Polling engine and liveness watchdog
use crate::battery::{Battery, BatteryStatus};
use crate::config::Config;
use crate::error::Result;
use crate::modbus::SharedBus;
use crate::publisher::ValuePublisher;
use crate::registry::Signal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info};

/// One governed set of batteries published as one service.
///
/// Per-unit and fleet publishing are structurally identical; they differ
/// only in the battery list passed in.
pub struct PollGroup {
    name: String,
    batteries: Vec<Arc<Battery>>,
    signals: Vec<Signal>,
    publisher: Arc<dyn ValuePublisher>,
    bus: SharedBus,
    base_address: u16,
    register_count: u16,
}

impl PollGroup {
    /// Create a group and register every signal path with the publisher.
    /// Constants publish their value right away; computed signals start
    /// out empty until the first poll cycle.
    pub fn new(
        name: impl Into<String>,
        batteries: Vec<Battery>,
        signals: Vec<Signal>,
        publisher: Arc<dyn ValuePublisher>,
        bus: SharedBus,
        config: &Config,
    ) -> Result<Self> {
        for signal in &signals {
            publisher.register_path(&signal.path, signal.reader.constant(), signal.format.clone())?;
        }
        Ok(Self {
            name: name.into(),
            batteries: batteries.into_iter().map(Arc::new).collect(),
            signals,
            publisher,
            bus,
            base_address: config.bus.base_address,
            register_count: config.bus.register_count,
        })
    }

    /// Service name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn read_status(&self, battery: &Arc<Battery>) -> Result<BatteryStatus> {
        debug!("{}: reading battery status from unit {}", self.name, battery.address);
        let registers = {
            let mut client = self.bus.lock().await;
            client
                .read_registers(battery.address, self.base_address, self.register_count)
                .await?
        };
        Ok(BatteryStatus::new(
            battery.clone(),
            registers,
            self.base_address,
        ))
    }

    /// One full update cycle:
    ///
    /// 1. read the status window of every battery in list order,
    /// 2. decode every signal against every status,
    /// 3. aggregate per signal and publish.
    ///
    /// Any failure aborts the cycle before the publish step touches a
    /// single path, so the fleet is never half-updated.
    pub async fn poll_cycle(&self) -> Result<()> {
        debug!("{}: starting update cycle", self.name);

        let mut statuses = Vec::with_capacity(self.batteries.len());
        for battery in &self.batteries {
            statuses.push(self.read_status(battery).await?);
        }

        let mut updates = Vec::with_capacity(self.signals.len());
        for signal in &self.signals {
            let values = statuses
                .iter()
                .map(|status| signal.reader.read(status))
                .collect::<Result<Vec<_>>>()?;
            updates.push((signal.path.as_str(), signal.aggregate.apply(&values)?));
        }
        for (path, value) in updates {
            self.publisher.set_value(path, value)?;
        }

        debug!("{}: finished update cycle", self.name);
        Ok(())
    }
}

/// Runtime counters, logged at shutdown.
#[derive(Clone, Debug, Serialize)]
#[allow(missing_docs)]
pub struct ServiceStats {
    pub running: bool,
    pub cycle_count: u64,
    pub error_count: u64,
    pub uptime_secs: u64,
    pub group_count: usize,
}

/// The event loop: drives the poll timer and the liveness watchdog over
/// all groups until the watchdog trips or [`Service::stop`] is called.
pub struct Service {
    groups: Vec<PollGroup>,
    poll_interval: Duration,
    alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    cycle_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    start_time: Instant,
}

impl Service {
    /// Build the service over the bootstrapped groups.
    pub fn new(groups: Vec<PollGroup>, config: &Config) -> Self {
        Self {
            groups,
            poll_interval: Duration::from_millis(config.driver.poll_interval_ms),
            alive: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            cycle_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Run the event loop until the watchdog trips or `stop` is called.
    ///
    /// The poll timer fires every poll interval; the watchdog fires at
    /// exactly twice that. A successful pass over all groups sets the
    /// liveness flag; the watchdog reads-and-clears it and stops the loop
    /// when it finds the flag already cleared. No other code touches the
    /// flag.
    pub async fn run(&mut self) -> Result<()> {
        self.running.store(true, Ordering::Relaxed);
        info!(
            "starting event loop: {} group(s), poll interval {:?}",
            self.groups.len(),
            self.poll_interval
        );

        let started = tokio::time::Instant::now();
        let mut poll = interval_at(started + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let watchdog_period = self.poll_interval * 2;
        let mut watchdog = interval_at(started + watchdog_period, watchdog_period);
        // a successful cycle may outlast the watchdog period; delayed
        // watchdog ticks must coalesce, or the second of a burst would
        // observe the flag its twin just cleared and read a slow cycle
        // as a stall
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.running.load(Ordering::Relaxed) {
            tokio::select! {
                _ = poll.tick() => {
                    match self.poll_once().await {
                        Ok(()) => {
                            self.alive.store(true, Ordering::Relaxed);
                            self.cycle_count.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            // no retry within this tick; the watchdog
                            // bounds how long failing cycles can go on
                            self.error_count.fetch_add(1, Ordering::Relaxed);
                            error!("update cycle failed: {}", e);
                        }
                    }
                }
                _ = watchdog.tick() => {
                    if self.alive.swap(false, Ordering::Relaxed) {
                        debug!("watchdog: update task is alive");
                    } else {
                        info!("watchdog: stopping event loop, update task is no longer alive");
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        info!("event loop stopped");
        Ok(())
    }

    async fn poll_once(&self) -> Result<()> {
        for group in &self.groups {
            group.poll_cycle().await?;
        }
        Ok(())
    }

    /// Request the event loop to stop at its next tick.
    pub fn stop(&self) {
        info!("stopping event loop");
        self.running.store(false, Ordering::Relaxed);
    }

    /// A clonable handle that can stop the loop from another task.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            running: self.running.clone(),
        }
    }

    /// Whether the event loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Snapshot of the runtime counters.
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            running: self.is_running(),
            cycle_count: self.cycle_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
            group_count: self.groups.len(),
        }
    }
}

/// Stop handle detached from the [`Service`] borrow, for use by a signal
/// listener while the event loop owns the service.
#[derive(Clone)]
pub struct ServiceHandle {
    running: Arc<AtomicBool>,
}

impl ServiceHandle {
    /// Request the event loop to stop at its next tick.
    pub fn stop(&self) {
        info!("stopping event loop");
        self.running.store(false, Ordering::Relaxed);
    }
}
