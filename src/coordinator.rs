//! # Polling Coordinator
//!
//! Owns the poll lifecycle for one meter: schedules polls, applies the retry
//! policy, keeps the last good snapshot through outages and publishes a
//! [`PollState`] that consumers read through a `watch` channel.
//!
//! ## Poll cycle
//!
//! ```text
//! open (if closed) -> wake -> SND_NKE -> settle -> REQ_UD2 -> read -> decode -> snapshot
//! ```
//!
//! The transport sits behind an async mutex, so a manual [`MeterCoordinator::refresh`]
//! that arrives while a scheduled poll is running waits for it and then runs
//! its own cycle. Two cycles never touch the line at the same time.
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = Arc::new(MeterCoordinator::with_serial(config)?);
//! let poller = coordinator.spawn();
//! let mut states = coordinator.subscribe();
//! while states.changed().await.is_ok() {
//!     let state = states.borrow().clone();
//!     // display state.last_snapshot / state.availability
//! }
//! ```

use crate::config::MeterConfig;
use crate::error::MBusError;
use crate::logging::LogThrottle;
use crate::mbus::frame::{is_pollable_address, req_ud2, snd_nke};
use crate::mbus::serial::{SerialTransport, Transport};
use crate::snapshot::ReadingSnapshot;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    Idle,
    Polling,
}

/// Why a poll ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

/// Result of one poll cycle, after it has been applied to [`PollState`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success(Arc<ReadingSnapshot>),
    Failed(MBusError),
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success(_))
    }
}

/// Everything a consumer needs to display one meter.
#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    /// Last good snapshot; survives any number of failures.
    pub last_snapshot: Option<Arc<ReadingSnapshot>>,
    pub consecutive_failures: u32,
    pub last_error: Option<MBusError>,
    pub availability: Availability,
    pub phase: PollPhase,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Completed cycles, successful or not.
    pub polls: u64,
}

impl Default for PollState {
    fn default() -> Self {
        PollState {
            last_snapshot: None,
            consecutive_failures: 0,
            last_error: None,
            availability: Availability::Unavailable,
            phase: PollPhase::Idle,
            last_attempt: None,
            last_success: None,
            polls: 0,
        }
    }
}

impl PollState {
    /// True when the last error needs an operator (missing device, no permission).
    pub fn needs_attention(&self) -> bool {
        self.last_error
            .as_ref()
            .is_some_and(|e| e.kind().is_actionable())
    }
}

/// Runs one cycle on `transport` and decodes the answer.
///
/// Every error is returned as is; nothing is retried here.
pub async fn run_poll_cycle(
    transport: &mut dyn Transport,
    config: &MeterConfig,
) -> Result<ReadingSnapshot, MBusError> {
    let timing = &config.transport;

    if !transport.is_open() {
        transport.open(&config.device_path).await?;
    }

    transport.wake().await?;
    tokio::time::sleep(timing.post_wake_delay()).await;

    transport
        .send_command(&snd_nke(config.primary_address))
        .await?;
    tokio::time::sleep(timing.settle_delay()).await;
    transport
        .send_command(&req_ud2(config.primary_address))
        .await?;

    let bytes = transport.read_response(timing.response_timeout()).await?;
    ReadingSnapshot::from_frame_bytes(&bytes, Utc::now())
}

/// Records a cancelled poll if the cycle is dropped before it finishes.
struct CancelGuard<'a> {
    coordinator: &'a MeterCoordinator,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::warn!("poll abandoned before completion");
            self.coordinator.link_dirty.store(true, Ordering::SeqCst);
            self.coordinator.apply(Err(MBusError::Cancelled));
        }
    }
}

/// Polling coordinator for one meter.
pub struct MeterCoordinator {
    config: MeterConfig,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    state: watch::Sender<PollState>,
    /// Set when a cycle was abandoned mid-way; the line is reset before the next one.
    link_dirty: AtomicBool,
    rng: Mutex<StdRng>,
    outage_log: Mutex<LogThrottle>,
}

impl MeterCoordinator {
    pub fn new(config: MeterConfig, transport: Box<dyn Transport>) -> Result<Self, MBusError> {
        config.validate()?;
        if !is_pollable_address(config.primary_address) {
            log::warn!(
                "primary address 0x{:02X} is reserved; the meter may never answer",
                config.primary_address
            );
        }

        let (state, _) = watch::channel(PollState::default());
        Ok(MeterCoordinator {
            config,
            transport: tokio::sync::Mutex::new(transport),
            state,
            link_dirty: AtomicBool::new(false),
            rng: Mutex::new(StdRng::from_entropy()),
            outage_log: Mutex::new(LogThrottle::new(Duration::from_secs(600), 1)),
        })
    }

    /// Coordinator talking to the configured serial device.
    pub fn with_serial(config: MeterConfig) -> Result<Self, MBusError> {
        let transport = SerialTransport::new(config.transport.clone());
        Self::new(config, Box::new(transport))
    }

    /// Seeds the backoff jitter, for reproducible schedules.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Copy of the current state.
    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Option<Arc<ReadingSnapshot>> {
        self.state.borrow().last_snapshot.clone()
    }

    /// Polls now, outside the schedule. Waits for any poll in flight first and
    /// returns once this poll's outcome is in [`PollState`].
    pub async fn refresh(&self) -> PollOutcome {
        self.poll(Trigger::Manual).await
    }

    /// One full cycle under the transport lock.
    pub async fn poll(&self, trigger: Trigger) -> PollOutcome {
        let mut transport = self.transport.lock().await;

        if self.link_dirty.swap(false, Ordering::SeqCst) {
            transport.close().await;
        }

        log::debug!("{trigger:?} poll of {}", self.config.device_path);
        self.state.send_modify(|s| {
            s.phase = PollPhase::Polling;
            s.last_attempt = Some(Utc::now());
        });

        let mut guard = CancelGuard {
            coordinator: self,
            armed: true,
        };
        let result = run_poll_cycle(&mut **transport, &self.config).await;
        guard.armed = false;

        if result.is_err() {
            transport.close().await;
        }
        self.apply(result)
    }

    /// Installs the outcome of a cycle in one state update.
    fn apply(&self, result: Result<ReadingSnapshot, MBusError>) -> PollOutcome {
        let threshold = self.config.retry.failure_threshold;
        let before = self.state.borrow().availability;

        let outcome = match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                log::info!(
                    "meter {} read: {} readings",
                    snapshot.device_id(),
                    snapshot.len()
                );
                self.state.send_modify(|s| {
                    s.last_snapshot = Some(Arc::clone(&snapshot));
                    s.consecutive_failures = 0;
                    s.last_error = None;
                    s.availability = Availability::Available;
                    s.phase = PollPhase::Idle;
                    s.last_success = Some(snapshot.taken_at);
                    s.polls += 1;
                });
                self.lock_outage_log().reset();
                PollOutcome::Success(snapshot)
            }
            Err(e) => {
                self.state.send_modify(|s| {
                    s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                    s.last_error = Some(e.clone());
                    s.phase = PollPhase::Idle;
                    s.polls += 1;
                    s.availability =
                        if s.last_snapshot.is_some() && s.consecutive_failures < threshold {
                            Availability::Available
                        } else {
                            Availability::Unavailable
                        };
                });

                let failures = self.state.borrow().consecutive_failures;
                if e.kind().is_actionable() {
                    log::error!("{e}; check the optical head and device permissions");
                } else if failures < threshold || self.lock_outage_log().allow() {
                    log::warn!("poll failed ({failures} in a row): {e}");
                }
                PollOutcome::Failed(e)
            }
        };

        let after = self.state.borrow().availability;
        match (before, after) {
            (Availability::Available, Availability::Unavailable) => {
                log::warn!("meter readings unavailable")
            }
            (Availability::Unavailable, Availability::Available) => {
                log::info!("meter readings available")
            }
            _ => {}
        }

        outcome
    }

    fn lock_outage_log(&self) -> std::sync::MutexGuard<'_, LogThrottle> {
        self.outage_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay before the next scheduled poll.
    pub fn next_delay(&self, outcome: &PollOutcome, interval: Duration) -> Duration {
        let retry = &self.config.retry;
        match outcome {
            PollOutcome::Success(_) => interval,
            PollOutcome::Failed(_) => {
                let failures = self.state.borrow().consecutive_failures;
                let base = retry.backoff(failures);
                if retry.jitter_ms == 0 {
                    return base;
                }
                let jitter = self
                    .rng
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .gen_range(0..=retry.jitter_ms);
                base + Duration::from_millis(jitter)
            }
        }
    }

    /// Starts the scheduler. `None` when automatic polling is disabled.
    pub fn spawn(self: &Arc<Self>) -> Option<PollerHandle> {
        let interval = self.config.update_interval()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(coordinator.run_scheduler(interval, shutdown_rx));
        log::info!("polling {} every {:?}", self.config.device_path, interval);
        Some(PollerHandle { shutdown, task })
    }

    async fn run_scheduler(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let outcome = tokio::select! {
                outcome = self.poll(Trigger::Scheduled) => outcome,
                _ = shutdown.changed() => break,
            };

            let delay = self.next_delay(&outcome, interval);
            log::debug!("next poll in {delay:?}");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.transport.lock().await.close().await;
        log::debug!("scheduler for {} stopped", self.config.device_path);
    }
}

/// Handle to a running scheduler task. Dropping it also stops the scheduler.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops the scheduler, abandoning a poll in flight, and waits for the task to end.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::error!("scheduler task failed: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbus::serial_mock::MockTransport;

    fn coordinator(mock: &MockTransport) -> MeterCoordinator {
        let mut config = MeterConfig::new("/dev/mock");
        config.retry.jitter_ms = 0;
        MeterCoordinator::new(config, Box::new(mock.clone())).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let state = PollState::default();
        assert!(state.last_snapshot.is_none());
        assert_eq!(state.availability, Availability::Unavailable);
        assert_eq!(state.phase, PollPhase::Idle);
        assert!(!state.needs_attention());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MeterConfig::new("");
        config.update_interval_seconds = 5;
        assert!(MeterCoordinator::new(config, Box::new(MockTransport::new())).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays() {
        let mock = MockTransport::new();
        let coordinator = coordinator(&mock);
        let interval = Duration::from_secs(60);

        let outcome = coordinator.refresh().await;
        assert!(!outcome.is_success());
        assert_eq!(
            coordinator.next_delay(&outcome, interval),
            Duration::from_secs(5)
        );

        let outcome = coordinator.refresh().await;
        assert_eq!(
            coordinator.next_delay(&outcome, interval),
            Duration::from_secs(10)
        );

        // a missing device backs off like any other failure
        let actionable = PollOutcome::Failed(MBusError::DeviceNotFound("/dev/mock".into()));
        assert_eq!(
            coordinator.next_delay(&actionable, interval),
            Duration::from_secs(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_is_bounded() {
        let mock = MockTransport::new();
        let mut config = MeterConfig::new("/dev/mock");
        config.retry.jitter_ms = 500;
        let coordinator = MeterCoordinator::new(config, Box::new(mock))
            .unwrap()
            .with_seed(7);

        let outcome = coordinator.refresh().await;
        let delay = coordinator.next_delay(&outcome, Duration::from_secs(60));
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5_500));
    }
}
