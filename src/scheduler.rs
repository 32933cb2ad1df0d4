//! Interval scheduler driving probes from a single control loop.
//!
//! Every registered probe carries its own interval. The loop wakes up every
//! `min_interval` (the smallest registered interval), runs the probes that
//! are due in registration order and goes back to sleep. Probes are never
//! run concurrently.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::probe::{ProbeError, Runnable};

/// Errors raised by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A probe was registered with a zero interval.
    #[error("interval of '{name}' must be greater than zero")]
    InvalidInterval { name: String },

    /// A probe failed while running; the loop stopped.
    #[error("probe '{name}' failed: {source}")]
    Probe {
        name: String,
        #[source]
        source: ProbeError,
    },
}

/// A probe registered with the scheduler.
pub struct ScheduledProbeEntry {
    probe: Box<dyn Runnable>,
    interval: Duration,
    next_due: Option<Instant>,
    runs: u64,
}

impl ScheduledProbeEntry {
    fn new(probe: Box<dyn Runnable>, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            next_due: None,
            runs: 0,
        }
    }

    /// Label of the underlying probe.
    pub fn label(&self) -> &str {
        self.probe.label()
    }

    /// Time between two runs.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the probe is next due, `None` before its first run.
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Number of successful runs.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Whether the probe is due at `now`.
    pub fn should_run(&self, now: Instant) -> bool {
        self.next_due.is_none_or(|due| due <= now)
    }

    /// Run the probe and schedule its next run one interval from `now`.
    async fn run(&mut self, now: Instant) -> Result<(), SchedulerError> {
        let started = std::time::Instant::now();
        self.probe
            .run()
            .await
            .map_err(|source| SchedulerError::Probe {
                name: self.probe.label().to_string(),
                source,
            })?;
        self.next_due = Some(now + self.interval);
        self.runs += 1;

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(probe = %self.label(), runs = self.runs, duration_ms, "Probe ran");
        Ok(())
    }
}

impl std::fmt::Debug for ScheduledProbeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledProbeEntry")
            .field("label", &self.label())
            .field("interval", &self.interval)
            .field("next_due", &self.next_due)
            .field("runs", &self.runs)
            .finish()
    }
}

/// Runs registered probes at their intervals.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use pimetrics::Scheduler;
/// use pimetrics::probe::file::FileProbe;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let mut scheduler = Scheduler::new();
/// scheduler.register(FileProbe::new("/proc/loadavg")?, Duration::from_secs(5))?;
/// scheduler.run_for(Duration::from_secs(60)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: Vec<ScheduledProbeEntry>,
    min_interval: Option<Duration>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `probe` to run every `interval`.
    ///
    /// # Errors
    /// Returns `SchedulerError::InvalidInterval` for a zero interval.
    pub fn register<R>(&mut self, probe: R, interval: Duration) -> Result<(), SchedulerError>
    where
        R: Runnable + 'static,
    {
        self.register_boxed(Box::new(probe), interval)
    }

    /// Register an already boxed probe.
    pub fn register_boxed(
        &mut self,
        probe: Box<dyn Runnable>,
        interval: Duration,
    ) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval {
                name: probe.label().to_string(),
            });
        }

        tracing::info!(probe = %probe.label(), interval = ?interval, "Probe registered");
        self.min_interval = Some(self.min_interval.map_or(interval, |min| min.min(interval)));
        self.entries.push(ScheduledProbeEntry::new(probe, interval));
        Ok(())
    }

    /// Smallest registered interval.
    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    /// Registered probes in registration order.
    pub fn entries(&self) -> &[ScheduledProbeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the scheduling loop.
    ///
    /// With `once`, every probe runs exactly once regardless of whether it
    /// is due. Otherwise the loop runs due probes until `duration` has
    /// elapsed, or forever when `duration` is `None`. The end time is only
    /// checked after a complete pass.
    ///
    /// # Errors
    /// Returns `SchedulerError::Probe` as soon as a probe fails.
    pub async fn run(&mut self, once: bool, duration: Option<Duration>) -> Result<(), SchedulerError> {
        let Some(min_interval) = self.min_interval else {
            tracing::debug!("No probes registered, nothing to run");
            return Ok(());
        };

        let end_time = duration.map(|d| Instant::now() + d);
        tracing::info!(
            probes = self.entries.len(),
            min_interval = ?min_interval,
            once,
            duration = ?duration,
            "Scheduler started"
        );

        loop {
            let now = Instant::now();
            let next_wakeup = now + min_interval;

            for entry in &mut self.entries {
                if once || entry.should_run(now) {
                    entry.run(now).await.inspect_err(|e| {
                        tracing::error!(error = %e, "Scheduler stopped");
                    })?;
                }
            }

            if once || end_time.is_some_and(|end| Instant::now() >= end) {
                break;
            }
            tokio::time::sleep_until(next_wakeup).await;
        }

        tracing::info!("Scheduler finished");
        Ok(())
    }

    /// Run every probe exactly once.
    pub async fn run_once(&mut self) -> Result<(), SchedulerError> {
        self.run(true, None).await
    }

    /// Run due probes until `duration` has elapsed.
    pub async fn run_for(&mut self, duration: Duration) -> Result<(), SchedulerError> {
        self.run(false, Some(duration)).await
    }

    /// Run due probes until a probe fails.
    pub async fn run_forever(&mut self) -> Result<(), SchedulerError> {
        self.run(false, None).await
    }
}
