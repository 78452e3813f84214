//! Haptic actuation
//!
//! The actuator contract, cadence-to-pulse timing, and the pulse scheduler that
//! drives an actuator in a cancellable loop while a session is active.

use crate::error::ActuatorError;
use crate::types::PulseStats;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Haptic motor capability injected by the host
#[async_trait]
pub trait HapticActuator: Send + Sync {
    /// Drive one pulse: on for `on`, then rest for `off`. Resolves when the cycle is done.
    async fn pulse_once(&self, on: Duration, off: Duration) -> Result<(), ActuatorError>;

    /// Halt the motor. Must succeed or be a no-op.
    async fn stop(&self);
}

/// On/off split of one pulse cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    pub on: Duration,
    pub off: Duration,
}

impl PulseTiming {
    /// Derive timing from a cadence in pulses per minute.
    ///
    /// The cycle lasts `60000 / cadence` ms and is split by `duty_cycle`, rounded
    /// to whole milliseconds. Cadence 60 at duty 0.5 gives 500 ms on, 500 ms off.
    pub fn from_cadence(cadence_bpm: f64, duty_cycle: f64) -> Self {
        let cycle_ms = (60_000.0 / cadence_bpm).round().max(0.0) as u64;
        let on_ms = ((60_000.0 / cadence_bpm) * duty_cycle).round().max(0.0) as u64;
        let on_ms = on_ms.min(cycle_ms);

        Self {
            on: Duration::from_millis(on_ms),
            off: Duration::from_millis(cycle_ms - on_ms),
        }
    }

    pub fn cycle(&self) -> Duration {
        self.on + self.off
    }
}

/// Pulse counters, readable while the loop runs
#[derive(Debug, Default)]
struct PulseCounters {
    pulses: AtomicU64,
    failures: AtomicU64,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    actuator: Arc<dyn HapticActuator>,
}

/// Drives a haptic actuator in a repeating loop until stopped
#[derive(Default)]
pub struct PulseScheduler {
    running: Option<RunningLoop>,
    counters: Arc<PulseCounters>,
}

impl PulseScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin pulsing. Returns `false` without effect if already running.
    pub fn start(&mut self, actuator: Arc<dyn HapticActuator>, timing: PulseTiming) -> bool {
        if self.running.is_some() {
            debug!("Pulse loop already running");
            return false;
        }

        info!(
            on_ms = timing.on.as_millis() as u64,
            off_ms = timing.off.as_millis() as u64,
            "Starting pulse loop"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pulse_loop(
            Arc::clone(&actuator),
            timing,
            cancel.clone(),
            Arc::clone(&self.counters),
        ));

        self.running = Some(RunningLoop {
            cancel,
            handle,
            actuator,
        });
        true
    }

    /// Stop pulsing and halt the actuator.
    ///
    /// Once this returns no further pulse is issued. Returns `false` if nothing
    /// was running.
    pub async fn stop(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Pulse loop ended abnormally");
        }
        running.actuator.stop().await;

        let stats = self.stats();
        info!(
            pulses = stats.pulses,
            failures = stats.failures,
            "Pulse loop stopped"
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn stats(&self) -> PulseStats {
        PulseStats {
            pulses: self.counters.pulses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PulseScheduler {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

async fn pulse_loop(
    actuator: Arc<dyn HapticActuator>,
    timing: PulseTiming,
    cancel: CancellationToken,
    counters: Arc<PulseCounters>,
) {
    loop {
        let cycle_end = Instant::now() + timing.cycle();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = actuator.pulse_once(timing.on, timing.off) => result,
        };

        match result {
            Ok(()) => {
                counters.pulses.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let failures = counters.failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, failures, "Haptic pulse failed, continuing");

                // Rest out whatever is left of the cycle
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(cycle_end) => {}
                }
            }
        }
    }
}

/// Actuator that logs pulses instead of driving hardware
#[derive(Debug, Default, Clone)]
pub struct LoggingActuator;

#[async_trait]
impl HapticActuator for LoggingActuator {
    async fn pulse_once(&self, on: Duration, off: Duration) -> Result<(), ActuatorError> {
        debug!(on_ms = on.as_millis() as u64, "Pulse on");
        tokio::time::sleep(on).await;
        debug!(off_ms = off.as_millis() as u64, "Pulse off");
        tokio::time::sleep(off).await;
        Ok(())
    }

    async fn stop(&self) {
        debug!("Actuator stopped");
    }
}
