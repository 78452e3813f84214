//! Episode session controller
//!
//! Wires baseline tracking, trigger and recovery detection and the pulse
//! scheduler into one state machine:
//!
//! ```text
//! Idle -> Triggered -> { Recovered | Aborted } -> Idle
//! ```
//!
//! All per-sample state lives inside a single run task. The handle talks to it
//! only through a cancellation token, and receives the monitoring state back
//! when the task ends, so a later `start()` resumes with the same baseline.

use crate::baseline::BaselineTracker;
use crate::config::EntrainmentConfig;
use crate::error::{EntrainError, FeedError};
use crate::events::EventBus;
use crate::haptics::{HapticActuator, PulseScheduler, PulseTiming};
use crate::recovery::RecoveryDetector;
use crate::sink::EpisodeSink;
use crate::trigger::{Trigger, TriggerDetector};
use crate::types::{
    AbortReason, AnxietyEpisode, AnxietySample, Baseline, ControllerStatus, EntrainmentEvent,
    EpisodeOutcome, FeedStatus, PulseStats, SessionState,
};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sample feed consumed by the controller
pub type SampleFeed = BoxStream<'static, Result<AnxietySample, FeedError>>;

/// Detection state that outlives a single run of the controller
#[derive(Debug, Clone)]
struct Monitor {
    tracker: BaselineTracker,
    detector: TriggerDetector,
    recovery: RecoveryDetector,
}

impl Monitor {
    fn new(config: &EntrainmentConfig) -> Self {
        Self {
            tracker: BaselineTracker::new(config.baseline_window, config.min_samples_for_baseline),
            detector: TriggerDetector::from_config(config),
            recovery: RecoveryDetector::new(config.min_recovery_time),
        }
    }
}

/// Book-keeping for the episode in progress
#[derive(Debug, Clone)]
struct ActiveSession {
    id: Uuid,
    trigger: Trigger,
    started: Instant,
    deadline: Instant,
    max_hr: u32,
    min_hrv: f64,
}

impl ActiveSession {
    fn observe(&mut self, sample: &AnxietySample) {
        self.max_hr = self.max_hr.max(sample.hr);
        self.min_hrv = self.min_hrv.min(sample.hrv);
    }

    /// Baseline the triggering sample was judged against
    fn reference(&self) -> &Baseline {
        &self.trigger.baseline
    }

    /// End of the episode on the sample timeline, `duration` after the trigger
    fn end_time(&self, duration: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.trigger.at.checked_add_signed(d))
            .unwrap_or(self.trigger.at)
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<Monitor>,
}

struct Lifecycle {
    monitor: Option<Monitor>,
    running: Option<Running>,
}

/// Anxiety-triggered haptic entrainment controller.
///
/// `start()` attaches a sample feed and an actuator and spawns the run task;
/// `stop()` cancels it. Both are idempotent. Lifecycle events are published on
/// [`subscribe`](Self::subscribe) and completed episodes go to the sink.
pub struct EntrainmentController {
    config: Arc<EntrainmentConfig>,
    timing: PulseTiming,
    events: EventBus,
    status: Arc<watch::Sender<ControllerStatus>>,
    sink: Arc<dyn EpisodeSink>,
    lifecycle: Mutex<Lifecycle>,
}

impl EntrainmentController {
    /// Build a controller, rejecting invalid configuration
    pub fn new(
        config: EntrainmentConfig,
        sink: impl EpisodeSink + 'static,
    ) -> Result<Self, EntrainError> {
        config.validate()?;

        let timing = PulseTiming::from_cadence(config.target_cadence_bpm, config.duty_cycle);
        let monitor = Monitor::new(&config);
        let (status, _) = watch::channel(ControllerStatus::default());

        Ok(Self {
            config: Arc::new(config),
            timing,
            events: EventBus::default(),
            status: Arc::new(status),
            sink: Arc::new(sink),
            lifecycle: Mutex::new(Lifecycle {
                monitor: Some(monitor),
                running: None,
            }),
        })
    }

    /// Replace the event bus, e.g. to change its capacity
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EntrainmentConfig {
        &self.config
    }

    /// Pulse timing derived from the configured cadence and duty cycle
    pub fn pulse_timing(&self) -> PulseTiming {
        self.timing
    }

    /// Subscribe to lifecycle events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EntrainmentEvent> {
        self.events.subscribe()
    }

    /// Watch controller status (running flag, state, feed, baseline)
    pub fn watch_status(&self) -> watch::Receiver<ControllerStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn is_running(&self) -> bool {
        self.status.borrow().running
    }

    /// Start monitoring `feed`, pulsing `actuator` when triggered.
    ///
    /// Returns `false` without effect if already running; the feed is dropped.
    pub async fn start<S>(&self, feed: S, actuator: Arc<dyn HapticActuator>) -> bool
    where
        S: Stream<Item = Result<AnxietySample, FeedError>> + Send + 'static,
    {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            debug!("Controller already running");
            return false;
        }

        let monitor = lifecycle
            .monitor
            .take()
            .unwrap_or_else(|| Monitor::new(&self.config));

        let cancel = CancellationToken::new();
        let runner = SessionRunner {
            config: Arc::clone(&self.config),
            timing: self.timing,
            monitor,
            active: None,
            scheduler: PulseScheduler::new(),
            actuator,
            events: self.events.clone(),
            status: Arc::clone(&self.status),
            sink: Arc::clone(&self.sink),
        };

        self.status.send_modify(|s| {
            s.running = true;
            s.state = SessionState::Idle;
            s.feed = FeedStatus::Live;
            s.pulses = PulseStats::default();
        });

        let handle = tokio::spawn(runner.run(feed.boxed(), cancel.clone()));
        lifecycle.running = Some(Running { cancel, handle });

        info!(
            cadence_bpm = self.config.target_cadence_bpm,
            on_ms = self.timing.on.as_millis() as u64,
            off_ms = self.timing.off.as_millis() as u64,
            "Entrainment controller started"
        );
        true
    }

    /// Stop monitoring, halting any actuation and returning to idle.
    ///
    /// An episode in progress is dropped without a terminal event. Returns
    /// `false` if the controller was not running.
    pub async fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            return false;
        };

        running.cancel.cancel();
        let monitor = match running.handle.await {
            Ok(monitor) => monitor,
            Err(e) => {
                error!(error = %e, "Session run task failed; resetting detection state");
                Monitor::new(&self.config)
            }
        };
        lifecycle.monitor = Some(monitor);

        self.status.send_modify(|s| {
            s.running = false;
            s.state = SessionState::Idle;
            s.feed = FeedStatus::Idle;
        });

        info!("Entrainment controller stopped");
        true
    }

    /// Serialize the baseline window so it can be restored later
    pub async fn export_baseline(&self) -> Result<String, EntrainError> {
        let lifecycle = self.lifecycle.lock().await;
        match &lifecycle.monitor {
            Some(monitor) if lifecycle.running.is_none() => Ok(monitor.tracker.to_json()?),
            _ => Err(EntrainError::ControllerRunning),
        }
    }

    /// Restore a baseline window exported earlier.
    ///
    /// The configured window and minimum sample count take precedence over the
    /// ones stored in `json`.
    pub async fn restore_baseline(&self, json: &str) -> Result<(), EntrainError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            return Err(EntrainError::ControllerRunning);
        }

        let mut tracker = BaselineTracker::from_json(json)?;
        tracker.set_limits(
            self.config.baseline_window,
            self.config.min_samples_for_baseline,
        );
        let baseline = tracker.current_baseline();

        let monitor = lifecycle
            .monitor
            .get_or_insert_with(|| Monitor::new(&self.config));
        monitor.tracker = tracker;
        self.status.send_modify(|s| s.baseline = baseline);
        Ok(())
    }
}

impl Drop for EntrainmentController {
    fn drop(&mut self) {
        if let Some(running) = &self.lifecycle.get_mut().running {
            running.cancel.cancel();
        }
    }
}

/// Owns all mutable session state for one run of the controller
struct SessionRunner {
    config: Arc<EntrainmentConfig>,
    timing: PulseTiming,
    monitor: Monitor,
    active: Option<ActiveSession>,
    scheduler: PulseScheduler,
    actuator: Arc<dyn HapticActuator>,
    events: EventBus,
    status: Arc<watch::Sender<ControllerStatus>>,
    sink: Arc<dyn EpisodeSink>,
}

impl SessionRunner {
    async fn run(mut self, mut feed: SampleFeed, cancel: CancellationToken) -> Monitor {
        let mut feed_open = true;

        loop {
            let deadline = self.active.as_ref().map(|s| s.deadline);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = wait_until(deadline) => self.abort().await,
                item = feed.next(), if feed_open => match item {
                    Some(Ok(sample)) => self.handle_sample(sample).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "Sample feed failed; waiting for stop");
                        feed_open = false;
                        self.status.send_modify(|s| s.feed = FeedStatus::Failed(e.to_string()));
                    }
                    None => {
                        info!("Sample feed ended; waiting for stop");
                        feed_open = false;
                        self.status.send_modify(|s| s.feed = FeedStatus::Ended);
                    }
                },
            }
        }

        self.shutdown().await;
        self.monitor
    }

    async fn handle_sample(&mut self, sample: AnxietySample) {
        self.monitor.tracker.ingest(sample);
        let baseline = self.monitor.tracker.current_baseline();
        self.status.send_modify(|s| s.baseline = baseline);

        if self.active.is_none() {
            if let Some(trigger) = self.monitor.detector.evaluate(&sample, baseline.as_ref()) {
                self.begin(sample, trigger);
            }
            return;
        }
        let Some(session) = self.active.as_mut() else {
            return;
        };

        session.observe(&sample);
        let anxious = self
            .monitor
            .detector
            .thresholds()
            .is_anxious(&sample, session.reference());
        debug!(hr = sample.hr, hrv = sample.hrv, anxious, "Session sample");
        self.publish_pulse_stats();

        if let Some(stabilized) = self.monitor.recovery.observe(sample.timestamp, anxious) {
            self.recover(sample.timestamp, stabilized).await;
        }
    }

    fn begin(&mut self, sample: AnxietySample, trigger: Trigger) {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.config.max_session_duration)
            .unwrap_or_else(|| started + Duration::from_secs(365 * 24 * 60 * 60));

        self.active = Some(ActiveSession {
            id: Uuid::new_v4(),
            trigger,
            started,
            deadline,
            max_hr: sample.hr,
            min_hrv: sample.hrv,
        });
        self.monitor.recovery.reset();
        self.scheduler.start(Arc::clone(&self.actuator), self.timing);
        self.set_state(SessionState::Triggered);

        info!(
            reason = trigger.reason.as_str(),
            hr = sample.hr,
            hrv = sample.hrv,
            baseline_hr = trigger.baseline.hr,
            baseline_hrv = trigger.baseline.hrv,
            "Anxiety episode triggered"
        );
        self.events.emit(EntrainmentEvent::Triggered {
            at: trigger.at,
            reason: trigger.reason,
            hr_value: sample.hr,
            hrv_value: sample.hrv,
        });
    }

    async fn recover(&mut self, at: DateTime<Utc>, stabilized_for: Duration) {
        let Some(session) = self.active.take() else {
            return;
        };
        self.scheduler.stop().await;
        self.publish_pulse_stats();

        // A batched feed can carry more sample time than the abort timer saw
        let session_duration = (at - session.trigger.at)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(self.config.max_session_duration);
        let at = session.end_time(session_duration);
        self.set_state(SessionState::Recovered);
        info!(
            stabilized_ms = stabilized_for.as_millis() as u64,
            session_ms = session_duration.as_millis() as u64,
            "Anxiety episode recovered"
        );
        self.events.emit(EntrainmentEvent::Recovered {
            at,
            stabilized_for,
            session_duration,
        });

        self.log_episode(&session, at, session_duration, EpisodeOutcome::Recovered);
        self.set_state(SessionState::Idle);
    }

    async fn abort(&mut self) {
        let Some(session) = self.active.take() else {
            return;
        };
        self.scheduler.stop().await;
        self.publish_pulse_stats();

        let session_duration = session.started.elapsed();
        let at = session.end_time(session_duration);
        self.set_state(SessionState::Aborted);
        warn!(
            session_ms = session_duration.as_millis() as u64,
            "Anxiety episode aborted at max session duration"
        );
        self.events.emit(EntrainmentEvent::Aborted {
            at,
            reason: AbortReason::MaxDuration,
            session_duration,
        });

        self.log_episode(&session, at, session_duration, EpisodeOutcome::Aborted);
        self.set_state(SessionState::Idle);
    }

    fn log_episode(
        &self,
        session: &ActiveSession,
        end_time: DateTime<Utc>,
        duration: Duration,
        outcome: EpisodeOutcome,
    ) {
        let episode = AnxietyEpisode {
            id: session.id,
            start_time: session.trigger.at,
            end_time,
            duration,
            max_hr: session.max_hr,
            min_hrv: session.min_hrv,
            cadence_bpm: self.config.target_cadence_bpm,
            reason: session.trigger.reason,
            outcome,
        };

        if let Err(e) = self.sink.record(&episode) {
            warn!(episode_id = %episode.id, error = %e, "Episode sink failed");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(session) = self.active.take() {
            info!(episode_id = %session.id, "Discarding active episode on stop");
        }
        self.scheduler.stop().await;
        self.publish_pulse_stats();
        self.set_state(SessionState::Idle);
    }

    fn publish_pulse_stats(&self) {
        let stats = self.scheduler.stats();
        self.status.send_modify(|s| s.pulses = stats);
    }

    fn set_state(&self, state: SessionState) {
        self.status.send_modify(|s| s.state = state);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
