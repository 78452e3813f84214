//! Synheart Entrain - On-device anxiety-triggered haptic breathing entrainment
//!
//! Entrain watches a live heart rate / HRV feed, detects anxiety-indicative
//! deviations from a personal baseline, and paces the user's breathing with a
//! haptic pulse pattern until the signal normalizes or a safety timeout fires:
//! baseline tracking → trigger detection → pulse scheduling → recovery detection.
//!
//! ## Modules
//!
//! - **Detection**: [`baseline`], [`trigger`], [`recovery`]
//! - **Actuation**: [`haptics`]
//! - **Orchestration**: [`session`], with [`events`] and [`sink`] as its outputs

pub mod baseline;
pub mod config;
pub mod error;
pub mod events;
pub mod haptics;
pub mod recovery;
pub mod session;
pub mod sink;
pub mod trigger;
pub mod types;

pub use baseline::BaselineTracker;
pub use config::EntrainmentConfig;
pub use error::{ActuatorError, EntrainError, FeedError};
pub use events::EventBus;
pub use haptics::{HapticActuator, PulseScheduler, PulseTiming};
pub use session::{EntrainmentController, SampleFeed};
pub use sink::{EpisodeSink, JsonLinesEpisodeSink, MemoryEpisodeSink};
pub use types::{
    AnxietyEpisode, AnxietySample, Baseline, ControllerStatus, EntrainmentEvent, FeedStatus,
    PulseStats, SessionState, TriggerReason,
};

/// Entrain version
pub const ENTRAIN_VERSION: &str = env!("CARGO_PKG_VERSION");
