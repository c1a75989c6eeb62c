//! Session layer: tick fusion, countdown, live runtime, replay and statistics.

pub mod countdown;
pub mod monitor;
pub mod pipeline;
pub mod replay;
pub mod stats;

// Re-export commonly used types
pub use countdown::NapCountdown;
pub use monitor::{compute_baselines, Collaborators, Monitor};
pub use pipeline::{NapPipeline, TickOutcome, WakeRequest};
pub use replay::{replay, ReplayInput, ReplayLog, ReplayOutcome};
pub use stats::{SessionStats, SessionSummary, SharedSessionStats, StatsSnapshot};
