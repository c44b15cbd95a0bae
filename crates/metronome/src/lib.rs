pub mod scheduler;
pub mod sequencer;
pub mod tap;

pub use scheduler::{BeatCallback, MetronomeScheduler, SchedulerState};
pub use sequencer::{Sequencer, Tick};
pub use tap::{TapTempoTracker, MAX_TAPS, SESSION_GAP_MS};
