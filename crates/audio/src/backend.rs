use std::time::Duration;

use anyhow::Result;
use pulse_domain::ClickEvent;
use tracing::trace;

/// Plays metronome clicks.
///
/// Called from the scheduler thread once per tick, so implementations must
/// return quickly. Errors are logged by the caller and never stop the clock.
pub trait ClickOutput: Send + Sync {
    fn play(&self, event: &ClickEvent) -> Result<()>;

    fn measure_latency(&self) -> Result<Duration> {
        Ok(Duration::from_millis(5))
    }
}

/// Output that discards every click; used for silent runs and tests.
pub struct NullOutput;

impl ClickOutput for NullOutput {
    fn play(&self, event: &ClickEvent) -> Result<()> {
        trace!(
            beat = event.beat_index,
            subdivision = event.subdivision_index,
            "discarding click"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_domain::{MetronomeConfig, MetronomePhase};

    #[test]
    fn null_output_accepts_clicks() {
        let output = NullOutput;
        let event = ClickEvent::new(MetronomePhase::START, &MetronomeConfig::default());
        assert!(output.play(&event).is_ok());
        assert_eq!(output.measure_latency().unwrap(), Duration::from_millis(5));
    }
}
