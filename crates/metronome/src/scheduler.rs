use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use pulse_audio::ClickOutput;
use pulse_domain::{
    BeatNotice, ClickEvent, ClickStyle, MetronomeConfig, MetronomePhase, Subdivision,
};
use tracing::{debug, info, trace, warn};

use crate::sequencer::Sequencer;
use crate::tap::TapTempoTracker;

/// Invoked on the scheduler thread once per tick. Must not block.
pub type BeatCallback = Box<dyn Fn(BeatNotice) + Send + Sync>;

type SharedCallback = Arc<dyn Fn(BeatNotice) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

struct Shared {
    config: RwLock<MetronomeConfig>,
    /// Packed [`MetronomePhase`] of the most recent click.
    phase: AtomicU64,
    /// Bumped on every start and stop; a worker whose generation is stale
    /// no longer touches the phase. Held by the worker for a whole tick, so
    /// once `stop` returns no further click is emitted. Reentrant because the
    /// beat callback may call `stop` from inside the tick.
    ///
    /// Lock order: `generation` before `worker`.
    generation: ReentrantMutex<Cell<u64>>,
    output: RwLock<Arc<dyn ClickOutput>>,
    callback: RwLock<Option<SharedCallback>>,
    subscribers: Mutex<Vec<Sender<ClickEvent>>>,
}

impl Shared {
    fn store_phase(&self, phase: MetronomePhase) {
        self.phase.store(phase.to_bits(), Ordering::Release);
    }

    fn emit(&self, event: &ClickEvent, failures: &mut u64) {
        trace!(
            beat = event.beat_index,
            subdivision = event.subdivision_index,
            accent = event.is_accent,
            "tick"
        );

        let output = self.output.read().clone();
        match catch_unwind(AssertUnwindSafe(|| output.play(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                *failures += 1;
                if *failures == 1 {
                    warn!(%err, "click output failed, continuing without sound");
                } else {
                    debug!(%err, failures = *failures, "click output failed");
                }
            }
            Err(_) => warn!("click output panicked"),
        }

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            let notice = event.notice();
            if catch_unwind(AssertUnwindSafe(|| callback(notice))).is_err() {
                warn!("beat callback panicked");
            }
        }

        self.subscribers
            .lock()
            .retain(|subscriber| match subscriber.try_send(*event) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }
}

struct Worker {
    /// Dropping the sender wakes and ends the loop.
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives the click sequence on a dedicated thread.
///
/// All methods return immediately. Setters take effect from the next tick;
/// a wait already in progress is not shortened or stretched.
pub struct MetronomeScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    tap: Mutex<TapTempoTracker>,
    epoch: Instant,
}

impl MetronomeScheduler {
    pub fn new(output: Arc<dyn ClickOutput>) -> Self {
        Self::with_config(MetronomeConfig::default(), output)
    }

    pub fn with_config(config: MetronomeConfig, output: Arc<dyn ClickOutput>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                phase: AtomicU64::new(MetronomePhase::START.to_bits()),
                generation: ReentrantMutex::new(Cell::new(0)),
                output: RwLock::new(output),
                callback: RwLock::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            tap: Mutex::new(TapTempoTracker::new()),
            epoch: Instant::now(),
        }
    }

    /// Starts ticking from (0, 0). No-op while running.
    pub fn start(&self) {
        let current = self.shared.generation.lock();
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let generation = current.get() + 1;
        current.set(generation);
        self.shared.store_phase(MetronomePhase::START);
        let (stop, stopped) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("metronome".into())
            .spawn(move || run_loop(shared, generation, stopped));
        match spawned {
            Ok(handle) => {
                let config = self.config();
                info!(
                    bpm = config.bpm(),
                    beats = config.beats_per_measure(),
                    subdivision = %config.subdivision(),
                    "metronome started"
                );
                *worker = Some(Worker { stop, handle });
            }
            Err(err) => warn!(%err, "failed to spawn metronome thread"),
        }
    }

    /// Stops ticking and resets the phase to (0, 0). No-op while stopped.
    ///
    /// Waits for a click that is being emitted on another thread; no click
    /// reaches the output or the callback after this returns.
    pub fn stop(&self) {
        let current = self.shared.generation.lock();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        current.set(current.get() + 1);
        self.shared.store_phase(MetronomePhase::START);
        drop(current);
        drop(worker.stop);

        let mut retired = self.retired.lock();
        retired.retain(|handle| !handle.is_finished());
        retired.push(worker.handle);
        info!("metronome stopped");
    }

    pub fn toggle(&self) -> SchedulerState {
        if self.is_running() {
            self.stop();
        } else {
            self.start();
        }
        self.state()
    }

    pub fn state(&self) -> SchedulerState {
        if self.worker.lock().is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Position of the click most recently emitted; (0, 0) while stopped.
    pub fn phase(&self) -> MetronomePhase {
        MetronomePhase::from_bits(self.shared.phase.load(Ordering::Acquire))
    }

    pub fn config(&self) -> MetronomeConfig {
        *self.shared.config.read()
    }

    /// Applies several changes as one update.
    pub fn update_config(&self, update: impl FnOnce(&mut MetronomeConfig)) {
        let mut config = self.shared.config.write();
        update(&mut *config);
    }

    pub fn set_bpm(&self, bpm: i64) {
        self.update_config(|config| config.set_bpm(bpm));
    }

    pub fn set_beats_per_measure(&self, beats: i64) {
        self.update_config(|config| config.set_beats_per_measure(beats));
    }

    pub fn set_subdivision(&self, subdivision: Subdivision) {
        self.update_config(|config| config.set_subdivision(subdivision));
    }

    pub fn set_accent_first_beat(&self, accent: bool) {
        self.update_config(|config| config.set_accent_first_beat(accent));
    }

    pub fn set_volume(&self, volume: f32) {
        self.update_config(|config| config.set_volume(volume));
    }

    pub fn set_subdivision_volume(&self, volume: f32) {
        self.update_config(|config| config.set_subdivision_volume(volume));
    }

    pub fn set_latency_offset_ms(&self, offset_ms: i64) {
        self.update_config(|config| config.set_latency_offset_ms(offset_ms));
    }

    pub fn set_click_style(&self, style: ClickStyle) {
        self.update_config(|config| config.set_click_style(style));
    }

    pub fn set_output(&self, output: Arc<dyn ClickOutput>) {
        *self.shared.output.write() = output;
    }

    pub fn set_beat_callback(&self, callback: Option<BeatCallback>) {
        *self.shared.callback.write() = callback.map(SharedCallback::from);
    }

    /// Receives every click event from now on. Events are dropped for a
    /// subscriber whose queue of `capacity` is full.
    pub fn subscribe(&self, capacity: usize) -> Receiver<ClickEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Registers a tap at the current monotonic time.
    pub fn tap_tempo(&self) -> u32 {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.tap_tempo_at(now_ms)
    }

    pub fn tap_tempo_at(&self, now_ms: u64) -> u32 {
        let mut tracker = self.tap.lock();
        let mut config = self.shared.config.write();
        tracker.tap(now_ms, &mut *config)
    }

    pub fn clear_tap_tempo(&self) {
        self.tap.lock().clear();
    }
}

impl Drop for MetronomeScheduler {
    fn drop(&mut self) {
        self.stop();
        let current = thread::current().id();
        for handle in self.retired.get_mut().drain(..) {
            if handle.thread().id() != current && handle.join().is_err() {
                warn!("metronome thread panicked");
            }
        }
    }
}

fn run_loop(shared: Arc<Shared>, generation: u64, stop: Receiver<()>) {
    let mut sequencer = Sequencer::new();
    let mut failures = 0u64;
    let mut deadline = Instant::now();

    loop {
        let config = *shared.config.read();
        let tick = sequencer.next_tick(&config);
        {
            let current = shared.generation.lock();
            if current.get() != generation {
                break;
            }
            shared.store_phase(tick.event.phase());
            shared.emit(&tick.event, &mut failures);
        }

        // Anchored to the previous deadline so per-tick overhead does not
        // accumulate; after a stall the schedule restarts from now.
        deadline = (deadline + tick.wait).max(Instant::now());
        match stop.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(generation, "metronome loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pulse_audio::NullOutput;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    struct FailingOutput;

    impl ClickOutput for FailingOutput {
        fn play(&self, _event: &ClickEvent) -> anyhow::Result<()> {
            Err(anyhow!("device unplugged"))
        }
    }

    struct PanickingOutput;

    impl ClickOutput for PanickingOutput {
        fn play(&self, _event: &ClickEvent) -> anyhow::Result<()> {
            panic!("driver bug");
        }
    }

    #[derive(Default)]
    struct RecordingOutput {
        played: Mutex<Vec<ClickEvent>>,
    }

    impl ClickOutput for RecordingOutput {
        fn play(&self, event: &ClickEvent) -> anyhow::Result<()> {
            self.played.lock().push(*event);
            Ok(())
        }
    }

    fn fast_scheduler(output: Arc<dyn ClickOutput>) -> MetronomeScheduler {
        let mut config = MetronomeConfig::default();
        config.set_bpm(300);
        config.set_subdivision(Subdivision::Sixteenth);
        MetronomeScheduler::with_config(config, output)
    }

    fn collect(rx: &Receiver<ClickEvent>, count: usize) -> Vec<ClickEvent> {
        (0..count)
            .map(|_| rx.recv_timeout(WAIT).expect("tick"))
            .collect()
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let scheduler = MetronomeScheduler::new(Arc::new(NullOutput));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        scheduler.stop();
        assert_eq!(scheduler.phase(), MetronomePhase::START);

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.phase(), MetronomePhase::START);
    }

    #[test]
    fn second_start_keeps_the_sequence() {
        let scheduler = fast_scheduler(Arc::new(NullOutput));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        let mut events = collect(&rx, 2);
        scheduler.start();
        events.extend(collect(&rx, 4));
        scheduler.stop();

        let phases: Vec<(u32, u32)> = events
            .iter()
            .map(|event| (event.beat_index, event.subdivision_index))
            .collect();
        assert_eq!(phases, vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 0), (1, 1)]);
    }

    /// Counts clicks once `play` has finished, which takes a few ms.
    struct SlowOutput {
        finished: std::sync::atomic::AtomicUsize,
        entered: Sender<()>,
    }

    impl ClickOutput for SlowOutput {
        fn play(&self, _event: &ClickEvent) -> anyhow::Result<()> {
            let _ = self.entered.try_send(());
            thread::sleep(Duration::from_millis(5));
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn no_click_completes_after_stop_returns() {
        let (entered, entering) = bounded(1);
        let output = Arc::new(SlowOutput {
            finished: Default::default(),
            entered,
        });
        let scheduler = fast_scheduler(output.clone());
        for _ in 0..5 {
            while entering.try_recv().is_ok() {}
            scheduler.start();
            entering.recv_timeout(WAIT).expect("play entered");
            scheduler.stop();
            let at_stop = output.finished.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(60));
            assert_eq!(output.finished.load(Ordering::SeqCst), at_stop);
        }
    }

    #[test]
    fn callback_may_stop_the_scheduler() {
        let scheduler = Arc::new(fast_scheduler(Arc::new(NullOutput)));
        let (done, stopped) = bounded(1);
        let weak = Arc::downgrade(&scheduler);
        scheduler.set_beat_callback(Some(Box::new(move |_| {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.stop();
                let _ = done.try_send(());
            }
        })));
        scheduler.start();
        stopped.recv_timeout(WAIT).expect("callback stopped");
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.phase(), MetronomePhase::START);
    }

    #[test]
    fn toggle_flips_state() {
        let scheduler = MetronomeScheduler::new(Arc::new(NullOutput));
        assert_eq!(scheduler.toggle(), SchedulerState::Running);
        assert_eq!(scheduler.toggle(), SchedulerState::Stopped);
    }

    #[test]
    fn ticks_walk_the_grid() {
        let output = Arc::new(RecordingOutput::default());
        let scheduler = fast_scheduler(output.clone());
        let rx = scheduler.subscribe(64);
        scheduler.start();
        let events = collect(&rx, 5);
        scheduler.stop();

        let phases: Vec<(u32, u32)> = events
            .iter()
            .map(|event| (event.beat_index, event.subdivision_index))
            .collect();
        assert_eq!(phases, vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 0)]);
        assert!(events[0].is_accent);
        assert!(!events[4].is_accent);
        assert!(output.played.lock().len() >= 5);
    }

    #[test]
    fn restart_begins_at_first_beat() {
        let scheduler = fast_scheduler(Arc::new(NullOutput));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        collect(&rx, 3);
        scheduler.stop();
        while rx.try_recv().is_ok() {}

        scheduler.start();
        let first = rx.recv_timeout(WAIT).expect("tick");
        scheduler.stop();
        assert_eq!(first.phase(), MetronomePhase::START);
    }

    #[test]
    fn failing_output_does_not_stall() {
        let scheduler = fast_scheduler(Arc::new(FailingOutput));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        assert_eq!(collect(&rx, 4).len(), 4);
    }

    #[test]
    fn panicking_output_does_not_stall() {
        let scheduler = fast_scheduler(Arc::new(PanickingOutput));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        assert_eq!(collect(&rx, 4).len(), 4);
    }

    #[test]
    fn callback_sees_every_tick() {
        let scheduler = fast_scheduler(Arc::new(NullOutput));
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = notices.clone();
        scheduler.set_beat_callback(Some(Box::new(move |notice| sink.lock().push(notice))));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        collect(&rx, 4);
        scheduler.stop();

        let notices = notices.lock();
        assert!(notices.len() >= 4);
        assert!(notices[0].is_accent);
        assert!(!notices[0].is_subdivision);
        assert!(notices[1].is_subdivision);
    }

    #[test]
    fn setters_clamp_and_apply_while_running() {
        let scheduler = fast_scheduler(Arc::new(NullOutput));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        scheduler.set_bpm(500);
        scheduler.set_beats_per_measure(0);
        scheduler.set_volume(3.0);
        scheduler.set_subdivision(Subdivision::Quarter);
        collect(&rx, 3);

        let config = scheduler.config();
        assert_eq!(config.bpm(), 300);
        assert_eq!(config.beats_per_measure(), 1);
        assert_eq!(config.volume(), 1.0);
        assert!(scheduler.is_running());
    }

    #[test]
    fn tap_tempo_updates_config() {
        let scheduler = MetronomeScheduler::new(Arc::new(NullOutput));
        scheduler.set_bpm(90);
        assert_eq!(scheduler.tap_tempo_at(0), 90);
        assert_eq!(scheduler.tap_tempo_at(500), 120);
        assert_eq!(scheduler.tap_tempo_at(1000), 120);
        assert_eq!(scheduler.config().bpm(), 120);

        scheduler.clear_tap_tempo();
        assert_eq!(scheduler.tap_tempo_at(1300), 120);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let scheduler = fast_scheduler(Arc::new(NullOutput));
        drop(scheduler.subscribe(4));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        collect(&rx, 2);
        assert_eq!(scheduler.shared.subscribers.lock().len(), 1);
    }

    #[test]
    fn drop_joins_worker() {
        let scheduler = fast_scheduler(Arc::new(NullOutput));
        let rx = scheduler.subscribe(64);
        scheduler.start();
        collect(&rx, 1);
        drop(scheduler);
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
