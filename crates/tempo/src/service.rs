use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pulse_domain::BpmResult;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::AnalysisError;
use crate::pipeline::AnalysisPipeline;

/// Observable state of the tempo detector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionState {
    pub is_analyzing: bool,
    /// In `[0, 1]`, never decreasing within one request.
    pub progress: f32,
    pub result: Option<BpmResult>,
    pub error: Option<String>,
    /// Request this state belongs to; 0 before the first submission.
    pub request_id: u64,
}

/// Writes state on behalf of one request; ignored once that request is no
/// longer the active one.
struct Publisher {
    state: Arc<watch::Sender<DetectionState>>,
    request_id: u64,
}

impl Publisher {
    fn update(&self, apply: impl FnOnce(&mut DetectionState) -> bool) -> bool {
        self.state.send_if_modified(|state| {
            if state.request_id != self.request_id || !state.is_analyzing {
                return false;
            }
            apply(state)
        })
    }

    fn progress(&self, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        self.update(|state| {
            if progress > state.progress {
                state.progress = progress;
                true
            } else {
                false
            }
        });
    }

    fn finish(&self, outcome: Result<BpmResult, AnalysisError>) {
        let published = match outcome {
            Ok(result) => self.update(|state| {
                state.is_analyzing = false;
                state.progress = 1.0;
                state.result = Some(result);
                state.error = None;
                true
            }),
            Err(AnalysisError::Cancelled) => false,
            Err(err) => {
                let message = err.to_string();
                self.update(|state| {
                    state.is_analyzing = false;
                    state.result = None;
                    state.error = Some(message);
                    true
                })
            }
        };
        if !published {
            debug!(request = self.request_id, "dropping superseded analysis outcome");
        }
    }
}

/// Runs at most one analysis at a time on the runtime's blocking pool.
///
/// Submitting while an analysis is in flight cancels it; the superseded
/// request never writes to the published state again.
pub struct AnalysisService {
    runtime: Handle,
    pipeline: Arc<AnalysisPipeline>,
    state: Arc<watch::Sender<DetectionState>>,
    next_id: AtomicU64,
    active: Mutex<Option<CancellationToken>>,
}

impl AnalysisService {
    pub fn new(runtime: Handle) -> Self {
        Self::with_pipeline(runtime, AnalysisPipeline::new())
    }

    pub fn with_pipeline(runtime: Handle, pipeline: AnalysisPipeline) -> Self {
        let (state, _) = watch::channel(DetectionState::default());
        Self {
            runtime,
            pipeline: Arc::new(pipeline),
            state: Arc::new(state),
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    /// Starts analysing `path` and returns the new request id.
    pub fn submit(&self, path: impl Into<PathBuf>) -> u64 {
        let path = path.into();
        let token = CancellationToken::new();
        let request_id = {
            let mut active = self.active.lock();
            if let Some(previous) = active.replace(token.clone()) {
                previous.cancel();
            }
            let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.state.send_replace(DetectionState {
                is_analyzing: true,
                request_id,
                ..DetectionState::default()
            });
            request_id
        };
        info!(request = request_id, path = ?path, "tempo analysis submitted");

        let publisher = Publisher {
            state: Arc::clone(&self.state),
            request_id,
        };
        let pipeline = Arc::clone(&self.pipeline);
        self.runtime.spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                pipeline.analyze(&path, &token, &mut |p| publisher.progress(p))
            }));
            match outcome {
                Ok(outcome) => publisher.finish(outcome),
                Err(_) => {
                    warn!(request = request_id, "tempo analysis panicked");
                    publisher.finish(Err(AnalysisError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "analysis panicked",
                    ))));
                }
            }
        });
        request_id
    }

    /// Cancels any in-flight analysis and returns to the idle state.
    pub fn cancel(&self) {
        let mut active = self.active.lock();
        if let Some(token) = active.take() {
            token.cancel();
        }
        self.state.send_modify(|state| {
            *state = DetectionState {
                request_id: state.request_id,
                ..DetectionState::default()
            };
        });
    }

    /// Forgets the last result or error; an analysis in flight is untouched.
    pub fn clear_result(&self) {
        self.state.send_if_modified(|state| {
            if state.is_analyzing || (state.result.is_none() && state.error.is_none()) {
                return false;
            }
            state.result = None;
            state.error = None;
            state.progress = 0.0;
            true
        });
    }

    pub fn state(&self) -> DetectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetectionState> {
        self.state.subscribe()
    }

    /// Resolves once no analysis is running.
    pub async fn wait_idle(&self) -> DetectionState {
        let mut receiver = self.subscribe();
        let idle = match receiver.wait_for(|state| !state.is_analyzing).await {
            Ok(state) => Some((*state).clone()),
            Err(_) => None,
        };
        idle.unwrap_or_else(|| self.state())
    }
}

impl Drop for AnalysisService {
    fn drop(&mut self) {
        if let Some(token) = self.active.get_mut().take() {
            token.cancel();
        }
    }
}
