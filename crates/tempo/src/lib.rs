pub mod cancel;
pub mod energy;
pub mod error;
pub mod estimator;
pub mod pipeline;
pub mod service;

pub use cancel::CancellationToken;
pub use energy::EnergyPeakEstimator;
pub use error::AnalysisError;
pub use estimator::TempoEstimator;
pub use pipeline::AnalysisPipeline;
pub use service::{AnalysisService, DetectionState};
