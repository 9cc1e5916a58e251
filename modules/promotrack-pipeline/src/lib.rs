pub mod acquirer;
pub mod classifier;
pub mod error;
pub mod forecaster;
pub mod notify;
pub mod orchestrator;
pub mod retry;
pub mod run_log;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use acquirer::{AcquiredContent, Acquirer, DirectFetcher, HttpFetcher, RenderService};
pub use classifier::{Classification, Classifier, PromotionModel};
pub use error::{AcquireError, RunError, StageError};
pub use notify::{LogNotifier, NoopNotifier, ReviewNotifier, ReviewRequest};
pub use orchestrator::{Orchestrator, PipelineDeps, PipelineState, RunSettings, RunSummary};
pub use retry::RetryPolicy;
