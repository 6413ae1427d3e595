// Asynchronous analysis jobs

pub mod jobs;
pub mod store;
pub mod workers;

pub use jobs::{AnalysisReport, DocumentSummary, Job, JobId, JobStatus};
pub use store::JobStore;
pub use workers::AnalysisPipeline;
