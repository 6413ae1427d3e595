use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::queue::{JobId, JobStatus, JobStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jobs: JobStore,
    pub corpus: CorpusStore,
}

// API Request/Response types

#[derive(Debug, serde::Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, serde::Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub cancel_requested: bool,
    /// Status at the moment the request was received.
    pub status: JobStatus,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub jobs_tracked: usize,
    pub assessment_configured: bool,
}
