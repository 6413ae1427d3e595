//! Job Store
//!
//! Concurrency-safe registry of analysis jobs. `submit` records a pending
//! job and spawns exactly one task that runs it; `poll` and `cancel` only
//! touch the map and never wait on extraction or external calls.
//!
//! Each job's own task is the only writer of its status and report.
//! `cancel` only trips the job's cancellation token, which the task
//! observes at its checkpoints.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::jobs::{AnalysisReport, Job, JobId, JobStatus};
use super::workers::AnalysisPipeline;
use crate::extraction::Artifact;
use crate::types::{AppError, AppResult};

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    pipeline: Arc<AnalysisPipeline>,
}

impl JobStore {
    pub fn new(pipeline: AnalysisPipeline) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Register a pending job for `artifacts` and schedule its execution.
    /// Returns as soon as the task is spawned.
    pub async fn submit(&self, artifacts: Vec<Artifact>) -> AppResult<JobId> {
        if artifacts.is_empty() {
            return Err(AppError::InvalidRequest("no documents uploaded".to_string()));
        }
        if let Some(empty) = artifacts.iter().find(|a| a.data.is_empty()) {
            return Err(AppError::InvalidRequest(format!("{} is empty", empty.filename)));
        }

        let job_id = JobId::new();
        let cancel = CancellationToken::new();
        {
            let mut guard = self.jobs.write().await;
            guard.insert(
                job_id,
                JobEntry {
                    job: Job::new(job_id),
                    cancel: cancel.clone(),
                },
            );
        }

        info!(job_id = %job_id, artifacts = artifacts.len(), "Job submitted");

        let store = self.clone();
        tokio::spawn(async move {
            store.supervise(job_id, artifacts, cancel).await;
        });

        Ok(job_id)
    }

    pub async fn poll(&self, job_id: JobId) -> AppResult<Job> {
        let guard = self.jobs.read().await;
        guard
            .get(&job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    /// Request a cooperative stop. A job that already finished is left as is.
    pub async fn cancel(&self, job_id: JobId) -> AppResult<JobStatus> {
        let guard = self.jobs.read().await;
        let entry = guard
            .get(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

        if entry.job.status.is_terminal() {
            info!(job_id = %job_id, status = %entry.job.status, "Cancel ignored for finished job");
        } else {
            info!(job_id = %job_id, status = %entry.job.status, "Cancellation requested");
            entry.cancel.cancel();
        }

        Ok(entry.job.status)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub(crate) async fn mark_processing(&self, job_id: JobId) -> bool {
        self.transition(job_id, JobStatus::Processing, None, None).await
    }

    pub(crate) async fn complete(&self, job_id: JobId, report: AnalysisReport) -> bool {
        self.transition(job_id, JobStatus::Done, Some(report), None).await
    }

    pub(crate) async fn fail(&self, job_id: JobId, message: String, report: Option<AnalysisReport>) -> bool {
        self.transition(job_id, JobStatus::Error, report, Some(message)).await
    }

    pub(crate) async fn stop(&self, job_id: JobId, report: Option<AnalysisReport>) -> bool {
        self.transition(job_id, JobStatus::Stopped, report, None).await
    }

    /// Apply a state change if the state machine allows it. Terminal states
    /// are never overwritten.
    async fn transition(
        &self,
        job_id: JobId,
        next: JobStatus,
        report: Option<AnalysisReport>,
        error: Option<String>,
    ) -> bool {
        let mut guard = self.jobs.write().await;
        let Some(entry) = guard.get_mut(&job_id) else {
            warn!(job_id = %job_id, next = %next, "Transition for unknown job");
            return false;
        };

        let current = entry.job.status;
        if !current.can_transition_to(next) {
            warn!(job_id = %job_id, from = %current, to = %next, "Rejected job transition");
            return false;
        }

        entry.job.status = next;
        entry.job.updated_at = Utc::now();
        if report.is_some() {
            entry.job.report = report;
        }
        if error.is_some() {
            entry.job.error = error;
        }

        info!(job_id = %job_id, from = %current, to = %next, "Job transitioned");
        true
    }

    /// Run the pipeline in its own task so that a panic inside it is
    /// recorded as an `error` result instead of being lost.
    async fn supervise(&self, job_id: JobId, artifacts: Vec<Artifact>, cancel: CancellationToken) {
        let store = self.clone();
        let worker = tokio::spawn(async move {
            let pipeline = store.pipeline.clone();
            pipeline.run(&store, job_id, artifacts, &cancel).await;
        });

        if let Err(e) = worker.await {
            error!(job_id = %job_id, error = %e, "Job task aborted");
            // A panic before the task marked itself processing leaves it pending.
            self.mark_processing(job_id).await;
            self.fail(job_id, format!("job task aborted: {}", e), None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::test_support::{reply, ScriptedService};
    use crate::assessment::{AssessmentService, AssessmentStrategy, ModelTier, ServiceError, ServiceReply};
    use crate::config::AssessmentConfig;
    use crate::corpus::{CorpusKind, CorpusStore};
    use crate::extraction::test_support::{make_pdf, make_zip};
    use crate::extraction::TextExtractor;
    use crate::matching::{Finding, FindingKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// Blocks every call until a permit is released, signalling on entry.
    struct GatedService {
        entered: Notify,
        gate: Semaphore,
        calls: AtomicUsize,
        narrative: String,
    }

    impl GatedService {
        fn new(narrative: &str) -> Self {
            Self {
                entered: Notify::new(),
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
                narrative: narrative.to_string(),
            }
        }
    }

    #[async_trait]
    impl AssessmentService for GatedService {
        async fn call(&self, _prompt: &str, _tier: ModelTier) -> Result<ServiceReply, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ServiceError::Transport(e.to_string()))?;
            permit.forget();
            Ok(ServiceReply {
                narrative: self.narrative.clone(),
                tokens_used: 250,
            })
        }
    }

    struct PanickingService;

    #[async_trait]
    impl AssessmentService for PanickingService {
        async fn call(&self, _prompt: &str, _tier: ModelTier) -> Result<ServiceReply, ServiceError> {
            panic!("service exploded");
        }
    }

    fn store_with(service: Arc<dyn AssessmentService>, corpus: CorpusStore) -> JobStore {
        let strategy = Arc::new(AssessmentStrategy::new(service, &AssessmentConfig::default()));
        JobStore::new(AnalysisPipeline::new(TextExtractor::new(), corpus, strategy))
    }

    /// Poll until the job is terminal, returning every distinct status seen.
    async fn wait_for_terminal(store: &JobStore, job_id: JobId) -> (Job, Vec<JobStatus>) {
        let mut seen = Vec::new();
        let job = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = store.poll(job_id).await.unwrap();
                if seen.last() != Some(&job.status) {
                    seen.push(job.status);
                }
                if job.status.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not finish in time");
        (job, seen)
    }

    fn assert_valid_path(seen: &[JobStatus]) {
        let rank = |s: &JobStatus| match s {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            _ => 2,
        };
        assert!(seen.windows(2).all(|w| rank(&w[0]) < rank(&w[1])), "invalid path {:?}", seen);
        assert_eq!(seen.iter().filter(|s| s.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_with_matching_keyword() {
        let corpus = CorpusStore::new();
        corpus.add(CorpusKind::Keywords, "psykisk vold").await.unwrap();
        corpus.add(CorpusKind::Laws, "barnets lov").await.unwrap();
        let service = Arc::new(ScriptedService::new(vec![
            reply("RELEVANT: yes", 1000),
            reply("1. Summary of the case: concerns about psykisk vold.", 3000),
        ]));
        let store = store_with(service.clone(), corpus);

        let pdf = make_pdf(&["Der er oplysninger om psykisk vold i hjemmet"]);
        let job_id = store.submit(vec![Artifact::new("sag.pdf", pdf)]).await.unwrap();
        let (job, seen) = wait_for_terminal(&store, job_id).await;

        assert_eq!(job.status, JobStatus::Done);
        assert_valid_path(&seen);
        let report = job.report.expect("done job carries a report");
        assert_eq!(
            report.findings,
            vec![Finding {
                kind: FindingKind::Keyword,
                value: "psykisk vold".to_string(),
            }]
        );
        let assessment = report.assessment.unwrap();
        assert!(!assessment.narrative.is_empty());
        assert_eq!(assessment.tokens_consumed, 4000);
        assert!(assessment.deep_analysis_performed);
        assert_eq!(service.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_still_completes() {
        let corpus = CorpusStore::new();
        corpus.add(CorpusKind::Keywords, "7/7").await.unwrap();
        let service = Arc::new(ScriptedService::new(vec![reply("RELEVANT: no", 300)]));
        let store = store_with(service, corpus);

        let archive = make_zip(&[
            ("ok.pdf", &make_pdf(&["Samvaer 7/7"])[..]),
            ("corrupt.pdf", &b"%PDF-1.7 truncated"[..]),
        ]);
        let job_id = store.submit(vec![Artifact::new("sag.zip", archive)]).await.unwrap();
        let (job, _) = wait_for_terminal(&store, job_id).await;

        assert_eq!(job.status, JobStatus::Done);
        let report = job.report.unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.failed_documents, vec!["corrupt.pdf"]);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.assessment.unwrap().tokens_consumed, 300);
    }

    #[tokio::test]
    async fn test_all_documents_failing_is_error() {
        let service = Arc::new(ScriptedService::new(vec![]));
        let store = store_with(service.clone(), CorpusStore::new());

        let job_id = store
            .submit(vec![Artifact::new("broken.pdf", b"nope".to_vec())])
            .await
            .unwrap();
        let (job, seen) = wait_for_terminal(&store, job_id).await;

        assert_eq!(job.status, JobStatus::Error);
        assert_valid_path(&seen);
        assert!(job.error.unwrap().contains("broken.pdf"));
        assert!(job.report.unwrap().assessment.is_none());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_service_failure_is_contained() {
        let service = Arc::new(ScriptedService::new(vec![Err(ServiceError::Transport(
            "connection reset".to_string(),
        ))]));
        let store = store_with(service, CorpusStore::new());

        let job_id = store
            .submit(vec![Artifact::new("a.pdf", make_pdf(&["tekst"]))])
            .await
            .unwrap();
        let (job, _) = wait_for_terminal(&store, job_id).await;

        assert_eq!(job.status, JobStatus::Done);
        let assessment = job.report.unwrap().assessment.unwrap();
        assert_eq!(assessment.tokens_consumed, 0);
        assert!(assessment.narrative.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded_as_error() {
        let store = store_with(Arc::new(PanickingService), CorpusStore::new());

        let job_id = store
            .submit(vec![Artifact::new("a.pdf", make_pdf(&["tekst"]))])
            .await
            .unwrap();
        let (job, _) = wait_for_terminal(&store, job_id).await;

        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("aborted"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_stops_without_external_calls() {
        let service = Arc::new(ScriptedService::new(vec![reply("RELEVANT: yes", 10)]));
        let store = store_with(service.clone(), CorpusStore::new());

        let job_id = store
            .submit(vec![Artifact::new("a.pdf", make_pdf(&["tekst"]))])
            .await
            .unwrap();
        // The spawned task cannot run before this task yields.
        store.cancel(job_id).await.unwrap();
        let (job, seen) = wait_for_terminal(&store, job_id).await;

        assert_eq!(job.status, JobStatus::Stopped);
        assert_valid_path(&seen);
        assert!(job.report.is_none());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_screening_stops_before_deep_analysis() {
        let service = Arc::new(GatedService::new("RELEVANT: yes"));
        let store = store_with(service.clone(), CorpusStore::new());

        let job_id = store
            .submit(vec![Artifact::new("a.pdf", make_pdf(&["tekst"]))])
            .await
            .unwrap();

        service.entered.notified().await;
        assert_eq!(store.poll(job_id).await.unwrap().status, JobStatus::Processing);
        store.cancel(job_id).await.unwrap();
        service.gate.add_permits(1);

        let (job, _) = wait_for_terminal(&store, job_id).await;

        assert_eq!(job.status, JobStatus::Stopped);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        let assessment = job.report.unwrap().assessment.unwrap();
        assert_eq!(assessment.tokens_consumed, 250);
        assert!(!assessment.deep_analysis_performed);
    }

    #[tokio::test]
    async fn test_cancel_after_done_is_noop() {
        let service = Arc::new(ScriptedService::new(vec![reply("RELEVANT: no", 42)]));
        let store = store_with(service, CorpusStore::new());

        let job_id = store
            .submit(vec![Artifact::new("a.pdf", make_pdf(&["tekst"]))])
            .await
            .unwrap();
        let (done, _) = wait_for_terminal(&store, job_id).await;
        assert_eq!(done.status, JobStatus::Done);

        let status = store.cancel(job_id).await.unwrap();
        assert_eq!(status, JobStatus::Done);
        assert_eq!(store.poll(job_id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_terminal_state_is_never_overwritten() {
        let service = Arc::new(ScriptedService::new(vec![reply("no", 1)]));
        let store = store_with(service, CorpusStore::new());

        let job_id = store
            .submit(vec![Artifact::new("a.pdf", make_pdf(&["tekst"]))])
            .await
            .unwrap();
        let (done, _) = wait_for_terminal(&store, job_id).await;

        assert!(!store.stop(job_id, None).await);
        assert!(!store.fail(job_id, "late".to_string(), None).await);
        assert!(!store.mark_processing(job_id).await);
        assert_eq!(store.poll(job_id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = store_with(Arc::new(ScriptedService::new(vec![])), CorpusStore::new());
        let missing = JobId::new();

        assert!(matches!(store.poll(missing).await, Err(AppError::NotFound(_))));
        assert!(matches!(store.cancel(missing).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_or_empty_upload() {
        let store = store_with(Arc::new(ScriptedService::new(vec![])), CorpusStore::new());

        tokio_test::assert_err!(store.submit(Vec::new()).await);
        tokio_test::assert_err!(store.submit(vec![Artifact::new("a.pdf", Vec::new())]).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_jobs_run_concurrently_and_independently() {
        let service = Arc::new(ScriptedService::new(vec![
            reply("RELEVANT: no", 1),
            reply("RELEVANT: no", 1),
            reply("RELEVANT: no", 1),
        ]));
        let store = store_with(service, CorpusStore::new());

        let mut ids = Vec::new();
        for i in 0..3 {
            let text = format!("dokument {}", i);
            let pdf = make_pdf(&[text.as_str()]);
            ids.push(store.submit(vec![Artifact::new(format!("{}.pdf", i), pdf)]).await.unwrap());
        }
        assert_eq!(store.len().await, 3);

        for id in ids {
            let (job, _) = wait_for_terminal(&store, id).await;
            assert_eq!(job.status, JobStatus::Done);
        }
    }
}
