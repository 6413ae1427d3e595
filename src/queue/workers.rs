// Execution path of a single analysis job
//
// extraction → matching → screening → (optional) deep analysis, strictly in
// that order, with cancellation observed between the steps.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::jobs::{AnalysisReport, JobId};
use super::store::JobStore;
use crate::assessment::{AssessmentOutcome, AssessmentStrategy};
use crate::corpus::CorpusStore;
use crate::extraction::{aggregate_text, Artifact, TextExtractor};
use crate::matching::MatchEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    BeforeExtraction,
    BeforeMatching,
    BeforeScreening,
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Checkpoint::BeforeExtraction => write!(f, "before_extraction"),
            Checkpoint::BeforeMatching => write!(f, "before_matching"),
            Checkpoint::BeforeScreening => write!(f, "before_screening"),
        }
    }
}

pub struct AnalysisPipeline {
    extractor: TextExtractor,
    corpus: CorpusStore,
    strategy: Arc<AssessmentStrategy>,
}

impl AnalysisPipeline {
    pub fn new(extractor: TextExtractor, corpus: CorpusStore, strategy: Arc<AssessmentStrategy>) -> Self {
        Self {
            extractor,
            corpus,
            strategy,
        }
    }

    /// Run one job to a terminal state, writing every transition into `store`.
    pub async fn run(&self, store: &JobStore, job_id: JobId, artifacts: Vec<Artifact>, cancel: &CancellationToken) {
        if !store.mark_processing(job_id).await {
            return;
        }

        if Self::cancelled(cancel, job_id, Checkpoint::BeforeExtraction) {
            store.stop(job_id, None).await;
            return;
        }

        let documents = self.extractor.extract_batch_async(artifacts).await;
        let mut report = AnalysisReport::new(&documents);

        info!(
            job_id = %job_id,
            documents = documents.len(),
            failed = report.failed_documents.len(),
            "Extraction finished"
        );

        if documents.iter().all(|d| d.is_failed()) {
            let message = if documents.is_empty() {
                "no PDF documents found in upload".to_string()
            } else {
                format!(
                    "text extraction failed for every document: {}",
                    report.failed_documents.join(", ")
                )
            };
            warn!(job_id = %job_id, "{}", message);
            store.fail(job_id, message, Some(report)).await;
            return;
        }

        if Self::cancelled(cancel, job_id, Checkpoint::BeforeMatching) {
            store.stop(job_id, None).await;
            return;
        }

        let text = aggregate_text(&documents);
        let corpora = self.corpus.snapshot().await;
        if corpora.is_empty() {
            warn!(job_id = %job_id, "Corpus is empty; no findings possible");
        }
        report.findings = MatchEngine::find(&text, &corpora);

        info!(job_id = %job_id, findings = report.findings.len(), "Matching finished");

        if Self::cancelled(cancel, job_id, Checkpoint::BeforeScreening) {
            store.stop(job_id, None).await;
            return;
        }

        match self.strategy.assess_cancellable(&text, &report.findings, cancel).await {
            AssessmentOutcome::Completed(assessment) => {
                info!(
                    job_id = %job_id,
                    tokens = assessment.tokens_consumed,
                    cost = assessment.cost_estimate,
                    deep_analysis = assessment.deep_analysis_performed,
                    "Assessment finished"
                );
                report.assessment = Some(assessment);
                store.complete(job_id, report).await;
            }
            AssessmentOutcome::Cancelled(assessment) => {
                info!(job_id = %job_id, tokens = assessment.tokens_consumed, "Job stopped after screening");
                report.assessment = Some(assessment);
                store.stop(job_id, Some(report)).await;
            }
        }
    }

    fn cancelled(cancel: &CancellationToken, job_id: JobId, checkpoint: Checkpoint) -> bool {
        let cancelled = cancel.is_cancelled();
        if cancelled {
            info!(job_id = %job_id, checkpoint = %checkpoint, "Cancellation observed");
        }
        cancelled
    }
}
