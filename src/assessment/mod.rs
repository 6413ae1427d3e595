//! Two-stage case assessment
//!
//! A cheap screening call decides whether the documents warrant a deep
//! analysis; only an explicit "yes" from the screening tier triggers the
//! expensive tier. Token usage of both calls is priced per tier.
//!
//! ```text
//! aggregate text + findings
//!      │
//!      ▼
//! ┌─────────────┐   no "yes"
//! │  Screening  │ ───────────▶ short narrative, screening tokens only
//! └─────────────┘
//!      │ yes
//!      ▼
//! ┌─────────────┐
//! │    Deep     │ ───────────▶ full narrative, screening + deep tokens
//! │  analysis   │
//! └─────────────┘
//! ```

pub mod llm_service;

pub use llm_service::LlmAssessmentService;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AssessmentConfig;
use crate::matching::{Finding, MatchEngine};

pub const DEFAULT_SCREENING_PREFIX_CHARS: usize = 4_000;
pub const DEFAULT_DEEP_ANALYSIS_PREFIX_CHARS: usize = 16_000;
pub const DEFAULT_SCREENING_PRICE_PER_TOKEN: f64 = 0.00032;
pub const DEFAULT_DEEP_ANALYSIS_PRICE_PER_TOKEN: f64 = 0.0032;

const AFFIRMATIVE_TOKEN: &str = "yes";

const NO_FURTHER_ANALYSIS: &str =
    "Screening found no indication that further analysis is warranted.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Screening,
    DeepAnalysis,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Screening => write!(f, "screening"),
            ModelTier::DeepAnalysis => write!(f, "deep_analysis"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("call timed out after {0}s")]
    Timeout(u64),

    #[error("assessment service not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReply {
    pub narrative: String,
    pub tokens_used: u64,
}

/// The external text-understanding capability.
#[async_trait]
pub trait AssessmentService: Send + Sync {
    async fn call(&self, prompt: &str, tier: ModelTier) -> Result<ServiceReply, ServiceError>;
}

/// Per-tier token prices.
#[derive(Debug, Clone, PartialEq)]
pub struct Pricing {
    pub screening_per_token: f64,
    pub deep_analysis_per_token: f64,
    pub currency: String,
}

impl Pricing {
    pub fn from_config(config: &AssessmentConfig) -> Self {
        Self {
            screening_per_token: config.screening_price_per_token,
            deep_analysis_per_token: config.deep_analysis_price_per_token,
            currency: config.currency.clone(),
        }
    }

    pub fn unit_price(&self, tier: ModelTier) -> f64 {
        match tier {
            ModelTier::Screening => self.screening_per_token,
            ModelTier::DeepAnalysis => self.deep_analysis_per_token,
        }
    }

    /// Cost of `tokens` at `tier`, rounded to a millionth of a currency unit.
    pub fn cost(&self, tier: ModelTier, tokens: u64) -> f64 {
        round_micro(tokens as f64 * self.unit_price(tier))
    }

    pub fn total(&self, screening_tokens: u64, deep_tokens: u64) -> f64 {
        round_micro(
            self.cost(ModelTier::Screening, screening_tokens)
                + self.cost(ModelTier::DeepAnalysis, deep_tokens),
        )
    }
}

fn round_micro(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentResult {
    pub narrative: String,
    pub tokens_consumed: u64,
    pub cost_estimate: f64,
    pub currency: String,
    pub deep_analysis_performed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssessmentOutcome {
    Completed(AssessmentResult),
    /// Cancellation was observed between the two stages. Tokens already
    /// spent are still reported.
    Cancelled(AssessmentResult),
}

pub struct AssessmentStrategy {
    service: Arc<dyn AssessmentService>,
    screening_prefix_chars: usize,
    deep_analysis_prefix_chars: usize,
    pricing: Pricing,
}

impl AssessmentStrategy {
    pub fn new(service: Arc<dyn AssessmentService>, config: &AssessmentConfig) -> Self {
        Self {
            service,
            screening_prefix_chars: config.screening_prefix_chars,
            deep_analysis_prefix_chars: config.deep_analysis_prefix_chars,
            pricing: Pricing::from_config(config),
        }
    }

    pub async fn assess(&self, aggregate_text: &str, findings: &[Finding]) -> AssessmentResult {
        match self
            .assess_cancellable(aggregate_text, findings, &CancellationToken::new())
            .await
        {
            AssessmentOutcome::Completed(result) | AssessmentOutcome::Cancelled(result) => result,
        }
    }

    pub async fn assess_cancellable(
        &self,
        aggregate_text: &str,
        findings: &[Finding],
        cancel: &CancellationToken,
    ) -> AssessmentOutcome {
        let summary = MatchEngine::summarize(findings);

        let screening_prompt = Self::create_screening_prompt(
            truncate_chars(aggregate_text, self.screening_prefix_chars),
            &summary,
        );
        let screening = match self.service.call(&screening_prompt, ModelTier::Screening).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Screening call failed");
                return AssessmentOutcome::Completed(self.failed(e));
            }
        };

        info!(tokens = screening.tokens_used, "Screening call complete");

        if !is_affirmative(&screening.narrative) {
            return AssessmentOutcome::Completed(AssessmentResult {
                narrative: format!("{}\n\n{}", NO_FURTHER_ANALYSIS, screening.narrative.trim()),
                tokens_consumed: screening.tokens_used,
                cost_estimate: self.pricing.total(screening.tokens_used, 0),
                currency: self.pricing.currency.clone(),
                deep_analysis_performed: false,
                service_error: None,
            });
        }

        if cancel.is_cancelled() {
            info!(tokens = screening.tokens_used, "Cancellation observed before deep analysis");
            return AssessmentOutcome::Cancelled(AssessmentResult {
                narrative: "Analysis stopped after screening.".to_string(),
                tokens_consumed: screening.tokens_used,
                cost_estimate: self.pricing.total(screening.tokens_used, 0),
                currency: self.pricing.currency.clone(),
                deep_analysis_performed: false,
                service_error: None,
            });
        }

        let deep_prompt = Self::create_deep_analysis_prompt(
            truncate_chars(aggregate_text, self.deep_analysis_prefix_chars),
            &summary,
        );
        let deep = match self.service.call(&deep_prompt, ModelTier::DeepAnalysis).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Deep analysis call failed");
                return AssessmentOutcome::Completed(self.failed(e));
            }
        };

        info!(tokens = deep.tokens_used, "Deep analysis call complete");

        let tokens_consumed = screening.tokens_used + deep.tokens_used;
        AssessmentOutcome::Completed(AssessmentResult {
            narrative: deep.narrative,
            tokens_consumed,
            cost_estimate: self.pricing.total(screening.tokens_used, deep.tokens_used),
            currency: self.pricing.currency.clone(),
            deep_analysis_performed: true,
            service_error: None,
        })
    }

    /// Degraded result for a failed call. Nothing is billed, even when a
    /// screening call succeeded before the failure.
    fn failed(&self, error: ServiceError) -> AssessmentResult {
        AssessmentResult {
            narrative: format!("Assessment unavailable: {}", error),
            tokens_consumed: 0,
            cost_estimate: 0.0,
            currency: self.pricing.currency.clone(),
            deep_analysis_performed: false,
            service_error: Some(error.to_string()),
        }
    }

    fn create_screening_prompt(excerpt: &str, findings_summary: &str) -> String {
        format!(
            r#"You are screening documents from a Danish family-law case (custody, contact arrangements, parental responsibility).

Matches against the configured rules, laws and keywords:
{findings_summary}

Document excerpt:
"""
{excerpt}
"""

Does this case warrant a detailed legal analysis? Reply on the first line with exactly "RELEVANT: yes" or "RELEVANT: no", then give one sentence of justification."#
        )
    }

    fn create_deep_analysis_prompt(excerpt: &str, findings_summary: &str) -> String {
        format!(
            r#"You are assisting a caseworker with a Danish family-law case. Analyse the documents below.

Matches against the configured rules, laws and keywords:
{findings_summary}

Documents:
"""
{excerpt}
"""

Write a structured assessment with these sections:
1. Summary of the case
2. Relevant provisions (cite the matched laws and rules where they apply)
3. Concerns for the child's welfare, including any indication of psychological violence
4. Procedural issues or missing information
5. Recommended next steps"#
        )
    }
}

/// Whether a screening reply contains a standalone "yes" (any case).
pub fn is_affirmative(reply: &str) -> bool {
    reply
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case(AFFIRMATIVE_TOKEN))
}

/// The longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted replies and records every call it receives.
    #[derive(Default)]
    pub struct ScriptedService {
        replies: Mutex<VecDeque<Result<ServiceReply, ServiceError>>>,
        calls: Mutex<Vec<(String, ModelTier)>>,
    }

    impl ScriptedService {
        pub fn new(replies: Vec<Result<ServiceReply, ServiceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<(String, ModelTier)> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn reply(narrative: &str, tokens_used: u64) -> Result<ServiceReply, ServiceError> {
        Ok(ServiceReply {
            narrative: narrative.to_string(),
            tokens_used,
        })
    }

    #[async_trait]
    impl AssessmentService for ScriptedService {
        async fn call(&self, prompt: &str, tier: ModelTier) -> Result<ServiceReply, ServiceError> {
            self.calls.lock().unwrap().push((prompt.to_string(), tier));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::Transport("no scripted reply".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{reply, ScriptedService};
    use super::*;
    use crate::matching::FindingKind;

    fn strategy(service: Arc<ScriptedService>) -> AssessmentStrategy {
        AssessmentStrategy::new(service, &AssessmentConfig::default())
    }

    fn findings() -> Vec<Finding> {
        vec![Finding {
            kind: FindingKind::Keyword,
            value: "psykisk vold".to_string(),
        }]
    }

    #[test]
    fn test_cost_is_deterministic() {
        let pricing = Pricing::from_config(&AssessmentConfig::default());
        let first = pricing.cost(ModelTier::Screening, 1000);
        let second = pricing.cost(ModelTier::Screening, 1000);
        assert_eq!(first, second);
        assert!((first - 0.32).abs() < 1e-9);
        assert_eq!(pricing.cost(ModelTier::Screening, 0), 0.0);
        assert!((pricing.total(1000, 1000) - 3.52).abs() < 1e-9);
    }

    #[test]
    fn test_affirmative_detection() {
        assert!(is_affirmative("RELEVANT: yes\nThe case mentions violence."));
        assert!(is_affirmative("Yes."));
        assert!(is_affirmative("relevant: YES"));
        assert!(!is_affirmative("RELEVANT: no\nNothing of note."));
        assert!(!is_affirmative("Yesterday the parents met."));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("forældre", 4), "foræ");
        assert_eq!(truncate_chars("kort", 100), "kort");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn test_negative_screening_short_circuits() {
        let service = Arc::new(ScriptedService::new(vec![reply("RELEVANT: no\nRoutine letter.", 420)]));
        let result = strategy(service.clone()).assess("some text", &findings()).await;

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, ModelTier::Screening);
        assert_eq!(result.tokens_consumed, 420);
        assert!(!result.deep_analysis_performed);
        assert!(result.narrative.starts_with(NO_FURTHER_ANALYSIS));
        assert!((result.cost_estimate - 420.0 * DEFAULT_SCREENING_PRICE_PER_TOKEN).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_affirmative_screening_runs_deep_analysis() {
        let service = Arc::new(ScriptedService::new(vec![
            reply("RELEVANT: yes", 1000),
            reply("1. Summary of the case ...", 1000),
        ]));
        let result = strategy(service.clone()).assess("some text", &findings()).await;

        let tiers: Vec<ModelTier> = service.calls().into_iter().map(|(_, t)| t).collect();
        assert_eq!(tiers, vec![ModelTier::Screening, ModelTier::DeepAnalysis]);
        assert_eq!(result.tokens_consumed, 2000);
        assert!(result.deep_analysis_performed);
        assert_eq!(result.narrative, "1. Summary of the case ...");
        assert!((result.cost_estimate - 3.52).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prompts_are_bounded_by_tier() {
        let service = Arc::new(ScriptedService::new(vec![reply("yes", 1), reply("done", 1)]));
        let config = AssessmentConfig {
            screening_prefix_chars: 10,
            deep_analysis_prefix_chars: 20,
            ..AssessmentConfig::default()
        };
        let strategy = AssessmentStrategy::new(service.clone(), &config);
        let text = "0123456789abcdefghijKLMNOPQRSTUVWXYZ";

        strategy.assess(text, &[]).await;

        let calls = service.calls();
        assert!(calls[0].0.contains("0123456789"));
        assert!(!calls[0].0.contains("0123456789a"));
        assert!(calls[1].0.contains("0123456789abcdefghij"));
        assert!(!calls[1].0.contains("KLMNOP"));
        assert!(calls[0].0.contains("No configured rules"));
    }

    #[tokio::test]
    async fn test_screening_failure_becomes_degraded_result() {
        let service = Arc::new(ScriptedService::new(vec![Err(ServiceError::Quota(
            "monthly budget exhausted".to_string(),
        ))]));
        let result = strategy(service.clone()).assess("text", &findings()).await;

        assert_eq!(service.calls().len(), 1);
        assert_eq!(result.tokens_consumed, 0);
        assert_eq!(result.cost_estimate, 0.0);
        assert!(result.narrative.contains("monthly budget exhausted"));
        assert!(result.service_error.is_some());
    }

    #[tokio::test]
    async fn test_deep_analysis_failure_bills_nothing() {
        let service = Arc::new(ScriptedService::new(vec![
            reply("RELEVANT: yes", 500),
            Err(ServiceError::Timeout(120)),
        ]));
        let result = strategy(service.clone()).assess("text", &findings()).await;

        assert_eq!(service.calls().len(), 2);
        assert_eq!(result.tokens_consumed, 0);
        assert_eq!(result.cost_estimate, 0.0);
        assert!(result.service_error.is_some());
        assert!(!result.deep_analysis_performed);
        assert!(result.narrative.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_between_stages_bills_screening() {
        let service = Arc::new(ScriptedService::new(vec![reply("RELEVANT: yes", 700)]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = strategy(service.clone())
            .assess_cancellable("text", &findings(), &cancel)
            .await;

        assert_eq!(service.calls().len(), 1);
        match outcome {
            AssessmentOutcome::Cancelled(result) => {
                assert_eq!(result.tokens_consumed, 700);
                assert!(result.cost_estimate > 0.0);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
    }
}
