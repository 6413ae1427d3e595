use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{AssessmentService, ModelTier, ServiceError, ServiceReply};
use crate::config::LLMConfig;
use crate::llm::{LLMAdapter, LLMProviderConfig, LLM};
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

const SCREENING_MAX_TOKENS: u32 = 64;
const DEEP_ANALYSIS_MAX_TOKENS: u32 = 2048;

const SYSTEM_INSTRUCTION: &str =
    "You are a careful legal analyst assisting Danish family-law caseworkers. Base every statement on the supplied documents.";

/// `AssessmentService` backed by a chat-completion model per tier.
pub struct LlmAssessmentService {
    adapter: Option<Arc<dyn LLMAdapter>>,
    screening_model: String,
    deep_analysis_model: String,
    timeout: Duration,
}

impl LlmAssessmentService {
    pub fn new(
        adapter: Arc<dyn LLMAdapter>,
        screening_model: impl Into<String>,
        deep_analysis_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            adapter: Some(adapter),
            screening_model: screening_model.into(),
            deep_analysis_model: deep_analysis_model.into(),
            timeout,
        }
    }

    /// Build from configuration. Without an API key every call fails with
    /// `ServiceError::NotConfigured`, which jobs report as a degraded result.
    pub fn from_config(config: &LLMConfig) -> AppResult<Self> {
        let adapter: Option<Arc<dyn LLMAdapter>> = match config.active_api_key() {
            Some(api_key) => Some(Arc::new(LLM::new(LLMProviderConfig {
                name: config.provider.clone(),
                api_key,
                base_url: config.base_url.clone(),
            })?)),
            None => None,
        };

        Ok(Self {
            adapter,
            screening_model: config.screening_model.clone(),
            deep_analysis_model: config.deep_analysis_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.adapter.is_some()
    }

    fn request_for(&self, prompt: &str, tier: ModelTier) -> LLMRequest {
        let (model, max_tokens) = match tier {
            ModelTier::Screening => (&self.screening_model, SCREENING_MAX_TOKENS),
            ModelTier::DeepAnalysis => (&self.deep_analysis_model, DEEP_ANALYSIS_MAX_TOKENS),
        };

        LLMRequest {
            model: model.clone(),
            messages: vec![LLMMessage::system(SYSTEM_INSTRUCTION), LLMMessage::user(prompt)],
            max_tokens: Some(max_tokens),
            temperature: Some(0.2),
        }
    }
}

impl From<AppError> for ServiceError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::LLMQuota(message) => ServiceError::Quota(message),
            AppError::Internal(message) => ServiceError::MalformedResponse(message),
            other => ServiceError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl AssessmentService for LlmAssessmentService {
    async fn call(&self, prompt: &str, tier: ModelTier) -> Result<ServiceReply, ServiceError> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| ServiceError::NotConfigured("LLM_API_KEY is not set".to_string()))?;

        let request = self.request_for(prompt, tier);
        debug!(tier = %tier, model = %request.model, prompt_len = prompt.len(), "Calling assessment model");

        let response = tokio::time::timeout(self.timeout, adapter.create_chat_completion(&request))
            .await
            .map_err(|_| ServiceError::Timeout(self.timeout.as_secs()))??;

        if response.content.trim().is_empty() {
            return Err(ServiceError::MalformedResponse("empty completion".to_string()));
        }

        Ok(ServiceReply {
            narrative: response.content,
            tokens_used: u64::from(response.usage.total_tokens),
        })
    }
}
