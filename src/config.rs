use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::assessment::{
    DEFAULT_DEEP_ANALYSIS_PREFIX_CHARS, DEFAULT_DEEP_ANALYSIS_PRICE_PER_TOKEN,
    DEFAULT_SCREENING_PREFIX_CHARS, DEFAULT_SCREENING_PRICE_PER_TOKEN,
};
use crate::extraction::DEFAULT_MAX_ARCHIVE_ENTRY_BYTES;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub assessment: AssessmentConfig,
    pub corpus: CorpusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_bytes: usize,
    pub max_archive_entry_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    pub screening_model: String,
    pub deep_analysis_model: String,
    pub timeout_secs: u64,
}

impl LLMConfig {
    /// Returns the API key when one is configured.
    pub fn active_api_key(&self) -> Option<String> {
        let key = self.api_key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }
}

/// Prompt sizes and per-tier token prices for the two-stage assessment.
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentConfig {
    pub screening_prefix_chars: usize,
    pub deep_analysis_prefix_chars: usize,
    pub screening_price_per_token: f64,
    pub deep_analysis_price_per_token: f64,
    pub currency: String,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            screening_prefix_chars: DEFAULT_SCREENING_PREFIX_CHARS,
            deep_analysis_prefix_chars: DEFAULT_DEEP_ANALYSIS_PREFIX_CHARS,
            screening_price_per_token: DEFAULT_SCREENING_PRICE_PER_TOKEN,
            deep_analysis_price_per_token: DEFAULT_DEEP_ANALYSIS_PRICE_PER_TOKEN,
            currency: "DKK".to_string(),
        }
    }
}

/// Entries loaded into the in-memory corpus at start-up.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorpusConfig {
    pub seed_rules: Vec<String>,
    pub seed_laws: Vec<String>,
    pub seed_keywords: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let assessment_defaults = AssessmentConfig::default();

        Ok(Self {
            server: ServerConfig {
                port: parse_var("PORT", 10000)?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
                max_archive_entry_bytes: parse_var(
                    "MAX_ARCHIVE_ENTRY_BYTES",
                    DEFAULT_MAX_ARCHIVE_ENTRY_BYTES,
                )?,
            },
            llm: LLMConfig {
                provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
                api_key: env::var("LLM_API_KEY").unwrap_or_default(),
                base_url: env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                screening_model: env::var("SCREENING_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                deep_analysis_model: env::var("DEEP_ANALYSIS_MODEL")
                    .unwrap_or_else(|_| "gpt-4o".to_string()),
                timeout_secs: parse_var("LLM_TIMEOUT_SECS", 120)?,
            },
            assessment: AssessmentConfig {
                screening_prefix_chars: parse_var(
                    "SCREENING_PREFIX_CHARS",
                    assessment_defaults.screening_prefix_chars,
                )?,
                deep_analysis_prefix_chars: parse_var(
                    "DEEP_ANALYSIS_PREFIX_CHARS",
                    assessment_defaults.deep_analysis_prefix_chars,
                )?,
                screening_price_per_token: parse_var(
                    "SCREENING_PRICE_PER_TOKEN",
                    assessment_defaults.screening_price_per_token,
                )?,
                deep_analysis_price_per_token: parse_var(
                    "DEEP_ANALYSIS_PRICE_PER_TOKEN",
                    assessment_defaults.deep_analysis_price_per_token,
                )?,
                currency: env::var("COST_CURRENCY").unwrap_or(assessment_defaults.currency),
            },
            corpus: CorpusConfig {
                seed_rules: split_list(&env::var("SEED_RULES").unwrap_or_default()),
                seed_laws: split_list(&env::var("SEED_LAWS").unwrap_or_default()),
                seed_keywords: env::var("SEED_KEYWORDS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_else(|_| default_seed_keywords()),
            },
        })
    }
}

/// Keywords every case is screened for unless `SEED_KEYWORDS` says otherwise.
pub const DEFAULT_SEED_KEYWORDS: [&str; 2] = ["7/7", "psykisk vold"];

pub fn default_seed_keywords() -> Vec<String> {
    DEFAULT_SEED_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Splits a comma-separated list, dropping blank items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
