//! Run configuration.
//!
//! All knobs the pipeline exposes, with environment variables as defaults so
//! the binary runs without a config file. Thresholds and rate limits are
//! hand-tuned constants kept replaceable rather than baked into the logic.

use crate::types::MostLikelyPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Per-minute and per-day limits for the external reasoning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    /// Minimum spacing between consecutive calls.
    pub min_spacing: Duration,
    /// Maximum calls inside any rolling 60-second window.
    pub max_per_minute: usize,
    /// Calendar-day cap; reaching it disables the reasoning source.
    pub max_per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        // Most restrictive free tier: 5/min advertised, 4/min kept as buffer.
        Self {
            min_spacing: Duration::from_secs(15),
            max_per_minute: 4,
            max_per_day: 100,
        }
    }
}

impl RateLimits {
    /// Limits for a model tier by name, mirroring published free-tier quotas.
    pub fn for_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.contains("2.5-flash") {
            Self::default()
        } else if m.contains("1.5-flash") {
            Self {
                min_spacing: Duration::from_secs(5),
                max_per_minute: 12,
                max_per_day: 1500,
            }
        } else if m.contains("1.5-pro") {
            Self {
                min_spacing: Duration::from_secs(30),
                max_per_minute: 1,
                max_per_day: 50,
            }
        } else {
            Self::default()
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Reasoning model name; also selects the rate-limit tier.
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,

    pub enable_catalog: bool,
    pub enable_relationships: bool,
    pub enable_specialist_context: bool,

    /// Reasoning is invoked when catalog confidence is below this.
    pub reasoning_trigger_confidence: f64,
    /// Bounded retries for shape/parse failures on the reasoning call.
    pub max_retries: u32,
    /// Related issues included in the prompt for context.
    pub max_related_issues: usize,
    /// Cap on bundle size for bundled-estimate grouping.
    pub max_bundle_size: usize,

    pub most_likely_policy: MostLikelyPolicy,
    /// When off, validator corrections are reported but not applied.
    pub auto_correct: bool,

    pub rate_limits: RateLimits,
    /// Persisted `{date, count}` daily quota state.
    pub quota_path: PathBuf,
    /// Append-only diagnostic log.
    pub diagnostic_log_path: PathBuf,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        let model = "gemini-2.5-flash".to_string();
        Self {
            rate_limits: RateLimits::for_model(&model),
            model,
            api_key: None,
            temperature: 0.3,
            enable_catalog: true,
            enable_relationships: true,
            enable_specialist_context: true,
            reasoning_trigger_confidence: 0.75,
            max_retries: 2,
            max_related_issues: 3,
            max_bundle_size: 3,
            most_likely_policy: MostLikelyPolicy::default(),
            auto_correct: true,
            quota_path: PathBuf::from("daily_api_usage.json"),
            diagnostic_log_path: PathBuf::from("estimation_errors.log"),
        }
    }
}

impl EstimatorConfig {
    /// Defaults with environment overrides:
    /// - `GEMINI_API_KEY` - reasoning API key (unset = catalog/fallback only)
    /// - `COSTFUSE_MODEL` - reasoning model name
    /// - `COSTFUSE_TEMPERATURE` - sampling temperature
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        if let Ok(model) = std::env::var("COSTFUSE_MODEL") {
            config.rate_limits = RateLimits::for_model(&model);
            config.model = model;
        }
        if let Ok(t) = std::env::var("COSTFUSE_TEMPERATURE") {
            if let Ok(t) = t.parse() {
                config.temperature = t;
            }
        }
        config
    }
}
