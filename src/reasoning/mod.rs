//! Reasoning-based cost estimation via an external generative model.
//!
//! This module provides a trait-based abstraction over generative backends,
//! with the Gemini HTTP API as the primary implementation. The estimator
//! wraps a backend with client-side rate limiting and a bounded retry loop,
//! and returns `None` instead of an error when the source is unavailable so
//! the pipeline can fall back.

mod error;
mod gemini;
mod prompt;

pub use error::{classify_http_status, BackendError, BackendErrorKind, RetryPolicy};
pub use gemini::GeminiBackend;
pub use prompt::PromptBuilder;

use crate::config::EstimatorConfig;
use crate::ratelimit::RateLimiter;
use crate::types::{EstimateSource, Issue, PropertyContext, SourceEstimate};
use async_trait::async_trait;
use serde_json::Value;

/// Generation parameters passed through to the backend.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f64,
    /// Ask the backend for a JSON-typed response when it supports that.
    pub json_response: bool,
}

/// A generative text backend. One call, one prompt, one text response.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions)
        -> Result<String, BackendError>;
}

/// Consecutive rate-limit waits tolerated before giving up on one issue.
/// These waits do not consume shape retries, so they need their own cap.
const MAX_RATE_LIMIT_WAITS: u32 = 3;

pub struct ReasoningEstimator {
    backend: Box<dyn GenerativeBackend>,
    limiter: RateLimiter,
    prompts: PromptBuilder,
    policy: RetryPolicy,
    options: GenerationOptions,
    max_related: usize,
}

impl ReasoningEstimator {
    pub fn new(
        backend: Box<dyn GenerativeBackend>,
        limiter: RateLimiter,
        config: &EstimatorConfig,
    ) -> Self {
        Self {
            backend,
            limiter,
            prompts: PromptBuilder::new(config.enable_specialist_context),
            policy: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
            options: GenerationOptions {
                temperature: config.temperature,
                json_response: true,
            },
            max_related: config.max_related_issues,
        }
    }

    pub fn calls_remaining_today(&self) -> u32 {
        self.limiter.calls_remaining_today()
    }

    /// Estimate one issue. `None` means this source produced nothing usable
    /// (quota exhausted, auth failure, or retries spent); the caller decides
    /// what to fall back to.
    pub async fn estimate(
        &mut self,
        issue: &Issue,
        property: &PropertyContext,
        related: &[Issue],
        size_hint: &str,
    ) -> Option<SourceEstimate> {
        let prompt = self
            .prompts
            .build(issue, property, related, size_hint, self.max_related);

        let mut attempt = 0u32;
        let mut rate_limit_waits = 0u32;

        loop {
            match self.limiter.check() {
                Err(e) => {
                    tracing::warn!("Skipping reasoning for '{}': {}", issue.item, e);
                    return None;
                }
                Ok(wait) if !wait.is_zero() => {
                    tracing::debug!("Rate limit spacing: waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
                Ok(_) => {}
            }

            self.limiter.record();

            match self.backend.generate(&prompt, &self.options).await {
                Ok(text) => match parse_estimate(&text) {
                    Ok(estimate) => {
                        if attempt > 0 {
                            tracing::info!(
                                "Reasoning estimate for '{}' succeeded after {} retries",
                                issue.item,
                                attempt
                            );
                        }
                        return Some(estimate);
                    }
                    Err(problem) => {
                        if attempt >= self.policy.max_retries {
                            tracing::warn!(
                                "Giving up on reasoning for '{}' after {} attempts: {}",
                                issue.item,
                                attempt + 1,
                                problem
                            );
                            return None;
                        }
                        tracing::warn!(
                            "Unusable reasoning response for '{}' (attempt {}): {}",
                            issue.item,
                            attempt + 1,
                            problem
                        );
                        attempt += 1;
                    }
                },
                Err(e) if e.kind == BackendErrorKind::Auth => {
                    tracing::error!("Authentication failed, disabling reasoning: {}", e);
                    return None;
                }
                Err(e) if e.kind == BackendErrorKind::RateLimited => {
                    if rate_limit_waits >= MAX_RATE_LIMIT_WAITS {
                        tracing::warn!(
                            "Provider still rate limiting after {} waits, skipping '{}'",
                            rate_limit_waits,
                            issue.item
                        );
                        return None;
                    }
                    let delay = e.suggested_delay(attempt, self.policy.rate_limit_backoff);
                    tracing::warn!("Provider rate limit, waiting {:?}: {}", delay, e.message);
                    tokio::time::sleep(delay).await;
                    rate_limit_waits += 1;
                }
                Err(e) => {
                    if !self.policy.should_retry(&e) || attempt >= self.policy.max_retries {
                        tracing::error!("Reasoning call failed for '{}': {}", issue.item, e);
                        return None;
                    }
                    let delay = e.suggested_delay(attempt, self.policy.rate_limit_backoff);
                    tracing::warn!(
                        "Reasoning call failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Parse a model response into a usable estimate, or say why it is not one.
fn parse_estimate(text: &str) -> Result<SourceEstimate, String> {
    let json = extract_json(text).ok_or("no JSON object in response")?;
    let v: Value =
        serde_json::from_str(json).map_err(|e| format!("malformed JSON: {}", e))?;

    let low = numeric_field(&v, "estimated_low").ok_or("missing estimated_low")?;
    let high = numeric_field(&v, "estimated_high").ok_or("missing estimated_high")?;
    if low <= 0.0 || high <= 0.0 {
        return Err(format!("non-positive bound: low={}, high={}", low, high));
    }
    if high < low {
        return Err(format!("inverted range: low={}, high={}", low, high));
    }

    let confidence = numeric_field(&v, "confidence_score")
        .unwrap_or(50.0)
        .clamp(0.0, 100.0)
        / 100.0;
    let reasoning = v
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Ok(
        SourceEstimate::new(EstimateSource::Reasoning, low, high, confidence)
            .with_reasoning(reasoning)
            .with_assumptions(string_array(&v, "assumptions"))
            .with_risk_factors(string_array(&v, "risk_factors")),
    )
}

/// Locate the JSON object in a response that may be fenced or prefixed with
/// prose.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn numeric_field(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        // Tolerate quoted numbers, with or without separators.
        Value::String(s) => s.trim().replace([',', '$'], "").parse().ok(),
        _ => None,
    }
}

fn string_array(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimits;
    use crate::ratelimit::{DailyQuota, QuotaStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct MemStore;

    impl QuotaStore for MemStore {
        fn load(&self) -> Option<DailyQuota> {
            None
        }
        fn save(&self, _: &DailyQuota) {}
    }

    /// Backend that replays a script of responses and counts calls.
    struct ScriptedBackend {
        script: Mutex<Vec<Result<String, BackendError>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, BackendError>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: Mutex::new(script),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .remove(0)
        }
    }

    fn estimator(
        script: Vec<Result<String, BackendError>>,
        limits: RateLimits,
    ) -> (ReasoningEstimator, Arc<AtomicUsize>) {
        let (backend, calls) = ScriptedBackend::new(script);
        let limiter = RateLimiter::new(limits, Box::new(MemStore));
        let config = EstimatorConfig::default();
        (
            ReasoningEstimator::new(Box::new(backend), limiter, &config),
            calls,
        )
    }

    fn open_limits() -> RateLimits {
        RateLimits {
            min_spacing: Duration::ZERO,
            max_per_minute: 1000,
            max_per_day: 1000,
        }
    }

    fn test_issue() -> Issue {
        Issue {
            item: "Water heater".into(),
            description: "Unit past service life, minor corrosion at fittings.".into(),
            severity: "Medium".into(),
            category: "Plumbing".into(),
            ..Default::default()
        }
    }

    const GOOD: &str = r#"```json
    {"estimated_low": 1200, "estimated_high": 2400,
     "reasoning": "Standard 50 gallon replacement.",
     "assumptions": ["Like-for-like replacement"],
     "risk_factors": ["Code upgrades"],
     "confidence_score": 72}
    ```"#;

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_parses_fenced_json() {
        let (mut est, calls) = estimator(vec![Ok(GOOD.to_string())], open_limits());
        let result = est
            .estimate(&test_issue(), &PropertyContext::default(), &[], "2,000 sq ft")
            .await
            .unwrap();

        assert_eq!(result.source, EstimateSource::Reasoning);
        assert_eq!(result.low, 1200.0);
        assert_eq!(result.high, 2400.0);
        assert!((result.confidence - 0.72).abs() < 1e-9);
        assert_eq!(result.assumptions, vec!["Like-for-like replacement"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_bound_retried_then_accepted() {
        let bad = r#"{"estimated_low": 0, "estimated_high": 500}"#;
        let (mut est, calls) =
            estimator(vec![Ok(bad.to_string()), Ok(GOOD.to_string())], open_limits());
        let result = est
            .estimate(&test_issue(), &PropertyContext::default(), &[], "2,000 sq ft")
            .await;
        assert!(result.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_bad_shape_exhausts_retries() {
        let bad = || Ok(r#"{"estimated_low": -5, "estimated_high": 500}"#.to_string());
        // max_retries defaults to 2: initial attempt plus two retries.
        let (mut est, calls) = estimator(vec![bad(), bad(), bad()], open_limits());
        let result = est
            .estimate(&test_issue(), &PropertyContext::default(), &[], "2,000 sq ft")
            .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_aborts_without_retry() {
        let (mut est, calls) = estimator(
            vec![Err(BackendError::auth(401, "invalid key")), Ok(GOOD.to_string())],
            open_limits(),
        );
        let result = est
            .estimate(&test_issue(), &PropertyContext::default(), &[], "2,000 sq ft")
            .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_rate_limit_waits_without_consuming_retries() {
        // Two rate-limit errors then a bad shape, then success: the bad shape
        // is the only consumed retry.
        let (mut est, calls) = estimator(
            vec![
                Err(BackendError::rate_limited("throttled", Some(Duration::from_secs(5)))),
                Err(BackendError::rate_limited("throttled", None)),
                Ok(r#"{"note": "no bounds"}"#.to_string()),
                Ok(GOOD.to_string()),
            ],
            open_limits(),
        );
        let result = est
            .estimate(&test_issue(), &PropertyContext::default(), &[], "2,000 sq ft")
            .await;
        assert!(result.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_quota_exhaustion_skips_backend_entirely() {
        let limits = RateLimits {
            min_spacing: Duration::ZERO,
            max_per_minute: 1000,
            max_per_day: 0,
        };
        let (mut est, calls) = estimator(vec![Ok(GOOD.to_string())], limits);
        let result = est
            .estimate(&test_issue(), &PropertyContext::default(), &[], "2,000 sq ft")
            .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_tolerates_quoted_numbers_and_defaults() {
        let text = r#"{"estimated_low": "1,200", "estimated_high": "$2,400"}"#;
        let est = parse_estimate(text).unwrap();
        assert_eq!(est.low, 1200.0);
        assert_eq!(est.high, 2400.0);
        // Missing confidence_score defaults to the 50 midpoint.
        assert!((est.confidence - 0.5).abs() < 1e-9);
        assert!(est.reasoning.is_empty());
    }

    #[test]
    fn test_parse_rejects_inverted_range() {
        let text = r#"{"estimated_low": 900, "estimated_high": 300}"#;
        assert!(parse_estimate(text).is_err());
    }
}
