//! The per-issue estimation pipeline and run-level orchestration.
//!
//! Each issue walks a fixed sequence: realign classification, catalog
//! lookup, optional reasoning call, fusion, confidence scoring, validation,
//! bundling. Sources that produce nothing fall through to the next; the
//! rule-based fallback guarantees a priced result for anything that can be
//! classified at all. Issues are processed strictly one at a time because the
//! external call quota, not CPU, is the binding constraint.

use crate::catalog::{self, CostCatalog, LookupContext};
use crate::classify::{realign, Classifier, SectionClassifier};
use crate::confidence::{ConfidenceBreakdown, ConfidenceScorer, ScoreContext};
use crate::config::EstimatorConfig;
use crate::diaglog::DiagnosticLog;
use crate::ratelimit::{FileQuotaStore, RateLimiter};
use crate::reasoning::{GeminiBackend, ReasoningEstimator};
use crate::relations::{RelationshipAnalyzer, RelationshipReport};
use crate::types::{
    EstimateSource, EstimationMethod, FusedEstimate, InspectionReport, Issue, PropertyContext,
    SourceEstimate,
};
use crate::validate::{EstimateValidator, ValidationAction, ValidationOutcome};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// Catalog fallback confidence, on the source [0, 1] scale.
const FALLBACK_CONFIDENCE: f64 = 0.4;

/// Bundling advice attached to a result when bundling is worthwhile.
#[derive(Debug, Clone, Serialize)]
pub struct BundlingSummary {
    pub related_issues: Vec<String>,
    pub savings_pct: f64,
    pub recommendation: String,
}

/// One fully processed issue.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateRecord {
    pub item: String,
    pub issue_description: String,
    pub severity: String,
    pub estimated_low: f64,
    pub estimated_high: f64,
    pub most_likely: f64,
    /// Blended per-estimate confidence, 0-100.
    pub confidence_score: f64,
    pub estimation_method: EstimationMethod,
    pub reasoning: String,
    pub assumptions: Vec<String>,
    pub risk_factors: Vec<String>,
    /// Multi-dimensional confidence breakdown.
    pub confidence: ConfidenceBreakdown,
    pub validation: ValidationOutcome,
    pub needs_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundling: Option<BundlingSummary>,
    /// The input issue, carried for traceability.
    pub original_issue: Issue,
}

/// Run-level counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_issues: usize,
    pub skipped_malformed: usize,
    pub excluded: usize,
    pub database_matches: usize,
    pub reasoning_estimates: usize,
    pub hybrid_estimates: usize,
    pub fallback_estimates: usize,
    pub excellent_confidence: usize,
    pub good_confidence: usize,
    pub fair_confidence: usize,
    pub poor_confidence: usize,
    pub needs_review: usize,
    pub auto_corrected: usize,
    pub bundles_identified: usize,
    pub total_estimated_low: f64,
    pub total_estimated_high: f64,
    pub average_confidence: f64,
}

/// Everything one run produces.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub generated_at: String,
    pub model: String,
    pub property_data: Value,
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<RelationshipReport>,
    pub cost_estimates: Vec<EstimateRecord>,
}

pub struct Estimator {
    config: EstimatorConfig,
    catalog: CostCatalog,
    classifier: Box<dyn Classifier>,
    analyzer: RelationshipAnalyzer,
    scorer: ConfidenceScorer,
    validator: EstimateValidator,
    reasoning: Option<ReasoningEstimator>,
    diag: DiagnosticLog,
}

impl Estimator {
    /// Build a full estimator from configuration. Reasoning is enabled only
    /// when an API key is configured.
    pub fn new(config: EstimatorConfig) -> Self {
        let reasoning = config.api_key.clone().map(|key| {
            let backend = GeminiBackend::new(key, config.model.clone());
            let limiter = RateLimiter::new(
                config.rate_limits.clone(),
                Box::new(FileQuotaStore::new(&config.quota_path)),
            );
            ReasoningEstimator::new(Box::new(backend), limiter, &config)
        });
        Self::with_reasoning(config, reasoning)
    }

    /// Build with an explicit (or absent) reasoning estimator.
    pub fn with_reasoning(config: EstimatorConfig, reasoning: Option<ReasoningEstimator>) -> Self {
        Self {
            catalog: CostCatalog::new(),
            classifier: Box::new(SectionClassifier),
            analyzer: RelationshipAnalyzer::new(),
            scorer: ConfidenceScorer::default(),
            validator: EstimateValidator::new(config.auto_correct),
            diag: DiagnosticLog::new(&config.diagnostic_log_path),
            reasoning,
            config,
        }
    }

    /// Process a full report. Always completes and always returns a result
    /// set, even with every external source unavailable.
    pub async fn estimate_report(&mut self, report: &InspectionReport) -> RunOutput {
        let property = PropertyContext::from_metadata(&report.metadata);
        let (mut issues, skipped_malformed) = report.parse_issues();
        if skipped_malformed > 0 {
            self.diag.record(
                "malformed_input",
                &format!("{} issue entries skipped", skipped_malformed),
            );
        }

        tracing::info!("Estimating {} issues", issues.len());

        for issue in issues.iter_mut() {
            realign(issue, self.classifier.as_ref());
        }

        let relationships = self
            .config
            .enable_relationships
            .then(|| self.analyzer.analyze_all(&issues));

        let size_hint = PropertyContext::size_hint(issues.len());

        let mut summary = RunSummary {
            total_issues: issues.len() + skipped_malformed,
            skipped_malformed,
            bundles_identified: relationships
                .as_ref()
                .map(|r| r.bundles.len())
                .unwrap_or(0),
            ..RunSummary::default()
        };

        let mut results = Vec::with_capacity(issues.len());
        for (idx, issue) in issues.iter().enumerate() {
            tracing::info!("[{}/{}] {}", idx + 1, issues.len(), issue.item);
            match self.estimate_issue(issue, &issues, &property, size_hint).await {
                Some(record) => {
                    tally(&mut summary, &record);
                    results.push(record);
                }
                None => summary.excluded += 1,
            }
        }

        if !results.is_empty() {
            summary.average_confidence = (results
                .iter()
                .map(|r| r.confidence.overall)
                .sum::<f64>()
                / results.len() as f64
                * 10.0)
                .round()
                / 10.0;
        }

        tracing::info!(
            "Run complete: {} estimated, {} excluded ({} db, {} reasoning, {} hybrid, {} fallback)",
            results.len(),
            summary.excluded,
            summary.database_matches,
            summary.reasoning_estimates,
            summary.hybrid_estimates,
            summary.fallback_estimates,
        );

        RunOutput {
            generated_at: Utc::now().to_rfc3339(),
            model: self.config.model.clone(),
            property_data: report.metadata.clone(),
            summary,
            relationships,
            cost_estimates: results,
        }
    }

    async fn estimate_issue(
        &mut self,
        issue: &Issue,
        all_issues: &[Issue],
        property: &PropertyContext,
        size_hint: &str,
    ) -> Option<EstimateRecord> {
        // Step 1: catalog lookup.
        let db_estimate = if self.config.enable_catalog {
            self.catalog.get_estimate(
                &issue.item,
                Some(&issue.description),
                LookupContext {
                    property_age: property.age_years,
                    ..LookupContext::default()
                },
            )
        } else {
            None
        };

        // Step 2: bundling context, reused for the prompt and the result.
        let bundle = self.config.enable_relationships.then(|| {
            self.analyzer
                .group_for_bundled_estimate(issue, all_issues, self.config.max_bundle_size)
        });

        // Step 3: reasoning, only when the catalog is absent or unsure.
        let wants_reasoning = db_estimate
            .as_ref()
            .map(|db| db.confidence < self.config.reasoning_trigger_confidence)
            .unwrap_or(true);
        let ai_estimate = if wants_reasoning {
            if let Some(reasoning) = self.reasoning.as_mut() {
                let related: &[Issue] = bundle
                    .as_ref()
                    .map(|b| b.related_issues.as_slice())
                    .unwrap_or(&[]);
                let result = reasoning.estimate(issue, property, related, size_hint).await;
                if result.is_none() {
                    self.diag.record(
                        "reasoning_unavailable",
                        &format!("no usable reasoning estimate for '{}'", issue.item),
                    );
                }
                result
            } else {
                None
            }
        } else {
            None
        };

        // Step 4: fuse, or fall back.
        let policy = self.config.most_likely_policy;
        let mut fused = match (&db_estimate, &ai_estimate) {
            (Some(db), Some(ai)) => FusedEstimate::blend(db, ai, policy),
            (Some(db), None) => FusedEstimate::from_single(db, EstimationMethod::Database, policy),
            (None, Some(ai)) => FusedEstimate::from_single(ai, EstimationMethod::Reasoning, policy),
            (None, None) => {
                let Some(fallback) = fallback_estimate(issue) else {
                    tracing::warn!("Excluding '{}': no category to classify", issue.item);
                    self.diag.record(
                        "classification_failure",
                        &format!("'{}' has no category or section", issue.item),
                    );
                    return None;
                };
                FusedEstimate::from_single(&fallback, EstimationMethod::Fallback, policy)
            }
        };

        // Step 5: multi-dimensional confidence.
        let confidence = self.scorer.score(
            &fused,
            issue,
            &ScoreContext {
                property_age: property.age_years,
                has_photos: issue_has_photos(issue),
                database_match: db_estimate.as_ref().map(|d| d.confidence),
                historical_similarity: None,
            },
        );

        // Step 6: validation; a correction replaces the fused estimate.
        let validation = self.validator.validate(&fused, issue);
        if let Some(corrected) = &validation.corrected_estimate {
            fused = corrected.clone();
        }
        if validation.action == ValidationAction::Exclude {
            tracing::warn!("Excluding '{}': {}", issue.item, validation.reason);
            self.diag.record("validation_exclusion", &validation.reason);
            return None;
        }

        let needs_review = confidence.manual_review_needed
            || matches!(
                validation.action,
                ValidationAction::FlagForReview | ValidationAction::RegenerateEstimate
            );

        // Step 7: attach bundling advice when it is worth acting on.
        let bundling = bundle
            .filter(|b| b.should_estimate_together)
            .map(|b| BundlingSummary {
                related_issues: b.related_issues.iter().map(|r| r.item.clone()).collect(),
                savings_pct: b.labor_savings_pct,
                recommendation: b.recommendation,
            });

        Some(EstimateRecord {
            item: issue.item.clone(),
            issue_description: issue.description.clone(),
            severity: issue.severity_level().as_str().to_string(),
            estimated_low: fused.low,
            estimated_high: fused.high,
            most_likely: fused.most_likely,
            confidence_score: fused.confidence_score,
            estimation_method: fused.method,
            reasoning: fused.reasoning.clone(),
            assumptions: fused.assumptions.clone(),
            risk_factors: fused.risk_factors.clone(),
            confidence,
            validation,
            needs_review,
            bundling,
            original_issue: issue.clone(),
        })
    }
}

/// Rule-based last resort: coarse category range times a severity
/// multiplier. `None` only when there is no category text at all to match.
fn fallback_estimate(issue: &Issue) -> Option<SourceEstimate> {
    let category_src = if !issue.category.trim().is_empty() {
        issue.category.trim()
    } else if !issue.section.trim().is_empty() {
        issue.section.trim()
    } else {
        return None;
    };

    let (base_low, base_high) = catalog::fallback_range(category_src);
    let severity = issue.severity_level();
    let mult = severity.cost_multiplier();

    Some(
        SourceEstimate::new(
            EstimateSource::Fallback,
            base_low * mult,
            base_high * mult,
            FALLBACK_CONFIDENCE,
        )
        .with_reasoning(format!(
            "Rule-based fallback for {} issue with {} severity.",
            category_src,
            severity.as_str()
        ))
        .with_assumptions(vec![
            "Standard difficulty and access".to_string(),
            "No hidden damage or complications".to_string(),
            "Based on typical regional labor and material costs".to_string(),
        ])
        .with_risk_factors(vec![
            "Unknown scope without on-site inspection".to_string(),
            "Hidden damage may increase costs".to_string(),
        ]),
    )
}

/// Photo evidence flag from the passthrough fields, when enrichment
/// attached any.
fn issue_has_photos(issue: &Issue) -> bool {
    for key in ["photos", "photo_refs", "images"] {
        match issue.extra.get(key) {
            Some(Value::Array(a)) if !a.is_empty() => return true,
            Some(Value::Bool(true)) => return true,
            _ => {}
        }
    }
    false
}

fn tally(summary: &mut RunSummary, record: &EstimateRecord) {
    match record.estimation_method {
        EstimationMethod::Database => summary.database_matches += 1,
        EstimationMethod::Reasoning => summary.reasoning_estimates += 1,
        EstimationMethod::Hybrid => summary.hybrid_estimates += 1,
        EstimationMethod::Fallback => summary.fallback_estimates += 1,
    }

    match record.confidence.tier() {
        "excellent" => summary.excellent_confidence += 1,
        "good" => summary.good_confidence += 1,
        "fair" => summary.fair_confidence += 1,
        _ => summary.poor_confidence += 1,
    }

    if record.needs_review {
        summary.needs_review += 1;
    }
    if record.validation.corrected_estimate.is_some() {
        summary.auto_corrected += 1;
    }
    summary.total_estimated_low += record.estimated_low;
    summary.total_estimated_high += record.estimated_high;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{
        BackendError, GenerationOptions, GenerativeBackend, ReasoningEstimator,
    };
    use crate::config::RateLimits;
    use crate::ratelimit::{DailyQuota, QuotaStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MemStore;

    impl QuotaStore for MemStore {
        fn load(&self) -> Option<DailyQuota> {
            None
        }
        fn save(&self, _: &DailyQuota) {}
    }

    struct ScriptedBackend(Mutex<Vec<Result<String, BackendError>>>);

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<String, BackendError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn test_config() -> EstimatorConfig {
        let dir = std::env::temp_dir();
        EstimatorConfig {
            quota_path: dir.join("costfuse_test_quota.json"),
            diagnostic_log_path: dir.join("costfuse_test_errors.log"),
            ..EstimatorConfig::default()
        }
    }

    fn offline_estimator(config: EstimatorConfig) -> Estimator {
        Estimator::with_reasoning(config, None)
    }

    fn scripted_estimator(
        config: EstimatorConfig,
        script: Vec<Result<String, BackendError>>,
    ) -> Estimator {
        let limiter = RateLimiter::new(
            RateLimits {
                min_spacing: Duration::ZERO,
                max_per_minute: 1000,
                max_per_day: 1000,
            },
            Box::new(MemStore),
        );
        let reasoning = ReasoningEstimator::new(
            Box::new(ScriptedBackend(Mutex::new(script))),
            limiter,
            &config,
        );
        Estimator::with_reasoning(config, Some(reasoning))
    }

    fn report(issues: Vec<Value>) -> InspectionReport {
        serde_json::from_value(json!({
            "metadata": {"year_built": 2005, "property_type": "Single family"},
            "issues": issues,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_fallback_applies_category_range_and_severity_multiplier() {
        let mut config = test_config();
        config.enable_catalog = false;
        let mut est = offline_estimator(config);

        let output = est
            .estimate_report(&report(vec![json!({
                "item": "AC condenser unit",
                "severity": "High",
                "category": "HVAC",
                "description": "Unit not cooling."
            })]))
            .await;

        assert_eq!(output.cost_estimates.len(), 1);
        let record = &output.cost_estimates[0];
        assert_eq!(record.estimation_method, EstimationMethod::Fallback);
        assert_eq!(record.estimated_low, 360.0);
        assert_eq!(record.estimated_high, 9600.0);
        assert_eq!(output.summary.fallback_estimates, 1);
    }

    #[tokio::test]
    async fn test_catalog_match_skips_reasoning() {
        // Catalog confidence 0.9 for the condenser is above the 0.75 trigger;
        // an empty script would panic if the backend were called.
        let mut est = scripted_estimator(test_config(), vec![]);
        let output = est
            .estimate_report(&report(vec![json!({
                "item": "AC condenser unit replacement",
                "severity": "High",
                "category": "HVAC",
                "description": "Compressor failed, unit at end of life."
            })]))
            .await;

        let record = &output.cost_estimates[0];
        assert_eq!(record.estimation_method, EstimationMethod::Database);
        assert_eq!(output.summary.database_matches, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_catalog_match_fuses_with_reasoning() {
        // Roof replacement sits at 0.7 catalog confidence, under the trigger.
        let response = r#"{"estimated_low": 9000, "estimated_high": 16000,
            "reasoning": "Full tear-off and re-shingle with labor and materials.",
            "assumptions": ["Single layer tear-off"],
            "risk_factors": ["Deck damage"],
            "confidence_score": 80}"#;
        let mut est = scripted_estimator(test_config(), vec![Ok(response.to_string())]);

        let output = est
            .estimate_report(&report(vec![json!({
                "item": "Shingle roof replacement",
                "severity": "High",
                "category": "Roofing",
                "description": "Shingles worn through across all slopes."
            })]))
            .await;

        let record = &output.cost_estimates[0];
        assert_eq!(record.estimation_method, EstimationMethod::Hybrid);
        // Catalog confidence 0.7 is not above 0.7, so the blend is 50/50.
        assert_eq!(record.estimated_low, (7000.0 + 9000.0) / 2.0);
        assert_eq!(record.estimated_high, (18000.0 + 16000.0) / 2.0);
        assert_eq!(output.summary.hybrid_estimates, 1);
    }

    #[tokio::test]
    async fn test_reasoning_failure_falls_back() {
        let mut config = test_config();
        config.enable_catalog = false;
        let bad = || Ok(r#"{"estimated_low": 0, "estimated_high": 500}"#.to_string());
        let mut est = scripted_estimator(config, vec![bad(), bad(), bad()]);

        let output = est
            .estimate_report(&report(vec![json!({
                "item": "Slab leak",
                "severity": "Critical",
                "category": "Plumbing",
                "description": "Hot water line leaking under slab."
            })]))
            .await;

        let record = &output.cost_estimates[0];
        // The zero-low responses are never accepted; the fallback prices it.
        assert_eq!(record.estimation_method, EstimationMethod::Fallback);
        assert_eq!(record.estimated_low, 300.0);
        assert_eq!(record.estimated_high, 7500.0);
    }

    #[tokio::test]
    async fn test_bounds_hold_and_no_zero_results() {
        let mut est = offline_estimator(test_config());
        let output = est
            .estimate_report(&report(vec![
                json!({"item": "GFCI outlet", "severity": "Low", "category": "Electrical",
                       "description": "No protection at kitchen counter."}),
                json!({"item": "Foundation settlement", "severity": "Critical",
                       "category": "Foundation",
                       "description": "Cracks and sloped floors at the south wall."}),
                json!({"item": "Mystery widget", "severity": "Medium", "category": "General",
                       "description": "Unclear finding."}),
            ]))
            .await;

        assert_eq!(output.cost_estimates.len(), 3);
        for record in &output.cost_estimates {
            assert!(record.estimated_low >= 0.0);
            assert!(record.estimated_high >= record.estimated_low);
            assert!(record.estimated_high > 0.0);
            assert!(record.most_likely >= record.estimated_low);
            assert!(record.most_likely <= record.estimated_high);
        }
    }

    #[tokio::test]
    async fn test_unclassifiable_issue_excluded_and_counted() {
        let mut config = test_config();
        config.enable_catalog = false;
        let mut est = offline_estimator(config);

        let output = est
            .estimate_report(&report(vec![json!({
                "item": "Unlabeled finding",
                "severity": "Medium",
                "description": "No category or section on this one."
            })]))
            .await;

        assert!(output.cost_estimates.is_empty());
        assert_eq!(output.summary.excluded, 1);
        assert_eq!(output.summary.total_issues, 1);
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped_not_fatal() {
        let mut est = offline_estimator(test_config());
        let output = est
            .estimate_report(&report(vec![
                json!("just a string"),
                json!(42),
                json!({"item": "Roof leak", "severity": "Medium", "category": "Roofing",
                       "description": "Stain on ceiling below valley."}),
            ]))
            .await;

        assert_eq!(output.summary.skipped_malformed, 2);
        assert_eq!(output.cost_estimates.len(), 1);
        assert_eq!(output.summary.total_issues, 3);
    }

    #[tokio::test]
    async fn test_same_trade_same_location_bundling_attached() {
        let mut est = offline_estimator(test_config());
        let output = est
            .estimate_report(&report(vec![
                json!({"item": "Lifted shingles", "severity": "Medium", "category": "Roofing",
                       "location": "North slope", "description": "Shingles lifting at ridge."}),
                json!({"item": "Cracked flashing", "severity": "Medium", "category": "Roofing",
                       "location": "north slope", "description": "Flashing split at chimney."}),
            ]))
            .await;

        assert_eq!(output.summary.bundles_identified, 1);
        for record in &output.cost_estimates {
            let bundling = record.bundling.as_ref().expect("should bundle");
            assert!(bundling.savings_pct > 0.0);
            assert!(!bundling.related_issues.contains(&record.item));
        }
    }

    #[tokio::test]
    async fn test_summary_totals_and_tiers_consistent() {
        let mut est = offline_estimator(test_config());
        let output = est
            .estimate_report(&report(vec![
                json!({"item": "Water heater", "severity": "Medium", "category": "Plumbing",
                       "description": "Past service life, corrosion at fittings."}),
                json!({"item": "Drywall repair", "severity": "Low", "category": "Interior",
                       "description": "Small hole in hallway wall."}),
            ]))
            .await;

        let sum_low: f64 = output.cost_estimates.iter().map(|r| r.estimated_low).sum();
        let sum_high: f64 = output.cost_estimates.iter().map(|r| r.estimated_high).sum();
        assert_eq!(output.summary.total_estimated_low, sum_low);
        assert_eq!(output.summary.total_estimated_high, sum_high);

        let tier_total = output.summary.excellent_confidence
            + output.summary.good_confidence
            + output.summary.fair_confidence
            + output.summary.poor_confidence;
        assert_eq!(tier_total, output.cost_estimates.len());
        assert!(output.summary.average_confidence > 0.0);
    }
}
