//! Post-fusion estimate validation.
//!
//! Ordered rule checks over a fused estimate: cost sanity (auto-correctable),
//! severity/cost consistency, narrative completeness, and confidence
//! plausibility. The first firing rule sets the action; later rules only add
//! warnings. Auto-correction is a constructor-level switch so a caller can
//! run in report-only mode.

use crate::catalog;
use crate::types::{FusedEstimate, Issue, Severity};
use serde::Serialize;

/// Corrected wide ranges are capped at this ratio.
const CORRECTED_RANGE_RATIO: f64 = 5.0;
/// Single-item estimates above this are excluded outright.
const EXTREME_COST: f64 = 100_000.0;
/// Declared confidence above this with a ratio past `WIDE_RANGE_RATIO` is
/// implausible.
const OVERCONFIDENT_SCORE: f64 = 85.0;
const WIDE_RANGE_RATIO: f64 = 4.0;
/// A Critical issue priced entirely below this is suspicious.
const CRITICAL_FLOOR: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAction {
    Accept,
    FlagForReview,
    RegenerateEstimate,
    Exclude,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    /// Whether the estimate is usable as-is (possibly after correction).
    pub valid: bool,
    pub action: ValidationAction,
    pub reason: String,
    /// Present only when auto-correction fired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_estimate: Option<FusedEstimate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    fn accept(warnings: Vec<String>, corrected: Option<FusedEstimate>) -> Self {
        Self {
            valid: true,
            action: ValidationAction::Accept,
            reason: if corrected.is_some() {
                "Passed validation after auto-correction".to_string()
            } else if warnings.is_empty() {
                "Passed validation".to_string()
            } else {
                "Passed validation with warnings".to_string()
            },
            corrected_estimate: corrected,
            warnings,
        }
    }

    fn flag(reason: String, warnings: Vec<String>, corrected: Option<FusedEstimate>) -> Self {
        Self {
            valid: true,
            action: ValidationAction::FlagForReview,
            reason,
            corrected_estimate: corrected,
            warnings,
        }
    }
}

pub struct EstimateValidator {
    auto_correct: bool,
}

impl EstimateValidator {
    pub fn new(auto_correct: bool) -> Self {
        Self { auto_correct }
    }

    pub fn validate(&self, estimate: &FusedEstimate, issue: &Issue) -> ValidationOutcome {
        let mut warnings = Vec::new();

        // Extreme costs are excluded before anything else; no correction can
        // make a six-figure single-item estimate trustworthy.
        if estimate.high > EXTREME_COST {
            return ValidationOutcome {
                valid: false,
                action: ValidationAction::Exclude,
                reason: format!(
                    "Extreme cost estimate (${:.0}) exceeds ${:.0} threshold",
                    estimate.high, EXTREME_COST
                ),
                corrected_estimate: None,
                warnings,
            };
        }

        // Check 1: cost sanity, auto-correctable.
        let corrected = match self.check_cost_sanity(estimate, issue, &mut warnings) {
            SanityResult::Sound => None,
            SanityResult::Corrected(fixed) => Some(fixed),
            SanityResult::Unfixable(reason) => {
                return ValidationOutcome {
                    valid: false,
                    action: ValidationAction::RegenerateEstimate,
                    reason,
                    corrected_estimate: None,
                    warnings,
                };
            }
        };
        let effective = corrected.as_ref().unwrap_or(estimate);

        // Check 2: severity/cost consistency. Flagged, never corrected.
        if let Some(reason) = check_severity_consistency(effective, issue) {
            return ValidationOutcome::flag(reason, warnings, corrected);
        }

        // Check 3: narrative fields present.
        if effective.reasoning.trim().is_empty() {
            return ValidationOutcome::flag(
                "Estimate has no reasoning text".to_string(),
                warnings,
                corrected,
            );
        }

        // Check 4: declared confidence consistent with range width.
        if let Some(reason) = check_confidence_plausibility(effective) {
            return ValidationOutcome::flag(reason, warnings, corrected);
        }

        ValidationOutcome::accept(warnings, corrected)
    }

    fn check_cost_sanity(
        &self,
        estimate: &FusedEstimate,
        issue: &Issue,
        warnings: &mut Vec<String>,
    ) -> SanityResult {
        let mut low = estimate.low;
        let mut high = estimate.high;
        let mut problems = Vec::new();

        if low < 0.0 {
            problems.push(format!("negative low bound (${:.0})", low));
            low = 0.0;
        }
        if high < low {
            problems.push(format!("inverted range (${:.0} > ${:.0})", low, high));
            std::mem::swap(&mut low, &mut high);
        }
        if low == 0.0 && high > 0.0 {
            problems.push("low bound of $0".to_string());
            low = (high * 0.1).max(100.0).min(high);
        }
        let max_ratio = category_max_ratio(&issue.category);
        if low > 0.0 && high / low > max_ratio {
            problems.push(format!(
                "range ratio {:.1}x beyond the {:.0}x band for the category",
                high / low,
                max_ratio
            ));
            high = low * CORRECTED_RANGE_RATIO;
        }

        if problems.is_empty() {
            return SanityResult::Sound;
        }

        let summary = format!("Cost sanity: {}", problems.join("; "));
        if !self.auto_correct {
            return SanityResult::Unfixable(summary);
        }

        warnings.push(format!("{} (auto-corrected)", summary));
        let mut fixed = estimate.clone();
        fixed.low = low;
        fixed.high = high;
        fixed.most_likely = fixed.most_likely.clamp(low, high);
        SanityResult::Corrected(fixed)
    }
}

enum SanityResult {
    Sound,
    Corrected(FusedEstimate),
    Unfixable(String),
}

/// Widest plausible high/low ratio for a category, taken from the spread of
/// its own fallback range. Fallback-priced work legitimately spans a wide
/// band, so the floor is 10x.
fn category_max_ratio(category: &str) -> f64 {
    let (floor, ceiling) = catalog::fallback_range(category);
    (ceiling / floor).max(10.0)
}

fn check_severity_consistency(estimate: &FusedEstimate, issue: &Issue) -> Option<String> {
    let (_, category_ceiling) = catalog::fallback_range(&issue.category);
    match issue.severity_level() {
        Severity::Low if estimate.high > category_ceiling => Some(format!(
            "Low severity issue priced at ${:.0}, above the ${:.0} ceiling for {}",
            estimate.high,
            category_ceiling,
            if issue.category.is_empty() {
                "general work"
            } else {
                issue.category.as_str()
            }
        )),
        Severity::Critical if estimate.high < CRITICAL_FLOOR => Some(format!(
            "Critical severity issue priced at only ${:.0}-${:.0}",
            estimate.low, estimate.high
        )),
        _ => None,
    }
}

fn check_confidence_plausibility(estimate: &FusedEstimate) -> Option<String> {
    if estimate.low <= 0.0 {
        return None;
    }
    let ratio = estimate.high / estimate.low;
    if estimate.confidence_score > OVERCONFIDENT_SCORE && ratio > WIDE_RANGE_RATIO {
        Some(format!(
            "Confidence {:.0} implausible for a {:.1}x wide range",
            estimate.confidence_score, ratio
        ))
    } else {
        None
    }
}
