//! Multi-dimensional confidence scoring.
//!
//! Eleven independent dimensions, each scored 0-100, combined with fixed
//! weights into an overall score: data quality (description, measurements,
//! photos, location), estimation factors (database match, market data, range
//! quality, reasoning quality), and risk factors (age, access, hidden
//! damage). Absent optional signals score neutral mid-range, never zero, so
//! sparse input degrades the score instead of zeroing it.

use crate::types::{FusedEstimate, Issue};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Fixed dimension weights; they sum to 1.
const WEIGHTS: &[(&str, f64)] = &[
    // Data quality (40%)
    ("description_completeness", 0.15),
    ("has_measurements", 0.10),
    ("has_photos", 0.10),
    ("has_location", 0.05),
    // Estimation factors (40%)
    ("database_match", 0.15),
    ("market_data_availability", 0.10),
    ("estimate_range_quality", 0.10),
    ("reasoning_quality", 0.05),
    // Risk factors (20%)
    ("age_uncertainty", 0.07),
    ("access_difficulty", 0.07),
    ("hidden_damage_risk", 0.06),
];

/// Dimensions where a critically low score alone forces manual review.
const CRITICAL_DIMENSIONS: &[&str] = &["estimate_range_quality", "reasoning_quality"];
const CRITICAL_SCORE: f64 = 20.0;

const WEAK_THRESHOLD: f64 = 60.0;
const EVIDENCE_THRESHOLD: f64 = 60.0;

/// Optional signals the caller may or may not have.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreContext {
    pub property_age: Option<i32>,
    pub has_photos: bool,
    /// Catalog match confidence in [0, 1], when the catalog matched.
    pub database_match: Option<f64>,
    /// Similarity to historical estimates in [0, 1]. Used in place of the
    /// database signal when no catalog match exists.
    pub historical_similarity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeakDimension {
    pub dimension: String,
    pub score: f64,
    pub improvement_tip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceBreakdown {
    /// Weighted overall score in [0, 100].
    pub overall: f64,
    pub breakdown: BTreeMap<String, f64>,
    pub recommendation: String,
    pub weak_dimensions: Vec<WeakDimension>,
    pub manual_review_needed: bool,
    pub inspection_needed: bool,
}

impl ConfidenceBreakdown {
    /// Tier label used in run summaries.
    pub fn tier(&self) -> &'static str {
        tier_for(self.overall)
    }
}

fn tier_for(score: f64) -> &'static str {
    if score >= 85.0 {
        "excellent"
    } else if score >= 70.0 {
        "good"
    } else if score >= 55.0 {
        "fair"
    } else if score >= 40.0 {
        "poor"
    } else {
        "very_poor"
    }
}

pub struct ConfidenceScorer {
    /// Overall score below this forces `manual_review_needed`.
    review_threshold: f64,
    measurement_patterns: Vec<Regex>,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(65.0)
    }
}

impl ConfidenceScorer {
    pub fn new(review_threshold: f64) -> Self {
        let measurement_patterns = [
            r#"\d+\s*(inch|foot|ft|cm|mm)"#,
            r#"\d+\s*["']"#,
            r"\d+x\d+",
            r"\d+\s*(sq|square)\s*(ft|feet)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();
        Self {
            review_threshold,
            measurement_patterns,
        }
    }

    pub fn score(
        &self,
        estimate: &FusedEstimate,
        issue: &Issue,
        ctx: &ScoreContext,
    ) -> ConfidenceBreakdown {
        let mut scores = BTreeMap::new();

        scores.insert(
            "description_completeness".to_string(),
            score_description(&issue.description),
        );
        scores.insert(
            "has_measurements".to_string(),
            self.score_measurements(issue),
        );
        scores.insert(
            "has_photos".to_string(),
            if ctx.has_photos { 100.0 } else { 60.0 },
        );
        scores.insert(
            "has_location".to_string(),
            score_location(issue.location.as_deref().unwrap_or("")),
        );

        let db_signal = ctx.database_match.or(ctx.historical_similarity);
        scores.insert(
            "database_match".to_string(),
            db_signal.map(|s| s.clamp(0.0, 1.0) * 100.0).unwrap_or(50.0),
        );
        scores.insert(
            "market_data_availability".to_string(),
            score_market_data(&issue.category),
        );
        scores.insert(
            "estimate_range_quality".to_string(),
            score_range_quality(estimate.low, estimate.high),
        );
        scores.insert(
            "reasoning_quality".to_string(),
            score_reasoning(&estimate.reasoning),
        );

        scores.insert(
            "age_uncertainty".to_string(),
            score_age_factor(ctx.property_age, &issue.item),
        );
        scores.insert(
            "access_difficulty".to_string(),
            score_access(issue.location.as_deref().unwrap_or(""), &issue.description),
        );
        scores.insert(
            "hidden_damage_risk".to_string(),
            assess_hidden_damage(&issue.description, &issue.severity),
        );

        let overall: f64 = WEIGHTS
            .iter()
            .map(|(dim, w)| scores.get(*dim).copied().unwrap_or(50.0) * w)
            .sum();
        let overall = (overall * 10.0).round() / 10.0;

        let weak_dimensions = weak_dimensions(&scores);

        let critically_low = CRITICAL_DIMENSIONS
            .iter()
            .any(|dim| scores.get(*dim).copied().unwrap_or(100.0) < CRITICAL_SCORE);
        let manual_review_needed = overall < self.review_threshold || critically_low;

        // Evidence strength: what the estimate is grounded on, photos and
        // written measurements.
        let evidence = (scores["has_photos"] + scores["has_measurements"]) / 2.0;
        let inspection_needed = evidence < EVIDENCE_THRESHOLD;

        ConfidenceBreakdown {
            recommendation: recommendation_for(overall),
            overall,
            breakdown: scores,
            weak_dimensions,
            manual_review_needed,
            inspection_needed,
        }
    }

    fn score_measurements(&self, issue: &Issue) -> f64 {
        if issue.extra.contains_key("measurements") || issue.extra.contains_key("dimensions") {
            return 100.0;
        }
        let text = issue.description.to_lowercase();
        if self.measurement_patterns.iter().any(|re| re.is_match(&text)) {
            90.0
        } else {
            50.0
        }
    }
}

fn score_description(description: &str) -> f64 {
    if description.trim().is_empty() {
        // No text is a data-quality problem, not a scoring error.
        return 30.0;
    }

    let lower = description.to_lowercase();
    let mut score = match description.len() {
        0..=19 => 30.0,
        20..=49 => 50.0,
        50..=99 => 70.0,
        _ => 85.0,
    };

    const DETAIL_KEYWORDS: &[&str] = &[
        "crack", "leak", "damaged", "worn", "corrosion", "rust", "missing", "broken",
        "deteriorated", "sagging", "stain",
    ];
    let details = DETAIL_KEYWORDS.iter().filter(|kw| lower.contains(**kw)).count();
    score += (details as f64 * 3.0).min(15.0);

    const UNITS: &[&str] = &["inch", "foot", "ft", "\"", "'", "cm", "mm"];
    if UNITS.iter().any(|u| lower.contains(u)) {
        score += 10.0;
    }

    score.min(100.0)
}

fn score_location(location: &str) -> f64 {
    let lower = location.trim().to_lowercase();
    if lower.is_empty() || matches!(lower.as_str(), "not specified" | "unknown" | "n/a") {
        return 30.0;
    }

    const SPECIFIC: &[&str] = &[
        "northeast", "northwest", "southeast", "southwest", "front", "rear", "side", "left",
        "right", "bedroom", "bathroom", "kitchen", "garage", "attic", "basement", "crawl space",
    ];
    if SPECIFIC.iter().any(|kw| lower.contains(kw)) {
        return 100.0;
    }

    const GENERAL: &[&str] = &["exterior", "interior", "roof", "foundation", "wall"];
    if GENERAL.iter().any(|kw| lower.contains(kw)) {
        return 70.0;
    }

    50.0
}

fn score_market_data(category: &str) -> f64 {
    let lower = category.to_lowercase();
    const HIGH_DATA: &[&str] = &["hvac", "plumbing", "electrical", "roofing", "painting"];
    const LOW_DATA: &[&str] = &["structural", "foundation", "specialty"];

    if HIGH_DATA.iter().any(|c| lower.contains(c)) {
        90.0
    } else if LOW_DATA.iter().any(|c| lower.contains(c)) {
        60.0
    } else {
        75.0
    }
}

fn score_range_quality(low: f64, high: f64) -> f64 {
    if low <= 0.0 || high <= 0.0 {
        tracing::warn!(
            "Range quality 0: non-positive bounds low={}, high={}",
            low,
            high
        );
        return 0.0;
    }
    if low >= high {
        tracing::warn!("Range quality 0: degenerate range {} >= {}", low, high);
        return 0.0;
    }

    let ratio = high / low;
    if (1.3..=2.5).contains(&ratio) {
        100.0
    } else if (1.2..=3.0).contains(&ratio) {
        85.0
    } else if (1.1..=4.0).contains(&ratio) {
        70.0
    } else if ratio < 1.1 {
        // Too narrow reads as overconfident.
        40.0
    } else {
        50.0
    }
}

fn score_reasoning(reasoning: &str) -> f64 {
    if reasoning.trim().is_empty() {
        tracing::warn!("Reasoning quality 0: empty reasoning field");
        return 0.0;
    }

    let lower = reasoning.to_lowercase();
    let mut score = match reasoning.len() {
        0..=49 => 20.0,
        50..=149 => 60.0,
        150..=299 => 80.0,
        _ => 90.0,
    };

    if lower.contains("labor") || lower.contains("hours") {
        score += 5.0;
    }
    if lower.contains("material") || lower.contains("supplies") {
        score += 5.0;
    }
    if lower.contains("market") {
        score += 5.0;
    }

    const VAGUE: &[&str] = &["depends", "varies", "uncertain", "unclear", "unknown"];
    let vague = VAGUE.iter().filter(|p| lower.contains(**p)).count();
    score -= vague as f64 * 5.0;

    score.clamp(0.0, 100.0)
}

fn score_age_factor(property_age: Option<i32>, item: &str) -> f64 {
    let Some(age) = property_age else {
        return 60.0;
    };

    let lower = item.to_lowercase();
    // (typical lifespan, high-uncertainty age) per component family.
    const AGE_CRITICAL: &[(&str, i32, i32)] = &[
        ("hvac", 15, 20),
        ("water heater", 10, 15),
        ("roof", 20, 25),
        ("electrical panel", 30, 40),
        ("foundation", 50, 70),
    ];

    for (key, typical_life, uncertain_age) in AGE_CRITICAL {
        if lower.contains(key) {
            return if age <= *typical_life {
                90.0
            } else if age <= *uncertain_age {
                70.0
            } else {
                50.0
            };
        }
    }

    80.0
}

fn score_access(location: &str, description: &str) -> f64 {
    let text = format!("{} {}", location, description).to_lowercase();

    const DIFFICULT: &[&str] = &[
        "attic", "crawl space", "under slab", "behind wall", "inaccessible",
        "difficult access", "hard to reach", "underground", "buried",
    ];
    if DIFFICULT.iter().any(|kw| text.contains(kw)) {
        return 50.0;
    }

    const EASY: &[&str] = &["visible", "accessible", "exposed", "open", "exterior", "garage"];
    if EASY.iter().any(|kw| text.contains(kw)) {
        return 95.0;
    }

    75.0
}

fn assess_hidden_damage(description: &str, severity: &str) -> f64 {
    let desc = description.to_lowercase();
    let sev = severity.to_lowercase();

    const HIGH_RISK: &[&str] = &[
        "leak", "water damage", "moisture", "mold", "foundation crack", "structural",
        "termite", "extensive", "severe",
    ];
    let hits = HIGH_RISK.iter().filter(|kw| desc.contains(**kw)).count();

    if hits >= 2 || sev == "critical" {
        40.0
    } else if hits == 1 || sev == "high" {
        60.0
    } else {
        85.0
    }
}

fn recommendation_for(overall: f64) -> String {
    let text = match tier_for(overall) {
        "excellent" => "Excellent - Estimate is highly reliable",
        "good" => "Good - Estimate is reliable with minor uncertainties",
        "fair" => "Fair - Estimate has moderate uncertainties; consider professional inspection",
        "poor" => "Poor - High uncertainty; professional inspection strongly recommended",
        _ => "Very Poor - Insufficient data; on-site inspection required",
    };
    text.to_string()
}

fn weak_dimensions(scores: &BTreeMap<String, f64>) -> Vec<WeakDimension> {
    let mut weak: Vec<WeakDimension> = scores
        .iter()
        .filter(|(_, score)| **score < WEAK_THRESHOLD)
        .map(|(dimension, score)| WeakDimension {
            dimension: dimension.clone(),
            score: (score * 10.0).round() / 10.0,
            improvement_tip: improvement_tip(dimension).to_string(),
        })
        .collect();
    weak.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    weak
}

fn improvement_tip(dimension: &str) -> &'static str {
    match dimension {
        "description_completeness" => {
            "Request more detailed description with specific observations"
        }
        "has_measurements" => "Include measurements (length, width, area affected)",
        "has_photos" => "Take photos of the issue from multiple angles",
        "has_location" => "Specify exact location (e.g., 'southeast corner of bedroom 2')",
        "database_match" => "Need more specific component identification",
        "market_data_availability" => "Limited market data for this type of work",
        "estimate_range_quality" => "Cost range may be too wide or too narrow",
        "reasoning_quality" => "Reasoning lacks specific cost breakdown details",
        "age_uncertainty" => {
            "Property age affects component lifespan; consider replacement vs repair"
        }
        "access_difficulty" => "Difficult access may increase labor costs significantly",
        "hidden_damage_risk" => "High risk of discovering additional issues during repair",
        _ => "Consider gathering more information",
    }
}
