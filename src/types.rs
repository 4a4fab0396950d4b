//! Core data types shared across the estimation pipeline.
//!
//! An [`Issue`] is one finding from an inspection report. Each estimation
//! source produces a [`SourceEstimate`]; the orchestrator fuses those into a
//! [`FusedEstimate`] tagged with the [`EstimationMethod`] that produced it.

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One issue record from an enriched inspection report.
///
/// Only the named fields are interpreted; everything else passes through
/// untouched in `extra` so upstream enrichment data survives the round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub item: String,
    /// Free-text problem description. Reports use either `description` or `issue`.
    #[serde(default, alias = "issue")]
    pub description: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Issue {
    /// Stable identity for deduplication when the report carries no `id`.
    pub fn key(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        let desc: String = self.description.chars().take(20).collect();
        format!("{}_{}_{}", self.category, self.item, desc)
    }

    /// Location text lowered for token matching, if present and meaningful.
    pub fn normalized_location(&self) -> Option<String> {
        let loc = self.location.as_deref()?.trim().to_lowercase();
        if loc.is_empty() || matches!(loc.as_str(), "unknown" | "not specified" | "n/a") {
            None
        } else {
            Some(loc)
        }
    }

    pub fn severity_level(&self) -> Severity {
        Severity::parse(&self.severity)
    }
}

/// Issue severity, parsed leniently from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "safety" => Severity::Critical,
            "high" | "major" => Severity::High,
            "medium" | "moderate" => Severity::Medium,
            "low" | "minor" | "cosmetic" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    /// Multiplier applied to fallback base ranges.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Severity::Critical => 1.5,
            Severity::High => 1.2,
            Severity::Medium => 1.0,
            Severity::Low => 0.6,
            Severity::Unknown => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Unknown => "Unknown",
        }
    }
}

/// Property attributes extracted from report metadata. Immutable for the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PropertyContext {
    pub year_built: Option<i32>,
    pub property_type: Option<String>,
    pub square_footage: Option<String>,
    pub age_years: Option<i32>,
}

impl PropertyContext {
    /// Build from raw report metadata, tolerating string-typed years and
    /// alternate field names from different enrichment versions.
    pub fn from_metadata(metadata: &Value) -> Self {
        let year_built = metadata
            .get("year_built")
            .or_else(|| metadata.get("property_year"))
            .and_then(value_as_year);

        let property_type = metadata
            .get("property_type")
            .or_else(|| metadata.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let square_footage = match metadata
            .get("square_footage")
            .or_else(|| metadata.get("size"))
        {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(format!("{} sq ft", n)),
            _ => None,
        };

        let age_years = year_built.and_then(plausible_age);

        Self {
            year_built,
            property_type,
            square_footage,
            age_years,
        }
    }

    /// Coarse size hint from issue count when square footage is unknown.
    pub fn size_hint(issue_count: usize) -> &'static str {
        if issue_count < 10 {
            "1,500 sq ft (small home)"
        } else if issue_count < 20 {
            "2,000 sq ft (medium home)"
        } else {
            "2,500+ sq ft (large home)"
        }
    }
}

fn value_as_year(v: &Value) -> Option<i32> {
    match v {
        Value::Number(n) => n.as_i64().map(|y| y as i32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Age only when the year is a plausible 4-digit year after 1800.
fn plausible_age(year_built: i32) -> Option<i32> {
    let current = Utc::now().year();
    if year_built > 1800 && year_built <= current {
        Some(current - year_built)
    } else {
        None
    }
}

/// The method that produced one source estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateSource {
    Database,
    Reasoning,
    Fallback,
}

/// How the final fused estimate was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    Database,
    Reasoning,
    Hybrid,
    Fallback,
}

impl EstimationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationMethod::Database => "database",
            EstimationMethod::Reasoning => "reasoning",
            EstimationMethod::Hybrid => "hybrid",
            EstimationMethod::Fallback => "fallback",
        }
    }
}

/// A cost estimate from exactly one source. Ephemeral: lives only while a
/// single issue is being fused.
#[derive(Debug, Clone)]
pub struct SourceEstimate {
    pub source: EstimateSource,
    pub low: f64,
    pub high: f64,
    /// Always normalized to [0, 1] regardless of the source's native scale.
    pub confidence: f64,
    pub reasoning: String,
    pub assumptions: Vec<String>,
    pub risk_factors: Vec<String>,
}

impl SourceEstimate {
    /// Construct with bounds enforced: `0 <= low <= high`, confidence in [0, 1].
    pub fn new(source: EstimateSource, low: f64, high: f64, confidence: f64) -> Self {
        let low = low.max(0.0);
        Self {
            source,
            low,
            high: high.max(low),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: String::new(),
            assumptions: Vec::new(),
            risk_factors: Vec::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_assumptions(mut self, assumptions: Vec<String>) -> Self {
        self.assumptions = assumptions;
        self
    }

    pub fn with_risk_factors(mut self, risk_factors: Vec<String>) -> Self {
        self.risk_factors = risk_factors;
        self
    }

    /// Confidence on the 0-100 reporting scale.
    pub fn confidence_score(&self) -> f64 {
        (self.confidence * 100.0).round()
    }
}

/// Policy for deriving the single "most likely" cost from a range.
///
/// The weighting is hand-tuned, not derived, so it stays configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MostLikelyPolicy {
    /// Weighted toward the high bound: `low * low_weight + high * (1 - low_weight)`.
    Skewed { low_weight: f64 },
    /// Plain midpoint of the range.
    Midpoint,
}

impl Default for MostLikelyPolicy {
    fn default() -> Self {
        MostLikelyPolicy::Skewed { low_weight: 0.4 }
    }
}

impl MostLikelyPolicy {
    pub fn apply(&self, low: f64, high: f64) -> f64 {
        match self {
            MostLikelyPolicy::Skewed { low_weight } => {
                let w = low_weight.clamp(0.0, 1.0);
                low * w + high * (1.0 - w)
            }
            MostLikelyPolicy::Midpoint => (low + high) / 2.0,
        }
    }
}

/// Weight given to the database side of a hybrid blend, from the database
/// source's own confidence. The reasoning side always gets the complement.
pub fn database_weight(db_confidence: f64) -> f64 {
    if db_confidence > 0.85 {
        0.7
    } else if db_confidence > 0.7 {
        0.6
    } else {
        0.5
    }
}

/// The chosen or blended estimate for one issue.
#[derive(Debug, Clone, Serialize)]
pub struct FusedEstimate {
    pub low: f64,
    pub high: f64,
    pub most_likely: f64,
    /// 0-100 scale.
    pub confidence_score: f64,
    pub method: EstimationMethod,
    pub reasoning: String,
    pub assumptions: Vec<String>,
    pub risk_factors: Vec<String>,
}

impl FusedEstimate {
    /// Adopt a single source estimate unchanged.
    pub fn from_single(
        est: &SourceEstimate,
        method: EstimationMethod,
        policy: MostLikelyPolicy,
    ) -> Self {
        Self {
            low: est.low,
            high: est.high,
            most_likely: policy.apply(est.low, est.high),
            confidence_score: est.confidence_score(),
            method,
            reasoning: est.reasoning.clone(),
            assumptions: est.assumptions.clone(),
            risk_factors: est.risk_factors.clone(),
        }
    }

    /// Weighted blend of a database and a reasoning estimate.
    ///
    /// The database weight follows [`database_weight`]; low/high bounds and
    /// confidence blend with the same weights, textual fields are unioned.
    pub fn blend(db: &SourceEstimate, reason: &SourceEstimate, policy: MostLikelyPolicy) -> Self {
        let w_db = database_weight(db.confidence);
        let w_ai = 1.0 - w_db;

        let low = db.low * w_db + reason.low * w_ai;
        let high = db.high * w_db + reason.high * w_ai;
        let confidence_score =
            (db.confidence_score() * w_db + reason.confidence_score() * w_ai).round();

        let reasoning = format!(
            "Hybrid estimate: cost catalog ({:.0}% weight) blended with model analysis ({:.0}% weight). Catalog: {} Model: {}",
            w_db * 100.0,
            w_ai * 100.0,
            db.reasoning,
            reason.reasoning,
        );

        Self {
            low,
            high,
            most_likely: policy.apply(low, high),
            confidence_score,
            method: EstimationMethod::Hybrid,
            reasoning,
            assumptions: union_strings(&db.assumptions, &reason.assumptions),
            risk_factors: union_strings(&db.risk_factors, &reason.risk_factors),
        }
    }
}

/// Order-preserving union with duplicates removed.
fn union_strings(a: &[String], b: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(a.len() + b.len());
    for s in a.iter().chain(b.iter()) {
        if !out.contains(s) {
            out.push(s.clone());
        }
    }
    out
}

/// The input document: property metadata plus an ordered list of issues.
#[derive(Debug, Clone, Deserialize)]
pub struct InspectionReport {
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub issues: Vec<Value>,
}

impl InspectionReport {
    /// Decode issue entries, skipping anything that is not a well-formed
    /// object. Returns the parsed issues and the number skipped.
    pub fn parse_issues(&self) -> (Vec<Issue>, usize) {
        let mut issues = Vec::with_capacity(self.issues.len());
        let mut skipped = 0;
        for (idx, raw) in self.issues.iter().enumerate() {
            if !raw.is_object() {
                tracing::warn!("Skipping issue {}: not an object", idx);
                skipped += 1;
                continue;
            }
            match serde_json::from_value::<Issue>(raw.clone()) {
                Ok(issue) => issues.push(issue),
                Err(e) => {
                    tracing::warn!("Skipping issue {}: {}", idx, e);
                    skipped += 1;
                }
            }
        }
        (issues, skipped)
    }
}
