//! Static component cost catalog.
//!
//! A fixed table of common repair components with market cost ranges,
//! contractor type, and notes. Lookups tolerate free-text component names
//! via normalization plus fuzzy word-overlap matching; a miss is a normal
//! outcome, never an error. Lookups are pure reads of the static table.

use crate::types::{EstimateSource, SourceEstimate};

/// Access conditions for the repair site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessDifficulty {
    #[default]
    Normal,
    Difficult,
}

/// How much usable detail the issue description carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InformationQuality {
    Low,
    #[default]
    Medium,
    High,
}

/// Context that adjusts a catalog estimate for one property.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupContext {
    pub property_age: Option<i32>,
    pub access_difficulty: AccessDifficulty,
    pub information_quality: InformationQuality,
}

/// Size/capacity variant of a component with its own cost range.
struct Variant {
    spec_tokens: &'static [&'static str],
    low: f64,
    high: f64,
}

struct CatalogEntry {
    key: &'static str,
    name: &'static str,
    contractor_type: &'static str,
    low: f64,
    high: f64,
    confidence: f64,
    notes: &'static [&'static str],
    variants: &'static [Variant],
}

/// Filler words stripped before matching.
const FILLER_WORDS: &[&str] = &["the", "a", "an", "replacement", "repair", "installation"];

/// Aliases: a query word on the left matches entry keys containing any of
/// the right-hand tokens.
const ALIASES: &[(&str, &[&str])] = &[
    ("ac", &["condenser", "hvac"]),
    ("air", &["condenser", "hvac", "handler"]),
    ("heater", &["water_heater"]),
    ("electric", &["electrical"]),
    ("wiring", &["electrical"]),
    ("shingles", &["roof"]),
    ("slab", &["foundation", "slab_leak"]),
    ("pier", &["foundation"]),
];

/// Static cost lookup over the component catalog.
#[derive(Debug, Default)]
pub struct CostCatalog;

impl CostCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Look up a component by free-text name and build a database-source
    /// estimate, or `None` when nothing in the catalog matches well enough.
    pub fn get_estimate(
        &self,
        component: &str,
        specifications: Option<&str>,
        context: LookupContext,
    ) -> Option<SourceEstimate> {
        let query = normalize_component_name(component);
        if query.is_empty() {
            return None;
        }

        let entry = ENTRIES.iter().find(|e| matches_entry(&query, e.key))?;

        let (mut low, mut high) = match specifications.and_then(|s| match_variant(entry, s)) {
            Some(v) => (v.low, v.high),
            None => (entry.low, entry.high),
        };
        let mut confidence = entry.confidence;
        let mut assumptions = vec![
            "Regional market rates (2024-2025)".to_string(),
            "Standard difficulty and access".to_string(),
            format!("Quoted for a {}", entry.contractor_type.replace('_', " ")),
        ];

        // Older homes tend to hide complications behind the visible scope.
        if let Some(age) = context.property_age {
            if age > 30 {
                high *= 1.2;
                assumptions.push("Older home may have additional complications".to_string());
            }
            assumptions.push(format!("Property age: {} years", age));
        } else {
            assumptions.push("Property age unknown".to_string());
        }

        if context.access_difficulty == AccessDifficulty::Difficult {
            low *= 1.2;
            high *= 1.4;
            assumptions.push("Difficult access increases labor time".to_string());
        }

        confidence = match context.information_quality {
            InformationQuality::Low => confidence * 0.8,
            InformationQuality::Medium => confidence,
            InformationQuality::High => (confidence * 1.1).min(0.95),
        };

        let reasoning = format!(
            "Based on cost catalog entry for {}. {}",
            entry.name,
            entry.notes.join(", ")
        );

        Some(
            SourceEstimate::new(EstimateSource::Database, low, high, confidence)
                .with_reasoning(reasoning)
                .with_assumptions(assumptions)
                .with_risk_factors(entry.notes.iter().map(|n| n.to_string()).collect()),
        )
    }
}

fn normalize_component_name(component: &str) -> String {
    component
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !FILLER_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fuzzy containment match: at least two shared words, or an alias hit.
fn matches_entry(query: &str, entry_key: &str) -> bool {
    let query_words: Vec<&str> = query.split(' ').collect();
    let key_words: Vec<&str> = entry_key.split('_').collect();

    let overlap = query_words
        .iter()
        .filter(|w| key_words.contains(w))
        .count();
    if overlap >= 2 {
        return true;
    }

    for (alias, key_tokens) in ALIASES {
        if query_words.contains(alias) && key_tokens.iter().any(|t| entry_key.contains(t)) {
            return true;
        }
    }

    false
}

fn match_variant<'a>(entry: &'a CatalogEntry, specifications: &str) -> Option<&'a Variant> {
    let spec = specifications.to_lowercase();
    entry
        .variants
        .iter()
        .find(|v| v.spec_tokens.iter().any(|t| spec.contains(t)))
}

static ENTRIES: &[CatalogEntry] = &[
    CatalogEntry {
        key: "ac_condenser_unit",
        name: "AC Condenser Unit Replacement",
        contractor_type: "hvac_technician",
        low: 2700.0,
        high: 5000.0,
        confidence: 0.9,
        notes: &[
            "Regional heat shortens AC lifespan to 10-15 years",
            "Consider full system replacement if unit is 12+ years old",
        ],
        variants: &[
            Variant { spec_tokens: &["2 ton"], low: 2100.0, high: 4000.0 },
            Variant { spec_tokens: &["3 ton"], low: 2700.0, high: 5000.0 },
            Variant { spec_tokens: &["4 ton"], low: 3300.0, high: 6000.0 },
            Variant { spec_tokens: &["5 ton"], low: 3900.0, high: 7000.0 },
        ],
    },
    CatalogEntry {
        key: "hvac_air_handler",
        name: "Air Handler Replacement",
        contractor_type: "hvac_technician",
        low: 2500.0,
        high: 5600.0,
        confidence: 0.85,
        notes: &["Includes new thermostat", "Ductwork inspection recommended"],
        variants: &[],
    },
    CatalogEntry {
        key: "hvac_duct_repair",
        name: "HVAC Duct Repair/Sealing",
        contractor_type: "hvac_technician",
        low: 400.0,
        high: 900.0,
        confidence: 0.85,
        notes: &["Per vent or small section", "Full duct replacement is far more expensive"],
        variants: &[],
    },
    CatalogEntry {
        key: "water_heater",
        name: "Water Heater Replacement",
        contractor_type: "plumber",
        low: 1200.0,
        high: 2400.0,
        confidence: 0.9,
        notes: &[
            "Hard water reduces lifespan to 8-12 years",
            "Expansion tank required by code",
        ],
        variants: &[
            Variant { spec_tokens: &["40 gallon"], low: 1100.0, high: 2000.0 },
            Variant { spec_tokens: &["50 gallon"], low: 1200.0, high: 2400.0 },
            Variant { spec_tokens: &["tankless"], low: 2000.0, high: 3800.0 },
        ],
    },
    CatalogEntry {
        key: "slab_leak_repair",
        name: "Under-Slab Plumbing Leak Repair",
        contractor_type: "plumber",
        low: 2500.0,
        high: 6000.0,
        confidence: 0.7,
        notes: &[
            "Very common in slab foundations",
            "Consider re-routing if multiple leaks",
            "May require foundation inspection",
        ],
        variants: &[],
    },
    CatalogEntry {
        key: "drain_line_repair",
        name: "Drain Line Repair",
        contractor_type: "plumber",
        low: 400.0,
        high: 1100.0,
        confidence: 0.8,
        notes: &["Pre-1980 homes often have cast iron pipes"],
        variants: &[],
    },
    CatalogEntry {
        key: "electrical_panel",
        name: "Electrical Panel Replacement",
        contractor_type: "electrician",
        low: 2000.0,
        high: 4200.0,
        confidence: 0.9,
        notes: &[
            "Federal Pacific and Zinsco panels are fire hazards",
            "200A service recommended for modern homes",
        ],
        variants: &[
            Variant { spec_tokens: &["100 amp"], low: 1800.0, high: 3200.0 },
            Variant { spec_tokens: &["200 amp"], low: 2700.0, high: 4500.0 },
        ],
    },
    CatalogEntry {
        key: "gfci_outlet",
        name: "GFCI Outlet Installation/Replacement",
        contractor_type: "electrician",
        low: 70.0,
        high: 160.0,
        confidence: 0.95,
        notes: &["Required in kitchens, bathrooms, outdoors", "Per outlet"],
        variants: &[],
    },
    CatalogEntry {
        key: "shingle_roof_replacement",
        name: "Asphalt Shingle Roof Replacement",
        contractor_type: "roofer",
        low: 7000.0,
        high: 18000.0,
        confidence: 0.7,
        notes: &[
            "Assumes a typical 20-square roof",
            "Hurricane-rated shingles required in coastal regions",
            "Full tear-off typically required",
        ],
        variants: &[],
    },
    CatalogEntry {
        key: "roof_leak_repair",
        name: "Roof Leak Repair",
        contractor_type: "roofer",
        low: 300.0,
        high: 800.0,
        confidence: 0.75,
        notes: &["Small localized repair", "Multiple leaks may indicate need for replacement"],
        variants: &[],
    },
    CatalogEntry {
        key: "foundation_pier",
        name: "Foundation Pier Installation",
        contractor_type: "foundation_specialist",
        low: 4500.0,
        high: 13000.0,
        confidence: 0.7,
        notes: &[
            "Typically 8-12 piers minimum",
            "Includes structural engineer evaluation",
            "Clay soil requires specialized piers",
        ],
        variants: &[],
    },
    CatalogEntry {
        key: "foundation_crack_repair",
        name: "Foundation Crack Repair (Minor)",
        contractor_type: "foundation_specialist",
        low: 500.0,
        high: 1400.0,
        confidence: 0.75,
        notes: &[
            "For small cosmetic cracks",
            "Major cracks require structural evaluation",
        ],
        variants: &[],
    },
    CatalogEntry {
        key: "drywall_repair",
        name: "Drywall Repair",
        contractor_type: "handyman",
        low: 100.0,
        high: 350.0,
        confidence: 0.9,
        notes: &["Small to medium repair (< 4 sq ft)"],
        variants: &[],
    },
    CatalogEntry {
        key: "exterior_painting",
        name: "Exterior Painting",
        contractor_type: "general_contractor",
        low: 2500.0,
        high: 7500.0,
        confidence: 0.8,
        notes: &["Humid climates require premium paint", "Preparation is most of the job"],
        variants: &[],
    },
];

/// Coarse per-category base range, before severity adjustment. Used when
/// neither the catalog nor reasoning produced an estimate, and as a ceiling
/// reference for plausibility checks.
pub fn fallback_range(category: &str) -> (f64, f64) {
    let c = category.to_lowercase();
    if c.contains("roof") {
        (500.0, 15_000.0)
    } else if c.contains("hvac") {
        (300.0, 8_000.0)
    } else if c.contains("plumbing") {
        (200.0, 5_000.0)
    } else if c.contains("electrical") {
        (150.0, 3_000.0)
    } else if c.contains("foundation") {
        (1_000.0, 25_000.0)
    } else if c.contains("structural") {
        (500.0, 10_000.0)
    } else {
        (500.0, 3_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_match_tolerates_free_text() {
        let catalog = CostCatalog::new();
        let est = catalog
            .get_estimate("the AC condenser unit replacement", None, LookupContext::default())
            .expect("should match");
        assert_eq!(est.low, 2700.0);
        assert_eq!(est.high, 5000.0);
        assert!(est.reasoning.contains("AC Condenser"));
    }

    #[test]
    fn test_miss_is_none_not_error() {
        let catalog = CostCatalog::new();
        assert!(catalog
            .get_estimate("garage door opener", None, LookupContext::default())
            .is_none());
        assert!(catalog.get_estimate("", None, LookupContext::default()).is_none());
    }

    #[test]
    fn test_specification_variant_selection() {
        let catalog = CostCatalog::new();
        let est = catalog
            .get_estimate("water heater", Some("50 gallon electric"), LookupContext::default())
            .unwrap();
        assert_eq!(est.low, 1200.0);
        assert_eq!(est.high, 2400.0);

        let tankless = catalog
            .get_estimate("water heater", Some("tankless gas"), LookupContext::default())
            .unwrap();
        assert_eq!(tankless.low, 2000.0);
    }

    #[test]
    fn test_context_adjustments() {
        let catalog = CostCatalog::new();
        let base = catalog
            .get_estimate("gfci outlet", None, LookupContext::default())
            .unwrap();

        let old_home = catalog
            .get_estimate(
                "gfci outlet",
                None,
                LookupContext {
                    property_age: Some(45),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(old_home.high > base.high);
        assert_eq!(old_home.low, base.low);

        let hard_access = catalog
            .get_estimate(
                "gfci outlet",
                None,
                LookupContext {
                    access_difficulty: AccessDifficulty::Difficult,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(hard_access.low > base.low && hard_access.high > base.high);

        let sparse = catalog
            .get_estimate(
                "gfci outlet",
                None,
                LookupContext {
                    information_quality: InformationQuality::Low,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(sparse.confidence < base.confidence);
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let catalog = CostCatalog::new();
        let ctx = LookupContext {
            property_age: Some(20),
            ..Default::default()
        };
        let a = catalog.get_estimate("roof leak", None, ctx).unwrap();
        let b = catalog.get_estimate("roof leak", None, ctx).unwrap();
        assert_eq!(a.low, b.low);
        assert_eq!(a.high, b.high);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reasoning, b.reasoning);
    }
}
