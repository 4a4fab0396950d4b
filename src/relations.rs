//! Issue relationship analysis.
//!
//! Finds causal chains (a root-cause issue plus issues plausibly caused by
//! it) and bundling opportunities (issues worth repairing and pricing
//! together for labor savings). Always degrades to "no relationships found"
//! rather than failing the run.

use crate::types::Issue;
use serde::Serialize;

/// Categories that can plausibly be a root cause, with the categories that
/// are plausibly downstream of them. Matching is substring containment on
/// lowercased category text.
const CAUSAL_MAP: &[(&str, &[&str])] = &[
    ("foundation", &["structural", "interior"]),
    ("roofing", &["interior", "attic", "insulation"]),
    ("plumbing", &["foundation", "interior", "flooring"]),
];

/// Access tokens that indicate shared setup cost when bundled.
const ACCESS_TOKENS: &[&str] = &["attic", "crawl space", "roof", "exterior", "basement"];

/// How a bundle saves labor, with a fixed savings fraction per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleType {
    /// Same trade working in one place: the biggest win.
    SameTradeSameLocation,
    /// Shared access setup (attic, crawl space) done once.
    SharedAccess,
    /// One contractor mobilization covers several jobs.
    SameTrade,
    /// Loosely related systems, small efficiency gain.
    RelatedSystems,
}

impl BundleType {
    pub fn savings_pct(&self) -> f64 {
        match self {
            BundleType::SameTradeSameLocation => 0.25,
            BundleType::SharedAccess => 0.20,
            BundleType::SameTrade => 0.15,
            BundleType::RelatedSystems => 0.10,
        }
    }
}

/// A root-cause issue and the issues plausibly downstream of it.
#[derive(Debug, Clone, Serialize)]
pub struct CausalChain {
    pub root_cause: Issue,
    pub caused_issues: Vec<Issue>,
    pub chain_length: usize,
    pub priority: &'static str,
    pub recommendation: String,
}

/// A group of issues recommended for combined repair.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub bundle_type: BundleType,
    pub issues: Vec<Issue>,
    pub savings_pct: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipStats {
    pub total_issues: usize,
    pub issues_in_chains: usize,
    pub isolated_issues: usize,
    pub potential_bundles: usize,
    pub average_savings_pct: f64,
    pub max_savings_pct: f64,
}

/// Full relationship analysis over one report's issues.
#[derive(Debug, Clone, Serialize)]
pub struct RelationshipReport {
    pub causal_chains: Vec<CausalChain>,
    pub bundles: Vec<Bundle>,
    pub isolated_issues: Vec<Issue>,
    pub statistics: RelationshipStats,
}

/// Bundling advice for a single issue being estimated.
#[derive(Debug, Clone, Serialize)]
pub struct BundleInfo {
    pub related_issues: Vec<Issue>,
    pub bundle_type: BundleType,
    pub should_estimate_together: bool,
    pub labor_savings_pct: f64,
    pub recommendation: String,
}

#[derive(Debug, Default)]
pub struct RelationshipAnalyzer;

impl RelationshipAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze all issues: causal chains, bundles, and what is left isolated.
    pub fn analyze_all(&self, issues: &[Issue]) -> RelationshipReport {
        let causal_chains = self.find_causal_chains(issues);
        let bundles = self.find_bundles(issues);

        let mut related_keys: Vec<String> = Vec::new();
        for chain in &causal_chains {
            related_keys.push(chain.root_cause.key());
            related_keys.extend(chain.caused_issues.iter().map(Issue::key));
        }
        for bundle in &bundles {
            related_keys.extend(bundle.issues.iter().map(Issue::key));
        }

        let isolated: Vec<Issue> = issues
            .iter()
            .filter(|i| !related_keys.contains(&i.key()))
            .cloned()
            .collect();

        let (average_savings_pct, max_savings_pct) = if bundles.is_empty() {
            (0.0, 0.0)
        } else {
            let sum: f64 = bundles.iter().map(|b| b.savings_pct).sum();
            let max = bundles
                .iter()
                .map(|b| b.savings_pct)
                .fold(0.0f64, f64::max);
            (sum / bundles.len() as f64, max)
        };

        let statistics = RelationshipStats {
            total_issues: issues.len(),
            issues_in_chains: issues.len() - isolated.len(),
            isolated_issues: isolated.len(),
            potential_bundles: bundles.len(),
            average_savings_pct,
            max_savings_pct,
        };

        RelationshipReport {
            causal_chains,
            bundles,
            isolated_issues: isolated,
            statistics,
        }
    }

    /// Issues worth estimating together with `issue`: same category, original
    /// list order, capped at `max_bundle_size` related issues, never the
    /// issue itself.
    pub fn group_for_bundled_estimate(
        &self,
        issue: &Issue,
        all_issues: &[Issue],
        max_bundle_size: usize,
    ) -> BundleInfo {
        let own_key = issue.key();
        let category = issue.category.trim().to_lowercase();

        let mut related: Vec<Issue> = Vec::new();
        if !category.is_empty() {
            for other in all_issues {
                if related.len() >= max_bundle_size {
                    break;
                }
                if other.key() == own_key {
                    continue;
                }
                if other.category.trim().to_lowercase() == category {
                    related.push(other.clone());
                }
            }
        }

        let bundle_type = self.bundle_type_for(issue, &related);
        let labor_savings_pct = if related.is_empty() {
            0.0
        } else {
            bundle_type.savings_pct()
        };

        let recommendation = if related.is_empty() {
            "Estimate independently - no significant bundling opportunities".to_string()
        } else {
            match bundle_type {
                BundleType::SameTradeSameLocation => format!(
                    "Bundle with {} related issue(s) at the same location. Estimated {:.0}% savings on combined labor.",
                    related.len(),
                    labor_savings_pct * 100.0
                ),
                BundleType::SharedAccess => format!(
                    "Combine with {} issue(s) requiring similar access. Save {:.0}% on access setup time.",
                    related.len(),
                    labor_savings_pct * 100.0
                ),
                BundleType::SameTrade => format!(
                    "Schedule with {} other {} issue(s). Save {:.0}% on mobilization and setup.",
                    related.len(),
                    issue.category,
                    labor_savings_pct * 100.0
                ),
                BundleType::RelatedSystems => format!(
                    "Consider addressing with {} related issue(s) for {:.0}% efficiency gain.",
                    related.len(),
                    labor_savings_pct * 100.0
                ),
            }
        };

        BundleInfo {
            should_estimate_together: !related.is_empty(),
            bundle_type,
            labor_savings_pct,
            recommendation,
            related_issues: related,
        }
    }

    fn find_causal_chains(&self, issues: &[Issue]) -> Vec<CausalChain> {
        let mut chains = Vec::new();

        for root in issues {
            let root_category = root.category.to_lowercase();
            let Some((_, downstream)) = CAUSAL_MAP
                .iter()
                .find(|(cause, _)| root_category.contains(cause))
            else {
                continue;
            };
            let Some(root_location) = root.normalized_location() else {
                continue;
            };

            let caused: Vec<Issue> = issues
                .iter()
                .filter(|other| other.key() != root.key())
                .filter(|other| {
                    let cat = other.category.to_lowercase();
                    downstream.iter().any(|d| cat.contains(d))
                })
                .filter(|other| {
                    other
                        .normalized_location()
                        .map(|loc| locations_overlap(&root_location, &loc))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            if !caused.is_empty() {
                let priority = match root.severity_level() {
                    crate::types::Severity::Critical | crate::types::Severity::High => "high",
                    _ => "medium",
                };
                chains.push(CausalChain {
                    chain_length: caused.len() + 1,
                    priority,
                    recommendation: format!("Address root cause first: {}", root.item),
                    root_cause: root.clone(),
                    caused_issues: caused,
                });
            }
        }

        chains.sort_by(|a, b| b.chain_length.cmp(&a.chain_length));
        chains
    }

    fn find_bundles(&self, issues: &[Issue]) -> Vec<Bundle> {
        let mut bundles: Vec<Bundle> = Vec::new();
        let mut bundled_keys: Vec<String> = Vec::new();

        // Same trade at the same location first: it carries the best savings.
        for (idx, issue) in issues.iter().enumerate() {
            if bundled_keys.contains(&issue.key()) {
                continue;
            }
            let category = issue.category.trim().to_lowercase();
            if category.is_empty() {
                continue;
            }
            let Some(location) = issue.normalized_location() else {
                continue;
            };

            let group: Vec<Issue> = issues[idx..]
                .iter()
                .filter(|o| o.category.trim().to_lowercase() == category)
                .filter(|o| {
                    o.normalized_location()
                        .map(|loc| locations_overlap(&location, &loc))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            if group.len() >= 2 {
                bundled_keys.extend(group.iter().map(Issue::key));
                bundles.push(Bundle {
                    bundle_type: BundleType::SameTradeSameLocation,
                    savings_pct: BundleType::SameTradeSameLocation.savings_pct(),
                    reason: format!(
                        "Multiple {} issues at {}",
                        issue.category,
                        issue.location.as_deref().unwrap_or("the same location")
                    ),
                    issues: group,
                });
            }
        }

        // Remaining same-trade groups regardless of location.
        for (idx, issue) in issues.iter().enumerate() {
            if bundled_keys.contains(&issue.key()) {
                continue;
            }
            let category = issue.category.trim().to_lowercase();
            if category.is_empty() {
                continue;
            }

            let group: Vec<Issue> = issues[idx..]
                .iter()
                .filter(|o| !bundled_keys.contains(&o.key()))
                .filter(|o| o.category.trim().to_lowercase() == category)
                .cloned()
                .collect();

            if group.len() >= 2 {
                bundled_keys.extend(group.iter().map(Issue::key));
                bundles.push(Bundle {
                    bundle_type: BundleType::SameTrade,
                    savings_pct: BundleType::SameTrade.savings_pct(),
                    reason: format!("All {} work can be scheduled together", issue.category),
                    issues: group,
                });
            }
        }

        bundles
    }

    /// Pick the bundle kind for one issue and its same-category relatives.
    fn bundle_type_for(&self, issue: &Issue, related: &[Issue]) -> BundleType {
        if related.is_empty() {
            return BundleType::RelatedSystems;
        }

        if let Some(location) = issue.normalized_location() {
            let all_same_place = related.iter().all(|r| {
                r.normalized_location()
                    .map(|loc| locations_overlap(&location, &loc))
                    .unwrap_or(false)
            });
            if all_same_place {
                return BundleType::SameTradeSameLocation;
            }
        }

        let own_access = access_token(issue);
        if let Some(token) = own_access {
            if related.iter().all(|r| access_token(r) == Some(token)) {
                return BundleType::SharedAccess;
            }
        }

        BundleType::SameTrade
    }
}

/// Case-insensitive substring match in either direction.
fn locations_overlap(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

fn access_token(issue: &Issue) -> Option<&'static str> {
    let text = format!(
        "{} {} {}",
        issue.location.as_deref().unwrap_or(""),
        issue.item,
        issue.description
    )
    .to_lowercase();
    ACCESS_TOKENS.iter().find(|t| text.contains(**t)).copied()
}
