//! Prompt construction for the reasoning backend.
//!
//! Descriptions coming out of inspection reports carry a lot of liability
//! boilerplate ("recommend a licensed contractor evaluate...") that wastes
//! context and biases the model toward evaluation fees instead of repair
//! costs. The builder strips that before prompting, and prepends a condensed
//! trade-specialist preamble when one matches the issue's category.

use crate::types::{Issue, PropertyContext};
use regex::Regex;

/// Sentence fragments that mark inspection-report boilerplate. Any sentence
/// matching one of these is dropped from the description sent to the model.
const BOILERPLATE_PATTERNS: &[&str] = &[
    r"(?i)recommend(s|ed)?\s+(a\s+)?(licensed|qualified|certified)\s+\w+",
    r"(?i)further\s+(evaluation|review|inspection)",
    r"(?i)consult\s+(with\s+)?(a\s+)?(licensed|qualified|specialist)",
    r"(?i)beyond\s+the\s+scope\s+of\s+this\s+inspection",
    r"(?i)at\s+the\s+time\s+of\s+(the\s+)?inspection",
    r"(?i)for\s+(safety|informational)\s+purposes",
];

/// Condensed specialist preambles keyed by category substring. Long persona
/// prompts measurably hurt cost accuracy with small models; one line of trade
/// framing is enough.
const SPECIALIST_PREAMBLES: &[(&str, &str)] = &[
    (
        "roof",
        "You are an experienced roofing contractor pricing residential repairs.",
    ),
    (
        "electrical",
        "You are a licensed electrician pricing residential electrical repairs.",
    ),
    (
        "plumbing",
        "You are a master plumber pricing residential plumbing repairs.",
    ),
    (
        "hvac",
        "You are an HVAC contractor pricing residential heating and cooling repairs.",
    ),
    (
        "foundation",
        "You are a foundation repair specialist pricing residential structural work.",
    ),
    (
        "structural",
        "You are a structural contractor pricing residential repairs.",
    ),
];

pub struct PromptBuilder {
    boilerplate: Vec<Regex>,
    specialist_context: bool,
}

impl PromptBuilder {
    pub fn new(specialist_context: bool) -> Self {
        let boilerplate = BOILERPLATE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            boilerplate,
            specialist_context,
        }
    }

    /// Drop boilerplate sentences; fall back to the raw text if stripping
    /// would leave nothing.
    pub fn clean_description(&self, description: &str) -> String {
        let kept: Vec<&str> = description
            .split_inclusive(['.', ';'])
            .filter(|sentence| !self.boilerplate.iter().any(|re| re.is_match(sentence)))
            .collect();

        let cleaned = kept.join("").trim().to_string();
        if cleaned.is_empty() {
            description.trim().to_string()
        } else {
            cleaned
        }
    }

    pub fn build(
        &self,
        issue: &Issue,
        property: &PropertyContext,
        related: &[Issue],
        size_hint: &str,
        max_related: usize,
    ) -> String {
        let mut prompt = String::new();

        if self.specialist_context {
            let category = issue.category.to_lowercase();
            if let Some((_, preamble)) = SPECIALIST_PREAMBLES
                .iter()
                .find(|(key, _)| category.contains(key))
            {
                prompt.push_str(preamble);
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str("Estimate the repair cost for this home inspection finding.\n\n");
        prompt.push_str(&format!("Item: {}\n", issue.item));
        prompt.push_str(&format!(
            "Problem: {}\n",
            self.clean_description(&issue.description)
        ));
        prompt.push_str(&format!("Severity: {}\n", issue.severity_level().as_str()));
        if let Some(location) = issue.normalized_location() {
            prompt.push_str(&format!("Location: {}\n", location));
        }

        prompt.push_str("\nProperty:\n");
        match property.age_years {
            Some(age) => prompt.push_str(&format!("- Age: {} years old\n", age)),
            None => prompt.push_str("- Age: unknown\n"),
        }
        if let Some(ptype) = &property.property_type {
            prompt.push_str(&format!("- Type: {}\n", ptype));
        }
        match &property.square_footage {
            Some(sqft) => prompt.push_str(&format!("- Size: {}\n", sqft)),
            None => prompt.push_str(&format!("- Size: approximately {}\n", size_hint)),
        }

        if !related.is_empty() {
            prompt.push_str("\nRelated issues found at the same property (context only):\n");
            for r in related.iter().take(max_related) {
                prompt.push_str(&format!("- {} ({})\n", r.item, r.severity_level().as_str()));
            }
        }

        prompt.push_str(
            "\nRespond with a single JSON object and nothing else:\n\
             {\n\
             \"estimated_low\": <number, total repair cost low bound in USD>,\n\
             \"estimated_high\": <number, total repair cost high bound in USD>,\n\
             \"reasoning\": \"<one or two sentences>\",\n\
             \"assumptions\": [\"<assumption>\"],\n\
             \"risk_factors\": [\"<risk>\"],\n\
             \"confidence_score\": <number 0-100>\n\
             }\n\
             Both bounds must be positive and cover the full professional repair, \
             not an evaluation or service-call fee.",
        );

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boilerplate_stripped() {
        let b = PromptBuilder::new(true);
        let text = "Shingles are lifting at the ridge. Recommend a licensed roofing \
                    contractor perform further evaluation.";
        let cleaned = b.clean_description(text);
        assert!(cleaned.contains("Shingles are lifting"));
        assert!(!cleaned.to_lowercase().contains("licensed"));
    }

    #[test]
    fn test_all_boilerplate_falls_back_to_raw_text() {
        let b = PromptBuilder::new(true);
        let text = "Recommend a licensed electrician for further evaluation.";
        assert_eq!(b.clean_description(text), text);
    }

    #[test]
    fn test_specialist_preamble_by_category() {
        let b = PromptBuilder::new(true);
        let issue = Issue {
            item: "Panel corrosion".into(),
            description: "Rust inside the main panel.".into(),
            category: "Electrical".into(),
            severity: "High".into(),
            ..Default::default()
        };
        let prompt = b.build(&issue, &PropertyContext::default(), &[], "2,000 sq ft", 3);
        assert!(prompt.starts_with("You are a licensed electrician"));
        assert!(prompt.contains("estimated_low"));

        let b = PromptBuilder::new(false);
        let prompt = b.build(&issue, &PropertyContext::default(), &[], "2,000 sq ft", 3);
        assert!(!prompt.contains("licensed electrician pricing"));
    }

    #[test]
    fn test_related_issues_capped() {
        let b = PromptBuilder::new(false);
        let issue = Issue {
            item: "Duct leak".into(),
            category: "HVAC".into(),
            ..Default::default()
        };
        let related: Vec<Issue> = (0..5)
            .map(|i| Issue {
                item: format!("Vent {}", i),
                ..Default::default()
            })
            .collect();
        let prompt = b.build(&issue, &PropertyContext::default(), &related, "2,000 sq ft", 2);
        assert!(prompt.contains("Vent 0"));
        assert!(prompt.contains("Vent 1"));
        assert!(!prompt.contains("Vent 2"));
    }
}
