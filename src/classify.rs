//! Free-text category classification.
//!
//! The keyword taxonomy is a capability boundary, not core logic: fusion,
//! scoring, and validation only see the [`Classifier`] trait, so the taxonomy
//! can be swapped without touching the pipeline state machine.

use crate::types::Issue;

/// A coarse category with the classifier's confidence in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
}

/// Maps free text to a coarse repair category.
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> Classification;
}

/// Default classifier: keyword containment against inspection-report section
/// headings. First match wins; roof outranks structural when both appear.
#[derive(Debug, Default)]
pub struct SectionClassifier;

impl Classifier for SectionClassifier {
    fn classify(&self, text: &str) -> Classification {
        let s = text.to_lowercase();
        let matched = if s.contains("roof") {
            Some("Roofing")
        } else if s.contains("structural") {
            Some("Structural")
        } else if s.contains("electrical") {
            Some("Electrical")
        } else if s.contains("hvac") || s.contains("heating") || s.contains("cooling") {
            Some("HVAC")
        } else if s.contains("plumbing") {
            Some("Plumbing")
        } else if s.contains("foundation") {
            Some("Foundation")
        } else if s.contains("grounds") || s.contains("exterior") {
            Some("Grounds/Exterior")
        } else {
            None
        };

        match matched {
            Some(category) => Classification {
                category: category.to_string(),
                confidence: 0.95,
            },
            None => Classification {
                category: "General".to_string(),
                confidence: 0.3,
            },
        }
    }
}

/// Best-effort realignment of an issue's category against its original report
/// section, to catch enrichment mislabels. Only overrides when the section
/// classifies with high confidence and the current category is implausible
/// for it. Never fails the issue.
pub fn realign(issue: &mut Issue, classifier: &dyn Classifier) {
    if issue.section.trim().is_empty() {
        return;
    }
    let cls = classifier.classify(&issue.section);
    if cls.confidence < 0.9 {
        return;
    }

    let current = issue.category.to_lowercase();
    let implausible = match cls.category.as_str() {
        "Roofing" => !matches!(current.as_str(), "roofing" | "structural"),
        "HVAC" => !matches!(current.as_str(), "hvac" | "heating" | "cooling"),
        _ => return,
    };

    if implausible {
        tracing::debug!(
            "Realigning category for '{}': '{}' -> '{}' (section: '{}')",
            issue.item,
            issue.category,
            cls.category,
            issue.section
        );
        issue.category = cls.category;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_classification() {
        let c = SectionClassifier;
        assert_eq!(c.classify("III. Roof Covering Materials").category, "Roofing");
        assert_eq!(c.classify("Heating and Cooling Equipment").category, "HVAC");
        assert_eq!(c.classify("Plumbing Supply Systems").category, "Plumbing");
        let general = c.classify("Appliances");
        assert_eq!(general.category, "General");
        assert!(general.confidence < 0.5);
    }

    #[test]
    fn test_realign_overrides_mislabel() {
        let c = SectionClassifier;
        let mut issue = Issue {
            item: "Shingles".into(),
            section: "Roof Covering".into(),
            category: "Interior".into(),
            ..Default::default()
        };
        realign(&mut issue, &c);
        assert_eq!(issue.category, "Roofing");

        // Structural is plausible for a roof section and is left alone.
        let mut issue = Issue {
            section: "Roof Structure".into(),
            category: "Structural".into(),
            ..Default::default()
        };
        realign(&mut issue, &c);
        assert_eq!(issue.category, "Structural");
    }

    #[test]
    fn test_realign_skips_low_confidence_sections() {
        let c = SectionClassifier;
        let mut issue = Issue {
            section: "Miscellaneous".into(),
            category: "Plumbing".into(),
            ..Default::default()
        };
        realign(&mut issue, &c);
        assert_eq!(issue.category, "Plumbing");
    }
}
