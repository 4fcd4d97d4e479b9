use serde::{Deserialize, Serialize};

use super::enums::{FieldKind, ValidationClass};

/// Words too common to serve as evidence keywords when a requirement
/// declares none and they are derived from the description.
const DESCRIPTION_STOPWORDS: &[&str] = &[
    "about", "above", "after", "against", "before", "being", "below", "between",
    "documents", "document", "evidence", "include", "including", "other", "provide",
    "provided", "shall", "should", "their", "there", "these", "those", "under",
    "where", "which", "while", "within", "would",
];

/// How evidence for a requirement is recognised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidencePattern {
    /// Phrases whose presence suggests evidence (matched case-insensitively).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Document classification labels that can hold the evidence.
    /// Empty means every document is plausibly relevant.
    #[serde(default)]
    pub document_classes: Vec<String>,
    #[serde(default)]
    pub field: FieldKind,
    /// Regex describing the identifier shape, for identifier requirements.
    #[serde(default)]
    pub identifier_format: Option<String>,
}

/// One checklist requirement. Immutable for the lifetime of a registry version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub pattern: EvidencePattern,
    #[serde(default)]
    pub validation: ValidationClass,
    /// Requirements whose evidence must be cross-checked against this one.
    #[serde(default)]
    pub related: Vec<String>,
}

impl Requirement {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            pattern: EvidencePattern::default(),
            validation: ValidationClass::Auto,
            related: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.pattern.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.pattern.document_classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_field(mut self, field: FieldKind) -> Self {
        self.pattern.field = field;
        self
    }

    pub fn with_identifier_format(mut self, format: &str) -> Self {
        self.pattern.identifier_format = Some(format.to_string());
        self
    }

    pub fn related_to(mut self, ids: &[&str]) -> Self {
        self.related = ids.iter().map(|i| i.to_string()).collect();
        self
    }

    pub fn human_judgment(mut self) -> Self {
        self.validation = ValidationClass::HumanJudgment;
        self
    }

    pub fn field(&self) -> FieldKind {
        self.pattern.field
    }

    /// True when the classification label is one the requirement expects.
    /// Requirements without declared classes accept every label.
    pub fn accepts_class(&self, label: &str) -> bool {
        let label = label.trim();
        self.pattern.document_classes.is_empty()
            || self
                .pattern
                .document_classes
                .iter()
                .any(|c| c.trim().eq_ignore_ascii_case(label))
    }

    pub fn declares_classes(&self) -> bool {
        !self.pattern.document_classes.is_empty()
    }

    /// Lowercased matching keywords. Falls back to significant words of the
    /// description when none are declared.
    pub fn match_keywords(&self) -> Vec<String> {
        let declared: Vec<String> = self
            .pattern
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        if !declared.is_empty() {
            return declared;
        }

        let mut derived: Vec<String> = Vec::new();
        for word in self
            .description
            .split(|c: char| !c.is_alphanumeric())
            .map(|w| w.to_lowercase())
        {
            if word.chars().count() >= 5
                && !DESCRIPTION_STOPWORDS.contains(&word.as_str())
                && !derived.contains(&word)
            {
                derived.push(word);
            }
            if derived.len() == 8 {
                break;
            }
        }
        derived
    }
}
