//! Requirement domain type
//!
//! Requirements are produced by the interview engine and consumed by the
//! task decomposer.

use nexusstore::{RequirementRow, now_ms};
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Requirement category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    Functional,
    NonFunctional,
    Technical,
    Constraint,
    Assumption,
}

impl RequirementCategory {
    /// Parse a category, accepting the synonyms models actually emit
    /// (`non_functional`, `non-functional`, `nonfunctional`, ...).
    /// Returns None for unknown categories; callers skip those blocks.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "functional" => Some(Self::Functional),
            "non_functional" | "nonfunctional" => Some(Self::NonFunctional),
            "technical" => Some(Self::Technical),
            "constraint" | "constraints" => Some(Self::Constraint),
            "assumption" | "assumptions" => Some(Self::Assumption),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequirementCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Functional => "functional",
            Self::NonFunctional => "non_functional",
            Self::Technical => "technical",
            Self::Constraint => "constraint",
            Self::Assumption => "assumption",
        };
        write!(f, "{s}")
    }
}

/// MoSCoW priority for requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReqPriority {
    Must,
    #[default]
    Should,
    Could,
    Wont,
}

impl ReqPriority {
    /// Parse, defaulting to `Should` for anything unrecognized
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "must" => Self::Must,
            "should" => Self::Should,
            "could" => Self::Could,
            "wont" | "won't" | "wont_have" => Self::Wont,
            _ => Self::Should,
        }
    }
}

impl std::fmt::Display for ReqPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Must => "must",
            Self::Should => "should",
            Self::Could => "could",
            Self::Wont => "wont",
        };
        write!(f, "{s}")
    }
}

/// A captured requirement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub project_id: String,
    pub category: RequirementCategory,
    pub text: String,
    pub priority: ReqPriority,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
    pub area: Option<String>,
    pub source: String,
    pub created_at: i64,
}

impl Requirement {
    /// Create a new requirement with generated ID
    pub fn new(project_id: impl Into<String>, category: RequirementCategory, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: generate_id("req", &text),
            project_id: project_id.into(),
            category,
            text,
            priority: ReqPriority::Should,
            confidence: 0.5,
            area: None,
            source: "interview".to_string(),
            created_at: now_ms(),
        }
    }

    /// Convert to a storage row
    pub fn to_row(&self) -> RequirementRow {
        RequirementRow {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            category: self.category.to_string(),
            text: self.text.clone(),
            priority: self.priority.to_string(),
            confidence: self.confidence.clamp(0.0, 1.0),
            area: self.area.clone(),
            source: self.source.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_synonyms() {
        assert_eq!(
            RequirementCategory::parse_lenient("non-functional"),
            Some(RequirementCategory::NonFunctional)
        );
        assert_eq!(
            RequirementCategory::parse_lenient("Non_Functional"),
            Some(RequirementCategory::NonFunctional)
        );
        assert_eq!(
            RequirementCategory::parse_lenient("constraints"),
            Some(RequirementCategory::Constraint)
        );
        assert_eq!(RequirementCategory::parse_lenient("wishlist"), None);
    }

    #[test]
    fn test_priority_lenient_default() {
        assert_eq!(ReqPriority::parse_lenient("must"), ReqPriority::Must);
        assert_eq!(ReqPriority::parse_lenient("won't"), ReqPriority::Wont);
        assert_eq!(ReqPriority::parse_lenient("whenever"), ReqPriority::Should);
    }

    #[test]
    fn test_to_row_clamps_confidence() {
        let mut req = Requirement::new("p-1", RequirementCategory::Functional, "users can log in");
        req.confidence = 1.7;
        assert_eq!(req.to_row().confidence, 1.0);
    }
}
