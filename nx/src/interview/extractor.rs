//! RequirementExtractor: pulls structured requirements out of model replies
//!
//! The interview prompts ask the model to wrap every captured requirement
//! in `<requirement>...</requirement>` blocks with tagged fields. Blocks
//! with an unknown or missing category are skipped; low-confidence ones
//! are filtered by threshold.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::{ReqPriority, Requirement, RequirementCategory};

static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<requirement>(.*?)</requirement>").expect("requirement block regex"));

/// Extraction outcome
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub requirements: Vec<Requirement>,
    /// Blocks found in the reply
    pub raw_count: usize,
    /// Requirements that survived category and confidence filtering
    pub filtered_count: usize,
}

/// Extracts `<requirement>` blocks from assistant replies
#[derive(Debug, Clone)]
pub struct RequirementExtractor {
    /// Minimum confidence to keep a requirement
    pub threshold: f64,
}

impl Default for RequirementExtractor {
    fn default() -> Self {
        Self { threshold: 0.7 }
    }
}

impl RequirementExtractor {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Extract requirements for a project from one reply
    pub fn extract(&self, project_id: &str, reply: &str) -> ExtractionResult {
        let mut requirements = Vec::new();
        let mut raw_count = 0;

        for captures in BLOCK_RE.captures_iter(reply) {
            raw_count += 1;
            let block = &captures[1];

            let Some(text) = tag_value(block, "text") else {
                debug!("Skipping requirement block without <text>");
                continue;
            };
            let Some(category) = tag_value(block, "category").and_then(|c| RequirementCategory::parse_lenient(&c))
            else {
                debug!("Skipping requirement block with unknown category");
                continue;
            };

            let priority = tag_value(block, "priority")
                .map(|p| ReqPriority::parse_lenient(&p))
                .unwrap_or_default();
            let confidence = tag_value(block, "confidence")
                .and_then(|c| c.trim().parse::<f64>().ok())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);

            if confidence < self.threshold {
                debug!(%confidence, threshold = %self.threshold, "Dropping low-confidence requirement");
                continue;
            }

            let mut requirement = Requirement::new(project_id, category, text.trim());
            requirement.priority = priority;
            requirement.confidence = confidence;
            requirement.area = tag_value(block, "area").map(|a| a.trim().to_lowercase());
            requirements.push(requirement);
        }

        let filtered_count = requirements.len();
        ExtractionResult {
            requirements,
            raw_count,
            filtered_count,
        }
    }
}

fn tag_value(block: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?s)<{tag}>(.*?)</{tag}>")).ok()?;
    re.captures(block).map(|c| c[1].to_string())
}
