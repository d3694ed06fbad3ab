//! Merger agent: conflict analysis and resolution proposals

use serde::{Deserialize, Serialize};

use crate::domain::{AgentKind, Task};

use super::runner::AgentRunner;

/// Conflict classification from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    Trivial,
    Simple,
    Complex,
    Critical,
    DeleteModify,
}

/// One analyzed conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub file: String,
    pub kind: ConflictKind,
    /// Proposed resolved contents or a resolution description
    pub resolution: String,
    #[serde(default, rename = "needsManualReview")]
    pub needs_manual_review: bool,
}

/// The merger's structured proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeProposal {
    #[serde(default)]
    pub conflicts: Vec<ConflictAnalysis>,
    #[serde(default)]
    pub summary: String,
}

impl MergeProposal {
    /// Whether the proposal may be applied without a human.
    /// Critical, complex and delete-modify conflicts always need a human,
    /// as does anything the model itself flagged.
    pub fn can_auto_complete(&self) -> bool {
        self.conflicts.iter().all(|c| {
            !c.needs_manual_review
                && !matches!(c.kind, ConflictKind::Critical | ConflictKind::Complex | ConflictKind::DeleteModify)
        })
    }
}

/// Parse a proposal out of a model reply
pub fn parse_proposal(reply: &str) -> Option<MergeProposal> {
    let trimmed = reply.trim();
    if let Ok(p) = serde_json::from_str(trimmed) {
        return Some(p);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Analyzes merge conflicts and proposes resolutions
pub struct MergerRunnerAgent;

impl AgentRunner for MergerRunnerAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Merger
    }

    fn system_prompt(&self, _task: &Task) -> String {
        r#"You analyze git merge conflicts and propose resolutions.

For each conflicted file, classify the conflict and propose a resolution.
Classifications: trivial, simple, complex, critical, delete-modify.
Set needsManualReview when you are not certain the resolution is safe.

Respond with STRICT JSON only:
{
  "conflicts": [
    {"file": "...", "kind": "trivial|simple|complex|critical|delete-modify",
     "resolution": "...", "needsManualReview": false}
  ],
  "summary": "..."
}"#
        .to_string()
    }

    fn is_complete(&self, reply: &str, _task: &Task) -> bool {
        parse_proposal(reply).is_some()
    }

    fn continuation_prompt(&self) -> String {
        "Your previous reply was not valid proposal JSON. Respond with ONLY the JSON object.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(kind: ConflictKind, manual: bool) -> ConflictAnalysis {
        ConflictAnalysis {
            file: "a.ts".to_string(),
            kind,
            resolution: "take both".to_string(),
            needs_manual_review: manual,
        }
    }

    #[test]
    fn test_auto_complete_allowed_for_simple() {
        let proposal = MergeProposal {
            conflicts: vec![conflict(ConflictKind::Trivial, false), conflict(ConflictKind::Simple, false)],
            summary: String::new(),
        };
        assert!(proposal.can_auto_complete());
    }

    #[test]
    fn test_auto_complete_forbidden() {
        for kind in [ConflictKind::Critical, ConflictKind::Complex, ConflictKind::DeleteModify] {
            let proposal = MergeProposal {
                conflicts: vec![conflict(kind, false)],
                summary: String::new(),
            };
            assert!(!proposal.can_auto_complete(), "{kind:?} must not auto-complete");
        }

        let flagged = MergeProposal {
            conflicts: vec![conflict(ConflictKind::Trivial, true)],
            summary: String::new(),
        };
        assert!(!flagged.can_auto_complete());
    }

    #[test]
    fn test_parse_proposal_kebab_kind() {
        let json = r#"{"conflicts": [{"file": "a.ts", "kind": "delete-modify", "resolution": "keep"}], "summary": "s"}"#;
        let proposal = parse_proposal(json).unwrap();
        assert_eq!(proposal.conflicts[0].kind, ConflictKind::DeleteModify);
        assert!(!proposal.can_auto_complete());
    }

    #[test]
    fn test_empty_conflicts_auto_completes() {
        let proposal = MergeProposal {
            conflicts: vec![],
            summary: "clean".to_string(),
        };
        assert!(proposal.can_auto_complete());
    }
}
