//! Declarative extension requirements.
//!
//! Every `(frame type, direction)` pair maps to `required`, `forbidden` or
//! `optional`. Pairs without an entry are `optional`. New scenarios are added
//! as table rows, e.g. loaded from JSON:
//!
//! ```
//! use halfduplex::extension::{ExtensionPolicy, ExtensionRequirement};
//! use halfduplex::protocol::{Direction, FrameType};
//!
//! let policy: ExtensionPolicy = serde_json::from_str(r#"[
//!     { "frame": "data", "direction": "initiator-to-acceptor", "requirement": "required" }
//! ]"#).unwrap();
//!
//! assert_eq!(
//!     policy.requirement(FrameType::Data, Direction::InitiatorToAcceptor),
//!     ExtensionRequirement::Required
//! );
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{Direction, FrameType};

/// Extension requirement for one `(frame type, direction)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionRequirement {
    /// Frames must carry extension metadata.
    Required,
    /// Frames must not carry extension metadata.
    Forbidden,
    /// Either is fine.
    #[default]
    Optional,
}

/// One row of the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRule {
    pub frame: FrameType,
    pub direction: Direction,
    pub requirement: ExtensionRequirement,
}

/// Lookup table of extension requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ExtensionRule>", into = "Vec<ExtensionRule>")]
pub struct ExtensionPolicy {
    table: HashMap<(FrameType, Direction), ExtensionRequirement>,
}

impl ExtensionPolicy {
    /// Create an empty policy (everything optional).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requirement for a pair, replacing any previous entry.
    pub fn set(
        &mut self,
        frame: FrameType,
        direction: Direction,
        requirement: ExtensionRequirement,
    ) -> &mut Self {
        self.table.insert((frame, direction), requirement);
        self
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(
        mut self,
        frame: FrameType,
        direction: Direction,
        requirement: ExtensionRequirement,
    ) -> Self {
        self.set(frame, direction, requirement);
        self
    }

    /// Require extension metadata on `frame` frames in `direction`.
    pub fn require(self, frame: FrameType, direction: Direction) -> Self {
        self.with(frame, direction, ExtensionRequirement::Required)
    }

    /// Forbid extension metadata on `frame` frames in `direction`.
    pub fn forbid(self, frame: FrameType, direction: Direction) -> Self {
        self.with(frame, direction, ExtensionRequirement::Forbidden)
    }

    /// Requirement for a pair (`Optional` when not listed).
    pub fn requirement(&self, frame: FrameType, direction: Direction) -> ExtensionRequirement {
        self.table
            .get(&(frame, direction))
            .copied()
            .unwrap_or_default()
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Explicit entries as rules.
    pub fn rules(&self) -> Vec<ExtensionRule> {
        self.table
            .iter()
            .map(|(&(frame, direction), &requirement)| ExtensionRule {
                frame,
                direction,
                requirement,
            })
            .collect()
    }
}

impl From<Vec<ExtensionRule>> for ExtensionPolicy {
    fn from(rules: Vec<ExtensionRule>) -> Self {
        rules.into_iter().collect()
    }
}

impl From<ExtensionPolicy> for Vec<ExtensionRule> {
    fn from(policy: ExtensionPolicy) -> Self {
        policy.rules()
    }
}

impl FromIterator<ExtensionRule> for ExtensionPolicy {
    fn from_iter<I: IntoIterator<Item = ExtensionRule>>(iter: I) -> Self {
        let mut policy = ExtensionPolicy::new();
        for rule in iter {
            policy.set(rule.frame, rule.direction, rule.requirement);
        }
        policy
    }
}
