//! Coordinator configuration.
//!
//! Loadable from JSON:
//!
//! ```json
//! {
//!   "extension_rules": [
//!     { "frame": "data", "direction": "initiator-to-acceptor", "requirement": "required" }
//!   ],
//!   "escalation": "abort-peer",
//!   "max_frame_size": 1048576
//! }
//! ```
//!
//! Every field is optional.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extension::{ExtensionPolicy, ExtensionRequirement};
use crate::protocol::{Direction, FrameType, DEFAULT_MAX_FRAME_SIZE};

/// What happens to the peer direction when one direction is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Escalation {
    /// Directions fail independently.
    #[default]
    None,
    /// Abort the peer direction as well.
    AbortPeer,
}

/// Configuration for [`StreamCoordinator`](crate::stream::StreamCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Extension requirement per `(frame type, direction)`.
    #[serde(rename = "extension_rules")]
    pub extension_policy: ExtensionPolicy,
    pub escalation: Escalation,
    /// Largest accepted frame body.
    pub max_frame_size: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            extension_policy: ExtensionPolicy::new(),
            escalation: Escalation::None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn extension_policy(mut self, policy: ExtensionPolicy) -> Self {
        self.extension_policy = policy;
        self
    }

    /// Set one rule, keeping the others.
    pub fn extension(
        mut self,
        frame: FrameType,
        direction: Direction,
        requirement: ExtensionRequirement,
    ) -> Self {
        self.extension_policy.set(frame, direction, requirement);
        self
    }

    pub fn escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }
}
