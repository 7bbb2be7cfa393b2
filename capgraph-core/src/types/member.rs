//! The `Member` sum type — the redesign of dynamic `{kind, id}` tagging.

use serde::{Deserialize, Serialize};

use super::ids::{CapabilityId, ToolId};

/// A single element of a capability's hyperedge: either a leaf tool or a
/// nested capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Member {
    /// A leaf tool invocation.
    Tool(ToolId),
    /// A nested, reusable capability.
    Capability(CapabilityId),
}

impl Member {
    /// `true` if this member is a tool.
    #[must_use]
    pub fn is_tool(&self) -> bool {
        matches!(self, Member::Tool(_))
    }

    /// `true` if this member is a capability.
    #[must_use]
    pub fn is_capability(&self) -> bool {
        matches!(self, Member::Capability(_))
    }

    /// The wrapped capability id, if this member is a capability.
    #[must_use]
    pub fn as_capability(&self) -> Option<&CapabilityId> {
        match self {
            Member::Capability(id) => Some(id),
            Member::Tool(_) => None,
        }
    }

    /// The wrapped tool id, if this member is a tool.
    #[must_use]
    pub fn as_tool(&self) -> Option<&ToolId> {
        match self {
            Member::Tool(id) => Some(id),
            Member::Capability(_) => None,
        }
    }
}

impl From<ToolId> for Member {
    fn from(value: ToolId) -> Self {
        Member::Tool(value)
    }
}

impl From<CapabilityId> for Member {
    fn from(value: CapabilityId) -> Self {
        Member::Capability(value)
    }
}
