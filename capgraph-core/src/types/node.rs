//! Node types — graph nodes as a typed sum rather than a dynamically-tagged
//! pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CapabilityId, ToolId};
use super::member::Member;

/// A tool node: a leaf capability invocation, owned by the graph builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolNode {
    /// Stable, namespaced id (`server:tool`).
    pub id: ToolId,
    /// Unit-normalized embedding vector, dimension D.
    pub embedding: Vec<f32>,
    /// Optional originating server tag (usually redundant with `id`'s
    /// namespace, kept for collaborators that register tools out of band).
    pub server: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A capability node: a learned, reusable workflow over a set of members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityNode {
    pub id: CapabilityId,
    /// Optional human-readable fully qualified domain name.
    pub fqdn: Option<String>,
    /// Hash of the code that implements this capability, used to detect
    /// re-observation of the same logical capability under a new id.
    pub code_hash: Option<String>,
    /// Intent embedding, dimension D.
    pub embedding: Vec<f32>,
    /// Fraction of executions that succeeded, in `[0, 1]`.
    pub success_rate: f32,
    /// Monotonically non-decreasing observation count.
    pub usage_count: u64,
    /// `0` for a leaf capability, `1+` for a meta-capability.
    pub hierarchy_level: u32,
    /// Ordered multiset of members forming this capability's hyperedge.
    pub members: Vec<Member>,
    pub children: Vec<CapabilityId>,
    pub parents: Vec<CapabilityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Timestamp of last successful use, for the scorer's temporal feature
    /// attribution.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl CapabilityNode {
    /// `true` if this capability has no recorded members yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `true` if this is a meta-capability (composed of other capabilities,
    /// not only leaf tools).
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.hierarchy_level >= 1
    }
}

/// Either kind of node, for iteration over the combined catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Tool(ToolNode),
    Capability(CapabilityNode),
}

impl Node {
    /// The node's embedding vector, regardless of kind.
    #[must_use]
    pub fn embedding(&self) -> &[f32] {
        match self {
            Node::Tool(t) => &t.embedding,
            Node::Capability(c) => &c.embedding,
        }
    }
}
