//! Graph Builder — the single-writer/many-readers node catalog of tools
//! and capabilities.
//!
//! Reads take a shared [`parking_lot::RwLock`] guard and never block other
//! readers; writes take the exclusive guard.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::types::{
    validate_embedding, CapabilityId, CapabilityNode, Member, Node, ToolId, ToolNode,
};

/// Parameters for registering or re-observing a capability.
#[derive(Debug, Clone)]
pub struct CapabilityRegistration {
    pub id: CapabilityId,
    pub embedding: Vec<f32>,
    pub members: Vec<Member>,
    pub hierarchy_level: u32,
    pub success_rate: Option<f32>,
    pub children: Vec<CapabilityId>,
    pub parents: Vec<CapabilityId>,
    pub fqdn: Option<String>,
    pub code_hash: Option<String>,
}

struct GraphInner {
    tools: HashMap<ToolId, ToolNode>,
    tool_order: Vec<ToolId>,
    capabilities: HashMap<CapabilityId, CapabilityNode>,
    capability_order: Vec<CapabilityId>,
}

/// The node catalog. Cheaply cloneable (`Arc`-backed internally via the
/// lock) so it can be shared across the scorer, the pathfinder, and the
/// orchestrator.
pub struct GraphBuilder {
    inner: RwLock<GraphInner>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                tools: HashMap::new(),
                tool_order: Vec::new(),
                capabilities: HashMap::new(),
                capability_order: Vec::new(),
            }),
        }
    }

    /// Register a tool node, idempotently. Updates the embedding in place
    /// if it changed; never renames the id.
    #[instrument(skip(self, embedding))]
    pub fn register_tool(
        &self,
        id: ToolId,
        embedding: Vec<f32>,
        server: Option<String>,
    ) -> Result<()> {
        validate_embedding(&embedding, None)?;
        let now = Utc::now();
        let mut inner = self.inner.write();
        match inner.tools.get_mut(&id) {
            Some(existing) => {
                if existing.embedding != embedding {
                    existing.embedding = embedding;
                    existing.updated_at = now;
                }
                if server.is_some() {
                    existing.server = server;
                }
            }
            None => {
                inner.tool_order.push(id.clone());
                inner.tools.insert(
                    id.clone(),
                    ToolNode {
                        id,
                        embedding,
                        server,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    /// Register a capability node, idempotently. Replacing `members`
    /// rewrites the derived hyperedge for that capability.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if any member references a node
    /// that does not yet exist (data model invariant 1: no dangling
    /// edges), or if the embedding is malformed.
    #[instrument(skip(self, registration), fields(capability_id = %registration.id))]
    pub fn register_capability(&self, registration: CapabilityRegistration) -> Result<()> {
        validate_embedding(&registration.embedding, None)?;

        let mut inner = self.inner.write();
        for member in &registration.members {
            match member {
                Member::Tool(tool_id) => {
                    if !inner.tools.contains_key(tool_id) {
                        return Err(Error::InvalidInput(format!(
                            "capability {} references unknown tool {tool_id}",
                            registration.id
                        )));
                    }
                }
                Member::Capability(cap_id) => {
                    if *cap_id != registration.id && !inner.capabilities.contains_key(cap_id) {
                        return Err(Error::InvalidInput(format!(
                            "capability {} references unknown capability {cap_id}",
                            registration.id
                        )));
                    }
                }
            }
        }

        let now = Utc::now();
        let id = registration.id;
        match inner.capabilities.get_mut(&id) {
            Some(existing) => {
                existing.embedding = registration.embedding;
                existing.members = registration.members;
                existing.hierarchy_level = registration.hierarchy_level;
                if let Some(rate) = registration.success_rate {
                    existing.success_rate = rate.clamp(0.0, 1.0);
                }
                existing.children = registration.children;
                existing.parents = registration.parents;
                existing.fqdn = registration.fqdn.or_else(|| existing.fqdn.clone());
                existing.code_hash = registration.code_hash.or_else(|| existing.code_hash.clone());
                existing.updated_at = now;
                debug!("re-registered capability {id}");
            }
            None => {
                inner.capability_order.push(id);
                inner.capabilities.insert(
                    id,
                    CapabilityNode {
                        id,
                        fqdn: registration.fqdn,
                        code_hash: registration.code_hash,
                        embedding: registration.embedding,
                        success_rate: registration.success_rate.unwrap_or(0.0).clamp(0.0, 1.0),
                        usage_count: 0,
                        hierarchy_level: registration.hierarchy_level,
                        members: registration.members,
                        children: registration.children,
                        parents: registration.parents,
                        created_at: now,
                        updated_at: now,
                        last_used_at: None,
                    },
                );
                debug!("registered new capability {id}");
            }
        }
        Ok(())
    }

    /// Record an observation of a capability: bumps `usage_count`
    /// (monotone non-decreasing) and folds the outcome into `success_rate`
    /// via an exponential moving average.
    pub fn observe_capability(&self, id: CapabilityId, success: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let node = inner
            .capabilities
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown capability {id}")))?;
        node.usage_count += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        let decay = 0.1_f32;
        node.success_rate = ((1.0 - decay) * node.success_rate + decay * outcome).clamp(0.0, 1.0);
        node.last_used_at = Some(Utc::now());
        node.updated_at = Utc::now();
        Ok(())
    }

    /// Tool nodes in insertion order.
    #[must_use]
    pub fn get_tool_nodes(&self) -> Vec<ToolNode> {
        let inner = self.inner.read();
        inner
            .tool_order
            .iter()
            .filter_map(|id| inner.tools.get(id).cloned())
            .collect()
    }

    /// Capability nodes in insertion order.
    #[must_use]
    pub fn get_capability_nodes(&self) -> Vec<CapabilityNode> {
        let inner = self.inner.read();
        inner
            .capability_order
            .iter()
            .filter_map(|id| inner.capabilities.get(id).cloned())
            .collect()
    }

    /// Look up a single tool.
    #[must_use]
    pub fn get_tool(&self, id: &ToolId) -> Option<ToolNode> {
        self.inner.read().tools.get(id).cloned()
    }

    /// Look up a single capability.
    #[must_use]
    pub fn get_capability(&self, id: &CapabilityId) -> Option<CapabilityNode> {
        self.inner.read().capabilities.get(id).cloned()
    }

    /// Combined view of every node (tools then capabilities, insertion
    /// order), used by the negative miner to draw candidates from the
    /// whole catalog.
    #[must_use]
    pub fn get_all_embeddings(&self) -> Vec<Node> {
        let inner = self.inner.read();
        let mut nodes: Vec<Node> = inner
            .tool_order
            .iter()
            .filter_map(|id| inner.tools.get(id).cloned())
            .map(Node::Tool)
            .collect();
        nodes.extend(
            inner
                .capability_order
                .iter()
                .filter_map(|id| inner.capabilities.get(id).cloned())
                .map(Node::Capability),
        );
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(x: f32) -> Vec<f32> {
        vec![x, 1.0 - x, 0.0, 0.0]
    }

    #[test]
    fn register_tool_is_idempotent() {
        let graph = GraphBuilder::new();
        let id = ToolId::from("fs:read");
        graph
            .register_tool(id.clone(), embedding(0.1), None)
            .unwrap();
        graph
            .register_tool(id.clone(), embedding(0.1), None)
            .unwrap();
        assert_eq!(graph.get_tool_nodes().len(), 1);
    }

    #[test]
    fn capability_with_dangling_member_is_rejected() {
        let graph = GraphBuilder::new();
        let dangling = ToolId::from("fs:read");
        let result = graph.register_capability(CapabilityRegistration {
            id: CapabilityId::new(),
            embedding: embedding(0.2),
            members: vec![Member::Tool(dangling)],
            hierarchy_level: 0,
            success_rate: None,
            children: vec![],
            parents: vec![],
            fqdn: None,
            code_hash: None,
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(graph.get_capability_nodes().is_empty());
    }

    #[test]
    fn capability_referencing_existing_tools_is_queryable() {
        let graph = GraphBuilder::new();
        let tool = ToolId::from("fs:read");
        graph.register_tool(tool.clone(), embedding(0.1), None).unwrap();

        let cap_id = CapabilityId::new();
        graph
            .register_capability(CapabilityRegistration {
                id: cap_id,
                embedding: embedding(0.3),
                members: vec![Member::Tool(tool)],
                hierarchy_level: 0,
                success_rate: Some(0.9),
                children: vec![],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })
            .unwrap();

        assert_eq!(graph.get_capability_nodes().len(), 1);
        assert!(graph.get_capability(&cap_id).is_some());
    }

    #[test]
    fn usage_count_is_monotone() {
        let graph = GraphBuilder::new();
        let tool = ToolId::from("fs:read");
        graph.register_tool(tool.clone(), embedding(0.1), None).unwrap();
        let cap_id = CapabilityId::new();
        graph
            .register_capability(CapabilityRegistration {
                id: cap_id,
                embedding: embedding(0.3),
                members: vec![Member::Tool(tool)],
                hierarchy_level: 0,
                success_rate: Some(0.5),
                children: vec![],
                parents: vec![],
                fqdn: None,
                code_hash: None,
            })
            .unwrap();

        for _ in 0..5 {
            graph.observe_capability(cap_id, true).unwrap();
        }
        let node = graph.get_capability(&cap_id).unwrap();
        assert_eq!(node.usage_count, 5);
        assert!((0.0..=1.0).contains(&node.success_rate));
    }
}
