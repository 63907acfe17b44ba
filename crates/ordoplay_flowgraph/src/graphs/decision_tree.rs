// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decision tree for AI agents.
//!
//! The agent and target travel in the [`ExecutionToken`] so every node in the
//! tree can read them. The decision is the value arriving at the
//! [`CanAttackTarget`] node's `Boolean` input.

use crate::evaluation::{InputValues, OutputValues, ValueEnv, Valued};
use crate::execution::ExecutionToken;
use crate::graph::Graph;
use crate::node::{NodeCategory, NodeError, NodeKind, NodeRegistry, NodeType};
use crate::port::{Port, PortType, PortValue};

/// Token key of the agent's faction
pub const AGENT_FACTION: &str = "agent_faction";
/// Token key of the target's faction
pub const TARGET_FACTION: &str = "target_faction";
/// Token key of the agent's position
pub const AGENT_POSITION: &str = "agent_position";
/// Token key of the target's position
pub const TARGET_POSITION: &str = "target_position";

/// Create the decision tree node registry
pub fn create_decision_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(NodeType {
        id: "can_attack_target".to_string(),
        name: "Can Attack Target".to_string(),
        category: NodeCategory::Output,
        description: "Decision: may the agent attack the target".to_string(),
        factory: || Box::new(CanAttackTarget),
    });

    registry.register(NodeType {
        id: "is_opposite_faction".to_string(),
        name: "Is Opposite Faction".to_string(),
        category: NodeCategory::Logic,
        description: "Whether agent and target belong to different factions".to_string(),
        factory: || Box::new(IsOppositeFaction),
    });

    registry.register(NodeType {
        id: "raycast_to_target".to_string(),
        name: "Raycast To Target".to_string(),
        category: NodeCategory::Logic,
        description: "Distance to the target and whether it is in range".to_string(),
        factory: || Box::new(RaycastToTarget),
    });

    registry
}

/// Participant in a decision
#[derive(Debug, Clone, PartialEq)]
pub struct Combatant {
    /// Faction name
    pub faction: String,
    /// World position
    pub position: [f32; 3],
}

impl Combatant {
    /// Create a combatant
    pub fn new(faction: impl Into<String>, position: [f32; 3]) -> Self {
        Self {
            faction: faction.into(),
            position,
        }
    }
}

/// Graph answering "can this agent attack this target"
#[derive(Debug)]
pub struct DecisionTree {
    graph: Graph,
}

impl DecisionTree {
    /// Create an empty decision tree
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_graph(Graph::new(name))
    }

    /// Wrap an existing graph
    pub fn from_graph(graph: Graph) -> Self {
        Self { graph }
    }

    /// The underlying graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access to the underlying graph
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Unwrap the underlying graph
    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Token carrying `agent` and `target` to the tree's nodes
    pub fn context(agent: &Combatant, target: &Combatant) -> ExecutionToken {
        ExecutionToken::new()
            .with(AGENT_FACTION, agent.faction.as_str())
            .with(TARGET_FACTION, target.faction.as_str())
            .with(AGENT_POSITION, PortValue::Vector3(agent.position))
            .with(TARGET_POSITION, PortValue::Vector3(target.position))
    }

    /// Walk the tree to decide whether `agent` may attack `target`.
    ///
    /// Returns false when the tree has no [`CanAttackTarget`] node.
    pub fn can_attack_target(&mut self, agent: &Combatant, target: &Combatant) -> bool {
        let Some(decision) = self.graph.find_node::<CanAttackTarget>() else {
            tracing::warn!("Missing \"Can Attack Target\" decision in {}", self.graph.name);
            return false;
        };
        let token = Self::context(agent, target);
        match self.graph.resolve_input(decision, "Boolean", &token) {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                tracing::warn!("Decision in {} failed: {}", self.graph.name, e);
                false
            }
        }
    }
}

/// Sink whose `Boolean` input is the decision
#[derive(Debug, Clone, Copy, Default)]
pub struct CanAttackTarget;

impl NodeKind for CanAttackTarget {
    fn kind_id(&self) -> &'static str {
        "can_attack_target"
    }

    fn display_name(&self) -> String {
        "Can Attack Target".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["AI", "Decision"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::input("Boolean", PortType::Bool).with_default(PortValue::Bool(false))]
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

fn token_str<'a>(token: &'a ExecutionToken, key: &str) -> Result<&'a str, NodeError> {
    token
        .get(key)
        .and_then(PortValue::as_str)
        .ok_or_else(|| NodeError::Custom(format!("Missing `{key}` in context")))
}

fn token_vec3(token: &ExecutionToken, key: &str) -> Result<[f32; 3], NodeError> {
    match token.get(key) {
        Some(PortValue::Vector3(v)) => Ok(*v),
        _ => Err(NodeError::Custom(format!("Missing `{key}` in context"))),
    }
}

/// Whether agent and target belong to different factions
#[derive(Debug, Clone, Copy, Default)]
pub struct IsOppositeFaction;

impl NodeKind for IsOppositeFaction {
    fn kind_id(&self) -> &'static str {
        "is_opposite_faction"
    }

    fn display_name(&self) -> String {
        "Is Opposite Faction".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["AI"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::output("Boolean", PortType::Bool)]
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

impl Valued for IsOppositeFaction {
    fn request_values(
        &self,
        _outputs: &[Port],
        _inputs: &InputValues,
        env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        let agent = token_str(env.token, AGENT_FACTION)?;
        let target = token_str(env.token, TARGET_FACTION)?;
        Ok(OutputValues::single("Boolean", PortValue::Bool(agent != target)))
    }
}

/// Distance from agent to target, and whether it is within `Max Distance`
#[derive(Debug, Clone, Copy, Default)]
pub struct RaycastToTarget;

impl NodeKind for RaycastToTarget {
    fn kind_id(&self) -> &'static str {
        "raycast_to_target"
    }

    fn display_name(&self) -> String {
        "Raycast To Target".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["AI"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![
            Port::input("Max Distance", PortType::Float).with_default(PortValue::Float(10.0)),
            Port::output("Distance", PortType::Float),
            Port::output("Hit Target", PortType::Bool),
        ]
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

impl Valued for RaycastToTarget {
    fn request_values(
        &self,
        _outputs: &[Port],
        inputs: &InputValues,
        env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        let from = token_vec3(env.token, AGENT_POSITION)?;
        let to = token_vec3(env.token, TARGET_POSITION)?;
        let distance = from
            .iter()
            .zip(to.iter())
            .map(|(a, b)| (b - a) * (b - a))
            .sum::<f32>()
            .sqrt();

        Ok(OutputValues::new()
            .with("Distance", PortValue::Float(distance))
            .with("Hit Target", PortValue::Bool(distance <= inputs.float("Max Distance"))))
    }
}
