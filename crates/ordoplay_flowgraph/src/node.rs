// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A node is split in two halves: [`Node`] is the graph-owned header (identity,
//! ports, error slot) and [`NodeKind`] is the behavior plugged into it. Kinds opt
//! into the [`Valued`] and [`Executable`] capabilities.

use crate::evaluation::Valued;
use crate::execution::Executable;
use crate::graph::Graph;
use crate::port::{Port, PortDirection, PortId, PortType};
use crate::variable::VariableTable;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Input nodes (constants, parameters, variables)
    Input,
    /// Output nodes (results, decisions)
    Output,
    /// Math operations
    Math,
    /// Logic/flow control
    Logic,
    /// Utility nodes
    Utility,
    /// Custom/user-defined
    Custom,
}

/// Error recorded in a node's error slot.
///
/// These never abort a query or run; the node degrades to a default or no-op.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
    /// A value or binding does not match the declared port type
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type the port declares
        expected: PortType,
        /// Type that was supplied
        found: PortType,
    },

    /// Bound variable name does not resolve
    #[error("References unknown variable `{0}`")]
    UnknownVariable(String),

    /// Subgraph node has no nested graph
    #[error("No subgraph found")]
    MissingSubgraph,

    /// Nested graph has no entry node
    #[error("No entry point node found")]
    MissingEntryPoint,

    /// A required input has no connection
    #[error("`{0}` requires an input connection")]
    MissingConnection(String),

    /// Attempt to write a constant variable
    #[error("Cannot set constant `{0}`")]
    ConstantVariable(String),

    /// Node-specific failure
    #[error("{0}")]
    Custom(String),
}

/// Where a node is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    /// Not owned by a graph
    Unbound,
    /// Added to a graph but not validated yet
    Enabled,
    /// Validated with an empty error slot
    Valid,
    /// Error slot is set
    Invalid,
}

/// A node instance in the graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Registry ID of the node's kind
    pub node_type: String,
    /// Display name (can be customized, not unique)
    pub name: String,
    /// Input ports
    inputs: Vec<Port>,
    /// Output ports
    outputs: Vec<Port>,
    error: Option<NodeError>,
    attached: bool,
    validated: bool,
}

impl Node {
    /// Create a detached node header from a kind's signature
    pub fn new(kind: &dyn NodeKind) -> Self {
        let mut node = Self {
            id: NodeId::new(),
            node_type: kind.kind_id().to_string(),
            name: kind.display_name(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            error: None,
            attached: false,
            validated: false,
        };
        for port in kind.ports() {
            if let Err(e) = node.add_port(port) {
                tracing::warn!("[{}] skipping port from signature: {}", node.name, e);
            }
        }
        node
    }

    /// Get an input port by name
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Get an output port by name
    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Get a port by direction and name
    pub fn port(&self, direction: PortDirection, name: &str) -> Option<&Port> {
        match direction {
            PortDirection::Input => self.input(name),
            PortDirection::Output => self.output(name),
        }
    }

    /// Get a port by ID
    pub fn port_by_id(&self, port_id: PortId) -> Option<&Port> {
        self.ports().find(|p| p.id == port_id)
    }

    pub(crate) fn port_by_id_mut(&mut self, port_id: PortId) -> Option<&mut Port> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|p| p.id == port_id)
    }

    pub(crate) fn port_mut(&mut self, direction: PortDirection, name: &str) -> Option<&mut Port> {
        let ports = match direction {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        };
        ports.iter_mut().find(|p| p.name == name)
    }

    /// Input ports in declaration order
    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    /// Output ports in declaration order
    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// Get all ports
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Add a port. Names are unique per direction.
    pub(crate) fn add_port(&mut self, port: Port) -> Result<PortId, crate::graph::GraphError> {
        if self.port(port.direction, &port.name).is_some() {
            return Err(crate::graph::GraphError::DuplicatePort {
                name: port.name,
                direction: port.direction,
            });
        }
        let id = port.id;
        match port.direction {
            PortDirection::Input => self.inputs.push(port),
            PortDirection::Output => self.outputs.push(port),
        }
        Ok(id)
    }

    /// Detach a port from the node. Connections must already be severed.
    pub(crate) fn take_port(&mut self, port_id: PortId) -> Option<Port> {
        if let Some(index) = self.inputs.iter().position(|p| p.id == port_id) {
            return Some(self.inputs.remove(index));
        }
        let index = self.outputs.iter().position(|p| p.id == port_id)?;
        Some(self.outputs.remove(index))
    }

    /// Current error, if any
    pub fn error(&self) -> Option<&NodeError> {
        self.error.as_ref()
    }

    /// Set or clear the error slot
    pub fn set_error(&mut self, error: Option<NodeError>) {
        if let Some(e) = &error {
            tracing::debug!("[{}] {}", self.name, e);
        }
        self.error = error;
    }

    /// Whether the error slot is empty
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Lifecycle state derived from graph membership and the error slot
    pub fn lifecycle(&self) -> NodeLifecycle {
        if !self.attached {
            NodeLifecycle::Unbound
        } else if !self.validated {
            NodeLifecycle::Enabled
        } else if self.error.is_some() {
            NodeLifecycle::Invalid
        } else {
            NodeLifecycle::Valid
        }
    }

    pub(crate) fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
        if !attached {
            self.validated = false;
        }
    }

    pub(crate) fn mark_validated(&mut self) {
        self.validated = true;
    }
}

/// Read-only graph state handed to lifecycle hooks
#[derive(Clone, Copy)]
pub struct GraphEnv<'a> {
    /// The owning graph's variables
    pub variables: &'a VariableTable,
}

/// Downcasting support for node kinds
pub trait AsAny {
    /// Borrow as `Any`
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as `Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behavior of a node.
///
/// Every hook has a no-op default so simple kinds only describe their ports and
/// capabilities.
pub trait NodeKind: AsAny + fmt::Debug + 'static {
    /// Registry ID of this kind
    fn kind_id(&self) -> &'static str;

    /// Initial display name for new instances
    fn display_name(&self) -> String {
        self.kind_id().to_string()
    }

    /// Tags used by registries and graph lookups
    fn tags(&self) -> &'static [&'static str] {
        &[]
    }

    /// Port signature for this kind in its current configuration
    fn ports(&self) -> Vec<Port>;

    /// Called once when the node is inserted into a graph
    fn on_added(&mut self, _node: &mut Node) {}

    /// Called when the node leaves its graph. Release exclusively owned resources here.
    fn on_removed(&mut self, _node: &mut Node) {}

    /// Called when the graph is enabled. Defaults to validation.
    fn on_enable(&mut self, node: &mut Node, env: &GraphEnv<'_>) {
        self.on_validate(node, env);
    }

    /// Re-check dependencies and set the error slot. The slot is cleared beforehand.
    fn on_validate(&mut self, _node: &mut Node, _env: &GraphEnv<'_>) {}

    /// Name of the variable this node is softly bound to
    fn variable_binding(&self) -> Option<&str> {
        None
    }

    /// Follow a variable rename
    fn rebind_variable(&mut self, _node: &mut Node, _name: &str) {}

    /// Value capability
    fn as_valued(&self) -> Option<&dyn Valued> {
        None
    }

    /// Whether [`NodeKind::as_executable_mut`] returns `Some`
    fn is_executable(&self) -> bool {
        false
    }

    /// Execution capability
    fn as_executable_mut(&mut self) -> Option<&mut dyn Executable> {
        None
    }

    /// Copy of this kind for a duplicated node
    fn duplicate(&self) -> Box<dyn NodeKind>;

    /// Warning callers must see when duplicating this kind
    fn duplicate_warning(&self) -> Option<&'static str> {
        None
    }

    /// Kind-specific settings for persistence
    fn save(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Restore settings written by [`NodeKind::save`]
    fn load(&mut self, _settings: &serde_json::Value) -> Result<(), serde_json::Error> {
        Ok(())
    }

    /// Nested graph owned by this node
    fn subgraph(&self) -> Option<&Graph> {
        None
    }

    /// Mutable nested graph owned by this node
    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        None
    }
}

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeType {
    /// Unique type identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Constructor for a default instance
    pub factory: fn() -> Box<dyn NodeKind>,
}

impl NodeType {
    /// Build a default instance of this type
    pub fn instantiate(&self) -> Box<dyn NodeKind> {
        (self.factory)()
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    /// Registered node types by ID
    types: IndexMap<String, NodeType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// Register a node type
    pub fn register(&mut self, node_type: NodeType) {
        self.types.insert(node_type.id.clone(), node_type);
    }

    /// Merge every type from another registry
    pub fn extend(&mut self, other: NodeRegistry) {
        self.types.extend(other.types);
    }

    /// Get a node type by ID
    pub fn get(&self, id: &str) -> Option<&NodeType> {
        self.types.get(id)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Get types whose instances carry `tag`
    pub fn types_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a NodeType> {
        self.types
            .values()
            .filter(move |t| t.instantiate().tags().contains(&tag))
    }

    /// Types offering a port that could connect to the dangling `port`
    pub fn compatible_types<'a>(&'a self, port: &'a Port) -> impl Iterator<Item = &'a NodeType> {
        let wanted = port.direction.opposite();
        self.types.values().filter(move |t| {
            t.instantiate()
                .ports()
                .iter()
                .any(|candidate| candidate.direction == wanted && port.can_connect(candidate))
        })
    }

    /// Create a node kind from a type ID
    pub fn create(&self, type_id: &str) -> Option<Box<dyn NodeKind>> {
        self.get(type_id).map(NodeType::instantiate)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::compute::ResultNode;
    use crate::graphs::create_default_registry;
    use crate::graphs::math::{MathNode, MathOp};
    use crate::port::PortValue;

    #[test]
    fn test_node_from_signature() {
        let node = Node::new(&MathNode::new(MathOp::Add));
        assert_eq!(node.node_type, "add");
        assert_eq!(node.inputs().len(), 2);
        assert_eq!(node.outputs().len(), 1);
        assert!(node.input("A").is_some());
        assert!(node.output("Result").is_some());
        assert_eq!(node.lifecycle(), NodeLifecycle::Unbound);
    }

    #[test]
    fn test_port_names_unique_per_direction() {
        let mut node = Node::new(&ResultNode);
        // Same name on the opposite direction is fine
        assert!(node.add_port(Port::output("Value", PortType::Float)).is_ok());
        assert!(node.add_port(Port::input("Value", PortType::Float)).is_err());
    }

    #[test]
    fn test_error_slot() {
        let mut node = Node::new(&ResultNode);
        assert!(node.is_valid());
        node.set_error(Some(NodeError::MissingEntryPoint));
        assert_eq!(node.error(), Some(&NodeError::MissingEntryPoint));
        node.set_error(None);
        assert!(node.is_valid());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = create_default_registry();
        assert!(registry.get("add").is_some());
        assert!(registry.create("float_constant").is_some());
        assert!(registry.create("does_not_exist").is_none());
        assert!(registry.types_in_category(NodeCategory::Math).count() >= 4);
        assert!(registry.types_with_tag("Variables").count() >= 2);
    }

    #[test]
    fn test_compatible_types_for_dangling_port() {
        let registry = create_default_registry();

        // A dangling bool output can feed a branch condition, but not an add node
        let dangling = Port::output("Hit", PortType::Bool);
        let ids: Vec<_> = registry.compatible_types(&dangling).map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&"branch"));
        assert!(!ids.contains(&"add"));

        // A dangling float input can be fed by an int constant through widening
        let dangling = Port::input("Height", PortType::Float).with_default(PortValue::Float(0.0));
        let ids: Vec<_> = registry.compatible_types(&dangling).map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&"int_constant"));
        assert!(!ids.contains(&"string_constant"));
    }
}
