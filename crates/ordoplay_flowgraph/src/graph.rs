// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and the connections between their ports.

use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::evaluation::{EvaluationError, Pass, Resolver};
use crate::execution::{self, ExecutionError, ExecutionToken, RunBudget, RunReport};
use crate::graphs::flow::EntryNode;
use crate::node::{GraphEnv, Node, NodeError, NodeId, NodeKind};
use crate::port::{Port, PortCapacity, PortDirection, PortId, PortRef, PortType, PortValue};
use crate::variable::{GraphVariable, VariableError, VariableTable};
use indexmap::IndexMap;

/// A node header together with its behavior.
///
/// `kind` is only `None` while the node is executing.
#[derive(Debug)]
pub(crate) struct NodeSlot {
    pub(crate) node: Node,
    pub(crate) kind: Option<Box<dyn NodeKind>>,
}

pub(crate) type NodeMap = IndexMap<NodeId, NodeSlot>;

/// Result of duplicating a node
#[derive(Debug, Clone, PartialEq)]
pub struct Duplicated {
    /// ID of the new node
    pub id: NodeId,
    /// Hazard the caller must know about, e.g. state that was not copied
    pub warning: Option<String>,
}

/// A node graph
#[derive(Debug)]
pub struct Graph {
    /// Graph name
    pub name: String,
    /// Nodes in insertion order
    pub(crate) nodes: NodeMap,
    /// Variables shared by the graph's nodes
    pub(crate) variables: VariableTable,
    config: EngineConfig,
    enabled: bool,
}

impl Graph {
    /// Create a new empty, enabled graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            variables: VariableTable::new(),
            config: EngineConfig::default(),
            enabled: true,
        }
    }

    /// Graph that defers enable hooks until [`Graph::enable`] is called
    pub(crate) fn unloaded(name: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(name)
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the engine configuration
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node of a concrete kind
    pub fn add<K: NodeKind>(&mut self, kind: K) -> NodeId {
        self.add_node(Box::new(kind))
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, kind: Box<dyn NodeKind>) -> NodeId {
        self.insert_node(NodeId::new(), kind)
    }

    /// Insert under a known ID. Callers guarantee the ID is unused.
    pub(crate) fn insert_node(&mut self, id: NodeId, mut kind: Box<dyn NodeKind>) -> NodeId {
        let mut node = Node::new(kind.as_ref());
        node.id = id;
        node.set_attached(true);
        kind.on_added(&mut node);
        tracing::debug!("Added node {} ({}) to {}", node.name, node.node_type, self.name);

        let mut slot = NodeSlot {
            node,
            kind: Some(kind),
        };
        if self.enabled {
            let env = GraphEnv {
                variables: &self.variables,
            };
            enable_slot(&mut slot, &env);
        }
        self.nodes.insert(id, slot);
        id
    }

    /// Remove a node, severing its connections first
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let slot = self.nodes.get(&node_id)?;
        let edges: Vec<(PortRef, PortRef)> = slot
            .node
            .ports()
            .flat_map(|p| {
                let own = PortRef::new(node_id, p.id);
                p.connections().iter().map(move |peer| (own, *peer))
            })
            .collect();

        let mut neighbors = Vec::new();
        for (own, peer) in edges {
            self.sever(own, peer);
            neighbors.push(peer.node);
        }

        let mut slot = self.nodes.shift_remove(&node_id)?;
        if let Some(kind) = slot.kind.as_deref_mut() {
            kind.on_removed(&mut slot.node);
        }
        slot.node.set_attached(false);
        tracing::debug!("Removed node {} from {}", slot.node.name, self.name);

        for neighbor in neighbors {
            self.validate_node(neighbor);
        }
        Some(slot.node)
    }

    /// Remove every node
    pub fn clear(&mut self) {
        let ids: Vec<_> = self.nodes.keys().copied().collect();
        for id in ids {
            self.remove_node(id);
        }
    }

    /// Add a copy of a node. Connections are not copied.
    pub fn duplicate_node(&mut self, node_id: NodeId) -> Result<Duplicated, GraphError> {
        let slot = self.nodes.get(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let kind = slot.kind.as_deref().ok_or(GraphError::NodeBusy(node_id))?;
        let warning = kind.duplicate_warning().map(str::to_string);
        let copy = kind.duplicate();
        let name = slot.node.name.clone();
        let defaults: Vec<(String, Option<PortValue>)> = slot
            .node
            .inputs()
            .iter()
            .map(|p| (p.name.clone(), p.default_value.clone()))
            .collect();

        if let Some(warning) = &warning {
            tracing::warn!("[{}] {}", name, warning);
        }

        let id = self.add_node(copy);
        if let Some(slot) = self.nodes.get_mut(&id) {
            slot.node.name = name;
            for (port_name, default) in defaults {
                if let Some(port) = slot.node.port_mut(PortDirection::Input, &port_name) {
                    port.default_value = default;
                }
            }
        }
        Ok(Duplicated { id, warning })
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id).map(|s| &s.node)
    }

    /// Whether a node exists
    pub fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().map(|s| &s.node)
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Rename a node's display name
    pub fn set_node_name(&mut self, node_id: NodeId, name: impl Into<String>) -> Result<(), GraphError> {
        let slot = self.nodes.get_mut(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        slot.node.name = name.into();
        Ok(())
    }

    /// Set or clear a node's error slot
    pub fn set_error(&mut self, node_id: NodeId, error: Option<NodeError>) -> Result<(), GraphError> {
        let slot = self.nodes.get_mut(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        slot.node.set_error(error);
        Ok(())
    }

    /// Nodes with an error, in graph order
    pub fn errors(&self) -> impl Iterator<Item = (NodeId, &NodeError)> {
        self.nodes
            .iter()
            .filter_map(|(id, s)| s.node.error().map(|e| (*id, e)))
    }

    /// Borrow a node's behavior as a concrete kind
    pub fn kind<K: NodeKind>(&self, node_id: NodeId) -> Option<&K> {
        self.nodes
            .get(&node_id)?
            .kind
            .as_deref()?
            .as_any()
            .downcast_ref::<K>()
    }

    /// Mutably borrow a node's behavior.
    ///
    /// Use [`Graph::edit_node`] when the change affects the port signature.
    pub fn kind_mut<K: NodeKind>(&mut self, node_id: NodeId) -> Option<&mut K> {
        self.nodes
            .get_mut(&node_id)?
            .kind
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut::<K>()
    }

    /// Change a node's behavior, then reconcile its ports and revalidate it
    pub fn edit_node<K: NodeKind, R>(
        &mut self,
        node_id: NodeId,
        f: impl FnOnce(&mut K) -> R,
    ) -> Result<R, GraphError> {
        let kind = self
            .kind_mut::<K>(node_id)
            .ok_or(GraphError::KindMismatch(node_id))?;
        let result = f(kind);
        self.reconcile_ports(node_id)?;
        self.validate_node(node_id);
        Ok(result)
    }

    /// First node of a concrete kind
    pub fn find_node<K: NodeKind>(&self) -> Option<NodeId> {
        self.nodes_of::<K>().next()
    }

    /// All nodes of a concrete kind
    pub fn nodes_of<K: NodeKind>(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, s)| s.kind.as_deref().is_some_and(|k| k.as_any().is::<K>()))
            .map(|(id, _)| *id)
    }

    /// All nodes whose registry ID is `type_id`
    pub fn nodes_of_type<'a>(&'a self, type_id: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.nodes
            .iter()
            .filter(move |(_, s)| s.node.node_type == type_id)
            .map(|(id, _)| *id)
    }

    /// All nodes whose kind carries `tag`
    pub fn nodes_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.nodes
            .iter()
            .filter(move |(_, s)| s.kind.as_deref().is_some_and(|k| k.tags().contains(&tag)))
            .map(|(id, _)| *id)
    }

    /// The graph's entry marker node
    pub fn entry_node(&self) -> Option<NodeId> {
        self.find_node::<EntryNode>()
    }

    pub(crate) fn detach_kind(&mut self, node_id: NodeId) -> Option<Box<dyn NodeKind>> {
        self.nodes.get_mut(&node_id)?.kind.take()
    }

    pub(crate) fn attach_kind(&mut self, node_id: NodeId, kind: Box<dyn NodeKind>) {
        if let Some(slot) = self.nodes.get_mut(&node_id) {
            slot.kind = Some(kind);
        }
    }

    pub(crate) fn apply_errors(&mut self, errors: Vec<(NodeId, NodeError)>) {
        for (node_id, error) in errors {
            if let Some(slot) = self.nodes.get_mut(&node_id) {
                slot.node.set_error(Some(error));
            }
        }
    }

    // ------------------------------------------------------------------
    // Ports
    // ------------------------------------------------------------------

    fn port_ref(&self, node_id: NodeId, direction: PortDirection, name: &str) -> Result<PortRef, GraphError> {
        let node = self.node(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let port = node
            .port(direction, name)
            .ok_or_else(|| GraphError::PortNotFound {
                node: node_id,
                port: name.to_string(),
            })?;
        Ok(PortRef::new(node_id, port.id))
    }

    /// Look up a port by reference
    pub fn port(&self, port: &PortRef) -> Option<&Port> {
        self.node(port.node)?.port_by_id(port.port)
    }

    fn port_mut(&mut self, port: &PortRef) -> Option<&mut Port> {
        self.nodes.get_mut(&port.node)?.node.port_by_id_mut(port.port)
    }

    /// Add a port to a node
    pub fn add_port(&mut self, node_id: NodeId, port: Port) -> Result<PortId, GraphError> {
        let slot = self.nodes.get_mut(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        slot.node.add_port(port)
    }

    /// Remove a port from a node, severing its connections first
    pub fn remove_port(
        &mut self,
        node_id: NodeId,
        direction: PortDirection,
        name: &str,
    ) -> Result<Port, GraphError> {
        let own = self.port_ref(node_id, direction, name)?;
        self.disconnect_all_at(own);
        self.nodes
            .get_mut(&node_id)
            .and_then(|s| s.node.take_port(own.port))
            .ok_or_else(|| GraphError::PortNotFound {
                node: node_id,
                port: name.to_string(),
            })
    }

    /// Set the inline value an unconnected input yields, then revalidate the node
    pub fn set_input_default(
        &mut self,
        node_id: NodeId,
        port_name: &str,
        value: PortValue,
    ) -> Result<(), GraphError> {
        let own = self.port_ref(node_id, PortDirection::Input, port_name)?;
        let port = self.port_mut(&own).ok_or(GraphError::NodeNotFound(node_id))?;
        let cast = value.cast_to(&port.port_type).ok_or_else(|| GraphError::TypeMismatch {
            from: value.port_type(),
            to: port.port_type.clone(),
        })?;
        port.default_value = Some(cast);
        self.validate_node(node_id);
        Ok(())
    }

    /// Bring a node's ports in line with its kind's current signature.
    ///
    /// Ports missing from the signature are removed; retyped ports keep only
    /// connections that still type-check and fit the capacity.
    fn reconcile_ports(&mut self, node_id: NodeId) -> Result<(), GraphError> {
        let slot = self.nodes.get(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let kind = slot.kind.as_deref().ok_or(GraphError::NodeBusy(node_id))?;
        let signature = kind.ports();

        let mut severed = Vec::new();
        let mut removed = Vec::new();
        let mut retyped = Vec::new();
        for port in slot.node.ports() {
            let own = PortRef::new(node_id, port.id);
            let wanted = signature
                .iter()
                .find(|s| s.direction == port.direction && s.name == port.name);
            match wanted {
                None => {
                    removed.push(port.id);
                    severed.extend(port.connections().iter().map(|peer| (own, *peer)));
                }
                Some(sig) if sig.port_type != port.port_type || sig.capacity != port.capacity => {
                    let mut kept = 0;
                    for peer in port.connections() {
                        let fits = self.port(peer).is_some_and(|p| match port.direction {
                            PortDirection::Input => p.port_type.is_castable_to(&sig.port_type),
                            PortDirection::Output => sig.port_type.is_castable_to(&p.port_type),
                        });
                        let room = port.direction == PortDirection::Output
                            || sig.capacity == PortCapacity::Multiple
                            || kept == 0;
                        if fits && room {
                            kept += 1;
                        } else {
                            severed.push((own, *peer));
                        }
                    }
                    retyped.push((port.id, sig.clone()));
                }
                Some(_) => {}
            }
        }
        let added: Vec<Port> = signature
            .into_iter()
            .filter(|s| slot.node.port(s.direction, &s.name).is_none())
            .collect();

        for (own, peer) in severed {
            self.sever(own, peer);
            self.validate_node(peer.node);
        }

        let slot = self.nodes.get_mut(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        for port_id in removed {
            slot.node.take_port(port_id);
        }
        for (port_id, sig) in retyped {
            if let Some(port) = slot.node.port_by_id_mut(port_id) {
                port.default_value = port
                    .default_value
                    .as_ref()
                    .and_then(|v| v.cast_to(&sig.port_type))
                    .or(sig.default_value);
                port.port_type = sig.port_type;
                port.capacity = sig.capacity;
            }
        }
        for port in added {
            slot.node.add_port(port)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Connect an output port to an input port
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_port: &str,
        to_node: NodeId,
        to_port: &str,
    ) -> Result<(), GraphError> {
        let from = self.port_ref(from_node, PortDirection::Output, from_port)?;
        let to = self.port_ref(to_node, PortDirection::Input, to_port)?;
        self.connect_ports(from, to)
    }

    /// Connect two ports given in either order.
    ///
    /// Fails without touching either port when directions, types or the
    /// input's capacity do not allow the connection.
    pub fn connect_ports(&mut self, a: PortRef, b: PortRef) -> Result<(), GraphError> {
        let port_a = self.port(&a).ok_or(GraphError::NodeNotFound(a.node))?;
        let port_b = self.port(&b).ok_or(GraphError::NodeNotFound(b.node))?;
        if port_a.direction == port_b.direction {
            return Err(GraphError::SameDirection);
        }
        let ((output, output_port), (input, input_port)) = match port_a.direction {
            PortDirection::Output => ((a, port_a), (b, port_b)),
            PortDirection::Input => ((b, port_b), (a, port_a)),
        };

        if input_port.is_connected_to(&output) {
            return Ok(());
        }
        if !output_port.port_type.is_castable_to(&input_port.port_type) {
            return Err(GraphError::TypeMismatch {
                from: output_port.port_type.clone(),
                to: input_port.port_type.clone(),
            });
        }
        if !input_port.has_capacity() {
            return Err(GraphError::CapacityExceeded {
                port: input_port.name.clone(),
            });
        }

        if let Some(port) = self.port_mut(&output) {
            port.attach(input);
        }
        if let Some(port) = self.port_mut(&input) {
            port.attach(output);
        }
        self.validate_node(output.node);
        self.validate_node(input.node);
        Ok(())
    }

    /// Disconnect an output port from an input port. Returns whether an edge existed.
    pub fn disconnect(
        &mut self,
        from_node: NodeId,
        from_port: &str,
        to_node: NodeId,
        to_port: &str,
    ) -> Result<bool, GraphError> {
        let from = self.port_ref(from_node, PortDirection::Output, from_port)?;
        let to = self.port_ref(to_node, PortDirection::Input, to_port)?;
        Ok(self.disconnect_ports(from, to))
    }

    /// Disconnect two ports given in either order. No-op if they are not connected.
    pub fn disconnect_ports(&mut self, a: PortRef, b: PortRef) -> bool {
        let removed = self.sever(a, b);
        if removed {
            self.validate_node(a.node);
            self.validate_node(b.node);
        }
        removed
    }

    /// Remove every connection of a port, returning how many were removed
    pub fn disconnect_all(
        &mut self,
        node_id: NodeId,
        direction: PortDirection,
        name: &str,
    ) -> Result<usize, GraphError> {
        let own = self.port_ref(node_id, direction, name)?;
        Ok(self.disconnect_all_at(own))
    }

    fn disconnect_all_at(&mut self, own: PortRef) -> usize {
        let peers = self
            .port_mut(&own)
            .map(Port::take_connections)
            .unwrap_or_default();
        for peer in &peers {
            if let Some(port) = self.port_mut(peer) {
                port.detach(&own);
            }
            self.validate_node(peer.node);
        }
        if !peers.is_empty() {
            self.validate_node(own.node);
        }
        peers.len()
    }

    /// Detach both sides of an edge without revalidating
    fn sever(&mut self, a: PortRef, b: PortRef) -> bool {
        let removed_a = self.port_mut(&a).is_some_and(|p| p.detach(&b));
        let removed_b = self.port_mut(&b).is_some_and(|p| p.detach(&a));
        removed_a || removed_b
    }

    /// Get all connections, derived from output ports
    pub fn connections(&self) -> Vec<Connection> {
        self.nodes
            .iter()
            .flat_map(|(id, s)| {
                s.node.outputs().iter().flat_map(move |p| {
                    let from = PortRef::new(*id, p.id);
                    p.connections().iter().map(move |to| Connection::new(from, *to))
                })
            })
            .collect()
    }

    /// Get connections involving a node
    pub fn connections_for_node(&self, node_id: NodeId) -> Vec<Connection> {
        self.connections()
            .into_iter()
            .filter(|c| c.involves_node(node_id))
            .collect()
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.nodes
            .values()
            .flat_map(|s| s.node.outputs())
            .map(Port::connection_count)
            .sum()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Whether enable hooks have fired
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fire the enable hook on every node. Call once ports and connections are loaded.
    pub fn enable(&mut self) {
        self.enabled = true;
        let env = GraphEnv {
            variables: &self.variables,
        };
        for slot in self.nodes.values_mut() {
            enable_slot(slot, &env);
        }
        tracing::debug!("Enabled graph {} ({} nodes)", self.name, self.nodes.len());
    }

    /// Revalidate every node. No-op until the graph is enabled.
    pub fn validate(&mut self) {
        if !self.enabled {
            return;
        }
        let env = GraphEnv {
            variables: &self.variables,
        };
        for slot in self.nodes.values_mut() {
            validate_slot(slot, &env);
        }
    }

    /// Revalidate a single node
    pub fn validate_node(&mut self, node_id: NodeId) {
        if !self.enabled {
            return;
        }
        let env = GraphEnv {
            variables: &self.variables,
        };
        if let Some(slot) = self.nodes.get_mut(&node_id) {
            validate_slot(slot, &env);
        }
    }

    /// Revalidate every variable node.
    ///
    /// All of them, not only those bound to a changed variable, so dangling
    /// bindings can recover when a matching variable appears.
    pub fn revalidate_variable_nodes(&mut self) {
        if !self.enabled {
            return;
        }
        let env = GraphEnv {
            variables: &self.variables,
        };
        for slot in self.nodes.values_mut() {
            if slot.kind.as_deref().is_some_and(|k| k.variable_binding().is_some()) {
                validate_slot(slot, &env);
            }
        }
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// The variable table
    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    /// Find a variable by name
    pub fn find_variable(&self, name: &str) -> Option<&GraphVariable> {
        self.variables.find(name)
    }

    /// Add a variable with a generated name, returning the name
    pub fn add_variable(&mut self, var_type: PortType) -> Result<String, VariableError> {
        let name = self.variables.add(var_type)?.name.clone();
        self.revalidate_variable_nodes();
        Ok(name)
    }

    /// Add a variable with a requested name, returning the deduplicated name
    pub fn add_named_variable(&mut self, name: &str, var_type: PortType) -> Result<String, VariableError> {
        let name = self.variables.add_named(name, var_type)?.name.clone();
        self.revalidate_variable_nodes();
        Ok(name)
    }

    /// Remove a variable. Nodes bound to it become invalid.
    pub fn remove_variable(&mut self, name: &str) -> Result<GraphVariable, VariableError> {
        let removed = self.variables.remove(name)?;
        self.revalidate_variable_nodes();
        Ok(removed)
    }

    /// Rename a variable and carry nodes bound to it along
    pub fn rename_variable(&mut self, old_name: &str, new_name: &str) -> Result<String, VariableError> {
        let renamed = self.variables.rename(old_name, new_name)?;
        if renamed != old_name {
            tracing::debug!("Renamed variable {} to {}", old_name, renamed);
            for slot in self.nodes.values_mut() {
                let Some(kind) = slot.kind.as_deref_mut() else {
                    continue;
                };
                if kind.variable_binding() == Some(old_name) {
                    kind.rebind_variable(&mut slot.node, &renamed);
                }
            }
        }
        self.revalidate_variable_nodes();
        Ok(renamed)
    }

    /// Change a variable's type
    pub fn set_variable_type(&mut self, name: &str, var_type: PortType) -> Result<(), VariableError> {
        self.variables.set_type(name, var_type)?;
        self.revalidate_variable_nodes();
        Ok(())
    }

    /// Mark a variable constant or writable
    pub fn set_variable_constant(&mut self, name: &str, constant: bool) -> Result<(), VariableError> {
        self.variables.set_constant(name, constant)?;
        self.revalidate_variable_nodes();
        Ok(())
    }

    /// Write a variable's current value
    pub fn set_variable_value(&mut self, name: &str, value: PortValue) -> Result<(), VariableError> {
        self.variables.set_value(name, value)
    }

    /// Replace the whole table, e.g. after loading
    pub(crate) fn replace_variables(&mut self, variables: VariableTable) {
        self.variables = variables;
        self.revalidate_variable_nodes();
    }

    // ------------------------------------------------------------------
    // Queries and runs
    // ------------------------------------------------------------------

    /// Resolve an output port in a fresh pass
    pub fn resolve_output(&mut self, node_id: NodeId, port: &str) -> Result<PortValue, EvaluationError> {
        self.resolve_output_with(node_id, port, &ExecutionToken::new())
    }

    /// Resolve an output port in a fresh pass with host context
    pub fn resolve_output_with(
        &mut self,
        node_id: NodeId,
        port: &str,
        token: &ExecutionToken,
    ) -> Result<PortValue, EvaluationError> {
        let mut pass = Pass::new();
        self.resolve_in_pass(&mut pass, node_id, port, token)
    }

    /// Resolve an output port, sharing memoized values with earlier queries in `pass`
    pub fn resolve_in_pass(
        &mut self,
        pass: &mut Pass,
        node_id: NodeId,
        port: &str,
        token: &ExecutionToken,
    ) -> Result<PortValue, EvaluationError> {
        let result = Resolver::new(&self.nodes, &self.variables, token).resolve_named(pass, node_id, port);
        self.apply_errors(pass.take_errors());
        result
    }

    /// Read what an input port currently receives (for sink nodes without outputs)
    pub fn resolve_input(
        &mut self,
        node_id: NodeId,
        port: &str,
        token: &ExecutionToken,
    ) -> Result<PortValue, EvaluationError> {
        let mut pass = Pass::new();
        let result = {
            let node = self.node(node_id).ok_or(EvaluationError::NodeNotFound(node_id))?;
            let input = node.input(port).ok_or_else(|| EvaluationError::PortNotFound {
                node: node_id,
                port: port.to_string(),
            })?;
            Resolver::new(&self.nodes, &self.variables, token)
                .read_input(&mut pass, node, input)
                .map(|values| values.into_iter().next().unwrap_or_default())
        };
        self.apply_errors(pass.take_errors());
        result
    }

    /// Execute starting at `entry`
    pub fn run(&mut self, entry: NodeId, token: &mut ExecutionToken) -> Result<RunReport, ExecutionError> {
        let mut budget = RunBudget::new(&self.config);
        execution::run_flow(self, entry, token, &mut budget)
    }

    /// Execute starting at the graph's entry marker node
    pub fn run_from_entry(&mut self, token: &mut ExecutionToken) -> Result<RunReport, ExecutionError> {
        let entry = self.entry_node().ok_or(ExecutionError::NoEntryNode)?;
        self.run(entry, token)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

fn enable_slot(slot: &mut NodeSlot, env: &GraphEnv<'_>) {
    let Some(kind) = slot.kind.as_deref_mut() else {
        return;
    };
    slot.node.set_error(None);
    kind.on_enable(&mut slot.node, env);
    slot.node.mark_validated();
}

fn validate_slot(slot: &mut NodeSlot, env: &GraphEnv<'_>) {
    let Some(kind) = slot.kind.as_deref_mut() else {
        return;
    };
    slot.node.set_error(None);
    kind.on_validate(&mut slot.node, env);
    slot.node.mark_validated();
}

/// Error from a structural edit. Failed edits leave the graph unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Port not found
    #[error("Port `{port}` not found on node {node}")]
    PortNotFound {
        /// Node that was searched
        node: NodeId,
        /// Requested port name
        port: String,
    },

    /// A port with this name and direction already exists
    #[error("Duplicate {direction:?} port `{name}`")]
    DuplicatePort {
        /// Port name
        name: String,
        /// Port direction
        direction: PortDirection,
    },

    /// Two nodes share an ID
    #[error("Duplicate node ID: {0}")]
    DuplicateNode(NodeId),

    /// Both ports have the same direction
    #[error("Cannot connect two ports of the same direction")]
    SameDirection,

    /// Incompatible port types
    #[error("Type mismatch: {from} cannot flow into {to}")]
    TypeMismatch {
        /// Producer type
        from: PortType,
        /// Consumer type
        to: PortType,
    },

    /// Input port is already at capacity
    #[error("Port `{port}` is already at capacity")]
    CapacityExceeded {
        /// Input port name
        port: String,
    },

    /// Node is not of the requested kind
    #[error("Node {0} is not of the requested kind")]
    KindMismatch(NodeId),

    /// Node is executing and cannot be edited
    #[error("Node {0} is busy executing")]
    NodeBusy(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::compute::{FunctionNode, FunctionSignature, ResultNode};
    use crate::graphs::flow::LogNode;
    use crate::graphs::math::{MathNode, MathOp};
    use crate::graphs::variables::ConstantNode;
    use crate::node::NodeLifecycle;

    fn connection_lists(graph: &Graph, a: PortRef, b: PortRef) -> (Vec<PortRef>, Vec<PortRef>) {
        (
            graph.port(&a).unwrap().connections().to_vec(),
            graph.port(&b).unwrap().connections().to_vec(),
        )
    }

    #[test]
    fn test_connect_disconnect_round_trip() {
        let mut graph = Graph::new("Edges");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let two = graph.add(ConstantNode::new(PortValue::Float(2.0)));
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.connect(two, "Value", add, "B").unwrap();

        let from = graph.port_ref(one, PortDirection::Output, "Value").unwrap();
        let to = graph.port_ref(add, PortDirection::Input, "A").unwrap();
        let before = connection_lists(&graph, from, to);

        graph.connect(one, "Value", add, "A").unwrap();
        assert_eq!(graph.connection_count(), 2);
        assert!(graph.disconnect(one, "Value", add, "A").unwrap());
        assert_eq!(connection_lists(&graph, from, to), before);

        // Disconnecting again is a no-op
        assert!(!graph.disconnect(one, "Value", add, "A").unwrap());
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn test_single_capacity_input() {
        let mut graph = Graph::new("Capacity");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let two = graph.add(ConstantNode::new(PortValue::Float(2.0)));
        let add = graph.add(MathNode::new(MathOp::Add));

        graph.connect(one, "Value", add, "A").unwrap();
        // Reconnecting the same pair is idempotent
        graph.connect(one, "Value", add, "A").unwrap();
        assert_eq!(
            graph.connect(two, "Value", add, "A"),
            Err(GraphError::CapacityExceeded {
                port: "A".to_string()
            })
        );
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(graph.node(two).unwrap().output("Value").unwrap().connection_count(), 0);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut graph = Graph::new("Types");
        let text = graph.add(ConstantNode::new(PortValue::from("hello")));
        let add = graph.add(MathNode::new(MathOp::Add));
        let log = graph.add(LogNode);

        assert!(matches!(
            graph.connect(text, "Value", add, "A"),
            Err(GraphError::TypeMismatch { .. })
        ));
        // Exec never mixes with data
        assert!(matches!(
            graph.connect(log, "ExecOut", add, "A"),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert_eq!(graph.connection_count(), 0);
        assert!(graph.connect(text, "Value", log, "Message").is_ok());
    }

    #[test]
    fn test_output_fans_out_in_insertion_order() {
        let mut graph = Graph::new("Fan out");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let a = graph.add(MathNode::new(MathOp::Add));
        let b = graph.add(MathNode::new(MathOp::Add));
        graph.connect(one, "Value", b, "A").unwrap();
        graph.connect(one, "Value", a, "A").unwrap();

        let output = graph.node(one).unwrap().output("Value").unwrap();
        assert_eq!(output.connection_count(), 2);
        assert_eq!(output.first_connection().unwrap().node, b);
    }

    #[test]
    fn test_remove_node_severs_connections() {
        let mut graph = Graph::new("Remove");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.connect(one, "Value", add, "A").unwrap();

        let removed = graph.remove_node(one).unwrap();
        assert_eq!(removed.lifecycle(), NodeLifecycle::Unbound);
        assert_eq!(graph.connection_count(), 0);
        assert!(!graph.node(add).unwrap().input("A").unwrap().is_connected());
        assert!(graph.remove_node(one).is_none());
    }

    #[test]
    fn test_remove_port_severs_connections() {
        let mut graph = Graph::new("Ports");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.connect(one, "Value", add, "B").unwrap();

        let port = graph.remove_port(add, PortDirection::Input, "B").unwrap();
        assert!(!port.is_connected());
        assert_eq!(graph.connection_count(), 0);
        assert!(graph.node(add).unwrap().input("B").is_none());

        graph.add_port(add, Port::input("B", PortType::Float)).unwrap();
        assert!(graph.add_port(add, Port::input("B", PortType::Float)).is_err());
    }

    #[test]
    fn test_disconnect_all() {
        let mut graph = Graph::new("All");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let a = graph.add(MathNode::new(MathOp::Add));
        let b = graph.add(MathNode::new(MathOp::Add));
        graph.connect(one, "Value", a, "A").unwrap();
        graph.connect(one, "Value", b, "A").unwrap();

        assert_eq!(graph.disconnect_all(one, PortDirection::Output, "Value").unwrap(), 2);
        assert_eq!(graph.connection_count(), 0);
        assert!(!graph.node(b).unwrap().input("A").unwrap().is_connected());
    }

    #[test]
    fn test_connections_are_derived() {
        let mut graph = Graph::new("Derived");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.connect(one, "Value", add, "A").unwrap();

        let connections = graph.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].from_node, one);
        assert_eq!(connections[0].to_node, add);
        assert_eq!(graph.connections_for_node(add).len(), 1);
    }

    #[test]
    fn test_signature_reload_rebuilds_ports() {
        let mut graph = Graph::new("Signature");
        let int = graph.add(ConstantNode::new(PortValue::Int(2)));
        let text = graph.add(ConstantNode::new(PortValue::from("x")));
        let func = graph.add(FunctionNode::new(
            FunctionSignature::new("scale", PortType::Float)
                .arg("value", PortType::Float)
                .arg("label", PortType::String),
            |inputs| Ok(PortValue::Float(inputs.float("value") * 2.0)),
        ));
        let result = graph.add(ResultNode);
        graph.connect(int, "Value", func, "value").unwrap();
        graph.connect(text, "Value", func, "label").unwrap();
        graph.connect(func, "Retval", result, "Value").unwrap();
        assert_eq!(graph.resolve_output(result, "Result"), Ok(PortValue::Float(4.0)));

        // Drop `label`, narrow `value` to String
        graph
            .edit_node::<FunctionNode, _>(func, |f| {
                f.load_signature(
                    FunctionSignature::new("scale", PortType::Float).arg("value", PortType::String),
                );
            })
            .unwrap();

        let node = graph.node(func).unwrap();
        assert!(node.input("label").is_none());
        assert_eq!(node.input("value").unwrap().port_type, PortType::String);
        assert!(!node.input("value").unwrap().is_connected());
        assert!(node.output("Retval").unwrap().is_connected());
        assert!(!graph.node(text).unwrap().output("Value").unwrap().is_connected());
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn test_duplicate_copies_settings_not_connections() {
        let mut graph = Graph::new("Duplicate");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.set_input_default(add, "B", PortValue::Float(3.0)).unwrap();
        graph.connect(one, "Value", add, "A").unwrap();
        graph.set_node_name(add, "Offset").unwrap();

        let copy = graph.duplicate_node(add).unwrap();
        assert!(copy.warning.is_none());
        assert_ne!(copy.id, add);
        let node = graph.node(copy.id).unwrap();
        assert_eq!(node.name, "Offset");
        assert!(!node.input("A").unwrap().is_connected());
        assert_eq!(graph.resolve_output(copy.id, "Result"), Ok(PortValue::Float(3.0)));
    }

    #[test]
    fn test_set_input_default_type_checked() {
        let mut graph = Graph::new("Defaults");
        let add = graph.add(MathNode::new(MathOp::Add));
        assert!(graph.set_input_default(add, "A", PortValue::from("nope")).is_err());
        graph.set_input_default(add, "A", PortValue::Int(2)).unwrap();
        assert_eq!(
            graph.node(add).unwrap().input("A").unwrap().default_value,
            Some(PortValue::Float(2.0))
        );
    }

    #[test]
    fn test_find_nodes() {
        let mut graph = Graph::new("Find");
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.add(LogNode);
        let mul = graph.add(MathNode::new(MathOp::Multiply));

        assert_eq!(graph.find_node::<MathNode>(), Some(add));
        assert_eq!(graph.nodes_of::<MathNode>().count(), 2);
        assert_eq!(graph.nodes_of_type("multiply").collect::<Vec<_>>(), vec![mul]);
        assert_eq!(graph.nodes_with_tag("Math").count(), 2);
        assert!(graph.entry_node().is_none());
        assert_eq!(graph.kind::<MathNode>(mul).unwrap().op(), MathOp::Multiply);
        assert!(graph.kind::<LogNode>(mul).is_none());
    }

    #[test]
    fn test_nodes_enter_valid_state() {
        let mut graph = Graph::new("Lifecycle");
        let add = graph.add(MathNode::new(MathOp::Add));
        assert_eq!(graph.node(add).unwrap().lifecycle(), NodeLifecycle::Valid);

        let mut deferred = Graph::unloaded("Deferred");
        let add = deferred.add(MathNode::new(MathOp::Add));
        assert_eq!(deferred.node(add).unwrap().lifecycle(), NodeLifecycle::Enabled);
        deferred.enable();
        assert_eq!(deferred.node(add).unwrap().lifecycle(), NodeLifecycle::Valid);
    }

    #[test]
    fn test_clear() {
        let mut graph = Graph::new("Clear");
        let one = graph.add(ConstantNode::new(PortValue::Float(1.0)));
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.connect(one, "Value", add, "A").unwrap();
        graph.clear();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.connection_count(), 0);
    }
}
