// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) definitions for the graph.
//!
//! Edges are not stored on their own; ports own their connection lists and the
//! graph derives [`Connection`] views from the output side.

use crate::node::NodeId;
use crate::port::{PortId, PortRef};
use serde::{Deserialize, Serialize};

/// A connection between two ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Source node ID
    pub from_node: NodeId,
    /// Source (output) port ID
    pub from_port: PortId,
    /// Target node ID
    pub to_node: NodeId,
    /// Target (input) port ID
    pub to_port: PortId,
}

impl Connection {
    /// Create a new connection
    pub fn new(from: PortRef, to: PortRef) -> Self {
        Self {
            from_node: from.node,
            from_port: from.port,
            to_node: to.node,
            to_port: to.port,
        }
    }

    /// Output side of the edge
    pub fn from(&self) -> PortRef {
        PortRef::new(self.from_node, self.from_port)
    }

    /// Input side of the edge
    pub fn to(&self) -> PortRef {
        PortRef::new(self.to_node, self.to_port)
    }

    /// Check if this connection involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.from_node == node_id || self.to_node == node_id
    }

    /// Check if this connection involves a specific port
    pub fn involves_port(&self, port_id: PortId) -> bool {
        self.from_port == port_id || self.to_port == port_id
    }
}
