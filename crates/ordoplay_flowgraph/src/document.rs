// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistence of graphs as RON documents.
//!
//! A document is the neutral form of a graph: nodes by kind ID with their
//! settings, connections by port name, and the variable table. Loading goes
//! through a [`NodeRegistry`] and fires the enable hooks once every connection
//! is in place.

use crate::config::EngineConfig;
use crate::graph::{Graph, GraphError};
use crate::node::{NodeId, NodeRegistry};
use crate::port::PortValue;
use crate::variable::VariableTable;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error loading or saving a document
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// No registered node type with this ID
    #[error("Unknown node type `{0}`")]
    UnknownNodeType(String),

    /// Kind settings could not be applied
    #[error("Invalid settings for node {node}: {message}")]
    InvalidSettings {
        /// Node being loaded
        node: NodeId,
        /// Reason
        message: String,
    },

    /// Recorded structure was rejected
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Malformed RON text
    #[error(transparent)]
    Parse(#[from] ron::error::SpannedError),

    /// RON serialization failed
    #[error(transparent)]
    Serialize(#[from] ron::Error),

    /// File access failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Saved node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node ID
    pub id: NodeId,
    /// Registry ID of the kind
    pub node_type: String,
    /// Display name
    pub name: String,
    /// Kind-specific settings
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Inline values of input ports
    #[serde(default)]
    pub defaults: IndexMap<String, PortValue>,
    /// Nested graph of subgraph nodes
    #[serde(default)]
    pub subgraph: Option<Box<GraphDocument>>,
}

/// Saved connection between an output and an input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Producer node
    pub from_node: NodeId,
    /// Output port name
    pub from_port: String,
    /// Consumer node
    pub to_node: NodeId,
    /// Input port name
    pub to_port: String,
}

/// Saved graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Graph name
    pub name: String,
    /// Engine limits
    #[serde(default)]
    pub config: EngineConfig,
    /// Variables with their current values
    #[serde(default)]
    pub variables: VariableTable,
    /// Nodes in graph order
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    /// Connections in output order
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

impl GraphDocument {
    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_ron(&contents)?)
    }
}

impl Graph {
    /// Capture the graph as a document
    pub fn to_document(&self) -> GraphDocument {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, slot)| {
                let kind = slot.kind.as_deref();
                NodeRecord {
                    id: *id,
                    node_type: slot.node.node_type.clone(),
                    name: slot.node.name.clone(),
                    settings: kind.map(|k| k.save()).unwrap_or_default(),
                    defaults: slot
                        .node
                        .inputs()
                        .iter()
                        .filter_map(|p| p.default_value.clone().map(|v| (p.name.clone(), v)))
                        .collect(),
                    subgraph: kind
                        .and_then(|k| k.subgraph())
                        .map(|g| Box::new(g.to_document())),
                }
            })
            .collect();

        let connections = self
            .connections()
            .into_iter()
            .filter_map(|c| {
                Some(ConnectionRecord {
                    from_node: c.from_node,
                    from_port: self.port(&c.from())?.name.clone(),
                    to_node: c.to_node,
                    to_port: self.port(&c.to())?.name.clone(),
                })
            })
            .collect();

        GraphDocument {
            name: self.name.clone(),
            config: self.config().clone(),
            variables: self.variables.clone(),
            nodes,
            connections,
        }
    }

    /// Rebuild a graph from a document, instantiating kinds through `registry`
    pub fn from_document(doc: &GraphDocument, registry: &NodeRegistry) -> Result<Self, DocumentError> {
        let mut graph = Graph::unloaded(doc.name.clone()).with_config(doc.config.clone());
        graph.replace_variables(doc.variables.clone());

        for record in &doc.nodes {
            if graph.contains_node(record.id) {
                return Err(GraphError::DuplicateNode(record.id).into());
            }
            let mut kind = registry
                .create(&record.node_type)
                .ok_or_else(|| DocumentError::UnknownNodeType(record.node_type.clone()))?;
            kind.load(&record.settings)
                .map_err(|e| DocumentError::InvalidSettings {
                    node: record.id,
                    message: e.to_string(),
                })?;

            graph.insert_node(record.id, kind);
            graph.set_node_name(record.id, record.name.clone())?;
            for (port, value) in &record.defaults {
                graph.set_input_default(record.id, port, value.clone())?;
            }

            if let Some(nested_doc) = &record.subgraph {
                let nested = Graph::from_document(nested_doc, registry)?;
                if let Some(slot) = graph.kind_subgraph_mut(record.id) {
                    *slot = nested;
                }
            }
        }

        for c in &doc.connections {
            graph.connect(c.from_node, &c.from_port, c.to_node, &c.to_port)?;
        }

        graph.enable();
        tracing::debug!("Loaded graph {} ({} nodes)", graph.name, graph.node_count());
        Ok(graph)
    }

    fn kind_subgraph_mut(&mut self, node_id: NodeId) -> Option<&mut Graph> {
        self.nodes.get_mut(&node_id)?.kind.as_deref_mut()?.subgraph_mut()
    }
}
