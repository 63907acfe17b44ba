// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull-based value resolution.
//!
//! Asking for an output value collects the node's inputs by resolving each
//! upstream producer first, then runs the node's compute step. Results are
//! memoized per node in a [`Pass`], so a producer shared by several consumers,
//! or read through several of its outputs, runs once.

use crate::execution::ExecutionToken;
use crate::graph::NodeMap;
use crate::node::{Node, NodeError, NodeId};
use crate::port::{Port, PortDirection, PortRef, PortType, PortValue};
use crate::variable::VariableTable;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Capability of nodes that answer value queries
pub trait Valued {
    /// Compute this node's output values.
    ///
    /// Runs at most once per node in a [`Pass`], however many of its outputs
    /// are read. `outputs` are the node's output ports and `inputs` holds every
    /// declared data input, already resolved. Outputs left out of the result
    /// yield their default. Returning an error records it on the node and
    /// yields defaults for every output.
    fn request_values(
        &self,
        outputs: &[Port],
        inputs: &InputValues,
        env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError>;
}

/// Shared state visible to compute steps
#[derive(Clone, Copy)]
pub struct ValueEnv<'a> {
    /// The graph's variables
    pub variables: &'a VariableTable,
    /// Host context for the current query or run
    pub token: &'a ExecutionToken,
}

/// Resolved input values keyed by port name
#[derive(Debug, Clone, Default)]
pub struct InputValues {
    values: IndexMap<String, Vec<PortValue>>,
}

impl InputValues {
    /// Create an empty input set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the values for an input port
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<PortValue>) {
        self.values.insert(name.into(), values);
    }

    /// First value for a port
    pub fn get(&self, name: &str) -> Option<&PortValue> {
        self.values.get(name).and_then(|v| v.first())
    }

    /// Every value for a multi-connection port, in connection order
    pub fn get_all(&self, name: &str) -> &[PortValue] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value read as a float, or 0
    pub fn float(&self, name: &str) -> f32 {
        self.get(name).and_then(PortValue::as_float).unwrap_or(0.0)
    }

    /// First value read as a bool, or false
    pub fn bool(&self, name: &str) -> bool {
        self.get(name).and_then(PortValue::as_bool).unwrap_or(false)
    }

    /// Number of ports
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no inputs were collected
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Computed output values keyed by port name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputValues {
    values: IndexMap<String, PortValue>,
}

impl OutputValues {
    /// Create an empty output set
    pub fn new() -> Self {
        Self::default()
    }

    /// Output set holding a single port's value
    pub fn single(name: impl Into<String>, value: PortValue) -> Self {
        Self::new().with(name, value)
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: PortValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Set the value of an output port
    pub fn insert(&mut self, name: impl Into<String>, value: PortValue) {
        self.values.insert(name.into(), value);
    }

    /// Value of an output port
    pub fn get(&self, name: &str) -> Option<&PortValue> {
        self.values.get(name)
    }

    fn take(&mut self, name: &str) -> Option<PortValue> {
        self.values.shift_remove(name)
    }
}

/// Memoization scope for one top-level value query
#[derive(Debug, Default)]
pub struct Pass {
    values: HashMap<PortRef, PortValue>,
    in_progress: HashSet<NodeId>,
    errors: Vec<(NodeId, NodeError)>,
    computations: usize,
}

impl Pass {
    /// Start a fresh pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of compute steps run in this pass
    pub fn computations(&self) -> usize {
        self.computations
    }

    /// Cached value for an output port
    pub fn cached(&self, port: &PortRef) -> Option<&PortValue> {
        self.values.get(port)
    }

    pub(crate) fn record(&mut self, node: NodeId, error: NodeError) {
        self.errors.push((node, error));
    }

    pub(crate) fn take_errors(&mut self) -> Vec<(NodeId, NodeError)> {
        std::mem::take(&mut self.errors)
    }
}

/// Error that aborts a value query
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// Resolving a node required resolving itself
    #[error("Cyclic dependency through node {0}")]
    CyclicDependency(NodeId),

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

    /// Node cannot answer value queries
    #[error("Node {0} does not produce values")]
    NotValued(NodeId),
}

pub(crate) struct Resolver<'a> {
    nodes: &'a NodeMap,
    env: ValueEnv<'a>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(nodes: &'a NodeMap, variables: &'a VariableTable, token: &'a ExecutionToken) -> Self {
        Self {
            nodes,
            env: ValueEnv { variables, token },
        }
    }

    /// Resolve an output port by name, failing if the node is not valued
    pub(crate) fn resolve_named(
        &self,
        pass: &mut Pass,
        node_id: NodeId,
        port_name: &str,
    ) -> Result<PortValue, EvaluationError> {
        let slot = self
            .nodes
            .get(&node_id)
            .ok_or(EvaluationError::NodeNotFound(node_id))?;
        let port = slot
            .node
            .output(port_name)
            .ok_or_else(|| EvaluationError::PortNotFound {
                node: node_id,
                port: port_name.to_string(),
            })?;
        if slot.kind.as_deref().is_some_and(|k| k.as_valued().is_none()) {
            return Err(EvaluationError::NotValued(node_id));
        }
        self.resolve(pass, PortRef::new(node_id, port.id))
    }

    /// Resolve an output port, reusing the pass cache
    pub(crate) fn resolve(&self, pass: &mut Pass, source: PortRef) -> Result<PortValue, EvaluationError> {
        if let Some(value) = pass.cached(&source) {
            return Ok(value.clone());
        }

        let slot = self
            .nodes
            .get(&source.node)
            .ok_or(EvaluationError::NodeNotFound(source.node))?;
        let node = &slot.node;
        let port = node
            .port_by_id(source.port)
            .filter(|p| p.direction == PortDirection::Output)
            .ok_or_else(|| EvaluationError::PortNotFound {
                node: source.node,
                port: format!("{:?}", source.port),
            })?;

        // A detached kind is the node currently executing
        let Some(kind) = slot.kind.as_deref() else {
            tracing::warn!("[{}] requested its own output while executing", node.name);
            return Err(EvaluationError::CyclicDependency(source.node));
        };
        let Some(valued) = kind.as_valued() else {
            tracing::debug!("[{}] is not valued; `{}` yields a default", node.name, port.name);
            return Ok(PortValue::default_for(&port.port_type));
        };

        if !pass.in_progress.insert(source.node) {
            tracing::warn!("[{}] depends on its own output `{}`", node.name, port.name);
            return Err(EvaluationError::CyclicDependency(source.node));
        }

        let result = self.collect_inputs(pass, node).map(|inputs| {
            pass.computations += 1;
            let computed = valued.request_values(node.outputs(), &inputs, &self.env);
            let mut computed = computed.unwrap_or_else(|e| {
                pass.record(source.node, e);
                OutputValues::new()
            });
            for output in node.outputs() {
                let value = computed.take(&output.name).unwrap_or_else(|| output.fallback_value());
                pass.values.insert(PortRef::new(source.node, output.id), value);
            }
        });
        pass.in_progress.remove(&source.node);
        result?;

        pass.values
            .get(&source)
            .cloned()
            .ok_or_else(|| EvaluationError::PortNotFound {
                node: source.node,
                port: port.name.clone(),
            })
    }

    /// Resolve every data input of `node`
    fn collect_inputs(&self, pass: &mut Pass, node: &Node) -> Result<InputValues, EvaluationError> {
        let mut inputs = InputValues::new();
        for port in node.inputs() {
            if port.port_type == PortType::Exec {
                continue;
            }
            let values = self.read_input(pass, node, port)?;
            inputs.insert(port.name.clone(), values);
        }
        Ok(inputs)
    }

    /// Resolve one input port of `consumer`.
    ///
    /// Unconnected inputs yield their default. Values that do not fit the
    /// port's type are recorded on the consumer and replaced by the default.
    pub(crate) fn read_input(
        &self,
        pass: &mut Pass,
        consumer: &Node,
        port: &Port,
    ) -> Result<Vec<PortValue>, EvaluationError> {
        if !port.is_connected() {
            return Ok(vec![port.fallback_value()]);
        }

        let mut values = Vec::with_capacity(port.connection_count());
        for upstream in port.connections() {
            let value = self.resolve(pass, *upstream)?;
            if value == PortValue::None {
                values.push(port.fallback_value());
                continue;
            }
            match value.cast_to(&port.port_type) {
                Some(cast) => values.push(cast),
                None => {
                    pass.record(
                        consumer.id,
                        NodeError::TypeMismatch {
                            expected: port.port_type.clone(),
                            found: value.port_type(),
                        },
                    );
                    values.push(port.fallback_value());
                }
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::graphs::compute::ResultNode;
    use crate::graphs::math::{MathNode, MathOp};
    use crate::graphs::variables::ConstantNode;
    use crate::node::NodeLifecycle;
    use crate::testing::{counting_pair, counting_source};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_diamond_computes_shared_producer_once() {
        let mut graph = Graph::new("Diamond");
        let (source, calls) = counting_source(2.0);
        let source = graph.add(source);
        let left = graph.add(MathNode::new(MathOp::Add));
        let right = graph.add(MathNode::new(MathOp::Multiply));
        let sink = graph.add(MathNode::new(MathOp::Add));

        graph.connect(source, "Value", left, "A").unwrap();
        graph.connect(source, "Value", left, "B").unwrap();
        graph.connect(source, "Value", right, "A").unwrap();
        graph.connect(source, "Value", right, "B").unwrap();
        graph.connect(left, "Result", sink, "A").unwrap();
        graph.connect(right, "Result", sink, "B").unwrap();

        // (2 + 2) + (2 * 2)
        assert_eq!(graph.resolve_output(sink, "Result"), Ok(PortValue::Float(8.0)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A new query is a new pass
        graph.resolve_output(sink, "Result").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_multi_output_producer_computes_once() {
        let mut graph = Graph::new("Pair");
        let (pair, calls) = counting_pair(3.0);
        let pair = graph.add(pair);
        let sum = graph.add(MathNode::new(MathOp::Add));
        graph.connect(pair, "X", sum, "A").unwrap();
        graph.connect(pair, "Y", sum, "B").unwrap();

        assert_eq!(graph.resolve_output(sum, "Result"), Ok(PortValue::Float(9.0)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let token = ExecutionToken::new();
        let mut pass = Pass::new();
        graph.resolve_in_pass(&mut pass, pair, "X", &token).unwrap();
        assert_eq!(graph.resolve_in_pass(&mut pass, pair, "Y", &token), Ok(PortValue::Float(6.0)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pass.computations(), 1);
    }

    #[test]
    fn test_shared_pass_reuses_values_across_queries() {
        let mut graph = Graph::new("Shared");
        let (source, calls) = counting_source(1.0);
        let source = graph.add(source);
        let a = graph.add(MathNode::new(MathOp::Add));
        let b = graph.add(MathNode::new(MathOp::Add));
        graph.connect(source, "Value", a, "A").unwrap();
        graph.connect(source, "Value", b, "A").unwrap();

        let token = ExecutionToken::new();
        let mut pass = Pass::new();
        graph.resolve_in_pass(&mut pass, a, "Result", &token).unwrap();
        graph.resolve_in_pass(&mut pass, b, "Result", &token).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pass.computations(), 3);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = Graph::new("Cycle");
        let a = graph.add(MathNode::new(MathOp::Add));
        let b = graph.add(MathNode::new(MathOp::Add));
        graph.connect(a, "Result", b, "A").unwrap();
        graph.connect(b, "Result", a, "A").unwrap();

        assert_eq!(
            graph.resolve_output(a, "Result"),
            Err(EvaluationError::CyclicDependency(a))
        );
        // Nothing persistent was touched
        assert_eq!(graph.connection_count(), 2);
    }

    #[test]
    fn test_unconnected_inputs_use_defaults() {
        let mut graph = Graph::new("Defaults");
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.set_input_default(add, "B", PortValue::Float(1.5)).unwrap();
        assert_eq!(graph.resolve_output(add, "Result"), Ok(PortValue::Float(1.5)));
    }

    #[test]
    fn test_int_widens_into_float_input() {
        let mut graph = Graph::new("Widen");
        let three = graph.add(ConstantNode::new(PortValue::Int(3)));
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.connect(three, "Value", add, "A").unwrap();
        assert_eq!(graph.resolve_output(add, "Result"), Ok(PortValue::Float(3.0)));
    }

    #[test]
    fn test_mismatch_surfaces_on_consumer() {
        let mut graph = Graph::new("Mismatch");
        let text = graph.add(ConstantNode::new(PortValue::from("tall")));
        let passthrough = graph.add(ResultNode);
        let add = graph.add(MathNode::new(MathOp::Add));
        graph.connect(text, "Value", passthrough, "Value").unwrap();
        // Any -> Float is accepted at connect time and checked on read
        graph.connect(passthrough, "Result", add, "A").unwrap();

        assert_eq!(graph.resolve_output(add, "Result"), Ok(PortValue::Float(0.0)));
        let node = graph.node(add).unwrap();
        assert!(matches!(node.error(), Some(NodeError::TypeMismatch { .. })));
        assert_eq!(node.lifecycle(), NodeLifecycle::Invalid);
        assert!(graph.node(passthrough).unwrap().is_valid());
    }

    #[test]
    fn test_unknown_port() {
        let mut graph = Graph::new("Ports");
        let add = graph.add(MathNode::new(MathOp::Add));
        assert!(matches!(
            graph.resolve_output(add, "Nope"),
            Err(EvaluationError::PortNotFound { .. })
        ));
    }
}
