// SPDX-License-Identifier: MIT OR Apache-2.0
//! Push-based execution flow.
//!
//! A run starts at an executable node, calls its execute step, and follows the
//! node it names next until nothing is returned. Each step resolves its data
//! inputs in a fresh [`Pass`].

use crate::config::EngineConfig;
use crate::evaluation::{EvaluationError, Pass, Resolver};
use crate::graph::{Graph, NodeMap};
use crate::node::{Node, NodeError, NodeId};
use crate::port::{Port, PortCapacity, PortType, PortValue};
use crate::variable::{VariableError, VariableTable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Name of the execution-in port on executable nodes
pub const EXEC_IN: &str = "ExecIn";
/// Name of the default execution-out port on executable nodes
pub const EXEC_OUT: &str = "ExecOut";

/// Standard execution input port
pub fn exec_in() -> Port {
    Port::input(EXEC_IN, PortType::Exec).with_capacity(PortCapacity::Multiple)
}

/// Standard execution output port
pub fn exec_out() -> Port {
    exec_port(EXEC_OUT)
}

/// Named execution output port, e.g. the arms of a branch
pub fn exec_port(name: &str) -> Port {
    Port::output(name, PortType::Exec)
}

/// Host context threaded unchanged through a run.
///
/// The engine never interprets it; nodes read and write its blackboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionToken {
    blackboard: IndexMap<String, PortValue>,
}

impl ExecutionToken {
    /// Create an empty token
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PortValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Store a value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PortValue>) {
        self.blackboard.insert(key.into(), value.into());
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Option<&PortValue> {
        self.blackboard.get(key)
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<PortValue> {
        self.blackboard.shift_remove(key)
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.blackboard.contains_key(key)
    }
}

/// Capability of nodes that take part in execution flow
pub trait Executable {
    /// Perform this node's step and name the node to run next.
    ///
    /// Node-local problems go through [`ExecutionContext::report`] and should not
    /// stop the run; returned errors abort it.
    fn execute(&mut self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeId>, ExecutionError>;
}

/// Non-fatal problem observed during a run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionWarning {
    /// Node that raised the warning
    pub node: NodeId,
    /// Message
    pub message: String,
}

/// Summary of a completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Execute steps, including those of nested graphs
    pub steps: usize,
    /// Warnings in the order they were raised
    pub warnings: Vec<ExecutionWarning>,
}

/// Error that aborts a run
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Step budget exhausted, most likely an exec loop
    #[error("Potential infinite loop detected: stopped after {limit} steps")]
    RunawayExecution {
        /// Configured step limit
        limit: usize,
    },

    /// Subgraphs nested deeper than allowed
    #[error("Subgraph nesting exceeded depth {depth}")]
    SubgraphDepthExceeded {
        /// Configured depth limit
        depth: usize,
    },

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Start node cannot execute
    #[error("Node {0} is not executable")]
    NotExecutable(NodeId),

    /// Graph has no entry node
    #[error("No entry point node found")]
    NoEntryNode,

    /// A value query aborted
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Step and depth limits shared by a run and every nested run it starts
#[derive(Debug, Clone)]
pub(crate) struct RunBudget {
    steps: usize,
    max_steps: usize,
    depth: usize,
    max_depth: usize,
}

impl RunBudget {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            steps: 0,
            max_steps: config.max_iterations,
            depth: 0,
            max_depth: config.max_subgraph_depth,
        }
    }
}

/// What an executing node can see and do
pub struct ExecutionContext<'a> {
    nodes: &'a NodeMap,
    node: &'a Node,
    variables: &'a mut VariableTable,
    token: &'a mut ExecutionToken,
    budget: &'a mut RunBudget,
    pass: Pass,
    warnings: Vec<ExecutionWarning>,
}

impl<'a> ExecutionContext<'a> {
    fn new(
        nodes: &'a NodeMap,
        node: &'a Node,
        variables: &'a mut VariableTable,
        token: &'a mut ExecutionToken,
        budget: &'a mut RunBudget,
    ) -> Self {
        Self {
            nodes,
            node,
            variables,
            token,
            budget,
            pass: Pass::new(),
            warnings: Vec::new(),
        }
    }

    /// The executing node's header
    pub fn node(&self) -> &Node {
        self.node
    }

    /// Host context
    pub fn token(&self) -> &ExecutionToken {
        self.token
    }

    /// Mutable host context
    pub fn token_mut(&mut self) -> &mut ExecutionToken {
        self.token
    }

    /// The graph's variables
    pub fn variables(&self) -> &VariableTable {
        self.variables
    }

    /// Write a variable's current value.
    ///
    /// Only values change during a run; the table's structure stays as
    /// validated.
    pub fn set_variable_value(&mut self, name: &str, value: PortValue) -> Result<(), VariableError> {
        self.variables.set_value(name, value)
    }

    /// Resolve a data input of the executing node
    pub fn input(&mut self, name: &str) -> Result<PortValue, ExecutionError> {
        let port = self.node.input(name).ok_or_else(|| EvaluationError::PortNotFound {
            node: self.node.id,
            port: name.to_string(),
        })?;
        let values = Resolver::new(self.nodes, self.variables, self.token).read_input(&mut self.pass, self.node, port)?;
        Ok(values.into_iter().next().unwrap_or_default())
    }

    /// Record a node-local error on the executing node
    pub fn report(&mut self, error: NodeError) {
        self.pass.record(self.node.id, error);
    }

    /// Surface a non-fatal warning
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.node.name, message);
        self.warnings.push(ExecutionWarning {
            node: self.node.id,
            message,
        });
    }

    /// Node connected to an execution output, if it can execute.
    ///
    /// Only the first connection is followed. A connected node without the
    /// execution capability raises a warning and ends the flow.
    pub fn next(&mut self, port_name: &str) -> Option<NodeId> {
        let target = self.node.output(port_name)?.first_connection()?;
        if target.node == self.node.id {
            return Some(target.node);
        }
        let executable = self
            .nodes
            .get(&target.node)
            .and_then(|s| s.kind.as_deref())
            .is_some_and(|k| k.is_executable());
        if executable {
            return Some(target.node);
        }
        let name = self
            .nodes
            .get(&target.node)
            .map(|s| s.node.name.clone())
            .unwrap_or_default();
        self.warn(format!(
            "Connected node {} on port {} is not executable. Cannot execute past this point.",
            name, port_name
        ));
        None
    }

    /// Run a nested graph from `entry` with this run's token and budget
    pub fn run_subgraph(&mut self, graph: &mut Graph, entry: NodeId) -> Result<(), ExecutionError> {
        if self.budget.depth >= self.budget.max_depth {
            tracing::warn!("[{}] subgraph nesting limit reached", self.node.name);
            return Err(ExecutionError::SubgraphDepthExceeded {
                depth: self.budget.max_depth,
            });
        }
        self.budget.depth += 1;
        let result = run_flow(graph, entry, self.token, self.budget);
        self.budget.depth -= 1;
        self.warnings.extend(result?.warnings);
        Ok(())
    }

    fn finish(mut self) -> (Vec<(NodeId, NodeError)>, Vec<ExecutionWarning>) {
        (self.pass.take_errors(), self.warnings)
    }
}

/// Drive execution from `entry` until a node returns no successor
pub(crate) fn run_flow(
    graph: &mut Graph,
    entry: NodeId,
    token: &mut ExecutionToken,
    budget: &mut RunBudget,
) -> Result<RunReport, ExecutionError> {
    let start = graph
        .nodes
        .get(&entry)
        .ok_or(ExecutionError::NodeNotFound(entry))?;
    if !start.kind.as_deref().is_some_and(|k| k.is_executable()) {
        return Err(ExecutionError::NotExecutable(entry));
    }
    tracing::debug!("Running {} from {}", graph.name, start.node.name);

    let first_step = budget.steps;
    let mut report = RunReport::default();
    let mut current = Some(entry);
    while let Some(node_id) = current {
        if budget.steps >= budget.max_steps {
            tracing::warn!("Potential infinite loop detected in {}. Stopping early.", graph.name);
            return Err(ExecutionError::RunawayExecution {
                limit: budget.max_steps,
            });
        }
        budget.steps += 1;
        current = step(graph, node_id, token, budget, &mut report)?;
    }
    report.steps = budget.steps - first_step;
    Ok(report)
}

/// Execute one node with its kind detached from the graph
fn step(
    graph: &mut Graph,
    node_id: NodeId,
    token: &mut ExecutionToken,
    budget: &mut RunBudget,
    report: &mut RunReport,
) -> Result<Option<NodeId>, ExecutionError> {
    let mut kind = graph
        .detach_kind(node_id)
        .ok_or(ExecutionError::NodeNotFound(node_id))?;

    let (outcome, errors, warnings) = {
        let nodes = &graph.nodes;
        let variables = &mut graph.variables;
        match nodes.get(&node_id) {
            Some(slot) => {
                tracing::trace!("Executing {}", slot.node.name);
                let mut cx = ExecutionContext::new(nodes, &slot.node, variables, token, budget);
                let outcome = match kind.as_executable_mut() {
                    Some(executable) => executable.execute(&mut cx),
                    None => {
                        cx.warn("Node is not executable");
                        Ok(None)
                    }
                };
                let (errors, warnings) = cx.finish();
                (outcome, errors, warnings)
            }
            None => (Err(ExecutionError::NodeNotFound(node_id)), Vec::new(), Vec::new()),
        }
    };

    graph.attach_kind(node_id, kind);
    graph.apply_errors(errors);
    report.warnings.extend(warnings);
    outcome
}
