// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nodes that own and run a nested graph.

use crate::execution::{exec_in, exec_out, Executable, ExecutionContext, ExecutionError, EXEC_OUT};
use crate::graph::Graph;
use crate::node::{Node, NodeCategory, NodeError, NodeId, NodeKind, NodeRegistry, NodeType};
use crate::port::Port;

const DUPLICATE_WARNING: &str =
    "Duplicating a subgraph node will not duplicate the subgraph. The new node will have a default graph";

/// Create the subgraph node registry
pub fn create_subgraph_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(NodeType {
        id: "subgraph".to_string(),
        name: "Subgraph".to_string(),
        category: NodeCategory::Logic,
        description: "Run a nested graph".to_string(),
        factory: || Box::new(SubgraphNode::new()),
    });

    registry
}

/// Executable node owning a nested graph.
///
/// The nested graph is created when the node joins a graph and dropped when it
/// leaves. Runs share the caller's token, step budget and depth limit.
#[derive(Debug, Default)]
pub struct SubgraphNode {
    subgraph: Option<Graph>,
}

impl SubgraphNode {
    /// Create a node; its nested graph is created on insertion
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node around an already built nested graph
    pub fn with_graph(graph: Graph) -> Self {
        Self { subgraph: Some(graph) }
    }

    /// Take the nested graph out, leaving the node without one
    pub fn detach_subgraph(&mut self) -> Option<Graph> {
        self.subgraph.take()
    }
}

impl NodeKind for SubgraphNode {
    fn kind_id(&self) -> &'static str {
        "subgraph"
    }

    fn display_name(&self) -> String {
        "Subgraph".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Flow", "Subgraph"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![exec_in(), exec_out()]
    }

    fn on_added(&mut self, node: &mut Node) {
        if self.subgraph.is_none() {
            tracing::debug!("[{}] creating nested graph", node.name);
            self.subgraph = Some(Graph::new(node.id.to_string()));
        }
    }

    fn on_removed(&mut self, node: &mut Node) {
        if self.subgraph.take().is_some() {
            tracing::debug!("[{}] dropped nested graph", node.name);
        }
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn as_executable_mut(&mut self) -> Option<&mut dyn Executable> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(Self::new())
    }

    fn duplicate_warning(&self) -> Option<&'static str> {
        Some(DUPLICATE_WARNING)
    }

    fn subgraph(&self) -> Option<&Graph> {
        self.subgraph.as_ref()
    }

    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        self.subgraph.as_mut()
    }
}

impl Executable for SubgraphNode {
    fn execute(&mut self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeId>, ExecutionError> {
        match self.subgraph.as_mut() {
            None => cx.report(NodeError::MissingSubgraph),
            Some(graph) => match graph.entry_node() {
                None => cx.report(NodeError::MissingEntryPoint),
                Some(entry) => cx.run_subgraph(graph, entry)?,
            },
        }
        Ok(cx.next(EXEC_OUT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::execution::{ExecutionToken, EXEC_IN};
    use crate::graphs::flow::{EntryNode, LogNode};
    use crate::port::PortValue;
    use crate::testing::StepCounter;
    use std::sync::atomic::Ordering;

    fn nested(graph: &mut Graph, node: NodeId) -> &mut Graph {
        graph
            .kind_mut::<SubgraphNode>(node)
            .and_then(SubgraphNode::subgraph_mut)
            .unwrap()
    }

    #[test]
    fn test_runs_nested_graph_then_continues() {
        let mut graph = Graph::new("Outer");
        let entry = graph.add(EntryNode);
        let sub = graph.add(SubgraphNode::new());
        let (after, after_calls) = StepCounter::new();
        let after = graph.add(after);
        graph.connect(entry, EXEC_OUT, sub, EXEC_IN).unwrap();
        graph.connect(sub, EXEC_OUT, after, EXEC_IN).unwrap();

        let (inner, inner_calls) = StepCounter::new();
        {
            let inner_graph = nested(&mut graph, sub);
            let inner_entry = inner_graph.add(EntryNode);
            let inner = inner_graph.add(inner);
            inner_graph.connect(inner_entry, EXEC_OUT, inner, EXEC_IN).unwrap();
        }

        let mut token = ExecutionToken::new().with("visited", false);
        let report = graph.run(entry, &mut token).unwrap();
        assert_eq!(inner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.steps, 5);
        assert_eq!(token.get("visited"), Some(&PortValue::Bool(false)));
        assert!(graph.node(sub).unwrap().is_valid());
    }

    #[test]
    fn test_missing_entry_forwards() {
        let mut graph = Graph::new("Outer");
        let entry = graph.add(EntryNode);
        let sub = graph.add(SubgraphNode::new());
        let (after, calls) = StepCounter::new();
        let after = graph.add(after);
        graph.connect(entry, EXEC_OUT, sub, EXEC_IN).unwrap();
        graph.connect(sub, EXEC_OUT, after, EXEC_IN).unwrap();
        nested(&mut graph, sub).add(LogNode);

        graph.run(entry, &mut ExecutionToken::new()).unwrap();
        assert_eq!(graph.node(sub).unwrap().error(), Some(&NodeError::MissingEntryPoint));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_subgraph_forwards() {
        let mut graph = Graph::new("Outer");
        let entry = graph.add(EntryNode);
        let sub = graph.add(SubgraphNode::new());
        let log = graph.add(LogNode);
        graph.connect(entry, EXEC_OUT, sub, EXEC_IN).unwrap();
        graph.connect(sub, EXEC_OUT, log, EXEC_IN).unwrap();
        graph.kind_mut::<SubgraphNode>(sub).unwrap().detach_subgraph();

        let report = graph.run(entry, &mut ExecutionToken::new()).unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(graph.node(sub).unwrap().error(), Some(&NodeError::MissingSubgraph));
    }

    #[test]
    fn test_duplicate_gets_fresh_graph_and_warning() {
        let mut graph = Graph::new("Outer");
        let sub = graph.add(SubgraphNode::new());
        nested(&mut graph, sub).add(EntryNode);

        let copy = graph.duplicate_node(sub).unwrap();
        assert_eq!(copy.warning.as_deref(), Some(DUPLICATE_WARNING));
        assert_eq!(nested(&mut graph, copy.id).node_count(), 0);
        assert_eq!(nested(&mut graph, sub).node_count(), 1);
    }

    #[test]
    fn test_removal_drops_nested_graph() {
        let mut graph = Graph::new("Outer");
        let sub = graph.add(SubgraphNode::new());
        assert!(graph.kind::<SubgraphNode>(sub).unwrap().subgraph().is_some());
        graph.remove_node(sub).unwrap();
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_depth_limit() {
        let mut graph = Graph::new("Outer").with_config(EngineConfig {
            max_subgraph_depth: 1,
            ..EngineConfig::default()
        });
        let entry = graph.add(EntryNode);
        let sub = graph.add(SubgraphNode::new());
        graph.connect(entry, EXEC_OUT, sub, EXEC_IN).unwrap();
        {
            let middle = nested(&mut graph, sub);
            let middle_entry = middle.add(EntryNode);
            let deeper = middle.add(SubgraphNode::new());
            middle.connect(middle_entry, EXEC_OUT, deeper, EXEC_IN).unwrap();
            let innermost = nested(middle, deeper);
            innermost.add(EntryNode);
        }

        assert_eq!(
            graph.run(entry, &mut ExecutionToken::new()),
            Err(ExecutionError::SubgraphDepthExceeded { depth: 1 })
        );
    }

    #[test]
    fn test_nested_runs_share_step_budget() {
        let mut graph = Graph::new("Outer").with_config(EngineConfig {
            max_iterations: 20,
            ..EngineConfig::default()
        });
        let entry = graph.add(EntryNode);
        let sub = graph.add(SubgraphNode::new());
        graph.connect(entry, EXEC_OUT, sub, EXEC_IN).unwrap();
        let inner_calls = {
            let inner = nested(&mut graph, sub);
            let inner_entry = inner.add(EntryNode);
            let (looping, calls) = StepCounter::new();
            let looping = inner.add(looping);
            inner.connect(inner_entry, EXEC_OUT, looping, EXEC_IN).unwrap();
            inner.connect(looping, EXEC_OUT, looping, EXEC_IN).unwrap();
            calls
        };

        assert_eq!(
            graph.run(entry, &mut ExecutionToken::new()),
            Err(ExecutionError::RunawayExecution { limit: 20 })
        );
        // Outer entry, subgraph node and inner entry use three of the twenty steps
        assert_eq!(inner_calls.load(Ordering::SeqCst), 17);
    }
}
