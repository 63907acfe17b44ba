// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution flow nodes (Blueprint-like).

use crate::execution::{exec_in, exec_out, exec_port, Executable, ExecutionContext, ExecutionError, EXEC_OUT};
use crate::node::{NodeCategory, NodeId, NodeKind, NodeRegistry, NodeType};
use crate::port::{Port, PortType, PortValue};

/// Create the flow control node registry
pub fn create_flow_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(NodeType {
        id: "entry".to_string(),
        name: "Entry".to_string(),
        category: NodeCategory::Input,
        description: "Where execution of the graph starts".to_string(),
        factory: || Box::new(EntryNode),
    });

    registry.register(NodeType {
        id: "branch".to_string(),
        name: "Branch".to_string(),
        category: NodeCategory::Logic,
        description: "If/else branching".to_string(),
        factory: || Box::new(BranchNode),
    });

    registry.register(NodeType {
        id: "log".to_string(),
        name: "Log".to_string(),
        category: NodeCategory::Utility,
        description: "Log a value".to_string(),
        factory: || Box::new(LogNode),
    });

    registry
}

/// Marker node where a run starts
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryNode;

impl NodeKind for EntryNode {
    fn kind_id(&self) -> &'static str {
        "entry"
    }

    fn display_name(&self) -> String {
        "Entry".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Flow"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![exec_out()]
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn as_executable_mut(&mut self) -> Option<&mut dyn Executable> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

impl Executable for EntryNode {
    fn execute(&mut self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeId>, ExecutionError> {
        Ok(cx.next(EXEC_OUT))
    }
}

/// Continue on `True` or `False` depending on the condition input
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchNode;

impl NodeKind for BranchNode {
    fn kind_id(&self) -> &'static str {
        "branch"
    }

    fn display_name(&self) -> String {
        "Branch".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Flow"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![
            exec_in(),
            Port::input("Condition", PortType::Bool).with_default(PortValue::Bool(false)),
            exec_port("True"),
            exec_port("False"),
        ]
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn as_executable_mut(&mut self) -> Option<&mut dyn Executable> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

impl Executable for BranchNode {
    fn execute(&mut self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeId>, ExecutionError> {
        let condition = cx.input("Condition")?.as_bool().unwrap_or(false);
        Ok(cx.next(if condition { "True" } else { "False" }))
    }
}

/// Log the message input and continue
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNode;

impl NodeKind for LogNode {
    fn kind_id(&self) -> &'static str {
        "log"
    }

    fn display_name(&self) -> String {
        "Log".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Flow", "Debug"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![exec_in(), Port::input("Message", PortType::Any), exec_out()]
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn as_executable_mut(&mut self) -> Option<&mut dyn Executable> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

impl Executable for LogNode {
    fn execute(&mut self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeId>, ExecutionError> {
        let message = cx.input("Message")?;
        match message.as_str() {
            Some(text) => tracing::info!("[{}] {}", cx.node().name, text),
            None => tracing::info!("[{}] {:?}", cx.node().name, message),
        }
        Ok(cx.next(EXEC_OUT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_registry() {
        let registry = create_flow_registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.create("entry").unwrap().is_executable());
        assert!(registry.get("branch").is_some());
    }

    #[test]
    fn test_branch_ports() {
        let ports = BranchNode.ports();
        let outputs: Vec<_> = ports
            .iter()
            .filter(|p| p.port_type == PortType::Exec && p.direction == crate::port::PortDirection::Output)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(outputs, vec!["True", "False"]);
    }
}
