// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arithmetic on floats.

use crate::evaluation::{InputValues, OutputValues, ValueEnv, Valued};
use crate::node::{NodeCategory, NodeError, NodeKind, NodeRegistry, NodeType};
use crate::port::{Port, PortType, PortValue};
use serde::{Deserialize, Serialize};

/// Create the math node registry
pub fn create_math_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(NodeType {
        id: "add".to_string(),
        name: "Add".to_string(),
        category: NodeCategory::Math,
        description: "Add two values".to_string(),
        factory: || Box::new(MathNode::new(MathOp::Add)),
    });

    registry.register(NodeType {
        id: "subtract".to_string(),
        name: "Subtract".to_string(),
        category: NodeCategory::Math,
        description: "Subtract B from A".to_string(),
        factory: || Box::new(MathNode::new(MathOp::Subtract)),
    });

    registry.register(NodeType {
        id: "multiply".to_string(),
        name: "Multiply".to_string(),
        category: NodeCategory::Math,
        description: "Multiply two values".to_string(),
        factory: || Box::new(MathNode::new(MathOp::Multiply)),
    });

    registry.register(NodeType {
        id: "divide".to_string(),
        name: "Divide".to_string(),
        category: NodeCategory::Math,
        description: "Divide A by B".to_string(),
        factory: || Box::new(MathNode::new(MathOp::Divide)),
    });

    registry
}

/// Binary float operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathOp {
    /// A + B
    Add,
    /// A - B
    Subtract,
    /// A * B
    Multiply,
    /// A / B
    Divide,
}

impl MathOp {
    fn apply(self, a: f32, b: f32) -> Result<f32, NodeError> {
        match self {
            Self::Add => Ok(a + b),
            Self::Subtract => Ok(a - b),
            Self::Multiply => Ok(a * b),
            Self::Divide if b == 0.0 => Err(NodeError::Custom("Division by zero".to_string())),
            Self::Divide => Ok(a / b),
        }
    }
}

/// Node applying a [`MathOp`] to inputs `A` and `B`
#[derive(Debug, Clone, Copy)]
pub struct MathNode {
    op: MathOp,
}

impl MathNode {
    /// Create a node for `op`
    pub fn new(op: MathOp) -> Self {
        Self { op }
    }

    /// The operation
    pub fn op(&self) -> MathOp {
        self.op
    }
}

impl NodeKind for MathNode {
    fn kind_id(&self) -> &'static str {
        match self.op {
            MathOp::Add => "add",
            MathOp::Subtract => "subtract",
            MathOp::Multiply => "multiply",
            MathOp::Divide => "divide",
        }
    }

    fn display_name(&self) -> String {
        format!("{:?}", self.op)
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Math"]
    }

    fn ports(&self) -> Vec<Port> {
        let identity = match self.op {
            MathOp::Add | MathOp::Subtract => 0.0,
            MathOp::Multiply | MathOp::Divide => 1.0,
        };
        vec![
            Port::input("A", PortType::Float).with_default(PortValue::Float(0.0)),
            Port::input("B", PortType::Float).with_default(PortValue::Float(identity)),
            Port::output("Result", PortType::Float),
        ]
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

impl Valued for MathNode {
    fn request_values(
        &self,
        _outputs: &[Port],
        inputs: &InputValues,
        _env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        let result = self.op.apply(inputs.float("A"), inputs.float("B"))?;
        Ok(OutputValues::single("Result", PortValue::Float(result)))
    }
}
