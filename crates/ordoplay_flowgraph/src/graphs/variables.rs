// SPDX-License-Identifier: MIT OR Apache-2.0
//! Constants and variable access nodes.
//!
//! Get and Set nodes hold a variable *name*, never a reference. The binding is
//! re-resolved on every validation so renames, removals and type changes show up
//! on the node's error slot.

use crate::evaluation::{InputValues, OutputValues, ValueEnv, Valued};
use crate::execution::{exec_in, exec_out, Executable, ExecutionContext, ExecutionError, EXEC_OUT};
use crate::node::{GraphEnv, Node, NodeCategory, NodeError, NodeId, NodeKind, NodeRegistry, NodeType};
use crate::port::{Port, PortType, PortValue};
use crate::variable::{GraphVariable, VariableError};
use serde::{Deserialize, Serialize};

/// Port carrying a variable's value on Get and Set nodes
pub const VALUE_PORT: &str = "Value";

/// Create the constants and variables node registry
pub fn create_variable_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(NodeType {
        id: "bool_constant".to_string(),
        name: "Bool Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant boolean value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::Bool)),
    });

    registry.register(NodeType {
        id: "int_constant".to_string(),
        name: "Int Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant integer value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::Int)),
    });

    registry.register(NodeType {
        id: "float_constant".to_string(),
        name: "Float Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant float value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::Float)),
    });

    registry.register(NodeType {
        id: "string_constant".to_string(),
        name: "String Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant string value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::String)),
    });

    registry.register(NodeType {
        id: "vector2_constant".to_string(),
        name: "Vector2 Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant 2D vector value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::Vector2)),
    });

    registry.register(NodeType {
        id: "vector3_constant".to_string(),
        name: "Vector3 Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant 3D vector value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::Vector3)),
    });

    registry.register(NodeType {
        id: "vector4_constant".to_string(),
        name: "Vector4 Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant 4D vector value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::Vector4)),
    });

    registry.register(NodeType {
        id: "color_constant".to_string(),
        name: "Color Constant".to_string(),
        category: NodeCategory::Input,
        description: "Constant color value".to_string(),
        factory: || Box::new(ConstantNode::of_type(&PortType::Color)),
    });

    registry.register(NodeType {
        id: "get_variable".to_string(),
        name: "Get".to_string(),
        category: NodeCategory::Input,
        description: "Read a graph variable".to_string(),
        factory: || Box::new(GetVariableNode::default()),
    });

    registry.register(NodeType {
        id: "set_variable".to_string(),
        name: "Set".to_string(),
        category: NodeCategory::Utility,
        description: "Write a graph variable during execution".to_string(),
        factory: || Box::new(SetVariableNode::default()),
    });

    registry
}

/// Node with a single inline-editable output value
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantNode {
    value: PortValue,
}

impl ConstantNode {
    /// Create a constant holding `value`
    pub fn new(value: PortValue) -> Self {
        Self { value }
    }

    /// Create a constant holding the zero value of `port_type`
    pub fn of_type(port_type: &PortType) -> Self {
        Self::new(PortValue::default_for(port_type))
    }

    /// Current value
    pub fn value(&self) -> &PortValue {
        &self.value
    }

    /// Replace the value.
    ///
    /// Changing the value's type changes the output port; go through
    /// [`Graph::edit_node`](crate::Graph::edit_node) in that case.
    pub fn set_value(&mut self, value: PortValue) {
        self.value = value;
    }
}

impl NodeKind for ConstantNode {
    fn kind_id(&self) -> &'static str {
        match self.value {
            PortValue::Bool(_) => "bool_constant",
            PortValue::Int(_) => "int_constant",
            PortValue::Float(_) => "float_constant",
            PortValue::String(_) => "string_constant",
            PortValue::Vector2(_) => "vector2_constant",
            PortValue::Vector3(_) => "vector3_constant",
            PortValue::Vector4(_) => "vector4_constant",
            PortValue::Color(_) => "color_constant",
            PortValue::None => "constant",
        }
    }

    fn display_name(&self) -> String {
        format!("{} Constant", self.value.port_type())
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Constants"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::output(VALUE_PORT, self.value.port_type())]
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }

    fn save(&self) -> serde_json::Value {
        serde_json::to_value(&self.value).unwrap_or_default()
    }

    fn load(&mut self, settings: &serde_json::Value) -> Result<(), serde_json::Error> {
        let value: PortValue = serde_json::from_value(settings.clone())?;
        if value.port_type() != self.value.port_type() {
            return Err(serde::de::Error::custom(format!(
                "expected a {} constant, found {}",
                self.value.port_type(),
                value.port_type()
            )));
        }
        self.value = value;
        Ok(())
    }
}

impl Valued for ConstantNode {
    fn request_values(
        &self,
        _outputs: &[Port],
        _inputs: &InputValues,
        _env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        Ok(OutputValues::single(VALUE_PORT, self.value.clone()))
    }
}

/// Persisted form of a variable binding
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Binding {
    variable: String,
    var_type: PortType,
}

fn binding_settings(variable: &str, var_type: &PortType) -> serde_json::Value {
    serde_json::to_value(Binding {
        variable: variable.to_string(),
        var_type: var_type.clone(),
    })
    .unwrap_or_default()
}

/// Read the current value of a named variable
#[derive(Debug, Clone, PartialEq)]
pub struct GetVariableNode {
    variable: String,
    var_type: PortType,
}

impl GetVariableNode {
    /// Bind to `variable` with an output port of `var_type`
    pub fn new(variable: impl Into<String>, var_type: PortType) -> Self {
        Self {
            variable: variable.into(),
            var_type,
        }
    }

    /// Bind to an existing variable, typing the port after it
    pub fn bound_to(variable: &GraphVariable) -> Self {
        Self::new(variable.name.clone(), variable.var_type().clone())
    }

    /// Name of the bound variable
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Declared port type
    pub fn var_type(&self) -> &PortType {
        &self.var_type
    }

    /// Retype the output port. Use with [`Graph::edit_node`](crate::Graph::edit_node).
    pub fn set_var_type(&mut self, var_type: PortType) {
        self.var_type = var_type;
    }
}

impl Default for GetVariableNode {
    fn default() -> Self {
        Self::new(String::new(), PortType::Any)
    }
}

impl NodeKind for GetVariableNode {
    fn kind_id(&self) -> &'static str {
        "get_variable"
    }

    fn display_name(&self) -> String {
        if self.variable.is_empty() {
            "Get".to_string()
        } else {
            self.variable.clone()
        }
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Variables"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::output(VALUE_PORT, self.var_type.clone())]
    }

    fn on_validate(&mut self, node: &mut Node, env: &GraphEnv<'_>) {
        let Some(variable) = env.variables.find(&self.variable) else {
            node.set_error(Some(NodeError::UnknownVariable(self.variable.clone())));
            return;
        };
        node.name = variable.name.clone();
        if !variable.var_type().is_castable_to(&self.var_type) {
            node.set_error(Some(NodeError::TypeMismatch {
                expected: self.var_type.clone(),
                found: variable.var_type().clone(),
            }));
        }
    }

    fn variable_binding(&self) -> Option<&str> {
        Some(&self.variable)
    }

    fn rebind_variable(&mut self, node: &mut Node, name: &str) {
        self.variable = name.to_string();
        node.name = name.to_string();
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }

    fn save(&self) -> serde_json::Value {
        binding_settings(&self.variable, &self.var_type)
    }

    fn load(&mut self, settings: &serde_json::Value) -> Result<(), serde_json::Error> {
        let binding: Binding = serde_json::from_value(settings.clone())?;
        self.variable = binding.variable;
        self.var_type = binding.var_type;
        Ok(())
    }
}

impl Valued for GetVariableNode {
    fn request_values(
        &self,
        _outputs: &[Port],
        _inputs: &InputValues,
        env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        let variable = env
            .variables
            .find(&self.variable)
            .ok_or_else(|| NodeError::UnknownVariable(self.variable.clone()))?;
        let value = variable
            .value()
            .cast_to(&self.var_type)
            .ok_or_else(|| NodeError::TypeMismatch {
                expected: self.var_type.clone(),
                found: variable.var_type().clone(),
            })?;
        Ok(OutputValues::single(VALUE_PORT, value))
    }
}

/// Write the `Value` input into a named variable, then continue
#[derive(Debug, Clone, PartialEq)]
pub struct SetVariableNode {
    variable: String,
    var_type: PortType,
}

impl SetVariableNode {
    /// Bind to `variable` with an input port of `var_type`
    pub fn new(variable: impl Into<String>, var_type: PortType) -> Self {
        Self {
            variable: variable.into(),
            var_type,
        }
    }

    /// Bind to an existing variable, typing the port after it
    pub fn bound_to(variable: &GraphVariable) -> Self {
        Self::new(variable.name.clone(), variable.var_type().clone())
    }

    /// Name of the bound variable
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Declared port type
    pub fn var_type(&self) -> &PortType {
        &self.var_type
    }

    /// Retype the input port. Use with [`Graph::edit_node`](crate::Graph::edit_node).
    pub fn set_var_type(&mut self, var_type: PortType) {
        self.var_type = var_type;
    }

    /// Perform the write, returning the node-local failure if it was skipped
    fn write(&self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeError>, ExecutionError> {
        let connected = cx.node().input(VALUE_PORT).is_some_and(|p| p.is_connected());
        if !connected {
            return Ok(Some(NodeError::MissingConnection(self.variable.clone())));
        }
        match cx.variables().find(&self.variable) {
            None => return Ok(Some(NodeError::UnknownVariable(self.variable.clone()))),
            Some(variable) if variable.constant => {
                return Ok(Some(NodeError::ConstantVariable(self.variable.clone())));
            }
            Some(_) => {}
        }

        let value = cx.input(VALUE_PORT)?;
        let error = match cx.set_variable_value(&self.variable, value) {
            Ok(()) => None,
            Err(VariableError::TypeMismatch { expected, found, .. }) => Some(NodeError::TypeMismatch { expected, found }),
            Err(VariableError::UnknownVariable(name)) => Some(NodeError::UnknownVariable(name)),
            Err(e @ VariableError::UnsupportedType(_)) => Some(NodeError::Custom(e.to_string())),
        };
        Ok(error)
    }
}

impl Default for SetVariableNode {
    fn default() -> Self {
        Self::new(String::new(), PortType::Any)
    }
}

impl NodeKind for SetVariableNode {
    fn kind_id(&self) -> &'static str {
        "set_variable"
    }

    fn display_name(&self) -> String {
        if self.variable.is_empty() {
            "Set".to_string()
        } else {
            self.variable.clone()
        }
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Variables"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![exec_in(), Port::input(VALUE_PORT, self.var_type.clone()), exec_out()]
    }

    fn on_validate(&mut self, node: &mut Node, env: &GraphEnv<'_>) {
        let Some(variable) = env.variables.find(&self.variable) else {
            node.set_error(Some(NodeError::UnknownVariable(self.variable.clone())));
            return;
        };
        node.name = variable.name.clone();
        if variable.constant {
            node.set_error(Some(NodeError::ConstantVariable(self.variable.clone())));
        } else if !self.var_type.is_castable_to(variable.var_type()) {
            node.set_error(Some(NodeError::TypeMismatch {
                expected: variable.var_type().clone(),
                found: self.var_type.clone(),
            }));
        }
    }

    fn variable_binding(&self) -> Option<&str> {
        Some(&self.variable)
    }

    fn rebind_variable(&mut self, node: &mut Node, name: &str) {
        self.variable = name.to_string();
        node.name = name.to_string();
    }

    fn is_executable(&self) -> bool {
        true
    }

    fn as_executable_mut(&mut self) -> Option<&mut dyn Executable> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }

    fn save(&self) -> serde_json::Value {
        binding_settings(&self.variable, &self.var_type)
    }

    fn load(&mut self, settings: &serde_json::Value) -> Result<(), serde_json::Error> {
        let binding: Binding = serde_json::from_value(settings.clone())?;
        self.variable = binding.variable;
        self.var_type = binding.var_type;
        Ok(())
    }
}

impl Executable for SetVariableNode {
    fn execute(&mut self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeId>, ExecutionError> {
        if let Some(error) = self.write(cx)? {
            cx.report(error);
        }
        Ok(cx.next(EXEC_OUT))
    }
}
