// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compute graph nodes: host-defined functions and the result output.

use crate::evaluation::{InputValues, OutputValues, ValueEnv, Valued};
use crate::node::{NodeCategory, NodeError, NodeKind, NodeRegistry, NodeType};
use crate::port::{Port, PortType, PortValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Port name of a function's return value
pub const RETVAL_PORT: &str = "Retval";

/// Create the compute node registry
pub fn create_compute_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(NodeType {
        id: "function".to_string(),
        name: "Function".to_string(),
        category: NodeCategory::Custom,
        description: "Call a host function".to_string(),
        factory: || Box::new(FunctionNode::default()),
    });

    registry.register(NodeType {
        id: "result".to_string(),
        name: "Result".to_string(),
        category: NodeCategory::Output,
        description: "Final output of a compute graph".to_string(),
        factory: || Box::new(ResultNode),
    });

    registry
}

/// Name, return type and ordered arguments of a compute function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Function name
    pub name: String,
    /// Type of the `Retval` output
    pub retval: PortType,
    /// Arguments in declaration order
    pub args: Vec<(String, PortType)>,
}

impl FunctionSignature {
    /// Create a signature without arguments
    pub fn new(name: impl Into<String>, retval: PortType) -> Self {
        Self {
            name: name.into(),
            retval,
            args: Vec::new(),
        }
    }

    /// Builder-style argument
    pub fn arg(mut self, name: impl Into<String>, arg_type: PortType) -> Self {
        self.args.push((name.into(), arg_type));
        self
    }

    /// Whether the return value can feed a port of `port_type`
    pub fn has_output_of_type(&self, port_type: &PortType) -> bool {
        self.retval.is_castable_to(port_type)
    }

    /// Whether some argument accepts a value of `port_type`
    pub fn has_input_of_type(&self, port_type: &PortType) -> bool {
        self.args.iter().any(|(_, t)| port_type.is_castable_to(t))
    }
}

impl Default for FunctionSignature {
    fn default() -> Self {
        Self::new("function", PortType::Float)
    }
}

type Function = Arc<dyn Fn(&InputValues) -> Result<PortValue, NodeError> + Send + Sync>;

/// Node whose ports mirror a [`FunctionSignature`], evaluated by a host closure
#[derive(Clone, Default)]
pub struct FunctionNode {
    signature: FunctionSignature,
    function: Option<Function>,
}

impl FunctionNode {
    /// Create a node for `signature` backed by `function`
    pub fn new(
        signature: FunctionSignature,
        function: impl Fn(&InputValues) -> Result<PortValue, NodeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            signature,
            function: Some(Arc::new(function)),
        }
    }

    /// Current signature
    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// Replace the signature.
    ///
    /// Ports are rebuilt when done through [`Graph::edit_node`](crate::Graph::edit_node):
    /// removed arguments lose their ports and connections, retyped ones keep only
    /// connections that still type-check.
    pub fn load_signature(&mut self, signature: FunctionSignature) {
        self.signature = signature;
    }

    /// Bind the closure, e.g. after loading a saved graph
    pub fn set_function(
        &mut self,
        function: impl Fn(&InputValues) -> Result<PortValue, NodeError> + Send + Sync + 'static,
    ) {
        self.function = Some(Arc::new(function));
    }
}

impl fmt::Debug for FunctionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionNode")
            .field("signature", &self.signature)
            .field("bound", &self.function.is_some())
            .finish()
    }
}

impl NodeKind for FunctionNode {
    fn kind_id(&self) -> &'static str {
        "function"
    }

    fn display_name(&self) -> String {
        self.signature.name.clone()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Compute"]
    }

    fn ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .signature
            .args
            .iter()
            .map(|(name, arg_type)| Port::input(name.clone(), arg_type.clone()))
            .collect();
        ports.push(Port::output(RETVAL_PORT, self.signature.retval.clone()));
        ports
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }

    fn save(&self) -> serde_json::Value {
        serde_json::to_value(&self.signature).unwrap_or_default()
    }

    fn load(&mut self, settings: &serde_json::Value) -> Result<(), serde_json::Error> {
        self.signature = serde_json::from_value(settings.clone())?;
        Ok(())
    }
}

impl Valued for FunctionNode {
    fn request_values(
        &self,
        _outputs: &[Port],
        inputs: &InputValues,
        _env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        let function = self
            .function
            .as_ref()
            .ok_or_else(|| NodeError::Custom(format!("`{}` has no implementation", self.signature.name)))?;
        Ok(OutputValues::single(RETVAL_PORT, function(inputs)?))
    }
}

/// Final output of a compute graph; passes its `Value` input through as `Result`
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultNode;

impl NodeKind for ResultNode {
    fn kind_id(&self) -> &'static str {
        "result"
    }

    fn display_name(&self) -> String {
        "Result".to_string()
    }

    fn tags(&self) -> &'static [&'static str] {
        &["Compute"]
    }

    fn ports(&self) -> Vec<Port> {
        vec![
            Port::input("Value", PortType::Any),
            Port::output("Result", PortType::Any),
        ]
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}

impl Valued for ResultNode {
    fn request_values(
        &self,
        _outputs: &[Port],
        inputs: &InputValues,
        _env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        Ok(OutputValues::single("Result", inputs.get("Value").cloned().unwrap_or_default()))
    }
}
