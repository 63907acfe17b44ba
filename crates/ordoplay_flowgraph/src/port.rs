// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub Uuid);

impl PortId {
    /// Create a new random port ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

/// Address of a port within a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Owning node
    pub node: NodeId,
    /// Port on that node
    pub port: PortId,
}

impl PortRef {
    /// Create a new port reference
    pub fn new(node: NodeId, port: PortId) -> Self {
        Self { node, port }
    }
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

impl PortDirection {
    /// The direction a port must have to connect to this one
    pub fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

/// How many connections a port accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PortCapacity {
    /// At most one connection
    #[default]
    Single,
    /// Any number of connections
    Multiple,
}

/// Data type that can flow through ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// Execution flow
    Exec,
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// 4D vector
    Vector4,
    /// Color (RGBA)
    Color,
    /// String value
    String,
    /// Any type (for generic nodes)
    Any,
    /// Host-defined type, only compatible with itself
    Custom(String),
}

impl PortType {
    /// Types a graph variable may be declared with
    pub const VARIABLE_TYPES: [PortType; 8] = [
        PortType::Bool,
        PortType::Int,
        PortType::Float,
        PortType::String,
        PortType::Vector2,
        PortType::Vector3,
        PortType::Vector4,
        PortType::Color,
    ];

    /// Human-readable type name
    pub fn name(&self) -> &str {
        match self {
            Self::Exec => "Exec",
            Self::Bool => "Bool",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Vector2 => "Vector2",
            Self::Vector3 => "Vector3",
            Self::Vector4 => "Vector4",
            Self::Color => "Color",
            Self::String => "String",
            Self::Any => "Any",
            Self::Custom(name) => name,
        }
    }

    /// Whether a graph variable can hold values of this type
    pub fn is_variable_type(&self) -> bool {
        Self::VARIABLE_TYPES.contains(self)
    }

    /// Check if a value of this type can be accepted where `target` is expected.
    ///
    /// Accepts identical types and widening conversions only.
    pub fn is_castable_to(&self, target: &PortType) -> bool {
        if self == target {
            return true;
        }

        match (self, target) {
            // Control flow never mixes with data
            (Self::Exec, _) | (_, Self::Exec) => false,
            // Generic ports take and give anything; the value is checked on read
            (_, Self::Any) | (Self::Any, _) => true,
            (Self::Int, Self::Float) => true,
            (Self::Float, Self::Vector2 | Self::Vector3 | Self::Vector4) => true,
            (Self::Vector2, Self::Vector3 | Self::Vector4) => true,
            (Self::Vector3, Self::Vector4) => true,
            (Self::Color, Self::Vector4) | (Self::Vector4, Self::Color) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A port on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// Unique port ID
    pub id: PortId,
    /// Port name
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Data type
    pub port_type: PortType,
    /// Inline value used when an input is unconnected
    pub default_value: Option<PortValue>,
    /// Connection limit (outputs are always multi-connectable)
    pub capacity: PortCapacity,
    /// Connected ports in insertion order
    #[serde(skip)]
    connections: Vec<PortRef>,
}

impl Port {
    /// Create a new port
    pub fn new(name: impl Into<String>, port_type: PortType, direction: PortDirection) -> Self {
        let capacity = match direction {
            PortDirection::Input => PortCapacity::Single,
            PortDirection::Output => PortCapacity::Multiple,
        };
        Self {
            id: PortId::new(),
            name: name.into(),
            direction,
            port_type,
            default_value: None,
            capacity,
            connections: Vec::new(),
        }
    }

    /// Create a new input port
    pub fn input(name: impl Into<String>, port_type: PortType) -> Self {
        Self::new(name, port_type, PortDirection::Input)
    }

    /// Create a new output port
    pub fn output(name: impl Into<String>, port_type: PortType) -> Self {
        Self::new(name, port_type, PortDirection::Output)
    }

    /// Set the default value
    pub fn with_default(mut self, value: PortValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Set the connection capacity. Ignored for outputs.
    pub fn with_capacity(mut self, capacity: PortCapacity) -> Self {
        if self.direction == PortDirection::Input {
            self.capacity = capacity;
        }
        self
    }

    /// Connected ports, first-connected first
    pub fn connections(&self) -> &[PortRef] {
        &self.connections
    }

    /// Number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether any connection exists
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Whether this port is connected to `peer`
    pub fn is_connected_to(&self, peer: &PortRef) -> bool {
        self.connections.contains(peer)
    }

    /// The tie-break winner among this port's connections
    pub fn first_connection(&self) -> Option<PortRef> {
        self.connections.first().copied()
    }

    /// Whether another connection fits under this port's capacity
    pub fn has_capacity(&self) -> bool {
        self.direction == PortDirection::Output
            || self.capacity == PortCapacity::Multiple
            || self.connections.is_empty()
    }

    /// Check if a connection to another port is valid
    pub fn can_connect(&self, other: &Port) -> bool {
        if self.direction == other.direction {
            return false;
        }
        let (output, input) = match self.direction {
            PortDirection::Output => (self, other),
            PortDirection::Input => (other, self),
        };
        output.port_type.is_castable_to(&input.port_type)
    }

    /// Value used when nothing upstream provides one
    pub fn fallback_value(&self) -> PortValue {
        self.default_value
            .clone()
            .unwrap_or_else(|| PortValue::default_for(&self.port_type))
    }

    pub(crate) fn attach(&mut self, peer: PortRef) {
        if !self.connections.contains(&peer) {
            self.connections.push(peer);
        }
    }

    pub(crate) fn detach(&mut self, peer: &PortRef) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c != peer);
        before != self.connections.len()
    }

    pub(crate) fn take_connections(&mut self) -> Vec<PortRef> {
        std::mem::take(&mut self.connections)
    }
}

/// Value that can be stored in a port
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PortValue {
    /// No value (exec ports, empty generic ports)
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// 4D vector
    Vector4([f32; 4]),
    /// Color
    Color([f32; 4]),
    /// String
    String(String),
}

impl PortValue {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::None => PortType::Any,
            Self::Bool(_) => PortType::Bool,
            Self::Int(_) => PortType::Int,
            Self::Float(_) => PortType::Float,
            Self::Vector2(_) => PortType::Vector2,
            Self::Vector3(_) => PortType::Vector3,
            Self::Vector4(_) => PortType::Vector4,
            Self::Color(_) => PortType::Color,
            Self::String(_) => PortType::String,
        }
    }

    /// Zero value for a port type
    pub fn default_for(port_type: &PortType) -> Self {
        match port_type {
            PortType::Bool => Self::Bool(false),
            PortType::Int => Self::Int(0),
            PortType::Float => Self::Float(0.0),
            PortType::Vector2 => Self::Vector2([0.0; 2]),
            PortType::Vector3 => Self::Vector3([0.0; 3]),
            PortType::Vector4 => Self::Vector4([0.0; 4]),
            PortType::Color => Self::Color([0.0, 0.0, 0.0, 1.0]),
            PortType::String => Self::String(String::new()),
            PortType::Exec | PortType::Any | PortType::Custom(_) => Self::None,
        }
    }

    /// Convert this value for a consumer expecting `target`.
    ///
    /// Returns `None` when the conversion would not be a widening one.
    pub fn cast_to(&self, target: &PortType) -> Option<PortValue> {
        if matches!(target, PortType::Any) || self.port_type() == *target {
            return Some(self.clone());
        }

        let cast = match (self, target) {
            (Self::Int(v), PortType::Float) => Self::Float(*v as f32),
            (Self::Float(v), PortType::Vector2) => Self::Vector2([*v; 2]),
            (Self::Float(v), PortType::Vector3) => Self::Vector3([*v; 3]),
            (Self::Float(v), PortType::Vector4) => Self::Vector4([*v; 4]),
            (Self::Vector2([x, y]), PortType::Vector3) => Self::Vector3([*x, *y, 0.0]),
            (Self::Vector2([x, y]), PortType::Vector4) => Self::Vector4([*x, *y, 0.0, 0.0]),
            (Self::Vector3([x, y, z]), PortType::Vector4) => Self::Vector4([*x, *y, *z, 0.0]),
            (Self::Color(c), PortType::Vector4) => Self::Vector4(*c),
            (Self::Vector4(v), PortType::Color) => Self::Color(*v),
            _ => return None,
        };
        Some(cast)
    }

    /// Read as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as a float, widening integers
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    /// Read as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for PortValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for PortValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for PortValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PortValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PortValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
