// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph execution engine for `OrdoPlay`.
//!
//! This crate provides a graph runtime that powers:
//! - Compute graphs (pull-based data flow)
//! - Gameplay graphs (visual scripting with execution flow)
//! - Decision trees for AI agents
//! - Nested subgraphs
//!
//! ## Architecture
//!
//! The framework is built on a generic graph model with:
//! - Typed input/output ports with widening casts
//! - Memoized, cycle-checked value resolution
//! - Execution flow guarded by a step budget
//! - Graph variables bound to nodes by name
//! - RON persistence through a node registry

pub mod config;
pub mod connection;
pub mod document;
pub mod evaluation;
pub mod execution;
pub mod graph;
pub mod graphs;
pub mod node;
pub mod port;
pub mod variable;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use connection::Connection;
pub use document::{DocumentError, GraphDocument};
pub use evaluation::{EvaluationError, InputValues, OutputValues, Pass, ValueEnv, Valued};
pub use execution::{Executable, ExecutionContext, ExecutionError, ExecutionToken, RunReport};
pub use graph::{Duplicated, Graph, GraphError};
pub use node::{GraphEnv, Node, NodeCategory, NodeError, NodeId, NodeKind, NodeLifecycle, NodeRegistry, NodeType};
pub use port::{Port, PortCapacity, PortDirection, PortId, PortRef, PortType, PortValue};
pub use variable::{GraphVariable, VariableError, VariableTable};
