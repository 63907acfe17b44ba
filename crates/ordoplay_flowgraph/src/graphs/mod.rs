// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node kinds and their registries.

pub mod compute;
pub mod decision_tree;
pub mod flow;
pub mod math;
pub mod subgraph;
pub mod variables;

use crate::node::NodeRegistry;

/// Create a registry holding every built-in node type
pub fn create_default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.extend(flow::create_flow_registry());
    registry.extend(variables::create_variable_registry());
    registry.extend(math::create_math_registry());
    registry.extend(compute::create_compute_registry());
    registry.extend(subgraph::create_subgraph_registry());
    registry.extend(decision_tree::create_decision_registry());
    registry
}
