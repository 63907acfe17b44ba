// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixture nodes shared by the unit tests.

use crate::evaluation::{InputValues, OutputValues, ValueEnv, Valued};
use crate::execution::{exec_in, exec_out, Executable, ExecutionContext, ExecutionError, EXEC_OUT};
use crate::node::{NodeError, NodeId, NodeKind};
use crate::port::{Port, PortType, PortValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Valued source that counts how often it is computed
#[derive(Debug, Clone)]
pub(crate) struct CountingSource {
    value: f32,
    calls: Arc<AtomicUsize>,
}

pub(crate) fn counting_source(value: f32) -> (CountingSource, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        CountingSource {
            value,
            calls: calls.clone(),
        },
        calls,
    )
}

impl NodeKind for CountingSource {
    fn kind_id(&self) -> &'static str {
        "counting_source"
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::output("Value", PortType::Float)]
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}

impl Valued for CountingSource {
    fn request_values(
        &self,
        _outputs: &[Port],
        _inputs: &InputValues,
        _env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OutputValues::single("Value", PortValue::Float(self.value)))
    }
}

/// Valued source with outputs `X` (`x`) and `Y` (`2x`) that counts its computations
#[derive(Debug, Clone)]
pub(crate) struct CountingPair {
    x: f32,
    calls: Arc<AtomicUsize>,
}

pub(crate) fn counting_pair(x: f32) -> (CountingPair, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (CountingPair { x, calls: calls.clone() }, calls)
}

impl NodeKind for CountingPair {
    fn kind_id(&self) -> &'static str {
        "counting_pair"
    }

    fn ports(&self) -> Vec<Port> {
        vec![Port::output("X", PortType::Float), Port::output("Y", PortType::Float)]
    }

    fn as_valued(&self) -> Option<&dyn Valued> {
        Some(self)
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}

impl Valued for CountingPair {
    fn request_values(
        &self,
        _outputs: &[Port],
        _inputs: &InputValues,
        _env: &ValueEnv<'_>,
    ) -> Result<OutputValues, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OutputValues::new()
            .with("X", PortValue::Float(self.x))
            .with("Y", PortValue::Float(2.0 * self.x)))
    }
}

/// Executable that counts its steps and continues on `ExecOut`
#[derive(Debug, Clone)]
pub(crate) struct StepCounter {
    calls: Arc<AtomicUsize>,
}

impl StepCounter {
    pub(crate) fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { calls: calls.clone() }, calls)
    }
}

impl NodeKind for StepCounter {
    fn kind_id(&self) -> &'static str {
        "step_counter"
    }

    fn ports(&self) -> Vec<Port> {
        vec![exec_in(), exec_out()]
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
}

impl Executable for StepCounter {
    fn execute(&mut self, cx: &mut ExecutionContext<'_>) -> Result<Option<NodeId>, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(cx.next(EXEC_OUT))
    }
}

/// Node with an exec input but no execution capability
#[derive(Debug, Clone, Copy)]
pub(crate) struct InertSink;

impl NodeKind for InertSink {
    fn kind_id(&self) -> &'static str {
        "inert_sink"
    }

    fn ports(&self) -> Vec<Port> {
        vec![exec_in()]
    }

    fn duplicate(&self) -> Box<dyn NodeKind> {
        Box::new(*self)
    }
}
