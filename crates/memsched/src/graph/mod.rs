//! Dataflow graph of operators and the SSA values flowing between them.
//!
//! The graph is an arena of records addressed by newtype ids. Values and
//! operators are immutable once [`GraphBuilder::finish`] has run; the
//! scheduler only ever reads them.

mod builder;
mod types;

use smallvec::SmallVec;

pub use builder::{GraphBuilder, GraphError};
pub use types::{DType, Shape, TensorType};

/// Stable identifier of a value within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Stable identifier of an operator within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// Storage class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Weights and other permanently resident data; excluded from live-set
    /// accounting.
    Param,
    /// A model input, live from the start of execution.
    Input,
    /// A value produced by an operator during execution.
    Intermediate,
}

/// One consumption site of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUse {
    /// Consumed as an operand of an operator.
    Op(OpId),
    /// Surfaced as a graph output; keeps the value live until the end.
    Output,
}

/// A single tensor-typed SSA value.
#[derive(Debug, Clone)]
pub struct Value {
    pub id: ValueId,
    pub name: String,
    pub kind: ValueKind,
    pub ty: TensorType,
    /// Defining operator; absent for inputs and params.
    pub def: Option<OpId>,
    /// Consumption sites, one entry per operand position.
    pub uses: SmallVec<[ValueUse; 4]>,
}

impl Value {
    /// Byte size of the value.
    pub fn size(&self) -> u64 {
        self.ty.size()
    }

    /// Number of pending consumptions when the value is born.
    pub fn use_count(&self) -> u32 {
        self.uses.len() as u32
    }

    /// Whether the value is surfaced as a graph output.
    pub fn is_graph_output(&self) -> bool {
        self.uses.iter().any(|u| matches!(u, ValueUse::Output))
    }
}

/// A graph vertex: an operator consuming and producing values.
#[derive(Debug, Clone)]
pub struct Op {
    pub id: OpId,
    /// Operator type tag, e.g. `"conv"`.
    pub ty: String,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    /// Distinct operator predecessors (defs of non-param inputs).
    pub preds: Vec<OpId>,
    /// Distinct operator successors.
    pub succs: Vec<OpId>,
}

/// An immutable dataflow DAG with distinguished inputs and outputs.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) values: Vec<Value>,
    pub(crate) ops: Vec<Op>,
    /// Model input values, in declaration order.
    pub inputs: Vec<ValueId>,
    /// Model output values, in declaration order.
    pub outputs: Vec<ValueId>,
}

impl Graph {
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id.0 as usize]
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn ops(&self) -> impl Iterator<Item = &Op> {
        self.ops.iter()
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Total byte size of the model inputs, the initial resident set of any
    /// schedule.
    pub fn input_size(&self) -> u64 {
        self.inputs.iter().map(|&v| self.value(v).size()).sum()
    }
}
