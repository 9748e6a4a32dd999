//! Mutable builder used to stage values and operators before freezing a
//! [`Graph`].

use std::collections::HashSet;

use smallvec::SmallVec;
use thiserror::Error;

use crate::hier::HierVertId;

use super::types::TensorType;
use super::{Graph, Op, OpId, Value, ValueId, ValueKind, ValueUse};

/// Errors surfaced when validating a staged graph or its hierarchy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("value {0:?} does not exist in the graph")]
    DanglingValue(ValueId),
    #[error("value {0:?} is defined by more than one operator")]
    DuplicateDefinition(ValueId),
    #[error("operator graph contains a cycle through op {0:?}")]
    CycleDetected(OpId),
    #[error("hierarchical vertex {0:?} is an empty sequence")]
    EmptySequence(HierVertId),
    #[error("operator type `{0}` has no registered trait")]
    UnknownOpType(String),
}

/// Stages values and operators, then validates and freezes them into a
/// [`Graph`] with def/use and pred/succ indices fixed up.
#[derive(Default)]
pub struct GraphBuilder {
    values: Vec<Value>,
    ops: Vec<Op>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a model input value.
    pub fn input(&mut self, name: &str, ty: TensorType) -> ValueId {
        let id = self.allocate_value(name, ValueKind::Input, ty);
        self.inputs.push(id);
        id
    }

    /// Declares a permanently resident parameter value.
    pub fn param(&mut self, name: &str, ty: TensorType) -> ValueId {
        self.allocate_value(name, ValueKind::Param, ty)
    }

    /// Emits a single-output operator and returns the produced value.
    pub fn op(&mut self, ty: &str, inputs: &[ValueId], out: TensorType) -> ValueId {
        let (_, outputs) = self.op_multi(ty, inputs, vec![out]);
        outputs[0]
    }

    /// Emits an operator with an arbitrary number of outputs.
    pub fn op_multi(
        &mut self,
        ty: &str,
        inputs: &[ValueId],
        outs: Vec<TensorType>,
    ) -> (OpId, Vec<ValueId>) {
        let op_id = OpId(self.ops.len() as u32);
        let mut outputs = Vec::with_capacity(outs.len());
        for (k, out_ty) in outs.into_iter().enumerate() {
            let name = format!("{}_{}.{}", ty, op_id.0, k);
            let value = self.allocate_value(&name, ValueKind::Intermediate, out_ty);
            self.values[value.0 as usize].def = Some(op_id);
            outputs.push(value);
        }
        self.ops.push(Op {
            id: op_id,
            ty: ty.to_string(),
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
            preds: Vec::new(),
            succs: Vec::new(),
        });
        (op_id, outputs)
    }

    /// Marks a value as a model output.
    pub fn output(&mut self, value: ValueId) {
        self.outputs.push(value);
    }

    /// Validates the staged graph and fixes up use lists and operator
    /// adjacency.
    pub fn finish(self) -> Result<Graph, GraphError> {
        let GraphBuilder {
            mut values,
            ops,
            inputs,
            outputs,
        } = self;

        // Every value has exactly one definition site: its creating input,
        // param, or operator.
        let mut defined: HashSet<ValueId> = values
            .iter()
            .filter(|value| value.def.is_none())
            .map(|value| value.id)
            .collect();
        for op in &ops {
            for &output in &op.outputs {
                if !defined.insert(output) {
                    return Err(GraphError::DuplicateDefinition(output));
                }
            }
        }

        // Record uses, one entry per operand position and one per output
        // declaration.
        for op in &ops {
            for &input in &op.inputs {
                let value = values
                    .get_mut(input.0 as usize)
                    .ok_or(GraphError::DanglingValue(input))?;
                value.uses.push(ValueUse::Op(op.id));
            }
        }
        for &output in &outputs {
            let value = values
                .get_mut(output.0 as usize)
                .ok_or(GraphError::DanglingValue(output))?;
            value.uses.push(ValueUse::Output);
        }

        // Derive distinct operator adjacency from value edges.
        let mut ops = ops;
        for idx in 0..ops.len() {
            let mut preds: Vec<OpId> = Vec::new();
            for &input in &ops[idx].inputs {
                if let Some(def) = values[input.0 as usize].def {
                    if !preds.contains(&def) {
                        preds.push(def);
                    }
                }
            }
            for &pred in &preds {
                let succ = ops[idx].id;
                if !ops[pred.0 as usize].succs.contains(&succ) {
                    ops[pred.0 as usize].succs.push(succ);
                }
            }
            ops[idx].preds = preds;
        }

        let graph = Graph {
            values,
            ops,
            inputs,
            outputs,
        };
        validate_acyclic(&graph)?;
        Ok(graph)
    }

    fn allocate_value(&mut self, name: &str, kind: ValueKind, ty: TensorType) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            id,
            name: name.to_string(),
            kind,
            ty,
            def: None,
            uses: SmallVec::new(),
        });
        id
    }
}

/// Verifies the operator subgraph is acyclic with an iterative
/// three-color depth-first search.
fn validate_acyclic(graph: &Graph) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color = vec![Color::White; graph.num_ops()];
    for root in graph.ops() {
        if color[root.id.0 as usize] != Color::White {
            continue;
        }
        let mut stack = vec![(root.id, 0usize)];
        color[root.id.0 as usize] = Color::Gray;
        while let Some(&mut (op, ref mut next)) = stack.last_mut() {
            let succs = &graph.op(op).succs;
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                match color[succ.0 as usize] {
                    Color::White => {
                        color[succ.0 as usize] = Color::Gray;
                        stack.push((succ, 0));
                    }
                    Color::Gray => return Err(GraphError::CycleDetected(succ)),
                    Color::Black => {}
                }
            } else {
                color[op.0 as usize] = Color::Black;
                stack.pop();
            }
        }
    }
    Ok(())
}
