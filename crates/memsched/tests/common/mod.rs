//! Shared helpers for scheduler integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use memsched::graph::{DType, Graph, OpId, TensorType};
use memsched::ops::OverlapRegistry;
use memsched::sched::{schedule_sequence, MemStateVec, UseCountMap};

/// A tensor type occupying exactly `n` bytes.
pub fn bytes(n: usize) -> TensorType {
    TensorType::new(DType::U8, vec![n])
}

/// Registry declaring every operator type of `graph` with no overlap.
pub fn no_overlap_registry(graph: &Graph) -> OverlapRegistry {
    let mut registry = OverlapRegistry::new();
    for op in graph.ops() {
        registry.register(&op.ty, None);
    }
    registry
}

/// Use counts of the graph inputs, the state scheduling starts from.
pub fn initial_use_counts(graph: &Graph) -> UseCountMap {
    graph
        .inputs
        .iter()
        .map(|&value| (value, graph.value(value).use_count()))
        .collect()
}

/// Simulates `order` as one long sequence on top of the graph-input
/// resident set, returning the absolute memory states.
pub fn msv_of(graph: &Graph, registry: &OverlapRegistry, order: &[OpId]) -> MemStateVec {
    let mut use_cnt = initial_use_counts(graph);
    let mut states = MemStateVec::new(i64::try_from(graph.input_size()).unwrap());
    let result = schedule_sequence(graph, registry, order, &mut use_cnt);
    states.extend(&result.states);
    states
}

/// Transient peak of `order` under the memory-state model.
pub fn msv_peak(graph: &Graph, registry: &OverlapRegistry, order: &[OpId]) -> i64 {
    msv_of(graph, registry, order).peak()
}

/// Asserts `sched` is a complete, valid topological order of `graph`.
pub fn assert_topological(graph: &Graph, sched: &[OpId]) {
    assert_eq!(
        sched.len(),
        graph.num_ops(),
        "schedule must contain every op exactly once"
    );
    let mut pos: HashMap<OpId, usize> = HashMap::new();
    for (idx, &op) in sched.iter().enumerate() {
        assert!(pos.insert(op, idx).is_none(), "op {op:?} scheduled twice");
    }
    for op in graph.ops() {
        for &succ in &op.succs {
            assert!(
                pos[&op.id] < pos[&succ],
                "edge {:?} -> {:?} out of order",
                op.id,
                succ
            );
        }
    }
}

/// Enumerates every topological order of the operator graph. Only for
/// small test graphs.
pub fn all_topological_orders(graph: &Graph) -> Vec<Vec<OpId>> {
    let mut pred_cnt: BTreeMap<OpId, u32> = graph
        .ops()
        .map(|op| (op.id, op.preds.len() as u32))
        .collect();
    let mut ready: Vec<OpId> = pred_cnt
        .iter()
        .filter(|&(_, &cnt)| cnt == 0)
        .map(|(&op, _)| op)
        .collect();
    let mut acc = Vec::new();
    let mut out = Vec::new();
    enumerate(graph, &mut pred_cnt, &mut ready, &mut acc, &mut out);
    out
}

fn enumerate(
    graph: &Graph,
    pred_cnt: &mut BTreeMap<OpId, u32>,
    ready: &mut Vec<OpId>,
    acc: &mut Vec<OpId>,
    out: &mut Vec<Vec<OpId>>,
) {
    if acc.len() == graph.num_ops() {
        out.push(acc.clone());
        return;
    }
    let candidates = ready.clone();
    for op in candidates {
        let idx = ready.iter().position(|&o| o == op).unwrap();
        ready.remove(idx);
        acc.push(op);
        let mut unlocked = Vec::new();
        for &succ in &graph.op(op).succs {
            let cnt = pred_cnt.get_mut(&succ).unwrap();
            *cnt -= 1;
            if *cnt == 0 {
                unlocked.push(succ);
                ready.push(succ);
            }
        }
        enumerate(graph, pred_cnt, ready, acc, out);
        for &succ in &unlocked {
            let pos = ready.iter().position(|&o| o == succ).unwrap();
            ready.remove(pos);
        }
        for &succ in &graph.op(op).succs {
            *pred_cnt.get_mut(&succ).unwrap() += 1;
        }
        acc.pop();
        ready.insert(idx, op);
    }
}

/// Minimum transient peak over every topological order: the brute-force
/// oracle for DP optimality.
pub fn brute_force_min_peak(graph: &Graph, registry: &OverlapRegistry) -> i64 {
    all_topological_orders(graph)
        .iter()
        .map(|order| msv_peak(graph, registry, order))
        .min()
        .expect("graph has at least one topological order")
}
