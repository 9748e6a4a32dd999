//! End-to-end scheduling scenarios over small hand-built graphs.

mod common;

use std::collections::HashMap;

use common::{
    assert_topological, brute_force_min_peak, bytes, initial_use_counts, msv_of, msv_peak,
    no_overlap_registry,
};
use memsched::graph::{Graph, GraphBuilder, OpId};
use memsched::hier::HierGraph;
use memsched::ops::OverlapRegistry;
use memsched::sched::{
    estimate_peak, hierarchical_schedule, refine_schedule, schedule_sequence, HierScheduler,
};

fn linear_chain() -> Graph {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(1));
    let a = builder.op("a", &[x], bytes(1));
    let b = builder.op("b", &[a], bytes(1));
    let c = builder.op("c", &[b], bytes(1));
    builder.output(c);
    builder.finish().unwrap()
}

#[test]
fn linear_chain_schedules_in_order_with_peak_two() {
    let graph = linear_chain();
    let registry = no_overlap_registry(&graph);
    let sched = hierarchical_schedule(&graph, &registry).unwrap();
    assert_eq!(sched, vec![OpId(0), OpId(1), OpId(2)]);
    assert_eq!(msv_peak(&graph, &registry, &sched), 2);
    assert_eq!(estimate_peak(&sched, &graph), 2);
}

#[test]
fn linear_chain_overlap_on_every_op_reaches_peak_one() {
    let graph = linear_chain();
    let mut registry = OverlapRegistry::new();
    for ty in ["a", "b", "c"] {
        registry.register(ty, Some(0));
    }
    let sched = hierarchical_schedule(&graph, &registry).unwrap();
    assert_eq!(msv_peak(&graph, &registry, &sched), 1);

    // A hint on one op alone cannot lower the peak: the first op's
    // transient (input plus its own output) stays.
    let mut partial = OverlapRegistry::new();
    partial.register("a", None);
    partial.register("b", Some(0));
    partial.register("c", None);
    assert_eq!(msv_peak(&graph, &partial, &sched), 2);
}

fn diamond() -> Graph {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(1));
    let a = builder.op("a", &[x], bytes(1));
    let b = builder.op("b", &[a], bytes(1));
    let c = builder.op("c", &[a], bytes(1));
    let d = builder.op("d", &[b, c], bytes(1));
    builder.output(d);
    builder.finish().unwrap()
}

#[test]
fn diamond_schedules_either_branch_order_with_peak_three() {
    let graph = diamond();
    let registry = no_overlap_registry(&graph);
    let sched = hierarchical_schedule(&graph, &registry).unwrap();
    assert_topological(&graph, &sched);
    let valid = [
        vec![OpId(0), OpId(1), OpId(2), OpId(3)],
        vec![OpId(0), OpId(2), OpId(1), OpId(3)],
    ];
    assert!(valid.contains(&sched), "unexpected order {sched:?}");
    assert_eq!(msv_peak(&graph, &registry, &sched), 3);
    assert_eq!(estimate_peak(&sched, &graph), 3);
}

/// Two parallel branches of unequal cost: a cheap three-op chain against a
/// single op with a fat output.
fn unequal_branches() -> Graph {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(1));
    let a = builder.op("a", &[x], bytes(1));
    let b1 = builder.op("b1", &[a], bytes(1));
    let b2 = builder.op("b2", &[b1], bytes(1));
    let b3 = builder.op("b3", &[b2], bytes(1));
    let c = builder.op("c", &[a], bytes(10));
    builder.output(b3);
    builder.output(c);
    builder.finish().unwrap()
}

#[test]
fn unequal_branches_reach_the_brute_force_optimum() {
    let graph = unequal_branches();
    let registry = no_overlap_registry(&graph);
    let sched = hierarchical_schedule(&graph, &registry).unwrap();
    assert_topological(&graph, &sched);
    let best = brute_force_min_peak(&graph, &registry);
    assert_eq!(msv_peak(&graph, &registry, &sched), best);
    assert_eq!(best, 12);
}

/// Two branches whose interiors are fat but whose results are thin: the
/// order genuinely separates peaks, sequential completion wins.
fn two_fat_chains() -> Graph {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(1));
    let a = builder.op("a", &[x], bytes(1));
    let p1 = builder.op("p1", &[a], bytes(10));
    let p2 = builder.op("p2", &[p1], bytes(1));
    let q1 = builder.op("q1", &[a], bytes(10));
    let q2 = builder.op("q2", &[q1], bytes(1));
    builder.output(p2);
    builder.output(q2);
    builder.finish().unwrap()
}

#[test]
fn fat_chains_are_completed_one_branch_at_a_time() {
    let graph = two_fat_chains();
    let registry = no_overlap_registry(&graph);
    let sched = hierarchical_schedule(&graph, &registry).unwrap();
    assert_topological(&graph, &sched);
    assert_eq!(msv_peak(&graph, &registry, &sched), 12);
    assert_eq!(brute_force_min_peak(&graph, &registry), 12);

    // Interleaving the fat interiors holds both alive at once.
    let interleaved = [OpId(0), OpId(1), OpId(3), OpId(2), OpId(4)];
    assert_eq!(msv_peak(&graph, &registry, &interleaved), 21);
}

#[test]
fn overlap_accepted_when_input_dies_at_the_op() {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(2));
    let y = builder.op("relu", &[x], bytes(3));
    builder.output(y);
    let graph = builder.finish().unwrap();

    let mut registry = OverlapRegistry::new();
    registry.register("relu", Some(0));
    let mut use_cnt = initial_use_counts(&graph);
    let result = schedule_sequence(&graph, &registry, &[OpId(0)], &mut use_cnt);

    // Precise overlap form: inc = size(out) - size(in), not zero.
    let states: Vec<_> = result.states.iter().collect();
    assert_eq!(states, vec![(1, 1)]);
}

#[test]
fn overlap_rejected_when_input_survives_the_op() {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(2));
    let y = builder.op("relu", &[x], bytes(3));
    let z = builder.op("sink", &[x, y], bytes(1));
    builder.output(z);
    let graph = builder.finish().unwrap();

    let mut registry = OverlapRegistry::new();
    registry.register("relu", Some(0));
    registry.register("sink", None);
    let mut use_cnt = initial_use_counts(&graph);
    let result = schedule_sequence(&graph, &registry, &[OpId(0), OpId(1)], &mut use_cnt);

    // `x` still has a pending use at the relu, so the full output size is
    // charged.
    let states: Vec<_> = result.states.iter().collect();
    assert_eq!(states[0], (3, 3));
}

#[test]
fn overlap_excludes_the_chosen_input_from_the_decrease() {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(4));
    let y = builder.input("y", bytes(2));
    let z = builder.op("blend", &[x, y], bytes(5));
    builder.output(z);
    let graph = builder.finish().unwrap();

    let mut registry = OverlapRegistry::new();
    registry.register("blend", Some(1));
    let mut use_cnt = initial_use_counts(&graph);
    let result = schedule_sequence(&graph, &registry, &[OpId(0)], &mut use_cnt);

    // Both inputs die here; the overlapped input (index 1) is folded into
    // the increase and must not be counted again in the decrease.
    let states: Vec<_> = result.states.iter().collect();
    assert_eq!(states, vec![(3, -1)]);
}

#[test]
fn group_refinement_dissolves_the_peak_group() {
    let graph = two_fat_chains();
    let registry = no_overlap_registry(&graph);

    // Hide the two fat producers inside a group, forcing them contiguous.
    let mut hier = HierGraph::from_graph(&graph);
    let seq_p1 = hier.op_to_seq[&OpId(1)];
    let seq_q1 = hier.op_to_seq[&OpId(3)];
    let gid = hier.group_sequences(&graph, &[seq_p1, seq_q1]).unwrap();
    assert_eq!(hier.sequence(seq_p1).group, Some(gid));

    // First schedule pays for the contiguity.
    let mut memo = HashMap::new();
    let first = HierScheduler::new(&graph, &registry, &hier, &mut memo).schedule();
    assert_eq!(first.states.peak(), 21);
    assert_eq!(estimate_peak(&first.seq, &graph), 21);

    // Refinement ungroups the region at the peak and strictly improves.
    let sched = refine_schedule(&graph, &registry, &mut hier);
    assert_topological(&graph, &sched);
    assert_eq!(hier.sequence(seq_p1).group, None);
    assert_eq!(estimate_peak(&sched, &graph), 12);
    assert_eq!(msv_peak(&graph, &registry, &sched), 12);
}

#[test]
fn params_contribute_nothing_to_memory_states() {
    fn chain(with_param: bool) -> Graph {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", bytes(1));
        let w = with_param.then(|| builder.param("w", bytes(100)));
        let operands = |value| match w {
            Some(w) => vec![value, w],
            None => vec![value],
        };
        let a = builder.op("a", &operands(x), bytes(1));
        let b = builder.op("b", &operands(a), bytes(1));
        let c = builder.op("c", &operands(b), bytes(1));
        builder.output(c);
        builder.finish().unwrap()
    }

    let with_param = chain(true);
    let without = chain(false);
    let registry = no_overlap_registry(&with_param);
    let order = [OpId(0), OpId(1), OpId(2)];

    assert_eq!(
        msv_of(&with_param, &registry, &order),
        msv_of(&without, &registry, &order)
    );
    assert_eq!(
        estimate_peak(&order, &with_param),
        estimate_peak(&order, &without)
    );
}
