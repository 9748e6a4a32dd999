//! Lifetime intervals and live-size accounting.

mod common;

use common::bytes;
use memsched::graph::{GraphBuilder, OpId};
use memsched::sched::{estimate_peak, LifetimeStat, BIRTH_INPUT, DEATH_UNBOUNDED};

#[test]
fn chain_lifetimes_cover_definition_to_last_use() {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(1));
    let a = builder.op("a", &[x], bytes(1));
    let b = builder.op("b", &[a], bytes(1));
    let c = builder.op("c", &[b], bytes(1));
    builder.output(c);
    let graph = builder.finish().unwrap();

    let sched = [OpId(0), OpId(1), OpId(2)];
    let stat = LifetimeStat::compute(&sched, &graph);

    let input = stat.lifetime(x).unwrap();
    assert_eq!((input.birth, input.death), (BIRTH_INPUT, 0));

    let mid = stat.lifetime(a).unwrap();
    assert_eq!((mid.birth, mid.death), (0, 1));

    let out = stat.lifetime(c).unwrap();
    assert_eq!((out.birth, out.death), (2, DEATH_UNBOUNDED));

    // One value enters while another leaves at every step.
    assert_eq!(stat.sizes(), &[2, 2, 2]);
    assert_eq!(stat.peak(), 2);
    assert_eq!(estimate_peak(&sched, &graph), 2);
}

#[test]
fn an_input_is_resident_while_its_last_user_executes() {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(4));
    let a = builder.op("a", &[x], bytes(1));
    let b = builder.op("b", &[x, a], bytes(1));
    builder.output(b);
    let graph = builder.finish().unwrap();

    let sched = [OpId(0), OpId(1)];
    let stat = LifetimeStat::compute(&sched, &graph);
    assert_eq!(stat.lifetime(x).unwrap().death, 1);
    // Position 1 holds x (dying there), a (dying there), and b.
    assert_eq!(stat.sizes(), &[5, 6]);
}

#[test]
fn peak_values_collect_everything_alive_at_a_peak_position() {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(1));
    let a = builder.op("a", &[x], bytes(1));
    let b = builder.op("b", &[a], bytes(3));
    let c = builder.op("c", &[b], bytes(1));
    builder.output(c);
    let graph = builder.finish().unwrap();

    let sched = [OpId(0), OpId(1), OpId(2)];
    let stat = LifetimeStat::compute(&sched, &graph);
    // Peak position is 1 (a and b) and 2 (b and c): size 4.
    assert_eq!(stat.peak(), 4);
    let peak_values = stat.peak_values(&graph);
    assert!(peak_values.contains(&a));
    assert!(peak_values.contains(&b));
    assert!(!peak_values.contains(&x));
}

#[test]
fn params_are_tracked_but_never_counted() {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", bytes(1));
    let w = builder.param("w", bytes(64));
    let a = builder.op("a", &[x, w], bytes(1));
    builder.output(a);
    let graph = builder.finish().unwrap();

    let sched = [OpId(0)];
    let stat = LifetimeStat::compute(&sched, &graph);
    assert!(stat.lifetime(w).is_some());
    assert_eq!(stat.sizes(), &[2]);
    assert!(!stat.peak_values(&graph).contains(&w));
}
