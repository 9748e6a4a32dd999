//! Schedules a small branching graph and prints the result.
//!
//! Run with `cargo run --example diamond`; set `MEMSCHED_SCHED_STATS=1`
//! for the per-op memory-state dump.

use memsched::graph::{DType, GraphBuilder, TensorType};
use memsched::ops::OverlapRegistry;
use memsched::sched::{estimate_peak, hierarchical_schedule};
use memsched::viz::schedule_dot;

fn main() -> anyhow::Result<()> {
    let feature = |n: usize| TensorType::new(DType::F32, vec![n]);

    let mut builder = GraphBuilder::new();
    let image = builder.input("image", feature(64));
    let stem = builder.op("conv", &[image], feature(32));
    let left = builder.op("conv", &[stem], feature(32));
    let right = builder.op("max_pool", &[stem], feature(8));
    let merged = builder.op("concat", &[left, right], feature(40));
    let logits = builder.op("matmul", &[merged], feature(4));
    builder.output(logits);
    let graph = builder.finish()?;

    let sched = hierarchical_schedule(&graph, OverlapRegistry::global())?;
    println!("schedule:");
    for (pos, &op) in sched.iter().enumerate() {
        println!("  {:>2}: {}", pos, graph.op(op).ty);
    }
    println!("peak working set: {} bytes", estimate_peak(&sched, &graph));
    println!("{}", schedule_dot(&sched, &graph, "diamond"));
    Ok(())
}
