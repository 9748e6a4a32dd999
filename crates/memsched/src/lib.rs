//! Memory-peak-minimizing operator scheduling for dataflow compute graphs.
//!
//! Given a DAG of operators producing tensor-typed values, the scheduler
//! emits a topological order of operators that minimizes the peak sum of
//! live value sizes during execution. The search is tamed by a two-level
//! hierarchical view of the graph (linear chains collapsed into sequences,
//! branching regions collapsed into groups), a frontier-keyed dynamic
//! program within each level, and an outer refinement loop that dissolves
//! the groups responsible for the current peak and reschedules.

pub mod graph;
pub mod hier;
pub mod ops;
pub mod sched;
pub mod viz;

pub use graph::{
    DType, Graph, GraphBuilder, GraphError, Op, OpId, Shape, TensorType, Value, ValueId, ValueKind,
};
pub use hier::HierGraph;
pub use ops::OverlapRegistry;
pub use sched::{
    estimate_peak, hierarchical_schedule, random_sample, reverse_post_order, LifetimeStat,
    MemStateVec, SchedResult,
};
