//! Per-operator-type traits consumed by the scheduler.
//!
//! The only trait the scheduler needs is the overlap hint: which input's
//! storage, if any, the first output of an operator may reuse. The hint is
//! a candidate; the scheduler accepts it only when the named input dies at
//! exactly the step that schedules the operator.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::graph::{Graph, GraphError, Op};

/// Maps operator type tags to their overlap hints.
#[derive(Debug, Default, Clone)]
pub struct OverlapRegistry {
    entries: HashMap<String, Option<usize>>,
}

static DEFAULT_REGISTRY: Lazy<OverlapRegistry> = Lazy::new(OverlapRegistry::with_defaults);

impl OverlapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry covering the standard operator set.
    pub fn global() -> &'static OverlapRegistry {
        &DEFAULT_REGISTRY
    }

    /// Registry preloaded with traits for common inference operators.
    /// Elementwise operators may reuse their first input; layout ops alias
    /// it outright; reductions and contractions allocate fresh storage.
    pub fn with_defaults() -> Self {
        let mut registry = OverlapRegistry::new();
        for ty in ["relu", "sigmoid", "tanh", "clip", "add", "sub", "mul", "div"] {
            registry.register(ty, Some(0));
        }
        for ty in ["reshape", "flatten", "squeeze", "unsqueeze"] {
            registry.register(ty, Some(0));
        }
        for ty in [
            "conv", "matmul", "gemm", "avg_pool", "max_pool", "global_avg_pool", "softmax",
            "concat", "transpose", "gather", "reduce_mean", "batch_norm", "pad",
        ] {
            registry.register(ty, None);
        }
        registry
    }

    /// Declares the overlap hint for an operator type. `None` registers the
    /// type with no overlap opportunity.
    pub fn register(&mut self, ty: &str, overlap: Option<usize>) {
        self.entries.insert(ty.to_string(), overlap);
    }

    pub fn is_known(&self, ty: &str) -> bool {
        self.entries.contains_key(ty)
    }

    /// Candidate input index whose storage `op`'s first output may reuse.
    /// Unregistered types propose no overlap; [`ensure_known`] is the place
    /// where an unknown type becomes an error.
    ///
    /// [`ensure_known`]: OverlapRegistry::ensure_known
    pub fn overlap_input(&self, op: &Op) -> Option<usize> {
        self.entries.get(&op.ty).copied().flatten()
    }

    /// Verifies that every operator type in `graph` has a registered trait.
    pub fn ensure_known(&self, graph: &Graph) -> Result<(), GraphError> {
        for op in graph.ops() {
            if !self.is_known(&op.ty) {
                return Err(GraphError::UnknownOpType(op.ty.clone()));
            }
        }
        Ok(())
    }
}
