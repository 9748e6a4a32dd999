//! Construction passes run over the hierarchical graph before scheduling.

use tracing::debug;

use crate::graph::Graph;

use super::{add_unique, HierGraph, HierVertId};

/// A structural pass over the hierarchical graph.
pub trait HierPass {
    fn name(&self) -> &'static str;
    /// Runs the pass; returns whether the hierarchy changed.
    fn run(&self, hier: &mut HierGraph, graph: &Graph) -> bool;
}

/// Runs `passes` in order, logging each step.
pub fn run_passes(hier: &mut HierGraph, graph: &Graph, passes: &[&dyn HierPass]) {
    for pass in passes {
        let changed = pass.run(hier, graph);
        debug!(pass = pass.name(), changed, "ran hierarchy pass");
    }
}

/// Merges maximal linear chains of sequences: a sequence with a unique
/// sequence successor whose only predecessor it is absorbs that successor.
#[derive(Default)]
pub struct JoinSequencePass;

impl HierPass for JoinSequencePass {
    fn name(&self) -> &'static str {
        "join-sequence"
    }

    fn run(&self, hier: &mut HierGraph, _graph: &Graph) -> bool {
        let mut changed = false;
        loop {
            let Some((u, v)) = find_join_candidate(hier) else {
                break;
            };
            merge_sequences(hier, u, v);
            changed = true;
        }
        changed
    }
}

fn find_join_candidate(hier: &HierGraph) -> Option<(HierVertId, HierVertId)> {
    for u in hier.live_verts() {
        if !hier.is_sequence(u) {
            continue;
        }
        let succs = &hier.vert(u).succs;
        if succs.len() != 1 {
            continue;
        }
        let v = succs[0];
        if hier.is_sequence(v) && hier.vert(v).preds.len() == 1 {
            return Some((u, v));
        }
    }
    None
}

/// Absorbs sequence `v` into its sole predecessor `u`, leaving `v` as an
/// unreachable tombstone.
fn merge_sequences(hier: &mut HierGraph, u: HierVertId, v: HierVertId) {
    let moved_ops = std::mem::take(&mut hier.sequence_mut(v).ops);
    for &op in &moved_ops {
        hier.op_to_seq.insert(op, u);
    }
    hier.sequence_mut(u).ops.extend(moved_ops);

    let v_succs = std::mem::take(&mut hier.vert_mut(v).succs);
    for &w in &v_succs {
        let preds = &mut hier.vert_mut(w).preds;
        preds.retain(|&p| p != v);
        add_unique(preds, u);
    }
    hier.vert_mut(v).preds.clear();
    hier.vert_mut(u).succs = v_succs;
}

/// Collapses fork/join diamonds into groups: when every successor of a
/// fork sequence is a sequence whose only predecessor is the fork and
/// whose only successor is one shared join sequence, the branch sequences
/// become a group. Runs after [`JoinSequencePass`], so each branch is a
/// single (already maximal) sequence.
#[derive(Default)]
pub struct MakeGroupPass;

impl HierPass for MakeGroupPass {
    fn name(&self) -> &'static str {
        "make-group"
    }

    fn run(&self, hier: &mut HierGraph, graph: &Graph) -> bool {
        let mut changed = false;
        for fork in hier.live_verts() {
            if !hier.is_sequence(fork) {
                continue;
            }
            let branches = hier.vert(fork).succs.clone();
            if branches.len() < 2 {
                continue;
            }
            if let Some(join) = diamond_join(hier, fork, &branches) {
                if hier.is_sequence(join) {
                    hier.group_sequences(graph, &branches)
                        .expect("diamond branches are non-empty sequences");
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Returns the shared join vertex if `branches` form a diamond rooted at
/// `fork`: every branch is an ungrouped single-entry single-exit sequence
/// and all branches converge on the same successor.
fn diamond_join(hier: &HierGraph, fork: HierVertId, branches: &[HierVertId]) -> Option<HierVertId> {
    let mut join = None;
    for &branch in branches {
        if !hier.is_sequence(branch) || hier.sequence(branch).group.is_some() {
            return None;
        }
        let vert = hier.vert(branch);
        if vert.preds != [fork] || vert.succs.len() != 1 {
            return None;
        }
        match join {
            None => join = Some(vert.succs[0]),
            Some(j) if j == vert.succs[0] => {}
            Some(_) => return None,
        }
    }
    join
}
