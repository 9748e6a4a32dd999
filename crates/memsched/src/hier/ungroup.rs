//! Group dissolution: restores the cross-group edges a group hid when it
//! formed, using the pre-grouping connectivity snapshots.

use super::{add_unique, remove_item, HierGraph, HierKind, HierVertId};

/// Matches a dissolved group's frontier sequences against the snapshots of
/// its external neighbors, producing the `(frontier, neighbor)` edge pairs
/// to restore. `prev_of` selects which snapshot side of a plain neighbor
/// to consult; `neighbor_frontier` selects which frontier of a neighbor
/// that is itself a group.
fn find_edges_to_restore(
    hier: &HierGraph,
    frontier: &[HierVertId],
    neighbors: &[HierVertId],
    prev_of: impl Fn(&HierGraph, HierVertId) -> Vec<HierVertId>,
    neighbor_frontier: impl Fn(&HierGraph, HierVertId) -> Vec<HierVertId>,
) -> Vec<(HierVertId, Vec<HierVertId>)> {
    let mut restore: Vec<(HierVertId, Vec<HierVertId>)> =
        frontier.iter().map(|&front| (front, Vec::new())).collect();

    for &neighbor in neighbors {
        if hier.is_group(neighbor) {
            for member in neighbor_frontier(hier, neighbor) {
                for out in prev_of(hier, member) {
                    if let Some(entry) = restore.iter_mut().find(|(front, _)| *front == out) {
                        add_unique(&mut entry.1, neighbor);
                    }
                }
            }
        } else {
            for out in prev_of(hier, neighbor) {
                if let Some(entry) = restore.iter_mut().find(|(front, _)| *front == out) {
                    add_unique(&mut entry.1, neighbor);
                }
            }
        }
    }

    restore
}

/// Dissolves `gid` into its member sequences, reconnecting the members'
/// frontier edges to the group's external neighbors. After the call the
/// hierarchy is a DAG whose flattening to operators is isomorphic to the
/// original graph; the group vertex itself becomes an unreachable
/// tombstone.
pub fn ungroup(hier: &mut HierGraph, gid: HierVertId) {
    let group = hier.group(gid).clone();
    let group_preds = hier.vert(gid).preds.clone();
    let group_succs = hier.vert(gid).succs.clone();

    // Reconnect predecessors with the input frontier.
    let in_restore = find_edges_to_restore(
        hier,
        &group.in_front,
        &group_preds,
        |h, v| h.vert(v).prev_succs.clone(),
        |h, v| h.group(v).out_front.clone(),
    );
    for (front, neighbors) in in_restore {
        for neighbor in neighbors {
            add_unique(&mut hier.vert_mut(front).preds, neighbor);
            let vert = hier.vert_mut(neighbor);
            remove_item(&mut vert.succs, gid);
            add_unique(&mut vert.succs, front);
        }
    }

    // Reconnect successors with the output frontier.
    let out_restore = find_edges_to_restore(
        hier,
        &group.out_front,
        &group_succs,
        |h, v| h.vert(v).prev_preds.clone(),
        |h, v| h.group(v).in_front.clone(),
    );
    for (front, neighbors) in out_restore {
        for neighbor in neighbors {
            add_unique(&mut hier.vert_mut(front).succs, neighbor);
            let vert = hier.vert_mut(neighbor);
            remove_item(&mut vert.preds, gid);
            add_unique(&mut vert.preds, front);
        }
    }

    // Detach the members and tombstone the group vertex.
    for &seq in &group.seqs {
        hier.sequence_mut(seq).group = None;
    }
    let vert = hier.vert_mut(gid);
    vert.preds.clear();
    vert.succs.clear();
    match &mut vert.kind {
        HierKind::Group(group) => group.seqs.clear(),
        _ => unreachable!("ungroup target must be a group"),
    }
}

/// Dissolves every group that currently appears as a direct successor of
/// `seq`. Deliberately a single pass over a snapshot of the successor
/// list; the outer refinement loop provides the fixed point.
pub fn try_ungroup_succ(hier: &mut HierGraph, seq: HierVertId) -> bool {
    let mut changed = false;
    let succs = hier.vert(seq).succs.clone();
    for succ in succs {
        if hier.is_group(succ) && !hier.is_dead(succ) {
            ungroup(hier, succ);
            changed = true;
        }
    }
    changed
}
