//! Two-level hierarchical view of a dataflow graph.
//!
//! Linear chains of operators collapse into [`Sequence`] vertices and
//! branching regions of sequences collapse into [`Group`] vertices. All
//! vertices live in a single arena owned by the [`HierGraph`]; `succs` is
//! the owning direction of traversal and `preds` holds back-references,
//! both as plain arena indices. `prev_preds`/`prev_succs` snapshot the
//! pre-grouping connectivity once, immediately before the first group
//! forms, and are read-only afterwards; the ungroup operation uses them to
//! restore the edges a group hid.

mod passes;
mod ungroup;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::graph::{Graph, GraphError, OpId, ValueId, ValueKind, ValueUse};

pub use passes::{run_passes, HierPass, JoinSequencePass, MakeGroupPass};
pub use ungroup::{try_ungroup_succ, ungroup};

/// Stable identifier of a vertex in the hierarchical graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HierVertId(pub u32);

/// A non-empty maximal chain of operators with a fixed internal order.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub ops: Vec<OpId>,
    /// Back-reference to the containing group, if any.
    pub group: Option<HierVertId>,
}

/// A region of sequences scheduled as a unit.
#[derive(Debug, Clone)]
pub struct Group {
    /// Member sequences, sorted by vertex id.
    pub seqs: Vec<HierVertId>,
    /// Members with predecessors outside the group.
    pub in_front: Vec<HierVertId>,
    /// Members with successors outside the group.
    pub out_front: Vec<HierVertId>,
    /// Members with no successor inside the group; reverse-postorder
    /// traversal of the group starts here.
    pub exits: Vec<HierVertId>,
    /// Uses by group members of externally produced values, sorted by
    /// value id. The sort order is the canonical order of the group
    /// context kill-vector.
    pub consumed: Vec<(ValueId, u32)>,
    /// External use counts of values produced inside the group, sorted by
    /// value id.
    pub produced: Vec<(ValueId, u32)>,
}

/// Vertex payload discriminating the four hierarchical vertex kinds.
#[derive(Debug, Clone)]
pub enum HierKind {
    /// Wraps a graph input value.
    Input(ValueId),
    /// Wraps a graph output value.
    Output(ValueId),
    Sequence(Sequence),
    Group(Group),
}

#[derive(Debug, Clone)]
pub struct HierVertex {
    pub kind: HierKind,
    pub preds: Vec<HierVertId>,
    pub succs: Vec<HierVertId>,
    /// Connectivity snapshot taken before the first group formed.
    pub prev_preds: Vec<HierVertId>,
    pub prev_succs: Vec<HierVertId>,
}

/// The hierarchical graph: vertex arena plus boundary lists and the
/// operator-to-sequence index.
#[derive(Debug, Clone)]
pub struct HierGraph {
    verts: Vec<HierVertex>,
    pub inputs: Vec<HierVertId>,
    pub outputs: Vec<HierVertId>,
    pub op_to_seq: HashMap<OpId, HierVertId>,
    snapshots_taken: bool,
}

impl HierGraph {
    /// Builds the initial hierarchical view of `graph`: one sequence per
    /// operator, one boundary vertex per graph input and output, edges
    /// mirroring the operator graph.
    pub fn from_graph(graph: &Graph) -> Self {
        let mut hier = HierGraph {
            verts: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            op_to_seq: HashMap::new(),
            snapshots_taken: false,
        };

        for &input in &graph.inputs {
            let id = hier.push_vert(HierKind::Input(input));
            hier.inputs.push(id);
        }
        for op in graph.ops() {
            let id = hier.push_vert(HierKind::Sequence(Sequence {
                ops: vec![op.id],
                group: None,
            }));
            hier.op_to_seq.insert(op.id, id);
        }
        for &output in &graph.outputs {
            let id = hier.push_vert(HierKind::Output(output));
            hier.outputs.push(id);
        }

        for op in graph.ops() {
            let to = hier.op_to_seq[&op.id];
            for &pred in &op.preds {
                let from = hier.op_to_seq[&pred];
                hier.add_edge(from, to);
            }
        }
        for (idx, &input) in graph.inputs.iter().enumerate() {
            let from = hier.inputs[idx];
            for use_site in &graph.value(input).uses {
                match use_site {
                    ValueUse::Op(op) => {
                        let to = hier.op_to_seq[op];
                        hier.add_edge(from, to);
                    }
                    ValueUse::Output => {}
                }
            }
        }
        for (idx, &output) in graph.outputs.iter().enumerate() {
            let to = hier.outputs[idx];
            match graph.value(output).def {
                Some(def) => {
                    let from = hier.op_to_seq[&def];
                    hier.add_edge(from, to);
                }
                None => {
                    if let Some(pos) = graph.inputs.iter().position(|&v| v == output) {
                        let from = hier.inputs[pos];
                        hier.add_edge(from, to);
                    }
                }
            }
        }

        hier
    }

    pub fn vert(&self, id: HierVertId) -> &HierVertex {
        &self.verts[id.0 as usize]
    }

    pub(crate) fn vert_mut(&mut self, id: HierVertId) -> &mut HierVertex {
        &mut self.verts[id.0 as usize]
    }

    pub fn num_verts(&self) -> usize {
        self.verts.len()
    }

    pub fn is_sequence(&self, id: HierVertId) -> bool {
        matches!(self.vert(id).kind, HierKind::Sequence(_))
    }

    pub fn is_group(&self, id: HierVertId) -> bool {
        matches!(self.vert(id).kind, HierKind::Group(_))
    }

    pub fn is_boundary(&self, id: HierVertId) -> bool {
        matches!(self.vert(id).kind, HierKind::Input(_) | HierKind::Output(_))
    }

    /// Borrows the sequence payload of `id`; panics on other kinds.
    pub fn sequence(&self, id: HierVertId) -> &Sequence {
        match &self.vert(id).kind {
            HierKind::Sequence(seq) => seq,
            _ => panic!("hierarchical vertex {id:?} is not a sequence"),
        }
    }

    pub(crate) fn sequence_mut(&mut self, id: HierVertId) -> &mut Sequence {
        match &mut self.vert_mut(id).kind {
            HierKind::Sequence(seq) => seq,
            _ => panic!("hierarchical vertex {id:?} is not a sequence"),
        }
    }

    /// Borrows the group payload of `id`; panics on other kinds.
    pub fn group(&self, id: HierVertId) -> &Group {
        match &self.vert(id).kind {
            HierKind::Group(group) => group,
            _ => panic!("hierarchical vertex {id:?} is not a group"),
        }
    }

    /// All vertices reachable in the current hierarchy, in a deterministic
    /// breadth-first order. Vertices hidden inside groups and dissolved
    /// tombstones are excluded.
    pub fn live_verts(&self) -> Vec<HierVertId> {
        let mut roots = self.inputs.clone();
        for (idx, vert) in self.verts.iter().enumerate() {
            let id = HierVertId(idx as u32);
            if self.is_dead(id) || !vert.preds.is_empty() {
                continue;
            }
            match &vert.kind {
                HierKind::Sequence(seq) if seq.group.is_none() => roots.push(id),
                HierKind::Group(_) => roots.push(id),
                _ => {}
            }
        }

        let mut seen = vec![false; self.verts.len()];
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        for root in roots {
            if !seen[root.0 as usize] {
                seen[root.0 as usize] = true;
                queue.push_back(root);
            }
        }
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &succ in &self.vert(id).succs {
                if !seen[succ.0 as usize] {
                    seen[succ.0 as usize] = true;
                    queue.push_back(succ);
                }
            }
        }
        order
    }

    /// Topological order of a group's member sequences: reverse postorder
    /// of a depth-first search rooted at the group's exits and walking
    /// predecessor edges.
    pub fn rpo_seqs(&self, group: &Group) -> Vec<HierVertId> {
        let members: HashSet<HierVertId> = group.seqs.iter().copied().collect();
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for &exit in &group.exits {
            self.rpo_visit(exit, &members, &mut visited, &mut order);
        }
        order
    }

    fn rpo_visit(
        &self,
        vert: HierVertId,
        members: &HashSet<HierVertId>,
        visited: &mut HashSet<HierVertId>,
        order: &mut Vec<HierVertId>,
    ) {
        if !visited.insert(vert) {
            return;
        }
        for &pred in &self.vert(vert).preds {
            if members.contains(&pred) {
                self.rpo_visit(pred, members, visited, order);
            }
        }
        order.push(vert);
    }

    /// Collapses `members` (ungrouped, non-empty sequences) into a new
    /// group vertex. External edges of the members move to the group;
    /// internal edges are kept for scheduling within the group. Returns
    /// the group's id.
    pub fn group_sequences(
        &mut self,
        graph: &Graph,
        members: &[HierVertId],
    ) -> Result<HierVertId, GraphError> {
        let mut members: Vec<HierVertId> = members.to_vec();
        members.sort_unstable();
        let member_set: HashSet<HierVertId> = members.iter().copied().collect();
        for &m in &members {
            let seq = self.sequence(m);
            if seq.ops.is_empty() {
                return Err(GraphError::EmptySequence(m));
            }
            assert!(seq.group.is_none(), "sequence {m:?} is already grouped");
        }

        self.take_snapshots();

        let member_ops: HashSet<OpId> = members
            .iter()
            .flat_map(|&m| self.sequence(m).ops.iter().copied())
            .collect();

        // Use-count multisets crossing the group boundary.
        let mut consumed: BTreeMap<ValueId, u32> = BTreeMap::new();
        let mut produced: BTreeMap<ValueId, u32> = BTreeMap::new();
        for &m in &members {
            for &op_id in &self.sequence(m).ops {
                let op = graph.op(op_id);
                for &input in &op.inputs {
                    let value = graph.value(input);
                    if value.kind == ValueKind::Param {
                        continue;
                    }
                    let external = match value.def {
                        Some(def) => !member_ops.contains(&def),
                        None => true,
                    };
                    if external {
                        *consumed.entry(input).or_insert(0) += 1;
                    }
                }
                for &output in &op.outputs {
                    let external_uses = graph
                        .value(output)
                        .uses
                        .iter()
                        .filter(|use_site| match use_site {
                            ValueUse::Op(user) => !member_ops.contains(user),
                            ValueUse::Output => true,
                        })
                        .count() as u32;
                    if external_uses > 0 {
                        produced.insert(output, external_uses);
                    }
                }
            }
        }

        let mut in_front = Vec::new();
        let mut out_front = Vec::new();
        let mut exits = Vec::new();
        let mut ext_preds = Vec::new();
        let mut ext_succs = Vec::new();
        for &m in &members {
            let vert = self.vert(m);
            let has_ext_pred = vert.preds.iter().any(|p| !member_set.contains(p));
            let has_ext_succ = vert.succs.iter().any(|s| !member_set.contains(s));
            let has_int_succ = vert.succs.iter().any(|s| member_set.contains(s));
            if has_ext_pred {
                in_front.push(m);
            }
            if has_ext_succ {
                out_front.push(m);
            }
            if !has_int_succ {
                exits.push(m);
            }
            for &p in &vert.preds {
                if !member_set.contains(&p) {
                    add_unique(&mut ext_preds, p);
                }
            }
            for &s in &vert.succs {
                if !member_set.contains(&s) {
                    add_unique(&mut ext_succs, s);
                }
            }
        }

        let gid = self.push_vert(HierKind::Group(Group {
            seqs: members.clone(),
            in_front,
            out_front,
            exits,
            consumed: consumed.into_iter().collect(),
            produced: produced.into_iter().collect(),
        }));

        // Rewire: the group takes over all external edges of its members.
        for &p in &ext_preds {
            let vert = self.vert_mut(p);
            vert.succs.retain(|s| !member_set.contains(s));
            add_unique(&mut vert.succs, gid);
        }
        for &s in &ext_succs {
            let vert = self.vert_mut(s);
            vert.preds.retain(|p| !member_set.contains(p));
            add_unique(&mut vert.preds, gid);
        }
        self.vert_mut(gid).preds = ext_preds;
        self.vert_mut(gid).succs = ext_succs;
        for &m in &members {
            let vert = self.vert_mut(m);
            vert.preds.retain(|p| member_set.contains(p));
            vert.succs.retain(|s| member_set.contains(s));
            self.sequence_mut(m).group = Some(gid);
        }

        Ok(gid)
    }

    fn take_snapshots(&mut self) {
        if self.snapshots_taken {
            return;
        }
        for vert in &mut self.verts {
            vert.prev_preds = vert.preds.clone();
            vert.prev_succs = vert.succs.clone();
        }
        self.snapshots_taken = true;
    }

    pub(crate) fn is_dead(&self, id: HierVertId) -> bool {
        match &self.vert(id).kind {
            HierKind::Sequence(seq) => seq.ops.is_empty(),
            HierKind::Group(group) => group.seqs.is_empty(),
            _ => false,
        }
    }

    fn push_vert(&mut self, kind: HierKind) -> HierVertId {
        let id = HierVertId(self.verts.len() as u32);
        self.verts.push(HierVertex {
            kind,
            preds: Vec::new(),
            succs: Vec::new(),
            prev_preds: Vec::new(),
            prev_succs: Vec::new(),
        });
        id
    }

    pub(crate) fn add_edge(&mut self, from: HierVertId, to: HierVertId) {
        add_unique(&mut self.vert_mut(from).succs, to);
        add_unique(&mut self.vert_mut(to).preds, from);
    }
}

pub(crate) fn add_unique(list: &mut Vec<HierVertId>, id: HierVertId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

pub(crate) fn remove_item(list: &mut Vec<HierVertId>, id: HierVertId) {
    list.retain(|&entry| entry != id);
}
