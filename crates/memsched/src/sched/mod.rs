//! The hierarchical scheduler.
//!
//! Scheduling proceeds bottom-up: a sequence has exactly one schedule
//! ([`schedule_sequence`]); a group is scheduled either by the cheap
//! reverse-postorder fast path or by a dynamic program over zero-indegree
//! frontiers ([`schedule_group_rpo`], [`schedule_group_dp`]); the top
//! level runs the same frontier DP over sequences and groups, memoizing
//! group results by context ([`HierScheduler`]); and the outer refinement
//! loop dissolves the groups responsible for the current peak and
//! reschedules until a fixed point ([`hierarchical_schedule`]).

mod life;
mod mem;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use rand::Rng;
use tracing::{debug, info};

use crate::graph::{Graph, OpId, ValueId, ValueKind};
use crate::hier::{
    run_passes, try_ungroup_succ, ungroup, Group, HierGraph, HierKind, HierVertId,
    JoinSequencePass, MakeGroupPass,
};
use crate::ops::OverlapRegistry;

pub use life::{estimate_peak, Lifetime, LifetimeStat, BIRTH_INPUT, DEATH_UNBOUNDED};
pub use mem::MemStateVec;

/// Remaining use counts of live values, keyed by value id. The ordered
/// map keeps every derived iteration deterministic.
pub type UseCountMap = BTreeMap<ValueId, u32>;

/// A scheduled operator sequence together with its memory states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedResult {
    pub seq: Vec<OpId>,
    pub states: MemStateVec,
}

impl SchedResult {
    fn empty(init: i64) -> Self {
        SchedResult {
            seq: Vec::new(),
            states: MemStateVec::new(init),
        }
    }

    /// Keeps the better of two results for the same frontier: the smaller
    /// peak wins, ties break toward the lexicographically smaller op list
    /// so collisions resolve deterministically.
    fn update(&mut self, other: SchedResult) {
        let better = other.states.peak() < self.states.peak()
            || (other.states.peak() == self.states.peak() && other.seq < self.seq);
        if better {
            *self = other;
        }
    }
}

/// One dynamic-programming state: the schedule built so far plus the
/// serialized graph position (predecessor counts) and live-value use
/// counts that scheduling resumes from.
#[derive(Debug, Clone)]
struct PartialSchedResult {
    sched: SchedResult,
    pred_cnt: BTreeMap<HierVertId, u32>,
    use_cnt: UseCountMap,
}

impl PartialSchedResult {
    fn update(&mut self, other: PartialSchedResult) {
        let better = other.sched.states.peak() < self.sched.states.peak()
            || (other.sched.states.peak() == self.sched.states.peak()
                && other.sched.seq < self.sched.seq);
        if better {
            *self = other;
        }
    }
}

/// Memoization key for group schedules across refinement iterations: the
/// group plus, for each externally consumed value in canonical order,
/// whether this invocation's remaining uses die inside the group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupContext {
    group: HierVertId,
    kill: Vec<bool>,
}

impl GroupContext {
    pub fn new(gid: HierVertId, group: &Group, use_cnt: &UseCountMap) -> Self {
        let kill = group
            .consumed
            .iter()
            .map(|&(value, num)| {
                let remaining = use_cnt
                    .get(&value)
                    .copied()
                    .expect("group-consumed value missing from use count map");
                num == remaining
            })
            .collect();
        GroupContext { group: gid, kill }
    }
}

/// Moves every key whose count reached zero from `cnt` into the sorted
/// frontier vector `zero`.
fn extract_zero<K: Ord + Copy>(cnt: &mut BTreeMap<K, u32>, zero: &mut Vec<K>) {
    let extracted: Vec<K> = cnt
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&key, _)| key)
        .collect();
    for key in &extracted {
        cnt.remove(key);
    }
    zero.extend(extracted);
    zero.sort_unstable();
}

fn size_i64(graph: &Graph, value: ValueId) -> i64 {
    i64::try_from(graph.value(value).size()).expect("value size exceeds i64 range")
}

/// Schedules a linear operator chain. A sequence has only one possible
/// schedule; this computes the memory states of each step and updates the
/// use count map with the sequence's consumption and production.
pub fn schedule_sequence(
    graph: &Graph,
    registry: &OverlapRegistry,
    ops: &[OpId],
    use_cnt: &mut UseCountMap,
) -> SchedResult {
    let mut states = MemStateVec::new(0);
    for &op_id in ops {
        let op = graph.op(op_id);

        // Consume inputs; values whose count reaches zero die at this op.
        let mut killed: Vec<ValueId> = Vec::new();
        for &input in &op.inputs {
            if graph.value(input).kind == ValueKind::Param {
                continue;
            }
            let cnt = use_cnt
                .get_mut(&input)
                .expect("use count missing for consumed value");
            *cnt = cnt.checked_sub(1).expect("use count underflow");
            if *cnt == 0 && !killed.contains(&input) {
                killed.push(input);
            }
        }

        // The trait's overlap candidate only holds if that input's storage
        // is freed at exactly this transition.
        let mut ovl = registry.overlap_input(op).filter(|&j| j < op.inputs.len());
        if let Some(j) = ovl {
            if !killed.contains(&op.inputs[j]) {
                ovl = None;
            }
        }
        let ovl_val = ovl.map(|j| op.inputs[j]);

        let out_total: i64 = op.outputs.iter().map(|&v| size_i64(graph, v)).sum();
        let inc = match ovl_val {
            None => out_total,
            Some(value) => out_total - size_i64(graph, value),
        };
        let dec: i64 = killed
            .iter()
            .filter(|&&value| Some(value) != ovl_val)
            .map(|&value| size_i64(graph, value))
            .sum();
        states.append(inc, dec);

        for &value in &killed {
            use_cnt.remove(&value);
        }
        for &output in &op.outputs {
            use_cnt.insert(output, graph.value(output).use_count());
        }
    }
    SchedResult {
        seq: ops.to_vec(),
        states,
    }
}

/// Schedules a group by reverse postorder from its exits. Almost always
/// suboptimal but cheap; usable whenever it cannot lift the outer peak.
pub fn schedule_group_rpo(
    graph: &Graph,
    registry: &OverlapRegistry,
    hier: &HierGraph,
    group: &Group,
    use_cnt: &mut UseCountMap,
) -> SchedResult {
    let mut seq = Vec::new();
    let mut states = MemStateVec::new(0);
    for vert in hier.rpo_seqs(group) {
        let result = schedule_sequence(graph, registry, &hier.sequence(vert).ops, use_cnt);
        seq.extend(result.seq);
        states.extend(&result.states);
    }
    SchedResult { seq, states }
}

/// Extends `result` by one scheduled vertex and upserts the new state
/// into `new_memo` under its zero-indegree frontier.
fn update_result(
    hier: &HierGraph,
    vert: HierVertId,
    zero_in: &[HierVertId],
    result: &PartialSchedResult,
    vert_result: SchedResult,
    use_cnt: UseCountMap,
    new_memo: &mut BTreeMap<Vec<HierVertId>, PartialSchedResult>,
) {
    let mut seq = result.sched.seq.clone();
    seq.extend(vert_result.seq);
    let mut states = result.sched.states.clone();
    states.extend(&vert_result.states);

    let mut pred_cnt = result.pred_cnt.clone();
    for &succ in &hier.vert(vert).succs {
        // Boundary vertices never enter the count map; skip them.
        if let Some(cnt) = pred_cnt.get_mut(&succ) {
            *cnt = cnt.checked_sub(1).expect("predecessor count underflow");
        }
    }
    let mut new_zero: Vec<HierVertId> = zero_in.iter().copied().filter(|&v| v != vert).collect();
    extract_zero(&mut pred_cnt, &mut new_zero);

    let new_result = PartialSchedResult {
        sched: SchedResult { seq, states },
        pred_cnt,
        use_cnt,
    };
    match new_memo.entry(new_zero) {
        Entry::Occupied(mut entry) => entry.get_mut().update(new_result),
        Entry::Vacant(entry) => {
            entry.insert(new_result);
        }
    }
}

/// Optimal schedule of a group's sequences by dynamic programming over
/// zero-indegree frontiers. The frontier uniquely determines the set of
/// remaining sequences, so one best partial result per frontier preserves
/// optimality.
pub fn schedule_group_dp(
    graph: &Graph,
    registry: &OverlapRegistry,
    hier: &HierGraph,
    group: &Group,
    use_cnt: &UseCountMap,
) -> SchedResult {
    let mut pred_cnt: BTreeMap<HierVertId, u32> = group
        .seqs
        .iter()
        .map(|&seq| (seq, hier.vert(seq).preds.len() as u32))
        .collect();
    let mut zero_in = Vec::new();
    extract_zero(&mut pred_cnt, &mut zero_in);

    let mut memo = BTreeMap::new();
    memo.insert(
        zero_in,
        PartialSchedResult {
            sched: SchedResult::empty(0),
            pred_cnt,
            use_cnt: use_cnt.clone(),
        },
    );

    for _ in 0..group.seqs.len() {
        let mut new_memo = BTreeMap::new();
        for (zero_in, result) in &memo {
            for &vert in zero_in.iter() {
                let mut use_cnt = result.use_cnt.clone();
                let vert_result =
                    schedule_sequence(graph, registry, &hier.sequence(vert).ops, &mut use_cnt);
                update_result(hier, vert, zero_in, result, vert_result, use_cnt, &mut new_memo);
            }
        }
        memo = new_memo;
    }

    memo.remove(&Vec::new())
        .expect("group frontier not exhausted after |V| DP steps")
        .sched
}

/// Advances a use count map across a group scheduled from a cached
/// result: consumed values lose the group's uses, dead values are erased,
/// produced values enter with their external use counts.
pub fn update_group_use_count(group: &Group, use_cnt: &mut UseCountMap) {
    for &(value, num) in &group.consumed {
        let cnt = use_cnt
            .get_mut(&value)
            .expect("group-consumed value missing from use count map");
        *cnt = cnt.checked_sub(num).expect("use count underflow");
        if *cnt == 0 {
            use_cnt.remove(&value);
        }
    }
    for &(value, num) in &group.produced {
        use_cnt.entry(value).or_insert(num);
    }
}

/// Frontier DP over the top-level hierarchical graph, dispatching to the
/// sequence scheduler and the group scheduler per vertex kind. Group
/// schedules are shared across refinement iterations through a memo keyed
/// by [`GroupContext`].
pub struct HierScheduler<'a> {
    graph: &'a Graph,
    registry: &'a OverlapRegistry,
    hier: &'a HierGraph,
    group_memo: &'a mut HashMap<GroupContext, SchedResult>,
}

impl<'a> HierScheduler<'a> {
    pub fn new(
        graph: &'a Graph,
        registry: &'a OverlapRegistry,
        hier: &'a HierGraph,
        group_memo: &'a mut HashMap<GroupContext, SchedResult>,
    ) -> Self {
        HierScheduler {
            graph,
            registry,
            hier,
            group_memo,
        }
    }

    /// Schedules the whole hierarchical graph, returning the op order and
    /// its memory states (initial stable size: the sum of graph inputs).
    pub fn schedule(&mut self) -> SchedResult {
        let hier = self.hier;

        let mut pred_cnt: BTreeMap<HierVertId, u32> = BTreeMap::new();
        for vert in hier.live_verts() {
            if hier.is_boundary(vert) {
                continue;
            }
            pred_cnt.insert(vert, hier.vert(vert).preds.len() as u32);
        }
        let n_vert = pred_cnt.len();

        let mut use_cnt = UseCountMap::new();
        for &input in &hier.inputs {
            for &succ in &hier.vert(input).succs {
                if let Some(cnt) = pred_cnt.get_mut(&succ) {
                    *cnt = cnt.checked_sub(1).expect("predecessor count underflow");
                }
            }
            if let HierKind::Input(value) = hier.vert(input).kind {
                use_cnt.insert(value, self.graph.value(value).use_count());
            }
        }

        let init_size =
            i64::try_from(self.graph.input_size()).expect("input sizes exceed i64 range");
        let mut zero_in = Vec::new();
        extract_zero(&mut pred_cnt, &mut zero_in);
        let mut memo = BTreeMap::new();
        memo.insert(
            zero_in,
            PartialSchedResult {
                sched: SchedResult::empty(init_size),
                pred_cnt,
                use_cnt,
            },
        );

        for _ in 0..n_vert {
            let mut new_memo = BTreeMap::new();
            for (zero_in, result) in &memo {
                for &vert in zero_in.iter() {
                    let mut use_cnt = result.use_cnt.clone();
                    let vert_result =
                        self.schedule_vertex(vert, &mut use_cnt, &result.sched.states);
                    update_result(hier, vert, zero_in, result, vert_result, use_cnt, &mut new_memo);
                }
            }
            memo = new_memo;
        }

        memo.remove(&Vec::new())
            .expect("schedule frontier not exhausted after |V| DP steps")
            .sched
    }

    fn schedule_vertex(
        &mut self,
        vert: HierVertId,
        use_cnt: &mut UseCountMap,
        prev_states: &MemStateVec,
    ) -> SchedResult {
        let hier = self.hier;
        match &hier.vert(vert).kind {
            HierKind::Sequence(seq) => {
                schedule_sequence(self.graph, self.registry, &seq.ops, use_cnt)
            }
            HierKind::Group(group) => {
                let ctx = GroupContext::new(vert, group, use_cnt);
                if let Some(cached) = self.group_memo.get(&ctx) {
                    let result = cached.clone();
                    update_group_use_count(group, use_cnt);
                    return result;
                }

                // Fast path: accept reverse postorder whenever this group,
                // placed here, cannot lift the global peak.
                let mut rpo_use_cnt = use_cnt.clone();
                let rpo =
                    schedule_group_rpo(self.graph, self.registry, hier, group, &mut rpo_use_cnt);
                if rpo.states.peak() + prev_states.latest() <= prev_states.peak() {
                    *use_cnt = rpo_use_cnt;
                    return rpo;
                }

                let dp = schedule_group_dp(self.graph, self.registry, hier, group, use_cnt);
                update_group_use_count(group, use_cnt);
                self.group_memo.insert(ctx, dp.clone());
                dp
            }
            HierKind::Input(_) | HierKind::Output(_) => {
                unreachable!("boundary vertex reached the scheduler")
            }
        }
    }
}

/// Builds the hierarchical view of `graph`, runs the construction passes,
/// and schedules with peak-driven refinement. Returns a topological order
/// of all operators minimizing the peak working-set size.
pub fn hierarchical_schedule(graph: &Graph, registry: &OverlapRegistry) -> Result<Vec<OpId>> {
    registry.ensure_known(graph)?;
    let mut hier = HierGraph::from_graph(graph);
    let passes: &[&dyn crate::hier::HierPass] = &[&JoinSequencePass, &MakeGroupPass];
    run_passes(&mut hier, graph, passes);
    Ok(refine_schedule(graph, registry, &mut hier))
}

/// The outer refinement loop over a prebuilt hierarchy: schedule, find the
/// values alive at the peak, dissolve the groups containing or directly
/// following their defining sequences, repeat. Terminates once the peak,
/// its value set, and the hierarchy all stop changing; since groups only
/// dissolve, this takes at most one iteration per group plus one.
pub fn refine_schedule(
    graph: &Graph,
    registry: &OverlapRegistry,
    hier: &mut HierGraph,
) -> Vec<OpId> {
    let mut group_memo: HashMap<GroupContext, SchedResult> = HashMap::new();
    let mut last_sched: Vec<OpId> = Vec::new();
    let mut last_peak = u64::MAX;
    let mut last_peak_values: BTreeSet<ValueId> = BTreeSet::new();
    let mut iteration = 0usize;

    loop {
        iteration += 1;
        let result = HierScheduler::new(graph, registry, hier, &mut group_memo).schedule();
        if sched_stats_enabled() {
            log_sched_stats(graph, &result);
        }

        let stat = LifetimeStat::compute(&result.seq, graph);
        let peak = stat.peak();
        let peak_values = stat.peak_values(graph);
        assert!(
            peak == 0 || !peak_values.is_empty(),
            "non-zero peak with empty peak value set"
        );
        info!(
            iteration,
            peak,
            peak_values = peak_values.len(),
            "scheduled hierarchical graph"
        );

        // Sequences defining the values alive at the peak.
        let mut rel_seqs: BTreeSet<HierVertId> = BTreeSet::new();
        for &value in &peak_values {
            if let Some(def) = graph.value(value).def {
                rel_seqs.insert(hier.op_to_seq[&def]);
            }
        }

        let mut changed = false;
        for &seq in &rel_seqs {
            if let Some(gid) = hier.sequence(seq).group {
                ungroup(hier, gid);
                changed = true;
                debug!(group = gid.0, "ungrouped peak region");
            }
            changed |= try_ungroup_succ(hier, seq);
        }

        if peak == last_peak && peak_values == last_peak_values && !changed {
            break;
        }
        last_sched = result.seq;
        last_peak = peak;
        last_peak_values = peak_values;
    }

    last_sched
}

/// Plain reverse postorder of the operator graph: a valid topological
/// order with no memory awareness, used as a baseline.
pub fn reverse_post_order(graph: &Graph) -> Vec<OpId> {
    fn visit(graph: &Graph, op: OpId, visited: &mut [bool], order: &mut Vec<OpId>) {
        if visited[op.0 as usize] {
            return;
        }
        visited[op.0 as usize] = true;
        for &pred in &graph.op(op).preds {
            visit(graph, pred, visited, order);
        }
        order.push(op);
    }

    let mut visited = vec![false; graph.num_ops()];
    let mut order = Vec::with_capacity(graph.num_ops());
    for op in graph.ops() {
        visit(graph, op.id, &mut visited, &mut order);
    }
    order
}

/// Uniformly random topological order of the operator graph.
pub fn random_sample<R: Rng>(graph: &Graph, rng: &mut R) -> Vec<OpId> {
    let mut pred_cnt: BTreeMap<OpId, u32> = graph
        .ops()
        .map(|op| (op.id, op.preds.len() as u32))
        .collect();
    let mut zero_pred: Vec<OpId> = Vec::new();
    extract_zero(&mut pred_cnt, &mut zero_pred);

    let mut sched = Vec::with_capacity(graph.num_ops());
    while !zero_pred.is_empty() {
        let idx = rng.gen_range(0..zero_pred.len());
        let op = zero_pred.remove(idx);
        sched.push(op);
        for &succ in &graph.op(op).succs {
            if let Some(cnt) = pred_cnt.get_mut(&succ) {
                *cnt = cnt.checked_sub(1).expect("predecessor count underflow");
            }
        }
        extract_zero(&mut pred_cnt, &mut zero_pred);
    }
    sched
}

fn sched_stats_enabled() -> bool {
    std::env::var("MEMSCHED_SCHED_STATS").is_ok()
}

fn log_sched_stats(graph: &Graph, result: &SchedResult) {
    for (op, (transient, stable)) in result.seq.iter().zip(result.states.iter()) {
        println!(
            "[sched] {:<18} {:>10}^ {:>10}_",
            graph.op(*op).ty,
            transient,
            stable
        );
    }
}
