//! Value lifetime analysis over a finished schedule.

use std::collections::{BTreeSet, HashMap};

use crate::graph::{Graph, OpId, ValueId, ValueKind, ValueUse};

/// Schedule position at which a graph input is born.
pub const BIRTH_INPUT: i64 = -1;
/// Death position of a value consumed by a graph output.
pub const DEATH_UNBOUNDED: i64 = i64::MAX;

/// Lifetime interval of one value in schedule positions. A value is alive
/// at position `p` iff `birth <= p <= death`: an input is still resident
/// while its last user executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub value: ValueId,
    pub birth: i64,
    pub death: i64,
}

/// Per-position live sets and sizes derived from a schedule.
///
/// PARAM values are excluded from all totals; they may still carry a
/// lifetime interval.
#[derive(Debug, Clone)]
pub struct LifetimeStat {
    lifetimes: Vec<Lifetime>,
    sizes: Vec<u64>,
}

impl LifetimeStat {
    /// Computes lifetimes and per-position totals for `sched`, which must
    /// cover every operator of `graph` exactly once.
    pub fn compute(sched: &[OpId], graph: &Graph) -> Self {
        let mut pos_of: HashMap<OpId, i64> = HashMap::with_capacity(sched.len());
        for (pos, &op) in sched.iter().enumerate() {
            pos_of.insert(op, pos as i64);
        }

        let mut lifetimes = Vec::new();
        for value in graph.values() {
            let birth = match value.def {
                Some(def) => match pos_of.get(&def) {
                    Some(&pos) => pos,
                    None => continue,
                },
                None => BIRTH_INPUT,
            };
            let mut death = birth;
            for use_site in &value.uses {
                match use_site {
                    ValueUse::Op(user) => {
                        if let Some(&pos) = pos_of.get(user) {
                            death = death.max(pos);
                        }
                    }
                    ValueUse::Output => death = DEATH_UNBOUNDED,
                }
            }
            lifetimes.push(Lifetime {
                value: value.id,
                birth,
                death,
            });
        }

        let mut sizes = vec![0u64; sched.len()];
        for lifetime in &lifetimes {
            if graph.value(lifetime.value).kind == ValueKind::Param {
                continue;
            }
            let size = graph.value(lifetime.value).size();
            let first = lifetime.birth.max(0);
            let last = lifetime.death.min(sched.len() as i64 - 1);
            for pos in first..=last {
                sizes[pos as usize] += size;
            }
        }

        LifetimeStat { lifetimes, sizes }
    }

    /// Lifetime intervals of all scheduled values.
    pub fn lifetimes(&self) -> &[Lifetime] {
        &self.lifetimes
    }

    /// Lifetime of a single value, if it was scheduled.
    pub fn lifetime(&self, value: ValueId) -> Option<Lifetime> {
        self.lifetimes.iter().copied().find(|lt| lt.value == value)
    }

    /// Total live size at each schedule position.
    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }

    /// Maximum total live size over the schedule.
    pub fn peak(&self) -> u64 {
        self.sizes.iter().copied().max().unwrap_or(0)
    }

    /// Non-param values alive at any position whose total equals the peak.
    pub fn peak_values(&self, graph: &Graph) -> BTreeSet<ValueId> {
        let peak = self.peak();
        let mut values = BTreeSet::new();
        for (pos, &size) in self.sizes.iter().enumerate() {
            if size != peak {
                continue;
            }
            let pos = pos as i64;
            for lifetime in &self.lifetimes {
                if lifetime.birth <= pos
                    && pos <= lifetime.death
                    && graph.value(lifetime.value).kind != ValueKind::Param
                {
                    values.insert(lifetime.value);
                }
            }
        }
        values
    }
}

/// Peak working-set size of `sched`: the maximum, over positions, of the
/// total size of values live at that position (PARAM values excluded).
pub fn estimate_peak(sched: &[OpId], graph: &Graph) -> u64 {
    LifetimeStat::compute(sched, graph).peak()
}
