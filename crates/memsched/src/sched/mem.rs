//! Running record of working-set size along a schedule.

/// Memory states of a scheduled operator sequence: one
/// `(transient, stable)` pair per operator plus the initial stable size.
///
/// Scheduling an operator first materializes its outputs on top of the
/// previous stable size (the transient peak), then releases the inputs it
/// killed (the stable size after). States are stored as absolute signed
/// sizes: vectors local to a group start at zero and legally go negative
/// when the group frees values produced outside of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemStateVec {
    init: i64,
    states: Vec<(i64, i64)>,
}

impl MemStateVec {
    pub fn new(init: i64) -> Self {
        MemStateVec {
            init,
            states: Vec::new(),
        }
    }

    /// Stable size before the first operator.
    pub fn init(&self) -> i64 {
        self.init
    }

    /// Current stable size: the last stable state, or the initial size for
    /// an empty vector.
    pub fn latest(&self) -> i64 {
        self.states.last().map(|&(_, stable)| stable).unwrap_or(self.init)
    }

    /// Maximum size ever held: the largest transient peak, or the initial
    /// size for an empty vector.
    pub fn peak(&self) -> i64 {
        self.states
            .iter()
            .map(|&(transient, _)| transient)
            .fold(self.init, i64::max)
    }

    /// Pushes one scheduled operator: sizes grow by `inc` at the
    /// transition to the transient state and shrink by `dec` at the
    /// transition to the stable state.
    pub fn append(&mut self, inc: i64, dec: i64) {
        let transient = checked_add(self.latest(), inc);
        let stable = checked_sub(transient, dec);
        self.states.push((transient, stable));
    }

    /// Appends `other`'s deltas, rebased onto this vector's current stable
    /// size. Concatenation commutes with peaks:
    /// `a.extend(&b)` makes `a.peak()` equal
    /// `max(old_peak, old_latest + (b.peak() - b.init()))`.
    pub fn extend(&mut self, other: &MemStateVec) {
        let offset = checked_sub(self.latest(), other.init);
        for &(transient, stable) in &other.states {
            self.states
                .push((checked_add(transient, offset), checked_add(stable, offset)));
        }
    }

    pub fn swap(&mut self, other: &mut MemStateVec) {
        std::mem::swap(self, other);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Iterates the `(transient, stable)` pairs in schedule order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.states.iter().copied()
    }
}

fn checked_add(lhs: i64, rhs: i64) -> i64 {
    lhs.checked_add(rhs)
        .expect("memory accounting overflowed i64; widen the size type")
}

fn checked_sub(lhs: i64, rhs: i64) -> i64 {
    lhs.checked_sub(rhs)
        .expect("memory accounting overflowed i64; widen the size type")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_vector_reports_initial_size() {
        let states = MemStateVec::new(8);
        assert_eq!(states.latest(), 8);
        assert_eq!(states.peak(), 8);
        assert!(states.is_empty());
    }

    #[test]
    fn append_tracks_transient_and_stable_sizes() {
        let mut states = MemStateVec::new(4);
        states.append(3, 2); // transient 7, stable 5
        states.append(1, 4); // transient 6, stable 2
        assert_eq!(states.iter().collect::<Vec<_>>(), vec![(7, 5), (6, 2)]);
        assert_eq!(states.latest(), 2);
        assert_eq!(states.peak(), 7);
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn group_local_vectors_may_go_negative() {
        let mut states = MemStateVec::new(0);
        states.append(1, 5); // a group op freeing externally produced values
        assert_eq!(states.latest(), -4);
        assert_eq!(states.peak(), 1);
    }

    #[test]
    fn extend_rebases_onto_the_current_stable_size() {
        let mut a = MemStateVec::new(2);
        a.append(6, 5); // transient 8, stable 3

        let mut b = MemStateVec::new(0);
        b.append(4, 1); // transient 4, stable 3
        b.append(1, 2); // transient 4, stable 2

        let b_peak_relative = b.peak() - b.init();
        let expected = std::cmp::max(a.peak(), a.latest() + b_peak_relative);

        a.extend(&b);
        assert_eq!(a.peak(), expected);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![(8, 3), (7, 6), (7, 5)]);
        assert_eq!(a.latest(), 5);
    }

    #[test]
    fn swap_exchanges_whole_vectors() {
        let mut a = MemStateVec::new(1);
        a.append(2, 0);
        let mut b = MemStateVec::new(9);

        a.swap(&mut b);
        assert_eq!(a.latest(), 9);
        assert_eq!(b.peak(), 3);
    }
}
