//! Reachability closure over enabled hops.

use super::topology::{PipelineGraph, StageId};

/// Fixed-size bitset indexed by stage position.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    fn new(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    fn insert(&mut self, bit: usize) {
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    fn contains(&self, bit: usize) -> bool {
        self.words
            .get(bit / 64)
            .is_some_and(|w| w & (1 << (bit % 64)) != 0)
    }

    fn union_with(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }
}

/// For every stage, the set of stages reachable from it through enabled
/// hops. Computed once; each query is a bit test.
#[derive(Debug, Clone)]
pub struct Reachability {
    descendants: Vec<BitSet>,
}

impl Reachability {
    /// Computes the closure.
    ///
    /// Walks the execution order backwards so every successor's set is
    /// complete before it is merged into its predecessors. The graph must be
    /// validated; an unvalidated graph falls back to a per-stage search.
    #[must_use]
    pub fn compute(graph: &PipelineGraph) -> Self {
        let n = graph.stage_count();
        let mut descendants = vec![BitSet::new(n); n];

        if graph.execution_order().len() == n {
            for &id in graph.execution_order().iter().rev() {
                let mut set = BitSet::new(n);
                for next in graph.next_stages(id) {
                    set.insert(next.index());
                    set.union_with(&descendants[next.index()]);
                }
                descendants[id.index()] = set;
            }
        } else {
            for (index, set) in descendants.iter_mut().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let mut stack = vec![StageId(index as u32)];
                while let Some(id) = stack.pop() {
                    for next in graph.next_stages(id) {
                        if !set.contains(next.index()) {
                            set.insert(next.index());
                            stack.push(next);
                        }
                    }
                }
            }
        }
        Self { descendants }
    }

    /// Returns true if `to` can be reached from `from` by following one or
    /// more enabled hops.
    #[must_use]
    pub fn reaches(&self, from: StageId, to: StageId) -> bool {
        self.descendants
            .get(from.index())
            .is_some_and(|set| set.contains(to.index()))
    }

    /// Returns true if `a` must run before `b`.
    #[must_use]
    pub fn is_before(&self, a: StageId, b: StageId) -> bool {
        self.reaches(a, b)
    }
}

/// Stable dependency ordering of `items`.
///
/// Repeatedly takes the earliest remaining item that no other remaining
/// item must precede. Unrelated items keep their relative order. Quadratic
/// in the number of items.
pub fn stable_dependency_order<T>(
    items: Vec<T>,
    mut is_before: impl FnMut(&T, &T) -> bool,
) -> Vec<T> {
    let mut remaining = items;
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let pick = (0..remaining.len())
            .find(|&i| {
                !remaining
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && is_before(other, &remaining[i]))
            })
            // A cycle leaves no candidate; fall back to input order.
            .unwrap_or(0);
        ordered.push(remaining.remove(pick));
    }
    ordered
}
