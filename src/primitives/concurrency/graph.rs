use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::TxnId;

/// Wait-for graph: an edge `a -> b` means `a` is blocked on a lock `b` holds.
#[derive(Default, Debug)]
pub struct WaitForGraph {
    edges: FxHashMap<TxnId, FxHashSet<TxnId>>,
}

impl WaitForGraph {
    /// Replaces `waiter`'s outgoing edges with `holders`.
    ///
    /// A waiter listed among the holders gets a self-edge: an upgrade blocked
    /// by another reader is a cycle of length one.
    pub fn set_waits(&mut self, waiter: TxnId, holders: impl IntoIterator<Item = TxnId>) {
        let targets: FxHashSet<TxnId> = holders.into_iter().collect();
        if targets.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, targets);
        }
    }

    /// Removes every outgoing edge of `waiter`.
    pub fn clear(&mut self, waiter: TxnId) {
        self.edges.remove(&waiter);
    }

    /// Returns true if `start` can reach itself.
    ///
    /// Depth-first walk with an explicit stack so long chains cannot overflow
    /// the thread stack.
    pub fn has_cycle_from(&self, start: TxnId) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack: Vec<TxnId> = match self.edges.get(&start) {
            Some(next) => next.iter().copied().collect(),
            None => return false,
        };
        while let Some(node) = stack.pop() {
            if node == start {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = self.edges.get(&node) {
                stack.extend(next.iter().copied().filter(|n| !visited.contains(n)));
            }
        }
        false
    }

    /// Number of transactions with outgoing edges.
    pub fn waiting_count(&self) -> usize {
        self.edges.len()
    }

    /// Sorted copy of every edge.
    pub fn edges(&self) -> Vec<(TxnId, TxnId)> {
        let mut out: Vec<(TxnId, TxnId)> = self
            .edges
            .iter()
            .flat_map(|(from, to)| to.iter().map(move |t| (*from, *t)))
            .collect();
        out.sort();
        out
    }
}
