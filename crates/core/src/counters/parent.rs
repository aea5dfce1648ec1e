//! Per-contract aggregating counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::child::ConnCounter;

/// A per-contract counter that aggregates bytes credited directly plus
/// bytes transferred in from closed children. Cheap to clone (reference
/// counted); the counter map holds the single owning set of these.
#[derive(Clone)]
pub struct ContractCounter(pub(super) Arc<ContractCounterInner>);

pub(super) struct ContractCounterInner {
    value: AtomicU64,
    children: RwLock<Vec<ConnCounter>>,
}

impl Default for ContractCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractCounter {
    /// Creates a fresh, empty contract counter.
    pub fn new() -> Self {
        Self(Arc::new(ContractCounterInner {
            value: AtomicU64::new(0),
            children: RwLock::new(Vec::new()),
        }))
    }

    /// Atomically credits `n` bytes directly to `value`.
    pub fn add_raw(&self, n: u64) {
        self.0.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Allocates a new child counter linked to this parent and appends it
    /// to the children set. Each call returns a distinct instance.
    pub fn new_child(&self) -> ConnCounter {
        let child = ConnCounter::new(Arc::downgrade(&self.0));
        self.0.children.write().push(child.clone());
        child
    }

    /// `value` plus the live sum of every child still attached. Read-only:
    /// takes the children lock in read mode.
    pub fn sum(&self) -> u64 {
        let children = self.0.children.read();
        let mut total = self.0.value.load(Ordering::Relaxed);
        for child in children.iter() {
            total += child.sum();
        }
        total
    }

    /// Atomically zeroes `value` and every child's in/out cells, returning
    /// the total drained. A child created concurrently with a reset may
    /// land its subsequent increments in the new window; that is expected.
    pub fn reset(&self) -> u64 {
        let children = self.0.children.read();
        let mut total = self.0.value.swap(0, Ordering::Relaxed);
        for child in children.iter() {
            total += child.reset_inner();
        }
        total
    }

    /// Removes `child` from the children set via swap-remove (order is not
    /// preserved, matching the container this mirrors). Returns whether the
    /// child was found.
    pub(super) fn remove_child(&self, child: &ConnCounter) -> bool {
        let mut children = self.0.children.write();
        if let Some(pos) = children.iter().position(|c| Arc::ptr_eq(&c.0, &child.0)) {
            children.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Number of children currently attached. Test/diagnostic use only.
    #[cfg(test)]
    pub(crate) fn child_count(&self) -> usize {
        self.0.children.read().len()
    }
}
