//! Per-connection leaf counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::error::CounterError;
use super::parent::{ContractCounter, ContractCounterInner};

/// A per-connection byte counter with a non-owning reference back to its
/// [`ContractCounter`]. Created via [`ContractCounter::new_child`], mutated
/// by two independent atomic cells, and destroyed by [`ConnCounter::close`].
#[derive(Clone)]
pub struct ConnCounter(pub(super) Arc<ConnCounterInner>);

pub(super) struct ConnCounterInner {
    inb: AtomicU64,
    outb: AtomicU64,
    parent: RwLock<Option<Weak<ContractCounterInner>>>,
}

impl ConnCounter {
    pub(super) fn new(parent: Weak<ContractCounterInner>) -> Self {
        Self(Arc::new(ConnCounterInner {
            inb: AtomicU64::new(0),
            outb: AtomicU64::new(0),
            parent: RwLock::new(Some(parent)),
        }))
    }

    /// Adds `n` bytes to the inbound cell. Single atomic op, no locking.
    pub fn add_in(&self, n: u64) {
        self.0.inb.fetch_add(n, Ordering::Relaxed);
    }

    /// Adds `n` bytes to the outbound cell. Single atomic op, no locking.
    pub fn add_out(&self, n: u64) {
        self.0.outb.fetch_add(n, Ordering::Relaxed);
    }

    /// Current in+out total.
    pub fn sum(&self) -> u64 {
        self.0.inb.load(Ordering::Relaxed) + self.0.outb.load(Ordering::Relaxed)
    }

    /// Credits `n` bytes directly to the parent's `value`, bypassing this
    /// child's own cells. Legal even after the child has stopped reading,
    /// as long as it has not yet been closed.
    pub fn add(&self, n: u64) -> Result<(), CounterError> {
        let parent = self.upgrade_parent()?;
        parent.add_raw(n);
        Ok(())
    }

    /// Drains `in+out` into the parent's `value`, removes self from the
    /// parent's child set, and severs the parent link. Idempotent: a second
    /// call always returns [`CounterError::ParentMissing`].
    pub fn close(&self) -> Result<u64, CounterError> {
        let weak = self
            .0
            .parent
            .write()
            .take()
            .ok_or(CounterError::ParentMissing)?;
        let parent = weak.upgrade().ok_or(CounterError::ParentMissing)?;
        let parent = ContractCounter(parent);

        let drained = self.reset_inner();
        parent.add_raw(drained);

        if parent.remove_child(self) {
            Ok(drained)
        } else {
            Err(CounterError::ContainerMissing)
        }
    }

    /// Atomically swaps both cells to zero, returning their prior sum.
    /// Used by both `close` and the parent's `reset`.
    pub(super) fn reset_inner(&self) -> u64 {
        self.0.inb.swap(0, Ordering::Relaxed) + self.0.outb.swap(0, Ordering::Relaxed)
    }

    fn upgrade_parent(&self) -> Result<ContractCounter, CounterError> {
        self.0
            .parent
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(ContractCounter)
            .ok_or(CounterError::ParentMissing)
    }
}
