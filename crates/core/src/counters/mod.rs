//! The two-level counter hierarchy (§4.A): a per-contract [`ContractCounter`]
//! aggregating bytes from closed per-connection [`ConnCounter`] children plus
//! bytes credited directly.

mod child;
mod error;
mod parent;

pub use child::ConnCounter;
pub use error::CounterError;
pub use parent::ContractCounter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_child_returns_distinct_instances() {
        let parent = ContractCounter::new();
        let a = parent.new_child();
        let b = parent.new_child();
        assert!(!std::sync::Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn two_children_parent_reset_s1() {
        let parent = ContractCounter::new();
        let c1 = parent.new_child();
        let c2 = parent.new_child();

        c1.add_in(1);
        c1.add_out(2);
        c2.add_in(3);

        assert_eq!(parent.sum(), 6);
        assert_eq!(parent.reset(), 6);
        assert_eq!(parent.sum(), 0);

        c1.add_in(4);
        assert_eq!(parent.sum(), 4);
    }

    #[test]
    fn close_credits_parent_and_detaches() {
        let parent = ContractCounter::new();
        let child = parent.new_child();
        child.add_in(10);
        child.add_out(5);

        assert_eq!(parent.child_count(), 1);
        let drained = child.close().expect("first close succeeds");
        assert_eq!(drained, 15);
        assert_eq!(parent.sum(), 15);
        assert_eq!(parent.child_count(), 0);
    }

    #[test]
    fn idempotent_reclose_i3() {
        let parent = ContractCounter::new();
        let child = parent.new_child();
        child.close().unwrap();

        assert_eq!(child.close().unwrap_err(), CounterError::ParentMissing);
        assert_eq!(child.add(1).unwrap_err(), CounterError::ParentMissing);
    }

    #[test]
    fn conservation_under_mixed_ops_i1() {
        let parent = ContractCounter::new();
        let mut total_added = 0u64;
        let mut drained_total = 0u64;

        for i in 0..20u64 {
            let child = parent.new_child();
            child.add_in(i);
            child.add_out(i + 1);
            total_added += i + (i + 1);

            if i % 3 == 0 {
                drained_total += child.close().unwrap();
            }
        }

        drained_total += parent.reset();
        assert_eq!(drained_total, total_added);
    }

    #[test]
    fn direct_credit_via_add() {
        let parent = ContractCounter::new();
        let child = parent.new_child();
        child.add(42).unwrap();
        assert_eq!(parent.sum(), 42);
        assert_eq!(child.sum(), 0);
    }
}
