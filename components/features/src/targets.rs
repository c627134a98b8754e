//! Non-owning set of targets a feature was applied to

use parking_lot::RwLock;
use pressure_types::MonitoredTarget;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Targets tracked by id; only weak handles are kept
#[derive(Default)]
pub struct TrackedTargets {
    targets: RwLock<HashMap<u64, Weak<dyn MonitoredTarget>>>,
}

impl TrackedTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or keep) tracking `target`
    pub fn track(&self, target: &Arc<dyn MonitoredTarget>) {
        self.targets
            .write()
            .insert(target.id(), Arc::downgrade(target));
    }

    pub fn forget(&self, target_id: u64) {
        self.targets.write().remove(&target_id);
    }

    /// Live targets ordered by id; dropped or dead ones are pruned
    pub fn live(&self) -> Vec<Arc<dyn MonitoredTarget>> {
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for (id, weak) in self.targets.read().iter() {
            match weak.upgrade() {
                Some(target) if target.is_alive() => live.push(target),
                _ => dead.push(*id),
            }
        }
        if !dead.is_empty() {
            let mut targets = self.targets.write();
            for id in dead {
                targets.remove(&id);
            }
        }
        live.sort_by_key(|t| t.id());
        live
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressure_types::mock::MockTarget;

    #[test]
    fn test_live_prunes_dead_targets() {
        let tracked = TrackedTargets::new();
        let a: Arc<dyn MonitoredTarget> = Arc::new(MockTarget::new(2, "a"));
        let b = Arc::new(MockTarget::new(1, "b"));
        let b_dyn: Arc<dyn MonitoredTarget> = b.clone();
        let c: Arc<dyn MonitoredTarget> = Arc::new(MockTarget::new(3, "c"));

        tracked.track(&a);
        tracked.track(&b_dyn);
        tracked.track(&c);
        assert_eq!(tracked.len(), 3);

        b.kill();
        drop(c);

        let ids: Vec<u64> = tracked.live().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(tracked.len(), 1);

        tracked.forget(2);
        assert!(tracked.is_empty());
    }
}
