//! MONITOR reverse index: who watches a nickname.

use std::collections::HashSet;

use dashmap::DashMap;
use rook_proto::casefold;

use super::client::ConnId;

/// target nick (folded) -> watching connections.
#[derive(Debug, Default)]
pub struct MonitorIndex {
    watchers: DashMap<String, HashSet<ConnId>>,
}

impl MonitorIndex {
    pub fn new() -> Self {
        MonitorIndex {
            watchers: DashMap::new(),
        }
    }

    pub fn watch(&self, target: &str, watcher: ConnId) {
        self.watchers
            .entry(casefold(target))
            .or_default()
            .insert(watcher);
    }

    pub fn unwatch(&self, target: &str, watcher: ConnId) {
        let folded = casefold(target);
        if let Some(mut set) = self.watchers.get_mut(&folded) {
            set.remove(&watcher);
            if set.is_empty() {
                drop(set);
                self.watchers.remove(&folded);
            }
        }
    }

    /// Connections watching `target`, in no particular order.
    pub fn watchers_of(&self, target: &str) -> Vec<ConnId> {
        self.watchers
            .get(&casefold(target))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop `watcher` from every target it was watching.
    pub fn drop_watcher<'a>(&self, watcher: ConnId, targets: impl Iterator<Item = &'a str>) {
        for target in targets {
            self.unwatch(target, watcher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_and_unwatch_are_casefolded() {
        let index = MonitorIndex::new();
        index.watch("Alice", 1);
        index.watch("ALICE", 2);
        assert_eq!(index.watchers_of("alice").len(), 2);

        index.unwatch("aLiCe", 1);
        assert_eq!(index.watchers_of("alice"), vec![2]);
    }

    #[test]
    fn drop_watcher_clears_all_targets() {
        let index = MonitorIndex::new();
        index.watch("alice", 9);
        index.watch("bob", 9);
        index.drop_watcher(9, ["alice", "bob"].into_iter());
        assert!(index.watchers_of("alice").is_empty());
        assert!(index.watchers_of("bob").is_empty());
    }
}
