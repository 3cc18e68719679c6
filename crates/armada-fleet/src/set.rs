//! Canonical server set
//!
//! The reconciler's definitive, per-run output. Recomputed from provider
//! state on every run, never cached; downstream components treat it as
//! immutable within a run.

use crate::key::ServerKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Connection/role metadata for one reconciled server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSetEntry {
    pub key: ServerKey,

    /// Provider-assigned server id.
    pub id: String,

    pub public_ip: String,

    /// Private address on the shared network; absent until the private
    /// NIC is up (single-node fleets never populate it).
    pub private_ip: Option<String>,
}

impl ServerSetEntry {
    pub fn group(&self) -> &str {
        &self.key.group
    }
}

/// The ordered collection of reconciled servers.
///
/// The first entry is always the master (the server at index 1 of the
/// first declared group) and exclusively hosts the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSet {
    entries: Vec<ServerSetEntry>,
    new_keys: HashSet<ServerKey>,
}

impl ServerSet {
    /// Assemble the set, placing the master first.
    ///
    /// `master_key` comes from the declared topology (first group, index
    /// 1); assembly fails the run upstream if that entry is missing, so
    /// here it is a debug invariant.
    pub fn assemble(
        mut entries: Vec<ServerSetEntry>,
        master_key: &ServerKey,
        new_keys: HashSet<ServerKey>,
    ) -> Self {
        entries.sort_by(|a, b| {
            let a_master = &a.key == master_key;
            let b_master = &b.key == master_key;
            b_master.cmp(&a_master).then_with(|| a.key.cmp(&b.key))
        });
        debug_assert!(
            entries.first().map(|e| &e.key) == Some(master_key),
            "master entry missing from server set"
        );
        Self { entries, new_keys }
    }

    /// The control-plane server.
    pub fn master(&self) -> Option<&ServerSetEntry> {
        self.entries.first()
    }

    /// Every non-master server, in key order.
    pub fn workers(&self) -> impl Iterator<Item = &ServerSetEntry> {
        self.entries.iter().skip(1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerSetEntry> {
        self.entries.iter()
    }

    pub fn get(&self, key: &ServerKey) -> Option<&ServerSetEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys created during this run. Downstream components use this to
    /// decide whether first-time setup steps are needed.
    pub fn new_keys(&self) -> &HashSet<ServerKey> {
        &self.new_keys
    }

    pub fn is_new(&self, key: &ServerKey) -> bool {
        self.new_keys.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(group: &str, index: u32, id: &str) -> ServerSetEntry {
        ServerSetEntry {
            key: ServerKey::new(group, index),
            id: id.to_string(),
            public_ip: format!("203.0.113.{index}"),
            private_ip: None,
        }
    }

    #[test]
    fn test_master_is_first_regardless_of_input_order() {
        let master_key = ServerKey::new("web", 1);
        let set = ServerSet::assemble(
            vec![
                entry("worker", 1, "c"),
                entry("web", 2, "b"),
                entry("web", 1, "a"),
            ],
            &master_key,
            HashSet::new(),
        );

        assert_eq!(set.master().unwrap().id, "a");
        let workers: Vec<_> = set.workers().map(|e| e.id.clone()).collect();
        assert_eq!(workers, vec!["b", "c"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_new_keys_membership() {
        let master_key = ServerKey::new("web", 1);
        let mut new_keys = HashSet::new();
        new_keys.insert(ServerKey::new("web", 2));

        let set = ServerSet::assemble(
            vec![entry("web", 1, "a"), entry("web", 2, "b")],
            &master_key,
            new_keys,
        );

        assert!(!set.is_new(&ServerKey::new("web", 1)));
        assert!(set.is_new(&ServerKey::new("web", 2)));
    }
}
