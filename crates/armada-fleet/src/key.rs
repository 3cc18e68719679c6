//! Server keys
//!
//! A [`ServerKey`] names one slot in the declared topology:
//! `<group>-<index>`, index 1-based and dense within a group at steady
//! state. Prefixed with the fleet prefix it becomes the server's name at
//! the provider, the only join key between desired and observed state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One slot in the declared topology.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerKey {
    pub group: String,
    pub index: u32,
}

impl ServerKey {
    pub fn new(group: impl Into<String>, index: u32) -> Self {
        Self {
            group: group.into(),
            index,
        }
    }

    /// The provider-side server name for this key.
    pub fn server_name(&self, prefix: &str) -> String {
        format!("{prefix}-{self}")
    }

    /// Parse a provider server name back into a key.
    ///
    /// Group names may themselves contain dashes, so the index is taken
    /// from the *last* dash and the remaining tail must exactly match one
    /// of the declared group names. Names that do not parse belong to
    /// unmanaged servers and are ignored by reconciliation.
    pub fn from_server_name(name: &str, prefix: &str, groups: &[String]) -> Option<Self> {
        let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
        let (group, index) = rest.rsplit_once('-')?;
        let index: u32 = index.parse().ok()?;
        if index == 0 || !groups.iter().any(|g| g == group) {
            return None;
        }
        Some(Self::new(group, index))
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.group, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_server_name_round_trip() {
        let key = ServerKey::new("web", 2);
        let name = key.server_name("armada");
        assert_eq!(name, "armada-web-2");
        assert_eq!(
            ServerKey::from_server_name(&name, "armada", &groups(&["web"])),
            Some(key)
        );
    }

    #[test]
    fn test_dashed_group_names_parse_on_last_dash() {
        let key = ServerKey::new("background-worker", 11);
        let name = key.server_name("armada");
        assert_eq!(name, "armada-background-worker-11");
        assert_eq!(
            ServerKey::from_server_name(&name, "armada", &groups(&["background-worker"])),
            Some(key)
        );
    }

    #[test]
    fn test_undeclared_group_is_ignored() {
        assert_eq!(
            ServerKey::from_server_name("armada-db-1", "armada", &groups(&["web"])),
            None
        );
    }

    #[test]
    fn test_foreign_prefix_is_ignored() {
        assert_eq!(
            ServerKey::from_server_name("other-web-1", "armada", &groups(&["web"])),
            None
        );
    }

    #[test]
    fn test_zero_and_garbage_indices_are_ignored() {
        let g = groups(&["web"]);
        assert_eq!(ServerKey::from_server_name("armada-web-0", "armada", &g), None);
        assert_eq!(
            ServerKey::from_server_name("armada-web-latest", "armada", &g),
            None
        );
    }
}
