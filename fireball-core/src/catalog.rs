//! In-memory exploit catalog, mirrored to the Siren scoring backend on change.
//!
//! The `exploit_id` string is the public handle; the catalog is the arena
//! that owns entries. Container labels and tasks carry the string key
//! rather than a pointer into the catalog, so re-creation on scan is safe
//! even while older containers still reference the previous entry.

use std::collections::HashMap;

use tracing::warn;

use crate::model::Exploit;
use crate::siren::SirenClient;

#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<String, Exploit>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, exploit_id: &str) -> Option<&Exploit> {
        self.entries.get(exploit_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exploit> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert directly, bypassing the backend mirror. Used by startup
    /// bootstrap, which mirrors in bulk rather than per-entry.
    pub fn insert_local(&mut self, exploit: Exploit) {
        self.entries.insert(exploit.exploit_id.clone(), exploit);
    }

    /// Replace (or insert) an entry and mirror the change to Siren.
    /// Backend failures are logged and do not abort the caller's scan.
    pub async fn update(&mut self, exploit: Exploit, siren: &SirenClient, problem_id: i64) {
        if let Err(e) = siren
            .create_exploit(&exploit.name, &exploit.image_id, problem_id, exploit.enabled)
            .await
        {
            warn!(exploit_id = %exploit.exploit_id, error = %e, "failed to mirror exploit update to siren");
        }
        self.entries.insert(exploit.exploit_id.clone(), exploit);
    }

    /// Remove an entry and mirror the deletion to Siren.
    pub async fn remove(&mut self, exploit_id: &str, siren: &SirenClient, problem_id: i64) {
        if let Some(exploit) = self.entries.remove(exploit_id) {
            if let Err(e) = siren.delete_exploit(&exploit.name, problem_id).await {
                warn!(exploit_id = %exploit_id, error = %e, "failed to mirror exploit removal to siren");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn exploit(id: &str) -> Exploit {
        Exploit {
            exploit_id: id.to_string(),
            challenge_name: "high".to_string(),
            name: "ground".to_string(),
            image_id: "sha256:deadbeef".to_string(),
            timeout_seconds: 30,
            enabled: true,
            ignore_teams: HashSet::new(),
            meta: toml::value::Table::new(),
        }
    }

    #[test]
    fn insert_local_is_keyed_by_exploit_id() {
        let mut catalog = Catalog::new();
        catalog.insert_local(exploit("high:ground"));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("high:ground").is_some());
        assert!(catalog.get("low:sky").is_none());
    }
}
