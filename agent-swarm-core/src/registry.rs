//! Agent registry with capability lookup
//!
//! Agents are registered with an integer priority. Capability lookups return
//! only enabled agents, highest priority first, falling back to registration
//! order when priorities tie.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::agent::{Agent, Capability};
use crate::{Error, Result};

/// Registration record for a single agent
#[derive(Clone)]
pub struct AgentEntry {
    pub agent: Arc<dyn Agent>,
    pub priority: i32,
    pub enabled: bool,
    pub registered_at: DateTime<Utc>,
}

impl AgentEntry {
    pub fn name(&self) -> &str {
        self.agent.name()
    }
}

impl std::fmt::Debug for AgentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEntry")
            .field("name", &self.agent.name())
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// Registry of agents available to the coordinator
///
/// One instance is constructed at process start and shared through an
/// `Arc` with every coordinator that needs it.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    entries: RwLock<Vec<AgentEntry>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent; fails if the name is already taken
    pub fn register(&self, agent: Arc<dyn Agent>, priority: i32) -> Result<()> {
        let mut entries = self.entries.write();
        let name = agent.name().to_string();
        if entries.iter().any(|e| e.name() == name) {
            return Err(Error::AlreadyRegistered { name });
        }

        info!(
            "Registered agent {} (priority {}, capabilities {:?})",
            name,
            priority,
            agent.capabilities()
        );
        entries.push(AgentEntry {
            agent,
            priority,
            enabled: true,
            registered_at: Utc::now(),
        });
        Ok(())
    }

    /// Register an agent, replacing any existing entry with the same name
    ///
    /// A replaced agent keeps its original position in registration order.
    pub fn register_or_replace(&self, agent: Arc<dyn Agent>, priority: i32) {
        let mut entries = self.entries.write();
        let entry = AgentEntry {
            agent,
            priority,
            enabled: true,
            registered_at: Utc::now(),
        };

        match entries.iter_mut().find(|e| e.name() == entry.name()) {
            Some(existing) => {
                debug!("Replacing agent {}", entry.name());
                *existing = entry;
            }
            None => {
                info!("Registered agent {} (priority {})", entry.name(), priority);
                entries.push(entry);
            }
        }
    }

    /// Remove an agent; returns whether it was present
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name() != name);
        let removed = entries.len() != before;
        if removed {
            info!("Unregistered agent {}", name);
        }
        removed
    }

    /// Look up an enabled agent by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.enabled && e.name() == name)
            .map(|e| Arc::clone(&e.agent))
    }

    /// Enabled agents advertising `capability`, highest priority first
    pub fn get_by_capability(&self, capability: Capability) -> Vec<Arc<dyn Agent>> {
        let entries = self.entries.read();
        let mut matches: Vec<&AgentEntry> = entries
            .iter()
            .filter(|e| e.enabled && e.agent.can_handle(capability))
            .collect();
        // stable sort keeps registration order among equal priorities
        matches.sort_by(|a, b| b.priority.cmp(&a.priority));
        matches.into_iter().map(|e| Arc::clone(&e.agent)).collect()
    }

    pub fn get_best_for_capability(&self, capability: Capability) -> Option<Arc<dyn Agent>> {
        self.get_by_capability(capability).into_iter().next()
    }

    /// Enabled agents in registration order
    pub fn list_all(&self) -> Vec<Arc<dyn Agent>> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.enabled)
            .map(|e| Arc::clone(&e.agent))
            .collect()
    }

    /// Names of all registered agents, enabled or not
    pub fn list_names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Capabilities offered by at least one enabled agent, in enum order
    pub fn list_capabilities(&self) -> Vec<Capability> {
        self.capabilities_map().into_keys().collect()
    }

    /// Capability to enabled agent names, each list in priority order
    pub fn capabilities_map(&self) -> BTreeMap<Capability, Vec<String>> {
        let entries = self.entries.read();
        let mut sorted: Vec<&AgentEntry> = entries.iter().filter(|e| e.enabled).collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut map: BTreeMap<Capability, Vec<String>> = BTreeMap::new();
        for entry in sorted {
            for capability in entry.agent.capabilities() {
                map.entry(*capability)
                    .or_default()
                    .push(entry.name().to_string());
            }
        }
        map
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.name() == name)
            .ok_or_else(|| Error::agent_not_found(name))?;
        entry.enabled = enabled;
        debug!("Agent {} enabled={}", name, enabled);
        Ok(())
    }

    /// Number of registered agents, enabled or not
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|e| e.name() == name)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
