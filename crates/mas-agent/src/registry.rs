use crate::agent::Agent;
use mas_core::{MasError, MasResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Central name → agent mapping.
///
/// The registry holds a shared handle to each agent; it does not own the
/// agent's lifecycle. Registration is usually done before task traffic starts,
/// but reads and inserts are safe from any thread at any time.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register `agent` under `name`. The first registration of a name wins.
    pub fn register(&self, name: impl Into<String>, agent: Arc<dyn Agent>) -> MasResult<()> {
        let name = name.into();
        let mut agents = self.agents.write();
        if agents.contains_key(&name) {
            return Err(MasError::DuplicateName(name));
        }
        info!(agent = %name, "Registered agent");
        agents.insert(name, agent);
        Ok(())
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(name).cloned()
    }

    /// Snapshot of every registration. Later changes to the registry are not
    /// reflected in the returned map.
    pub fn list(&self) -> HashMap<String, Arc<dyn Agent>> {
        self.agents.read().clone()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether an agent is registered under `name`.
    pub fn has_role(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    /// Names from `names` that are not registered, in input order, without duplicates.
    pub fn missing<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let agents = self.agents.read();
        let mut missing: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !agents.contains_key(name) && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        }
        missing
    }

    /// Fails with [`MasError::MissingRole`] naming every absent role.
    pub fn require_roles<I, S>(&self, names: I) -> MasResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let missing = self.missing(names);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MasError::MissingRole(missing))
        }
    }

    /// Remove every registered agent.
    pub fn clear(&self) {
        let mut agents = self.agents.write();
        debug!(count = agents.len(), "Clearing agent registry");
        agents.clear();
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
