//! Discovers named agents from a workspace directory.
//!
//! Generalizes the teacher's `personas.rs` (agent personality loading) from
//! "one persona, loaded from a fixed path" to "any number of discrete named
//! agents, one subdirectory each". Each agent directory holds a SOUL
//! document (free-form markdown describing its personality/values), an
//! optional identity document, and an optional per-agent skills directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::identity::AgentIdentity;

#[derive(Debug, thiserror::Error)]
pub enum AgentRegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no agent directories found under {0}")]
    NoAgentsFound(PathBuf),
    #[error("agent '{0}' not found in registry")]
    NotFound(String),
}

/// A discovered agent directory: `workspace/agents/<name>/{SOUL.md,
/// aid.json?, skills/*.md, memory/*}`.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub dir: PathBuf,
    pub soul: String,
    pub identity: Option<AgentIdentity>,
    pub hatched: bool,
}

impl AgentDescriptor {
    fn load(dir: &Path) -> Result<Self, AgentRegistryError> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("agent")
            .to_string();
        let soul_path = dir.join("SOUL.md");
        let soul = std::fs::read_to_string(&soul_path).unwrap_or_default();

        let identity_path = dir.join("aid.json");
        let identity = if identity_path.exists() {
            std::fs::read_to_string(&identity_path)
                .ok()
                .and_then(|raw| serde_json::from_str::<AgentIdentity>(&raw).ok())
        } else {
            None
        };

        let hatched = dir.join(".hatched").exists();

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            soul,
            identity,
            hatched,
        })
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.dir.join("skills")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.dir.join("memory")
    }
}

/// Registry of discovered agents, plus the designation of which one answers
/// as the default (`primary`).
pub struct AgentRegistry {
    agents: HashMap<String, AgentDescriptor>,
    primary_name: String,
}

impl AgentRegistry {
    /// Scan `workspace_dir/agents/*` for agent directories. `preferred_primary`
    /// names which directory, if present, should be treated as primary;
    /// otherwise the alphabetically-first discovered agent is primary.
    pub fn discover(
        workspace_dir: &Path,
        preferred_primary: Option<&str>,
    ) -> Result<Self, AgentRegistryError> {
        let agents_dir = workspace_dir.join("agents");
        let mut agents = HashMap::new();
        let mut names: Vec<String> = Vec::new();

        if agents_dir.exists() {
            let mut entries: Vec<_> = std::fs::read_dir(&agents_dir)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .collect();
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let descriptor = AgentDescriptor::load(&entry.path())?;
                names.push(descriptor.name.clone());
                agents.insert(descriptor.name.clone(), descriptor);
            }
        }

        if agents.is_empty() {
            return Err(AgentRegistryError::NoAgentsFound(agents_dir));
        }

        let primary_name = preferred_primary
            .filter(|name| agents.contains_key(*name))
            .map(|s| s.to_string())
            .unwrap_or_else(|| names[0].clone());

        Ok(Self {
            agents,
            primary_name,
        })
    }

    /// Build a registry directly from a set of descriptors, useful for tests
    /// and for the first-boot path where no directory exists yet.
    pub fn from_descriptors(
        descriptors: Vec<AgentDescriptor>,
        primary_name: impl Into<String>,
    ) -> Self {
        let agents = descriptors.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            agents,
            primary_name: primary_name.into(),
        }
    }

    /// The designated primary agent.
    pub fn primary(&self) -> &AgentDescriptor {
        self.agents
            .get(&self.primary_name)
            .expect("primary_name always refers to a loaded descriptor")
    }

    /// A named agent, falling back to `primary()` if the name is unknown.
    pub fn get(&self, name: &str) -> &AgentDescriptor {
        self.agents.get(name).unwrap_or_else(|| self.primary())
    }

    /// A named agent, returning `None` rather than falling back — used by
    /// the delegation parser, which must distinguish "unknown name" (falls
    /// through as plain text) from a real sub-agent.
    pub fn get_exact(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Add a freshly spawned agent to the registry. Does not affect which
    /// agent is primary.
    pub fn insert(&mut self, descriptor: AgentDescriptor) {
        self.agents.insert(descriptor.name.clone(), descriptor);
    }

    /// Mark an agent hatched: first-ever-boot name assignment completed.
    /// Writes a `.hatched` marker file into the agent's directory so the
    /// state survives a restart.
    pub fn hatch(&mut self, name: &str) -> Result<(), AgentRegistryError> {
        let descriptor = self
            .agents
            .get_mut(name)
            .ok_or_else(|| AgentRegistryError::NotFound(name.to_string()))?;
        std::fs::write(descriptor.dir.join(".hatched"), b"")?;
        descriptor.hatched = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_agent_dir(root: &Path, name: &str, soul: &str) {
        let dir = root.join("agents").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SOUL.md"), soul).unwrap();
    }

    #[test]
    fn test_discover_finds_agents_and_picks_alphabetical_primary() {
        let dir = TempDir::new().unwrap();
        make_agent_dir(dir.path(), "zeta", "I am zeta");
        make_agent_dir(dir.path(), "alpha", "I am alpha");

        let registry = AgentRegistry::discover(dir.path(), None).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.primary().name, "alpha");
    }

    #[test]
    fn test_discover_honors_preferred_primary() {
        let dir = TempDir::new().unwrap();
        make_agent_dir(dir.path(), "alpha", "I am alpha");
        make_agent_dir(dir.path(), "zeta", "I am zeta");

        let registry = AgentRegistry::discover(dir.path(), Some("zeta")).unwrap();
        assert_eq!(registry.primary().name, "zeta");
    }

    #[test]
    fn test_get_falls_back_to_primary_for_unknown_name() {
        let dir = TempDir::new().unwrap();
        make_agent_dir(dir.path(), "alpha", "I am alpha");

        let registry = AgentRegistry::discover(dir.path(), None).unwrap();
        assert_eq!(registry.get("nonexistent").name, "alpha");
        assert!(registry.get_exact("nonexistent").is_none());
    }

    #[test]
    fn test_no_agents_errors() {
        let dir = TempDir::new().unwrap();
        let result = AgentRegistry::discover(dir.path(), None);
        assert!(matches!(result, Err(AgentRegistryError::NoAgentsFound(_))));
    }

    #[test]
    fn test_hatch_persists_marker() {
        let dir = TempDir::new().unwrap();
        make_agent_dir(dir.path(), "alpha", "I am alpha");
        let mut registry = AgentRegistry::discover(dir.path(), None).unwrap();
        assert!(!registry.get("alpha").hatched);
        registry.hatch("alpha").unwrap();
        assert!(registry.get("alpha").hatched);

        let reloaded = AgentRegistry::discover(dir.path(), None).unwrap();
        assert!(reloaded.get("alpha").hatched);
    }
}
