//! Configuration system for agentloop.
//!
//! Two layers:
//! 1. Global config (~/.config/agentloop/agentloop.yml or ./agentloop.yml)
//! 2. Agent descriptors (agents/<name>.json)

use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use self::agent::{AgentDescriptor, ConnectionSpec, MultiplierRuleSpec, REQUIRED_FIELDS, TaskSpec};
pub use self::global::{EngineConfig, GlobalConfig};

mod agent;
mod global;

/// Agent descriptor files in `dir`, sorted by name.
pub fn list_agents(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut agents = Vec::new();
    if !dir.exists() {
        log::debug!("Agents dir {} does not exist", dir.display());
        return Ok(agents);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read dir: {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            agents.push(path);
        }
    }
    agents.sort();
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_agents_filters_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let agents = list_agents(dir.path()).unwrap();
        let names: Vec<_> = agents
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_list_agents_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_agents(&dir.path().join("missing")).unwrap().is_empty());
    }
}
