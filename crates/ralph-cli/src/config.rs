//! User configuration: JSON at `{config_dir}/ralph/config.json`.
//! A missing file yields defaults; a missing custom prompt file is a
//! startup error naming the field.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RalphConfig {
    /// Where the run-set database lives; defaults to the per-user data dir.
    #[serde(default)]
    pub projects_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_iterations: Option<u64>,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Custom prompt file per role (e.g. "developer", "distiller").
    #[serde(default)]
    pub agents: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Cheaper model for the commit-message distiller.
    #[serde(default = "default_distill_model")]
    pub distill_model: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            distill_model: default_distill_model(),
            max_turns: default_max_turns(),
            verbose: false,
        }
    }
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_distill_model() -> String {
    "haiku".to_string()
}

fn default_max_turns() -> u32 {
    100
}

pub fn config_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("ralph").join("config.json")
    } else {
        PathBuf::from(".ralph").join("config.json")
    }
}

pub fn load() -> anyhow::Result<RalphConfig> {
    load_from(&config_path())
}

pub fn load_from(path: &Path) -> anyhow::Result<RalphConfig> {
    if !path.exists() {
        return Ok(RalphConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: RalphConfig = serde_json::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

/// Load the custom prompt for a role, when one is configured.
pub fn role_instructions(config: &RalphConfig, role: &str) -> anyhow::Result<Option<String>> {
    let Some(path) = config.agents.get(role) else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("agents.{role}: reading prompt file {}", path.display()))?;
    Ok(Some(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.projects_dir.is_none());
        assert!(config.max_iterations.is_none());
        assert_eq!(config.agent.model, "sonnet");
        assert_eq!(config.agent.max_turns, 100);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"max_iterations": 7, "agent": {"model": "opus"}}"#,
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.max_iterations, Some(7));
        assert_eq!(config.agent.model, "opus");
        assert_eq!(config.agent.distill_model, "haiku");
    }

    #[test]
    fn invalid_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{nope").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn role_instructions_read_from_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("developer.md");
        std::fs::write(&prompt_path, "be terse").unwrap();

        let mut config = RalphConfig::default();
        config.agents.insert("developer".into(), prompt_path);

        let instructions = role_instructions(&config, "developer").unwrap();
        assert_eq!(instructions.as_deref(), Some("be terse"));
        assert!(role_instructions(&config, "distiller").unwrap().is_none());
    }

    #[test]
    fn unreadable_role_prompt_names_the_field() {
        let mut config = RalphConfig::default();
        config
            .agents
            .insert("developer".into(), PathBuf::from("/no/such/prompt.md"));
        let err = role_instructions(&config, "developer").unwrap_err();
        assert!(err.to_string().contains("agents.developer"));
    }
}
