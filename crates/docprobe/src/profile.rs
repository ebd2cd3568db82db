//! YAML profile — model endpoints plus probe options.
//!
//! ```yaml
//! models:
//!   claude:
//!     command: "claude --print"
//!     timeout_secs: 60
//!   local:
//!     url: "http://localhost:8080/v1"
//!     model: "qwen3-32b"
//!     api_key_env: "LOCAL_API_KEY"
//! probe:
//!   judge_model: claude
//!   max_questions: 40
//! ```
//!
//! `DOCPROBE_PROFILE` overrides the profile path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use comprehension::{ProbeConfig, SessionRegistry};
use serde::Deserialize;

use crate::adapters::{CliModelAdapter, HttpModelAdapter};

const DEFAULT_PROFILE: &str = "docprobe.yaml";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// One model endpoint: a subprocess command or an OpenAI-style HTTP
/// endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEndpoint {
    /// Subprocess command line (shlex-split); prompt arrives on stdin.
    pub command: Option<String>,
    /// OpenAI-style chat completions base URL.
    pub url: Option<String>,
    /// Model name sent in HTTP requests.
    pub model: Option<String>,
    /// Environment variable holding the API key, if the endpoint needs one.
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// The full profile file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub models: BTreeMap<String, ModelEndpoint>,
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Profile {
    /// Resolve the profile path: explicit flag, then `DOCPROBE_PROFILE`,
    /// then `docprobe.yaml` in the working directory.
    pub fn resolve_path(flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| std::env::var_os("DOCPROBE_PROFILE").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read profile {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid profile {}", path.display()))
    }

    /// Load the profile, or fall back to defaults when the default path
    /// does not exist and none was requested explicitly.
    pub fn load_or_default(flag: Option<PathBuf>) -> Result<Self> {
        let explicit = flag.is_some() || std::env::var_os("DOCPROBE_PROFILE").is_some();
        let path = Self::resolve_path(flag);
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Build the session registry from the model table.
    pub fn build_registry(&self) -> Result<SessionRegistry> {
        let mut registry = SessionRegistry::new();
        for (name, endpoint) in &self.models {
            match (&endpoint.command, &endpoint.url) {
                (Some(command), None) => {
                    let adapter = CliModelAdapter::new(command, endpoint.timeout_secs)
                        .with_context(|| format!("bad command for model {name}"))?;
                    registry.register(name.clone(), Arc::new(adapter));
                }
                (None, Some(url)) => {
                    let api_key = endpoint
                        .api_key_env
                        .as_deref()
                        .and_then(|var| std::env::var(var).ok());
                    let adapter = HttpModelAdapter::new(
                        url,
                        endpoint.model.as_deref().unwrap_or(name),
                        api_key,
                        endpoint.timeout_secs,
                    )?;
                    registry.register(name.clone(), Arc::new(adapter));
                }
                (Some(_), Some(_)) => {
                    bail!("model {name}: configure either command or url, not both")
                }
                (None, None) => bail!("model {name}: needs a command or a url"),
            }
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_profile() {
        let yaml = r#"
models:
  claude:
    command: "claude --print"
    timeout_secs: 90
  local:
    url: "http://localhost:8080/v1"
    model: "qwen3-32b"
probe:
  judge_model: claude
  max_questions: 25
  leakage_threshold: 0.2
"#;
        let profile: Profile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.models.len(), 2);
        assert_eq!(profile.models["claude"].timeout_secs, 90);
        assert_eq!(profile.models["local"].timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(profile.probe.judge_model, "claude");
        assert_eq!(profile.probe.max_questions, 25);
        assert_eq!(profile.probe.leakage_threshold, 0.2);
        // Unspecified probe options keep engine defaults.
        assert_eq!(profile.probe.uniqueness_threshold, 0.80);
    }

    #[test]
    fn test_empty_profile_is_defaults() {
        let profile: Profile = serde_yaml::from_str("{}").unwrap();
        assert!(profile.models.is_empty());
        assert_eq!(profile.probe, ProbeConfig::default());
    }

    #[test]
    fn test_registry_rejects_ambiguous_endpoint() {
        let yaml = r#"
models:
  bad:
    command: "echo"
    url: "http://localhost"
"#;
        let profile: Profile = serde_yaml::from_str(yaml).unwrap();
        assert!(profile.build_registry().is_err());
    }

    #[test]
    fn test_registry_rejects_empty_endpoint() {
        let yaml = "models:\n  bad: {}\n";
        let profile: Profile = serde_yaml::from_str(yaml).unwrap();
        assert!(profile.build_registry().is_err());
    }

    #[test]
    fn test_registry_builds_both_adapter_kinds() {
        let yaml = r#"
models:
  cli-model:
    command: "cat"
  http-model:
    url: "http://localhost:9999/v1"
"#;
        let profile: Profile = serde_yaml::from_str(yaml).unwrap();
        let registry = profile.build_registry().unwrap();
        assert_eq!(registry.model_ids(), vec!["cli-model", "http-model"]);
    }
}
