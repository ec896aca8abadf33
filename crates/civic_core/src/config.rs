use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_carry_forward_days() -> u32 {
    1
}

fn default_adapter_timeout_secs() -> u64 {
    120
}

fn default_active_orgs_document() -> String {
    "active-orgs.json".to_string()
}

/// Everything one aggregation run needs, loaded once and passed in explicitly.
#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_carry_forward_days")]
    pub carry_forward_days: u32,
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
    #[serde(default = "default_active_orgs_document")]
    pub active_orgs_document: String,
    pub store: StoreConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub taxonomy: Option<PathBuf>,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerConfig {
    /// Environment variable holding the manual-trigger secret.
    pub secret_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub document: String,
    #[serde(default)]
    pub minimum_expected: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub adapter: AdapterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    File {
        path: PathBuf,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl CronConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| anyhow!("reading {}: {err}", path.display()))?;
        let mut config = Self::from_toml(&raw)?;
        // Relative paths in the config resolve against the config file's directory.
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: CronConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(anyhow!("config declares no sources"));
        }
        let mut names = HashSet::new();
        let mut documents = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(anyhow!("source with empty name"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(anyhow!("duplicate source name: {}", source.name));
            }
            if source.document.trim().is_empty() {
                return Err(anyhow!("source {} has no document name", source.name));
            }
            if !documents.insert(source.document.as_str()) {
                return Err(anyhow!("duplicate source document: {}", source.document));
            }
            if source.document == self.active_orgs_document {
                return Err(anyhow!(
                    "source {} writes to the active orgs document {}",
                    source.name,
                    self.active_orgs_document
                ));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.store.path);
        if let Some(taxonomy) = self.taxonomy.as_mut() {
            resolve(taxonomy);
        }
        for source in &mut self.sources {
            if let AdapterConfig::File { path } = &mut source.adapter {
                resolve(path);
            }
        }
    }

    pub fn adapter_timeout(&self, source: &SourceConfig) -> Duration {
        Duration::from_secs(source.timeout_secs.unwrap_or(self.adapter_timeout_secs))
    }

    /// Zero thresholds disable staleness protection; flag them for the operator.
    pub fn log_threshold_review(&self) {
        for source in &self.sources {
            if source.minimum_expected == 0 {
                tracing::warn!(source = %source.name, "minimum_expected is 0, threshold disabled");
            } else {
                tracing::debug!(source = %source.name, minimum_expected = source.minimum_expected, "threshold");
            }
        }
    }

    /// Reads the manual-trigger secret named by `trigger.secret_env`.
    pub fn trigger_secret(&self) -> Option<String> {
        self.trigger
            .secret_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|secret| !secret.is_empty())
    }
}
