use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration version published to scripts as `CFG_VERSION`.
pub const CFG_VERSION: rhai::INT = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// User override directory, searched before the installation root.
    #[serde(default)]
    pub home_dir: Option<PathBuf>,
    #[serde(default = "BridgeConfig::default_root_dir")]
    pub root_dir: PathBuf,
    /// Additional `?` templates appended after the defaults.
    #[serde(default)]
    pub extra_templates: Vec<String>,
    #[serde(default = "BridgeConfig::default_bootstrap_module")]
    pub bootstrap_module: String,
    #[serde(default = "BridgeConfig::default_max_call_depth")]
    pub max_call_depth: usize,
    #[serde(default = "BridgeConfig::default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "BridgeConfig::default_max_logs_per_tick")]
    pub max_logs_per_tick: u32,
    /// `None` lets the build mode decide.
    #[serde(default)]
    pub strict_protocol: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub home_dir: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
    pub strict_protocol: Option<bool>,
}

impl BridgeConfig {
    fn default_root_dir() -> PathBuf {
        PathBuf::from(".")
    }

    fn default_bootstrap_module() -> String {
        "init".to_string()
    }

    const fn default_max_call_depth() -> usize {
        64
    }

    const fn default_max_operations() -> u64 {
        1_000_000
    }

    const fn default_max_logs_per_tick() -> u32 {
        100
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(home) = &overrides.home_dir {
            self.home_dir = Some(home.clone());
        }
        if let Some(root) = &overrides.root_dir {
            self.root_dir = root.clone();
        }
        if let Some(strict) = overrides.strict_protocol {
            self.strict_protocol = Some(strict);
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            home_dir: None,
            root_dir: Self::default_root_dir(),
            extra_templates: Vec::new(),
            bootstrap_module: Self::default_bootstrap_module(),
            max_call_depth: Self::default_max_call_depth(),
            max_operations: Self::default_max_operations(),
            max_logs_per_tick: Self::default_max_logs_per_tick(),
            strict_protocol: None,
        }
    }
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.home_dir.is_none() && self.root_dir.is_none() && self.strict_protocol.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.home_dir.is_some() {
            fields.push("home_dir");
        }
        if self.root_dir.is_some() {
            fields.push("root_dir");
        }
        if self.strict_protocol.is_some() {
            fields.push("strict_protocol");
        }
        fields
    }
}
