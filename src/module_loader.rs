//! Module resolution against a layered search path.
//!
//! Templates use `?` as the placeholder for the module name (dots in the
//! name become directory separators). Home-directory templates come first so
//! a user override shadows the installed module of the same name.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

pub const MODULE_EXTENSION: &str = "rhai";

const HOME_TEMPLATES: &[&str] = &["data/?/init.rhai", "data/?.rhai", "data/library/?/init.rhai"];

const ROOT_TEMPLATES: &[&str] = &[
    "data/library/core/?.rhai",
    "data/library/core/?/init.rhai",
    "data/?/init.rhai",
    "data/?.rhai",
    "data/library/?/init.rhai",
];

fn module_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$").expect("module name pattern is valid")
    })
}

/// Check that a module name is a dot-separated list of identifiers.
pub fn validate_module_name(name: &str) -> BridgeResult<()> {
    if module_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(BridgeError::InvalidModuleName(name.to_string()))
    }
}

/// Ordered list of search templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePath {
    templates: Vec<String>,
}

impl ModulePath {
    /// Build and validate a search path from explicit templates.
    pub fn new(templates: Vec<String>) -> BridgeResult<Self> {
        if templates.is_empty() {
            return Err(BridgeError::Configuration("module search path is empty".into()));
        }
        if let Some(bad) = templates.iter().find(|t| !t.contains('?')) {
            return Err(BridgeError::Configuration(format!(
                "search template '{bad}' has no '?' placeholder"
            )));
        }
        Ok(Self { templates })
    }

    /// Default layering: home override, then installation root, then any
    /// extra templates from the config.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let mut templates = Vec::new();

        if let Some(home) = &config.home_dir {
            if !home.is_dir() {
                return Err(BridgeError::Configuration(format!(
                    "home directory {} is not a directory",
                    home.display()
                )));
            }
            templates.extend(HOME_TEMPLATES.iter().map(|t| join_template(home, t)));
        }

        templates.extend(ROOT_TEMPLATES.iter().map(|t| join_template(&config.root_dir, t)));
        templates.extend(config.extra_templates.iter().cloned());

        Self::new(templates)
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn contains(&self, template: &str) -> bool {
        self.templates.iter().any(|t| t == template)
    }

    fn push(&mut self, template: String) {
        if !self.contains(&template) {
            self.templates.push(template);
        }
    }

    /// Candidate file paths for `name`, in resolution order.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let relative = name.replace('.', std::path::MAIN_SEPARATOR_STR);
        self.templates.iter().map(|t| PathBuf::from(t.replace('?', &relative))).collect()
    }
}

fn join_template(base: &Path, template: &str) -> String {
    base.join(template).to_string_lossy().into_owned()
}

/// Source of a module that has been executed, kept for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub name: String,
    pub path: PathBuf,
    pub digest: String,
}

/// Resolved and read module, ready to compile.
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub name: String,
    pub path: PathBuf,
    pub source: String,
    pub digest: String,
}

#[derive(Debug)]
pub struct ModuleLoader {
    path: ModulePath,
    home_dir: Option<PathBuf>,
    root_dir: PathBuf,
    libraries: Vec<String>,
    loaded: HashMap<String, LoadedModule>,
}

impl ModuleLoader {
    pub fn new(config: &BridgeConfig) -> BridgeResult<Self> {
        Ok(Self {
            path: ModulePath::from_config(config)?,
            home_dir: config.home_dir.clone(),
            root_dir: config.root_dir.clone(),
            libraries: Vec::new(),
            loaded: HashMap::new(),
        })
    }

    pub fn search_path(&self) -> &ModulePath {
        &self.path
    }

    /// First existing file for `name`, walking the templates in order.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if validate_module_name(name).is_err() {
            return None;
        }
        self.path.candidates(name).into_iter().find(|p| p.is_file())
    }

    /// Resolve and read `name`.
    pub fn read(&self, name: &str) -> BridgeResult<ModuleSource> {
        validate_module_name(name)?;
        let path = self
            .resolve(name)
            .ok_or_else(|| BridgeError::ModuleNotFound { name: name.to_string() })?;
        let source = fs::read_to_string(&path).map_err(|source| BridgeError::ModuleRead {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;
        let digest = digest_source(&source);
        Ok(ModuleSource { name: name.to_string(), path, source, digest })
    }

    /// Add the directories of library `name` to the search path so later
    /// plain resolves can find files under it.
    ///
    /// Returns `false` for names containing a parent-directory token.
    pub fn resolve_library(&mut self, name: &str) -> bool {
        if name.is_empty() || name.contains("..") {
            log::warn!("Rejected library name '{name}'");
            return false;
        }

        let library_template = format!("data/library/{name}/?.{MODULE_EXTENSION}");
        if let Some(home) = self.home_dir.clone() {
            self.path.push(join_template(&home, &library_template));
        }
        let root = self.root_dir.clone();
        self.path.push(join_template(&root, &library_template));

        if !self.libraries.iter().any(|l| l == name) {
            log::debug!("Library '{name}' added to search path");
            self.libraries.push(name.to_string());
        }
        true
    }

    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    pub fn record_loaded(&mut self, module: &ModuleSource) {
        self.loaded.insert(
            module.name.clone(),
            LoadedModule { name: module.name.clone(), path: module.path.clone(), digest: module.digest.clone() },
        );
    }

    pub fn loaded(&self, name: &str) -> Option<&LoadedModule> {
        self.loaded.get(name)
    }

    pub fn loaded_modules(&self) -> impl Iterator<Item = &LoadedModule> {
        self.loaded.values()
    }

    /// Names of loaded modules whose resolved file content changed since
    /// they were executed (or that now resolve to a different file).
    pub fn changed_modules(&self) -> Vec<String> {
        let mut changed: Vec<String> = self
            .loaded
            .values()
            .filter(|module| match self.resolve(&module.name) {
                Some(path) if path == module.path => match fs::read_to_string(&path) {
                    Ok(source) => digest_source(&source) != module.digest,
                    Err(_) => false,
                },
                Some(_) => true,
                None => false,
            })
            .map(|module| module.name.clone())
            .collect();
        changed.sort();
        changed
    }

    pub fn clear(&mut self) {
        self.loaded.clear();
    }
}

fn digest_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}
