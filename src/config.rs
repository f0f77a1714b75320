//! TOML configuration: category map, default paths and walk filters.
//!
//! Configuration is searched for in this order:
//! 1. an explicit `--config` path
//! 2. `.tidykitrc.toml` in the current directory
//! 3. `~/.config/tidykit/config.toml`
//! 4. built-in defaults
//!
//! ```toml
//! [paths]
//! downloads = "auto"
//!
//! [organize]
//! default_category = "Other"
//!
//! [organize.categories]
//! ".pdf" = "Documents"
//! ".tar.gz" = "Archives"
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["**/node_modules/**"]
//! extensions = ["part"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use crate::category::{CategoryMap, DEFAULT_CATEGORY};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOCAL_CONFIG_NAME: &str = ".tidykitrc.toml";

/// Errors that can occur while loading or compiling configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },

    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub organize: OrganizeSettings,

    #[serde(default)]
    pub filters: FilterRules,
}

/// Default locations used when a command is run without a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root for `organize`. `"auto"` resolves to `$HOME/Downloads`.
    #[serde(default = "default_downloads")]
    pub downloads: String,
}

fn default_downloads() -> String {
    "auto".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            downloads: default_downloads(),
        }
    }
}

impl PathSettings {
    /// Resolves the organize root, expanding `"auto"`.
    pub fn downloads_dir(&self) -> Option<PathBuf> {
        if self.downloads == "auto" {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join("Downloads"))
        } else {
            Some(PathBuf::from(&self.downloads))
        }
    }
}

/// Extension to category mapping for `organize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeSettings {
    #[serde(default = "default_category_name")]
    pub default_category: String,

    /// Replaces the built-in map entirely when present.
    #[serde(default)]
    pub categories: Option<BTreeMap<String, String>>,
}

fn default_category_name() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Default for OrganizeSettings {
    fn default() -> Self {
        Self {
            default_category: default_category_name(),
            categories: None,
        }
    }
}

impl OrganizeSettings {
    /// Builds the immutable category map handed to the classifier.
    pub fn category_map(&self) -> Result<CategoryMap, ConfigError> {
        let default_category = self.default_category.trim();
        if default_category.is_empty() {
            return Err(ConfigError::ConfigInvalid(
                "default_category must not be empty".to_string(),
            ));
        }

        let Some(categories) = &self.categories else {
            return Ok(CategoryMap::standard().with_default(default_category));
        };

        let mut map = CategoryMap::empty(default_category);
        for (extension, category) in categories {
            if extension.trim_start_matches('.').is_empty() || category.trim().is_empty() {
                return Err(ConfigError::ConfigInvalid(format!(
                    "bad category mapping '{}' = '{}'",
                    extension, category
                )));
            }
            map.insert(extension, category.trim());
        }
        Ok(map)
    }
}

/// Rules deciding which walked files the planners ever see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files and directories. Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Whitelist; a match overrides every exclude rule.
    #[serde(default)]
    pub include: IncludeRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the path relative to the walk root.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions without the leading dot, case-insensitive.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regexes matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Config {
    /// Loads configuration following the lookup order in the module docs.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly provided file cannot be read or parsed,
    /// or if a discovered file is malformed.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_NAME);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("tidykit")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses a configuration document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }
}

/// Filter rules with every pattern compiled up front.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Filters that let every file through, hidden ones included.
    pub fn allow_all() -> Self {
        Self {
            enable_hidden_files: true,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns an error if any glob or regex pattern is invalid.
    pub fn compile(rules: &FilterRules) -> Result<Self, ConfigError> {
        let compile_globs = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Pattern::new(p).map_err(|_| ConfigError::InvalidGlobPattern(p.clone())))
                .collect::<Result<Vec<_>, _>>()
        };

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            exclude_regexes,
            include_patterns: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Decides whether a file at `rel_path` (relative to the walk root) is kept.
    ///
    /// Include patterns win over everything; then hidden files, exact names,
    /// extensions, globs and regexes exclude in that order.
    pub fn should_include(&self, rel_path: &Path) -> bool {
        let file_name = rel_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches_path(rel_path))
        {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = rel_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path(rel_path))
        {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }

    /// Whether the walker should descend into a directory with this name.
    pub fn should_descend(&self, dir_name: &str) -> bool {
        self.enable_hidden_files || !dir_name.starts_with('.')
    }
}
