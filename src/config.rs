//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/rulecraft/rulecraft.toml`
//! 3. Project config: `<project_dir>/rulecraft.toml`
//! 4. Environment variables: `RULECRAFT_*` prefix

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::builder::DEFAULT_EXCERPT_WIDTH;
use crate::application::schema::DEFAULT_RULE_FORMAT;
use crate::application::ApplicationError;

/// Unified configuration for rulecraft.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Rule format used when a fragment does not name one
    pub rule_format: String,
    /// Directory of external `<version>.json` rule-format schemas
    pub schema_dir: Option<PathBuf>,
    /// Capability catalog produced by the generator
    pub catalog: Option<PathBuf>,
    /// Directory that relative call-site file names are resolved against
    pub source_root: PathBuf,
    /// Width of the line excerpt shown for fragment validation errors
    pub excerpt_width: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rule_format: DEFAULT_RULE_FORMAT.to_string(),
            schema_dir: None,
            catalog: None,
            source_root: PathBuf::from("."),
            excerpt_width: DEFAULT_EXCERPT_WIDTH,
        }
    }
}

/// Raw settings for intermediate parsing (None = not specified, inherit).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub rule_format: Option<String>,
    pub schema_dir: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub source_root: Option<PathBuf>,
    pub excerpt_width: Option<usize>,
}

/// Get the XDG config directory for rulecraft.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "rulecraft").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("rulecraft.toml"))
}

/// Get the path to the project config file.
pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join("rulecraft.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

/// Expand `~`, `$VAR` and `${VAR}` in a path string.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    shellexpand::full(raw.as_ref())
        .map(|s| PathBuf::from(s.into_owned()))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl Settings {
    /// Overlay wins where it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            rule_format: overlay
                .rule_format
                .clone()
                .unwrap_or_else(|| self.rule_format.clone()),
            schema_dir: overlay.schema_dir.clone().or_else(|| self.schema_dir.clone()),
            catalog: overlay.catalog.clone().or_else(|| self.catalog.clone()),
            source_root: overlay
                .source_root
                .clone()
                .unwrap_or_else(|| self.source_root.clone()),
            excerpt_width: overlay.excerpt_width.unwrap_or(self.excerpt_width),
        }
    }

    /// Relative paths in a config file are relative to that file's directory.
    fn anchor_paths(mut raw: RawSettings, base: &Path) -> RawSettings {
        let anchor = |p: PathBuf| {
            let p = expand_path(&p);
            if p.is_absolute() {
                p
            } else {
                base.join(p)
            }
        };
        raw.schema_dir = raw.schema_dir.map(anchor);
        raw.catalog = raw.catalog.map(anchor);
        raw.source_root = raw.source_root.map(anchor);
        raw
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `project_dir` - Optional project directory holding `rulecraft.toml`
    pub fn load(project_dir: Option<&Path>) -> Result<Self, ApplicationError> {
        // 1. Start with defaults
        let mut current = Self::default();

        // 2. Global config
        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                let raw = load_raw_settings(&global_path)?;
                let base = global_path.parent().unwrap_or(Path::new("."));
                current = current.merge_with(&Self::anchor_paths(raw, base));
            }
        }

        // 3. Project config
        if let Some(project) = project_dir {
            let local_path = project_config_path(project);
            if local_path.exists() {
                let raw = load_raw_settings(&local_path)?;
                current = current.merge_with(&Self::anchor_paths(raw, project));
            }
        }

        // 4. Environment variables (explicit override)
        current = Self::apply_env_overrides(current)?;

        current.source_root = expand_path(&current.source_root);
        Ok(current)
    }

    /// Apply RULECRAFT_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("RULECRAFT").separator("__"))
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_string("rule_format") {
            settings.rule_format = val;
        }
        if let Ok(val) = config.get_string("schema_dir") {
            settings.schema_dir = Some(expand_path(Path::new(&val)));
        }
        if let Ok(val) = config.get_string("catalog") {
            settings.catalog = Some(expand_path(Path::new(&val)));
        }
        if let Ok(val) = config.get_string("source_root") {
            settings.source_root = PathBuf::from(val);
        }
        if let Ok(val) = config.get_int("excerpt_width") {
            settings.excerpt_width = usize::try_from(val).map_err(|_| ApplicationError::Config {
                message: format!("excerpt_width must be non-negative, got {val}"),
            })?;
        }

        Ok(settings)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        format!(
            r#"# rulecraft configuration
#
# Locations (by precedence, lowest to highest):
#   Global:  ~/.config/rulecraft/rulecraft.toml
#   Project: <project_dir>/rulecraft.toml
#   Env:     RULECRAFT_* environment variables
#
# Relative paths are resolved against the directory of the config file.

# Rule format assumed when a fragment has no "ruleFormat" field
# rule_format = "{DEFAULT_RULE_FORMAT}"

# Directory of external rule-format schemas, one <version>.json per version
# schema_dir = "schemas"

# Capability catalog generated from the provisioning API
# catalog = "catalog.json"

# Directory relative call-site file names are resolved against
# source_root = "."

# Width of the source excerpt printed for fragment errors
# excerpt_width = {DEFAULT_EXCERPT_WIDTH}
"#
        )
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
