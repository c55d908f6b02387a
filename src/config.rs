use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Site layout and build options, usually read from `pagesmith.yaml`.
///
/// Every path is relative to the application root handed to [`SiteRoot::new`].
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    pub output_path: PathBuf,
    pub controller_path: PathBuf,
    pub pages_path: PathBuf,
    pub wrappers_path: PathBuf,
    pub includes_path: PathBuf,
    /// Target extension embedded in page and fragment file names (`name.<extension>.j2`).
    pub extension: String,
    /// Suffix marking a file as a template, stripped from output names.
    pub template_suffix: String,
    pub strict_undefined: bool,
    pub fail_fast: bool,
    /// Site-wide parameters, overridden by caller parameters and page data.
    pub globals: serde_json::Map<String, serde_json::Value>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("docs"),
            controller_path: PathBuf::from("controllers"),
            pages_path: PathBuf::from("templates/pages"),
            wrappers_path: PathBuf::from("templates/partials/wrappers"),
            includes_path: PathBuf::from("templates/partials/includes"),
            extension: "html".to_string(),
            template_suffix: "j2".to_string(),
            strict_undefined: false,
            fail_fast: true,
            globals: serde_json::Map::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // an empty document deserializes to unit, not to a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

/// The resolved directory roots of one site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRoot {
    pub pages: PathBuf,
    pub controllers: PathBuf,
    pub wrappers: PathBuf,
    pub includes: PathBuf,
    pub output: PathBuf,
    pub extension: String,
    pub template_suffix: String,
}

impl SiteRoot {
    pub fn new(app_root: &Path, config: &SiteConfig) -> Self {
        Self {
            pages: app_root.join(&config.pages_path),
            controllers: app_root.join(&config.controller_path),
            wrappers: app_root.join(&config.wrappers_path),
            includes: app_root.join(&config.includes_path),
            output: app_root.join(&config.output_path),
            extension: config.extension.clone(),
            template_suffix: config.template_suffix.clone(),
        }
    }
}
