//! Configuration handling
//!
//! Parses and manages rivet.toml project files. CLI flags override
//! anything set here.

mod schema;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use schema::*;

use crate::bundler::{BuildMode, BuildOptions, EntryPoint};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project metadata
    pub project: ProjectConfig,

    /// Named entry points for bundling (name becomes the chunk name)
    #[serde(default)]
    pub entrypoints: BTreeMap<String, String>,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Build defaults
    #[serde(default)]
    pub build: BuildConfig,

    /// Root directory (computed from config file location)
    #[serde(skip)]
    pub root: PathBuf,
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let content = fs::read_to_string(&canonical_path)
            .with_context(|| format!("Failed to read config file: {}", canonical_path.display()))?;

        let mut config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse rivet.toml")?;

        config.root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            project: ProjectConfig {
                name: "my-app".to_string(),
                version: "0.1.0".to_string(),
            },
            entrypoints: {
                let mut map = BTreeMap::new();
                map.insert("main".to_string(), "src/main.js".to_string());
                map
            },
            output: OutputConfig::default(),
            build: BuildConfig::default(),
            root: PathBuf::from("."),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.entrypoints.is_empty() {
            anyhow::bail!("At least one entrypoint must be specified in rivet.toml");
        }

        for (name, path) in &self.entrypoints {
            let full_path = self.root.join(path);
            if !full_path.exists() {
                anyhow::bail!(
                    "Entrypoint '{}' points to non-existent file: {}",
                    name,
                    full_path.display()
                );
            }
        }

        Ok(())
    }

    /// Get the absolute output directory path
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.dir)
    }

    /// Get all entrypoints as named entry points, in name order
    pub fn all_entrypoints(&self) -> Vec<EntryPoint> {
        self.entrypoints
            .iter()
            .map(|(name, path)| EntryPoint::named(name, self.root.join(path)))
            .collect()
    }

    /// Turn this config into build options for the given mode.
    pub fn to_build_options(&self, mode: BuildMode) -> BuildOptions {
        let mut options = BuildOptions::from_entries(self.all_entrypoints(), mode)
            .out_dir(self.output_dir())
            .format(self.build.format)
            .platform(self.build.platform)
            .minify(self.build.minify)
            .sourcemap(self.build.sourcemap)
            .external(self.build.external.iter().cloned())
            .external_from_manifest(self.build.external_from_manifest)
            .cwd(self.root.clone())
            .manifest(self.output.manifest);

        if mode == BuildMode::App {
            if let Some(splitting) = self.build.splitting {
                options = options.code_splitting(splitting);
            }
        }

        options
    }
}
