//! Configuration schema definitions

use serde::{Deserialize, Serialize};

use crate::bundler::{CodeSplittingOptions, Format, Platform, SourcemapMode};

/// Project metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Write manifest.json mapping entry names to emitted files
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            manifest: true,
        }
    }
}

fn default_output_dir() -> String {
    "dist".to_string()
}

fn default_true() -> bool {
    true
}

/// Build defaults, overridable from the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Output module format
    #[serde(default)]
    pub format: Format,

    /// Target platform
    #[serde(default)]
    pub platform: Platform,

    /// Minify emitted chunks
    #[serde(default)]
    pub minify: bool,

    /// Source map strategy
    #[serde(default)]
    pub sourcemap: SourcemapMode,

    /// Packages never bundled
    #[serde(default)]
    pub external: Vec<String>,

    /// Externalize every dependency from the nearest package.json
    #[serde(default)]
    pub external_from_manifest: bool,

    /// Code splitting thresholds (app builds only)
    #[serde(default)]
    pub splitting: Option<CodeSplittingOptions>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            format: Format::default(),
            platform: Platform::default(),
            minify: false,
            sourcemap: SourcemapMode::default(),
            external: Vec::new(),
            external_from_manifest: false,
            splitting: None,
        }
    }
}
