//! Build options
//!
//! Programmatic configuration for a build. The four mode constructors
//! (`bundle`, `library`, `app`, `components`) mirror the CLI subcommands;
//! the builder methods cover everything else.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bundler::entry::EntryPoint;
use crate::error::{Error, Result};

/// How entries are partitioned into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Single entry, single chunk, no splitting.
    Bundle,
    /// One chunk per entry; dependencies bundled except externalized ones.
    Library,
    /// Entries share a chunk graph; code splitting enabled.
    App,
    /// One independent self-contained chunk per entry; no sharing.
    Components,
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Bundle => write!(f, "bundle"),
            BuildMode::Library => write!(f, "library"),
            BuildMode::App => write!(f, "app"),
            BuildMode::Components => write!(f, "components"),
        }
    }
}

/// Output module format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Esm,
    Cjs,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Esm => "esm",
            Format::Cjs => "cjs",
        }
    }
}

/// Target runtime platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Browser,
    Node,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Browser => "browser",
            Platform::Node => "node",
        }
    }
}

/// Source map generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcemapMode {
    #[default]
    None,
    /// Embed a data URI in the chunk
    Inline,
    /// Write a sibling `.map` file plus a reference comment
    External,
}

/// Thresholds for shared-chunk extraction (app mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSplittingOptions {
    /// Minimum chunk size in bytes
    pub min_size: usize,

    /// Minimum number of distinct root chunks that must share a module
    /// before it is worth extracting (minimum: 2)
    pub min_imports: usize,
}

impl CodeSplittingOptions {
    pub fn new(min_size: usize, min_imports: usize) -> Self {
        Self {
            min_size,
            min_imports,
        }
    }
}

impl Default for CodeSplittingOptions {
    fn default() -> Self {
        Self {
            min_size: 20_000,
            min_imports: 2,
        }
    }
}

/// Configuration options for a build operation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Ordered entry points
    pub entries: Vec<EntryPoint>,

    /// Chunking mode
    pub mode: BuildMode,

    /// Destination directory, created if absent
    pub out_dir: PathBuf,

    /// Output module format
    pub format: Format,

    /// Target platform
    pub platform: Platform,

    /// Whitespace/comment compression on emitted chunks
    pub minify: bool,

    /// Source map strategy
    pub sourcemap: SourcemapMode,

    /// Package names never bundled
    pub external: Vec<String>,

    /// Externalize every dependency declared in the nearest package manifest
    pub external_from_manifest: bool,

    /// Splitting thresholds; only valid in app mode
    pub code_splitting: Option<CodeSplittingOptions>,

    /// Working directory for relative resolution (defaults to the process cwd)
    pub cwd: Option<PathBuf>,

    /// Write a manifest.json mapping entry names to emitted files
    pub manifest: bool,
}

impl BuildOptions {
    fn with_mode(entries: Vec<EntryPoint>, mode: BuildMode) -> Self {
        Self {
            entries,
            mode,
            out_dir: PathBuf::from("dist"),
            format: Format::default(),
            platform: Platform::default(),
            minify: false,
            sourcemap: SourcemapMode::default(),
            external: Vec::new(),
            external_from_manifest: false,
            code_splitting: if mode == BuildMode::App {
                Some(CodeSplittingOptions::default())
            } else {
                None
            },
            cwd: None,
            manifest: true,
        }
    }

    /// Bundle a single entry into one chunk.
    pub fn bundle(entry: impl AsRef<Path>) -> Self {
        Self::with_mode(
            vec![EntryPoint::from_path(entry.as_ref())],
            BuildMode::Bundle,
        )
    }

    /// Bundle inline source into one chunk.
    pub fn bundle_inline(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_mode(vec![EntryPoint::inline(name, content)], BuildMode::Bundle)
    }

    /// Build a library: one chunk per entry, manifest dependencies
    /// externalized automatically.
    pub fn library<P, I>(entries: I) -> Self
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = P>,
    {
        let entries = entries
            .into_iter()
            .map(|p| EntryPoint::from_path(p.as_ref()))
            .collect();
        let mut opts = Self::with_mode(entries, BuildMode::Library);
        opts.external_from_manifest = true;
        opts.platform = Platform::Node;
        opts
    }

    /// Build an app with code splitting.
    pub fn app<P, I>(entries: I) -> Self
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = P>,
    {
        let entries = entries
            .into_iter()
            .map(|p| EntryPoint::from_path(p.as_ref()))
            .collect();
        Self::with_mode(entries, BuildMode::App)
    }

    /// Build a component library: one independent chunk per entry.
    pub fn components<P, I>(entries: I) -> Self
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = P>,
    {
        let entries = entries
            .into_iter()
            .map(|p| EntryPoint::from_path(p.as_ref()))
            .collect();
        Self::with_mode(entries, BuildMode::Components)
    }

    /// Build from pre-constructed entry points.
    pub fn from_entries(entries: Vec<EntryPoint>, mode: BuildMode) -> Self {
        Self::with_mode(entries, mode)
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = dir.into();
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn minify(mut self, enabled: bool) -> Self {
        self.minify = enabled;
        self
    }

    pub fn sourcemap(mut self, mode: SourcemapMode) -> Self {
        self.sourcemap = mode;
        self
    }

    /// Add packages that should never be bundled.
    pub fn external<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pkg in packages {
            let value = pkg.into();
            if !self.external.contains(&value) {
                self.external.push(value);
            }
        }
        self
    }

    pub fn external_from_manifest(mut self, enabled: bool) -> Self {
        self.external_from_manifest = enabled;
        self
    }

    pub fn code_splitting(mut self, opts: CodeSplittingOptions) -> Self {
        self.code_splitting = Some(opts);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn manifest(mut self, enabled: bool) -> Self {
        self.manifest = enabled;
        self
    }

    /// Working directory the build resolves against, canonicalized so
    /// module ids stay stable across symlinked paths.
    pub fn resolved_cwd(&self) -> PathBuf {
        let cwd = self
            .cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        std::fs::canonicalize(&cwd).unwrap_or(cwd)
    }

    /// Validate the options for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one entry point is required".into(),
            ));
        }

        if self.mode == BuildMode::Bundle && self.entries.len() != 1 {
            return Err(Error::InvalidConfig(format!(
                "bundle mode takes exactly one entry point, got {}",
                self.entries.len()
            )));
        }

        if self.mode != BuildMode::App && self.code_splitting.is_some() {
            return Err(Error::InvalidConfig(format!(
                "code splitting thresholds are only valid in app mode, not {} mode",
                self.mode
            )));
        }

        if self.mode == BuildMode::App {
            if self.entries.len() < 2 {
                return Err(Error::InvalidConfig(
                    "app mode code splitting requires multiple entry points".into(),
                ));
            }
            if let Some(split) = &self.code_splitting {
                if split.min_imports < 2 {
                    return Err(Error::InvalidConfig(
                        "code_splitting.min_imports must be at least 2".into(),
                    ));
                }
            }
        }

        if self.mode == BuildMode::Components && self.entries.len() < 2 {
            return Err(Error::InvalidConfig(
                "components mode requires multiple entry points".into(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for entry in &self.entries {
            if !names.insert(entry.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate entry name '{}'",
                    entry.name
                )));
            }
        }

        Ok(())
    }
}
