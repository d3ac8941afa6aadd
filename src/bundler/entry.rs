//! Entry point specifications
//!
//! An entry is either a file on disk or an inline source string. Both are
//! normalized to a stable module id plus source text before entering the
//! graph pipeline.

use std::path::{Path, PathBuf};

use super::graph::ModuleType;

/// What to bundle: a file path, or source handed in directly.
#[derive(Debug, Clone)]
pub enum EntrySpec {
    /// Entry read from the filesystem
    File(PathBuf),

    /// Inline source that never touches the filesystem
    Inline {
        name: String,
        content: String,
        loader: Option<ModuleType>,
    },
}

/// A named entry point. Names become output chunk names.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub name: String,
    pub spec: EntrySpec,
}

impl EntryPoint {
    /// Entry from a path, named after the file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = entry_name_for_path(&path);
        Self {
            name,
            spec: EntrySpec::File(path),
        }
    }

    /// Entry from a path with an explicit output name.
    pub fn named(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            spec: EntrySpec::File(path.into()),
        }
    }

    /// Entry from inline source.
    pub fn inline(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: name.clone(),
            spec: EntrySpec::Inline {
                name,
                content: content.into(),
                loader: None,
            },
        }
    }

    /// Entry from inline source with an explicit loader.
    pub fn inline_with_loader(
        name: impl Into<String>,
        content: impl Into<String>,
        loader: ModuleType,
    ) -> Self {
        let name = name.into();
        Self {
            name: name.clone(),
            spec: EntrySpec::Inline {
                name,
                content: content.into(),
                loader: Some(loader),
            },
        }
    }

    /// The synthetic module id for inline entries.
    pub fn inline_id(name: &str) -> String {
        format!("<inline>:{}", name)
    }
}

/// Derive a chunk name from an entry path (file stem, `bundle` fallback).
pub fn entry_name_for_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "bundle".to_string())
}
