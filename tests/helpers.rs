//! Shared test utilities for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rivet_lib::{BuildResult, OutputChunk};
use tempfile::TempDir;

/// Fresh temporary project directory
pub fn temp_project() -> TempDir {
    TempDir::new().expect("temp dir")
}

/// Write a file under the project root, creating parent directories
pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(&path, content).expect("write fixture file");
}

/// The conventional output directory for a test project
pub fn dist_dir(project: &TempDir) -> PathBuf {
    project.path().join("dist")
}

/// The single entry chunk of a build result
pub fn entry_chunk(result: &BuildResult) -> &OutputChunk {
    result
        .chunks
        .iter()
        .find(|c| c.is_entry)
        .expect("expected an entry chunk")
}

/// Find the chunk containing a module whose id ends with `suffix`
pub fn chunk_with_module<'a>(result: &'a BuildResult, suffix: &str) -> &'a OutputChunk {
    result
        .chunks
        .iter()
        .find(|c| c.modules.iter().any(|m| m.ends_with(suffix)))
        .unwrap_or_else(|| panic!("no chunk contains a module ending in '{}'", suffix))
}

/// Assert that a chunk's code contains a substring
pub fn assert_chunk_contains(chunk: &OutputChunk, substring: &str) {
    assert!(
        chunk.code.contains(substring),
        "expected chunk '{}' to contain '{}'.\nChunk preview (first 600 chars): {}",
        chunk.file_name,
        substring,
        &chunk.code[..chunk.code.len().min(600)]
    );
}

/// Assert that a chunk's code does NOT contain a substring
pub fn assert_chunk_not_contains(chunk: &OutputChunk, substring: &str) {
    assert!(
        !chunk.code.contains(substring),
        "expected chunk '{}' NOT to contain '{}'",
        chunk.file_name,
        substring
    );
}
