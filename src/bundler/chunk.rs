//! Chunk data structures for code splitting

use super::graph::ModuleIdx;

/// Kind of chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Entry point chunk - loaded immediately
    Entry,
    /// Dynamic chunk - loaded on demand via dynamic import
    Dynamic,
    /// Shared chunk - modules used by several roots
    Shared,
}

/// A chunk is a group of modules emitted into one output file
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk name (entry name, or derived from the rooting module)
    pub name: String,

    /// Kind of chunk
    pub kind: ChunkKind,

    /// Entry index for entry chunks, used for merge tie-breaks
    pub entry_index: Option<usize>,

    /// Module indices in topological (initialization) order
    pub modules: Vec<ModuleIdx>,

    /// Chunks this chunk statically depends on (registration must precede)
    pub static_deps: Vec<usize>,

    /// Chunks this chunk loads on demand
    pub dynamic_deps: Vec<usize>,

    /// Final output file name, assigned by the emitter
    pub file_name: String,
}

impl Chunk {
    pub fn entry(name: String, entry_index: usize, modules: Vec<ModuleIdx>) -> Self {
        Self {
            name,
            kind: ChunkKind::Entry,
            entry_index: Some(entry_index),
            modules,
            static_deps: Vec::new(),
            dynamic_deps: Vec::new(),
            file_name: String::new(),
        }
    }

    pub fn dynamic(name: String, modules: Vec<ModuleIdx>) -> Self {
        Self {
            name,
            kind: ChunkKind::Dynamic,
            entry_index: None,
            modules,
            static_deps: Vec::new(),
            dynamic_deps: Vec::new(),
            file_name: String::new(),
        }
    }

    pub fn shared(name: String, modules: Vec<ModuleIdx>) -> Self {
        Self {
            name,
            kind: ChunkKind::Shared,
            entry_index: None,
            modules,
            static_deps: Vec::new(),
            dynamic_deps: Vec::new(),
            file_name: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }
}
