//! Module graph data structures
//!
//! The graph owns every module record discovered during a build, plus the
//! dependency edges between them. Cycles are permitted; each module is
//! inserted at most once per build.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Arena index of a module within one build's graph.
pub type ModuleIdx = usize;

/// Types of modules the bundler can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    JavaScript,
    TypeScript,
    Jsx,
    Tsx,
    Json,
    Css,
    /// Non-module file referenced by import (image, font, ...). Copied
    /// byte-for-byte and exposed as a URL export.
    Asset,
}

impl ModuleType {
    /// Determine module type from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "js" | "mjs" | "cjs" => ModuleType::JavaScript,
            "ts" | "mts" | "cts" => ModuleType::TypeScript,
            "jsx" => ModuleType::Jsx,
            "tsx" => ModuleType::Tsx,
            "json" => ModuleType::Json,
            "css" => ModuleType::Css,
            _ => ModuleType::Asset,
        }
    }

    /// Detect module type from a path
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(ModuleType::Asset)
    }

    /// Check if this is a JavaScript-like module
    pub fn is_js_like(&self) -> bool {
        matches!(
            self,
            ModuleType::JavaScript | ModuleType::TypeScript | ModuleType::Jsx | ModuleType::Tsx
        )
    }
}

/// Kind of an import site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Plain `import ... from` / `require(...)`
    Static,
    /// `import(...)` - a split point
    Dynamic,
    /// `import type ...` - erased during transform, never becomes an edge
    TypeOnly,
}

/// A single import site found in a module's source, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub specifier: String,
    pub imported_names: Vec<String>,
    pub kind: ImportKind,
}

/// A directed dependency edge between two modules in the graph
#[derive(Debug, Clone, Copy)]
pub struct DependencyEdge {
    pub from: ModuleIdx,
    pub to: ModuleIdx,
    pub kind: ImportKind,
}

/// A module in the dependency graph
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Stable identity: cwd-relative path, `<inline>:<name>`, or the bare
    /// specifier for externalized packages
    pub id: String,

    /// Absolute path on disk (None for inline entries and externals)
    pub path: Option<PathBuf>,

    /// Original source code
    pub source: String,

    /// Digest of raw source bytes plus the active transform options
    pub source_hash: String,

    /// Module type
    pub module_type: ModuleType,

    /// Whether this is an entry point
    pub is_entry: bool,

    /// Entry index this module roots, for entries only
    pub entry_group: Option<usize>,

    /// True if this record stands for an externalized package
    pub external: bool,

    /// Exported names in source order (`default`, `*` included)
    pub exports: Vec<String>,

    /// Import sites in source order
    pub imports: Vec<ImportRecord>,

    /// Per-build resolution of each import specifier to a module id
    /// (externals get an `ext:` prefix)
    pub resolutions: HashMap<String, String>,

    /// Transformed (but not yet chunk-assembled) code
    pub code: String,

    /// Size of the transformed code, used by the splitter
    pub size_bytes: usize,

    /// Whether the module body has observable side effects
    pub has_side_effects: bool,
}

impl ModuleRecord {
    /// Placeholder record for an externalized package specifier.
    pub fn external(specifier: &str) -> Self {
        Self {
            id: specifier.to_string(),
            path: None,
            source: String::new(),
            source_hash: String::new(),
            module_type: ModuleType::JavaScript,
            is_entry: false,
            entry_group: None,
            external: true,
            exports: Vec::new(),
            imports: Vec::new(),
            resolutions: HashMap::new(),
            code: String::new(),
            size_bytes: 0,
            has_side_effects: true,
        }
    }
}

/// The module dependency graph
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Arena of module records, indexed by insertion order
    modules: Vec<ModuleRecord>,

    /// Map from stable module id to arena index
    id_to_idx: HashMap<String, ModuleIdx>,

    /// All dependency edges
    edges: Vec<DependencyEdge>,

    /// Outgoing adjacency per module, in import order
    outgoing: Vec<Vec<(ModuleIdx, ImportKind)>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the graph, returning its arena index. A record with
    /// an id already present is not inserted again.
    pub fn add_module(&mut self, module: ModuleRecord) -> ModuleIdx {
        if let Some(&idx) = self.id_to_idx.get(&module.id) {
            return idx;
        }

        let idx = self.modules.len();
        self.id_to_idx.insert(module.id.clone(), idx);
        self.modules.push(module);
        self.outgoing.push(Vec::new());
        idx
    }

    /// Add a dependency edge between modules
    pub fn add_edge(&mut self, from: ModuleIdx, to: ModuleIdx, kind: ImportKind) {
        self.edges.push(DependencyEdge { from, to, kind });
        self.outgoing[from].push((to, kind));
    }

    pub fn idx_of(&self, id: &str) -> Option<ModuleIdx> {
        self.id_to_idx.get(id).copied()
    }

    pub fn module(&self, idx: ModuleIdx) -> &ModuleRecord {
        &self.modules[idx]
    }

    pub fn module_mut(&mut self, idx: ModuleIdx) -> &mut ModuleRecord {
        &mut self.modules[idx]
    }

    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Outgoing edges of a module, in import order
    pub fn outgoing(&self, idx: ModuleIdx) -> &[(ModuleIdx, ImportKind)] {
        &self.outgoing[idx]
    }

    /// Number of bundled (non-external) modules
    pub fn module_count(&self) -> usize {
        self.modules.iter().filter(|m| !m.external).count()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Entry modules in entry-group order
    pub fn entries(&self) -> Vec<ModuleIdx> {
        let mut entries: Vec<ModuleIdx> = (0..self.modules.len())
            .filter(|&i| self.modules[i].is_entry)
            .collect();
        entries.sort_by_key(|&i| self.modules[i].entry_group);
        entries
    }

    /// Deterministic rank per module: BFS from the entries in entry order,
    /// following each module's imports in source order. Output ordering
    /// decisions key off this rank, never off arena insertion order, so a
    /// fixed input produces identical output regardless of how concurrent
    /// loading interleaved.
    pub fn canonical_ranks(&self) -> Vec<usize> {
        let mut rank = vec![usize::MAX; self.modules.len()];
        let mut next = 0usize;
        let mut queue = VecDeque::new();

        for entry in self.entries() {
            if rank[entry] == usize::MAX {
                rank[entry] = next;
                next += 1;
                queue.push_back(entry);
            }
        }

        while let Some(idx) = queue.pop_front() {
            for &(to, _) in &self.outgoing[idx] {
                if rank[to] == usize::MAX {
                    rank[to] = next;
                    next += 1;
                    queue.push_back(to);
                }
            }
        }

        // Anything unreachable (never the case for a well-formed build)
        // sorts after the reachable set.
        for r in rank.iter_mut() {
            if *r == usize::MAX {
                *r = next;
                next += 1;
            }
        }

        rank
    }

    /// Non-external modules reachable from `root` over static edges,
    /// without traversing through dynamic edges.
    pub fn static_closure(&self, root: ModuleIdx) -> HashSet<ModuleIdx> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        visited.insert(root);
        queue.push_back(root);

        while let Some(idx) = queue.pop_front() {
            for &(to, kind) in &self.outgoing[idx] {
                if kind != ImportKind::Static || self.modules[to].external {
                    continue;
                }
                if visited.insert(to) {
                    queue.push_back(to);
                }
            }
        }

        visited.retain(|&i| !self.modules[i].external);
        visited
    }

    /// Non-external modules reachable from `root` over static and dynamic
    /// edges (the full bundled closure).
    pub fn full_closure(&self, root: ModuleIdx) -> HashSet<ModuleIdx> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        visited.insert(root);
        queue.push_back(root);

        while let Some(idx) = queue.pop_front() {
            for &(to, _) in &self.outgoing[idx] {
                if self.modules[to].external {
                    continue;
                }
                if visited.insert(to) {
                    queue.push_back(to);
                }
            }
        }

        visited.retain(|&i| !self.modules[i].external);
        visited
    }

    /// Distinct non-external targets of dynamic edges
    pub fn dynamic_targets(&self) -> Vec<ModuleIdx> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for edge in &self.edges {
            if edge.kind == ImportKind::Dynamic
                && !self.modules[edge.to].external
                && seen.insert(edge.to)
            {
                targets.push(edge.to);
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, is_entry: bool) -> ModuleRecord {
        ModuleRecord {
            id: id.to_string(),
            path: None,
            source: String::new(),
            source_hash: String::new(),
            module_type: ModuleType::JavaScript,
            is_entry,
            entry_group: if is_entry { Some(0) } else { None },
            external: false,
            exports: Vec::new(),
            imports: Vec::new(),
            resolutions: HashMap::new(),
            code: String::new(),
            size_bytes: 0,
            has_side_effects: true,
        }
    }

    #[test]
    fn test_module_type_detection() {
        assert_eq!(ModuleType::from_extension("js"), ModuleType::JavaScript);
        assert_eq!(ModuleType::from_extension("ts"), ModuleType::TypeScript);
        assert_eq!(ModuleType::from_extension("jsx"), ModuleType::Jsx);
        assert_eq!(ModuleType::from_extension("tsx"), ModuleType::Tsx);
        assert_eq!(ModuleType::from_extension("json"), ModuleType::Json);
        assert_eq!(ModuleType::from_extension("css"), ModuleType::Css);
        assert_eq!(ModuleType::from_extension("png"), ModuleType::Asset);
    }

    #[test]
    fn test_add_module_dedupes_by_id() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(record("src/a.js", true));
        let b = graph.add_module(record("src/a.js", true));
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_static_closure_stops_at_dynamic_edges() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(record("a.js", true));
        let b = graph.add_module(record("b.js", false));
        let c = graph.add_module(record("c.js", false));
        graph.add_edge(a, b, ImportKind::Static);
        graph.add_edge(b, c, ImportKind::Dynamic);

        let closure = graph.static_closure(a);
        assert!(closure.contains(&a));
        assert!(closure.contains(&b));
        assert!(!closure.contains(&c));

        let full = graph.full_closure(a);
        assert!(full.contains(&c));
    }

    #[test]
    fn test_cycle_does_not_hang_traversal() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(record("a.js", true));
        let b = graph.add_module(record("b.js", false));
        graph.add_edge(a, b, ImportKind::Static);
        graph.add_edge(b, a, ImportKind::Static);

        let closure = graph.static_closure(a);
        assert_eq!(closure.len(), 2);

        let ranks = graph.canonical_ranks();
        assert_eq!(ranks[a], 0);
        assert_eq!(ranks[b], 1);
    }

    #[test]
    fn test_canonical_ranks_ignore_insertion_order() {
        // Same logical graph, different arena order: ranks must agree.
        let mut g1 = ModuleGraph::new();
        let a1 = g1.add_module(record("a.js", true));
        let b1 = g1.add_module(record("b.js", false));
        let c1 = g1.add_module(record("c.js", false));
        g1.add_edge(a1, b1, ImportKind::Static);
        g1.add_edge(a1, c1, ImportKind::Static);

        let mut g2 = ModuleGraph::new();
        let c2 = g2.add_module(record("c.js", false));
        let b2 = g2.add_module(record("b.js", false));
        let a2 = g2.add_module(record("a.js", true));
        g2.add_edge(a2, b2, ImportKind::Static);
        g2.add_edge(a2, c2, ImportKind::Static);

        let r1 = g1.canonical_ranks();
        let r2 = g2.canonical_ranks();
        assert_eq!(r1[b1], r2[b2]);
        assert_eq!(r1[c1], r2[c2]);
    }
}
