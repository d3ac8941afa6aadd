//! Core bundler implementation
//!
//! The pipeline: normalize entries, build the module graph (concurrent
//! per-module read/transform/resolve fan-out, serialized graph insertion),
//! partition into chunks, render, then write. Only the transform cache
//! survives across builds; everything else is created fresh per build.

pub mod chunk;
pub mod emit;
pub mod entry;
pub mod graph;
pub mod options;
pub mod sourcemap;
pub mod splitter;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resolver::{Resolution, Resolver};
use crate::transform::cache::TransformCache;
use crate::transform::{TransformOptions, Transformer};
use crate::utils;

pub use chunk::{Chunk, ChunkKind};
pub use emit::{OutputAsset, OutputChunk};
pub use entry::{EntryPoint, EntrySpec};
pub use graph::{ImportKind, ImportRecord, ModuleGraph, ModuleRecord, ModuleType};
pub use options::{
    BuildMode, BuildOptions, CodeSplittingOptions, Format, Platform, SourcemapMode,
};

/// Final build statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildStats {
    pub total_modules: usize,
    pub total_chunks: usize,
    pub total_size: usize,
    pub duration_ms: u64,
    pub cache_hit_rate: f64,
}

/// Result of a build operation, immutable once returned.
#[derive(Debug)]
pub struct BuildResult {
    pub chunks: Vec<OutputChunk>,
    pub assets: Vec<OutputAsset>,
    pub stats: BuildStats,
}

impl BuildResult {
    pub fn find_chunk(&self, file_name: &str) -> Option<&OutputChunk> {
        self.chunks.iter().find(|c| c.file_name == file_name)
    }

    pub fn entry_chunks(&self) -> impl Iterator<Item = &OutputChunk> {
        self.chunks.iter().filter(|c| c.is_entry)
    }
}

/// Handle to abort a running build. In-flight module work is allowed to
/// finish, but its results are discarded and nothing is written.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The main bundler
pub struct Bundler {
    options: BuildOptions,
    cache: Arc<TransformCache>,
    resolver: Arc<Resolver>,
    transformer: Arc<Transformer>,
    cancel: CancelFlag,
}

impl Bundler {
    /// Bundler with a private transform cache.
    pub fn new(options: BuildOptions) -> Result<Self> {
        Self::with_cache(options, Arc::new(TransformCache::new()))
    }

    /// Bundler sharing an existing cache handle. The cache outlives the
    /// build; hand the same handle to later bundlers to get warm builds.
    pub fn with_cache(options: BuildOptions, cache: Arc<TransformCache>) -> Result<Self> {
        let cwd = options.resolved_cwd();
        let resolver = Resolver::new(
            cwd,
            options.platform,
            &options.external,
            options.external_from_manifest,
        )?;

        Ok(Self {
            options,
            cache,
            resolver: Arc::new(resolver),
            transformer: Arc::new(Transformer::new()),
            cancel: CancelFlag::default(),
        })
    }

    /// Handle for aborting this build from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the full pipeline and write output to the configured directory.
    pub async fn build(&self) -> Result<BuildResult> {
        self.options.validate()?;
        let start = Instant::now();

        info!("building module graph...");
        let (graph, cache_hits, cache_misses) = self.load_graph().await?;
        debug!(
            "graph complete: {} modules, {} cache hits, {} misses",
            graph.module_count(),
            cache_hits,
            cache_misses
        );

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!("generating chunks...");
        let mut chunks = splitter::split(&graph, &self.options);

        info!("rendering output...");
        let rendered = emit::render(&graph, &mut chunks, &self.options)?;

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!("writing {} chunk(s)...", rendered.chunks.len());
        let out_dir = if self.options.out_dir.is_absolute() {
            self.options.out_dir.clone()
        } else {
            self.options.resolved_cwd().join(&self.options.out_dir)
        };
        emit::write(&rendered, &out_dir)?;

        let total_transforms = cache_hits + cache_misses;
        let cache_hit_rate = if total_transforms == 0 {
            0.0
        } else {
            cache_hits as f64 / total_transforms as f64
        };

        let stats = BuildStats {
            total_modules: graph.module_count(),
            total_chunks: rendered.chunks.len(),
            total_size: rendered.chunks.iter().map(|c| c.size).sum::<usize>()
                + rendered.assets.iter().map(|a| a.size).sum::<usize>(),
            duration_ms: start.elapsed().as_millis() as u64,
            cache_hit_rate,
        };
        debug!("build completed in {}", utils::format_duration(start.elapsed()));

        Ok(BuildResult {
            chunks: rendered.chunks,
            assets: rendered.assets,
            stats,
        })
    }

    /// Build the module graph from the entries. Module tasks run
    /// concurrently on a bounded worker pool; node and edge insertion
    /// happens only here, in the single join loop.
    async fn load_graph(&self) -> Result<(ModuleGraph, u64, u64)> {
        let cwd = self.options.resolved_cwd();
        let transform_base = TransformOptions {
            module_type: ModuleType::JavaScript,
            format: self.options.format,
            minify: self.options.minify,
            platform: self.options.platform,
        };

        let semaphore = Arc::new(Semaphore::new(worker_count()));
        let mut join_set: JoinSet<Result<LoadedModule>> = JoinSet::new();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut pending_edges: Vec<(String, String, ImportKind)> = Vec::new();
        let mut graph = ModuleGraph::new();
        let mut cache_hits = 0u64;
        let mut cache_misses = 0u64;

        for (index, entry_point) in self.options.entries.iter().enumerate() {
            let spec = LoadSpec::from_entry(index, entry_point, &cwd);
            if claimed.insert(spec.id.clone()) {
                self.spawn_load(&mut join_set, &semaphore, spec, transform_base, cwd.clone());
            }
        }

        while let Some(joined) = join_set.join_next().await {
            if self.cancel.is_cancelled() {
                // Let in-flight transforms finish, discard their results.
                while join_set.join_next().await.is_some() {}
                return Err(Error::Cancelled);
            }

            let loaded = joined
                .map_err(|e| Error::InvalidConfig(format!("module worker failed: {}", e)))??;

            if loaded.was_hit {
                cache_hits += 1;
            } else {
                cache_misses += 1;
            }

            let mut record = ModuleRecord {
                id: loaded.id.clone(),
                path: loaded.path.clone(),
                source: loaded.source,
                source_hash: loaded.source_hash,
                module_type: loaded.module_type,
                is_entry: loaded.entry_group.is_some(),
                entry_group: loaded.entry_group,
                external: false,
                exports: loaded.fragment.exports.clone(),
                imports: loaded.fragment.imports.clone(),
                resolutions: std::collections::HashMap::new(),
                code: loaded.fragment.code.clone(),
                size_bytes: loaded.fragment.code.len(),
                has_side_effects: loaded.fragment.has_side_effects,
            };

            for (import, target) in loaded.resolved {
                match target {
                    ResolvedTarget::Local {
                        id: child_id,
                        path,
                    } => {
                        record
                            .resolutions
                            .insert(import.specifier.clone(), child_id.clone());
                        pending_edges.push((loaded.id.clone(), child_id.clone(), import.kind));

                        if claimed.insert(child_id.clone()) {
                            let spec = LoadSpec {
                                id: child_id,
                                entry_group: None,
                                source: LoadSource::File(path),
                                loader: None,
                            };
                            self.spawn_load(
                                &mut join_set,
                                &semaphore,
                                spec,
                                transform_base,
                                cwd.clone(),
                            );
                        }
                    }
                    ResolvedTarget::External(specifier) => {
                        graph.add_module(ModuleRecord::external(&specifier));
                        record
                            .resolutions
                            .insert(import.specifier.clone(), format!("ext:{}", specifier));
                        pending_edges.push((loaded.id.clone(), specifier, import.kind));
                    }
                }
            }

            graph.add_module(record);
        }

        // Stable sort by importer keeps each module's edges in import order
        // while making the overall insertion order independent of task
        // completion order.
        pending_edges.sort_by(|a, b| a.0.cmp(&b.0));
        for (from, to, kind) in pending_edges {
            let (Some(from), Some(to)) = (graph.idx_of(&from), graph.idx_of(&to)) else {
                continue;
            };
            graph.add_edge(from, to, kind);
        }

        Ok((graph, cache_hits, cache_misses))
    }

    fn spawn_load(
        &self,
        join_set: &mut JoinSet<Result<LoadedModule>>,
        semaphore: &Arc<Semaphore>,
        spec: LoadSpec,
        transform_base: TransformOptions,
        cwd: PathBuf,
    ) {
        let semaphore = Arc::clone(semaphore);
        let resolver = Arc::clone(&self.resolver);
        let transformer = Arc::clone(&self.transformer);
        let cache = Arc::clone(&self.cache);

        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?;
            load_module(resolver, transformer, cache, spec, transform_base, cwd).await
        });
    }
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Description of one module to load.
struct LoadSpec {
    id: String,
    entry_group: Option<usize>,
    source: LoadSource,
    loader: Option<ModuleType>,
}

enum LoadSource {
    File(PathBuf),
    Inline(String),
}

impl LoadSpec {
    fn from_entry(index: usize, entry_point: &EntryPoint, cwd: &std::path::Path) -> Self {
        match &entry_point.spec {
            EntrySpec::File(path) => {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    cwd.join(path)
                };
                let absolute = std::fs::canonicalize(&absolute).unwrap_or(absolute);
                LoadSpec {
                    id: utils::module_id_for_path(&absolute, cwd),
                    entry_group: Some(index),
                    source: LoadSource::File(absolute),
                    loader: None,
                }
            }
            EntrySpec::Inline {
                name,
                content,
                loader,
            } => LoadSpec {
                id: EntryPoint::inline_id(name),
                entry_group: Some(index),
                source: LoadSource::Inline(content.clone()),
                loader: *loader,
            },
        }
    }
}

enum ResolvedTarget {
    Local { id: String, path: PathBuf },
    External(String),
}

struct LoadedModule {
    id: String,
    path: Option<PathBuf>,
    source: String,
    source_hash: String,
    module_type: ModuleType,
    entry_group: Option<usize>,
    fragment: Arc<crate::transform::TransformedModule>,
    was_hit: bool,
    resolved: Vec<(ImportRecord, ResolvedTarget)>,
}

/// Read, transform (through the cache) and resolve one module.
async fn load_module(
    resolver: Arc<Resolver>,
    transformer: Arc<Transformer>,
    cache: Arc<TransformCache>,
    spec: LoadSpec,
    transform_base: TransformOptions,
    cwd: PathBuf,
) -> Result<LoadedModule> {
    let (source, path, module_type) = match &spec.source {
        LoadSource::File(path) => {
            let module_type = spec.loader.unwrap_or_else(|| ModuleType::from_path(path));
            let source = if module_type == ModuleType::Asset {
                // Assets may be binary; only their digest enters the
                // pipeline. The bytes are copied verbatim at emit time.
                let bytes = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;
                utils::hash_digest(&bytes)
            } else {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::io(path, e))?
            };
            (source, Some(path.clone()), module_type)
        }
        LoadSource::Inline(content) => (
            content.clone(),
            None,
            spec.loader.unwrap_or(ModuleType::JavaScript),
        ),
    };

    let transform_options = TransformOptions {
        module_type,
        ..transform_base
    };
    let source_hash = transform_options.source_hash(&source);

    let (fragment, was_hit) = {
        let transformer = Arc::clone(&transformer);
        let source = source.clone();
        let id = spec.id.clone();
        cache
            .get_or_transform(&source_hash, move || async move {
                transformer.transform(&source, &id, &transform_options)
            })
            .await?
    };

    let importer_dir = path
        .as_ref()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| cwd.clone());

    let mut resolved = Vec::new();
    for import in &fragment.imports {
        if import.kind == ImportKind::TypeOnly {
            continue;
        }
        let target = match resolver.resolve(&import.specifier, &spec.id, &importer_dir)? {
            Resolution::Local(path) => ResolvedTarget::Local {
                id: utils::module_id_for_path(&path, &cwd),
                path,
            },
            Resolution::External(specifier) => ResolvedTarget::External(specifier),
        };
        resolved.push((import.clone(), target));
    }

    Ok(LoadedModule {
        id: spec.id,
        path,
        source,
        source_hash,
        module_type,
        entry_group: spec.entry_group,
        fragment,
        was_hit,
        resolved,
    })
}

/// Convenience: validate, build and return the result in one call.
pub async fn build(options: BuildOptions) -> Result<BuildResult> {
    Bundler::new(options)?.build().await
}
