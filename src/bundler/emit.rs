//! Output emission
//!
//! Serializes each chunk to final source text: cross-chunk imports,
//! external-package shims, the module registry runtime, module bodies in
//! topological order, and the entry execution footer. Everything renders in
//! memory first; the write phase only runs for a successful build, so a
//! failed or cancelled build leaves no partial output.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;

use super::chunk::{Chunk, ChunkKind};
use super::graph::{ImportKind, ModuleGraph, ModuleIdx, ModuleType};
use super::options::{BuildOptions, Format, SourcemapMode};
use super::sourcemap::SourcemapBuilder;
use crate::error::{Error, Result};
use crate::transform::ASSET_URL_PLACEHOLDER;
use crate::utils;

/// An emitted chunk, ready to write.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub file_name: String,
    pub code: String,
    pub is_entry: bool,
    pub size: usize,
    /// Module ids contained in this chunk, in initialization order
    pub modules: Vec<String>,
    /// File names of chunks this one imports
    pub imports: Vec<String>,
    /// Sibling map file name, when sourcemap mode is external
    pub sourcemap_file: Option<String>,
    /// Rendered source map JSON, when one was generated
    pub sourcemap: Option<String>,
}

/// A copied asset, recorded with its emitted path and size.
#[derive(Debug, Clone)]
pub struct OutputAsset {
    pub relative_path: String,
    pub size: usize,
    source: PathBuf,
}

/// Fully rendered build output, not yet written to disk.
#[derive(Debug, Default)]
pub struct RenderedOutput {
    pub chunks: Vec<OutputChunk>,
    pub assets: Vec<OutputAsset>,
    pub manifest: Option<String>,
}

/// Render all chunks and collect assets. Assigns chunk file names first so
/// cross-chunk references can be emitted.
pub fn render(
    graph: &ModuleGraph,
    chunks: &mut [Chunk],
    options: &BuildOptions,
) -> Result<RenderedOutput> {
    assign_file_names(graph, chunks, options);

    let assets = collect_assets(graph, chunks)?;
    let asset_urls: HashMap<String, String> = assets
        .iter()
        .map(|a| (a.module_id(graph), format!("./{}", a.relative_path)))
        .collect();

    let mut module_to_chunk: HashMap<ModuleIdx, usize> = HashMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        for &m in &chunk.modules {
            module_to_chunk.entry(m).or_insert(i);
        }
    }

    let mut rendered = RenderedOutput::default();
    for index in 0..chunks.len() {
        let chunk = render_chunk(graph, chunks, index, &module_to_chunk, &asset_urls, options)?;
        rendered.chunks.push(chunk);
    }
    rendered.assets = assets;

    if options.manifest {
        let mut entries: BTreeMap<String, String> = BTreeMap::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.kind == ChunkKind::Entry {
                entries.insert(chunk.name.clone(), rendered.chunks[i].file_name.clone());
            }
        }
        rendered.manifest = Some(
            serde_json::to_string_pretty(&entries)
                .map_err(|e| Error::InvalidConfig(format!("manifest serialization: {}", e)))?,
        );
    }

    Ok(rendered)
}

/// Write rendered output under `out_dir`, creating it if absent.
pub fn write(rendered: &RenderedOutput, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;

    for chunk in &rendered.chunks {
        let path = out_dir.join(&chunk.file_name);
        fs::write(&path, &chunk.code).map_err(|e| Error::io(&path, e))?;
        debug!("wrote {} ({})", path.display(), utils::format_size(chunk.size));

        if let (Some(map_file), Some(map)) = (&chunk.sourcemap_file, &chunk.sourcemap) {
            let map_path = out_dir.join(map_file);
            fs::write(&map_path, map).map_err(|e| Error::io(&map_path, e))?;
        }
    }

    for asset in &rendered.assets {
        let dest = out_dir.join(&asset.relative_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::copy(&asset.source, &dest).map_err(|e| Error::io(&dest, e))?;
    }

    if let Some(manifest) = &rendered.manifest {
        let path = out_dir.join("manifest.json");
        fs::write(&path, manifest).map_err(|e| Error::io(&path, e))?;
    }

    Ok(())
}

/// Entry chunks take the entry's name; dynamic and shared chunks get
/// content-hash-derived names so consumers can cache them long-term.
fn assign_file_names(graph: &ModuleGraph, chunks: &mut [Chunk], _options: &BuildOptions) {
    for chunk in chunks.iter_mut() {
        match chunk.kind {
            ChunkKind::Entry => {
                chunk.file_name = format!("{}.js", chunk.name);
            }
            ChunkKind::Dynamic | ChunkKind::Shared => {
                let mut key = String::new();
                for &m in &chunk.modules {
                    key.push_str(&graph.module(m).id);
                    key.push('\n');
                    key.push_str(&graph.module(m).source_hash);
                    key.push('\n');
                }
                let hash = utils::hash_content(key.as_bytes());
                chunk.file_name = if chunk.kind == ChunkKind::Dynamic {
                    format!("{}-{}.js", chunk.name, &hash[..8])
                } else {
                    format!("chunk-{}.js", &hash[..8])
                };
            }
        }
    }
}

/// Every asset module referenced by a chunk, deduplicated by emitted path.
fn collect_assets(graph: &ModuleGraph, chunks: &[Chunk]) -> Result<Vec<OutputAsset>> {
    let mut seen = HashSet::new();
    let mut assets = Vec::new();

    for chunk in chunks {
        for &m in &chunk.modules {
            let record = graph.module(m);
            if record.module_type != ModuleType::Asset {
                continue;
            }
            let Some(source) = record.path.clone() else {
                continue;
            };
            let relative_path = asset_emit_path(&record.id);
            if !seen.insert(relative_path.clone()) {
                continue;
            }
            let size = fs::metadata(&source)
                .map_err(|e| Error::io(&source, e))?
                .len() as usize;
            assets.push(OutputAsset {
                relative_path,
                size,
                source,
            });
        }
    }

    assets.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(assets)
}

impl OutputAsset {
    fn module_id(&self, graph: &ModuleGraph) -> String {
        graph
            .modules()
            .iter()
            .find(|m| m.path.as_deref() == Some(self.source.as_path()))
            .map(|m| m.id.clone())
            .unwrap_or_default()
    }
}

/// Keep the cwd-relative structure; paths escaping the cwd flatten to
/// their file name so nothing lands outside the output directory.
fn asset_emit_path(id: &str) -> String {
    if id.starts_with("..") {
        id.rsplit('/').next().unwrap_or(id).to_string()
    } else {
        id.to_string()
    }
}

/// Incrementally builds chunk text and its line map together.
struct ChunkWriter {
    code: String,
    map: SourcemapBuilder,
}

impl ChunkWriter {
    fn new() -> Self {
        Self {
            code: String::new(),
            map: SourcemapBuilder::new(),
        }
    }

    /// Append runtime scaffolding (counts lines, maps none of them).
    fn scaffold(&mut self, text: &str) {
        for line in text.lines() {
            self.code.push_str(line);
            self.code.push('\n');
            self.map.push_scaffold_line();
        }
    }

    /// Append a module body, mapping each emitted line to the module source.
    fn module_body(&mut self, body: &str, source_index: usize, source_line_count: usize) {
        let last = source_line_count.saturating_sub(1);
        for (i, line) in body.lines().enumerate() {
            self.code.push_str(line);
            self.code.push('\n');
            self.map.push_mapped_line(source_index, i.min(last));
        }
    }
}

fn render_chunk(
    graph: &ModuleGraph,
    chunks: &[Chunk],
    index: usize,
    module_to_chunk: &HashMap<ModuleIdx, usize>,
    asset_urls: &HashMap<String, String>,
    options: &BuildOptions,
) -> Result<OutputChunk> {
    let chunk = &chunks[index];
    let mut writer = ChunkWriter::new();

    // Externals referenced from this chunk, sorted for determinism
    let mut externals: Vec<String> = chunk
        .modules
        .iter()
        .flat_map(|&m| graph.outgoing(m).iter())
        .filter(|(to, kind)| *kind != ImportKind::TypeOnly && graph.module(*to).external)
        .map(|&(to, _)| graph.module(to).id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    externals.sort();

    let mut imports: Vec<String> = Vec::new();

    // Cross-chunk static imports: registration must precede this body
    for &dep in &chunk.static_deps {
        let file = &chunks[dep].file_name;
        imports.push(file.clone());
        match options.format {
            Format::Esm => writer.scaffold(&format!("import \"./{}\";", file)),
            Format::Cjs => writer.scaffold(&format!("require(\"./{}\");", file)),
        }
    }
    for &dep in &chunk.dynamic_deps {
        imports.push(chunks[dep].file_name.clone());
    }

    // External packages: ESM chunks import them up top and shim them into
    // the registry; CJS shims call the host require directly.
    if options.format == Format::Esm {
        for (i, specifier) in externals.iter().enumerate() {
            writer.scaffold(&format!(
                "import * as __rivet_ext{}__ from \"{}\";",
                i, specifier
            ));
        }
    }

    writer.scaffold(runtime_prologue(options.format));

    for (i, specifier) in externals.iter().enumerate() {
        match options.format {
            Format::Esm => writer.scaffold(&format!(
                "__rivet.modules[\"ext:{}\"] = function (module) {{ module.exports = __rivet_ext{}__; }};",
                specifier, i
            )),
            Format::Cjs => writer.scaffold(&format!(
                "__rivet.modules[\"ext:{}\"] = function (module) {{ module.exports = require(\"{}\"); }};",
                specifier, specifier
            )),
        }
    }

    // Module registrations in topological order
    let mut module_ids = Vec::with_capacity(chunk.modules.len());
    for &m in &chunk.modules {
        let record = graph.module(m);
        module_ids.push(record.id.clone());

        let body = link_module_code(graph, chunks, index, module_to_chunk, asset_urls, m);
        let source_index = writer.map.add_source(&record.id, &record.source);

        writer.scaffold(&format!(
            "__rivet.modules[{}] = function (module, exports, require) {{",
            js_string(&record.id)
        ));
        writer.module_body(&body, source_index, record.source.lines().count());
        writer.scaffold("};");
    }

    // Entry execution and re-export footer
    let entry_idx = if chunk.kind == ChunkKind::Entry {
        chunk
            .modules
            .iter()
            .copied()
            .find(|&m| graph.module(m).is_entry)
            .or_else(|| chunk.modules.last().copied())
    } else {
        None
    };
    if let Some(entry_idx) = entry_idx {
        let entry = graph.module(entry_idx);

        writer.scaffold(&format!(
            "var __rivet_entry__ = __rivet_require__({});",
            js_string(&entry.id)
        ));
        match options.format {
            Format::Esm => {
                for name in &entry.exports {
                    if name == "default" {
                        writer.scaffold("export default __rivet_entry__.default;");
                    } else if name != "*" {
                        writer.scaffold(&format!(
                            "export var {} = __rivet_entry__.{};",
                            name, name
                        ));
                    }
                }
            }
            Format::Cjs => {
                writer.scaffold("module.exports = __rivet_entry__;");
            }
        }
    }

    let mut code = writer.code;
    if options.minify {
        code = minify_code(&code);
    }

    let (sourcemap, sourcemap_file) = match options.sourcemap {
        SourcemapMode::None => (None, None),
        SourcemapMode::Inline => {
            let map = writer.map.render(&chunk.file_name);
            code.push_str(&format!(
                "//# sourceMappingURL=data:application/json;base64,{}\n",
                BASE64.encode(map.as_bytes())
            ));
            (Some(map), None)
        }
        SourcemapMode::External => {
            let map_file = format!("{}.map", chunk.file_name);
            code.push_str(&format!("//# sourceMappingURL={}\n", map_file));
            (
                Some(writer.map.render(&chunk.file_name)),
                Some(map_file),
            )
        }
    };

    Ok(OutputChunk {
        file_name: chunk.file_name.clone(),
        size: code.len(),
        code,
        is_entry: chunk.kind == ChunkKind::Entry,
        modules: module_ids,
        imports,
        sourcemap_file,
        sourcemap,
    })
}

/// Rewrite a module's import references against the final chunk layout:
/// specifiers become module ids, dynamic imports point at their chunk
/// file, and asset placeholders become emitted URLs.
fn link_module_code(
    graph: &ModuleGraph,
    chunks: &[Chunk],
    chunk_index: usize,
    module_to_chunk: &HashMap<ModuleIdx, usize>,
    asset_urls: &HashMap<String, String>,
    module: ModuleIdx,
) -> String {
    let record = graph.module(module);
    let mut code = record.code.clone();

    if record.module_type == ModuleType::Asset {
        let url = asset_urls
            .get(&record.id)
            .cloned()
            .unwrap_or_else(|| record.id.clone());
        return code.replace(ASSET_URL_PLACEHOLDER, &url);
    }

    for import in &record.imports {
        let Some(resolved) = record.resolutions.get(&import.specifier) else {
            continue;
        };

        match import.kind {
            ImportKind::Static => {
                for quote in ['"', '\''] {
                    let from = format!("require({}{}{})", quote, import.specifier, quote);
                    let to = format!("require({})", js_string(resolved));
                    code = code.replace(&from, &to);
                }
            }
            ImportKind::Dynamic => {
                let from = format!("__rivet_import__(\"{}\")", import.specifier);
                let target_file = graph
                    .idx_of(resolved)
                    .filter(|idx| !chunks[chunk_index].modules.contains(idx))
                    .and_then(|idx| module_to_chunk.get(&idx))
                    .filter(|&&target| target != chunk_index)
                    .map(|&target| format!("\"./{}\"", chunks[target].file_name))
                    .unwrap_or_else(|| "null".to_string());
                let to = format!(
                    "__rivet_import__({}, {})",
                    target_file,
                    js_string(resolved)
                );
                code = code.replace(&from, &to);
            }
            ImportKind::TypeOnly => {}
        }
    }

    code
}

/// Registry runtime shared by every chunk. Declared per chunk file; the
/// registry itself lives on globalThis so chunks interoperate.
fn runtime_prologue(format: Format) -> &'static str {
    match format {
        Format::Esm => {
            r#"var __rivet = globalThis.__rivet_registry__ || (globalThis.__rivet_registry__ = { modules: {}, cache: {} });
function __rivet_require__(id) {
  var cached = __rivet.cache[id];
  if (cached) { return cached.exports; }
  var module = { exports: {} };
  __rivet.cache[id] = module;
  var fn = __rivet.modules[id];
  if (fn) { fn(module, module.exports, __rivet_require__); }
  return module.exports;
}
function __rivet_default(m) { return m && m.default !== undefined ? m.default : m; }
function __rivet_import__(file, id) {
  if (!file) { return Promise.resolve().then(function () { return __rivet_require__(id); }); }
  return import(file).then(function () { return __rivet_require__(id); });
}"#
        }
        Format::Cjs => {
            r#"var __rivet = globalThis.__rivet_registry__ || (globalThis.__rivet_registry__ = { modules: {}, cache: {} });
function __rivet_require__(id) {
  var cached = __rivet.cache[id];
  if (cached) { return cached.exports; }
  var module = { exports: {} };
  __rivet.cache[id] = module;
  var fn = __rivet.modules[id];
  if (fn) { fn(module, module.exports, __rivet_require__); }
  return module.exports;
}
function __rivet_default(m) { return m && m.default !== undefined ? m.default : m; }
function __rivet_import__(file, id) {
  return Promise.resolve().then(function () {
    if (file) { require(file); }
    return __rivet_require__(id);
  });
}"#
        }
    }
}

/// Quote a string for embedding in emitted JavaScript.
fn js_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Whitespace and comment compression. Newlines are preserved so line
/// maps stay valid after minification.
pub fn minify_code(code: &str) -> String {
    let mut result = String::with_capacity(code.len());
    let mut in_string = false;
    let mut string_char = ' ';
    let mut in_single_comment = false;
    let mut in_multi_comment = false;
    let mut prev_char = ' ';
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        if in_single_comment {
            if c == '\n' {
                in_single_comment = false;
                result.push('\n');
            }
            continue;
        }

        if in_multi_comment {
            if prev_char == '*' && c == '/' {
                in_multi_comment = false;
                prev_char = ' ';
                continue;
            }
            if c == '\n' {
                result.push('\n');
            }
            prev_char = c;
            continue;
        }

        if in_string {
            result.push(c);
            if c == string_char && prev_char != '\\' {
                in_string = false;
            }
            prev_char = c;
            continue;
        }

        if c == '"' || c == '\'' || c == '`' {
            in_string = true;
            string_char = c;
            result.push(c);
            prev_char = c;
            continue;
        }

        if c == '/' {
            if let Some(&next) = chars.peek() {
                if next == '/' {
                    in_single_comment = true;
                    chars.next();
                    continue;
                } else if next == '*' {
                    in_multi_comment = true;
                    chars.next();
                    continue;
                }
            }
        }

        if c == '\n' {
            while result.ends_with(' ') {
                result.pop();
            }
            result.push('\n');
        } else if c.is_whitespace() {
            if !result.ends_with(' ') && !result.ends_with('\n') && !result.is_empty() {
                result.push(' ');
            }
        } else {
            result.push(c);
        }

        prev_char = c;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_strips_comments_and_collapses_spaces() {
        let code = "// header\nvar   a = 1;  /* note */\nvar b = 2;\n";
        let minified = minify_code(code);
        assert!(!minified.contains("header"));
        assert!(!minified.contains("note"));
        assert!(minified.contains("var a = 1;"));
        assert!(minified.contains("var b = 2;"));
    }

    #[test]
    fn test_minify_preserves_newlines_and_strings() {
        let code = "var url = \"http://example.com\";\nvar s = 'a  b';\n";
        let minified = minify_code(code);
        assert_eq!(
            minified.matches('\n').count(),
            code.matches('\n').count()
        );
        assert!(minified.contains("http://example.com"));
        assert!(minified.contains("'a  b'"));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("plain"), "\"plain\"");
        assert_eq!(js_string("with\"quote"), "\"with\\\"quote\"");
        assert_eq!(js_string("back\\slash"), "\"back\\\\slash\"");
    }

    #[test]
    fn test_asset_emit_path_never_escapes() {
        assert_eq!(asset_emit_path("img/logo.png"), "img/logo.png");
        assert_eq!(asset_emit_path("../shared/logo.png"), "logo.png");
    }
}
