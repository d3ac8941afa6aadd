//! Module resolution
//!
//! Maps an import specifier, relative to the importing module, to a concrete
//! file on disk or to an externalized package name. Resolution is memoized
//! per (specifier, importing directory) so repeated imports of the same path
//! never redo filesystem probing.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::debug;

use crate::bundler::options::Platform;
use crate::error::{Error, Result};

/// Extension probe order. Fixed priority: an existing `.js` always wins
/// over a sibling `.ts`.
const EXTENSIONS: [&str; 5] = [".js", ".jsx", ".ts", ".tsx", ".json"];

/// Node builtins, externalized on the node platform.
const NODE_BUILTINS: [&str; 24] = [
    "assert",
    "buffer",
    "child_process",
    "crypto",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "process",
    "querystring",
    "readline",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "worker_threads",
    "zlib",
];

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved to a file that will be bundled
    Local(PathBuf),

    /// Left as an external import reference (carries the full specifier)
    External(String),
}

/// Module resolver
pub struct Resolver {
    /// Working directory the build resolves against
    cwd: PathBuf,

    /// Target platform
    platform: Platform,

    /// Package names never bundled
    externals: HashSet<String>,

    /// Memoized resolutions per (specifier, importing directory)
    cache: DashMap<(String, PathBuf), Resolution>,
}

impl Resolver {
    pub fn new(
        cwd: PathBuf,
        platform: Platform,
        external: &[String],
        external_from_manifest: bool,
    ) -> Result<Self> {
        let mut externals: HashSet<String> = external.iter().cloned().collect();

        if external_from_manifest {
            for name in manifest_dependencies(&cwd)? {
                externals.insert(name);
            }
        }

        Ok(Self {
            cwd,
            platform,
            externals,
            cache: DashMap::new(),
        })
    }

    /// Resolve an import specifier relative to the importing module.
    ///
    /// `importer` is only used for error reporting; `importer_dir` anchors
    /// relative specifiers and the node_modules walk.
    pub fn resolve(
        &self,
        specifier: &str,
        importer: &str,
        importer_dir: &Path,
    ) -> Result<Resolution> {
        let key = (specifier.to_string(), importer_dir.to_path_buf());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let resolution = self.resolve_uncached(specifier, importer, importer_dir)?;
        self.cache.insert(key, resolution.clone());
        Ok(resolution)
    }

    fn resolve_uncached(
        &self,
        specifier: &str,
        importer: &str,
        importer_dir: &Path,
    ) -> Result<Resolution> {
        debug!("resolving '{}' from '{}'", specifier, importer);

        if specifier.starts_with('.') || Path::new(specifier).is_absolute() {
            let target = if Path::new(specifier).is_absolute() {
                PathBuf::from(specifier)
            } else {
                importer_dir.join(specifier)
            };

            return match probe_path(&target) {
                Some(path) => Ok(Resolution::Local(canonical(path))),
                None => Err(Error::resolution(specifier, importer, "not found")),
            };
        }

        // Bare specifier: externals first, then platform builtins, then
        // the node_modules walk.
        let package = package_name(specifier);
        if self.externals.contains(package) {
            return Ok(Resolution::External(specifier.to_string()));
        }

        if self.platform == Platform::Node
            && (specifier.starts_with("node:") || NODE_BUILTINS.contains(&package))
        {
            return Ok(Resolution::External(specifier.to_string()));
        }

        match self.resolve_bare(specifier, importer_dir)? {
            Some(path) => Ok(Resolution::Local(canonical(path))),
            None => Err(Error::resolution(
                specifier,
                importer,
                "no matching package in any node_modules directory",
            )),
        }
    }

    /// Walk ancestor node_modules directories; first match wins.
    fn resolve_bare(&self, specifier: &str, from_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current = from_dir.to_path_buf();

        loop {
            let node_modules = current.join("node_modules");
            if node_modules.is_dir() {
                if let Some(resolved) = self.resolve_in_node_modules(&node_modules, specifier)? {
                    return Ok(Some(resolved));
                }
            }

            if !current.pop() {
                break;
            }
        }

        // The cwd's node_modules still counts when the importer lives
        // outside it (inline entries resolve from cwd anyway).
        let node_modules = self.cwd.join("node_modules");
        if node_modules.is_dir() && !from_dir.starts_with(&self.cwd) {
            return self.resolve_in_node_modules(&node_modules, specifier);
        }

        Ok(None)
    }

    fn resolve_in_node_modules(
        &self,
        node_modules: &Path,
        specifier: &str,
    ) -> Result<Option<PathBuf>> {
        let (package, subpath) = split_package_specifier(specifier);
        let Some(package) = package else {
            return Ok(None);
        };

        let package_dir = node_modules.join(&package);
        if !package_dir.is_dir() {
            return Ok(None);
        }

        if let Some(sub) = subpath {
            return Ok(probe_path(&package_dir.join(sub)));
        }

        let package_json = package_dir.join("package.json");
        if package_json.is_file() {
            let content = fs::read_to_string(&package_json)
                .map_err(|e| Error::io(&package_json, e))?;
            let pkg: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                Error::io(
                    &package_json,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                )
            })?;

            // `module` (ESM) wins over `main`
            for field in ["module", "main"] {
                if let Some(rel) = pkg.get(field).and_then(|v| v.as_str()) {
                    if let Some(path) = probe_path(&package_dir.join(rel)) {
                        return Ok(Some(path));
                    }
                }
            }
        }

        Ok(probe_path(&package_dir.join("index.js")))
    }
}

/// Probe a path: literal file, appended extensions, then directory index,
/// in that order.
fn probe_path(target: &Path) -> Option<PathBuf> {
    if target.is_file() {
        return Some(target.to_path_buf());
    }

    let raw = target.as_os_str().to_string_lossy().into_owned();
    for ext in EXTENSIONS {
        let candidate = PathBuf::from(format!("{}{}", raw, ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if target.is_dir() {
        for ext in EXTENSIONS {
            let index = target.join(format!("index{}", ext));
            if index.is_file() {
                return Some(index);
            }
        }
    }

    None
}

/// Canonicalize when possible so symlinked paths share one identity.
fn canonical(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

/// Package name portion of a bare specifier (`@scope/name` keeps both
/// segments).
fn package_name(specifier: &str) -> &str {
    let spec = specifier.strip_prefix("node:").unwrap_or(specifier);
    let mut slashes = spec.match_indices('/');
    if spec.starts_with('@') {
        match (slashes.next(), slashes.next()) {
            (_, Some((second, _))) => &spec[..second],
            _ => spec,
        }
    } else {
        match slashes.next() {
            Some((first, _)) => &spec[..first],
            None => spec,
        }
    }
}

/// Split a bare specifier into (package directory, optional subpath).
fn split_package_specifier(specifier: &str) -> (Option<String>, Option<String>) {
    let name = package_name(specifier);
    if name.is_empty() {
        return (None, None);
    }
    let rest = &specifier[name.len()..];
    let subpath = rest.strip_prefix('/').map(|s| s.to_string());
    (Some(name.to_string()), subpath)
}

/// Dependency and peerDependency names from the nearest package.json,
/// walking up from `cwd`.
fn manifest_dependencies(cwd: &Path) -> Result<Vec<String>> {
    let mut current = cwd.to_path_buf();

    loop {
        let manifest = current.join("package.json");
        if manifest.is_file() {
            let content =
                fs::read_to_string(&manifest).map_err(|e| Error::io(&manifest, e))?;
            let pkg: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                Error::io(
                    &manifest,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                )
            })?;

            let mut names = Vec::new();
            for field in ["dependencies", "peerDependencies"] {
                if let Some(deps) = pkg.get(field).and_then(|v| v.as_object()) {
                    names.extend(deps.keys().cloned());
                }
            }
            debug!(
                "externalizing {} dependencies from {}",
                names.len(),
                manifest.display()
            );
            return Ok(names);
        }

        if !current.pop() {
            return Ok(Vec::new());
        }
    }
}
