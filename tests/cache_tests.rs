//! Transform cache behavior across builds

mod helpers;

use std::sync::Arc;

use helpers::*;
use rivet_lib::{BuildOptions, Bundler, TransformCache};

fn cached_project() -> tempfile::TempDir {
    let project = temp_project();
    write_file(
        project.path(),
        "src/util.js",
        "export function add(a, b) {\n  return a + b;\n}\n",
    );
    write_file(
        project.path(),
        "src/main.js",
        "import { add } from './util.js';\nexport const sum = add(1, 2);\n",
    );
    project
}

fn options(project: &tempfile::TempDir, out: &str) -> BuildOptions {
    BuildOptions::bundle(project.path().join("src/main.js"))
        .cwd(project.path())
        .out_dir(project.path().join(out))
}

#[tokio::test]
async fn warm_rebuild_hits_for_every_module() {
    let project = cached_project();
    let cache = Arc::new(TransformCache::new());

    let cold = Bundler::with_cache(options(&project, "dist1"), Arc::clone(&cache))
        .unwrap()
        .build()
        .await
        .expect("cold build");
    assert_eq!(cold.stats.cache_hit_rate, 0.0);

    let warm = Bundler::with_cache(options(&project, "dist2"), Arc::clone(&cache))
        .unwrap()
        .build()
        .await
        .expect("warm build");
    assert_eq!(warm.stats.cache_hit_rate, 1.0);

    // Same output either way
    assert_eq!(cold.chunks[0].code, warm.chunks[0].code);
    assert_eq!(cache.stats().hits, 2);
    assert_eq!(cache.stats().misses, 2);
}

#[tokio::test]
async fn content_change_forces_retransform() {
    let project = cached_project();
    let cache = Arc::new(TransformCache::new());

    Bundler::with_cache(options(&project, "dist1"), Arc::clone(&cache))
        .unwrap()
        .build()
        .await
        .expect("first build");

    // util.js changes: its hash changes, main.js stays warm
    write_file(
        project.path(),
        "src/util.js",
        "export function add(a, b) {\n  return a + b + 0;\n}\n",
    );

    let second = Bundler::with_cache(options(&project, "dist2"), Arc::clone(&cache))
        .unwrap()
        .build()
        .await
        .expect("second build");

    assert!((second.stats.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    let chunk = entry_chunk(&second);
    assert_chunk_contains(chunk, "a + b + 0");
}

#[tokio::test]
async fn private_caches_never_share_state() {
    let project = cached_project();

    let first = Bundler::new(options(&project, "dist1"))
        .unwrap()
        .build()
        .await
        .expect("first build");
    let second = Bundler::new(options(&project, "dist2"))
        .unwrap()
        .build()
        .await
        .expect("second build");

    assert_eq!(first.stats.cache_hit_rate, 0.0);
    assert_eq!(second.stats.cache_hit_rate, 0.0);
}

#[tokio::test]
async fn option_change_misses_despite_same_content() {
    let project = cached_project();
    let cache = Arc::new(TransformCache::new());

    Bundler::with_cache(options(&project, "dist1"), Arc::clone(&cache))
        .unwrap()
        .build()
        .await
        .expect("first build");

    // Minify participates in the cache key
    let minified = Bundler::with_cache(
        options(&project, "dist2").minify(true),
        Arc::clone(&cache),
    )
    .unwrap()
    .build()
    .await
    .expect("minified build");

    assert_eq!(minified.stats.cache_hit_rate, 0.0);
}
