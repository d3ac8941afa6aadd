//! Single-entry bundle mode

mod helpers;

use helpers::*;
use rivet_lib::{BuildOptions, Bundler, Error, Format, SourcemapMode};

fn simple_project() -> tempfile::TempDir {
    let project = temp_project();
    write_file(
        project.path(),
        "src/b.js",
        "export function greet(name) {\n  return 'hello ' + name;\n}\n",
    );
    write_file(
        project.path(),
        "src/a.js",
        "import { greet } from './b.js';\nexport const message = greet('world');\n",
    );
    project
}

#[tokio::test]
async fn bundles_static_import_into_one_chunk() {
    let project = simple_project();

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect("bundle build");

    assert_eq!(result.stats.total_chunks, 1);
    assert_eq!(result.stats.total_modules, 2);

    let chunk = entry_chunk(&result);
    assert_eq!(chunk.file_name, "a.js");
    assert_chunk_contains(chunk, "src/a.js");
    assert_chunk_contains(chunk, "src/b.js");
    assert_chunk_contains(chunk, "greet");

    assert!(dist_dir(&project).join("a.js").is_file());
}

#[tokio::test]
async fn inline_entry_never_touches_the_filesystem() {
    let project = temp_project();

    let result = rivet_lib::build(
        BuildOptions::bundle_inline("widget", "export const answer = 42;\n")
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect("inline build");

    assert_eq!(result.stats.total_modules, 1);
    let chunk = entry_chunk(&result);
    assert_eq!(chunk.file_name, "widget.js");
    assert_chunk_contains(chunk, "<inline>:widget");
    assert_chunk_contains(chunk, "answer");
}

#[tokio::test]
async fn missing_entry_fails_with_zero_files_written() {
    let project = temp_project();

    let err = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/nonexistent.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect_err("missing entry must fail");

    assert!(matches!(err, Error::Io { .. }), "got: {:?}", err);
    assert!(
        !dist_dir(&project).exists(),
        "a failed build must write nothing"
    );
}

#[tokio::test]
async fn unresolvable_import_names_importer_and_specifier() {
    let project = temp_project();
    write_file(
        project.path(),
        "src/a.js",
        "import { x } from './missing.js';\n",
    );

    let err = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect_err("unresolvable import must fail");

    match err {
        Error::Resolution {
            specifier,
            importer,
            ..
        } => {
            assert_eq!(specifier, "./missing.js");
            assert_eq!(importer, "src/a.js");
        }
        other => panic!("expected resolution error, got {:?}", other),
    }
    assert!(!dist_dir(&project).exists());
}

#[tokio::test]
async fn two_module_cycle_completes() {
    let project = temp_project();
    write_file(
        project.path(),
        "src/a.js",
        "import { b } from './b.js';\nexport const a = 'a';\nexport const combined = () => a + b;\n",
    );
    write_file(
        project.path(),
        "src/b.js",
        "import { a } from './a.js';\nexport const b = 'b';\nexport const echo = () => a;\n",
    );

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect("cycle build");

    assert_eq!(result.stats.total_modules, 2);
    assert_eq!(result.stats.total_chunks, 1);
}

#[tokio::test]
async fn cold_builds_are_byte_identical() {
    let project = simple_project();

    let build = |out: &str| {
        let options = BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(project.path().join(out));
        async move { Bundler::new(options).unwrap().build().await.unwrap() }
    };

    let first = build("dist1").await;
    let second = build("dist2").await;

    assert_eq!(first.chunks.len(), second.chunks.len());
    for (a, b) in first.chunks.iter().zip(second.chunks.iter()) {
        assert_eq!(a.file_name, b.file_name);
        assert_eq!(a.code, b.code, "chunk bytes must be identical across runs");
    }
}

#[tokio::test]
async fn cjs_format_exports_via_module_exports() {
    let project = simple_project();

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project))
            .format(Format::Cjs),
    )
    .await
    .expect("cjs build");

    let chunk = entry_chunk(&result);
    assert_chunk_contains(chunk, "module.exports = __rivet_entry__;");
    assert_chunk_not_contains(chunk, "export var");
}

#[tokio::test]
async fn esm_format_reexports_entry_exports() {
    let project = simple_project();

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect("esm build");

    let chunk = entry_chunk(&result);
    assert_chunk_contains(chunk, "export var message = __rivet_entry__.message;");
}

#[tokio::test]
async fn minify_strips_comments() {
    let project = temp_project();
    write_file(
        project.path(),
        "src/a.js",
        "// top comment\nexport const x = 1;   /* another */\n",
    );

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project))
            .minify(true),
    )
    .await
    .expect("minified build");

    let chunk = entry_chunk(&result);
    assert_chunk_not_contains(chunk, "top comment");
    assert_chunk_not_contains(chunk, "another");
    assert_chunk_contains(chunk, "const x = 1;");
}

#[tokio::test]
async fn external_sourcemap_written_next_to_chunk() {
    let project = simple_project();

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project))
            .sourcemap(SourcemapMode::External),
    )
    .await
    .expect("sourcemap build");

    let chunk = entry_chunk(&result);
    assert_eq!(chunk.sourcemap_file.as_deref(), Some("a.js.map"));
    assert_chunk_contains(chunk, "//# sourceMappingURL=a.js.map");

    let map_path = dist_dir(&project).join("a.js.map");
    assert!(map_path.is_file());
    let map: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(map_path).unwrap()).unwrap();
    assert_eq!(map["version"], 3);
    assert!(map["sources"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == "src/a.js"));
}

#[tokio::test]
async fn inline_sourcemap_embeds_data_uri() {
    let project = simple_project();

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project))
            .sourcemap(SourcemapMode::Inline),
    )
    .await
    .expect("inline sourcemap build");

    let chunk = entry_chunk(&result);
    assert_chunk_contains(chunk, "sourceMappingURL=data:application/json;base64,");
    assert!(chunk.sourcemap_file.is_none());
}

#[tokio::test]
async fn typescript_json_and_css_modules_bundle() {
    let project = temp_project();
    write_file(
        project.path(),
        "src/config.json",
        r#"{"name": "demo", "level": 3}"#,
    );
    write_file(project.path(), "src/theme.css", "body { color: red; }\n");
    write_file(
        project.path(),
        "src/util.ts",
        "export function double(n: number): number {\n  return n * 2;\n}\n",
    );
    write_file(
        project.path(),
        "src/main.ts",
        "import config from './config.json';\nimport './theme.css';\nimport { double } from './util';\nexport const level: number = double(config.level);\n",
    );

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/main.ts"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect("mixed-loader build");

    assert_eq!(result.stats.total_modules, 4);
    let chunk = entry_chunk(&result);
    assert_eq!(chunk.file_name, "main.js");
    assert_chunk_contains(chunk, "\"demo\"");
    assert_chunk_contains(chunk, "document.createElement('style')");
    assert_chunk_contains(chunk, "function double(n)");
    assert_chunk_not_contains(chunk, ": number");
}

#[tokio::test]
async fn asset_imports_are_copied_and_recorded() {
    let project = temp_project();
    write_file(project.path(), "src/logo.png", "not really a png");
    write_file(
        project.path(),
        "src/main.js",
        "import logo from './logo.png';\nexport const url = logo;\n",
    );

    let result = rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/main.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect("asset build");

    assert_eq!(result.assets.len(), 1);
    assert_eq!(result.assets[0].relative_path, "src/logo.png");
    assert_eq!(result.assets[0].size, "not really a png".len());

    let copied = dist_dir(&project).join("src/logo.png");
    assert!(copied.is_file());
    assert_eq!(
        std::fs::read_to_string(copied).unwrap(),
        "not really a png"
    );

    let chunk = entry_chunk(&result);
    assert_chunk_contains(chunk, "./src/logo.png");
}

#[tokio::test]
async fn cancelled_build_writes_nothing() {
    let project = simple_project();

    let bundler = Bundler::new(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .unwrap();

    bundler.cancel_flag().cancel();
    let err = bundler.build().await.expect_err("cancelled build must fail");

    assert!(matches!(err, Error::Cancelled));
    assert!(!dist_dir(&project).exists());
}

#[tokio::test]
async fn manifest_maps_entry_names_to_files() {
    let project = simple_project();

    rivet_lib::build(
        BuildOptions::bundle(project.path().join("src/a.js"))
            .cwd(project.path())
            .out_dir(dist_dir(&project)),
    )
    .await
    .expect("manifest build");

    let manifest_path = dist_dir(&project).join("manifest.json");
    assert!(manifest_path.is_file());
    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["a"], "a.js");
}
