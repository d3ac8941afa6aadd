//! Build command implementations

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::bundler::{
    BuildMode, BuildOptions, BuildResult, Bundler, CodeSplittingOptions, Format, Platform,
    SourcemapMode,
};
use crate::config::Config;
use crate::utils;

/// Options shared by every build subcommand
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Output directory
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Output format (esm, cjs)
    #[arg(long)]
    pub format: Option<String>,

    /// Target platform (browser, node)
    #[arg(long)]
    pub platform: Option<String>,

    /// Enable minification
    #[arg(short, long)]
    pub minify: bool,

    /// Source maps (none, inline, external)
    #[arg(long)]
    pub sourcemap: Option<String>,

    /// Packages to leave as external imports (repeatable)
    #[arg(long)]
    pub external: Vec<String>,

    /// Externalize every dependency from the nearest package.json
    #[arg(long)]
    pub external_from_manifest: bool,

    /// Working directory for module resolution
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Skip writing manifest.json
    #[arg(long)]
    pub no_manifest: bool,
}

impl CommonArgs {
    fn apply(&self, mut options: BuildOptions) -> Result<BuildOptions> {
        if let Some(dir) = &self.outdir {
            options = options.out_dir(dir.clone());
        }
        if let Some(format) = &self.format {
            options = options.format(parse_format(format)?);
        }
        if let Some(platform) = &self.platform {
            options = options.platform(parse_platform(platform)?);
        }
        if self.minify {
            options = options.minify(true);
        }
        if let Some(sourcemap) = &self.sourcemap {
            options = options.sourcemap(parse_sourcemap(sourcemap)?);
        }
        if !self.external.is_empty() {
            options = options.external(self.external.iter().cloned());
        }
        if self.external_from_manifest {
            options = options.external_from_manifest(true);
        }
        if let Some(cwd) = &self.cwd {
            options = options.cwd(cwd.clone());
        }
        if self.no_manifest {
            options = options.manifest(false);
        }
        Ok(options)
    }
}

/// Bundle a single entry into one chunk
#[derive(Args, Debug)]
pub struct BundleCommand {
    /// Entry point to bundle
    pub entry: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl BundleCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let options = match &self.entry {
            Some(entry) => BuildOptions::bundle(entry),
            None => Config::load(config_path)?.to_build_options(BuildMode::Bundle),
        };
        run_build(self.common.apply(options)?).await
    }
}

/// Build a library
#[derive(Args, Debug)]
pub struct LibraryCommand {
    /// Entry points
    pub entries: Vec<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl LibraryCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let options = if self.entries.is_empty() {
            let mut options = Config::load(config_path)?.to_build_options(BuildMode::Library);
            options.external_from_manifest = true;
            options
        } else {
            BuildOptions::library(&self.entries)
        };
        run_build(self.common.apply(options)?).await
    }
}

/// Build an app with code splitting
#[derive(Args, Debug)]
pub struct AppCommand {
    /// Entry points
    pub entries: Vec<PathBuf>,

    /// Minimum chunk size in bytes
    #[arg(long, default_value_t = 20_000)]
    pub min_size: usize,

    /// Minimum entry chunks that must share a module before extraction
    #[arg(long, default_value_t = 2)]
    pub min_imports: usize,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl AppCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let options = if self.entries.is_empty() {
            Config::load(config_path)?.to_build_options(BuildMode::App)
        } else {
            BuildOptions::app(&self.entries)
        };
        let options =
            options.code_splitting(CodeSplittingOptions::new(self.min_size, self.min_imports));
        run_build(self.common.apply(options)?).await
    }
}

/// Build a component library
#[derive(Args, Debug)]
pub struct ComponentsCommand {
    /// Entry points, one component each
    pub entries: Vec<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl ComponentsCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let options = if self.entries.is_empty() {
            Config::load(config_path)?.to_build_options(BuildMode::Components)
        } else {
            BuildOptions::components(&self.entries)
        };
        run_build(self.common.apply(options)?).await
    }
}

async fn run_build(options: BuildOptions) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Building ({} mode)...", options.mode));
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let bundler = Bundler::new(options).context("invalid build configuration")?;
    let result = bundler.build().await;
    spinner.finish_and_clear();

    let result = result.context("build failed")?;
    print_summary(&result);

    Ok(())
}

fn print_summary(result: &BuildResult) {
    eprintln!(
        "{} Built {} chunk(s) in {}\n",
        "✓".green().bold(),
        result.stats.total_chunks,
        utils::format_duration(std::time::Duration::from_millis(result.stats.duration_ms))
    );

    for chunk in &result.chunks {
        let marker = if chunk.is_entry { "entry" } else { "chunk" };
        eprintln!(
            "  {} {} {} {}",
            "•".dimmed(),
            chunk.file_name.cyan(),
            utils::format_size(chunk.size).dimmed(),
            marker.dimmed()
        );
    }
    for asset in &result.assets {
        eprintln!(
            "  {} {} {} {}",
            "•".dimmed(),
            asset.relative_path.cyan(),
            utils::format_size(asset.size).dimmed(),
            "asset".dimmed()
        );
    }

    eprintln!(
        "\n  {} modules, {} total, cache hit rate {:.1}%\n",
        result.stats.total_modules,
        utils::format_size(result.stats.total_size),
        result.stats.cache_hit_rate * 100.0
    );
}

fn parse_format(value: &str) -> Result<Format> {
    match value {
        "esm" => Ok(Format::Esm),
        "cjs" => Ok(Format::Cjs),
        other => bail!("unknown format '{}' (expected esm or cjs)", other),
    }
}

fn parse_platform(value: &str) -> Result<Platform> {
    match value {
        "browser" => Ok(Platform::Browser),
        "node" => Ok(Platform::Node),
        other => bail!("unknown platform '{}' (expected browser or node)", other),
    }
}

fn parse_sourcemap(value: &str) -> Result<SourcemapMode> {
    match value {
        "none" => Ok(SourcemapMode::None),
        "inline" => Ok(SourcemapMode::Inline),
        "external" => Ok(SourcemapMode::External),
        other => bail!(
            "unknown sourcemap mode '{}' (expected none, inline or external)",
            other
        ),
    }
}
