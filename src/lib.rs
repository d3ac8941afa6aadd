//! Rivet library
//!
//! Core functionality for the Rivet bundler: module graph construction,
//! dependency resolution, code splitting and output emission, backed by a
//! shared transform cache.

pub mod bundler;
pub mod cli;
pub mod config;
pub mod error;
pub mod resolver;
pub mod transform;
pub mod utils;

pub use bundler::{
    build, BuildMode, BuildOptions, BuildResult, BuildStats, Bundler, CancelFlag,
    CodeSplittingOptions, EntryPoint, EntrySpec, Format, ModuleType, OutputAsset, OutputChunk,
    Platform, SourcemapMode,
};
pub use cli::Cli;
pub use config::Config;
pub use error::{Error, Result};
pub use transform::cache::TransformCache;
