//! Command-line interface
//!
//! Subcommands map one-to-one onto the build modes:
//! - `bundle`: single entry, single chunk
//! - `library`: one chunk per entry, dependencies externalized
//! - `app`: multiple entries with code splitting
//! - `components`: one independent chunk per entry

mod build;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use build::{AppCommand, BundleCommand, CommonArgs, ComponentsCommand, LibraryCommand};

/// Rivet - a fast JavaScript/TypeScript module bundler
#[derive(Parser, Debug)]
#[command(name = "rivet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to rivet.toml config file
    #[arg(short, long, global = true, default_value = "rivet.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bundle a single entry into one chunk
    Bundle(BundleCommand),

    /// Build a library (dependencies externalized from package.json)
    Library(LibraryCommand),

    /// Build an app with code splitting
    App(AppCommand),

    /// Build a component library (one independent chunk per entry)
    Components(ComponentsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Bundle(cmd) => cmd.execute(&self.config).await,
            Commands::Library(cmd) => cmd.execute(&self.config).await,
            Commands::App(cmd) => cmd.execute(&self.config).await,
            Commands::Components(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Print the Rivet banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "⚡".cyan(),
        "Rivet".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
