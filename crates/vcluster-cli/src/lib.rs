//! vcluster CLI library

pub mod commands;
pub mod error;
pub mod find;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// vcluster - virtual Kubernetes clusters inside a namespace
#[derive(Parser, Debug)]
#[command(name = "vcluster")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lists all virtual clusters
    List(commands::list::ListArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::List(args) => commands::list::run(args).await,
        }
    }
}
