//! meridian CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::Context;
use crate::config::CliConfig;

/// meridian - multi-cluster federation management
#[derive(Parser, Debug)]
#[command(name = "meridian")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Kubeconfig of the management cluster; inferred from the environment when unset
    #[arg(long, global = true, env = "MERIDIAN_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// YAML file with multi-cluster options and bootstrap overrides
    #[arg(long, global = true, env = "MERIDIAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the federation control plane into a cluster
    Install(commands::install::InstallArgs),
    /// Remove the federation control plane from a cluster
    Uninstall(commands::install::UninstallArgs),
    /// Handle a registered cluster: host the control plane or join it
    Join(commands::membership::MembershipArgs),
    /// Remove a registered cluster from the federation
    Unjoin(commands::membership::MembershipArgs),
    /// Show one resource in a member cluster
    Get(commands::resources::GetArgs),
    /// List resources in a member cluster
    List(commands::resources::ListArgs),
    /// Print the MemberCluster CRD
    Crd,
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        if let Commands::Crd = self.command {
            return commands::crd::run();
        }

        let config = CliConfig::load(self.config.as_deref()).await?;
        let ctx = Context::new(self.kubeconfig, config);
        match self.command {
            Commands::Install(args) => commands::install::install(&ctx, args).await,
            Commands::Uninstall(args) => commands::install::uninstall(&ctx, args).await,
            Commands::Join(args) => commands::membership::join(&ctx, args).await,
            Commands::Unjoin(args) => commands::membership::unjoin(&ctx, args).await,
            Commands::Get(args) => commands::resources::get(&ctx, args).await,
            Commands::List(args) => commands::resources::list(&ctx, args).await,
            Commands::Crd => commands::crd::run(),
        }
    }
}
