//! fleetctl — operate a fleetops-managed fleet from the command line.
//!
//! # Usage
//!
//! ```text
//! fleetctl --config fleetops.toml deploy v42
//! fleetctl scale-out us-west-2 --amount 2
//! fleetctl monitor --continuous
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

const DEFAULT_FILTER: &str = "info,fleetops=debug,fleetctl=debug";

#[derive(Parser)]
#[command(
    name = "fleetctl",
    about = "fleetops — blue/green deploys and scaling for regional fleets",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Path to fleetops.toml.
    #[arg(short, long, global = true, default_value = "fleetops.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a version to every region (or one region).
    Deploy {
        #[arg(id = "deploy_version", value_name = "VERSION")]
        version: String,
        /// Give DNS nodes new stable addresses instead of moving the old ones.
        #[arg(long)]
        new_addresses: bool,
        #[arg(long)]
        region: Option<String>,
        /// Instance type for the new nodes (default: current type).
        #[arg(long)]
        instance_type: Option<String>,
    },
    /// Add nodes to a region.
    ScaleOut {
        region: String,
        #[arg(short, long, default_value = "1")]
        amount: u32,
    },
    /// Remove randomly chosen nodes from a region.
    ScaleIn {
        region: String,
        #[arg(short, long, default_value = "1")]
        amount: u32,
    },
    /// Replace a region's nodes with the next larger instance type.
    ScaleUp {
        region: String,
        /// Skip the operation lock.
        #[arg(long)]
        force: bool,
    },
    /// Replace a region's nodes with the next smaller instance type.
    ScaleDown { region: String },
    /// Probe every node and scale up regions with failing nodes.
    Monitor {
        /// Keep monitoring until interrupted.
        #[arg(long)]
        continuous: bool,
    },
    /// Scale regions according to their CPU load.
    Autoscale {
        /// Repeat at this interval (e.g. "1m") until interrupted.
        #[arg(long)]
        every: Option<String>,
    },
    /// Release addresses and terminate nodes no backend routes to.
    Clean {
        /// Minimum age of reclaimed resources.
        #[arg(long, default_value = "40m")]
        min_alive: String,
        #[arg(long = "except-address")]
        except_addresses: Vec<Ipv4Addr>,
        #[arg(long = "except-node")]
        except_nodes: Vec<String>,
    },
    /// Show the deployed version and traffic-bound nodes.
    Status,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    commands::run(cli).await
}
