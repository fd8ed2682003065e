//! Command dispatch: wire a controller to the configured provider, run
//! one command, and persist the provider state.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use fleetops_autoscale::{Autoscaler, ScaleActions};
use fleetops_backend::{AcceleratorApi, DnsApi};
use fleetops_controller::notify;
use fleetops_controller::{
    CleanOptions, Collaborators, DeployOptions, FleetController, FleetStatus, OperationReport,
};
use fleetops_core::config::ProviderKind;
use fleetops_core::{FleetConfig, parse_duration};
use fleetops_sim::{SimProber, SimProvider};
use fleetops_state::CooldownStore;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::{Cli, Command};

/// A controller and the provider behind it.
struct Fleet {
    config: FleetConfig,
    sim: SimProvider,
    controller: Arc<FleetController>,
}

impl Fleet {
    async fn open(path: &Path) -> anyhow::Result<Self> {
        let config = FleetConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
        let sim = match config.provider.kind {
            ProviderKind::Sim => SimProvider::open(&config.provider.state_file)
                .with_context(|| format!("opening sim state {}", config.provider.state_file.display()))?,
        };
        sim.ensure_resources(&config).await;

        let shared = Arc::new(sim.clone());
        let collaborators = Collaborators {
            compute: shared.clone(),
            addresses: Some(shared.clone()),
            accelerator: config
                .accelerator
                .as_ref()
                .map(|_| shared.clone() as Arc<dyn AcceleratorApi>),
            dns: config.dns.as_ref().map(|_| shared.clone() as Arc<dyn DnsApi>),
            prober: Some(Arc::new(SimProber::new(sim.clone()))),
            notifier: notify::from_config(&config)?,
        };
        let controller = Arc::new(FleetController::new(&config, collaborators)?);
        info!(module = %config.module, regions = config.regions.len(), "fleet loaded");
        Ok(Self { config, sim, controller })
    }
}

/// Run `cli.command`. Provider state is saved whether or not it succeeded.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let fleet = Fleet::open(&cli.config).await?;
    let outcome = dispatch(&fleet, cli.command, cli.json).await;
    fleet.sim.save().await.context("saving sim state")?;
    outcome
}

async fn dispatch(fleet: &Fleet, command: Command, json: bool) -> anyhow::Result<()> {
    let controller = &fleet.controller;
    match command {
        Command::Deploy {
            version,
            new_addresses,
            region,
            instance_type,
        } => {
            let options = DeployOptions {
                allocate_new_addresses: new_addresses,
                region,
                instance_type,
            };
            print_report(&controller.deploy(&version, options).await?, json)
        }
        Command::ScaleOut { region, amount } => print_report(&controller.scale_out(&region, amount).await?, json),
        Command::ScaleIn { region, amount } => print_report(&controller.scale_in(&region, amount).await?, json),
        Command::ScaleUp { region, force } => print_report(&controller.scale_up(&region, force).await?, json),
        Command::ScaleDown { region } => print_report(&controller.scale_down(&region).await?, json),
        Command::Monitor { continuous: false } => print_report(&controller.monitor_once().await?, json),
        Command::Monitor { continuous: true } => {
            controller.run_monitor(shutdown_on_ctrl_c()).await;
            Ok(())
        }
        Command::Autoscale { every } => autoscale(fleet, every.as_deref(), json).await,
        Command::Clean {
            min_alive,
            except_addresses,
            except_nodes,
        } => {
            let min_alive =
                parse_duration(&min_alive).with_context(|| format!("invalid --min-alive {min_alive:?}"))?;
            let options = CleanOptions {
                min_alive,
                except_addresses,
                except_node_ids: except_nodes,
            };
            print_report(&controller.clean(options).await?, json)
        }
        Command::Status => print_status(&controller.status().await?, json),
    }
}

async fn autoscale(fleet: &Fleet, every: Option<&str>, json: bool) -> anyhow::Result<()> {
    let Some(policy) = fleet.config.autoscale_policy()? else {
        bail!("no [autoscale] section in the config");
    };
    let actions: Arc<dyn ScaleActions> = fleet.controller.clone();
    let autoscaler = Autoscaler::new(
        actions,
        Arc::new(fleet.sim.clone()),
        fleet.controller.notifier().clone(),
        CooldownStore::new(&fleet.config.state_dir, &fleet.config.module),
        policy,
    );

    if let Some(every) = every {
        let interval = parse_duration(every).with_context(|| format!("invalid --every {every:?}"))?;
        autoscaler.run(interval, shutdown_on_ctrl_c()).await;
        return Ok(());
    }

    let decisions = autoscaler.run_once().await?;
    if json {
        let decisions: Vec<(String, String)> = decisions
            .into_iter()
            .map(|(region, decision)| (region, format!("{decision:?}")))
            .collect();
        print_json(&decisions)
    } else {
        for (region, decision) in decisions {
            println!("{region}: {decision:?}");
        }
        Ok(())
    }
}

/// Receiver that flips once ctrl-c is pressed.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = tx.send(true);
        }
    });
    rx
}

// ── Output ────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &OperationReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    println!("{}", report.message);
    for (region, nodes) in &report.nodes {
        for node in nodes {
            println!("  {region}  {node}");
        }
    }
    Ok(())
}

fn print_status(status: &FleetStatus, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(status);
    }
    println!("module: {}", status.module);
    println!("lock:   {}", status.lock_holder.as_deref().unwrap_or("free"));
    for backend in &status.backends {
        println!();
        println!("[{}]", backend.backend);
        println!("version:     {}", backend.version.as_deref().unwrap_or("unknown"));
        match backend.last_change {
            Some(at) => println!("last change: {at}"),
            None => println!("last change: unknown"),
        }
        for (region, nodes) in &backend.nodes {
            let listed: Vec<String> = nodes.iter().map(ToString::to_string).collect();
            println!("{region}: {}", listed.join(", "));
        }
    }
    Ok(())
}
