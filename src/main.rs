#[macro_use]
mod logging;
mod capture;
mod cli;
mod config;
mod dispatcher;
mod error;
mod policy;
mod state_machine;
mod supervisor;
mod tags;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use capture::{CaptureOrchestrator, FfmpegCamera};
use cli::{Cli, Command};
use config::StepcamConfig;
use dispatcher::Dispatcher;
use policy::PolicyTable;
use state_machine::StepController;
use supervisor::ConnectionSupervisor;
use tags::{ChangeSink, GatewayClient};

/// Capacity of the channel between the tag subscription and the dispatcher.
const EVENT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config = StepcamConfig::load(cli.config.as_deref())?;
    let policies = PolicyTable::parse(&config.valid_steps).context("invalid VALID_STEPS")?;

    match cli.command {
        Command::Policies => {
            print_policies(&policies);
            Ok(())
        }
        Command::Run => run(config, policies).await,
    }
}

fn print_policies(policies: &PolicyTable) {
    if policies.is_empty() {
        println!("no step policies configured");
        return;
    }
    println!("{:<8} {:>8}  mode", "step", "delay");
    for policy in policies.iter() {
        println!(
            "{:<8} {:>7.1}s  {}",
            policy.key.as_str(),
            policy.delay.as_secs_f64(),
            policy.mode.to_string()
        );
    }
}

async fn run(config: StepcamConfig, policies: PolicyTable) -> Result<()> {
    anyhow::ensure!(!config.step_tag.is_empty(), "TAG_NAME is not set");
    if policies.is_empty() {
        tracing::warn!("no step policies configured, only product changes will be captured");
    }
    important!(
        equipment = %config.equipment,
        steps = policies.len(),
        server = %config.server_url,
        "starting stepcam"
    );

    let mut capture = CaptureOrchestrator::new(
        FfmpegCamera::new(&config.image_extension),
        config.capture_settings(),
    );
    if !capture.open_initial().await {
        tracing::error!("no video device could be opened, captures will fail until one appears");
    }
    tracing::debug!(device = ?capture.device_index(), "camera ready");

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let controller = StepController::new(policies, config.gate_ready());
    let dispatcher = tokio::spawn(Dispatcher::new(controller, capture).run(rx));

    let sink = ChangeSink::new(config.tag_roles(), tx);
    let mut supervisor =
        ConnectionSupervisor::new(GatewayClient::default(), config.supervisor_settings(), sink);

    tokio::select! {
        _ = supervisor.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            important!("interrupted, shutting down");
        }
    }

    // Dropping the supervisor closes the sink, which stops the dispatcher.
    drop(supervisor);
    let mut capture = dispatcher.await.context("dispatcher task panicked")?;
    capture.release();
    important!("camera released");
    Ok(())
}
