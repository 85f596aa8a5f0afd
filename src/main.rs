//! Command-line entry point: load configuration, wire the devices, run one sweep.
use anyhow::{bail, Context, Result};
use clap::Parser;
use figment::providers::Serialized;
use harmonic_sweep::{
    adapters::{connect_generator, CommandBus},
    config::{GeneratorTransport, SweepConfig},
    data::{RunJournal, RunSink, TableSink},
    experiment::{SweepController, SweepPlan},
    instrument::{mock::simulated_pair, FunctionGenerator, LockIn},
    metadata::RunMetadataBuilder,
};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Second-harmonic phase-shift sweep
#[derive(Parser, Debug)]
#[command(author, version, about = "Second-harmonic phase-shift sweep")]
struct Args {
    /// Configuration file (TOML); defaults to config/harmonic_sweep.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against the simulated generator and lock-in
    #[arg(long)]
    simulate: bool,

    /// Directory for result tables, store and metadata
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Generator VISA resource or serial port
    #[arg(long)]
    resource: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn load_config(args: &Args) -> Result<SweepConfig> {
    if let Some(path) = &args.config {
        if !path.is_file() {
            bail!("Config file {:?} does not exist", path);
        }
    }
    let mut figment = SweepConfig::figment(args.config.as_deref());
    if args.simulate {
        figment = figment.merge(Serialized::default(
            "generator.transport",
            GeneratorTransport::Simulated,
        ));
    }
    if let Some(dir) = &args.output_dir {
        figment = figment.merge(Serialized::default("storage.output_dir", dir));
    }
    if let Some(resource) = &args.resource {
        figment = figment.merge(Serialized::default("generator.resource", resource));
    }
    let config: SweepConfig = figment
        .extract()
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(level: &str, json: bool) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_devices(config: &SweepConfig) -> Result<(Box<dyn CommandBus>, Box<dyn LockIn>)> {
    if config.generator.transport == GeneratorTransport::Simulated {
        let (bus, lockin) = simulated_pair(
            &config.lockin.device,
            config.lockin.fundamental_demod,
            config.lockin.harmonic_demod,
            config.simulation.clone(),
        );
        info!("Using simulated generator and lock-in '{}'", config.lockin.device);
        return Ok((Box::new(bus), Box::new(lockin)));
    }

    let lockin = hardware_lockin(config)?;
    let bus = connect_generator(&config.generator)
        .await
        .with_context(|| format!("Failed to open generator '{}'", config.generator.resource))?;
    Ok((bus, lockin))
}

fn hardware_lockin(config: &SweepConfig) -> Result<Box<dyn LockIn>> {
    bail!(
        "No driver for lock-in '{}' is built in. Run with --simulate, or drive the sweep \
         from the library with your own harmonic_sweep::instrument::LockIn implementation",
        config.lockin.device
    )
}

async fn run(config: SweepConfig) -> Result<()> {
    let storage = &config.storage;
    let (bus, lockin) = connect_devices(&config).await?;

    if storage.write_metadata {
        let path = storage
            .output_dir
            .join(format!("{}_metadata.json", storage.file_prefix));
        RunMetadataBuilder::from_config(&config)
            .build()
            .write_json(&path)
            .with_context(|| format!("Failed to write run metadata to {:?}", path))?;
    }

    let journal = RunJournal::new(&storage.error_log, &storage.finish_marker);
    let mut sink = RunSink::open(&storage.output_dir, &storage.file_prefix, storage.store_backend)
        .context("Failed to open result sinks")?;

    let generator = FunctionGenerator::new(bus, config.timing.command_delay);
    let plan = SweepPlan::from_config(&config)?;
    let mut controller = SweepController::new(generator, lockin, plan);

    info!(
        "Sweeping {} points into {:?}",
        config.sweep.point_count(),
        storage.output_dir
    );
    let result = controller.run(&config.sweep, &mut sink, &journal).await;
    let closed = sink.close().await;
    let report = result.context("Sweep aborted")?;
    closed.context("Failed to close result sinks")?;

    if !report.is_clean() {
        warn!(
            "{} setpoint(s) had generator faults, see {:?}",
            report.failed_setpoints.len(),
            journal.error_log()
        );
    }
    info!(
        "Duration: {:.1} sec, {} tables written",
        report.elapsed.as_secs_f64(),
        report.tables.len()
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config.application.log_level, args.log_json);
    run(config).await
}
