// src/main.rs

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use tracing::{error, info};

use domain_posture::cli::CommandLine;
use domain_posture::config::ScanConfig;
use domain_posture::core::knowledge_base::ParkingRegistry;
use domain_posture::core::orchestrator::Orchestrator;
use domain_posture::core::scanner::ScanContext;
use domain_posture::core::sink::open_sink;
use domain_posture::input::read_targets;
use domain_posture::logging;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = CommandLine::parse_args();
    let log_path = logging::initialize_logging(cli.verbose).wrap_err("failed to set up logging")?;
    info!(log = %log_path.display(), "domain-posture {} starting.", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        error!(error = %e, "Run aborted.");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: CommandLine) -> Result<()> {
    // Every fatal condition is checked here, before the first worker starts.
    let mut config = match &cli.config {
        Some(path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    let targets = read_targets(&cli.input)?;

    let mut registry = ParkingRegistry::builtin();
    if let Some(path) = &cli.parking_registry {
        let added = registry.extend_from_file(path)?;
        info!(path = %path.display(), added, "Merged extra parking providers.");
    }

    let ctx = ScanContext::from_config(&config, Arc::new(registry))?;
    let sink = open_sink(&cli.output, cli.format)?;

    let summary = Orchestrator::new(Arc::new(ctx), config.concurrency)
        .run(targets, sink)
        .await?;
    eprintln!(
        "Scanned {} domains: {} reachable, {} with HSTS, {} redirecting to HTTPS, {} parked.",
        summary.written, summary.reachable, summary.hsts, summary.redirect_ok, summary.parked
    );
    Ok(())
}
