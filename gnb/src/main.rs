//! Albor baseband engine
//!
//! Runs the subframe worker pool against the built-in MAC scheduler and
//! reports what the MAC received.

mod config;
mod driver;

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use config::EngineConfig;
use driver::Engine;

/// Albor baseband engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file, defaults are used when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides the file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of subframes to run, unbounded when absent
    #[arg(short = 'n', long)]
    subframes: Option<u64>,

    /// Override the number of subframe workers
    #[arg(short, long)]
    workers: Option<u32>,

    /// Pace subframes on the TTI clock instead of running back to back
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(workers) = args.workers {
        config.workers.nof_workers = workers;
    }

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor baseband engine");
    info!("Configuration file: {}", args.config.as_deref().unwrap_or("<defaults>"));
    for (idx, cell) in config.cells.iter().enumerate() {
        info!(
            "  Cell {}: PCI {}, {} PRB, numerology {}, CORESET {} x {} symbols",
            idx,
            cell.pci,
            cell.nof_prb,
            cell.numerology,
            cell.coreset_id,
            cell.coreset_duration
        );
    }
    info!("  UEs: {:04x?}", config.ues.rntis);

    let mut engine = Engine::new(&config)?;
    let stop = Arc::new(AtomicBool::new(false));

    // The subframe loop blocks on worker condition variables
    let mut run_handle = {
        let stop = stop.clone();
        let nof_subframes = args.subframes;
        let realtime = args.realtime;
        tokio::task::spawn_blocking(move || {
            engine.run(nof_subframes, realtime, &stop);
            engine
        })
    };

    let engine = tokio::select! {
        result = &mut run_handle => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            stop.store(true, Ordering::Relaxed);
            run_handle.await
        }
    };

    let mut engine = match engine {
        Ok(engine) => engine,
        Err(e) => {
            error!("Subframe loop aborted: {}", e);
            return Err(e.into());
        }
    };

    info!("Shutting down");
    let stats = engine.shutdown();

    info!("Subframes: {} run, {} missed", stats.subframes, stats.deadline_misses);
    info!("PDCCH: {} DCI sent, {} found", stats.phy.dci_tx, stats.phy.dci_rx);
    info!(
        "PDSCH: {} TB sent, CRC ok {} / ko {}",
        stats.phy.pdsch_tx, stats.phy.pdsch_crc_ok, stats.phy.pdsch_crc_ko
    );
    info!(
        "PDU queue: {} pushed, {} dropped, {} grants skipped",
        stats.phy.pdus_pushed, stats.phy.pdus_dropped, stats.phy.grants_skipped
    );
    info!(
        "MAC: {} PDUs, {} bytes, {} corrupted",
        stats.mac.pdus, stats.mac.bytes, stats.mac.corrupted
    );
    for (rnti, pdus) in &stats.mac.per_ue {
        info!("  RNTI 0x{:04x}: {} PDUs", rnti, pdus);
    }

    Ok(())
}
