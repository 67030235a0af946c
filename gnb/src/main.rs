//! Albor Space NR MAC scheduler simulator
//!
//! Loads a cell configuration, runs the slot driver for a number of frames and logs
//! every PDSCH and PUSCH grant it commits.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use config::SimConfig;
use layers::mac::{BwpParams, MacScheduler, SlotSchedule};

/// Albor Space NR MAC scheduler simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gnb/config/sch_sim.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides log.mac_level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of frames to simulate
    #[arg(short, long, default_value = "4")]
    frames: u32,

    /// Pace slots at the numerology slot duration
    #[arg(long)]
    realtime: bool,
}

fn log_schedule(schedule: &SlotSchedule) {
    if schedule.is_empty() {
        return;
    }
    info!("{}", schedule);
    for grant in schedule.pdsch.iter().chain(&schedule.pusch) {
        info!("  {} prbs={}", grant, grant.prbs);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = SimConfig::from_yaml_file(&args.config)?;

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| cfg.log.mac_level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space MAC scheduler simulator");
    info!("Configuration file: {}", args.config);

    let pci = cfg.pci()?;
    let scs = cfg.scs()?;
    let bwp = BwpParams::new(cfg.bwp_config()?).context("Invalid BWP configuration")?;
    info!("Cell configuration:");
    info!("  PCI: {}", pci.0);
    info!("  Subcarrier spacing: {} kHz", cfg.cell_cfg.common_scs);
    info!("  BWP: {} PRBs from CRB {}", bwp.nof_prb(), bwp.start_rb);
    info!("  Duplex: {:?}", bwp.duplex);

    let mut scheduler = MacScheduler::new(Arc::new(bwp), scs, cfg.sib1_config())?;
    for ue in cfg.ue_configs()? {
        scheduler.add_ue(ue)?;
    }
    for rar in cfg.rar_requests() {
        scheduler.queue_rar(rar);
    }

    let mut ticker = interval(Duration::from_micros(scs.slot_duration_us() as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut nof_pdsch = 0usize;
    let mut nof_pusch = 0usize;
    for frame in 0..args.frames {
        for slot in 0..scheduler.slots_per_frame() {
            if args.realtime {
                ticker.tick().await;
            }
            let schedule = scheduler.run_slot(frame, slot)?;
            nof_pdsch += schedule.pdsch.len();
            nof_pusch += schedule.pusch.len();
            log_schedule(&schedule);
        }
        debug!("Frame {} done", frame);
    }

    info!(
        "Simulated {} frames: {} PDSCH, {} PUSCH, {} RARs pending",
        args.frames,
        nof_pdsch,
        nof_pusch,
        scheduler.nof_pending_rars()
    );
    Ok(())
}
