//! Command Line Interface.

use crate::scheduler::{FillStrategy, PlateFormat};
use clap::StructOpt;
use std::path::PathBuf;

/// Camera-guided picking of tissue cuboids from a petri dish into a
/// multi-well plate.
#[derive(StructOpt, Debug)]
#[clap(about, version)]
pub struct Cli {
    /// Load the picking configuration from file.
    #[structopt(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Load the calibration profile from file.
    #[structopt(short = 'k', long)]
    pub calibration: Option<PathBuf>,
    /// Load a well plan from file instead of filling a whole plate.
    #[structopt(long)]
    pub plan: Option<PathBuf>,
    /// Plate format to fill when no well plan is given: 6, 24, 48, 96 or
    /// 384.
    #[structopt(short = 'p', long, default_value = "24")]
    pub plate: PlateFormat,
    /// Samples per well when no well plan is given.
    #[structopt(short = 'n', long, default_value = "1")]
    pub count: u32,
    /// Order to fill wells in: well_by_well, vertical, horizontal or
    /// spread_out.
    #[structopt(short = 's', long, default_value = "well_by_well")]
    pub fill_strategy: FillStrategy,
    /// Pick one object per cycle even when the well needs more.
    #[structopt(long)]
    pub one_by_one: bool,
    /// Skip the idle hold and start picking immediately.
    #[structopt(short = 'a', long)]
    pub autostart: bool,
    /// Seed target sampling for reproducible runs.
    #[structopt(long)]
    pub seed: Option<u64>,
}
