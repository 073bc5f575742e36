use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    name = "racesim",
    about = "A live race simulator with points-based wager settlement"
)]
pub struct SimOpts {
    // FLAGS ---------------------------------------------------------------------------------------
    /// Activate debug logging
    #[clap(short, long)]
    pub debug: bool,

    // OPTIONS -------------------------------------------------------------------------------------
    /// Set path to the simulation parameter file (OPTIONAL: if not set, uses the built-in grid)
    #[clap(short, long)]
    pub parfile_path: Option<PathBuf>,

    /// Set real-time factor, the wall clock tick interval is divided by it
    #[clap(short, long, default_value = "1.0")]
    pub realtime_factor: f64,

    /// Set RNG seed (overrides the seed of the parameter file)
    #[clap(short, long)]
    pub seed: Option<u64>,

    /// Set path of the CSV lap history export
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}
