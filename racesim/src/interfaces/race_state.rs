use crate::core::race::{LapSnapshot, RaceStatus};
use crate::post::race_result::RaceResult;

/// RaceState is pushed to live subscribers after every tick.
#[derive(Debug, Clone)]
pub struct RaceState {
    pub race_id: String,
    pub status: RaceStatus,
    pub latest_lap: LapSnapshot,
    /// Lap completed in the tick, if any
    pub lap_completed: Option<u32>,

    // final results payload (sent once when race finishes)
    pub final_result: Option<RaceResult>,
}
