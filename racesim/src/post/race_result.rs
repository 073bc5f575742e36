use crate::core::race::LapSnapshot;
use anyhow::Context;
use helpers::time_codec::seconds_to_lap_time;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Final classification entry of one driver.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub name: String,
    pub position: u32,
    /// (s)
    pub best_lap_time: Option<f64>,
    pub overtakes: u32,
    pub battery_percent: f64,
}

/// RaceResult contains all race information that is required for settlement and post-processing.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    pub race_id: String,
    pub total_laps: u32,
    pub laps_completed: u32,
    /// HH:MM:SS
    pub time_elapsed: String,
    pub winner: Option<String>,
    /// Ordered by position
    pub standings: Vec<Standing>,
    /// (s) Fastest lap of the whole race
    pub fastest_lap_time: Option<f64>,
    pub lap_history: Vec<LapSnapshot>,
}

/// One row of the lap history CSV export.
#[derive(Debug, Serialize)]
struct LapRow<'a> {
    lap: u32,
    position: u32,
    driver: &'a str,
    lap_time: &'a str,
    speed: f64,
    battery: f64,
    energy: f64,
    efficiency: f64,
    overtakes: u32,
}

impl RaceResult {
    pub fn standing(&self, name: &str) -> Option<&Standing> {
        self.standings.iter().find(|standing| standing.name == name)
    }

    /// print_standings prints the final classification to the console output.
    pub fn print_standings(&self) {
        println!(
            "RESULT: Race {} ({} of {} laps, {})",
            self.race_id, self.laps_completed, self.total_laps, self.time_elapsed
        );
        println!("pos, driver              , best lap , overtakes, battery");

        for standing in self.standings.iter() {
            let best_lap = standing
                .best_lap_time
                .map(seconds_to_lap_time)
                .unwrap_or_else(|| "-".to_owned());
            println!(
                "{:3}, {:20}, {:>9}, {:9}, {:6.1}%",
                standing.position, standing.name, best_lap, standing.overtakes, standing.battery_percent
            );
        }

        if let Some(fastest) = self.fastest_lap_time {
            println!("RESULT: Fastest lap {}", seconds_to_lap_time(fastest));
        }
        if let Some(winner) = &self.winner {
            println!("RESULT: Winner {}", winner);
        }
    }

    /// write_lap_history_csv writes one row per driver and completed lap.
    pub fn write_lap_history_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_path(path)
            .context(format!("Failed to create CSV file {}!", path.display()))?;

        for snapshot in self.lap_history.iter() {
            for driver in snapshot.drivers.iter() {
                wtr.serialize(LapRow {
                    lap: snapshot.lap_number,
                    position: driver.position,
                    driver: &driver.name,
                    lap_time: &driver.lap_time,
                    speed: driver.speed,
                    battery: driver.battery,
                    energy: driver.energy,
                    efficiency: driver.efficiency,
                    overtakes: driver.overtakes,
                })?;
            }
        }
        wtr.flush()
            .context(format!("Failed to write CSV file {}!", path.display()))?;
        Ok(())
    }
}
