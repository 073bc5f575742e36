use crate::core::driver::DriverPars;
use crate::core::race::{RacePars, SimConstants};
use crate::core::wager::{UserAccount, WagerRequest};
use anyhow::Context;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::Path;

/// SimPars is used to store all other parameter structs. `accounts` and `wagers` seed the store
/// with user balances and wagers placed at the start of the race, they use the document field
/// names (camelCase).
#[derive(Debug, Deserialize, Clone)]
pub struct SimPars {
    pub race_pars: RacePars,
    #[serde(default)]
    pub sim_consts: SimConstants,
    #[serde(default)]
    pub accounts: Vec<UserAccount>,
    #[serde(default)]
    pub wagers: Vec<WagerRequest>,
}

impl SimPars {
    /// default_race returns a 10 driver race with the default race parameters and no accounts.
    pub fn default_race() -> SimPars {
        // (name, average speed, consistency, racecraft, efficiency)
        let grid = [
            ("Nova", 204.0, 86.0, 82.0, 84.0),
            ("Vega", 202.0, 84.0, 88.0, 80.0),
            ("Orion", 200.0, 82.0, 80.0, 90.0),
            ("Lyra", 201.0, 88.0, 76.0, 86.0),
            ("Atlas", 199.0, 80.0, 90.0, 78.0),
            ("Rhea", 198.0, 85.0, 79.0, 92.0),
            ("Juno", 197.0, 78.0, 84.0, 82.0),
            ("Kai", 196.0, 81.0, 86.0, 76.0),
            ("Zane", 195.0, 76.0, 78.0, 88.0),
            ("Mira", 194.0, 79.0, 74.0, 94.0),
        ];

        SimPars {
            race_pars: RacePars {
                drivers: grid
                    .iter()
                    .map(|&(name, average_speed, consistency, racecraft, efficiency)| DriverPars {
                        name: name.to_owned(),
                        average_speed,
                        consistency,
                        racecraft,
                        efficiency,
                    })
                    .collect(),
                ..RacePars::default()
            },
            sim_consts: SimConstants::default(),
            accounts: Vec::new(),
            wagers: Vec::new(),
        }
    }
}

/// read_sim_pars reads the JSON file and decodes the JSON string into the simulation parameters
/// struct.
pub fn read_sim_pars(filepath: &Path) -> anyhow::Result<SimPars> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .context(format!(
            "Failed to open parameter file {}!",
            filepath.display()
        ))?;
    let pars = serde_json::from_reader(&fh).context(format!(
        "Failed to parse parameter file {}!",
        filepath.display()
    ))?;
    Ok(pars)
}
