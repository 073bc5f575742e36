use crate::core::wager::WagerKind;
use helpers::general::clamp;
use serde::{Deserialize, Serialize};

pub const MIN_MULTIPLIER: f64 = 1.1;
pub const MAX_MULTIPLIER: f64 = 10.0;

/// calc_multiplier limits a base difficulty to the allowed multiplier range.
pub fn calc_multiplier(base_difficulty: f64) -> f64 {
    clamp(base_difficulty, MIN_MULTIPLIER, MAX_MULTIPLIER)
}

/// Current payout multiplier of every wager kind for one driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetMultipliers {
    pub winner: f64,
    pub fastest_lap: f64,
    pub podium_finish: f64,
    pub top_five: f64,
    pub next_lap_fastest_lap: f64,
    pub next_lap_overtakes: f64,
    pub next_lap_energy_efficiency: f64,
}

impl BetMultipliers {
    /// for_position computes the multipliers of the driver at `position` (1-based) among
    /// `no_drivers` drivers. The result depends on the position only.
    pub fn for_position(position: u32, no_drivers: usize) -> BetMultipliers {
        let rel_pos = position as f64 / no_drivers.max(1) as f64;

        BetMultipliers {
            winner: calc_multiplier(10.0 - rel_pos * 5.0),
            fastest_lap: calc_multiplier(5.0),
            podium_finish: calc_multiplier(7.0 - rel_pos * 3.0),
            top_five: calc_multiplier(5.0 - rel_pos * 2.0),
            next_lap_fastest_lap: calc_multiplier(5.0),
            next_lap_overtakes: calc_multiplier(4.0),
            next_lap_energy_efficiency: calc_multiplier(3.0),
        }
    }

    pub fn get(&self, kind: WagerKind) -> f64 {
        match kind {
            WagerKind::Winner => self.winner,
            WagerKind::FastestLap => self.fastest_lap,
            WagerKind::PodiumFinish => self.podium_finish,
            WagerKind::TopFive => self.top_five,
            WagerKind::NextLapFastestLap => self.next_lap_fastest_lap,
            WagerKind::NextLapOvertakes => self.next_lap_overtakes,
            WagerKind::NextLapEnergyEfficiency => self.next_lap_energy_efficiency,
        }
    }
}

impl Default for BetMultipliers {
    fn default() -> Self {
        BetMultipliers::for_position(1, 1)
    }
}
