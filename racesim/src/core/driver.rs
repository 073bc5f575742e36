use crate::core::odds::BetMultipliers;
use crate::core::race::SimConstants;
use helpers::general::{clamp, random_walk, uniform_jitter};
use helpers::time_codec::seconds_to_lap_time;
use rand::Rng;
use rand_distr::{Bernoulli, Distribution};
use serde::{Deserialize, Serialize, Serializer};

/// (km/h) Allowed range of the average speed
pub const SPEED_RANGE: [f64; 2] = [180.0, 220.0];
/// Allowed range of consistency, racecraft and efficiency ratings
pub const RATING_RANGE: [f64; 2] = [70.0, 100.0];

/// * `name` - Driver name, unique within a race
/// * `average_speed` - (km/h) Initial average speed
/// * `consistency` - Initial consistency rating, lowers lap time scatter
/// * `racecraft` - Initial racecraft rating, drives overtakes and defensive actions
/// * `efficiency` - Initial energy efficiency rating
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DriverPars {
    pub name: String,
    #[serde(default = "default_average_speed", alias = "averageSpeed")]
    pub average_speed: f64,
    #[serde(default = "default_rating")]
    pub consistency: f64,
    #[serde(default = "default_rating")]
    pub racecraft: f64,
    #[serde(default = "default_rating")]
    pub efficiency: f64,
}

fn default_average_speed() -> f64 {
    200.0
}

fn default_rating() -> f64 {
    80.0
}

impl DriverPars {
    pub fn new(name: &str) -> DriverPars {
        DriverPars {
            name: name.to_owned(),
            average_speed: default_average_speed(),
            consistency: default_rating(),
            racecraft: default_rating(),
            efficiency: default_rating(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub average_speed: f64,
    pub consistency: f64,
    pub racecraft: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyState {
    /// (kWh)
    pub energy_remaining: f64,
    pub battery_percent: f64,
    pub efficiency: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OvertakingStats {
    pub overtakes: u32,
    pub defensive_actions: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub name: String,
    pub performance: Performance,
    pub energy_state: EnergyState,
    pub overtaking_stats: OvertakingStats,
    /// (s) Last computed lap time, kept at millisecond precision
    #[serde(serialize_with = "serialize_lap_time")]
    pub lap_time: f64,
    /// (km/h)
    pub speed: f64,
    pub position: u32,
    /// (s) Best lap time so far, None before the first tick
    pub best_lap_time: Option<f64>,
    pub bet_multipliers: BetMultipliers,
}

fn serialize_lap_time<S: Serializer>(lap_time: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&seconds_to_lap_time(*lap_time))
}

/// Per-driver entry of a lap snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSummary {
    pub name: String,
    pub position: u32,
    pub lap_time: String,
    pub speed: f64,
    pub battery: f64,
    pub energy: f64,
    pub efficiency: f64,
    pub overtakes: u32,
}

impl Driver {
    pub fn new(driver_pars: &DriverPars, energy_capacity: f64, position: u32) -> Driver {
        Driver {
            name: driver_pars.name.to_owned(),
            performance: Performance {
                average_speed: clamp(driver_pars.average_speed, SPEED_RANGE[0], SPEED_RANGE[1]),
                consistency: clamp(driver_pars.consistency, RATING_RANGE[0], RATING_RANGE[1]),
                racecraft: clamp(driver_pars.racecraft, RATING_RANGE[0], RATING_RANGE[1]),
            },
            energy_state: EnergyState {
                energy_remaining: energy_capacity,
                battery_percent: 100.0,
                efficiency: clamp(driver_pars.efficiency, RATING_RANGE[0], RATING_RANGE[1]),
            },
            overtaking_stats: OvertakingStats::default(),
            lap_time: 0.0,
            speed: 0.0,
            position,
            best_lap_time: None,
            bet_multipliers: BetMultipliers::default(),
        }
    }

    /// The method advances the driver state by one tick of `dt` seconds: new lap time and speed,
    /// energy consumption, overtaking trials and a drift of the performance ratings.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        sim_consts: &SimConstants,
        energy_capacity: f64,
        tot_no_laps: u32,
        dt: f64,
        rng: &mut R,
    ) {
        let speed_factor = (SPEED_RANGE[1] - self.performance.average_speed) / 20.0;
        let consistency_factor = (100.0 - self.performance.consistency) / 100.0;

        // lap time and speed
        let lap_time = sim_consts.base_lap_time
            + speed_factor * 2.0
            + consistency_factor * 2.0
            + uniform_jitter(sim_consts.lap_time_jitter, rng);
        self.lap_time = ((lap_time * 1000.0).round() / 1000.0).max(0.001);
        self.best_lap_time = Some(match self.best_lap_time {
            Some(best) => best.min(self.lap_time),
            None => self.lap_time,
        });
        self.speed = self.performance.average_speed + uniform_jitter(sim_consts.speed_jitter, rng);

        // energy, scaled by the share of a lap covered in this tick
        let energy_per_lap = energy_capacity / tot_no_laps.max(1) as f64;
        let efficiency_factor = (100.0 - self.energy_state.efficiency) / 100.0;
        let lap_frac = (dt / self.lap_time).min(1.0);
        let energy_used = energy_per_lap * (1.0 + efficiency_factor + speed_factor * 0.05) * lap_frac;
        let regeneration = energy_per_lap * sim_consts.regeneration_share * lap_frac;

        let energy = &mut self.energy_state;
        energy.energy_remaining = (energy.energy_remaining - energy_used + regeneration).max(0.0);
        energy.battery_percent = clamp(energy.energy_remaining / energy_capacity * 100.0, 0.0, 100.0);

        // overtaking, one Bernoulli trial per counter and tick
        let p_action = clamp(self.performance.racecraft / sim_consts.overtake_divisor, 0.0, 1.0);
        if let Ok(trial) = Bernoulli::new(p_action) {
            if trial.sample(rng) {
                self.overtaking_stats.overtakes += 1;
            }
            if trial.sample(rng) {
                self.overtaking_stats.defensive_actions += 1;
            }
        }

        // performance drift
        let step = sim_consts.performance_jitter;
        let perf = &mut self.performance;
        perf.average_speed = random_walk(perf.average_speed, step, SPEED_RANGE[0], SPEED_RANGE[1], rng);
        perf.consistency = random_walk(perf.consistency, step, RATING_RANGE[0], RATING_RANGE[1], rng);
        perf.racecraft = random_walk(perf.racecraft, step, RATING_RANGE[0], RATING_RANGE[1], rng);
        self.energy_state.efficiency = random_walk(
            self.energy_state.efficiency,
            step,
            RATING_RANGE[0],
            RATING_RANGE[1],
            rng,
        );
    }

    pub fn get_summary(&self) -> DriverSummary {
        DriverSummary {
            name: self.name.to_owned(),
            position: self.position,
            lap_time: seconds_to_lap_time(self.lap_time),
            speed: self.speed,
            battery: self.energy_state.battery_percent,
            energy: self.energy_state.energy_remaining,
            efficiency: self.energy_state.efficiency,
            overtakes: self.overtaking_stats.overtakes,
        }
    }
}
