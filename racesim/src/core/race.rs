use crate::core::driver::{Driver, DriverPars, DriverSummary};
use crate::core::odds::BetMultipliers;
use crate::error::SimError;
use crate::post::race_result::{RaceResult, Standing};
use helpers::general::argsort;
use helpers::time_codec::seconds_to_time_string;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// * `base_lap_time` - (s) Lap time of a driver with maximum speed and consistency
/// * `lap_time_jitter` - (s) Half width of the uniform lap time scatter
/// * `speed_jitter` - (km/h) Half width of the uniform speed scatter
/// * `performance_jitter` - Half width of the per tick random walk of the performance ratings
/// * `regeneration_share` - Share of the per lap energy budget recovered per lap
/// * `overtake_divisor` - Racecraft is divided by this value to get the per tick probability of
/// an overtake (and of a defensive action)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimConstants {
    #[serde(default = "default_base_lap_time")]
    pub base_lap_time: f64,
    #[serde(default = "default_jitter")]
    pub lap_time_jitter: f64,
    #[serde(default = "default_jitter")]
    pub speed_jitter: f64,
    #[serde(default = "default_performance_jitter")]
    pub performance_jitter: f64,
    #[serde(default = "default_regeneration_share")]
    pub regeneration_share: f64,
    #[serde(default = "default_overtake_divisor")]
    pub overtake_divisor: f64,
}

fn default_base_lap_time() -> f64 {
    90.0
}

fn default_jitter() -> f64 {
    0.25
}

fn default_performance_jitter() -> f64 {
    0.1
}

fn default_regeneration_share() -> f64 {
    0.1
}

fn default_overtake_divisor() -> f64 {
    200.0
}

impl Default for SimConstants {
    fn default() -> Self {
        SimConstants {
            base_lap_time: default_base_lap_time(),
            lap_time_jitter: default_jitter(),
            speed_jitter: default_jitter(),
            performance_jitter: default_performance_jitter(),
            regeneration_share: default_regeneration_share(),
            overtake_divisor: default_overtake_divisor(),
        }
    }
}

/// Rule that ends a race.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Finished as soon as `total_laps` laps are completed
    LapCount,
    /// Finished at the first lap completion after `race_duration_s`, or after `total_laps`
    Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        CompletionPolicy::LapCount
    }
}

/// * `total_laps` - Number of laps of the race
/// * `energy_capacity_kwh` - (kWh) Battery capacity of every car
/// * `tick_interval_ms` - (ms) Wall clock time between two ticks
/// * `tick_delta_s` - (s) Simulated time per tick
/// * `race_duration_s` - (s) Race duration, required for the duration policy
/// * `completion` - Completion policy
/// * `seed` - Optional RNG seed for reproducible races
/// * `drivers` - Starting grid, in starting order
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RacePars {
    #[serde(default = "default_total_laps")]
    pub total_laps: u32,
    #[serde(default = "default_energy_capacity")]
    pub energy_capacity_kwh: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_tick_delta_s")]
    pub tick_delta_s: f64,
    #[serde(default)]
    pub race_duration_s: Option<f64>,
    #[serde(default)]
    pub completion: CompletionPolicy,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub drivers: Vec<DriverPars>,
}

fn default_total_laps() -> u32 {
    45
}

fn default_energy_capacity() -> f64 {
    52.0
}

fn default_tick_interval_ms() -> u64 {
    5000
}

fn default_tick_delta_s() -> f64 {
    5.0
}

impl Default for RacePars {
    fn default() -> Self {
        RacePars {
            total_laps: default_total_laps(),
            energy_capacity_kwh: default_energy_capacity(),
            tick_interval_ms: default_tick_interval_ms(),
            tick_delta_s: default_tick_delta_s(),
            race_duration_s: None,
            completion: CompletionPolicy::default(),
            seed: None,
            drivers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePhase {
    InProgress,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceStatus {
    pub laps_completed: u32,
    pub total_laps: u32,
    /// HH:MM:SS
    pub time_elapsed: String,
    pub finished: bool,
}

/// Ordered per-driver summary of the race at the end of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapSnapshot {
    pub lap_number: u32,
    pub leader_name: String,
    /// (s) Lap time difference between second and first driver
    pub gap_to_second: f64,
    pub drivers: Vec<DriverSummary>,
}

impl LapSnapshot {
    pub fn driver(&self, name: &str) -> Option<&DriverSummary> {
        self.drivers.iter().find(|driver| driver.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: LapSnapshot,
    /// Number of the lap completed in this tick
    pub lap_completed: Option<u32>,
    /// Set in the one tick that moves the race to `RacePhase::Finished`
    pub just_finished: bool,
}

#[derive(Debug)]
pub struct Race {
    pub total_laps: u32,
    pub energy_capacity: f64,
    pub completion: CompletionPolicy,
    pub race_duration_s: Option<f64>,
    sim_consts: SimConstants,
    /// Drivers, always ordered by position
    pub drivers: Vec<Driver>,
    pub laps_completed: u32,
    /// (s)
    pub elapsed_s: f64,
    /// (s) Time accumulated in the lap in progress
    lap_acc: f64,
    pub phase: RacePhase,
    pub lap_history: Vec<LapSnapshot>,
    fastest_lap: Option<(String, f64)>,
}

impl Race {
    pub fn new(race_pars: &RacePars, sim_consts: &SimConstants) -> Result<Race, SimError> {
        // check parameters
        if race_pars.drivers.is_empty() {
            return Err(SimError::validation("a race requires at least one driver"));
        }
        let mut names = HashSet::with_capacity(race_pars.drivers.len());
        for driver_pars in race_pars.drivers.iter() {
            if driver_pars.name.is_empty() || driver_pars.name.contains('/') {
                return Err(SimError::validation(format!(
                    "invalid driver name \"{}\"",
                    driver_pars.name
                )));
            }
            if !names.insert(driver_pars.name.as_str()) {
                return Err(SimError::validation(format!(
                    "driver name {} is not unique",
                    driver_pars.name
                )));
            }
        }
        if race_pars.total_laps == 0 {
            return Err(SimError::validation("total_laps must be at least 1"));
        }
        if !(race_pars.energy_capacity_kwh > 0.0) {
            return Err(SimError::validation("energy_capacity_kwh must be positive"));
        }
        if !(race_pars.tick_delta_s > 0.0) {
            return Err(SimError::validation("tick_delta_s must be positive"));
        }
        if race_pars.completion == CompletionPolicy::Duration
            && !race_pars.race_duration_s.map_or(false, |t| t > 0.0)
        {
            return Err(SimError::validation(
                "the duration completion policy requires a positive race_duration_s",
            ));
        }

        // create drivers in starting order
        let no_drivers = race_pars.drivers.len();
        let drivers = race_pars
            .drivers
            .iter()
            .enumerate()
            .map(|(idx, driver_pars)| {
                let mut driver =
                    Driver::new(driver_pars, race_pars.energy_capacity_kwh, idx as u32 + 1);
                driver.bet_multipliers = BetMultipliers::for_position(driver.position, no_drivers);
                driver
            })
            .collect();

        Ok(Race {
            total_laps: race_pars.total_laps,
            energy_capacity: race_pars.energy_capacity_kwh,
            completion: race_pars.completion,
            race_duration_s: race_pars.race_duration_s,
            sim_consts: sim_consts.to_owned(),
            drivers,
            laps_completed: 0,
            elapsed_s: 0.0,
            lap_acc: 0.0,
            phase: RacePhase::InProgress,
            lap_history: Vec::new(),
            fastest_lap: None,
        })
    }

    /// resume_from continues a race from a stored status template.
    pub fn resume_from(&mut self, total_laps: u32, laps_completed: u32, elapsed_s: f64) {
        self.total_laps = total_laps.max(1);
        self.laps_completed = laps_completed.min(self.total_laps);
        self.elapsed_s = elapsed_s.max(0.0);
        if self.laps_completed >= self.total_laps {
            self.phase = RacePhase::Finished;
        }
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// simulate_tick advances the race by `dt` seconds. Clock, driver updates, ordering, lap
    /// completion and multipliers are updated as one unit. A finished race is not mutated.
    pub fn simulate_tick<R: Rng + ?Sized>(
        &mut self,
        dt: f64,
        rng: &mut R,
    ) -> Result<TickOutcome, SimError> {
        if self.is_finished() {
            return Ok(TickOutcome {
                snapshot: self.snapshot(),
                lap_completed: None,
                just_finished: false,
            });
        }
        if !(dt > 0.0) {
            return Err(SimError::validation(format!("tick delta {} is not positive", dt)));
        }

        // advance clock
        self.elapsed_s += dt;
        self.lap_acc += dt;

        // update drivers
        for driver in self.drivers.iter_mut() {
            driver.update(&self.sim_consts, self.energy_capacity, self.total_laps, dt, rng);
        }
        self.update_fastest_lap();

        // reorder drivers by lap time, ties keep the previous order
        self.reorder_drivers()?;

        // lap completion, at most one lap per tick
        let mut lap_completed = None;
        let leader_lap_time = self.drivers[0].lap_time;
        if self.lap_acc >= leader_lap_time {
            self.laps_completed += 1;
            self.lap_acc -= leader_lap_time;
            lap_completed = Some(self.laps_completed);
        }

        // multipliers follow the new positions
        let no_drivers = self.drivers.len();
        for driver in self.drivers.iter_mut() {
            driver.bet_multipliers = BetMultipliers::for_position(driver.position, no_drivers);
        }

        let snapshot = self.snapshot();
        if let Some(lap) = lap_completed {
            info!(
                "Lap {}/{} completed, leader {}",
                lap, self.total_laps, snapshot.leader_name
            );
            self.lap_history.push(snapshot.to_owned());
        }

        let just_finished = self.check_finished(lap_completed.is_some());
        if just_finished {
            self.phase = RacePhase::Finished;
            info!(
                "Race finished after {} laps ({})",
                self.laps_completed,
                seconds_to_time_string(self.elapsed_s)
            );
        }

        debug!(
            "Tick done, race time {:.1}s, lap {}, leader {}",
            self.elapsed_s,
            self.current_lap(),
            snapshot.leader_name
        );

        Ok(TickOutcome {
            snapshot,
            lap_completed,
            just_finished,
        })
    }

    // ---------------------------------------------------------------------------------------------
    // METHODS (HELPERS) ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    fn update_fastest_lap(&mut self) {
        for driver in self.drivers.iter() {
            let is_faster = match &self.fastest_lap {
                Some((_, best)) => driver.lap_time < *best,
                None => true,
            };
            if is_faster {
                self.fastest_lap = Some((driver.name.to_owned(), driver.lap_time));
            }
        }
    }

    fn reorder_drivers(&mut self) -> Result<(), SimError> {
        let lap_times: Vec<f64> = self.drivers.iter().map(|driver| driver.lap_time).collect();
        let order = argsort(&lap_times);

        let mut slots: Vec<Option<Driver>> = self.drivers.drain(..).map(Some).collect();
        self.drivers = order.iter().filter_map(|&idx| slots[idx].take()).collect();

        for (idx, driver) in self.drivers.iter_mut().enumerate() {
            driver.position = idx as u32 + 1;
        }
        self.check_positions()
    }

    /// check_positions verifies that the positions are a permutation of 1..N.
    fn check_positions(&self) -> Result<(), SimError> {
        let mut positions: Vec<u32> = self.drivers.iter().map(|driver| driver.position).collect();
        positions.sort_unstable();

        let is_permutation = positions
            .iter()
            .enumerate()
            .all(|(idx, &pos)| pos == idx as u32 + 1);

        if is_permutation {
            Ok(())
        } else {
            Err(SimError::InvariantViolation(format!(
                "positions {:?} are not a permutation of 1..{}",
                positions,
                self.drivers.len()
            )))
        }
    }

    fn check_finished(&self, lap_completed: bool) -> bool {
        if self.laps_completed >= self.total_laps {
            return true;
        }
        match (self.completion, self.race_duration_s) {
            (CompletionPolicy::Duration, Some(duration)) => {
                lap_completed && self.elapsed_s >= duration
            }
            _ => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == RacePhase::Finished
    }

    /// current_lap returns the lap in progress (or the last lap once the race is finished).
    pub fn current_lap(&self) -> u32 {
        (self.laps_completed + 1).min(self.total_laps)
    }

    pub fn status(&self) -> RaceStatus {
        RaceStatus {
            laps_completed: self.laps_completed,
            total_laps: self.total_laps,
            time_elapsed: seconds_to_time_string(self.elapsed_s),
            finished: self.is_finished(),
        }
    }

    /// snapshot returns the current ordered state of the race.
    pub fn snapshot(&self) -> LapSnapshot {
        let gap_to_second = match (self.drivers.first(), self.drivers.get(1)) {
            (Some(first), Some(second)) => second.lap_time - first.lap_time,
            _ => 0.0,
        };

        LapSnapshot {
            lap_number: self.laps_completed,
            leader_name: self
                .drivers
                .first()
                .map(|driver| driver.name.to_owned())
                .unwrap_or_default(),
            gap_to_second,
            drivers: self.drivers.iter().map(|driver| driver.get_summary()).collect(),
        }
    }

    /// get_race_result returns the classification and lap history of the race.
    pub fn get_race_result(&self, race_id: &str) -> RaceResult {
        RaceResult {
            race_id: race_id.to_owned(),
            total_laps: self.total_laps,
            laps_completed: self.laps_completed,
            time_elapsed: seconds_to_time_string(self.elapsed_s),
            winner: if self.is_finished() {
                self.leader().map(|driver| driver.name.to_owned())
            } else {
                None
            },
            standings: self
                .drivers
                .iter()
                .map(|driver| Standing {
                    name: driver.name.to_owned(),
                    position: driver.position,
                    best_lap_time: driver.best_lap_time,
                    overtakes: driver.overtaking_stats.overtakes,
                    battery_percent: driver.energy_state.battery_percent,
                })
                .collect(),
            fastest_lap_time: self.fastest_lap().map(|(_, time)| time),
            lap_history: self.lap_history.to_owned(),
        }
    }

    pub fn driver(&self, name: &str) -> Option<&Driver> {
        self.drivers.iter().find(|driver| driver.name == name)
    }

    pub fn leader(&self) -> Option<&Driver> {
        self.drivers.first()
    }

    /// fastest_lap returns the driver and time (s) of the fastest lap of the race so far.
    pub fn fastest_lap(&self) -> Option<(&str, f64)> {
        self.fastest_lap
            .as_ref()
            .map(|(name, time)| (name.as_str(), *time))
    }
}
