use crate::core::driver::DriverPars;
use crate::core::placement::{self, build_wager};
use crate::core::race::{LapSnapshot, Race, TickOutcome};
use crate::core::settlement::{
    resolve_next_lap_wagers, resolve_overdue_next_lap_wagers, resolve_race_wagers,
};
use crate::core::wager::{Wager, WagerRequest};
use crate::error::SimError;
use crate::interfaces::race_state::RaceState;
use crate::interfaces::store::{with_retry, DocumentStore, StoreError, WriteOp};
use crate::post::race_result::RaceResult;
use crate::pre::read_sim_pars::SimPars;
use chrono::Utc;
use flume::{Receiver, Sender};
use helpers::time_codec::time_string_to_seconds;
use rand::rngs::StdRng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Document holding the stored race status template
pub const RACE_TEMPLATE: &str = "initialRaceStatus/default";
/// Collection holding the default driver grid
pub const DRIVERS: &str = "drivers";

/// RaceSimulation owns one race and everything that mutates it: the RNG, the store handle and
/// the tick scheduler. Only its tick loop changes the race state.
pub struct RaceSimulation {
    race_id: String,
    race: Race,
    store: Arc<dyn DocumentStore>,
    rng: StdRng,
    /// (s) Simulated time per tick
    tick_delta_s: f64,
    /// Wall clock time between two ticks
    tick_interval: Duration,
    tx: Option<Sender<RaceState>>,
    wager_requests: Option<Receiver<WagerRequest>>,
    /// Completed laps whose lapData document is not persisted yet
    pending_laps: Vec<LapSnapshot>,
    /// Set when next-lap wagers of a completed lap may still be pending
    next_lap_backlog: bool,
}

impl RaceSimulation {
    /// create sets up the race from the parameters, the stored race template and (if the
    /// parameters contain no drivers) the stored driver grid, and registers it in `races`.
    pub async fn create(
        store: Arc<dyn DocumentStore>,
        sim_pars: &SimPars,
        rng: StdRng,
    ) -> Result<RaceSimulation, SimError> {
        let mut race_pars = sim_pars.race_pars.to_owned();
        if race_pars.drivers.is_empty() {
            race_pars.drivers = read_drivers(store.as_ref()).await?;
            info!("Read {} drivers from the store", race_pars.drivers.len());
        }

        let mut race = Race::new(&race_pars, &sim_pars.sim_consts)?;
        if let Some(template) = store.read_document(RACE_TEMPLATE).await? {
            apply_template(&mut race, &template)?;
        }

        let race_id = store
            .append_document(
                "races",
                json!({
                    "startTime": Utc::now().to_rfc3339(),
                    "status": "in_progress",
                }),
            )
            .await?;
        info!(
            "Created race {} with {} drivers over {} laps",
            race_id,
            race.drivers.len(),
            race.total_laps
        );

        Ok(RaceSimulation {
            race_id,
            race,
            store,
            rng,
            tick_delta_s: race_pars.tick_delta_s,
            tick_interval: Duration::from_millis(race_pars.tick_interval_ms.max(1)),
            tx: None,
            wager_requests: None,
            pending_laps: Vec::new(),
            next_lap_backlog: false,
        })
    }

    /// with_realtime_factor divides the wall clock tick interval by `realtime_factor`.
    pub fn with_realtime_factor(mut self, realtime_factor: f64) -> RaceSimulation {
        if realtime_factor > 0.0 {
            let interval_s = self.tick_interval.as_secs_f64() / realtime_factor;
            self.tick_interval = Duration::from_secs_f64(interval_s.max(0.001));
        } else {
            warn!("Ignoring non-positive real-time factor {}", realtime_factor);
        }
        self
    }

    /// with_sender pushes a `RaceState` to `tx` after every tick.
    pub fn with_sender(mut self, tx: Sender<RaceState>) -> RaceSimulation {
        self.tx = Some(tx);
        self
    }

    /// with_wager_requests places the wagers received on `rx` before every tick.
    pub fn with_wager_requests(mut self, rx: Receiver<WagerRequest>) -> RaceSimulation {
        self.wager_requests = Some(rx);
        self
    }

    pub fn race_id(&self) -> &str {
        &self.race_id
    }

    pub fn race(&self) -> &Race {
        &self.race
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// place_wager quotes, validates and stores a wager on the running race.
    pub async fn place_wager(&mut self, request: &WagerRequest) -> Result<Wager, SimError> {
        let wager = build_wager(&self.race, request, &mut self.rng)?;
        placement::place_wager(self.store.as_ref(), &self.race_id, &wager).await?;
        Ok(wager)
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHODS --------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// run ticks the race at the configured interval until it is finished or `cancel` fires. A
    /// tick in progress is always completed, including its settlement.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RaceResult, SimError> {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Simulating race {} with {:.1}s per tick every {:?}",
            self.race_id, self.tick_delta_s, self.tick_interval
        );

        while !self.race.is_finished() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        "Race {} stopped after {} laps",
                        self.race_id, self.race.laps_completed
                    );
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.step().await {
                        if let SimError::InvariantViolation(_) = err {
                            error!("Halting race {}: {}", self.race_id, err);
                        }
                        return Err(err);
                    }
                }
            }
        }

        Ok(self.race.get_race_result(&self.race_id))
    }

    /// step executes one tick: incoming wagers, simulation, persistence, settlement and the live
    /// update.
    pub async fn step(&mut self) -> Result<TickOutcome, SimError> {
        self.place_requested_wagers().await;

        let outcome = self.race.simulate_tick(self.tick_delta_s, &mut self.rng)?;
        if outcome.lap_completed.is_some() {
            self.pending_laps.push(outcome.snapshot.to_owned());
        }

        self.persist_tick(&outcome.snapshot).await;

        if let Some(lap) = outcome.lap_completed {
            self.retry_overdue_next_lap_wagers(lap).await;
            match resolve_next_lap_wagers(self.store.as_ref(), &self.race_id, lap, &outcome.snapshot)
                .await
            {
                Ok(report) => self.next_lap_backlog |= report.failed > 0,
                Err(err) => {
                    warn!("Settlement of next-lap wagers for lap {} failed: {}", lap, err);
                    self.next_lap_backlog = true;
                }
            }
        }

        let final_result = if outcome.just_finished {
            let after_last_lap = self.race.laps_completed + 1;
            self.retry_overdue_next_lap_wagers(after_last_lap).await;
            let result = self.race.get_race_result(&self.race_id);
            resolve_race_wagers(self.store.as_ref(), &self.race_id, &result).await?;
            Some(result)
        } else {
            None
        };

        self.publish(&outcome, final_result);
        Ok(outcome)
    }

    // ---------------------------------------------------------------------------------------------
    // METHODS (HELPERS) ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    async fn place_requested_wagers(&mut self) {
        let requests: Vec<WagerRequest> = match &self.wager_requests {
            Some(rx) => rx.try_iter().collect(),
            None => return,
        };

        for request in requests.iter() {
            if let Err(err) = self.place_wager(request).await {
                warn!(
                    "Rejected {} wager of user {} on {}: {}",
                    request.kind, request.user_id, request.target_driver, err
                );
            }
        }
    }

    /// retry_overdue_next_lap_wagers settles the next-lap wagers left pending by an earlier lap.
    async fn retry_overdue_next_lap_wagers(&mut self, lap: u32) {
        if !self.next_lap_backlog {
            return;
        }

        match resolve_overdue_next_lap_wagers(
            self.store.as_ref(),
            &self.race_id,
            lap,
            &self.race.lap_history,
        )
        .await
        {
            Ok(report) => self.next_lap_backlog = report.failed > 0,
            Err(err) => warn!(
                "Retrying overdue next-lap wagers of race {} failed: {}",
                self.race_id, err
            ),
        }
    }

    /// persist_tick writes the tick state in one batch. A failing batch is logged and the
    /// simulation continues, the next successful batch overwrites the current state and adds the
    /// buffered laps.
    async fn persist_tick(&mut self, snapshot: &LapSnapshot) {
        let ops = match self.tick_ops(snapshot) {
            Ok(ops) => ops,
            Err(err) => {
                warn!("Could not serialize tick state: {}", err);
                return;
            }
        };

        let store = self.store.as_ref();
        match with_retry("persisting tick", || store.atomic_batch(ops.to_owned())).await {
            Ok(()) => self.pending_laps.clear(),
            Err(err) => warn!(
                "Tick state of race {} not persisted ({} laps buffered): {}",
                self.race_id,
                self.pending_laps.len(),
                err
            ),
        }
    }

    fn tick_ops(&self, snapshot: &LapSnapshot) -> Result<Vec<WriteOp>, StoreError> {
        let race_path = format!("races/{}", self.race_id);
        let mut ops = Vec::with_capacity(2 + self.pending_laps.len() + 2 * self.race.drivers.len());

        ops.push(WriteOp::merge(
            race_path.to_owned(),
            json!({ "raceStatus": self.race.status() }),
        ));
        ops.push(WriteOp::set(
            format!("{}/live/latestLap", race_path),
            serde_json::to_value(snapshot)?,
        ));
        for lap in self.pending_laps.iter() {
            ops.push(WriteOp::set(
                format!("{}/lapData/lap_{}", race_path, lap.lap_number),
                serde_json::to_value(lap)?,
            ));
        }
        for driver in self.race.drivers.iter() {
            ops.push(WriteOp::set(
                format!("{}/drivers/{}", race_path, driver.name),
                serde_json::to_value(driver)?,
            ));
            ops.push(WriteOp::set(
                format!("{}/betMultipliers/{}", race_path, driver.name),
                serde_json::to_value(&driver.bet_multipliers)?,
            ));
        }
        Ok(ops)
    }

    fn publish(&mut self, outcome: &TickOutcome, final_result: Option<RaceResult>) {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return,
        };

        let race_state = RaceState {
            race_id: self.race_id.to_owned(),
            status: self.race.status(),
            latest_lap: outcome.snapshot.to_owned(),
            lap_completed: outcome.lap_completed,
            final_result,
        };
        if tx.send(race_state).is_err() {
            debug!("Live receiver of race {} is gone", self.race_id);
            self.tx = None;
        }
    }
}

/// read_drivers reads the driver grid from the `drivers` collection. Documents without a name
/// field are named after their id.
async fn read_drivers(store: &dyn DocumentStore) -> Result<Vec<DriverPars>, SimError> {
    let docs = store.read_collection(DRIVERS).await?;
    let mut drivers = Vec::with_capacity(docs.len());

    for doc in docs {
        let mut data = doc.data;
        match data.as_object_mut() {
            Some(fields) => {
                fields
                    .entry("name")
                    .or_insert_with(|| Value::from(doc.id.to_owned()));
            }
            None => {
                return Err(SimError::validation(format!(
                    "driver document {} is not an object",
                    doc.path
                )))
            }
        }
        let driver_pars: DriverPars = serde_json::from_value(data).map_err(|err| {
            SimError::validation(format!("driver document {}: {}", doc.path, err))
        })?;
        drivers.push(driver_pars);
    }
    Ok(drivers)
}

/// apply_template continues the race from a stored status template. Missing fields keep the
/// configured values. A template of a race that is already over is rejected.
fn apply_template(race: &mut Race, template: &Value) -> Result<(), SimError> {
    let total_laps = match template.get("totalLaps") {
        Some(value) => lap_count(value, "totalLaps")?,
        None => race.total_laps,
    };
    let laps_completed = match template.get("lapsCompleted") {
        Some(value) => lap_count(value, "lapsCompleted")?,
        None => 0,
    };
    if total_laps == 0 || laps_completed >= total_laps {
        return Err(SimError::validation(format!(
            "race template has {} of {} laps completed",
            laps_completed, total_laps
        )));
    }
    let elapsed_s = match template.get("timeElapsed").and_then(Value::as_str) {
        Some(time_elapsed) => time_string_to_seconds(time_elapsed)?,
        None => 0.0,
    };

    race.resume_from(total_laps, laps_completed, elapsed_s);
    debug!(
        "Applied race template: {} laps, {} completed, {}s elapsed",
        total_laps, laps_completed, elapsed_s
    );
    Ok(())
}

fn lap_count(value: &Value, field: &str) -> Result<u32, SimError> {
    value
        .as_u64()
        .and_then(|laps| u32::try_from(laps).ok())
        .ok_or_else(|| {
            SimError::validation(format!("race template field {} is invalid: {}", field, value))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::race::RacePars;
    use crate::core::wager::WagerKind;
    use crate::interfaces::memory_store::InMemoryStore;
    use crate::interfaces::store::MAX_ATTEMPTS;
    use rand::SeedableRng;

    fn sim_pars(total_laps: u32) -> SimPars {
        SimPars {
            race_pars: RacePars {
                total_laps,
                tick_interval_ms: 1,
                tick_delta_s: 100.0,
                drivers: vec![DriverPars::new("A"), DriverPars::new("B"), DriverPars::new("C")],
                ..RacePars::default()
            },
            ..SimPars::default_race()
        }
    }

    async fn create(store: &Arc<InMemoryStore>, pars: &SimPars) -> RaceSimulation {
        let store: Arc<dyn DocumentStore> = store.clone();
        RaceSimulation::create(store, pars, StdRng::seed_from_u64(21))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_race_is_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let mut sim = create(&store, &sim_pars(3)).await;
        let (tx, rx) = flume::unbounded();
        sim = sim.with_sender(tx);

        let result = sim.run(CancellationToken::new()).await.unwrap();
        assert_eq!(result.laps_completed, 3);
        assert_eq!(result.winner.as_deref(), Some(result.standings[0].name.as_str()));

        let race_path = format!("races/{}", sim.race_id());
        let race = store.read_document(&race_path).await.unwrap().unwrap();
        assert_eq!(race["status"], "finished");
        assert_eq!(race["raceStatus"]["lapsCompleted"], 3);
        assert_eq!(race["raceStatus"]["finished"], true);

        let laps = store
            .read_collection(&format!("{}/lapData", race_path))
            .await
            .unwrap();
        assert_eq!(laps.len(), 3);
        let drivers = store
            .read_collection(&format!("{}/drivers", race_path))
            .await
            .unwrap();
        assert_eq!(drivers.len(), 3);
        let multipliers = store
            .read_document(&format!("{}/betMultipliers/A", race_path))
            .await
            .unwrap()
            .unwrap();
        assert!(multipliers["winner"].as_f64().unwrap() >= 1.1);

        let states: Vec<RaceState> = rx.try_iter().collect();
        assert_eq!(states.len(), 3);
        assert!(states[..2].iter().all(|state| state.final_result.is_none()));
        assert!(states[2].final_result.is_some());
    }

    #[tokio::test]
    async fn template_and_stored_drivers_are_used() {
        let store = Arc::new(InMemoryStore::new());
        store
            .write_document(
                RACE_TEMPLATE,
                json!({ "totalLaps": 6, "lapsCompleted": 2, "timeElapsed": "00:03:05" }),
                false,
            )
            .await
            .unwrap();
        for name in ["X", "Y"] {
            store
                .write_document(&format!("drivers/{}", name), json!({ "efficiency": 91.0 }), false)
                .await
                .unwrap();
        }

        let mut pars = sim_pars(45);
        pars.race_pars.drivers.clear();
        let sim = create(&store, &pars).await;

        assert_eq!(sim.race().total_laps, 6);
        assert_eq!(sim.race().laps_completed, 2);
        assert_eq!(sim.race().status().time_elapsed, "00:03:05");
        assert!(sim.race().driver("X").is_some());
        assert_eq!(sim.race().driver("Y").unwrap().energy_state.efficiency, 91.0);
    }

    #[tokio::test]
    async fn finished_or_invalid_templates_are_rejected() {
        for template in [
            json!({ "totalLaps": 6, "lapsCompleted": 6 }),
            json!({ "totalLaps": 6, "lapsCompleted": 9 }),
            json!({ "totalLaps": 0 }),
            json!({ "totalLaps": 8_589_934_592u64 }),
            json!({ "lapsCompleted": -1 }),
        ] {
            let store = Arc::new(InMemoryStore::new());
            store
                .write_document(RACE_TEMPLATE, template.to_owned(), false)
                .await
                .unwrap();
            let race_store: Arc<dyn DocumentStore> = store.clone();
            let created =
                RaceSimulation::create(race_store, &sim_pars(5), StdRng::seed_from_u64(1)).await;
            assert!(
                matches!(created, Err(SimError::Validation(_))),
                "accepted template {}",
                template
            );
            assert!(store.read_collection("races").await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn next_lap_wagers_are_settled_after_failed_settlement() {
        let store = Arc::new(InMemoryStore::new());
        store
            .write_document("users/u1", json!({ "points": 100 }), false)
            .await
            .unwrap();
        let mut sim = create(&store, &sim_pars(3)).await;
        let wager = sim
            .place_wager(&WagerRequest {
                user_id: "u1".to_owned(),
                kind: WagerKind::NextLapOvertakes,
                target_driver: "C".to_owned(),
                stake_amount: 40,
            })
            .await
            .unwrap();
        let wager_path = format!("races/{}/nextLapBets/{}", sim.race_id(), wager.id);

        // the tick batch and the settlement transaction both run out of attempts
        store.inject_failures(2 * MAX_ATTEMPTS);
        sim.step().await.unwrap();
        let doc = store.read_document(&wager_path).await.unwrap().unwrap();
        assert_eq!(doc["status"], "pending");

        sim.run(CancellationToken::new()).await.unwrap();
        let doc = store.read_document(&wager_path).await.unwrap().unwrap();
        assert_ne!(doc["status"], "pending");
        let delta = doc["pointsDelta"].as_i64().unwrap();
        let user = store.read_document("users/u1").await.unwrap().unwrap();
        assert_eq!(user["points"].as_i64().unwrap(), 60 + delta);
    }

    #[tokio::test]
    async fn next_lap_wagers_of_the_last_lap_are_settled_before_the_finish() {
        let store = Arc::new(InMemoryStore::new());
        store
            .write_document("users/u1", json!({ "points": 100 }), false)
            .await
            .unwrap();
        let mut sim = create(&store, &sim_pars(1)).await;
        let wager = sim
            .place_wager(&WagerRequest {
                user_id: "u1".to_owned(),
                kind: WagerKind::NextLapEnergyEfficiency,
                target_driver: "A".to_owned(),
                stake_amount: 25,
            })
            .await
            .unwrap();

        store.inject_failures(2 * MAX_ATTEMPTS);
        let outcome = sim.step().await.unwrap();
        assert!(outcome.just_finished);

        let doc = store
            .read_document(&format!("races/{}/nextLapBets/{}", sim.race_id(), wager.id))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(doc["status"], "pending");
        let race = store
            .read_document(&format!("races/{}", sim.race_id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(race["status"], "finished");
    }

    #[tokio::test]
    async fn failed_tick_writes_are_buffered() {
        let store = Arc::new(InMemoryStore::new());
        let mut sim = create(&store, &sim_pars(5)).await;
        let laps_path = format!("races/{}/lapData", sim.race_id());

        store.inject_failures(MAX_ATTEMPTS);
        let outcome = sim.step().await.unwrap();
        assert_eq!(outcome.lap_completed, Some(1));
        assert!(store.read_collection(&laps_path).await.unwrap().is_empty());

        let outcome = sim.step().await.unwrap();
        assert_eq!(outcome.lap_completed, Some(2));
        let laps = store.read_collection(&laps_path).await.unwrap();
        let ids: Vec<&str> = laps.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["lap_1", "lap_2"]);
    }

    #[tokio::test]
    async fn cancelled_race_stops_without_settlement() {
        let store = Arc::new(InMemoryStore::new());
        let mut sim = create(&store, &sim_pars(45)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = sim.run(cancel).await.unwrap();
        assert!(result.winner.is_none());
        let race = store
            .read_document(&format!("races/{}", sim.race_id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(race["status"], "in_progress");
    }

    #[tokio::test]
    async fn queued_wagers_are_placed_before_the_tick() {
        let store = Arc::new(InMemoryStore::new());
        store
            .write_document("users/u1", json!({ "points": 100 }), false)
            .await
            .unwrap();
        let (wager_tx, wager_rx) = flume::unbounded();
        let mut sim = create(&store, &sim_pars(5)).await.with_wager_requests(wager_rx);

        wager_tx
            .send(WagerRequest {
                user_id: "u1".to_owned(),
                kind: WagerKind::NextLapOvertakes,
                target_driver: "B".to_owned(),
                stake_amount: 30,
            })
            .unwrap();
        wager_tx
            .send(WagerRequest {
                user_id: "u1".to_owned(),
                kind: WagerKind::Winner,
                target_driver: "B".to_owned(),
                stake_amount: 500,
            })
            .unwrap();
        sim.step().await.unwrap();

        // the first wager is settled at the end of lap 1, the second one is rejected
        let wagers = store
            .read_collection(&format!("races/{}/nextLapBets", sim.race_id()))
            .await
            .unwrap();
        assert_eq!(wagers.len(), 1);
        assert_ne!(wagers[0].data["status"], "pending");
        assert!(store
            .read_collection(&format!("races/{}/userBets", sim.race_id()))
            .await
            .unwrap()
            .is_empty());
    }
}
