//! Settlement of wagers against lap snapshots and final race results.
//!
//! The stake is deducted when a wager is placed. A won wager credits
//! `floor(stake * multiplier)`, a lost wager has a points delta of 0. Every wager is settled in
//! its own transaction that re-checks the `pending` status, so repeated settlement runs are
//! no-ops and a failing wager does not affect the others.

use crate::core::odds::{MAX_MULTIPLIER, MIN_MULTIPLIER};
use crate::core::race::LapSnapshot;
use crate::core::wager::{user_path, Wager, WagerKind, NEXT_LAP_WAGERS, RACE_WAGERS};
use crate::error::SimError;
use crate::interfaces::store::{
    transaction_with_retry, with_retry, DocumentStore, StoreError, StoredDocument, Transaction,
};
use crate::post::race_result::RaceResult;
use chrono::Utc;
use helpers::time_codec::lap_time_to_seconds;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Efficiency a driver must exceed for a won next-lap energy efficiency wager
pub const EFFICIENCY_THRESHOLD: f64 = 90.0;

/// (s) Tolerance when comparing lap times
const LAP_TIME_EPS: f64 = 1e-6;

/// Tolerance of the multiplier range check, stored multipliers are rounded to 2 decimals
const MULTIPLIER_EPS: f64 = 1e-9;

// -------------------------------------------------------------------------------------------------
// EVALUATION --------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// evaluate_next_lap decides a next-lap wager against the snapshot of the completed lap.
pub fn evaluate_next_lap(wager: &Wager, snapshot: &LapSnapshot) -> Result<bool, SimError> {
    let driver = snapshot.driver(&wager.target_driver).ok_or_else(|| {
        SimError::validation(format!(
            "driver {} not found in lap {}",
            wager.target_driver, snapshot.lap_number
        ))
    })?;

    match wager.kind {
        WagerKind::NextLapFastestLap => {
            let target = lap_time_to_seconds(&driver.lap_time)?;
            let mut fastest = f64::INFINITY;
            for other in snapshot.drivers.iter() {
                fastest = fastest.min(lap_time_to_seconds(&other.lap_time)?);
            }
            Ok(target <= fastest + LAP_TIME_EPS)
        }
        WagerKind::NextLapOvertakes => Ok(driver.overtakes > 0),
        WagerKind::NextLapEnergyEfficiency => Ok(driver.efficiency > EFFICIENCY_THRESHOLD),
        kind => Err(SimError::validation(format!(
            "{} wagers are not resolved per lap",
            kind
        ))),
    }
}

/// evaluate_race decides a race wager against the final result.
pub fn evaluate_race(wager: &Wager, result: &RaceResult) -> Result<bool, SimError> {
    let standing = result.standing(&wager.target_driver).ok_or_else(|| {
        SimError::validation(format!("driver {} not classified", wager.target_driver))
    })?;

    match wager.kind {
        WagerKind::Winner => Ok(standing.position == 1),
        WagerKind::PodiumFinish => Ok(standing.position <= 3),
        WagerKind::TopFive => Ok(standing.position <= 5),
        WagerKind::FastestLap => Ok(match (standing.best_lap_time, result.fastest_lap_time) {
            (Some(best), Some(fastest)) => best <= fastest + LAP_TIME_EPS,
            _ => false,
        }),
        kind => Err(SimError::validation(format!(
            "{} wagers are resolved per lap",
            kind
        ))),
    }
}

/// validate_wager checks a stored wager before it is evaluated. Wagers are written by the placement
/// side and are not trusted.
pub fn validate_wager(wager: &Wager) -> Result<(), SimError> {
    if wager.stake_amount == 0 || i64::try_from(wager.stake_amount).is_err() {
        return Err(SimError::validation(format!(
            "stake {} out of range",
            wager.stake_amount
        )));
    }
    if !wager.multiplier.is_finite()
        || wager.multiplier < MIN_MULTIPLIER - MULTIPLIER_EPS
        || wager.multiplier > MAX_MULTIPLIER + MULTIPLIER_EPS
    {
        return Err(SimError::validation(format!(
            "multiplier {} out of range",
            wager.multiplier
        )));
    }
    Ok(())
}

/// points_delta returns the balance change of a settled wager.
pub fn points_delta(stake_amount: u64, multiplier: f64, won: bool) -> i64 {
    if won {
        (stake_amount as f64 * multiplier).floor() as i64
    } else {
        0
    }
}

/// floored_balance applies a delta to a balance that must not drop below 0.
pub fn floored_balance(balance: i64, delta: i64) -> i64 {
    balance.saturating_add(delta).max(0)
}

// -------------------------------------------------------------------------------------------------
// SETTLEMENT --------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// Outcome of one settlement run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub won: usize,
    pub lost: usize,
    /// Wagers found already settled when their transaction ran
    pub skipped: usize,
    /// Wagers whose transaction failed permanently, they stay pending
    pub failed: usize,
    pub points_paid: i64,
}

impl SettlementReport {
    pub fn settled(&self) -> usize {
        self.won + self.lost
    }

    fn add(&mut self, other: SettlementReport) {
        self.won += other.won;
        self.lost += other.lost;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.points_paid += other.points_paid;
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Settled {
    Skipped,
    Won(i64),
    Lost(Option<String>),
}

/// resolve_next_lap_wagers settles all pending next-lap wagers placed during lap `lap_number`.
pub async fn resolve_next_lap_wagers(
    store: &dyn DocumentStore,
    race_id: &str,
    lap_number: u32,
    snapshot: &LapSnapshot,
) -> Result<SettlementReport, SimError> {
    let collection = format!("races/{}/{}", race_id, NEXT_LAP_WAGERS);
    let wagers = with_retry("reading next-lap wagers", || store.read_collection(&collection)).await?;

    let candidates: Vec<StoredDocument> = wagers
        .into_iter()
        .filter(|doc| is_pending(&doc.data) && target_lap(&doc.data) == Some(lap_number as u64))
        .collect();

    let evaluate = |wager: &Wager| evaluate_next_lap(wager, snapshot);
    let report = settle_all(store, &candidates, &evaluate).await;

    info!(
        "Lap {}: settled {} next-lap wagers ({} won, {} failed)",
        lap_number,
        report.settled(),
        report.won,
        report.failed
    );
    Ok(report)
}

/// resolve_overdue_next_lap_wagers settles pending next-lap wagers whose target lap completed
/// before `lap_number`, each against the snapshot of its target lap. Such wagers remain
/// when their settlement failed at the end of that lap.
pub async fn resolve_overdue_next_lap_wagers(
    store: &dyn DocumentStore,
    race_id: &str,
    lap_number: u32,
    lap_history: &[LapSnapshot],
) -> Result<SettlementReport, SimError> {
    let collection = format!("races/{}/{}", race_id, NEXT_LAP_WAGERS);
    let wagers = with_retry("reading next-lap wagers", || store.read_collection(&collection)).await?;

    let mut report = SettlementReport::default();
    for snapshot in lap_history.iter().filter(|snapshot| snapshot.lap_number < lap_number) {
        let candidates: Vec<StoredDocument> = wagers
            .iter()
            .filter(|doc| {
                is_pending(&doc.data) && target_lap(&doc.data) == Some(snapshot.lap_number as u64)
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let evaluate = |wager: &Wager| evaluate_next_lap(wager, snapshot);
        report.add(settle_all(store, &candidates, &evaluate).await);
    }

    if report.settled() + report.failed > 0 {
        info!(
            "Settled {} overdue next-lap wagers ({} won, {} failed)",
            report.settled(),
            report.won,
            report.failed
        );
    }
    Ok(report)
}

/// resolve_race_wagers settles all pending race wagers and marks the race as finished.
pub async fn resolve_race_wagers(
    store: &dyn DocumentStore,
    race_id: &str,
    result: &RaceResult,
) -> Result<SettlementReport, SimError> {
    let collection = format!("races/{}/{}", race_id, RACE_WAGERS);
    let wagers = with_retry("reading race wagers", || store.read_collection(&collection)).await?;

    let candidates: Vec<StoredDocument> = wagers
        .into_iter()
        .filter(|doc| is_pending(&doc.data))
        .collect();

    let evaluate = |wager: &Wager| evaluate_race(wager, result);
    let report = settle_all(store, &candidates, &evaluate).await;

    let race_path = format!("races/{}", race_id);
    let race_doc = json!({
        "status": "finished",
        "winner": result.winner,
        "finishedAt": Utc::now().to_rfc3339(),
    });
    with_retry("marking race finished", || {
        store.write_document(&race_path, race_doc.to_owned(), true)
    })
    .await?;

    info!(
        "Race {} settled: {} race wagers ({} won, {} failed), winner {}",
        race_id,
        report.settled(),
        report.won,
        report.failed,
        result.winner.as_deref().unwrap_or("-")
    );
    Ok(report)
}

async fn settle_all(
    store: &dyn DocumentStore,
    candidates: &[StoredDocument],
    evaluate: &(dyn Fn(&Wager) -> Result<bool, SimError> + Send + Sync),
) -> SettlementReport {
    let mut report = SettlementReport::default();

    for doc in candidates.iter() {
        match settle_wager(store, &doc.path, evaluate).await {
            Ok(Settled::Won(delta)) => {
                report.won += 1;
                report.points_paid += delta;
            }
            Ok(Settled::Lost(reason)) => {
                if let Some(reason) = reason {
                    warn!("Wager {} lost without evaluation: {}", doc.id, reason);
                }
                report.lost += 1;
            }
            Ok(Settled::Skipped) => report.skipped += 1,
            Err(err) => {
                warn!("Settlement of wager {} failed, it stays pending: {}", doc.id, err);
                report.failed += 1;
            }
        }
    }
    report
}

/// settle_wager runs the read-check-write transaction of one wager, retrying transient failures.
async fn settle_wager(
    store: &dyn DocumentStore,
    path: &str,
    evaluate: &(dyn Fn(&Wager) -> Result<bool, SimError> + Send + Sync),
) -> Result<Settled, StoreError> {
    let mut settled = Settled::Skipped;
    transaction_with_retry(store, "settling wager", &mut |tx: &mut Transaction<'_>| -> Result<(), StoreError> {
        settled = settle_in_transaction(tx, path, evaluate);
        Ok(())
    })
    .await?;

    debug!("Wager {} settled: {:?}", path, settled);
    Ok(settled)
}

fn settle_in_transaction(
    tx: &mut Transaction<'_>,
    path: &str,
    evaluate: &(dyn Fn(&Wager) -> Result<bool, SimError> + Send + Sync),
) -> Settled {
    let data = match tx.get(path) {
        Some(data) if is_pending(&data) => data,
        _ => return Settled::Skipped,
    };

    let (won, delta, reason) = match serde_json::from_value::<Wager>(data.to_owned()) {
        Ok(wager) => match validate_wager(&wager).and_then(|()| evaluate(&wager)) {
            Ok(won) => (won, points_delta(wager.stake_amount, wager.multiplier, won), None),
            Err(err) => (false, 0, Some(err.to_string())),
        },
        Err(err) => (false, 0, Some(format!("malformed wager: {}", err))),
    };

    tx.set(
        path,
        json!({
            "status": if won { "won" } else { "lost" },
            "pointsDelta": delta,
            "settledAt": Utc::now().to_rfc3339(),
            "reason": reason,
        }),
        true,
    );

    if delta != 0 {
        if let Some(user_id) = data.get("userId").and_then(Value::as_str) {
            let user = user_path(user_id);
            let balance = tx
                .get(&user)
                .and_then(|doc| doc.get("points").and_then(Value::as_i64))
                .unwrap_or(0);
            tx.set(user, json!({ "points": floored_balance(balance, delta) }), true);
        }
    }

    if won {
        Settled::Won(delta)
    } else {
        Settled::Lost(reason)
    }
}

fn is_pending(data: &Value) -> bool {
    data.get("status").and_then(Value::as_str) == Some("pending")
}

fn target_lap(data: &Value) -> Option<u64> {
    data.get("targetLap").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::DriverSummary;
    use crate::core::wager::{wager_collection_path, WagerStatus};
    use crate::interfaces::memory_store::InMemoryStore;
    use crate::interfaces::store::MAX_ATTEMPTS;
    use crate::post::race_result::Standing;

    fn summary(name: &str, position: u32, lap_time: &str, efficiency: f64, overtakes: u32) -> DriverSummary {
        DriverSummary {
            name: name.to_owned(),
            position,
            lap_time: lap_time.to_owned(),
            speed: 200.0,
            battery: 80.0,
            energy: 41.6,
            efficiency,
            overtakes,
        }
    }

    fn snapshot() -> LapSnapshot {
        LapSnapshot {
            lap_number: 4,
            leader_name: "A".to_owned(),
            gap_to_second: 1.5,
            drivers: vec![
                summary("A", 1, "1:30.000", 95.0, 0),
                summary("B", 2, "1:31.500", 85.0, 2),
            ],
        }
    }

    fn standing(name: &str, position: u32, best_lap_time: f64) -> Standing {
        Standing {
            name: name.to_owned(),
            position,
            best_lap_time: Some(best_lap_time),
            overtakes: 0,
            battery_percent: 50.0,
        }
    }

    fn result() -> RaceResult {
        RaceResult {
            race_id: "r1".to_owned(),
            total_laps: 3,
            laps_completed: 3,
            time_elapsed: "00:04:33".to_owned(),
            winner: Some("A".to_owned()),
            standings: vec![
                standing("A", 1, 90.0),
                standing("B", 2, 91.5),
                standing("C", 3, 92.0),
                standing("D", 4, 91.0),
            ],
            fastest_lap_time: Some(90.0),
            lap_history: Vec::new(),
        }
    }

    fn wager(kind: WagerKind, driver: &str, stake: u64, multiplier: f64) -> Wager {
        Wager {
            id: format!("{}-{}", kind, driver),
            user_id: "u1".to_owned(),
            kind,
            target_driver: driver.to_owned(),
            stake_amount: stake,
            multiplier,
            status: WagerStatus::Pending,
            points_delta: 0,
            target_lap: if kind.is_next_lap() { Some(4) } else { None },
            created_at: Utc::now(),
        }
    }

    async fn store_wager(store: &InMemoryStore, wager: &Wager) -> String {
        let path = format!("{}/{}", wager_collection_path("r1", wager.kind), wager.id);
        store
            .write_document(&path, serde_json::to_value(wager).unwrap(), false)
            .await
            .unwrap();
        path
    }

    async fn points(store: &InMemoryStore, user_id: &str) -> i64 {
        store.read_document(&user_path(user_id)).await.unwrap().unwrap()["points"]
            .as_i64()
            .unwrap()
    }

    #[test]
    fn fastest_lap_wager() {
        let res = result();
        let on_a = wager(WagerKind::FastestLap, "A", 100, 5.0);
        let on_b = wager(WagerKind::FastestLap, "B", 100, 5.0);
        assert!(evaluate_race(&on_a, &res).unwrap());
        assert!(!evaluate_race(&on_b, &res).unwrap());
        assert_eq!(points_delta(100, 5.0, true), 500);
        assert_eq!(points_delta(100, 5.0, false), 0);

        let snap = snapshot();
        let next_a = wager(WagerKind::NextLapFastestLap, "A", 100, 5.0);
        let next_b = wager(WagerKind::NextLapFastestLap, "B", 100, 5.0);
        assert!(evaluate_next_lap(&next_a, &snap).unwrap());
        assert!(!evaluate_next_lap(&next_b, &snap).unwrap());
    }

    #[test]
    fn podium_and_top_five_wagers() {
        let res = result();
        assert!(evaluate_race(&wager(WagerKind::PodiumFinish, "C", 50, 3.0), &res).unwrap());
        assert!(!evaluate_race(&wager(WagerKind::PodiumFinish, "D", 50, 3.0), &res).unwrap());
        assert!(evaluate_race(&wager(WagerKind::TopFive, "D", 50, 3.0), &res).unwrap());
        assert!(evaluate_race(&wager(WagerKind::Winner, "A", 50, 3.0), &res).unwrap());
        assert!(!evaluate_race(&wager(WagerKind::Winner, "B", 50, 3.0), &res).unwrap());
        assert_eq!(points_delta(50, 3.0, true), 150);
    }

    #[test]
    fn next_lap_wagers() {
        let snap = snapshot();
        assert!(evaluate_next_lap(&wager(WagerKind::NextLapEnergyEfficiency, "A", 20, 3.0), &snap).unwrap());
        assert!(!evaluate_next_lap(&wager(WagerKind::NextLapEnergyEfficiency, "B", 20, 3.0), &snap).unwrap());
        assert!(!evaluate_next_lap(&wager(WagerKind::NextLapOvertakes, "A", 20, 4.0), &snap).unwrap());
        assert!(evaluate_next_lap(&wager(WagerKind::NextLapOvertakes, "B", 20, 4.0), &snap).unwrap());

        assert!(matches!(
            evaluate_next_lap(&wager(WagerKind::NextLapOvertakes, "Z", 20, 4.0), &snap),
            Err(SimError::Validation(_))
        ));
        assert!(evaluate_next_lap(&wager(WagerKind::Winner, "A", 20, 4.0), &snap).is_err());
    }

    #[test]
    fn balance_never_drops_below_zero() {
        assert_eq!(floored_balance(10, -50), 0);
        assert_eq!(floored_balance(10, 60), 70);
        assert_eq!(floored_balance(i64::MAX, 1), i64::MAX);
    }

    #[tokio::test]
    async fn next_lap_settlement_credits_winners_once() {
        let store = InMemoryStore::new();
        store
            .write_document("users/u1", json!({ "points": 100 }), false)
            .await
            .unwrap();
        let won = store_wager(&store, &wager(WagerKind::NextLapEnergyEfficiency, "A", 20, 3.0)).await;
        let lost = store_wager(&store, &wager(WagerKind::NextLapEnergyEfficiency, "B", 20, 3.0)).await;

        let report = resolve_next_lap_wagers(&store, "r1", 4, &snapshot()).await.unwrap();
        assert_eq!(report.won, 1);
        assert_eq!(report.lost, 1);
        assert_eq!(report.points_paid, 60);
        assert_eq!(points(&store, "u1").await, 160);

        let won_doc = store.read_document(&won).await.unwrap().unwrap();
        assert_eq!(won_doc["status"], "won");
        assert_eq!(won_doc["pointsDelta"], 60);
        let lost_doc = store.read_document(&lost).await.unwrap().unwrap();
        assert_eq!(lost_doc["status"], "lost");
        assert_eq!(lost_doc["pointsDelta"], 0);

        // second run is a no-op
        let report = resolve_next_lap_wagers(&store, "r1", 4, &snapshot()).await.unwrap();
        assert_eq!(report, SettlementReport::default());
        assert_eq!(points(&store, "u1").await, 160);
    }

    #[tokio::test]
    async fn next_lap_wagers_of_other_laps_stay_pending() {
        let store = InMemoryStore::new();
        let mut later = wager(WagerKind::NextLapOvertakes, "B", 20, 4.0);
        later.target_lap = Some(5);
        let path = store_wager(&store, &later).await;

        let report = resolve_next_lap_wagers(&store, "r1", 4, &snapshot()).await.unwrap();
        assert_eq!(report.settled(), 0);
        let doc = store.read_document(&path).await.unwrap().unwrap();
        assert_eq!(doc["status"], "pending");
    }

    #[tokio::test]
    async fn overdue_next_lap_wagers_use_their_own_lap() {
        let store = InMemoryStore::new();
        store
            .write_document("users/u1", json!({ "points": 0 }), false)
            .await
            .unwrap();
        // lap 4: B overtook, lap 5: nobody did
        let mut lap_5 = snapshot();
        lap_5.lap_number = 5;
        lap_5.drivers[1].overtakes = 0;
        let history = vec![snapshot(), lap_5];

        let overdue = store_wager(&store, &wager(WagerKind::NextLapOvertakes, "B", 20, 4.0)).await;
        let mut current = wager(WagerKind::NextLapEnergyEfficiency, "A", 20, 4.0);
        current.target_lap = Some(5);
        let current = store_wager(&store, &current).await;

        let report = resolve_overdue_next_lap_wagers(&store, "r1", 5, &history).await.unwrap();
        assert_eq!(report.won, 1);
        assert_eq!(report.settled(), 1);
        assert_eq!(points(&store, "u1").await, 80);
        assert_eq!(store.read_document(&overdue).await.unwrap().unwrap()["status"], "won");
        assert_eq!(store.read_document(&current).await.unwrap().unwrap()["status"], "pending");

        let report = resolve_overdue_next_lap_wagers(&store, "r1", 5, &history).await.unwrap();
        assert_eq!(report, SettlementReport::default());
    }

    #[tokio::test]
    async fn out_of_range_wagers_lose_with_a_reason() {
        let store = InMemoryStore::new();
        store
            .write_document("users/u1", json!({ "points": 100 }), false)
            .await
            .unwrap();
        let mut huge = wager(WagerKind::Winner, "A", 100, 250.0);
        huge.id = "huge".to_owned();
        let huge = store_wager(&store, &huge).await;
        let mut tiny = wager(WagerKind::Winner, "A", 100, 1.0);
        tiny.id = "tiny".to_owned();
        let tiny = store_wager(&store, &tiny).await;
        let mut free = wager(WagerKind::Winner, "A", 0, 2.0);
        free.id = "free".to_owned();
        let free = store_wager(&store, &free).await;
        let mut edge = wager(WagerKind::Winner, "A", 10, 10.0);
        edge.id = "edge".to_owned();
        store_wager(&store, &edge).await;

        let report = resolve_race_wagers(&store, "r1", &result()).await.unwrap();
        assert_eq!(report.won, 1);
        assert_eq!(report.lost, 3);
        assert_eq!(points(&store, "u1").await, 200);

        for path in [huge, tiny, free] {
            let doc = store.read_document(&path).await.unwrap().unwrap();
            assert_eq!(doc["status"], "lost");
            assert_eq!(doc["pointsDelta"], 0);
            assert!(doc["reason"].as_str().unwrap().contains("out of range"));
        }
    }

    #[tokio::test]
    async fn malformed_wagers_lose_without_blocking_others() {
        let store = InMemoryStore::new();
        store
            .write_document(
                "races/r1/userBets/broken",
                json!({ "userId": "u1", "kind": "photoFinish", "targetDriver": "A", "status": "pending" }),
                false,
            )
            .await
            .unwrap();
        store_wager(&store, &wager(WagerKind::Winner, "A", 10, 2.5)).await;
        store_wager(&store, &wager(WagerKind::Winner, "Z", 10, 2.5)).await;

        let report = resolve_race_wagers(&store, "r1", &result()).await.unwrap();
        assert_eq!(report.won, 1);
        assert_eq!(report.lost, 2);
        assert_eq!(points(&store, "u1").await, 25);

        let broken = store.read_document("races/r1/userBets/broken").await.unwrap().unwrap();
        assert_eq!(broken["status"], "lost");
        assert!(broken["reason"].as_str().unwrap().contains("malformed"));

        let race = store.read_document("races/r1").await.unwrap().unwrap();
        assert_eq!(race["status"], "finished");
        assert_eq!(race["winner"], "A");
    }

    #[tokio::test]
    async fn transient_conflicts_are_retried() {
        let store = InMemoryStore::new();
        store
            .write_document("users/u1", json!({ "points": 0 }), false)
            .await
            .unwrap();
        store_wager(&store, &wager(WagerKind::PodiumFinish, "C", 50, 3.0)).await;

        store.inject_failures(2);
        let report = resolve_race_wagers(&store, "r1", &result()).await.unwrap();
        assert_eq!(report.won, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(points(&store, "u1").await, 150);
    }

    #[tokio::test]
    async fn exhausted_retries_only_affect_one_wager() {
        let store = InMemoryStore::new();
        let first = store_wager(&store, &wager(WagerKind::TopFive, "A", 10, 2.0)).await;
        let second = store_wager(&store, &wager(WagerKind::Winner, "A", 10, 2.0)).await;

        store.inject_failures(MAX_ATTEMPTS);
        let report = resolve_race_wagers(&store, "r1", &result()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.won, 1);

        // wagers are processed in path order, the first one absorbs all injected failures
        let first_doc = store.read_document(&first).await.unwrap().unwrap();
        let second_doc = store.read_document(&second).await.unwrap().unwrap();
        assert_eq!(first_doc["status"], "pending");
        assert_eq!(second_doc["status"], "won");
        assert_eq!(points(&store, "u1").await, 20);
    }
}
