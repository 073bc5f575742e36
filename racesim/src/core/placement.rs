use crate::core::odds::{calc_multiplier, MAX_MULTIPLIER, MIN_MULTIPLIER};
use crate::core::race::Race;
use crate::core::wager::{
    user_path, wager_collection_path, Wager, WagerKind, WagerRequest, WagerStatus,
};
use crate::error::SimError;
use crate::interfaces::store::{transaction_with_retry, DocumentStore, StoreError, Transaction};
use chrono::Utc;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Range of the random factor applied to the current multiplier when a wager is quoted
pub const QUOTE_FACTOR_RANGE: [f64; 2] = [0.8, 1.2];

/// quote_multiplier returns the multiplier a new wager on `driver_name` receives: the current
/// multiplier of the driver times a random factor, rounded to 2 decimals.
pub fn quote_multiplier<R: Rng + ?Sized>(
    race: &Race,
    kind: WagerKind,
    driver_name: &str,
    rng: &mut R,
) -> Result<f64, SimError> {
    let driver = race
        .driver(driver_name)
        .ok_or_else(|| SimError::validation(format!("unknown driver {}", driver_name)))?;

    let factor = Uniform::new_inclusive(QUOTE_FACTOR_RANGE[0], QUOTE_FACTOR_RANGE[1]).sample(rng);
    let quoted = (driver.bet_multipliers.get(kind) * factor * 100.0).round() / 100.0;
    Ok(calc_multiplier(quoted))
}

/// build_wager validates a request against the race and creates the pending wager with its fixed
/// multiplier. Next-lap wagers target the lap in progress.
pub fn build_wager<R: Rng + ?Sized>(
    race: &Race,
    request: &WagerRequest,
    rng: &mut R,
) -> Result<Wager, SimError> {
    if request.user_id.is_empty() {
        return Err(SimError::validation("wager without user"));
    }
    if request.stake_amount == 0 {
        return Err(SimError::validation("stake must be positive"));
    }
    if race.is_finished() {
        return Err(SimError::validation("race is already finished"));
    }

    let multiplier = quote_multiplier(race, request.kind, &request.target_driver, rng)?;

    Ok(Wager {
        id: Uuid::new_v4().to_string(),
        user_id: request.user_id.to_owned(),
        kind: request.kind,
        target_driver: request.target_driver.to_owned(),
        stake_amount: request.stake_amount,
        multiplier,
        status: WagerStatus::Pending,
        points_delta: 0,
        target_lap: if request.kind.is_next_lap() {
            Some(race.current_lap())
        } else {
            None
        },
        created_at: Utc::now(),
    })
}

/// place_wager deducts the stake from the user's balance and stores the wager in one transaction.
/// The betting trend of the target driver is incremented by the stake.
pub async fn place_wager(
    store: &dyn DocumentStore,
    race_id: &str,
    wager: &Wager,
) -> Result<(), SimError> {
    if !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&wager.multiplier) {
        return Err(SimError::validation(format!(
            "multiplier {} out of range",
            wager.multiplier
        )));
    }

    let wager_path = format!("{}/{}", wager_collection_path(race_id, wager.kind), wager.id);
    let user = user_path(&wager.user_id);
    let trend = format!("races/{}/bettingTrends/{}", race_id, wager.target_driver);
    let wager_doc = serde_json::to_value(wager).map_err(StoreError::from)?;
    let stake = match i64::try_from(wager.stake_amount) {
        Ok(stake) if stake > 0 => stake,
        _ => {
            return Err(SimError::validation(format!(
                "stake {} out of range",
                wager.stake_amount
            )))
        }
    };

    let mut rejection: Option<SimError> = None;
    transaction_with_retry(store, "placing wager", &mut |tx: &mut Transaction<'_>| -> Result<(), StoreError> {
        rejection = None;
        match tx.get(&user).and_then(|doc| doc.get("points").and_then(Value::as_i64)) {
            None => {
                rejection = Some(SimError::validation(format!(
                    "unknown user {}",
                    wager.user_id
                )));
            }
            Some(points) if points < stake => {
                rejection = Some(SimError::validation(format!(
                    "insufficient points: {} available, {} staked",
                    points, stake
                )));
            }
            Some(points) => {
                tx.set(user.to_owned(), json!({ "points": points - stake }), true);
                tx.set(wager_path.to_owned(), wager_doc.to_owned(), false);
                tx.increment(trend.to_owned(), "bets", stake as f64);
            }
        }
        Ok(())
    })
    .await?;

    if let Some(err) = rejection {
        return Err(err);
    }

    info!(
        "User {} placed {} wager on {} ({} points at {:.2})",
        wager.user_id, wager.kind, wager.target_driver, wager.stake_amount, wager.multiplier
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::DriverPars;
    use crate::core::race::{RacePars, SimConstants};
    use crate::interfaces::memory_store::InMemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn race() -> Race {
        let pars = RacePars {
            total_laps: 10,
            drivers: vec![DriverPars::new("A"), DriverPars::new("B")],
            ..RacePars::default()
        };
        Race::new(&pars, &SimConstants::default()).unwrap()
    }

    fn request(kind: WagerKind, driver: &str, stake: u64) -> WagerRequest {
        WagerRequest {
            user_id: "u1".to_owned(),
            kind,
            target_driver: driver.to_owned(),
            stake_amount: stake,
        }
    }

    #[test]
    fn quotes_stay_around_current_multiplier() {
        let race = race();
        let mut rng = StdRng::seed_from_u64(17);
        let base = race.driver("B").unwrap().bet_multipliers.winner;

        for _ in 0..1_000 {
            let quote = quote_multiplier(&race, WagerKind::Winner, "B", &mut rng).unwrap();
            assert!(quote >= (base * 0.8 * 100.0).round() / 100.0 - 1e-9);
            assert!(quote <= calc_multiplier((base * 1.2 * 100.0).round() / 100.0) + 1e-9);
            assert!((quote * 100.0 - (quote * 100.0).round()).abs() < 1e-6);
        }
        assert!(quote_multiplier(&race, WagerKind::Winner, "Z", &mut rng).is_err());
    }

    #[test]
    fn rejects_invalid_requests() {
        let mut race = race();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(build_wager(&race, &request(WagerKind::Winner, "A", 0), &mut rng).is_err());
        assert!(build_wager(&race, &request(WagerKind::Winner, "Z", 10), &mut rng).is_err());

        let wager = build_wager(&race, &request(WagerKind::NextLapOvertakes, "A", 10), &mut rng).unwrap();
        assert_eq!(wager.target_lap, Some(1));
        assert_eq!(wager.status, WagerStatus::Pending);

        race.resume_from(10, 10, 900.0);
        assert!(build_wager(&race, &request(WagerKind::Winner, "A", 10), &mut rng).is_err());
    }

    #[tokio::test]
    async fn placement_deducts_stake_once() {
        let race = race();
        let mut rng = StdRng::seed_from_u64(3);
        let store = InMemoryStore::new();
        store
            .write_document("users/u1", json!({ "points": 100 }), false)
            .await
            .unwrap();

        let wager = build_wager(&race, &request(WagerKind::NextLapFastestLap, "A", 40), &mut rng).unwrap();
        place_wager(&store, "r1", &wager).await.unwrap();

        let user = store.read_document("users/u1").await.unwrap().unwrap();
        assert_eq!(user["points"], 60);
        let stored = store
            .read_document(&format!("races/r1/nextLapBets/{}", wager.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["status"], "pending");
        assert_eq!(stored["targetLap"], 1);
        let trend = store.read_document("races/r1/bettingTrends/A").await.unwrap().unwrap();
        assert_eq!(trend["bets"], 40);

        // 60 points left, a stake of 80 is rejected without any write
        let wager = build_wager(&race, &request(WagerKind::Winner, "B", 80), &mut rng).unwrap();
        assert!(matches!(
            place_wager(&store, "r1", &wager).await,
            Err(SimError::Validation(_))
        ));
        let user = store.read_document("users/u1").await.unwrap().unwrap();
        assert_eq!(user["points"], 60);
        assert!(store.read_collection("races/r1/userBets").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_stakes_are_rejected() {
        let race = race();
        let mut rng = StdRng::seed_from_u64(5);
        let store = InMemoryStore::new();
        store
            .write_document("users/u1", json!({ "points": 100 }), false)
            .await
            .unwrap();

        for stake in [u64::MAX, i64::MAX as u64 + 1] {
            let wager = build_wager(&race, &request(WagerKind::Winner, "A", stake), &mut rng).unwrap();
            assert!(matches!(
                place_wager(&store, "r1", &wager).await,
                Err(SimError::Validation(_))
            ));
        }
        let user = store.read_document("users/u1").await.unwrap().unwrap();
        assert_eq!(user["points"], 100);
        assert!(store.read_collection("races/r1/userBets").await.unwrap().is_empty());
        assert_eq!(store.read_document("races/r1/bettingTrends/A").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_users_cannot_place_wagers() {
        let race = race();
        let mut rng = StdRng::seed_from_u64(4);
        let store = InMemoryStore::new();
        let mut req = request(WagerKind::TopFive, "A", 5);
        req.user_id = "ghost".to_owned();
        let wager = build_wager(&race, &req, &mut rng).unwrap();
        assert!(place_wager(&store, "r1", &wager).await.is_err());
    }
}
