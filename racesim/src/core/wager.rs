use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection (below the race document) holding wagers resolved at race completion.
pub const RACE_WAGERS: &str = "userBets";
/// Collection (below the race document) holding next-lap wagers.
pub const NEXT_LAP_WAGERS: &str = "nextLapBets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WagerKind {
    Winner,
    FastestLap,
    PodiumFinish,
    TopFive,
    NextLapFastestLap,
    NextLapOvertakes,
    NextLapEnergyEfficiency,
}

impl WagerKind {
    pub const ALL: [WagerKind; 7] = [
        WagerKind::Winner,
        WagerKind::FastestLap,
        WagerKind::PodiumFinish,
        WagerKind::TopFive,
        WagerKind::NextLapFastestLap,
        WagerKind::NextLapOvertakes,
        WagerKind::NextLapEnergyEfficiency,
    ];

    /// is_next_lap returns true for wagers that resolve at the end of the lap they were placed in.
    pub fn is_next_lap(self) -> bool {
        matches!(
            self,
            WagerKind::NextLapFastestLap
                | WagerKind::NextLapOvertakes
                | WagerKind::NextLapEnergyEfficiency
        )
    }

    /// collection returns the wager collection this kind is stored in.
    pub fn collection(self) -> &'static str {
        if self.is_next_lap() {
            NEXT_LAP_WAGERS
        } else {
            RACE_WAGERS
        }
    }
}

impl fmt::Display for WagerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

/// A user's stake on a race outcome. The multiplier is fixed when the wager is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wager {
    pub id: String,
    pub user_id: String,
    pub kind: WagerKind,
    pub target_driver: String,
    pub stake_amount: u64,
    pub multiplier: f64,
    pub status: WagerStatus,
    #[serde(default)]
    pub points_delta: i64,
    /// Lap in progress when a next-lap wager was placed, None for race wagers
    #[serde(default)]
    pub target_lap: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Request of a user to place a wager, see `core::placement`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerRequest {
    pub user_id: String,
    pub kind: WagerKind,
    pub target_driver: String,
    pub stake_amount: u64,
}

/// Points balance of a user, stored at `users/{user_id}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub user_id: String,
    pub points: i64,
}

pub fn user_path(user_id: &str) -> String {
    format!("users/{}", user_id)
}

pub fn wager_collection_path(race_id: &str, kind: WagerKind) -> String {
    format!("races/{}/{}", race_id, kind.collection())
}
