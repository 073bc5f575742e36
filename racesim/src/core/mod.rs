pub mod driver;
pub mod handle_race;
pub mod odds;
pub mod placement;
pub mod race;
pub mod settlement;
pub mod wager;
