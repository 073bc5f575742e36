pub mod memory_store;
pub mod race_state;
pub mod store;
