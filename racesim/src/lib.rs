pub mod core;
pub mod error;
pub mod interfaces;
pub mod post;
pub mod pre;

pub use crate::error::SimError;
