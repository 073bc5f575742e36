pub mod general;
pub mod time_codec;
