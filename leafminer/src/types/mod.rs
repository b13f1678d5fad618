//! Core types for leafminer.

mod difficulty;
mod hash_rate;

pub use difficulty::Difficulty;
pub use hash_rate::HashRate;
