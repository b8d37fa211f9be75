//! Derived reach classifications: difficulty grade parts and gauge stage.

pub mod difficulty;
pub mod gauge_stage;

pub use difficulty::{Difficulty, parse_difficulty};
pub use gauge_stage::{GaugeStage, classify_gauge_stage};
