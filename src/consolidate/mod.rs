pub mod config;
pub mod engine;

pub use config::ConsolidateConfig;
pub use engine::{ConsolidationEngine, SweepOutcome};
