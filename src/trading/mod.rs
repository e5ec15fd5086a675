//! Trading engine: sizing math, eligibility, per-user sequencing, batch fan-out.

pub mod calculator;
mod config;
mod eligibility;
mod orchestrator;
mod sequencer;

pub use config::{ExecutionMode, ExecutorConfig};
pub use orchestrator::BatchOrchestrator;
