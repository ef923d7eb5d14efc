//! Load generator for the snake game WebSocket server.
//!
//! A [`schedule::RampSchedule`] decides when virtual players appear, each
//! [`player::VirtualPlayer`] speaks the game protocol over its own
//! connection, and every liveness check lands in a shared
//! [`assertions::AssertionSink`] that the final report is built from.
pub mod assertions;
pub mod config;
pub mod engine;
pub mod identity;
pub mod player;
pub mod protocol;
pub mod report;
pub mod schedule;
pub mod trace;
pub mod transport;
pub mod validation;

pub use config::{Cli, LoadTestConfig};
pub use report::LoadTestReport;

pub async fn run_load_test(config: LoadTestConfig) -> anyhow::Result<LoadTestReport> {
    engine::run(config).await
}
