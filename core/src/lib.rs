pub mod cli;
pub mod collections;
pub mod config;
pub mod error;
pub mod events;
pub mod ndjson;
pub mod report;
pub mod services;
pub mod sweeper;
pub mod tasks;

pub use error::{ErrorKind, SweepError, SweepResult};
pub use services::storage::MemoryStore;
pub use sweeper::{RetentionSweeper, Statistics, SweeperState};
pub use tasks::TaskKind;
