#[macro_use]
pub mod status;

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod gateway;
pub mod ledger;
pub mod messaging;
pub mod milestone;
pub mod project;
pub mod prom_metrics;
pub mod proposal;
pub mod scheduler;
pub mod withdrawal;

pub use engine::{Actor, Engine, Role};
pub use error::{EngineError, EngineResult};
