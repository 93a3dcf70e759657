pub mod config;
pub mod engine;

pub use config::{ConfigError, EngineConfig, SeedData};
pub use engine::MonitorEngine;
