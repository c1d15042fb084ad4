pub mod config;

pub use config::{AttackType, ConfigError, SimConfig};
