use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use thiserror::Error;

/// Mining-attack selector for node 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    #[default]
    None,
    Selfish,
    Stubborn,
}

/// Parameter errors surfaced at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("num_nodes must be at least 2, got {0}")]
    TooFewNodes(u64),
    #[error("{name} must be a fraction in [0, 1], got {value}")]
    FractionOutOfRange { name: &'static str, value: f64 },
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("max_block_length must be at least 1")]
    EmptyBlockLength,
    #[error("adversary hash fraction {0} leaves no hash power for honest nodes")]
    AdversaryHashTooLarge(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of peer nodes, adversary included.
    pub num_nodes: u64,
    /// Fraction of bandwidth-slow nodes.
    pub slow_nodes: f64,
    /// Fraction of low-hash-power nodes.
    pub low_hash: f64,
    /// Mean transaction inter-arrival time (seconds).
    pub inter_arrival_time: f64,
    /// Mean block inter-arrival time (seconds).
    pub inter_arrival_time_block: f64,
    /// Simulated horizon (seconds).
    pub simulation_time: f64,
    /// Max transactions per block, coinbase included.
    pub max_block_length: usize,
    pub attack_type: AttackType,
    /// Adversary's share of total hash power.
    pub adv_hash: f64,
    /// Fraction of nodes the adversary connects to.
    pub adv_connected: f64,
    /// PRNG seed; a fixed seed reproduces the run exactly.
    pub seed: u64,
    pub results_dir: String,
}

impl SimConfig {
    fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        PathBuf::from(expanded.into_owned())
    }

    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().expect("Cannot find home directory");
        home.join(".minesim/config.json")
    }

    /// Results directory with tilde expansion applied.
    pub fn results_dir_resolved(&self) -> PathBuf {
        Self::expand_path(&self.results_dir)
    }

    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &PathBuf) -> Self {
        if !path.exists() {
            println!(
                "Configuration file not found. Creating default configuration.: {:?}",
                path
            );
            let cfg = Self::default();
            cfg.save_to(path);
            return cfg;
        }
        let data = fs::read_to_string(path).expect("Failed to read configuration file");
        serde_json::from_str(&data).expect("Configuration file format error")
    }

    pub fn save(&self) {
        self.save_to(&Self::default_path());
    }

    pub fn save_to(&self, path: &PathBuf) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let json = serde_json::to_string_pretty(self).unwrap();
        fs::write(path, json).unwrap();
    }

    pub fn view(&self) {
        println!("{}", serde_json::to_string_pretty(self).unwrap());
    }

    /// Reject parameter combinations the simulator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes < 2 {
            return Err(ConfigError::TooFewNodes(self.num_nodes));
        }
        for (name, value) in [
            ("slow_nodes", self.slow_nodes),
            ("low_hash", self.low_hash),
            ("adv_hash", self.adv_hash),
            ("adv_connected", self.adv_connected),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::FractionOutOfRange { name, value });
            }
        }
        for (name, value) in [
            ("inter_arrival_time", self.inter_arrival_time),
            ("inter_arrival_time_block", self.inter_arrival_time_block),
            ("simulation_time", self.simulation_time),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if self.max_block_length == 0 {
            return Err(ConfigError::EmptyBlockLength);
        }
        if self.attack_type != AttackType::None && self.adv_hash >= 1.0 {
            return Err(ConfigError::AdversaryHashTooLarge(self.adv_hash));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_nodes: 20,
            slow_nodes: 0.3,
            low_hash: 0.3,
            inter_arrival_time: 2.0,
            inter_arrival_time_block: 10.0,
            simulation_time: 200.0,
            max_block_length: 10,
            attack_type: AttackType::None,
            adv_hash: 0.0,
            adv_connected: 0.0,
            seed: 42,
            results_dir: "./results".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_single_node_network() {
        let cfg = SimConfig {
            num_nodes: 1,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::TooFewNodes(1))));
    }

    #[test]
    fn rejects_fraction_out_of_range() {
        let cfg = SimConfig {
            slow_nodes: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::FractionOutOfRange {
                name: "slow_nodes",
                ..
            })
        ));

        let cfg = SimConfig {
            adv_hash: -0.1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_times() {
        let cfg = SimConfig {
            inter_arrival_time_block: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive {
                name: "inter_arrival_time_block",
                ..
            })
        ));
    }

    #[test]
    fn rejects_adversary_holding_all_hash_power() {
        let cfg = SimConfig {
            attack_type: AttackType::Selfish,
            adv_hash: 1.0,
            adv_connected: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::AdversaryHashTooLarge(_))
        ));
    }

    #[test]
    fn attack_type_round_trips_through_json() {
        let json = serde_json::to_string(&AttackType::Stubborn).unwrap();
        assert_eq!(json, "\"stubborn\"");
        let back: AttackType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AttackType::Stubborn);
    }
}
