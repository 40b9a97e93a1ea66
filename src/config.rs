//! Run parameters read from a TOML profile.
//!
//! A profile is a flat TOML table with upper-case keys:
//!
//! ```toml
//! NUM_OF_NODES = 600
//! END_BLOCK_HEIGHT = 100
//! CBR_USAGE_RATE = 0.964
//! INTERVAL = 600000
//! AVERAGE_MINING_POWER = 400000
//! STDEV_OF_MINING_POWER = 100000
//! GOSSIP_PROBABILITY = 1.0
//! GOSSIP_PENALTY_RATE = 0.0
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Profile used when none is named.
pub const DEFAULT_PROFILE: &str = "initial";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read profile {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{key} {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Parameters of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SimulationConfig {
    pub num_of_nodes: usize,
    /// The run ends once minting starts above this height.
    pub end_block_height: u64,
    /// Share of nodes using compact block relay.
    pub cbr_usage_rate: f64,
    /// Target block interval (ms).
    pub interval: u64,
    pub average_mining_power: u64,
    pub stdev_of_mining_power: u64,
    /// Probability that an inv is sent without gossip penalty.
    pub gossip_probability: f64,
    /// Relative latency increase of a penalised inv.
    pub gossip_penalty_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            num_of_nodes: 600,
            end_block_height: 100,
            cbr_usage_rate: 0.964,
            interval: 600_000,
            average_mining_power: 400_000,
            stdev_of_mining_power: 100_000,
            gossip_probability: 1.0,
            gossip_penalty_rate: 0.0,
        }
    }
}

impl SimulationConfig {
    /// Parses and validates a profile.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(contents)?;
        config.validate()?;

        Ok(config)
    }

    /// Reads and validates the profile at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| {
            ConfigError::Io { path: path.to_path_buf(), source }
        })?;

        Self::from_toml_str(&contents)
    }

    /// Reads the profile `<dir>/<name>.toml`.
    pub fn profile(dir: impl AsRef<Path>, name: &str) -> Result<Self, ConfigError> {
        Self::load(dir.as_ref().join(format!("{name}.toml")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::*;

        let invalid = |key, reason: &str| {
            Err(Invalid { key, reason: reason.to_string() })
        };
        let is_rate = |x: f64| (0.0..=1.0).contains(&x);

        if self.num_of_nodes == 0 {
            return invalid("NUM_OF_NODES", "must be at least 1");
        }
        if self.end_block_height == 0 {
            return invalid("END_BLOCK_HEIGHT", "must be at least 1");
        }
        if self.average_mining_power == 0 {
            return invalid("AVERAGE_MINING_POWER", "must be at least 1");
        }
        if self.interval == 0 {
            return invalid("INTERVAL", "must be positive");
        }
        if !is_rate(self.cbr_usage_rate) {
            return invalid("CBR_USAGE_RATE", "must be in the range 0.0..=1.0");
        }
        if !is_rate(self.gossip_probability) {
            return invalid("GOSSIP_PROBABILITY", "must be in the range 0.0..=1.0");
        }
        if !(self.gossip_penalty_rate >= 0.0) {
            return invalid("GOSSIP_PENALTY_RATE", "must not be negative");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
        NUM_OF_NODES = 5
        END_BLOCK_HEIGHT = 3
        CBR_USAGE_RATE = 1.0
        INTERVAL = 600000
        AVERAGE_MINING_POWER = 400000
        STDEV_OF_MINING_POWER = 100000
        GOSSIP_PROBABILITY = 1.0
        GOSSIP_PENALTY_RATE = 0.0
    "#;

    #[test]
    fn parses_upper_case_keys() {
        let config = SimulationConfig::from_toml_str(PROFILE).unwrap();

        assert_eq!(config.num_of_nodes, 5);
        assert_eq!(config.end_block_height, 3);
        assert_eq!(config.interval, 600_000);
    }

    #[test]
    fn rejects_bad_values() {
        let bad = PROFILE.replace("NUM_OF_NODES = 5", "NUM_OF_NODES = 0");
        assert!(matches!(
            SimulationConfig::from_toml_str(&bad),
            Err(ConfigError::Invalid { key: "NUM_OF_NODES", .. })
        ));

        let bad = PROFILE.replace("CBR_USAGE_RATE = 1.0", "CBR_USAGE_RATE = 1.5");
        assert!(matches!(
            SimulationConfig::from_toml_str(&bad),
            Err(ConfigError::Invalid { key: "CBR_USAGE_RATE", .. })
        ));

        let bad = PROFILE.replace("END_BLOCK_HEIGHT = 3", "END_BLOCK_HEIGHT = 0");
        assert!(matches!(
            SimulationConfig::from_toml_str(&bad),
            Err(ConfigError::Invalid { key: "END_BLOCK_HEIGHT", .. })
        ));

        let bad = PROFILE
            .replace("AVERAGE_MINING_POWER = 400000", "AVERAGE_MINING_POWER = 0");
        assert!(matches!(
            SimulationConfig::from_toml_str(&bad),
            Err(ConfigError::Invalid { key: "AVERAGE_MINING_POWER", .. })
        ));

        let missing = PROFILE.replace("INTERVAL = 600000", "");
        assert!(matches!(
            SimulationConfig::from_toml_str(&missing),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_named_profile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("small.toml"), PROFILE).unwrap();

        let config = SimulationConfig::profile(dir.path(), "small").unwrap();
        assert_eq!(config.num_of_nodes, 5);
        assert!(matches!(
            SimulationConfig::profile(dir.path(), "missing"),
            Err(ConfigError::Io { .. })
        ));
    }
}
