use super::ConfigError;
use crate::shared::ids::ChannelId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_step_duration_ms")]
    pub step_duration_ms: u64,
    #[serde(default = "default_commands_check_interval_ms")]
    pub commands_check_interval_ms: u64,
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    #[serde(default = "default_stability_checks")]
    pub stability_checks: u32,
    #[serde(default = "default_stability_delay_ms")]
    pub stability_delay_ms: u64,
    #[serde(default = "default_max_read_attempts")]
    pub max_read_attempts: u32,
    #[serde(default)]
    pub channels: Vec<ChannelId>,
}

fn default_min_poll_interval_ms() -> u64 {
    100
}

fn default_max_poll_interval_ms() -> u64 {
    2000
}

fn default_step_duration_ms() -> u64 {
    2000
}

fn default_commands_check_interval_ms() -> u64 {
    2000
}

fn default_max_history_size() -> usize {
    100
}

fn default_stability_checks() -> u32 {
    3
}

fn default_stability_delay_ms() -> u64 {
    10
}

fn default_max_read_attempts() -> u32 {
    10
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            min_poll_interval_ms: default_min_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            step_duration_ms: default_step_duration_ms(),
            commands_check_interval_ms: default_commands_check_interval_ms(),
            max_history_size: default_max_history_size(),
            stability_checks: default_stability_checks(),
            stability_delay_ms: default_stability_delay_ms(),
            max_read_attempts: default_max_read_attempts(),
            channels: Vec::new(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.min_poll_interval_ms == 0 {
            problems.push("min_poll_interval_ms must be greater than zero".to_string());
        }
        if self.max_poll_interval_ms < self.min_poll_interval_ms {
            problems.push(
                "max_poll_interval_ms must be at least min_poll_interval_ms".to_string(),
            );
        }
        if self.step_duration_ms == 0 {
            problems.push("step_duration_ms must be greater than zero".to_string());
        }
        if self.stability_checks == 0 {
            problems.push("stability_checks must be greater than zero".to_string());
        }
        if self.max_read_attempts <= self.stability_checks {
            problems.push(
                "max_read_attempts must be greater than stability_checks".to_string(),
            );
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = BusConfig::default();
        assert_eq!(config.min_poll_interval_ms, 100);
        assert_eq!(config.max_poll_interval_ms, 2000);
        assert_eq!(config.step_duration_ms, 2000);
        assert_eq!(config.commands_check_interval_ms, 2000);
        assert_eq!(config.max_history_size, 100);
        assert_eq!(config.stability_checks, 3);
        assert_eq!(config.stability_delay_ms, 10);
        assert_eq!(config.max_read_attempts, 10);
        assert!(config.channels.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: BusConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config, BusConfig::default());
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let config: BusConfig = serde_yaml::from_str(
            r#"
max_history_size: 10
channels:
  - sandbox
"#,
        )
        .expect("parse");
        assert_eq!(config.max_history_size, 10);
        assert_eq!(config.min_poll_interval_ms, 100);
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].as_str(), "sandbox");
    }

    #[test]
    fn validate_rejects_inverted_poll_bounds() {
        let config = BusConfig {
            max_poll_interval_ms: 50,
            ..BusConfig::default()
        };
        let err = config.validate().expect_err("must fail");
        assert!(err.to_string().contains("max_poll_interval_ms"));
    }

    #[test]
    fn validate_rejects_attempt_budget_below_stability_checks() {
        let config = BusConfig {
            max_read_attempts: 3,
            ..BusConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
