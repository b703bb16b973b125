//! Process-level experiment defaults.
//!
//! Read from the environment once at startup and snapshotted into every
//! session at creation time, so later changes never affect sessions in
//! progress.

use serde::{Deserialize, Serialize};

use crate::domain::{ChatFrequency, ConfigOverrides, GameConfig, GameMode, Payoffs};
use crate::error::AppError;
use crate::errors::GameError;

pub const MIN_ROUNDS: u32 = 1;
pub const MAX_ROUNDS: u32 = 20;
pub const MIN_DECISION_TIMEOUT_MS: u64 = 10_000;
pub const MAX_DECISION_TIMEOUT_MS: u64 = 120_000;
pub const MAX_CHAT_DURATION_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpponentKind {
    Ai,
    Human,
}

/// Experiment-wide defaults applied to new sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentConfig {
    pub opponent: OpponentKind,
    pub mode: GameMode,
    pub total_rounds: u32,
    pub decision_timeout_ms: u64,
    pub chat_enabled: bool,
    pub chat_duration_secs: u64,
    pub chat_frequency: ChatFrequency,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            opponent: OpponentKind::Ai,
            mode: GameMode::Simultaneous,
            total_rounds: 5,
            decision_timeout_ms: 30_000,
            chat_enabled: false,
            chat_duration_secs: 30,
            chat_frequency: ChatFrequency::EveryRound,
        }
    }
}

impl ExperimentConfig {
    /// Load from `EXPERIMENT_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let opponent = match env_lower("EXPERIMENT_OPPONENT") {
            None => defaults.opponent,
            Some(value) => match value.as_str() {
                "ai" => OpponentKind::Ai,
                "human" => OpponentKind::Human,
                other => {
                    return Err(AppError::config(format!(
                        "EXPERIMENT_OPPONENT must be 'ai' or 'human', got '{other}'"
                    )))
                }
            },
        };

        let mode = match env_lower("EXPERIMENT_MODE") {
            None => defaults.mode,
            Some(value) => match value.as_str() {
                "simultaneous" => GameMode::Simultaneous,
                "sequential" => GameMode::Sequential,
                other => {
                    return Err(AppError::config(format!(
                        "EXPERIMENT_MODE must be 'simultaneous' or 'sequential', got '{other}'"
                    )))
                }
            },
        };

        let chat_frequency = match env_lower("EXPERIMENT_CHAT_FREQUENCY") {
            None => defaults.chat_frequency,
            Some(value) => match value.as_str() {
                "once" => ChatFrequency::Once,
                "every-round" => ChatFrequency::EveryRound,
                other => {
                    return Err(AppError::config(format!(
                        "EXPERIMENT_CHAT_FREQUENCY must be 'once' or 'every-round', got '{other}'"
                    )))
                }
            },
        };

        let config = Self {
            opponent,
            mode,
            total_rounds: env_parse("EXPERIMENT_TOTAL_ROUNDS", defaults.total_rounds)?,
            decision_timeout_ms: env_parse(
                "EXPERIMENT_DECISION_TIMEOUT_MS",
                defaults.decision_timeout_ms,
            )?,
            chat_enabled: env_parse("EXPERIMENT_CHAT_ENABLED", defaults.chat_enabled)?,
            chat_duration_secs: env_parse(
                "EXPERIMENT_CHAT_DURATION_SECS",
                defaults.chat_duration_secs,
            )?,
            chat_frequency,
        };

        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&config.total_rounds) {
            return Err(AppError::config(format!(
                "EXPERIMENT_TOTAL_ROUNDS must be within {MIN_ROUNDS}..={MAX_ROUNDS}"
            )));
        }
        if !(MIN_DECISION_TIMEOUT_MS..=MAX_DECISION_TIMEOUT_MS)
            .contains(&config.decision_timeout_ms)
        {
            return Err(AppError::config(format!(
                "EXPERIMENT_DECISION_TIMEOUT_MS must be within \
                 {MIN_DECISION_TIMEOUT_MS}..={MAX_DECISION_TIMEOUT_MS}"
            )));
        }
        if config.chat_duration_secs > MAX_CHAT_DURATION_SECS {
            return Err(AppError::config(format!(
                "EXPERIMENT_CHAT_DURATION_SECS must be at most {MAX_CHAT_DURATION_SECS}"
            )));
        }

        Ok(config)
    }

    /// The per-session config these defaults produce.
    pub fn game_config(&self) -> GameConfig {
        GameConfig {
            payoffs: Payoffs::default(),
            total_rounds: self.total_rounds,
            decision_timeout_ms: self.decision_timeout_ms,
            mode: self.mode,
            chat_enabled: self.chat_enabled,
            chat_duration_secs: self.chat_duration_secs,
            chat_frequency: self.chat_frequency,
        }
    }

    /// Bounds check for client-supplied overrides.
    pub fn validate_overrides(overrides: &ConfigOverrides) -> Result<(), GameError> {
        if let Some(total_rounds) = overrides.total_rounds {
            if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&total_rounds) {
                return Err(GameError::validation(format!(
                    "totalRounds must be within {MIN_ROUNDS}..={MAX_ROUNDS}"
                )));
            }
        }
        if let Some(timeout) = overrides.decision_timeout_ms {
            if !(MIN_DECISION_TIMEOUT_MS..=MAX_DECISION_TIMEOUT_MS).contains(&timeout) {
                return Err(GameError::validation(format!(
                    "decisionTimeoutMs must be within \
                     {MIN_DECISION_TIMEOUT_MS}..={MAX_DECISION_TIMEOUT_MS}"
                )));
            }
        }
        Ok(())
    }
}

fn env_lower(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_lowercase())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::config(format!("{key} has an invalid value: '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_bounds_are_enforced() {
        let too_many = ConfigOverrides {
            total_rounds: Some(21),
            decision_timeout_ms: None,
        };
        assert!(matches!(
            ExperimentConfig::validate_overrides(&too_many).unwrap_err(),
            GameError::Validation(_)
        ));

        let too_fast = ConfigOverrides {
            total_rounds: None,
            decision_timeout_ms: Some(1_000),
        };
        assert!(ExperimentConfig::validate_overrides(&too_fast).is_err());

        let fine = ConfigOverrides {
            total_rounds: Some(10),
            decision_timeout_ms: Some(15_000),
        };
        assert!(ExperimentConfig::validate_overrides(&fine).is_ok());
    }

    #[test]
    fn defaults_match_experiment_parameters() {
        let config = ExperimentConfig::default().game_config();
        assert_eq!(config.total_rounds, 5);
        assert_eq!(config.decision_timeout_ms, 30_000);
        assert_eq!(config.payoffs, Payoffs::default());
        assert!(!config.chat_enabled);
    }
}
