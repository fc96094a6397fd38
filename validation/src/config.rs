use chrono::NaiveDate;
use egm_types::{
    DEFAULT_ACKNOWLEDGEMENT_RETRY_MS, DEFAULT_HISTORY_CAPACITY, DEFAULT_MAX_REDEMPTION_AMOUNT,
    DEFAULT_REDEMPTION_TIMEOUT_MS, DEFAULT_RESTRICTED_EXPIRATION_DAYS,
    DEFAULT_SYSTEM_VALIDATION_TIMEOUT_MS, DEFAULT_TICKET_EXPIRATION_DAYS,
    DEFAULT_VALIDATION_ID_ALARM_MS, MAX_HISTORY_CAPACITY, MAX_MACHINE_VALIDATION_ID,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Scheme used to produce validation numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    None,
    SecureEnhanced,
    System,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("history_capacity must be in 1..={max} (got {value})")]
    InvalidHistoryCapacity { value: usize, max: usize },
    #[error("machine_validation_id must be <= {max} (got {value})")]
    InvalidMachineValidationId { value: u32, max: u32 },
}

/// Configuration for the validation engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: ValidationMode,
    #[serde(default = "default_true")]
    pub cashout_enabled: bool,
    /// Allow restricted and non-restricted promotional tickets to be printed.
    #[serde(default)]
    pub allow_non_cash_out: bool,
    /// Zero means cashable tickets never expire.
    #[serde(default = "default_ticket_expiration_days")]
    pub ticket_expiration_days: u16,
    /// Zero disables restricted tickets unless `restricted_expiration_date` is set.
    #[serde(default = "default_restricted_expiration_days")]
    pub restricted_expiration_days: u16,
    /// Fixed expiration date for restricted tickets; takes precedence over the day count.
    #[serde(default)]
    pub restricted_expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub restricted_pool_id: u16,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_system_validation_timeout_ms")]
    pub system_validation_timeout_ms: u64,
    #[serde(default = "default_redemption_timeout_ms")]
    pub redemption_timeout_ms: u64,
    #[serde(default = "default_acknowledgement_retry_ms")]
    pub acknowledgement_retry_ms: u64,
    #[serde(default = "default_validation_id_alarm_ms")]
    pub validation_id_alarm_ms: u64,
    /// Largest ticket the machine will credit without attendant involvement.
    #[serde(default = "default_max_redemption_amount")]
    pub max_redemption_amount: u64,
    /// Machine validation id applied on first start in secure enhanced mode.
    #[serde(default)]
    pub machine_validation_id: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_ticket_expiration_days() -> u16 {
    DEFAULT_TICKET_EXPIRATION_DAYS
}

fn default_restricted_expiration_days() -> u16 {
    DEFAULT_RESTRICTED_EXPIRATION_DAYS
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_system_validation_timeout_ms() -> u64 {
    DEFAULT_SYSTEM_VALIDATION_TIMEOUT_MS
}

fn default_redemption_timeout_ms() -> u64 {
    DEFAULT_REDEMPTION_TIMEOUT_MS
}

fn default_acknowledgement_retry_ms() -> u64 {
    DEFAULT_ACKNOWLEDGEMENT_RETRY_MS
}

fn default_validation_id_alarm_ms() -> u64 {
    DEFAULT_VALIDATION_ID_ALARM_MS
}

fn default_max_redemption_amount() -> u64 {
    DEFAULT_MAX_REDEMPTION_AMOUNT
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            cashout_enabled: true,
            allow_non_cash_out: false,
            ticket_expiration_days: default_ticket_expiration_days(),
            restricted_expiration_days: default_restricted_expiration_days(),
            restricted_expiration_date: None,
            restricted_pool_id: 0,
            history_capacity: default_history_capacity(),
            system_validation_timeout_ms: default_system_validation_timeout_ms(),
            redemption_timeout_ms: default_redemption_timeout_ms(),
            acknowledgement_retry_ms: default_acknowledgement_retry_ms(),
            validation_id_alarm_ms: default_validation_id_alarm_ms(),
            max_redemption_amount: default_max_redemption_amount(),
            machine_validation_id: None,
        }
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl ValidationConfig {
    pub fn with_mode(mode: ValidationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 || self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::InvalidHistoryCapacity {
                value: self.history_capacity,
                max: MAX_HISTORY_CAPACITY,
            });
        }
        ensure_nonzero(
            "system_validation_timeout_ms",
            self.system_validation_timeout_ms,
        )?;
        ensure_nonzero("redemption_timeout_ms", self.redemption_timeout_ms)?;
        ensure_nonzero("acknowledgement_retry_ms", self.acknowledgement_retry_ms)?;
        ensure_nonzero("validation_id_alarm_ms", self.validation_id_alarm_ms)?;
        ensure_nonzero("max_redemption_amount", self.max_redemption_amount)?;
        if let Some(id) = self.machine_validation_id {
            if id > MAX_MACHINE_VALIDATION_ID {
                return Err(ConfigError::InvalidMachineValidationId {
                    value: id,
                    max: MAX_MACHINE_VALIDATION_ID,
                });
            }
        }
        Ok(())
    }

    pub fn system_validation_timeout(&self) -> Duration {
        Duration::from_millis(self.system_validation_timeout_ms)
    }

    pub fn redemption_timeout(&self) -> Duration {
        Duration::from_millis(self.redemption_timeout_ms)
    }

    pub fn acknowledgement_retry(&self) -> Duration {
        Duration::from_millis(self.acknowledgement_retry_ms)
    }

    pub fn validation_id_alarm(&self) -> Duration {
        Duration::from_millis(self.validation_id_alarm_ms)
    }
}
