//! Engine configuration.
//!
//! Resolved once at startup and passed into sessions and planners. Every field
//! has a default so a partial TOML table (or none at all) is valid input.

use serde::{Deserialize, Serialize};

use crate::error::BookingError;
use crate::temporal::PracticeClock;

/// Hard cap on generated occurrences for any bulk or manual path.
pub const DEFAULT_OCCURRENCE_CAP: usize = 30;
/// Granularity of the occupancy map.
pub const DEFAULT_SLOT_STEP_MINUTES: u32 = 30;
/// Online and presential sessions.
pub const DEFAULT_COMMERCIAL_DURATION_MINUTES: u32 = 60;
/// Shortest personal activity.
pub const DEFAULT_PERSONAL_DURATION_MINUTES: u32 = 30;
/// UTC-3, no daylight saving.
pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub timezone: String,
    pub occurrence_cap: usize,
    pub slot_step_minutes: u32,
    pub commercial_duration_minutes: u32,
    pub personal_duration_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            occurrence_cap: DEFAULT_OCCURRENCE_CAP,
            slot_step_minutes: DEFAULT_SLOT_STEP_MINUTES,
            commercial_duration_minutes: DEFAULT_COMMERCIAL_DURATION_MINUTES,
            personal_duration_minutes: DEFAULT_PERSONAL_DURATION_MINUTES,
        }
    }
}

impl EngineConfig {
    /// Check the configuration and build the practice clock it describes.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTimezone`] for an unknown timezone name, or
    /// [`BookingError::Validation`] for a zero cap, a step that does not
    /// divide an hour, or a duration that is not a positive multiple of the step.
    pub fn validate(&self) -> Result<PracticeClock, BookingError> {
        let clock = PracticeClock::new(&self.timezone)?;

        if self.occurrence_cap == 0 {
            return Err(BookingError::Validation(
                "occurrence_cap must be at least 1".into(),
            ));
        }
        if self.slot_step_minutes == 0 || 60 % self.slot_step_minutes != 0 {
            return Err(BookingError::Validation(format!(
                "slot_step_minutes must divide 60, got {}",
                self.slot_step_minutes
            )));
        }
        for (name, value) in [
            ("commercial_duration_minutes", self.commercial_duration_minutes),
            ("personal_duration_minutes", self.personal_duration_minutes),
        ] {
            if value == 0 || value % self.slot_step_minutes != 0 {
                return Err(BookingError::Validation(format!(
                    "{name} must be a positive multiple of {}, got {value}",
                    self.slot_step_minutes
                )));
            }
        }

        Ok(clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let clock = EngineConfig::default().validate().unwrap();
        assert_eq!(clock, PracticeClock::default());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"occurrence_cap": 12}"#).unwrap();
        assert_eq!(cfg.occurrence_cap, 12);
        assert_eq!(cfg.slot_step_minutes, 30);
        assert_eq!(cfg.timezone, "America/Sao_Paulo");
    }

    #[test]
    fn test_rejects_unknown_field() {
        let parsed: Result<EngineConfig, _> = serde_json::from_str(r#"{"max": 3}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_rejects_bad_step() {
        let cfg = EngineConfig {
            slot_step_minutes: 25,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(BookingError::Validation(_))));
    }

    #[test]
    fn test_rejects_duration_off_step() {
        let cfg = EngineConfig {
            commercial_duration_minutes: 45,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("commercial_duration_minutes"), "got: {err}");
    }

    #[test]
    fn test_rejects_zero_cap() {
        let cfg = EngineConfig {
            occurrence_cap: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_timezone() {
        let cfg = EngineConfig {
            timezone: "Nowhere/Land".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(BookingError::InvalidTimezone(_))));
    }
}
