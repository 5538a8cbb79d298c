//! Request and response bodies of the actuator's HTTP surface, shared by both ends.

use serde::{Deserialize, Serialize};

use crate::{
    auth::{deserialize_supplied, supply, AccessDigest, SuppliedHash},
    error::CommandError,
    schedule::{ScheduleEntry, ScheduleSummary},
    types::FanMode,
};

pub const PATH_STATUS: &str = "/status";
pub const PATH_SPEED: &str = "/speed";
pub const PATH_SCHEDULE: &str = "/schedule";
pub const PATH_AUTH: &str = "/auth";
pub const PATH_TEMP_PIN: &str = "/temp_pin";

pub const MAX_TEMP_PIN: i64 = 39;

// Mutating bodies keep every field optional so the device can tell "missing" from "wrong".
// `auth_hash` additionally separates an absent key from an explicit null.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeedRequest {
    pub speed: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_supplied",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_hash: SuppliedHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FanMode>,
}

impl SpeedRequest {
    pub fn new(speed: u8, digest: &AccessDigest, mode: Option<FanMode>) -> Self {
        Self {
            speed: Some(i64::from(speed)),
            auth_hash: supply(digest),
            mode,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub schedules: Option<Vec<ScheduleEntry>>,
    #[serde(
        default,
        deserialize_with = "deserialize_supplied",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_hash: SuppliedHash,
}

impl ScheduleRequest {
    pub fn new(schedules: Vec<ScheduleEntry>, digest: &AccessDigest) -> Self {
        Self {
            schedules: Some(schedules),
            auth_hash: supply(digest),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(
        default,
        deserialize_with = "deserialize_supplied",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_hash: SuppliedHash,
}

impl AuthRequest {
    pub fn new(digest: &AccessDigest) -> Self {
        Self {
            auth_hash: supply(digest),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinRequest {
    pub pin: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_supplied",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_hash: SuppliedHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorStatus {
    pub available: bool,
    pub speed: u8,
    pub enabled: bool,
    pub rssi: i32,
    pub time: String,
    pub schedules: Vec<ScheduleSummary>,
    pub humidity_override: bool,
    #[serde(default)]
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleListing {
    pub schedules: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedAccepted {
    pub success: bool,
    pub speed: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleAccepted {
    pub success: bool,
    #[serde(default)]
    pub ignored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthAccepted {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinAccepted {
    pub success: bool,
    pub pin: u8,
    pub restart_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

pub fn validate_speed(speed: i64) -> Result<u8, CommandError> {
    u8::try_from(speed)
        .ok()
        .filter(|speed| *speed <= 100)
        .ok_or_else(|| CommandError::Validation("speed must be between 0 and 100".to_string()))
}

pub fn validate_pin(pin: i64) -> Result<u8, CommandError> {
    if !(0..=MAX_TEMP_PIN).contains(&pin) {
        return Err(CommandError::Validation(format!(
            "pin must be between 0 and {MAX_TEMP_PIN}"
        )));
    }
    u8::try_from(pin).map_err(|_| CommandError::Validation("pin out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_bounds_are_inclusive() {
        assert_eq!(validate_speed(0), Ok(0));
        assert_eq!(validate_speed(100), Ok(100));
        assert!(matches!(validate_speed(-1), Err(CommandError::Validation(_))));
        assert!(matches!(validate_speed(101), Err(CommandError::Validation(_))));
        assert!(matches!(validate_speed(356), Err(CommandError::Validation(_))));
    }

    #[test]
    fn pin_bounds_follow_gpio_range() {
        assert_eq!(validate_pin(0), Ok(0));
        assert_eq!(validate_pin(39), Ok(39));
        assert!(validate_pin(40).is_err());
        assert!(validate_pin(-1).is_err());
    }

    #[test]
    fn speed_request_omits_mode_when_manual() {
        let digest = AccessDigest::from_code("4444");
        let manual = serde_json::to_value(SpeedRequest::new(40, &digest, None)).unwrap();
        assert_eq!(manual["speed"], 40);
        assert!(manual.get("mode").is_none());

        let automatic =
            serde_json::to_value(SpeedRequest::new(100, &digest, Some(FanMode::Control)))
                .unwrap();
        assert_eq!(automatic["mode"], "control");
        assert_eq!(automatic["auth_hash"], digest.as_str());
    }

    #[test]
    fn auth_hash_presence_survives_parsing() {
        let absent: SpeedRequest = serde_json::from_str(r#"{"speed":50}"#).unwrap();
        let null: SpeedRequest =
            serde_json::from_str(r#"{"speed":50,"auth_hash":null}"#).unwrap();

        assert_eq!(absent.auth_hash, None);
        assert_eq!(null.auth_hash, Some(None));
        assert!(serde_json::to_value(&absent)
            .unwrap()
            .get("auth_hash")
            .is_none());
    }
}
