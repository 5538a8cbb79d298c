use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_DAY_SPEED: u8 = 75;
pub const DEFAULT_NIGHT_SPEED: u8 = 30;
pub const DEFAULT_BOOST_SPEED: u8 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Override enters once humidity falls this far below target.
    pub humidity_entry_margin: f32,
    /// Override exits once humidity is back within this distance of target.
    pub humidity_exit_margin: f32,
    pub cycle_interval_ms: u64,
    pub command_timeout_ms: u64,
    pub signal_stale_timeout_ms: u64,
    pub state_publish_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            humidity_entry_margin: 10.0,
            humidity_exit_margin: 5.0,
            cycle_interval_ms: 30_000,
            command_timeout_ms: 5_000,
            signal_stale_timeout_ms: 120_000,
            state_publish_interval_ms: 10_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !self.humidity_entry_margin.is_finite() || self.humidity_entry_margin <= 0.0 {
            self.humidity_entry_margin = defaults.humidity_entry_margin;
        }
        if !self.humidity_exit_margin.is_finite() || self.humidity_exit_margin < 0.0 {
            self.humidity_exit_margin = defaults.humidity_exit_margin;
        }
        // A band with exit >= entry would let a single reading toggle the override.
        if self.humidity_exit_margin >= self.humidity_entry_margin {
            self.humidity_exit_margin = self.humidity_entry_margin / 2.0;
        }

        self.cycle_interval_ms = self.cycle_interval_ms.clamp(1_000, 3_600_000);
        self.command_timeout_ms = self.command_timeout_ms.clamp(500, 60_000);
        self.signal_stale_timeout_ms = self.signal_stale_timeout_ms.max(self.cycle_interval_ms);
        self.state_publish_interval_ms = self.state_publish_interval_ms.max(1_000);
    }
}

/// Day/night fan speeds plus the speed forced while the humidity override is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanProfile {
    #[serde(default = "default_day_speed", deserialize_with = "day_speed_or_default")]
    pub day_speed: u8,
    #[serde(
        default = "default_night_speed",
        deserialize_with = "night_speed_or_default"
    )]
    pub night_speed: u8,
    #[serde(
        default = "default_boost_speed",
        deserialize_with = "boost_speed_or_default"
    )]
    pub boost_speed: u8,
}

impl Default for FanProfile {
    fn default() -> Self {
        Self {
            day_speed: DEFAULT_DAY_SPEED,
            night_speed: DEFAULT_NIGHT_SPEED,
            boost_speed: DEFAULT_BOOST_SPEED,
        }
    }
}

fn default_day_speed() -> u8 {
    DEFAULT_DAY_SPEED
}

fn default_night_speed() -> u8 {
    DEFAULT_NIGHT_SPEED
}

fn default_boost_speed() -> u8 {
    DEFAULT_BOOST_SPEED
}

fn percent_or(value: &Value, fallback: u8) -> u8 {
    value
        .as_u64()
        .filter(|percent| *percent <= 100)
        .and_then(|percent| u8::try_from(percent).ok())
        .unwrap_or(fallback)
}

fn day_speed_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    Ok(percent_or(&Value::deserialize(deserializer)?, DEFAULT_DAY_SPEED))
}

fn night_speed_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    Ok(percent_or(
        &Value::deserialize(deserializer)?,
        DEFAULT_NIGHT_SPEED,
    ))
}

fn boost_speed_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    Ok(percent_or(
        &Value::deserialize(deserializer)?,
        DEFAULT_BOOST_SPEED,
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub actuator_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            actuator_url: "http://192.168.1.50".to_string(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub profile: FanProfile,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Tent and fan hardware figures used only by the dashboard's airflow estimate.
    #[serde(default)]
    pub airflow: Map<String, Value>,
}

impl RuntimeConfig {
    /// Parses a persisted config, falling back to defaults for anything unreadable.
    pub fn from_slice_lenient(raw: &[u8]) -> Self {
        let Ok(Value::Object(root)) = serde_json::from_slice::<Value>(raw) else {
            return Self::default();
        };

        let mut coordinator: CoordinatorConfig = root
            .get("coordinator")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        coordinator.sanitize();

        Self {
            coordinator,
            profile: root
                .get("profile")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default(),
            network: root
                .get("network")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default(),
            airflow: match root.get("airflow") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn corrupt_profile_fields_fall_back_individually() {
        let profile: FanProfile = serde_json::from_value(json!({
            "day_speed": 140,
            "night_speed": "fast",
        }))
        .unwrap();

        assert_eq!(profile, FanProfile::default());

        let profile: FanProfile =
            serde_json::from_value(json!({ "day_speed": 60, "night_speed": -5 })).unwrap();
        assert_eq!(profile.day_speed, 60);
        assert_eq!(profile.night_speed, DEFAULT_NIGHT_SPEED);
        assert_eq!(profile.boost_speed, DEFAULT_BOOST_SPEED);
    }

    #[test]
    fn unreadable_runtime_config_uses_defaults() {
        let runtime = RuntimeConfig::from_slice_lenient(b"{not json");
        assert_eq!(runtime.profile, FanProfile::default());
        assert!(runtime.airflow.is_empty());

        let runtime = RuntimeConfig::from_slice_lenient(
            br#"{"profile":{"day_speed":55},"coordinator":7,"airflow":{"tent_width_cm":120}}"#,
        );
        assert_eq!(runtime.profile.day_speed, 55);
        assert_eq!(runtime.coordinator.humidity_entry_margin, 10.0);
        assert_eq!(runtime.airflow.get("tent_width_cm"), Some(&json!(120)));
    }

    #[test]
    fn sanitize_keeps_exit_margin_inside_entry_margin() {
        let mut config = CoordinatorConfig {
            humidity_entry_margin: 4.0,
            humidity_exit_margin: 6.0,
            ..CoordinatorConfig::default()
        };
        config.sanitize();

        assert_eq!(config.humidity_entry_margin, 4.0);
        assert_eq!(config.humidity_exit_margin, 2.0);
    }
}
