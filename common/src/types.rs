use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    Day,
    Night,
    Control,
}

impl FanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Night => "night",
            Self::Control => "control",
        }
    }
}

/// Grow-light socket reading as last reported by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LightSignal {
    pub available: bool,
    #[serde(default)]
    pub is_on: bool,
}

/// Humidifier reading as last reported by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HumiditySignal {
    pub available: bool,
    #[serde(
        rename = "current_humidity",
        default = "missing_reading",
        deserialize_with = "nullable_reading"
    )]
    pub current: f32,
    #[serde(
        rename = "target_humidity",
        default = "missing_reading",
        deserialize_with = "nullable_reading"
    )]
    pub target: f32,
    #[serde(default)]
    pub is_on: bool,
    #[serde(default)]
    pub is_working: bool,
}

impl HumiditySignal {
    pub fn is_usable(&self) -> bool {
        self.available && self.current.is_finite() && self.target.is_finite()
    }
}

// Manual-mode humidifiers report no target; keep it as NaN so it is never usable.
fn missing_reading() -> f32 {
    f32::NAN
}

fn nullable_reading<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SignalSnapshot {
    pub light: LightSignal,
    pub humidity: HumiditySignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub mode: FanMode,
    pub speed: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub mode: Option<&'static str>,
    #[serde(rename = "targetSpeed")]
    pub target_speed: Option<u8>,
    #[serde(rename = "lastAppliedSpeed")]
    pub last_applied_speed: Option<u8>,
    #[serde(rename = "overrideActive")]
    pub override_active: bool,
    #[serde(rename = "daySpeed")]
    pub day_speed: u8,
    #[serde(rename = "nightSpeed")]
    pub night_speed: u8,
    #[serde(rename = "boostSpeed")]
    pub boost_speed: u8,
    #[serde(rename = "humidityOn")]
    pub humidity_on: f32,
    #[serde(rename = "humidityOff")]
    pub humidity_off: f32,
    pub authenticated: bool,
    #[serde(rename = "automationSuspended")]
    pub automation_suspended: bool,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FanStatePayload {
    pub mode: Option<&'static str>,
    pub target: Option<u8>,
    pub applied: Option<u8>,
    #[serde(rename = "overrideActive")]
    pub override_active: bool,
    #[serde(rename = "automationSuspended")]
    pub automation_suspended: bool,
}
