pub const TOPIC_LIGHT_STATE: &str = "tent/light/state";
pub const TOPIC_HUMIDIFIER_STATE: &str = "tent/humidifier/state";

pub const TOPIC_FAN_STATE: &str = "tent/fan/state";
