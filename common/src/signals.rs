use crate::types::{HumiditySignal, LightSignal, SignalSnapshot};

#[derive(Debug, Clone, Copy)]
struct Timestamped<T> {
    value: T,
    received_ms: u64,
}

/// Last light and humidity readings, each with the time it arrived.
#[derive(Debug, Clone)]
pub struct SignalCache {
    stale_timeout_ms: u64,
    light: Option<Timestamped<LightSignal>>,
    humidity: Option<Timestamped<HumiditySignal>>,
}

impl SignalCache {
    pub fn new(stale_timeout_ms: u64) -> Self {
        Self {
            stale_timeout_ms,
            light: None,
            humidity: None,
        }
    }

    pub fn update_light(&mut self, value: LightSignal, now_ms: u64) {
        self.light = Some(Timestamped {
            value,
            received_ms: now_ms,
        });
    }

    pub fn update_humidity(&mut self, value: HumiditySignal, now_ms: u64) {
        self.humidity = Some(Timestamped {
            value,
            received_ms: now_ms,
        });
    }

    /// Both readings as of `now_ms`. Anything never received or older than the stale
    /// timeout comes back with `available = false`.
    pub fn snapshot(&self, now_ms: u64) -> SignalSnapshot {
        let light = match self.light {
            Some(reading) if self.is_fresh(reading.received_ms, now_ms) => reading.value,
            _ => LightSignal::default(),
        };
        let humidity = match self.humidity {
            Some(reading) if self.is_fresh(reading.received_ms, now_ms) => reading.value,
            _ => HumiditySignal::default(),
        };

        SignalSnapshot { light, humidity }
    }

    fn is_fresh(&self, received_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(received_ms) < self.stale_timeout_ms
    }
}
