pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod schedule;
pub mod signals;
pub mod topics;
pub mod types;

pub use auth::{authorize, parse_supplied, AccessDigest, AuthFailure, SuppliedHash};
pub use config::{CoordinatorConfig, FanProfile, NetworkConfig, RuntimeConfig};
pub use coordinator::{decide, FanCoordinator, HumidityOverride, SpeedCommand, TickAction};
pub use error::CommandError;
pub use schedule::{ScheduleEntry, ScheduleSummary, ScheduleTable, SCHEDULE_SLOTS};
pub use signals::SignalCache;
pub use topics::*;
pub use types::{
    CoordinatorStatus, Decision, FanMode, FanStatePayload, HumiditySignal, LightSignal,
    SignalSnapshot,
};
