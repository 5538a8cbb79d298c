use crate::{
    auth::AccessDigest,
    config::{CoordinatorConfig, FanProfile},
    error::CommandError,
    protocol::validate_speed,
    types::{
        CoordinatorStatus, Decision, FanMode, FanStatePayload, HumiditySignal, LightSignal,
        SignalSnapshot,
    },
};

/// Two-threshold humidity override.
///
/// Enters only while the humidifier is powered off and humidity sits more than the entry margin
/// below its target; leaves once humidity is back within the (narrower) exit margin, or as soon
/// as either signal goes unavailable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumidityOverride {
    active: bool,
    entry_margin: f32,
    exit_margin: f32,
}

impl HumidityOverride {
    pub fn new(entry_margin: f32, exit_margin: f32) -> Self {
        Self {
            active: false,
            entry_margin,
            exit_margin,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feeds one snapshot through the trigger. Returns whether the state flipped.
    pub fn update(&mut self, light: &LightSignal, humidity: &HumiditySignal) -> bool {
        let next = if !light.available || !humidity.is_usable() {
            false
        } else if self.active {
            humidity.current < humidity.target - self.exit_margin
        } else {
            !humidity.is_on && humidity.current < humidity.target - self.entry_margin
        };

        let changed = next != self.active;
        self.active = next;
        changed
    }
}

/// Picks the fan regime for one cycle. Override beats day/night; an unknown light counts as off.
pub fn decide(profile: &FanProfile, override_active: bool, light: &LightSignal) -> Decision {
    if override_active {
        Decision {
            mode: FanMode::Control,
            speed: profile.boost_speed,
        }
    } else if light.available && light.is_on {
        Decision {
            mode: FanMode::Day,
            speed: profile.day_speed,
        }
    } else {
        Decision {
            mode: FanMode::Night,
            speed: profile.night_speed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedCommand {
    pub speed: u8,
    pub mode: Option<FanMode>,
    pub digest: AccessDigest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// Target already applied.
    Idle,
    /// Target differs but no validated credential is cached.
    Suspended,
    Send(SpeedCommand),
}

#[derive(Debug, Clone)]
pub struct FanCoordinator {
    pub config: CoordinatorConfig,
    profile: FanProfile,

    humidity_override: HumidityOverride,
    last_decision: Option<Decision>,
    last_applied_speed: Option<u8>,
    applied_by_override: bool,

    cached_digest: Option<AccessDigest>,
    last_error: Option<CommandError>,
}

impl FanCoordinator {
    pub fn new(config: CoordinatorConfig, profile: FanProfile) -> Self {
        let humidity_override =
            HumidityOverride::new(config.humidity_entry_margin, config.humidity_exit_margin);
        Self {
            config,
            profile,
            humidity_override,
            last_decision: None,
            last_applied_speed: None,
            applied_by_override: false,
            cached_digest: None,
            last_error: None,
        }
    }

    pub fn profile(&self) -> &FanProfile {
        &self.profile
    }

    pub fn set_profile(&mut self, profile: FanProfile) -> bool {
        if self.profile != profile {
            self.profile = profile;
            true
        } else {
            false
        }
    }

    pub fn is_override_active(&self) -> bool {
        self.humidity_override.is_active()
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
    }

    pub fn last_applied_speed(&self) -> Option<u8> {
        self.last_applied_speed
    }

    pub fn is_authenticated(&self) -> bool {
        self.cached_digest.is_some()
    }

    pub fn is_automation_suspended(&self) -> bool {
        self.cached_digest.is_none()
    }

    pub fn last_error(&self) -> Option<&CommandError> {
        self.last_error.as_ref()
    }

    /// Runs one decision cycle on a consistent signal snapshot.
    ///
    /// Without a light reading the regime is unknown, so an already running speed is held.
    /// Night speed is used only when nothing has been applied yet, or when the running speed is
    /// an override boost that the missing reading just cancelled.
    pub fn tick(&mut self, snapshot: &SignalSnapshot) -> TickAction {
        self.humidity_override
            .update(&snapshot.light, &snapshot.humidity);

        let hold = !snapshot.light.available && !self.applied_by_override;
        if hold && self.last_applied_speed.is_some() {
            return TickAction::Idle;
        }

        let decision = decide(
            &self.profile,
            self.humidity_override.is_active(),
            &snapshot.light,
        );
        self.last_decision = Some(decision);

        if self.last_applied_speed == Some(decision.speed) {
            return TickAction::Idle;
        }

        match &self.cached_digest {
            Some(digest) => TickAction::Send(SpeedCommand {
                speed: decision.speed,
                mode: Some(decision.mode),
                digest: digest.clone(),
            }),
            None => TickAction::Suspended,
        }
    }

    pub fn record_automatic_outcome(
        &mut self,
        command: &SpeedCommand,
        outcome: Result<u8, CommandError>,
    ) {
        match outcome {
            Ok(applied) => {
                self.last_applied_speed = Some(applied);
                self.applied_by_override = command.mode == Some(FanMode::Control);
                self.last_error = None;
            }
            Err(err) => {
                if matches!(err, CommandError::AuthRejected { .. }) {
                    self.forget_digest(&command.digest);
                }
                self.last_error = Some(err);
            }
        }
    }

    /// Validates an operator speed request. Manual commands always carry their own digest.
    pub fn manual_speed_command(
        &self,
        speed: i64,
        digest: AccessDigest,
    ) -> Result<SpeedCommand, CommandError> {
        Ok(SpeedCommand {
            speed: validate_speed(speed)?,
            mode: None,
            digest,
        })
    }

    /// Records the result of any operator-initiated command. Success proves the digest, so it is
    /// cached for automatic transitions; a rejection drops it if it was the cached one.
    pub fn record_manual_outcome<T>(
        &mut self,
        digest: &AccessDigest,
        outcome: &Result<T, CommandError>,
    ) {
        match outcome {
            Ok(_) => {
                self.cached_digest = Some(digest.clone());
                self.last_error = None;
            }
            Err(CommandError::AuthRejected { .. }) => self.forget_digest(digest),
            Err(_) => {}
        }
    }

    /// The next automatic cycle compares against this value instead of its own last command.
    pub fn record_manual_speed(&mut self, speed: u8) {
        self.last_applied_speed = Some(speed);
        self.applied_by_override = false;
    }

    pub fn authenticate(&mut self, digest: AccessDigest) {
        self.cached_digest = Some(digest);
        self.last_error = None;
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            mode: self.last_decision.map(|decision| decision.mode.as_str()),
            target_speed: self.last_decision.map(|decision| decision.speed),
            last_applied_speed: self.last_applied_speed,
            override_active: self.is_override_active(),
            day_speed: self.profile.day_speed,
            night_speed: self.profile.night_speed,
            boost_speed: self.profile.boost_speed,
            humidity_on: self.config.humidity_entry_margin,
            humidity_off: self.config.humidity_exit_margin,
            authenticated: self.is_authenticated(),
            automation_suspended: self.is_automation_suspended(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }

    pub fn state_payload(&self) -> FanStatePayload {
        FanStatePayload {
            mode: self.last_decision.map(|decision| decision.mode.as_str()),
            target: self.last_decision.map(|decision| decision.speed),
            applied: self.last_applied_speed,
            override_active: self.is_override_active(),
            automation_suspended: self.is_automation_suspended(),
        }
    }

    fn forget_digest(&mut self, rejected: &AccessDigest) {
        if self.cached_digest.as_ref() == Some(rejected) {
            self.cached_digest = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn light(is_on: bool) -> LightSignal {
        LightSignal {
            available: true,
            is_on,
        }
    }

    fn humidity(current: f32, target: f32, is_on: bool) -> HumiditySignal {
        HumiditySignal {
            available: true,
            current,
            target,
            is_on,
            is_working: is_on && current < target,
        }
    }

    fn snapshot(light_on: bool, humidity: HumiditySignal) -> SignalSnapshot {
        SignalSnapshot {
            light: light(light_on),
            humidity,
        }
    }

    fn authenticated_coordinator() -> FanCoordinator {
        let mut coordinator =
            FanCoordinator::new(CoordinatorConfig::default(), FanProfile::default());
        coordinator.authenticate(AccessDigest::from_code("4444"));
        coordinator
    }

    fn apply(coordinator: &mut FanCoordinator, snapshot: &SignalSnapshot) -> Option<u8> {
        match coordinator.tick(snapshot) {
            TickAction::Send(command) => {
                let speed = command.speed;
                coordinator.record_automatic_outcome(&command, Ok(speed));
                Some(speed)
            }
            _ => None,
        }
    }

    #[test]
    fn light_on_to_off_issues_exactly_one_command() {
        let mut coordinator = authenticated_coordinator();
        let steady = humidity(55.0, 60.0, true);

        assert_eq!(apply(&mut coordinator, &snapshot(true, steady)), Some(75));
        assert_eq!(coordinator.last_applied_speed(), Some(75));

        assert_eq!(apply(&mut coordinator, &snapshot(false, steady)), Some(30));
        assert_eq!(coordinator.last_applied_speed(), Some(30));

        assert_eq!(coordinator.tick(&snapshot(false, steady)), TickAction::Idle);
    }

    #[test]
    fn same_target_twice_sends_once() {
        let mut coordinator = authenticated_coordinator();
        let steady = snapshot(true, humidity(55.0, 60.0, true));

        let mut sent = 0;
        for _ in 0..2 {
            if apply(&mut coordinator, &steady).is_some() {
                sent += 1;
            }
        }
        assert_eq!(sent, 1);
    }

    #[test]
    fn unknown_light_falls_back_to_night() {
        let profile = FanProfile::default();
        let decision = decide(&profile, false, &LightSignal::default());
        assert_eq!(
            decision,
            Decision {
                mode: FanMode::Night,
                speed: profile.night_speed,
            }
        );
    }

    #[test]
    fn lost_light_reading_holds_running_speed() {
        let mut coordinator = authenticated_coordinator();
        let steady = humidity(55.0, 60.0, true);

        assert_eq!(apply(&mut coordinator, &snapshot(true, steady)), Some(75));

        let blind = SignalSnapshot {
            light: LightSignal::default(),
            humidity: steady,
        };
        assert_eq!(coordinator.tick(&blind), TickAction::Idle);
        assert_eq!(coordinator.tick(&blind), TickAction::Idle);
        assert_eq!(coordinator.last_applied_speed(), Some(75));
        assert_eq!(
            coordinator.last_decision().map(|decision| decision.mode),
            Some(FanMode::Day)
        );
    }

    #[test]
    fn first_cycle_without_light_reading_runs_night_speed() {
        let mut coordinator = authenticated_coordinator();
        let blind = SignalSnapshot {
            light: LightSignal::default(),
            humidity: humidity(55.0, 60.0, true),
        };

        assert_eq!(apply(&mut coordinator, &blind), Some(30));
        assert_eq!(coordinator.tick(&blind), TickAction::Idle);
    }

    #[test]
    fn override_dropped_by_lost_light_falls_back_to_night() {
        let mut coordinator = authenticated_coordinator();
        let dry = humidity(45.0, 60.0, false);

        assert_eq!(apply(&mut coordinator, &snapshot(true, dry)), Some(100));

        let blind = SignalSnapshot {
            light: LightSignal::default(),
            humidity: dry,
        };
        let TickAction::Send(command) = coordinator.tick(&blind) else {
            panic!("expected a fallback command");
        };
        coordinator.record_automatic_outcome(
            &command,
            Err(CommandError::Unreachable("timed out".into())),
        );

        // Still running the boost, so the fallback is retried rather than held.
        assert_eq!(apply(&mut coordinator, &blind), Some(30));
        assert!(!coordinator.is_override_active());
        assert_eq!(coordinator.tick(&blind), TickAction::Idle);
    }

    #[test]
    fn override_uses_boost_speed() {
        let mut coordinator = authenticated_coordinator();
        coordinator.set_profile(FanProfile {
            day_speed: 70,
            night_speed: 20,
            boost_speed: 90,
        });

        let dry = snapshot(true, humidity(45.0, 60.0, false));
        assert_eq!(apply(&mut coordinator, &dry), Some(90));
        assert!(coordinator.is_override_active());
        assert_eq!(
            coordinator.last_decision().map(|decision| decision.mode),
            Some(FanMode::Control)
        );
    }

    #[test]
    fn override_needs_humidifier_off() {
        let mut trigger = HumidityOverride::new(10.0, 5.0);
        trigger.update(&light(true), &humidity(40.0, 60.0, true));
        assert!(!trigger.is_active());

        trigger.update(&light(true), &humidity(40.0, 60.0, false));
        assert!(trigger.is_active());
    }

    #[test]
    fn override_does_not_chatter_inside_band() {
        let mut trigger = HumidityOverride::new(10.0, 5.0);
        let target = 60.0;

        // Readings wandering between target-10 and target-5 never enter.
        for current in [50.0, 54.9, 50.1, 53.0, 51.0, 54.0] {
            trigger.update(&light(true), &humidity(current, target, false));
            assert!(!trigger.is_active(), "entered at {current}");
        }

        // One dip below the entry threshold enters...
        assert!(trigger.update(&light(true), &humidity(49.9, target, false)));

        // ...and the same band no longer lets it out.
        let mut toggles = 0;
        for current in [50.0, 54.9, 50.1, 53.0, 51.0, 54.0] {
            if trigger.update(&light(true), &humidity(current, target, false)) {
                toggles += 1;
            }
        }
        assert_eq!(toggles, 0);
        assert!(trigger.is_active());

        assert!(trigger.update(&light(true), &humidity(55.0, target, false)));
        assert!(!trigger.is_active());
    }

    #[test]
    fn unavailable_signals_fail_open() {
        let mut trigger = HumidityOverride::new(10.0, 5.0);
        trigger.update(&light(true), &humidity(40.0, 60.0, false));
        assert!(trigger.is_active());

        trigger.update(&light(true), &HumiditySignal::default());
        assert!(!trigger.is_active());

        trigger.update(&light(true), &humidity(40.0, 60.0, false));
        assert!(trigger.is_active());
        trigger.update(&LightSignal::default(), &humidity(40.0, 60.0, false));
        assert!(!trigger.is_active());
    }

    #[test]
    fn missing_target_humidity_never_escalates() {
        let mut trigger = HumidityOverride::new(10.0, 5.0);
        let manual_mode = HumiditySignal {
            available: true,
            current: 20.0,
            target: f32::NAN,
            is_on: false,
            is_working: false,
        };
        trigger.update(&light(true), &manual_mode);
        assert!(!trigger.is_active());
    }

    #[test]
    fn no_credential_suspends_automation() {
        let mut coordinator =
            FanCoordinator::new(CoordinatorConfig::default(), FanProfile::default());

        assert_eq!(
            coordinator.tick(&snapshot(true, humidity(55.0, 60.0, true))),
            TickAction::Suspended
        );
        assert!(coordinator.is_automation_suspended());
        assert_eq!(coordinator.last_applied_speed(), None);
    }

    #[test]
    fn auth_rejection_discards_digest_and_suspends() {
        let mut coordinator = authenticated_coordinator();
        let steady = snapshot(true, humidity(55.0, 60.0, true));

        let TickAction::Send(command) = coordinator.tick(&steady) else {
            panic!("expected a command");
        };
        coordinator
            .record_automatic_outcome(&command, Err(CommandError::AuthRejected { status: 403 }));

        assert!(!coordinator.is_authenticated());
        assert_eq!(coordinator.tick(&steady), TickAction::Suspended);
        assert_eq!(coordinator.last_applied_speed(), None);
    }

    #[test]
    fn unreachable_actuator_is_retried_next_cycle() {
        let mut coordinator = authenticated_coordinator();
        let steady = snapshot(false, humidity(55.0, 60.0, true));

        let TickAction::Send(command) = coordinator.tick(&steady) else {
            panic!("expected a command");
        };
        coordinator.record_automatic_outcome(
            &command,
            Err(CommandError::Unreachable("timed out".into())),
        );

        assert_eq!(coordinator.last_applied_speed(), None);
        assert!(coordinator.is_authenticated());
        assert!(coordinator.status().last_error.is_some());
        assert_eq!(coordinator.tick(&steady), TickAction::Send(command));
    }

    #[test]
    fn manual_speed_becomes_new_baseline() {
        let mut coordinator =
            FanCoordinator::new(CoordinatorConfig::default(), FanProfile::default());
        let digest = AccessDigest::from_code("4444");
        let steady = snapshot(true, humidity(55.0, 60.0, true));

        let command = coordinator.manual_speed_command(75, digest.clone()).unwrap();
        assert_eq!(command.mode, None);
        let outcome: Result<u8, CommandError> = Ok(command.speed);
        coordinator.record_manual_outcome(&digest, &outcome);
        coordinator.record_manual_speed(command.speed);

        // Manual success authenticated the session and already matches the day target.
        assert!(coordinator.is_authenticated());
        assert_eq!(coordinator.tick(&steady), TickAction::Idle);
    }

    #[test]
    fn manual_speed_out_of_range_is_validation_error() {
        let coordinator = FanCoordinator::new(CoordinatorConfig::default(), FanProfile::default());
        let digest = AccessDigest::from_code("4444");

        for speed in [-1, 101] {
            assert!(matches!(
                coordinator.manual_speed_command(speed, digest.clone()),
                Err(CommandError::Validation(_))
            ));
        }
        for speed in [0, 100] {
            assert!(coordinator.manual_speed_command(speed, digest.clone()).is_ok());
        }
    }

    #[test]
    fn rejected_manual_code_keeps_other_cached_digest() {
        let mut coordinator = authenticated_coordinator();
        let wrong = AccessDigest::from_code("0000");

        let outcome: Result<(), CommandError> = Err(CommandError::AuthRejected { status: 403 });
        coordinator.record_manual_outcome(&wrong, &outcome);
        assert!(coordinator.is_authenticated());

        let cached = AccessDigest::from_code("4444");
        coordinator.record_manual_outcome(&cached, &outcome);
        assert!(!coordinator.is_authenticated());
    }
}
