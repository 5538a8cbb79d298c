use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::error::CommandError;

pub const SCHEDULE_SLOTS: usize = 10;

const PACKED_VERSION: u8 = 1;
const PACKED_ENTRY_LEN: usize = 4;
pub const PACKED_LEN: usize = 1 + SCHEDULE_SLOTS * PACKED_ENTRY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: usize,
    #[serde(default)]
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
    pub speed: u8,
}

impl ScheduleEntry {
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.hour > 23 {
            return Err(CommandError::Validation(format!(
                "schedule {}: hour must be 0-23",
                self.id
            )));
        }
        if self.minute > 59 {
            return Err(CommandError::Validation(format!(
                "schedule {}: minute must be 0-59",
                self.id
            )));
        }
        if self.speed > 100 {
            return Err(CommandError::Validation(format!(
                "schedule {}: speed must be 0-100",
                self.id
            )));
        }
        Ok(())
    }

    pub fn time_label(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// Compact view of an enabled entry, as reported in the actuator's `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub id: usize,
    pub time: String,
    pub speed: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTable {
    entries: [ScheduleEntry; SCHEDULE_SLOTS],
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self {
            entries: std::array::from_fn(|id| ScheduleEntry {
                id,
                ..ScheduleEntry::default()
            }),
        }
    }
}

impl ScheduleTable {
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn get(&self, id: usize) -> Option<&ScheduleEntry> {
        self.entries.get(id)
    }

    /// Replaces the whole table. Slots not named in `incoming` come back disabled and zeroed;
    /// ids past the end of the table are dropped. Returns how many were dropped.
    ///
    /// Nothing is changed if any in-bounds entry fails validation.
    pub fn replace_all(&mut self, incoming: &[ScheduleEntry]) -> Result<usize, CommandError> {
        for entry in incoming.iter().filter(|entry| entry.id < SCHEDULE_SLOTS) {
            entry.validate()?;
        }

        let mut next = Self::default();
        let mut ignored = 0;
        for entry in incoming {
            match next.entries.get_mut(entry.id) {
                Some(slot) => *slot = *entry,
                None => ignored += 1,
            }
        }

        *self = next;
        Ok(ignored)
    }

    /// Enabled entries whose trigger time is exactly `hour:minute`, in table order.
    pub fn due_entries(&self, hour: u8, minute: u8) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.enabled && entry.hour == hour && entry.minute == minute)
    }

    /// Speed to apply at `now`. When several entries share a minute they all fire in table
    /// order, so the highest-indexed one wins.
    pub fn evaluate<T: Timelike>(&self, now: &T) -> Option<u8> {
        let hour = u8::try_from(now.hour()).ok()?;
        let minute = u8::try_from(now.minute()).ok()?;
        self.due_entries(hour, minute).map(|entry| entry.speed).last()
    }

    pub fn summaries(&self) -> Vec<ScheduleSummary> {
        self.entries
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| ScheduleSummary {
                id: entry.id,
                time: entry.time_label(),
                speed: entry.speed,
            })
            .collect()
    }

    pub fn to_packed(&self) -> [u8; PACKED_LEN] {
        let mut packed = [0u8; PACKED_LEN];
        packed[0] = PACKED_VERSION;
        for (entry, chunk) in self
            .entries
            .iter()
            .zip(packed[1..].chunks_exact_mut(PACKED_ENTRY_LEN))
        {
            chunk[0] = u8::from(entry.enabled);
            chunk[1] = entry.hour;
            chunk[2] = entry.minute;
            chunk[3] = entry.speed;
        }
        packed
    }

    /// Decodes a stored record. Any length, version, or range problem yields `None`.
    pub fn from_packed(raw: &[u8]) -> Option<Self> {
        if raw.len() != PACKED_LEN || raw[0] != PACKED_VERSION {
            return None;
        }

        let mut table = Self::default();
        for (id, chunk) in raw[1..].chunks_exact(PACKED_ENTRY_LEN).enumerate() {
            let entry = ScheduleEntry {
                id,
                enabled: match chunk[0] {
                    0 => false,
                    1 => true,
                    _ => return None,
                },
                hour: chunk[1],
                minute: chunk[2],
                speed: chunk[3],
            };
            entry.validate().ok()?;
            table.entries[id] = entry;
        }
        Some(table)
    }
}
