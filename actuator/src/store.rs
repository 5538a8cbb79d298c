use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use tentfan_common::ScheduleTable;

pub const DEFAULT_TEMP_PIN: u8 = 4;

/// Output state that survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanState {
    #[serde(default)]
    pub speed: u8,
    #[serde(default = "default_temp_pin")]
    pub temp_pin: u8,
}

impl Default for FanState {
    fn default() -> Self {
        Self {
            speed: 0,
            temp_pin: DEFAULT_TEMP_PIN,
        }
    }
}

fn default_temp_pin() -> u8 {
    DEFAULT_TEMP_PIN
}

#[derive(Clone)]
pub struct DeviceStore {
    schedule_path: Arc<PathBuf>,
    fan_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("ACTUATOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.tentfan-actuator"));
        Self::at(data_dir)
    }

    pub fn at(data_dir: PathBuf) -> Self {
        Self {
            schedule_path: Arc::new(data_dir.join("schedule.bin")),
            fan_path: Arc::new(data_dir.join("fan.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_schedule(&self) -> anyhow::Result<ScheduleTable> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.schedule_path.as_ref()).await {
            Ok(raw) => ScheduleTable::from_packed(&raw)
                .ok_or_else(|| anyhow!("stored schedule record is corrupt")),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(ScheduleTable::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_schedule(&self, table: &ScheduleTable) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.schedule_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, table.to_packed()).await?;
        Ok(())
    }

    pub async fn load_fan_state(&self) -> anyhow::Result<FanState> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.fan_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<FanState>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(FanState::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_fan_state(&self, state: &FanState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.fan_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}
