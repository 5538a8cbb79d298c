use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use tokio::sync::Mutex;

use tentfan_common::RuntimeConfig;

#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("TENTFAN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.tentfan"));
        Self::at(data_dir)
    }

    pub fn at(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Missing file means first start. Unreadable fields fall back to defaults individually.
    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(RuntimeConfig::from_slice_lenient(&raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use tentfan_common::FanProfile;

    use super::*;

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("tentfan-{label}-{}-{nanos}", std::process::id()))
    }

    #[tokio::test]
    async fn first_start_uses_defaults() {
        let store = AppStore::at(scratch_dir("first-start"));
        let runtime = store.load_runtime_config().await.unwrap();
        assert_eq!(runtime.profile, FanProfile::default());
    }

    #[tokio::test]
    async fn saved_profile_is_reloaded() {
        let dir = scratch_dir("reload");
        let store = AppStore::at(dir.clone());

        let mut runtime = RuntimeConfig::default();
        runtime.profile.day_speed = 65;
        runtime.profile.night_speed = 15;
        store.save_runtime_config(&runtime).await.unwrap();

        let reloaded = AppStore::at(dir).load_runtime_config().await.unwrap();
        assert_eq!(reloaded.profile.day_speed, 65);
        assert_eq!(reloaded.profile.night_speed, 15);
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let dir = scratch_dir("corrupt");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("runtime.json"), b"\x00garbage")
            .await
            .unwrap();

        let runtime = AppStore::at(dir).load_runtime_config().await.unwrap();
        assert_eq!(runtime.profile, FanProfile::default());
    }
}
