use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info, warn};

use super::{read_json, write_atomic, LoadOutcome};
use crate::error::{PlayerError, PlayerResult};

pub const MIN_GAIN: f32 = 0.0;
pub const MAX_GAIN: f32 = 2.0;
pub const DEFAULT_GAIN: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    Music,
    Sfx,
}

fn default_gain() -> f32 {
    DEFAULT_GAIN
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeLevels {
    #[serde(default = "default_gain")]
    pub music: f32,
    #[serde(default = "default_gain")]
    pub sfx: f32,
}

impl Default for VolumeLevels {
    fn default() -> Self {
        Self {
            music: DEFAULT_GAIN,
            sfx: DEFAULT_GAIN,
        }
    }
}

impl VolumeLevels {
    pub fn get(&self, kind: VolumeKind) -> f32 {
        match kind {
            VolumeKind::Music => self.music,
            VolumeKind::Sfx => self.sfx,
        }
    }

    fn set(&mut self, kind: VolumeKind, gain: f32) {
        match kind {
            VolumeKind::Music => self.music = gain,
            VolumeKind::Sfx => self.sfx = gain,
        }
    }
}

/// Ganancia por guild para música y efectos, persistida en `volumes.json`.
pub struct VolumeStore {
    path: PathBuf,
    levels: RwLock<HashMap<String, VolumeLevels>>,
    loaded: AtomicBool,
    write_guard: tokio::sync::Mutex<()>,
}

impl VolumeStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            levels: RwLock::new(HashMap::new()),
            loaded: AtomicBool::new(false),
            write_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn load(&self) {
        let _guard = self.write_guard.lock().await;

        let levels = match read_json::<HashMap<String, VolumeLevels>>(&self.path, "volumes").await {
            LoadOutcome::Loaded(levels) => {
                info!("🔊 Volúmenes cargados para {} guilds", levels.len());
                levels
            }
            LoadOutcome::Missing | LoadOutcome::Failed => HashMap::new(),
            LoadOutcome::Blocked => {
                warn!("⚠️ volumes.json sigue en su sitio sin poder leerse; no se guardarán cambios");
                return;
            }
        };

        *self.levels.write() = levels;
        self.loaded.store(true, Ordering::Release);
    }

    pub fn get(&self, guild_id: &str, kind: VolumeKind) -> f32 {
        self.levels(guild_id).get(kind)
    }

    pub fn levels(&self, guild_id: &str) -> VolumeLevels {
        self.levels.read().get(guild_id).copied().unwrap_or_default()
    }

    /// Valida `0 <= gain <= 2`, fija la ganancia y la guarda enseguida.
    pub async fn set(&self, guild_id: &str, kind: VolumeKind, gain: f32) -> PlayerResult<f32> {
        if !(MIN_GAIN..=MAX_GAIN).contains(&gain) {
            return Err(PlayerError::validation(format!(
                "volume must be between {} and {}, got {}",
                MIN_GAIN, MAX_GAIN, gain
            )));
        }

        self.levels
            .write()
            .entry(guild_id.to_string())
            .or_default()
            .set(kind, gain);
        debug!("🔊 Volumen {:?} de guild {} = {}", kind, guild_id, gain);

        self.save().await;
        Ok(gain)
    }

    async fn save(&self) {
        if !self.loaded.load(Ordering::Acquire) {
            debug!("Volúmenes aún no cargados, se descarta save()");
            return;
        }

        let _guard = self.write_guard.lock().await;
        let body = {
            let levels = self.levels.read();
            match serde_json::to_vec_pretty(&*levels) {
                Ok(body) => body,
                Err(e) => {
                    warn!("⚠️ No se pudieron serializar los volúmenes: {}", e);
                    return;
                }
            }
        };

        if let Err(e) = write_atomic(&self.path, &body).await {
            warn!("⚠️ No se pudieron guardar los volúmenes en {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_to_unity_gain() {
        let dir = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(dir.path().join("volumes.json"));
        store.load().await;

        assert_eq!(store.get("G1", VolumeKind::Music), 1.0);
        assert_eq!(store.get("G1", VolumeKind::Sfx), 1.0);
    }

    #[tokio::test]
    async fn test_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(dir.path().join("volumes.json"));
        store.load().await;

        for ok in [0.0, 1.0, 2.0] {
            assert_eq!(store.set("G1", VolumeKind::Music, ok).await, Ok(ok));
        }
        for bad in [-1.0, 2.01, f32::NAN] {
            assert!(matches!(
                store.set("G1", VolumeKind::Music, bad).await,
                Err(PlayerError::Validation(_))
            ));
        }
        assert_eq!(store.get("G1", VolumeKind::Music), 2.0);
    }

    #[tokio::test]
    async fn test_persists_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volumes.json");
        let store = VolumeStore::new(path.clone());
        store.load().await;
        store.set("G1", VolumeKind::Sfx, 0.25).await.unwrap();

        let reloaded = VolumeStore::new(path);
        reloaded.load().await;
        assert_eq!(reloaded.get("G1", VolumeKind::Sfx), 0.25);
        assert_eq!(reloaded.get("G1", VolumeKind::Music), 1.0);
    }
}
