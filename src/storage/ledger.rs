use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info, warn};

use super::{read_json, write_atomic, LoadOutcome};

/// Lo que está sonando (o pausado) en una guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlayingRecord {
    pub track: String,
    pub position: f64,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub paused: bool,
    pub updated_at: DateTime<Utc>,
}

impl NowPlayingRecord {
    pub fn new(track: impl Into<String>, position: f64, duration: Option<f64>) -> Self {
        Self {
            track: track.into(),
            position,
            duration,
            paused: false,
            updated_at: Utc::now(),
        }
    }
}

/// Contenido completo del archivo `playback.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    #[serde(default)]
    pub channels: HashMap<String, String>,
    #[serde(default)]
    pub now_playing: HashMap<String, NowPlayingRecord>,
}

/// Copia durable de los canales asignados y de lo que suena en cada guild.
///
/// Los cambios solo tocan memoria; [`PlaybackLedger::save`] escribe el estado
/// completo. Los saves se descartan hasta que [`PlaybackLedger::load`] haya
/// corrido, así un save temprano nunca pisa el archivo con valores vacíos.
pub struct PlaybackLedger {
    path: PathBuf,
    state: RwLock<LedgerState>,
    loaded: AtomicBool,
    write_guard: tokio::sync::Mutex<()>,
}

impl PlaybackLedger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: RwLock::new(LedgerState::default()),
            loaded: AtomicBool::new(false),
            write_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Carga el archivo y reemplaza el estado en memoria.
    pub async fn load(&self) {
        let _guard = self.write_guard.lock().await;

        let state = match read_json::<LedgerState>(&self.path, "ledger").await {
            LoadOutcome::Loaded(state) => {
                info!(
                    "📂 Ledger cargado: {} canales, {} reproducciones",
                    state.channels.len(),
                    state.now_playing.len()
                );
                state
            }
            LoadOutcome::Missing => {
                debug!("Ledger inexistente en {}, empezando vacío", self.path.display());
                LedgerState::default()
            }
            LoadOutcome::Failed => LedgerState::default(),
            LoadOutcome::Blocked => {
                warn!("⚠️ Ledger ilegible en {}; no se guardarán cambios", self.path.display());
                return;
            }
        };

        *self.state.write() = state;
        self.loaded.store(true, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Escribe el estado completo de forma atómica. Errores se registran y se ignoran.
    pub async fn save(&self) {
        if !self.is_loaded() {
            debug!("Ledger aún no cargado, se descarta save()");
            return;
        }

        let _guard = self.write_guard.lock().await;
        let body = {
            let state = self.state.read();
            match serde_json::to_vec_pretty(&*state) {
                Ok(body) => body,
                Err(e) => {
                    warn!("⚠️ No se pudo serializar el ledger: {}", e);
                    return;
                }
            }
        };

        if let Err(e) = write_atomic(&self.path, &body).await {
            warn!("⚠️ No se pudo guardar el ledger en {}: {}", self.path.display(), e);
        }
    }

    pub fn channel(&self, guild_id: &str) -> Option<String> {
        self.state.read().channels.get(guild_id).cloned()
    }

    pub fn set_channel(&self, guild_id: &str, channel_id: Option<&str>) {
        let mut state = self.state.write();
        match channel_id {
            Some(channel_id) => {
                state.channels.insert(guild_id.to_string(), channel_id.to_string());
            }
            None => {
                state.channels.remove(guild_id);
            }
        }
        debug!(target: "ledger_journal", guild_id, op = "set_channel", channel_id);
    }

    pub fn now_playing(&self, guild_id: &str) -> Option<NowPlayingRecord> {
        self.state.read().now_playing.get(guild_id).cloned()
    }

    pub fn set_now_playing(&self, guild_id: &str, record: Option<NowPlayingRecord>) {
        let mut state = self.state.write();
        match record {
            Some(record) => {
                debug!(
                    target: "ledger_journal",
                    guild_id,
                    op = "set_now_playing",
                    track = %record.track,
                    position = record.position,
                    duration = ?record.duration,
                    paused = record.paused,
                );
                state.now_playing.insert(guild_id.to_string(), record);
            }
            None => {
                debug!(target: "ledger_journal", guild_id, op = "clear_now_playing");
                state.now_playing.remove(guild_id);
            }
        }
    }

    /// Aplica `f` al registro actual (si existe) y devuelve la copia resultante.
    pub fn update_now_playing(
        &self,
        guild_id: &str,
        f: impl FnOnce(&mut NowPlayingRecord),
    ) -> Option<NowPlayingRecord> {
        let mut state = self.state.write();
        let record = state.now_playing.get_mut(guild_id)?;
        f(record);
        record.updated_at = Utc::now();
        debug!(
            target: "ledger_journal",
            guild_id,
            op = "update_now_playing",
            position = record.position,
            paused = record.paused,
        );
        Some(record.clone())
    }

    /// Toda guild con canal asignado o con registro de reproducción.
    pub fn guild_ids(&self) -> Vec<String> {
        let state = self.state.read();
        state
            .channels
            .keys()
            .chain(state.now_playing.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> LedgerState {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ledger_in(dir: &tempfile::TempDir) -> PlaybackLedger {
        PlaybackLedger::new(dir.path().join("playback.json"))
    }

    #[tokio::test]
    async fn test_round_trip_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.load().await;

        let mut record = NowPlayingRecord::new("music/battle/b1.opus", 42.5, Some(180.0));
        record.paused = true;
        ledger.set_channel("G1", Some("C1"));
        ledger.set_now_playing("G1", Some(record.clone()));
        ledger.set_channel("G2", Some("C9"));
        ledger.save().await;

        let restarted = ledger_in(&dir);
        restarted.load().await;

        assert_eq!(restarted.snapshot(), ledger.snapshot());
        assert_eq!(restarted.now_playing("G1"), Some(record));
        assert_eq!(restarted.channel("G2").as_deref(), Some("C9"));
        assert_eq!(restarted.guild_ids(), vec!["G1".to_string(), "G2".to_string()]);
    }

    #[tokio::test]
    async fn test_save_before_load_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playback.json");
        std::fs::write(&path, r#"{"channels":{"G1":"C1"}}"#).unwrap();

        let ledger = PlaybackLedger::new(path.clone());
        ledger.save().await;
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"channels":{"G1":"C1"}}"#
        );

        ledger.load().await;
        assert_eq!(ledger.channel("G1").as_deref(), Some("C1"));
        assert!(ledger.now_playing("G1").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_leaves_ledger_usable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("playback.json"), "][").unwrap();

        let ledger = ledger_in(&dir);
        ledger.load().await;
        assert!(ledger.is_loaded());
        assert_eq!(ledger.snapshot(), LedgerState::default());

        ledger.set_channel("G1", Some("C1"));
        ledger.save().await;

        let again = ledger_in(&dir);
        again.load().await;
        assert_eq!(again.channel("G1").as_deref(), Some("C1"));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_kept_when_it_cannot_be_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playback.json");
        std::fs::write(&path, "][").unwrap();
        // Un .corrupt previo que no se puede reemplazar
        std::fs::create_dir(dir.path().join("playback.corrupt")).unwrap();
        std::fs::write(dir.path().join("playback.corrupt").join("old"), "x").unwrap();

        let ledger = ledger_in(&dir);
        ledger.load().await;
        assert!(!ledger.is_loaded());

        ledger.set_channel("G1", Some("C1"));
        ledger.save().await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "][");
    }

    #[tokio::test]
    async fn test_unreadable_path_is_set_aside_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("playback.json")).unwrap();

        let ledger = ledger_in(&dir);
        ledger.load().await;
        assert!(ledger.is_loaded());
        assert!(dir.path().join("playback.corrupt").is_dir());

        ledger.set_channel("G1", Some("C1"));
        ledger.save().await;
        let again = ledger_in(&dir);
        again.load().await;
        assert_eq!(again.channel("G1").as_deref(), Some("C1"));
    }

    #[tokio::test]
    async fn test_update_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.load().await;

        assert!(ledger.update_now_playing("G1", |r| r.position = 3.0).is_none());

        ledger.set_now_playing("G1", Some(NowPlayingRecord::new("music/a.mp3", 0.0, None)));
        let updated = ledger.update_now_playing("G1", |r| r.position = 3.0).unwrap();
        assert_eq!(updated.position, 3.0);

        ledger.set_now_playing("G1", None);
        ledger.set_channel("G1", None);
        assert!(ledger.guild_ids().is_empty());
    }
}
