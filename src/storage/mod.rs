//! # Storage Module
//!
//! JSON file persistence for state that must survive a restart.
//!
//! Two independent stores live here:
//!
//! - [`ledger::PlaybackLedger`]: voice channel bindings and the "now playing"
//!   record of every guild
//! - [`volume::VolumeStore`]: per-guild gain for music and sound effects
//!
//! Both write through [`write_atomic`], so a reader (or a crash) never sees a
//! half-written file. Both treat I/O failures as non-fatal: they are logged
//! and the bot keeps running on its in-memory copy.

pub mod ledger;
pub mod volume;

use serde::de::DeserializeOwned;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::warn;

/// Escribe `contents` en un archivo temporal y lo renombra sobre `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path(path);
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Resultado de leer un almacén JSON al arrancar.
#[derive(Debug)]
pub enum LoadOutcome<T> {
    Loaded(T),
    Missing,
    /// Ilegible o corrupto, y apartado: se puede guardar.
    Failed,
    /// Ilegible o corrupto, y sigue en su sitio: guardar lo destruiría.
    Blocked,
}

/// Lee y parsea un archivo JSON.
///
/// Un archivo que existe pero no se puede leer o parsear se aparta a
/// `<name>.corrupt` para que el siguiente save no lo destruya.
pub async fn read_json<T: DeserializeOwned>(path: &Path, store: &str) -> LoadOutcome<T> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(e) => {
            warn!("⚠️ No se pudo leer {} ({}): {}", store, path.display(), e);
            return set_aside(path).await;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => LoadOutcome::Loaded(value),
        Err(e) => {
            warn!("⚠️ {} corrupto ({}): {}", store, path.display(), e);
            set_aside(path).await
        }
    }
}

async fn set_aside<T>(path: &Path) -> LoadOutcome<T> {
    let aside = path.with_extension("corrupt");
    match fs::rename(path, &aside).await {
        Ok(()) => LoadOutcome::Failed,
        Err(e) => {
            warn!("No se pudo apartar {}: {}", path.display(), e);
            LoadOutcome::Blocked
        }
    }
}
