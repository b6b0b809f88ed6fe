//! # Sources Module
//!
//! Resolution of local audio files.
//!
//! Tracks are addressed by a path relative to the media root, using forward
//! slashes, e.g. `music/battle/b1.opus` or `soundEffects/door.wav`. The
//! [`LocalLibrary`] turns those identifiers into absolute paths, finds
//! effects by a short name, and lists what is available for the web UI.

use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{PlayerError, PlayerResult};

/// Extensiones que el transcodificador sabe leer.
pub const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "ogg", "opus", "wav"];

/// Grupo para archivos sueltos en la raíz de una carpeta.
const ROOT_GROUP: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEntry {
    pub name: String,
    pub rel_path: String,
}

pub type TrackGroups = BTreeMap<String, Vec<TrackEntry>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackListing {
    pub music: TrackGroups,
    pub sound_effects: TrackGroups,
}

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct LocalLibrary {
    root: PathBuf,
    music_dir: String,
    effects_dir: String,
}

impl LocalLibrary {
    pub fn new(root: impl Into<PathBuf>, music_dir: impl Into<String>, effects_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            music_dir: music_dir.into(),
            effects_dir: effects_dir.into(),
        }
    }

    /// Convierte un identificador relativo de pista en un archivo existente.
    ///
    /// Rutas absolutas y segmentos `..` son errores de validación; ninguna
    /// petición puede salir de la raíz de medios.
    pub async fn resolve(&self, track: &str) -> PlayerResult<PathBuf> {
        let track = track.trim();
        if track.is_empty() {
            return Err(PlayerError::validation("track is required"));
        }

        let relative = Path::new(track);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(PlayerError::validation(format!(
                "track must be a path relative to the media root: {}",
                track
            )));
        }

        let path = self.root.join(relative);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(PlayerError::not_found(format!("track {}", track))),
        }
    }

    /// Si `track` está dentro de la carpeta de efectos.
    pub fn is_effect(&self, track: &str) -> bool {
        Path::new(track.trim())
            .components()
            .next()
            .map(|first| first.as_os_str() == self.effects_dir.as_str())
            .unwrap_or(false)
    }

    /// Busca un efecto por nombre (subcadena, sin distinguir mayúsculas).
    ///
    /// Solo busca en la carpeta de efectos. Las coincidencias se ordenan por
    /// identificador: el mismo nombre siempre elige el mismo archivo.
    pub async fn find_effect(&self, name: &str) -> PlayerResult<String> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Err(PlayerError::validation("effect name is required"));
        }

        let mut matches: Vec<String> = self
            .walk(&self.effects_dir)
            .await
            .into_iter()
            .filter(|id| {
                Path::new(id)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect();
        matches.sort();

        match matches.into_iter().next() {
            Some(found) => {
                debug!("🔎 Efecto '{}' -> {}", name, found);
                Ok(found)
            }
            None => Err(PlayerError::not_found(format!("effect {}", name))),
        }
    }

    /// Lista música y efectos agrupados por subcarpeta (un nivel).
    pub async fn list(&self) -> TrackListing {
        TrackListing {
            music: self.scan_grouped(&self.music_dir).await,
            sound_effects: self.scan_grouped(&self.effects_dir).await,
        }
    }

    async fn scan_grouped(&self, dir: &str) -> TrackGroups {
        let mut groups = TrackGroups::new();
        let base = self.root.join(dir);

        let mut entries = match fs::read_dir(&base).await {
            Ok(entries) => entries,
            Err(_) => return groups,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if file_type.is_file() && is_audio_file(&entry.path()) {
                groups.entry(ROOT_GROUP.to_string()).or_default().push(TrackEntry {
                    rel_path: format!("{}/{}", dir, name),
                    name,
                });
            } else if file_type.is_dir() {
                let files = list_audio_files(&entry.path()).await;
                if !files.is_empty() {
                    let group = files
                        .into_iter()
                        .map(|file| TrackEntry {
                            rel_path: format!("{}/{}/{}", dir, name, file),
                            name: file,
                        })
                        .collect();
                    groups.insert(name, group);
                }
            }
        }

        for group in groups.values_mut() {
            group.sort_by(|a, b| a.name.cmp(&b.name));
        }
        groups
    }

    /// Todos los archivos de audio bajo `dir`, recursivo, como identificadores.
    async fn walk(&self, dir: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut pending = vec![(self.root.join(dir), dir.to_string())];

        while let Some((path, prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("No se pudo leer {}: {}", path.display(), e);
                    continue;
                }
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                let id = format!("{}/{}", prefix, name);
                match entry.file_type().await {
                    Ok(t) if t.is_dir() => pending.push((entry.path(), id)),
                    Ok(t) if t.is_file() && is_audio_file(&entry.path()) => found.push(id),
                    _ => {}
                }
            }
        }

        found
    }
}

async fn list_audio_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return files;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if is_audio_file(&entry.path()) {
            if let Ok(t) = entry.file_type().await {
                if t.is_file() {
                    files.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn library() -> (tempfile::TempDir, LocalLibrary) {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "music/battle/b1.opus");
        touch(dir.path(), "music/battle/notes.txt");
        touch(dir.path(), "music/intro.mp3");
        touch(dir.path(), "soundEffects/Door_Slam.wav");
        touch(dir.path(), "soundEffects/doors/door_creak.ogg");
        touch(dir.path(), "secret.mp3");
        let lib = LocalLibrary::new(dir.path(), "music", "soundEffects");
        (dir, lib)
    }

    #[tokio::test]
    async fn test_resolve_existing_track() {
        let (dir, lib) = library();
        let path = lib.resolve("music/battle/b1.opus").await.unwrap();
        assert_eq!(path, dir.path().join("music/battle/b1.opus"));
    }

    #[tokio::test]
    async fn test_resolve_missing_and_escaping_tracks() {
        let (_dir, lib) = library();
        assert!(matches!(
            lib.resolve("music/none.mp3").await,
            Err(PlayerError::NotFound(_))
        ));
        assert!(matches!(
            lib.resolve("music/../../etc/passwd").await,
            Err(PlayerError::Validation(_))
        ));
        assert!(matches!(lib.resolve("/etc/passwd").await, Err(PlayerError::Validation(_))));
        assert!(matches!(lib.resolve("  ").await, Err(PlayerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_find_effect_is_case_insensitive_and_restricted() {
        let (_dir, lib) = library();
        assert_eq!(lib.find_effect("DOOR").await.unwrap(), "soundEffects/Door_Slam.wav");
        assert_eq!(lib.find_effect("creak").await.unwrap(), "soundEffects/doors/door_creak.ogg");
        assert!(matches!(lib.find_effect("secret").await, Err(PlayerError::NotFound(_))));
        assert!(matches!(lib.find_effect("intro").await, Err(PlayerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_groups_one_level() {
        let (_dir, lib) = library();
        let listing = lib.list().await;

        assert_eq!(
            listing.music.get("battle").unwrap(),
            &vec![TrackEntry {
                name: "b1.opus".into(),
                rel_path: "music/battle/b1.opus".into()
            }]
        );
        assert_eq!(listing.music.get("root").unwrap()[0].rel_path, "music/intro.mp3");
        assert!(listing.sound_effects.contains_key("doors"));
    }

    #[test]
    fn test_is_effect() {
        let lib = LocalLibrary::new(".", "music", "soundEffects");
        assert!(lib.is_effect("soundEffects/door.wav"));
        assert!(!lib.is_effect("music/soundEffects.mp3"));
    }
}
