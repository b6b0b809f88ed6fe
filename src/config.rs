use anyhow::Result;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::audio::transcode::OutputFormat;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,

    // HTTP
    pub http_bind: SocketAddr,

    // Paths
    pub data_dir: PathBuf,
    pub media_root: PathBuf,
    pub music_dir: String,
    pub effects_dir: String,

    // Transcodificador
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub probe_timeout_secs: u64,

    // Reproducción
    pub voice_connect_timeout_secs: u64,
    pub progress_save_interval_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()?;

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,

            // HTTP
            http_bind: match std::env::var("HTTP_BIND") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => SocketAddr::from(([0, 0, 0, 0], port)),
            },

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),
            media_root: std::env::var("MEDIA_ROOT")
                .unwrap_or_else(|_| ".".to_string())
                .into(),
            music_dir: std::env::var("MUSIC_DIR").unwrap_or_else(|_| "music".to_string()),
            effects_dir: std::env::var("EFFECTS_DIR")
                .unwrap_or_else(|_| "soundEffects".to_string()),

            // Transcodificador
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .unwrap_or_else(|_| "ffmpeg".to_string())
                .into(),
            ffprobe_path: std::env::var("FFPROBE_PATH")
                .unwrap_or_else(|_| "ffprobe".to_string())
                .into(),
            probe_timeout_secs: std::env::var("PROBE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            // Reproducción
            voice_connect_timeout_secs: std::env::var("VOICE_CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            progress_save_interval_secs: std::env::var("PROGRESS_SAVE_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must be present
    /// - Every timeout and interval must be greater than zero
    /// - Folder names for music and effects must be relative
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.voice_connect_timeout_secs == 0 {
            anyhow::bail!("Voice connect timeout must be greater than 0");
        }

        if self.progress_save_interval_secs == 0 {
            anyhow::bail!("Progress save interval must be greater than 0");
        }

        if self.probe_timeout_secs == 0 {
            anyhow::bail!("Probe timeout must be greater than 0");
        }

        for (name, dir) in [("MUSIC_DIR", &self.music_dir), ("EFFECTS_DIR", &self.effects_dir)] {
            if dir.trim().is_empty() || std::path::Path::new(dir).is_absolute() {
                anyhow::bail!("{} must be a relative folder name, got: {:?}", name, dir);
            }
        }

        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("playback.json")
    }

    pub fn volume_path(&self) -> PathBuf {
        self.data_dir.join("volumes.json")
    }

    pub fn voice_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_connect_timeout_secs)
    }

    pub fn progress_save_interval(&self) -> Duration {
        Duration::from_secs(self.progress_save_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Formato fijo que el transcodificador entrega a songbird.
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::default()
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            HTTP: {}\n  \
            Data: {}\n  \
            Media: {} (music: {}, effects: {})\n  \
            Transcoder: {} / {}\n  \
            Timeouts: connect {}s, probe {}s, save every {}s",
            self.http_bind,
            self.data_dir.display(),
            self.media_root.display(),
            self.music_dir,
            self.effects_dir,
            self.ffmpeg_path.display(),
            self.ffprobe_path.display(),
            self.voice_connect_timeout_secs,
            self.probe_timeout_secs,
            self.progress_save_interval_secs,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no default - must be provided)
            discord_token: String::new(),

            http_bind: SocketAddr::from(([0, 0, 0, 0], 3001)),

            data_dir: "./data".into(),
            media_root: ".".into(),
            music_dir: "music".to_string(),
            effects_dir: "soundEffects".to_string(),

            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            probe_timeout_secs: 10,

            voice_connect_timeout_secs: 15,
            progress_save_interval_secs: 5,
        }
    }
}
