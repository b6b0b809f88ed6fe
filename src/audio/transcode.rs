use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    io::Read,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::error::{PlayerError, PlayerResult};

/// Stream de audio decodificado que sale del transcodificador.
pub type AudioOutput = Box<dyn Read + Send + Sync>;

/// PCM f32 intercalado con frecuencia y canales fijos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for OutputFormat {
    fn default() -> Self {
        // 48kHz estéreo, lo que espera Discord
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscodeOptions {
    pub seek_seconds: f64,
    pub format: OutputFormat,
}

/// Un transcodificador en ejecución.
pub trait TranscodeProcess: Send {
    /// Toma el stream de salida. Solo la primera llamada lo devuelve.
    fn take_output(&mut self) -> Option<AudioOutput>;

    /// Manda detener el proceso. Si la espera del proceso queda en segundo
    /// plano, devuelve esa tarea para poder esperarla.
    fn terminate(self: Box<Self>) -> Option<JoinHandle<()>>;
}

/// Lanza procesos de transcodificación y mide la duración de archivos.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Duración total en segundos, o `None` si no se puede saber.
    async fn probe_duration(&self, path: &Path) -> Option<f64>;

    fn spawn(&self, path: &Path, options: &TranscodeOptions) -> PlayerResult<Box<dyn TranscodeProcess>>;
}

/// Transcodificador basado en los binarios `ffmpeg` / `ffprobe`.
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    probe_timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, probe_timeout: Duration) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            probe_timeout,
        }
    }

    /// Verifica que ffmpeg y ffprobe estén disponibles
    pub async fn verify_dependencies(&self) -> anyhow::Result<()> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let check = tokio::process::Command::new(binary)
                .arg("-version")
                .stdin(Stdio::null())
                .output()
                .await;

            match check {
                Ok(output) if output.status.success() => {
                    info!("✅ {} disponible", binary.display());
                }
                _ => anyhow::bail!("{} no disponible", binary.display()),
            }
        }
        Ok(())
    }

    fn build_args(path: &Path, options: &TranscodeOptions) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(Into::into)
            .collect();

        if options.seek_seconds > 0.0 {
            args.push("-ss".into());
            args.push(format!("{:.3}", options.seek_seconds).into());
        }

        args.push("-analyzeduration".into());
        args.push("0".into());
        args.push("-i".into());
        args.push(path.as_os_str().to_owned());

        for arg in [
            "-vn".to_string(),
            "-f".to_string(),
            "f32le".to_string(),
            "-acodec".to_string(),
            "pcm_f32le".to_string(),
            "-ar".to_string(),
            options.format.sample_rate.to_string(),
            "-ac".to_string(),
            options.format.channels.to_string(),
            "pipe:1".to_string(),
        ] {
            args.push(arg.into());
        }
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let probe = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.probe_timeout, probe).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!("ffprobe falló para {}: {}", path.display(), output.status);
                return None;
            }
            Ok(Err(e)) => {
                warn!("⚠️ No se pudo ejecutar ffprobe: {}", e);
                return None;
            }
            Err(_) => {
                warn!("⏰ Timeout de ffprobe para {}", path.display());
                return None;
            }
        };

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn spawn(&self, path: &Path, options: &TranscodeOptions) -> PlayerResult<Box<dyn TranscodeProcess>> {
        let child = std::process::Command::new(&self.ffmpeg)
            .args(Self::build_args(path, options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlayerError::unavailable(format!("could not start ffmpeg: {}", e)))?;

        debug!("🔧 ffmpeg pid {} para {}", child.id(), path.display());
        Ok(Box::new(FfmpegProcess { child }))
    }
}

fn parse_probe_output(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

struct FfmpegProcess {
    child: std::process::Child,
}

impl TranscodeProcess for FfmpegProcess {
    fn take_output(&mut self) -> Option<AudioOutput> {
        self.child.stdout.take().map(|out| Box::new(out) as AudioOutput)
    }

    fn terminate(self: Box<Self>) -> Option<JoinHandle<()>> {
        let mut child = self.child;
        let pid = child.id();

        // kill() falla si el proceso ya terminó; no es un error
        if let Err(e) = child.kill() {
            debug!("ffmpeg pid {} ya había terminado: {}", pid, e);
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn_blocking(move || {
                if let Err(e) = child.wait() {
                    warn!("⚠️ No se pudo esperar a ffmpeg pid {}: {}", pid, e);
                }
            })),
            Err(_) => {
                let _ = child.wait();
                None
            }
        }
    }
}

/// Transcodificador vivo que pertenece a una sesión de reproducción.
pub struct TranscodeHandle {
    id: u64,
    guild_id: String,
    process: Mutex<Option<Box<dyn TranscodeProcess>>>,
}

impl TranscodeHandle {
    pub fn is_live(&self) -> bool {
        self.process.lock().is_some()
    }

    pub fn take_output(&self) -> Option<AudioOutput> {
        self.process.lock().as_mut().and_then(|p| p.take_output())
    }

    /// Solo la primera llamada obtiene el proceso.
    fn take_process(&self) -> Option<Box<dyn TranscodeProcess>> {
        self.process.lock().take()
    }
}

/// Lleva la cuenta de cada transcodificador vivo, por guild.
///
/// Pase lo que pase con una sesión, [`TranscodeSupervisor::stop_guild`] y
/// [`TranscodeSupervisor::stop_all`] siguen llegando a sus procesos.
pub struct TranscodeSupervisor {
    transcoder: Arc<dyn Transcoder>,
    live: DashMap<String, Vec<Arc<TranscodeHandle>>>,
    reaping: DashMap<String, Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TranscodeSupervisor {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            live: DashMap::new(),
            reaping: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn probe_duration(&self, path: &Path) -> Option<f64> {
        self.transcoder.probe_duration(path).await
    }

    pub fn start(
        &self,
        guild_id: &str,
        path: &Path,
        options: TranscodeOptions,
    ) -> PlayerResult<Arc<TranscodeHandle>> {
        let process = self.transcoder.spawn(path, &options)?;
        let handle = Arc::new(TranscodeHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            guild_id: guild_id.to_string(),
            process: Mutex::new(Some(process)),
        });

        self.live
            .entry(guild_id.to_string())
            .or_default()
            .push(handle.clone());

        info!(
            "🎛️ Transcodificador #{} iniciado en guild {} (seek {:.1}s)",
            handle.id, guild_id, options.seek_seconds
        );
        Ok(handle)
    }

    /// Idempotente: detener dos veces el mismo handle no hace nada la segunda.
    ///
    /// No espera a que el proceso salga; [`TranscodeSupervisor::wait_reaped`]
    /// lo hace antes de lanzar el siguiente.
    pub fn stop(&self, handle: &TranscodeHandle) {
        if self.terminate(handle) {
            debug!("⏹️ Transcodificador #{} detenido", handle.id);
        }
        self.forget(&handle.guild_id, handle.id);
    }

    pub fn stop_guild(&self, guild_id: &str) -> usize {
        let handles = self
            .live
            .remove(guild_id)
            .map(|(_, handles)| handles)
            .unwrap_or_default();

        handles.iter().filter(|h| self.terminate(h)).count()
    }

    /// Espera a que salgan todos los procesos ya detenidos de la guild.
    pub async fn wait_reaped(&self, guild_id: &str) {
        let pending = self
            .reaping
            .remove(guild_id)
            .map(|(_, pending)| pending)
            .unwrap_or_default();

        for reap in pending {
            if let Err(e) = reap.await {
                warn!("⚠️ Fallo esperando un transcodificador en guild {}: {}", guild_id, e);
            }
        }
    }

    fn terminate(&self, handle: &TranscodeHandle) -> bool {
        let Some(process) = handle.take_process() else {
            return false;
        };
        if let Some(reap) = process.terminate() {
            let mut pending = self.reaping.entry(handle.guild_id.clone()).or_default();
            pending.retain(|r| !r.is_finished());
            pending.push(reap);
        }
        true
    }

    pub fn stop_all(&self) -> usize {
        let guilds: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        let stopped: usize = guilds.iter().map(|g| self.stop_guild(g)).sum();
        if stopped > 0 {
            info!("⏹️ {} transcodificadores detenidos", stopped);
        }
        stopped
    }

    pub fn live_count(&self, guild_id: &str) -> usize {
        self.live
            .get(guild_id)
            .map(|handles| handles.iter().filter(|h| h.is_live()).count())
            .unwrap_or(0)
    }

    fn forget(&self, guild_id: &str, id: u64) {
        let now_empty = match self.live.get_mut(guild_id) {
            Some(mut handles) => {
                handles.retain(|h| h.id != id);
                handles.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.live.remove_if(guild_id, |_, handles| handles.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeTranscoder;

    fn options(seek: f64) -> TranscodeOptions {
        TranscodeOptions {
            seek_seconds: seek,
            format: OutputFormat::default(),
        }
    }

    #[test]
    fn test_parse_probe_output() {
        assert_eq!(parse_probe_output("180.000000\n"), Some(180.0));
        assert_eq!(parse_probe_output("N/A"), None);
        assert_eq!(parse_probe_output(""), None);
        assert_eq!(parse_probe_output("0"), None);
    }

    #[test]
    fn test_ffmpeg_args_seek_before_input() {
        let args = FfmpegTranscoder::build_args(Path::new("/m/a.opus"), &options(12.5));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "12.500");
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "48000"));
        assert!(args.windows(2).any(|w| w[0] == "-ac" && w[1] == "2"));
        assert_eq!(args.last().unwrap(), "pipe:1");

        let args = FfmpegTranscoder::build_args(Path::new("/m/a.opus"), &options(0.0));
        assert!(!args.iter().any(|a| a == "-ss"));
    }

    #[test]
    fn test_stop_is_idempotent_and_tracked() {
        let fake = Arc::new(FakeTranscoder::new(Some(10.0)));
        let supervisor = TranscodeSupervisor::new(fake.clone());

        let handle = supervisor.start("G1", Path::new("a.opus"), options(0.0)).unwrap();
        assert_eq!(supervisor.live_count("G1"), 1);
        assert_eq!(fake.live(), 1);

        supervisor.stop(&handle);
        supervisor.stop(&handle);
        assert_eq!(supervisor.live_count("G1"), 0);
        assert_eq!(fake.live(), 0);
        assert_eq!(fake.terminated(), 1);
    }

    #[test]
    fn test_stop_all_reaches_every_guild() {
        let fake = Arc::new(FakeTranscoder::new(None));
        let supervisor = TranscodeSupervisor::new(fake.clone());

        supervisor.start("G1", Path::new("a.opus"), options(0.0)).unwrap();
        supervisor.start("G2", Path::new("b.opus"), options(0.0)).unwrap();
        assert_eq!(supervisor.stop_guild("G1"), 1);
        assert_eq!(supervisor.live_count("G2"), 1);

        assert_eq!(supervisor.stop_all(), 1);
        assert_eq!(fake.live(), 0);
    }

    #[test]
    fn test_spawn_failure_tracks_nothing() {
        let mut mock = MockTranscoder::new();
        mock.expect_spawn()
            .returning(|_, _| Err(PlayerError::unavailable("no ffmpeg")));
        let supervisor = TranscodeSupervisor::new(Arc::new(mock));

        let result = supervisor.start("G1", Path::new("a.opus"), options(0.0));
        assert!(matches!(result, Err(PlayerError::Unavailable(_))));
        assert_eq!(supervisor.live_count("G1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reaped_covers_background_exits() {
        let fake = Arc::new(FakeTranscoder::new(None).with_reap_delay(Duration::from_millis(200)));
        let supervisor = TranscodeSupervisor::new(fake.clone());

        let first = supervisor.start("G1", Path::new("a.opus"), options(0.0)).unwrap();
        supervisor.start("G2", Path::new("b.opus"), options(0.0)).unwrap();
        supervisor.stop(&first);
        assert_eq!(supervisor.live_count("G1"), 0);
        assert_eq!(fake.live(), 2);

        supervisor.wait_reaped("G1").await;
        assert_eq!(fake.live(), 1);

        // Sin nada pendiente vuelve enseguida
        supervisor.wait_reaped("G1").await;
        supervisor.wait_reaped("G3").await;
    }
}
