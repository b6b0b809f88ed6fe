use parking_lot::RwLock;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::{sync::MutexGuard, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{
    transcode::{TranscodeHandle, TranscodeSupervisor},
    voice::{AudioSink, VoiceConnection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    Paused,
}

/// Nunca por debajo de cero ni más allá del final de la pista.
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    let position = match duration {
        Some(duration) => position.min(duration),
        None => position,
    };
    position.max(0.0)
}

/// Lo que está sonando ahora mismo en la sesión.
#[derive(Debug, Clone)]
pub struct ActivePlayback {
    pub track: String,
    pub start_position: f64,
    pub started_at: Instant,
    pub duration: Option<f64>,
    pub is_effect: bool,
}

impl ActivePlayback {
    /// Posición absoluta en la pista estimada con el reloj.
    pub fn position(&self) -> f64 {
        clamp_position(
            self.start_position + self.started_at.elapsed().as_secs_f64(),
            self.duration,
        )
    }
}

/// Tarea periódica de progreso. Al soltarla se cancela.
pub struct ProgressTicker {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ProgressTicker {
    pub fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { token, task }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// Recursos de reproducción de una guild. Solo se tocan con el lock tomado.
#[derive(Default)]
pub struct PlaybackSession {
    pub connection: Option<Arc<dyn VoiceConnection>>,
    pub sink: Option<Box<dyn AudioSink>>,
    pub process: Option<Arc<TranscodeHandle>>,
    pub ticker: Option<ProgressTicker>,
    pub active: Option<ActivePlayback>,
}

impl PlaybackSession {
    /// Detiene el ticker, el sink y el transcodificador, en ese orden.
    ///
    /// Devuelve lo que estaba sonando. La conexión de voz no se toca.
    pub fn halt(&mut self, supervisor: &TranscodeSupervisor) -> Option<ActivePlayback> {
        self.ticker.take();
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        if let Some(process) = self.process.take() {
            supervisor.stop(&process);
        }
        self.active.take()
    }
}

/// Sesión de una guild: los recursos serializados y los flags que se pueden
/// leer sin esperar a la transición en curso.
///
/// Cada transición mantiene [`GuildSession::lock`] de principio a fin; eso es
/// lo que impide dos transcodificadores a la vez en la misma guild.
pub struct GuildSession {
    guild_id: String,
    inner: tokio::sync::Mutex<PlaybackSession>,
    state: RwLock<PlaybackState>,
    loop_enabled: AtomicBool,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl GuildSession {
    pub fn new(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            inner: tokio::sync::Mutex::new(PlaybackSession::default()),
            state: RwLock::new(PlaybackState::Idle),
            loop_enabled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, PlaybackSession> {
        self.inner.lock().await
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.read()
    }

    pub fn set_state(&self, state: PlaybackState) {
        *self.state.write() = state;
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Acquire)
    }

    /// Devuelve el nuevo valor.
    pub fn toggle_loop(&self) -> bool {
        !self.loop_enabled.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Marca la sesión como desmontada. Una transición que esperaba el lock
    /// mientras corría `leave` no debe revivirla.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invalida fines de pista y ticks de reproducciones anteriores.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}
