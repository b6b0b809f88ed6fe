use futures::future::join_all;
use serde::Serialize;
use std::{
    collections::BTreeSet,
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{sync::oneshot, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    events::{EventBroadcaster, PlayerEvent, Subscription},
    registry::SessionRegistry,
    session::{clamp_position, ActivePlayback, GuildSession, PlaybackSession, PlaybackState, ProgressTicker},
    transcode::{OutputFormat, TranscodeOptions, TranscodeSupervisor, Transcoder},
    voice::{FinishSignal, SinkOptions, VoiceConnection, VoiceGateway},
};
use crate::{
    error::{require_id, require_position, PlayerError, PlayerResult},
    sources::LocalLibrary,
    storage::{
        ledger::{NowPlayingRecord, PlaybackLedger},
        volume::{VolumeKind, VolumeLevels, VolumeStore},
    },
};

/// Tiempos del núcleo de reproducción.
#[derive(Debug, Clone, Copy)]
pub struct PlayerSettings {
    /// Cada cuánto se publica el progreso.
    pub tick_interval: Duration,
    /// Mínimo entre escrituras del ledger causadas por el progreso.
    pub save_interval: Duration,
    /// Espera máxima a que la conexión de voz quede lista.
    pub connect_timeout: Duration,
    pub output: OutputFormat,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            save_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(15),
            output: OutputFormat::default(),
        }
    }
}

/// Petición de reproducción ya separada del transporte HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    pub track: String,
    /// Id o nombre del canal. `None` usa el canal ya asignado a la guild.
    pub channel: Option<String>,
    pub position: f64,
    pub effect: bool,
}

impl PlayRequest {
    pub fn music(track: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            channel: None,
            position: 0.0,
            effect: false,
        }
    }

    pub fn in_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn at(mut self, position: f64) -> Self {
        self.position = position;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayOutcome {
    pub track: String,
    pub position: f64,
    pub duration: Option<f64>,
    pub effect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub guild_id: String,
    pub state: PlaybackState,
    pub channel_id: Option<String>,
    pub now_playing: Option<NowPlayingRecord>,
    pub loop_enabled: bool,
    pub volume: VolumeLevels,
    pub live_processes: usize,
}

struct StartParams {
    track: String,
    path: PathBuf,
    channel_id: String,
    position: f64,
    is_effect: bool,
}

/// Núcleo de reproducción compartido por la API HTTP y el handler de Discord.
///
/// Cada guild tiene una [`GuildSession`]; cada transición toma el lock de esa
/// sesión de principio a fin, así que las transiciones de una guild nunca se
/// mezclan y guilds distintas avanzan en paralelo.
///
/// ## Durabilidad
///
/// El [`PlaybackLedger`] se actualiza (y se guarda) dentro de cada transición
/// antes de publicar el evento; quien recibe un evento lee un ledger que ya
/// coincide con él.
pub struct AudioPlayer {
    registry: SessionRegistry,
    supervisor: TranscodeSupervisor,
    ledger: Arc<PlaybackLedger>,
    volumes: Arc<VolumeStore>,
    events: EventBroadcaster,
    gateway: Arc<dyn VoiceGateway>,
    library: LocalLibrary,
    settings: PlayerSettings,
}

impl AudioPlayer {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        transcoder: Arc<dyn Transcoder>,
        ledger: Arc<PlaybackLedger>,
        volumes: Arc<VolumeStore>,
        library: LocalLibrary,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            supervisor: TranscodeSupervisor::new(transcoder),
            ledger,
            volumes,
            events: EventBroadcaster::new(),
            gateway,
            library,
            settings,
        }
    }

    /// Carga ledger y volúmenes. Debe completarse antes de cualquier save().
    pub async fn init(&self) {
        self.ledger.load().await;
        self.volumes.load().await;
    }

    pub fn library(&self) -> &LocalLibrary {
        &self.library
    }

    /// Si la guild tiene sesión viva o canal registrado.
    pub fn is_tracking(&self, guild_id: &str) -> bool {
        self.registry.get(guild_id).is_some() || self.ledger.channel(guild_id).is_some()
    }

    pub fn subscribe(&self, guild_id: Option<String>) -> Subscription {
        self.events.subscribe(guild_id)
    }

    /// Conecta a un canal de voz y registra la asignación. No reproduce nada.
    ///
    /// Devuelve el id canónico del canal (`channel` puede ser un nombre).
    pub async fn join(&self, guild_id: &str, channel: &str) -> PlayerResult<String> {
        let guild_id = require_id("guildId", guild_id)?;
        let channel = require_id("channel", channel)?;
        let channel_id = self.gateway.resolve_channel(guild_id, channel).await?;

        let session = self.registry.get_or_create(guild_id);
        let mut inner = session.lock().await;
        ensure_open(&session)?;
        self.ensure_connection(&session, &mut inner, &channel_id).await?;
        Ok(channel_id)
    }

    /// Reproduce música o un efecto, reemplazando lo que sonara en la guild.
    ///
    /// # Errors
    ///
    /// - `Validation` si la guild o la pista están vacías, o la posición no vale
    /// - `NotFound` si el archivo no existe o no se conoce ningún canal
    /// - `Unavailable` si no arrancan el transcodificador o el sink de voz;
    ///   en ese caso no queda ningún proceso vivo
    pub async fn play(self: &Arc<Self>, guild_id: &str, request: PlayRequest) -> PlayerResult<PlayOutcome> {
        let guild_id = require_id("guildId", guild_id)?;
        let track = require_id("track", &request.track)?.to_string();
        let position = require_position("position", request.position)?;
        let path = self.library.resolve(&track).await?;

        let channel = request
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let channel_id = match channel {
            Some(channel) => self.gateway.resolve_channel(guild_id, channel).await?,
            None => self
                .ledger
                .channel(guild_id)
                .ok_or_else(|| PlayerError::not_found("voice channel for this guild"))?,
        };

        let session = self.registry.get_or_create(guild_id);
        let mut inner = session.lock().await;
        ensure_open(&session)?;
        self.start_locked(
            &session,
            &mut inner,
            StartParams {
                track,
                path,
                channel_id,
                position,
                is_effect: request.effect,
            },
        )
        .await
    }

    /// Reproduce un efecto buscándolo por nombre en la carpeta de efectos.
    pub async fn play_effect(
        self: &Arc<Self>,
        guild_id: &str,
        channel: Option<String>,
        name: &str,
    ) -> PlayerResult<PlayOutcome> {
        require_id("guildId", guild_id)?;
        let track = self.library.find_effect(name).await?;
        self.play(
            guild_id,
            PlayRequest {
                track,
                channel,
                position: 0.0,
                effect: true,
            },
        )
        .await
    }

    /// Congela la posición, marca el registro en pausa y detiene el proceso.
    ///
    /// Solo se pausa música que está sonando o un seek pendiente de reinicio;
    /// cualquier otra cosa (nada sonando, un efecto) es NotFound.
    pub async fn pause(&self, guild_id: &str) -> PlayerResult<f64> {
        let guild_id = require_id("guildId", guild_id)?;
        let session = self
            .registry
            .get(guild_id)
            .ok_or_else(|| PlayerError::not_found("music playback"))?;
        let mut inner = session.lock().await;

        let position = match inner.active.as_ref() {
            Some(active) if !active.is_effect && session.state() == PlaybackState::Playing => active.position(),
            // Seek pendiente de reinicio: la posición ya está en el registro
            None if session.state() == PlaybackState::Starting => self
                .ledger
                .now_playing(guild_id)
                .map(|r| r.position)
                .ok_or_else(|| PlayerError::not_found("music playback"))?,
            _ => return Err(PlayerError::not_found("music playback")),
        };

        session.advance_generation();
        let record = self.ledger.update_now_playing(guild_id, |r| {
            r.position = position;
            r.paused = true;
        });
        self.ledger.save().await;
        inner.halt(&self.supervisor);
        session.set_state(PlaybackState::Paused);

        info!("⏸️ Pausado en {:.1}s (guild {})", position, guild_id);
        self.events.publish(guild_id, PlayerEvent::NowPlaying { record });
        self.events.publish(guild_id, PlayerEvent::State { state: PlaybackState::Paused });
        Ok(position)
    }

    /// Vuelve a lanzar la pista registrada desde la posición registrada.
    pub async fn resume(self: &Arc<Self>, guild_id: &str) -> PlayerResult<PlayOutcome> {
        let guild_id = require_id("guildId", guild_id)?;
        let record = self
            .ledger
            .now_playing(guild_id)
            .ok_or_else(|| PlayerError::not_found("track on record"))?;
        let channel_id = self
            .ledger
            .channel(guild_id)
            .ok_or_else(|| PlayerError::not_found("voice channel on record"))?;
        let path = self.library.resolve(&record.track).await?;

        let session = self.registry.get_or_create(guild_id);
        let mut inner = session.lock().await;
        ensure_open(&session)?;
        // start_locked escribe un registro nuevo con paused = false
        let outcome = self
            .start_locked(
                &session,
                &mut inner,
                StartParams {
                    track: record.track,
                    path,
                    channel_id,
                    position: record.position,
                    is_effect: false,
                },
            )
            .await?;

        info!("▶️ Reanudado en {:.1}s (guild {})", outcome.position, guild_id);
        Ok(outcome)
    }

    /// Registra la nueva posición y relanza la reproducción desde ahí en segundo
    /// plano. Vuelve cuando la posición está guardada, no cuando suena el audio.
    pub async fn seek(self: &Arc<Self>, guild_id: &str, position: f64) -> PlayerResult<f64> {
        let guild_id = require_id("guildId", guild_id)?;
        let position = require_position("position", position)?;

        let session = self.registry.get_or_create(guild_id);
        let mut inner = session.lock().await;
        ensure_open(&session)?;
        let current = self
            .ledger
            .now_playing(guild_id)
            .ok_or_else(|| PlayerError::not_found("track on record"))?;
        let position = clamp_position(position, current.duration);

        let generation = session.advance_generation();
        let record = self.ledger.update_now_playing(guild_id, |r| {
            r.position = position;
            r.paused = false;
        });
        self.ledger.save().await;
        inner.halt(&self.supervisor);
        session.set_state(PlaybackState::Starting);

        info!("⏩ Seek a {:.1}s (guild {})", position, guild_id);
        self.events.publish(guild_id, PlayerEvent::NowPlaying { record });
        self.events.publish(guild_id, PlayerEvent::State { state: PlaybackState::Starting });

        self.restart_after_seek(session.clone(), generation, current.track, position);
        Ok(position)
    }

    /// Detiene el proceso vivo. El canal y el registro se quedan; el registro
    /// se congela en la posición actual y se marca en pausa para `resume`.
    pub async fn stop(&self, guild_id: &str) -> PlayerResult<()> {
        let guild_id = require_id("guildId", guild_id)?;
        let Some(session) = self.registry.get(guild_id) else {
            return Ok(());
        };
        let mut inner = session.lock().await;

        let music_position = match inner.active.as_ref() {
            Some(active) => (!active.is_effect).then(|| active.position()),
            None if session.state() == PlaybackState::Starting => {
                self.ledger.now_playing(guild_id).map(|r| r.position)
            }
            None => None,
        };
        session.advance_generation();
        if let Some(position) = music_position {
            let record = self.ledger.update_now_playing(guild_id, |r| {
                r.position = position;
                r.paused = true;
            });
            self.ledger.save().await;
            self.events.publish(guild_id, PlayerEvent::NowPlaying { record });
        }

        if inner.halt(&self.supervisor).is_some() {
            info!("⏹️ Reproducción detenida en guild {}", guild_id);
        }
        session.set_state(PlaybackState::Idle);
        self.events.publish(guild_id, PlayerEvent::State { state: PlaybackState::Idle });
        Ok(())
    }

    /// Activa/desactiva la repetición. Devuelve el nuevo valor.
    pub fn toggle_loop(&self, guild_id: &str) -> PlayerResult<bool> {
        let guild_id = require_id("guildId", guild_id)?;
        let enabled = self.registry.get_or_create(guild_id).toggle_loop();
        info!("🔁 Loop {} en guild {}", if enabled { "activado" } else { "desactivado" }, guild_id);
        self.events.publish(guild_id, PlayerEvent::Loop { enabled });
        Ok(enabled)
    }

    /// Detiene todo, desconecta y olvida el canal y el registro de la guild.
    ///
    /// La sesión sigue registrada, cerrada, hasta terminar el desmontaje: una
    /// transición que llegue mientras tanto espera el lock y falla con
    /// NotFound en vez de arrancar una sesión nueva por debajo.
    pub async fn leave(&self, guild_id: &str) -> PlayerResult<()> {
        let guild_id = require_id("guildId", guild_id)?;

        let session = self.registry.get_or_create(guild_id);
        let mut inner = session.lock().await;
        if session.is_closed() {
            debug!("Guild {} ya abandonada por otro leave", guild_id);
            return Ok(());
        }
        session.close();
        session.advance_generation();
        inner.halt(&self.supervisor);
        session.set_state(PlaybackState::Idle);

        if let Some(connection) = inner.connection.take() {
            if let Err(e) = connection.disconnect().await {
                warn!("⚠️ Error al desconectar guild {}: {}", guild_id, e);
            }
        }

        let stray = self.supervisor.stop_guild(guild_id);
        if stray > 0 {
            warn!("{} transcodificadores huérfanos detenidos en guild {}", stray, guild_id);
        }
        self.supervisor.wait_reaped(guild_id).await;

        self.ledger.set_channel(guild_id, None);
        self.ledger.set_now_playing(guild_id, None);
        self.ledger.save().await;

        info!("👋 Desconectado de guild {}", guild_id);
        self.events.publish(guild_id, PlayerEvent::NowPlaying { record: None });
        self.events.publish(guild_id, PlayerEvent::Connection { channel_id: None });
        self.events.publish(guild_id, PlayerEvent::State { state: PlaybackState::Idle });

        self.registry.remove_session(&session);
        Ok(())
    }

    /// Aplica `leave` a cada guild con sesión o con entrada en el ledger.
    ///
    /// Devuelve cuántas guilds se abandonaron.
    pub async fn disconnect_all(&self) -> usize {
        let guilds: BTreeSet<String> = self
            .registry
            .guild_ids()
            .into_iter()
            .chain(self.ledger.guild_ids())
            .collect();

        let results = join_all(guilds.iter().map(|guild| self.leave(guild))).await;
        for (guild, result) in guilds.iter().zip(results) {
            if let Err(e) = result {
                warn!("⚠️ Error al salir de guild {}: {}", guild, e);
            }
        }

        self.supervisor.stop_all();
        info!("🔌 Desconectado de {} guilds", guilds.len());
        guilds.len()
    }

    pub fn state(&self, guild_id: &str) -> PlayerResult<PlayerSnapshot> {
        let guild_id = require_id("guildId", guild_id)?;
        let session = self.registry.get(guild_id);

        Ok(PlayerSnapshot {
            guild_id: guild_id.to_string(),
            state: session.as_ref().map_or(PlaybackState::Idle, |s| s.state()),
            channel_id: self.ledger.channel(guild_id),
            now_playing: self.ledger.now_playing(guild_id),
            loop_enabled: session.as_ref().map_or(false, |s| s.loop_enabled()),
            volume: self.volumes.levels(guild_id),
            live_processes: self.supervisor.live_count(guild_id),
        })
    }

    /// Guarda la ganancia y la aplica al sink vivo si el tipo coincide.
    pub async fn set_volume(&self, guild_id: &str, kind: VolumeKind, volume: f32) -> PlayerResult<f32> {
        let guild_id = require_id("guildId", guild_id)?;
        let gain = self.volumes.set(guild_id, kind, volume).await?;

        if let Some(session) = self.registry.get(guild_id) {
            let inner = session.lock().await;
            if let (Some(sink), Some(active)) = (inner.sink.as_ref(), inner.active.as_ref()) {
                if volume_kind(active.is_effect) == kind {
                    sink.set_volume(gain);
                }
            }
        }

        self.events.publish(guild_id, PlayerEvent::Volume { kind, volume: gain });
        Ok(gain)
    }

    /// Vuelve a unir (y reanudar) cada guild registrada en el ledger.
    ///
    /// Cada guild se restaura en su propia tarea; un fallo se registra y no
    /// afecta a las demás.
    pub fn restore_from_ledger(self: &Arc<Self>) {
        for guild_id in self.ledger.guild_ids() {
            let Some(channel_id) = self.ledger.channel(&guild_id) else {
                continue;
            };

            let player = self.clone();
            tokio::spawn(async move {
                let resume = player
                    .ledger
                    .now_playing(&guild_id)
                    .map_or(false, |record| !record.paused);

                let result = if resume {
                    player.resume(&guild_id).await.map(|_| ())
                } else {
                    player.join(&guild_id, &channel_id).await.map(|_| ())
                };

                match result {
                    Ok(()) => info!("♻️ Guild {} restaurada (reanudar: {})", guild_id, resume),
                    Err(e) => warn!("⚠️ No se pudo restaurar guild {}: {}", guild_id, e),
                }
            });
        }
    }

    async fn ensure_connection(
        &self,
        session: &GuildSession,
        inner: &mut PlaybackSession,
        channel_id: &str,
    ) -> PlayerResult<Arc<dyn VoiceConnection>> {
        if let Some(connection) = inner.connection.as_ref().filter(|c| c.channel_id() == channel_id) {
            return Ok(connection.clone());
        }

        let guild_id = session.guild_id();
        let connection = self.gateway.connect(guild_id, channel_id).await?;
        match tokio::time::timeout(self.settings.connect_timeout, connection.ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("⚠️ Conexión de voz incompleta en guild {}: {}", guild_id, e),
            Err(_) => warn!(
                "⏳ Timeout ({}s) conectando a voz en guild {}, continuando",
                self.settings.connect_timeout.as_secs(),
                guild_id
            ),
        }
        inner.connection = Some(connection.clone());

        if self.ledger.channel(guild_id).as_deref() != Some(channel_id) {
            self.ledger.set_channel(guild_id, Some(channel_id));
            self.ledger.save().await;
        }

        info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);
        self.events.publish(
            guild_id,
            PlayerEvent::Connection {
                channel_id: Some(channel_id.to_string()),
            },
        );
        Ok(connection)
    }

    async fn start_locked(
        self: &Arc<Self>,
        session: &Arc<GuildSession>,
        inner: &mut PlaybackSession,
        params: StartParams,
    ) -> PlayerResult<PlayOutcome> {
        let result = self.try_start(session, inner, params).await;
        if result.is_err() {
            session.advance_generation();
            inner.halt(&self.supervisor);
            session.set_state(PlaybackState::Idle);
            self.events
                .publish(session.guild_id(), PlayerEvent::State { state: PlaybackState::Idle });
        }
        result
    }

    async fn try_start(
        self: &Arc<Self>,
        session: &Arc<GuildSession>,
        inner: &mut PlaybackSession,
        params: StartParams,
    ) -> PlayerResult<PlayOutcome> {
        let guild_id = session.guild_id();
        let connection = self.ensure_connection(session, inner, &params.channel_id).await?;

        // Nunca dos transcodificadores para la misma guild
        session.advance_generation();
        if let Some(previous) = inner.halt(&self.supervisor) {
            if params.is_effect && !previous.is_effect {
                self.park_interrupted_music(guild_id, &previous).await;
            }
        }
        session.set_state(PlaybackState::Starting);
        self.supervisor.wait_reaped(guild_id).await;

        let duration = if params.is_effect {
            None
        } else {
            self.supervisor.probe_duration(&params.path).await
        };
        let position = clamp_position(params.position, duration);

        let handle = self.supervisor.start(
            guild_id,
            &params.path,
            TranscodeOptions {
                seek_seconds: position,
                format: self.settings.output,
            },
        )?;
        let Some(output) = handle.take_output() else {
            self.supervisor.stop(&handle);
            return Err(PlayerError::unavailable("transcoder produced no output stream"));
        };

        let (on_finish, finished) = FinishSignal::new();
        let volume = self.volumes.get(guild_id, volume_kind(params.is_effect));
        let sink = match connection.play(output, SinkOptions { volume, on_finish }).await {
            Ok(sink) => sink,
            Err(e) => {
                self.supervisor.stop(&handle);
                return Err(e);
            }
        };

        let generation = session.advance_generation();
        self.watch_finish(session.clone(), generation, finished);

        let active = ActivePlayback {
            track: params.track.clone(),
            start_position: position,
            started_at: Instant::now(),
            duration,
            is_effect: params.is_effect,
        };

        if params.is_effect {
            info!("🔔 Efecto {} en guild {}", params.track, guild_id);
        } else {
            let record = NowPlayingRecord::new(&params.track, position, duration);
            self.ledger.set_now_playing(guild_id, Some(record.clone()));
            self.ledger.save().await;
            inner.ticker = Some(self.spawn_ticker(session.clone(), generation, active.clone()));

            info!("🎵 Reproduciendo {} desde {:.1}s en guild {}", params.track, position, guild_id);
            self.events.publish(guild_id, PlayerEvent::NowPlaying { record: Some(record) });
        }

        inner.sink = Some(sink);
        inner.process = Some(handle);
        inner.active = Some(active);
        session.set_state(PlaybackState::Playing);
        self.events.publish(guild_id, PlayerEvent::State { state: PlaybackState::Playing });

        Ok(PlayOutcome {
            track: params.track,
            position,
            duration,
            effect: params.is_effect,
        })
    }

    /// Un efecto cortó la música: guarda su sitio para que `resume` vuelva ahí.
    async fn park_interrupted_music(&self, guild_id: &str, music: &ActivePlayback) {
        let position = music.position();
        let record = self.ledger.update_now_playing(guild_id, |r| {
            r.position = position;
            r.paused = true;
        });
        self.ledger.save().await;
        self.events.publish(guild_id, PlayerEvent::NowPlaying { record });
    }

    fn watch_finish(self: &Arc<Self>, session: Arc<GuildSession>, generation: u64, finished: oneshot::Receiver<()>) {
        let player = Arc::downgrade(self);
        tokio::spawn(async move {
            // Err: el sink se soltó sin terminar
            if finished.await.is_err() {
                return;
            }
            if let Some(player) = player.upgrade() {
                player.finish(session, generation).await;
            }
        });
    }

    /// El sink terminó: desmonta, borra el registro y repite si hay loop.
    async fn finish(self: &Arc<Self>, session: Arc<GuildSession>, generation: u64) {
        let guild_id = session.guild_id().to_string();

        let restart = {
            let mut inner = session.lock().await;
            if session.is_closed() || session.generation() != generation {
                debug!("Fin de pista obsoleto en guild {} (gen {})", guild_id, generation);
                return;
            }

            session.advance_generation();
            let Some(active) = inner.halt(&self.supervisor) else {
                return;
            };
            session.set_state(PlaybackState::Idle);

            if active.is_effect {
                debug!("🔔 Efecto terminado en guild {}", guild_id);
                self.events.publish(&guild_id, PlayerEvent::State { state: PlaybackState::Idle });
                return;
            }

            self.ledger.set_now_playing(&guild_id, None);
            self.ledger.save().await;
            info!("🏁 Pista terminada en guild {}", guild_id);
            self.events.publish(&guild_id, PlayerEvent::NowPlaying { record: None });
            self.events.publish(&guild_id, PlayerEvent::State { state: PlaybackState::Idle });

            session.loop_enabled().then_some(active.track)
        };

        if let Some(track) = restart {
            self.restart_loop(guild_id, track);
        }
    }

    /// Relanza la reproducción en la posición del seek cuando este suelta el
    /// lock. Si algo avanzó la generación entretanto (stop, pause, leave, otro
    /// play o seek), gana eso y el reinicio se descarta.
    fn restart_after_seek(self: &Arc<Self>, session: Arc<GuildSession>, generation: u64, track: String, position: f64) {
        let player = self.clone();
        tokio::spawn(async move {
            let guild_id = session.guild_id().to_string();
            let path = player.library.resolve(&track).await;
            let mut inner = session.lock().await;
            if session.is_closed() || session.generation() != generation {
                debug!("Reinicio tras seek descartado en guild {} (gen {})", guild_id, generation);
                return;
            }

            let result = match (path, player.ledger.channel(&guild_id)) {
                (Ok(path), Some(channel_id)) => {
                    player
                        .start_locked(
                            &session,
                            &mut inner,
                            StartParams {
                                track,
                                path,
                                channel_id,
                                position,
                                is_effect: false,
                            },
                        )
                        .await
                }
                (Err(e), _) => Err(e),
                (_, None) => Err(PlayerError::not_found("voice channel on record")),
            };

            if let Err(e) = result {
                warn!("❌ No se pudo reiniciar tras seek en guild {}: {}", guild_id, e);
                if session.state() == PlaybackState::Starting {
                    session.set_state(PlaybackState::Idle);
                    player
                        .events
                        .publish(&guild_id, PlayerEvent::State { state: PlaybackState::Idle });
                }
            }
        });
    }

    /// El reinicio del loop corre después de que el fin de pista suelte el lock.
    fn restart_loop(self: &Arc<Self>, guild_id: String, track: String) {
        let player = self.clone();
        tokio::spawn(async move {
            info!("🔁 Repitiendo {} en guild {}", track, guild_id);
            if let Err(e) = player.play(&guild_id, PlayRequest::music(track)).await {
                warn!("❌ No se pudo repetir la pista en guild {}: {}", guild_id, e);
            }
        });
    }

    fn spawn_ticker(self: &Arc<Self>, session: Arc<GuildSession>, generation: u64, active: ActivePlayback) -> ProgressTicker {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let player: Weak<Self> = Arc::downgrade(self);
        let tick = self.settings.tick_interval;
        let save_every = self.settings.save_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
            let mut last_save = Instant::now();

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let Some(player) = player.upgrade() else {
                    break;
                };
                let guild_id = session.guild_id();
                let position = active.position();

                // La comprobación va dentro del lock del ledger: un seek que
                // avance la generación no puede ser pisado por este tick.
                let mut current = true;
                let updated = player.ledger.update_now_playing(guild_id, |r| {
                    if session.generation() == generation {
                        r.position = position;
                    } else {
                        current = false;
                    }
                });
                // Sin registro no hay nada que seguir
                if !current || updated.is_none() {
                    break;
                }

                player.events.publish(
                    guild_id,
                    PlayerEvent::Progress {
                        position,
                        duration: active.duration,
                    },
                );

                if last_save.elapsed() >= save_every {
                    player.ledger.save().await;
                    last_save = Instant::now();
                }
            }
        });

        ProgressTicker::new(token, task)
    }

    #[cfg(test)]
    fn supervisor(&self) -> &TranscodeSupervisor {
        &self.supervisor
    }
}

fn ensure_open(session: &GuildSession) -> PlayerResult<()> {
    if session.is_closed() {
        return Err(PlayerError::not_found("voice session (it was just closed)"));
    }
    Ok(())
}

fn volume_kind(is_effect: bool) -> VolumeKind {
    if is_effect {
        VolumeKind::Sfx
    } else {
        VolumeKind::Music
    }
}
