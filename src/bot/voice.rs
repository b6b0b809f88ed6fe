use async_trait::async_trait;
use serenity::{
    all::{ChannelId, ChannelType, GuildId},
    http::Http,
};
use songbird::{
    error::JoinError,
    input::{Input, RawAdapter},
    join::Join,
    tracks::{Track, TrackHandle},
    Call, Songbird,
};
use std::{num::NonZeroU64, sync::Arc};
use symphonia::core::io::ReadOnlySource;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::events::register_track_events;
use crate::{
    audio::{
        transcode::{AudioOutput, OutputFormat},
        voice::{AudioSink, SinkOptions, VoiceConnection, VoiceGateway},
    },
    error::{PlayerError, PlayerResult},
};

fn parse_id(field: &str, raw: &str) -> PlayerResult<NonZeroU64> {
    raw.trim()
        .parse::<NonZeroU64>()
        .map_err(|_| PlayerError::validation(format!("{} must be a Discord id, got '{}'", field, raw)))
}

pub fn parse_guild_id(raw: &str) -> PlayerResult<GuildId> {
    parse_id("guildId", raw).map(GuildId::from)
}

pub fn parse_channel_id(raw: &str) -> PlayerResult<ChannelId> {
    parse_id("channelId", raw).map(ChannelId::from)
}

/// Conector de voz respaldado por songbird.
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: Arc<Http>,
    format: OutputFormat,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, http: Arc<Http>, format: OutputFormat) -> Self {
        Self { manager, http, format }
    }

    /// Pide unirse al canal sin esperar el handshake; el `Join` pendiente
    /// se resuelve en [`VoiceConnection::ready`].
    async fn request_join(&self, guild: GuildId, channel: ChannelId) -> PlayerResult<(Arc<Mutex<Call>>, Join)> {
        let call = self.manager.get_or_insert(guild);
        let join = call
            .lock()
            .await
            .join(channel)
            .await
            .map_err(|e| PlayerError::unavailable(format!("could not join voice channel {}: {}", channel, e)))?;
        Ok((call, join))
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn resolve_channel(&self, guild_id: &str, channel: &str) -> PlayerResult<String> {
        let guild = parse_guild_id(guild_id)?;
        let channels = guild
            .channels(&self.http)
            .await
            .map_err(|e| PlayerError::not_found(format!("guild {} ({})", guild_id, e)))?;

        // Por id o por nombre, solo canales de voz
        channels
            .values()
            .filter(|c| matches!(c.kind, ChannelType::Voice | ChannelType::Stage))
            .find(|c| c.id.to_string() == channel || c.name == channel)
            .map(|c| c.id.to_string())
            .ok_or_else(|| PlayerError::not_found(format!("voice channel {}", channel)))
    }

    async fn connect(&self, guild_id: &str, channel_id: &str) -> PlayerResult<Arc<dyn VoiceConnection>> {
        let guild = parse_guild_id(guild_id)?;
        let channel = parse_channel_id(channel_id)?;
        let (call, join) = self.request_join(guild, channel).await?;

        Ok(Arc::new(SongbirdConnection {
            guild,
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            call,
            pending: Mutex::new(Some(join)),
            manager: self.manager.clone(),
            format: self.format,
        }))
    }
}

struct SongbirdConnection {
    guild: GuildId,
    guild_id: String,
    channel_id: String,
    call: Arc<Mutex<Call>>,
    pending: Mutex<Option<Join>>,
    manager: Arc<Songbird>,
    format: OutputFormat,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn ready(&self) -> PlayerResult<()> {
        let Some(join) = self.pending.lock().await.take() else {
            return Ok(());
        };
        join.await
            .map_err(|e| PlayerError::unavailable(format!("voice handshake failed in guild {}: {}", self.guild_id, e)))?;
        debug!("🔗 Conexión de voz lista en guild {}", self.guild_id);
        Ok(())
    }

    async fn play(&self, output: AudioOutput, options: SinkOptions) -> PlayerResult<Box<dyn AudioSink>> {
        let raw = RawAdapter::new(ReadOnlySource::new(output), self.format.sample_rate, self.format.channels);
        let track = Track::from(Input::from(raw)).volume(options.volume);

        let handle = self.call.lock().await.play(track);
        if let Err(e) = register_track_events(&handle, &self.guild_id, options.on_finish) {
            let _ = handle.stop();
            return Err(PlayerError::unavailable(format!("voice sink rejected the track: {}", e)));
        }

        debug!("🔈 Sink enlazado en guild {} (vol {:.2})", self.guild_id, options.volume);
        Ok(Box::new(SongbirdSink { handle }))
    }

    async fn disconnect(&self) -> PlayerResult<()> {
        match self.manager.remove(self.guild).await {
            Ok(()) => {
                info!("👋 Llamada de voz cerrada en guild {}", self.guild_id);
                Ok(())
            }
            Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(PlayerError::unavailable(format!("voice disconnect failed: {}", e))),
        }
    }
}

struct SongbirdSink {
    handle: TrackHandle,
}

impl AudioSink for SongbirdSink {
    fn set_volume(&self, gain: f32) {
        if let Err(e) = self.handle.set_volume(gain) {
            debug!("No se pudo ajustar el volumen: {}", e);
        }
    }

    fn stop(&self) {
        // Falla si la pista ya terminó
        let _ = self.handle.stop();
    }
}
