use parking_lot::Mutex;
use serenity::async_trait;
use songbird::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, TrackEvent};
use tracing::{debug, error};

use crate::audio::voice::FinishSignal;

/// Avisa al player cuando la pista termina (o se detiene).
pub struct TrackEndNotifier {
    guild_id: String,
    signal: Mutex<Option<FinishSignal>>,
}

impl TrackEndNotifier {
    pub fn new(guild_id: impl Into<String>, signal: FinishSignal) -> Self {
        Self {
            guild_id: guild_id.into(),
            signal: Mutex::new(Some(signal)),
        }
    }
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let Some(signal) = self.signal.lock().take() {
            debug!("🎵 Track terminó en guild {}", self.guild_id);
            signal.fire();
        }
        // Cancel: un solo fin por pista
        Some(VoiceEvent::Cancel)
    }
}

/// Handler para errores de tracks
///
/// Un stream roto es normal si se mata el transcodificador en un stop o un
/// seek; se registra y el End llega igual.
pub struct TrackErrorHandler {
    pub guild_id: String,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                error!(
                    "❌ Error en track para guild {}: {:?}",
                    self.guild_id, state.playing
                );
            }
        }

        None
    }
}

/// Registra los handlers de una pista recién creada.
pub fn register_track_events(
    track: &songbird::tracks::TrackHandle,
    guild_id: &str,
    on_finish: FinishSignal,
) -> songbird::tracks::TrackResult<()> {
    track.add_event(
        VoiceEvent::Track(TrackEvent::End),
        TrackEndNotifier::new(guild_id, on_finish),
    )?;
    track.add_event(
        VoiceEvent::Track(TrackEvent::Error),
        TrackErrorHandler {
            guild_id: guild_id.to_string(),
        },
    )?;
    Ok(())
}

