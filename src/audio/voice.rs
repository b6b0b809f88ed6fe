use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::transcode::AudioOutput;
use crate::error::PlayerResult;

/// Lo dispara el sink una sola vez cuando su stream termina, por lo que sea.
pub struct FinishSignal(oneshot::Sender<()>);

impl FinishSignal {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn fire(self) {
        let _ = self.0.send(());
    }
}

pub struct SinkOptions {
    pub volume: f32,
    pub on_finish: FinishSignal,
}

/// Consumidor del stream de audio dentro de una llamada de voz.
pub trait AudioSink: Send + Sync {
    fn set_volume(&self, gain: f32);
    fn stop(&self);
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn channel_id(&self) -> &str;

    /// Espera a que la conexión quede lista. Puede no terminar nunca; quien
    /// llama decide cuánto esperar.
    async fn ready(&self) -> PlayerResult<()>;

    async fn play(&self, output: AudioOutput, options: SinkOptions) -> PlayerResult<Box<dyn AudioSink>>;

    async fn disconnect(&self) -> PlayerResult<()>;
}

/// Conector con la plataforma de voz.
///
/// `connect` devuelve la conexión en cuanto se pidió unirse, sin esperar a que
/// esté lista; esa espera es [`VoiceConnection::ready`].
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Id canónico del canal a partir de un id o del nombre de un canal de voz.
    async fn resolve_channel(&self, guild_id: &str, channel: &str) -> PlayerResult<String>;

    async fn connect(&self, guild_id: &str, channel_id: &str) -> PlayerResult<Arc<dyn VoiceConnection>>;
}
