//! # Bot Module
//!
//! Discord side of the service.
//!
//! - [`GuardianBot`] implements Serenity's [`EventHandler`]: it restores the
//!   guilds recorded in the playback ledger once the gateway is ready, and
//!   applies leave semantics when the bot is disconnected from voice by
//!   someone else.
//! - [`voice`] implements the player's voice gateway on top of songbird.
//! - [`events`] holds the songbird track event handlers.

use serenity::{
    all::{Context, EventHandler, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info};

pub mod events;
pub mod voice;

use crate::audio::player::AudioPlayer;

pub struct GuardianBot {
    player: Arc<AudioPlayer>,
    /// `ready` se repite en cada reconexión del gateway; se restaura una vez.
    restored: AtomicBool,
}

impl GuardianBot {
    pub fn new(player: Arc<AudioPlayer>) -> Self {
        Self {
            player,
            restored: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for GuardianBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if !self.restored.swap(true, Ordering::AcqRel) {
            self.player.restore_from_ledger();
        }
    }

    /// Alguien sacó al bot del canal de voz: se trata como un leave.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let guild_id = guild_id.to_string();
        if !self.player.is_tracking(&guild_id) {
            return;
        }

        info!("🔌 Bot desconectado en guild {}", guild_id);
        if let Err(e) = self.player.leave(&guild_id).await {
            error!("Error al limpiar guild {}: {:?}", guild_id, e);
        }
    }
}
