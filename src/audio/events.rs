use dashmap::DashMap;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tracing::debug;

use super::session::PlaybackState;
use crate::storage::{ledger::NowPlayingRecord, volume::VolumeKind};

/// Eventos que se emiten a los observadores (web UI, etc.).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlayerEvent {
    NowPlaying { record: Option<NowPlayingRecord> },
    Progress { position: f64, duration: Option<f64> },
    State { state: PlaybackState },
    Loop { enabled: bool },
    Volume { kind: VolumeKind, volume: f32 },
    Connection { channel_id: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildEvent {
    pub guild_id: String,
    #[serde(flatten)]
    pub event: PlayerEvent,
}

/// Eventos que un observador lento puede acumular antes de empezar a perderlos.
const SUBSCRIBER_BUFFER: usize = 256;

struct Subscriber {
    filter: Option<String>,
    tx: flume::Sender<GuildEvent>,
}

#[derive(Default)]
struct Hub {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
}

/// Reparte los cambios de sesión a cualquier número de observadores.
///
/// El envío no espera: un suscriptor lleno pierde el evento y uno
/// desconectado se elimina, sin afectar al resto.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    hub: Arc<Hub>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// `filter` = `None` recibe eventos de todas las guilds.
    pub fn subscribe(&self, filter: Option<String>) -> Subscription {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded(SUBSCRIBER_BUFFER);
        self.hub.subscribers.insert(id, Subscriber { filter, tx });
        debug!("👂 Suscriptor {} registrado", id);

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.hub),
        }
    }

    pub fn publish(&self, guild_id: &str, event: PlayerEvent) {
        let event = GuildEvent {
            guild_id: guild_id.to_string(),
            event,
        };

        let mut gone = Vec::new();
        for entry in self.hub.subscribers.iter() {
            let matches = entry.filter.as_deref().map_or(true, |f| f == guild_id);
            if !matches {
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(flume::TrySendError::Full(_)) => {
                    debug!("Suscriptor {} saturado, evento descartado", entry.key());
                }
                Err(flume::TrySendError::Disconnected(_)) => gone.push(*entry.key()),
            }
        }

        for id in gone {
            self.hub.subscribers.remove(&id);
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscribers.len()
    }
}

/// Devuelto por [`EventBroadcaster::subscribe`]. Al soltarlo se cancela la suscripción.
pub struct Subscription {
    id: u64,
    rx: flume::Receiver<GuildEvent>,
    hub: Weak<Hub>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<GuildEvent> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<GuildEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.remove(&self.id);
            debug!("👋 Suscriptor {} eliminado", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn loop_event(enabled: bool) -> PlayerEvent {
        PlayerEvent::Loop { enabled }
    }

    #[test]
    fn test_filter_by_guild() {
        let events = EventBroadcaster::new();
        let all = events.subscribe(None);
        let only_g1 = events.subscribe(Some("G1".into()));

        events.publish("G1", loop_event(true));
        events.publish("G2", loop_event(false));

        assert_eq!(all.try_recv().unwrap().guild_id, "G1");
        assert_eq!(all.try_recv().unwrap().guild_id, "G2");
        assert_eq!(only_g1.try_recv().unwrap().event, loop_event(true));
        assert!(only_g1.try_recv().is_none());
    }

    #[test]
    fn test_dropped_subscriber_does_not_affect_others() {
        let events = EventBroadcaster::new();
        let keep = events.subscribe(None);
        let gone = events.subscribe(None);
        drop(gone);
        assert_eq!(events.subscriber_count(), 1);

        events.publish("G1", loop_event(true));
        assert!(keep.try_recv().is_some());
    }

    #[test]
    fn test_full_subscriber_is_skipped() {
        let events = EventBroadcaster::new();
        let slow = events.subscribe(None);
        for _ in 0..SUBSCRIBER_BUFFER + 10 {
            events.publish("G1", loop_event(true));
        }
        let fast = events.subscribe(None);
        events.publish("G1", loop_event(false));

        assert_eq!(fast.try_recv().unwrap().event, loop_event(false));
        assert_eq!(events.subscriber_count(), 2);
        drop(slow);
    }

    #[tokio::test]
    async fn test_recv_async() {
        let events = EventBroadcaster::new();
        let mut sub = events.subscribe(Some("G1".into()));
        let publisher = events.clone();
        tokio::spawn(async move { publisher.publish("G1", loop_event(true)) });
        assert_eq!(sub.recv().await.unwrap().event, loop_event(true));
    }

    #[test]
    fn test_wire_shape() {
        let event = GuildEvent {
            guild_id: "G1".into(),
            event: PlayerEvent::Progress {
                position: 5.0,
                duration: Some(180.0),
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"guildId": "G1", "type": "progress", "position": 5.0, "duration": 180.0})
        );
    }
}
