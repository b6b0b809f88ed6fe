use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::session::GuildSession;

/// Tabla de sesiones por guild, compartida por todo el proceso.
///
/// El mapa solo protege inserciones y búsquedas; lo que pasa dentro de una
/// sesión lo serializa el lock propio de la sesión.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<GuildSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: &str) -> Option<Arc<GuildSession>> {
        self.sessions.get(guild_id).map(|s| s.clone())
    }

    pub fn get_or_create(&self, guild_id: &str) -> Arc<GuildSession> {
        self.sessions
            .entry(guild_id.to_string())
            .or_insert_with(|| {
                debug!("🆕 Sesión creada para guild {}", guild_id);
                Arc::new(GuildSession::new(guild_id))
            })
            .clone()
    }

    /// Quita la sesión solo si sigue siendo la registrada para su guild.
    pub fn remove_session(&self, session: &Arc<GuildSession>) -> bool {
        self.sessions
            .remove_if(session.guild_id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn guild_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
