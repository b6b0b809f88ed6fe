use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{PlayerError, PlayerResult},
    storage::volume::VolumeKind,
};

/// Cuerpos de las peticiones. Todo es opcional para poder responder 400 con
/// un mensaje propio en vez del rechazo genérico de serde.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildBody {
    pub guild_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinBody {
    pub guild_id: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayBody {
    pub guild_id: Option<String>,
    pub channel: Option<String>,
    pub track: Option<String>,
    pub position: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfxBody {
    pub guild_id: Option<String>,
    pub channel: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekBody {
    pub guild_id: Option<String>,
    pub position: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeBody {
    pub guild_id: Option<String>,
    pub kind: Option<VolumeKind>,
    pub volume: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub guild_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub success: bool,
    pub channel_id: String,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub position: f64,
}

#[derive(Debug, Serialize)]
pub struct LoopResponse {
    #[serde(rename = "loop")]
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct VolumeResponse {
    pub kind: VolumeKind,
    pub volume: f32,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Serialize)]
pub struct DisconnectAllResponse {
    pub success: bool,
    pub guilds: usize,
}

/// Extrae el cuerpo JSON; un JSON mal formado es un error de validación.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> PlayerResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| PlayerError::validation(rejection.body_text()))
}

pub fn required<T>(field: &str, value: Option<T>) -> PlayerResult<T> {
    value.ok_or_else(|| PlayerError::validation(format!("{field} is required")))
}

pub fn status_of(error: &PlayerError) -> StatusCode {
    match error {
        PlayerError::Validation(_) => StatusCode::BAD_REQUEST,
        PlayerError::NotFound(_) => StatusCode::NOT_FOUND,
        PlayerError::Unavailable(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for PlayerError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        if status.is_server_error() {
            tracing::warn!("⚠️ {}: {}", status, self);
        }
        (status, Json(json!({ "error": self.to_string(), "kind": self.kind() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(&PlayerError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(&PlayerError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(&PlayerError::unavailable("x")), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_bodies_accept_partial_json() {
        let play: PlayBody = serde_json::from_str(r#"{"guildId":"1","track":"music/a.mp3"}"#).unwrap();
        assert_eq!(play.guild_id.as_deref(), Some("1"));
        assert!(play.channel.is_none() && play.position.is_none());

        let volume: VolumeBody = serde_json::from_str(r#"{"guildId":"1","kind":"sfx","volume":0.5}"#).unwrap();
        assert_eq!(volume.kind, Some(VolumeKind::Sfx));
        assert!(serde_json::from_str::<VolumeBody>(r#"{"kind":"bass"}"#).is_err());
    }

    #[test]
    fn test_required_names_the_field() {
        assert_eq!(
            required::<f64>("position", None),
            Err(PlayerError::Validation("position is required".into()))
        );
    }

    #[test]
    fn test_loop_response_shape() {
        let value = serde_json::to_value(LoopResponse { enabled: true }).unwrap();
        assert_eq!(value, json!({ "loop": true }));
    }
}
