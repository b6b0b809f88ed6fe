use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::{stream, Stream};
use std::{convert::Infallible, sync::Arc};
use tracing::{info, warn};

use super::{
    models::{
        body, required, DisconnectAllResponse, EventsQuery, GuildBody, JoinBody, JoinResponse, LoopResponse,
        PlayBody, PositionResponse, SeekBody, SfxBody, SuccessResponse, VolumeBody, VolumeResponse,
    },
    AppState,
};
use crate::{
    audio::player::{PlayOutcome, PlayRequest, PlayerSnapshot},
    error::PlayerResult,
    sources::TrackListing,
};

type Payload<T> = Result<Json<T>, JsonRejection>;

/// POST /api/join
pub async fn join(State(state): State<Arc<AppState>>, payload: Payload<JoinBody>) -> PlayerResult<Json<JoinResponse>> {
    let req = body(payload)?;
    let guild_id = required("guildId", req.guild_id)?;
    let channel = required("channel", req.channel)?;
    info!("POST /api/join guild={} channel={}", guild_id, channel);

    let channel_id = state.player.join(&guild_id, &channel).await?;
    Ok(Json(JoinResponse {
        success: true,
        channel_id,
    }))
}

/// POST /api/play
pub async fn play(State(state): State<Arc<AppState>>, payload: Payload<PlayBody>) -> PlayerResult<Json<PlayOutcome>> {
    let req = body(payload)?;
    let guild_id = required("guildId", req.guild_id)?;
    let track = required("track", req.track)?;
    info!("POST /api/play guild={} track={}", guild_id, track);

    let outcome = state
        .player
        .play(
            &guild_id,
            PlayRequest {
                effect: state.player.library().is_effect(&track),
                track,
                channel: req.channel,
                position: req.position.unwrap_or(0.0),
            },
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /api/sfx
pub async fn sfx(State(state): State<Arc<AppState>>, payload: Payload<SfxBody>) -> PlayerResult<Json<PlayOutcome>> {
    let req = body(payload)?;
    let guild_id = required("guildId", req.guild_id)?;
    let name = required("name", req.name)?;
    info!("POST /api/sfx guild={} name={}", guild_id, name);

    Ok(Json(state.player.play_effect(&guild_id, req.channel, &name).await?))
}

/// POST /api/pause
pub async fn pause(State(state): State<Arc<AppState>>, payload: Payload<GuildBody>) -> PlayerResult<Json<PositionResponse>> {
    let guild_id = required("guildId", body(payload)?.guild_id)?;
    let position = state.player.pause(&guild_id).await?;
    Ok(Json(PositionResponse { position }))
}

/// POST /api/resume
pub async fn resume(State(state): State<Arc<AppState>>, payload: Payload<GuildBody>) -> PlayerResult<Json<PlayOutcome>> {
    let guild_id = required("guildId", body(payload)?.guild_id)?;
    Ok(Json(state.player.resume(&guild_id).await?))
}

/// POST /api/seek
pub async fn seek(State(state): State<Arc<AppState>>, payload: Payload<SeekBody>) -> PlayerResult<Json<PositionResponse>> {
    let req = body(payload)?;
    let guild_id = required("guildId", req.guild_id)?;
    let position = required("position", req.position)?;

    let position = state.player.seek(&guild_id, position).await?;
    Ok(Json(PositionResponse { position }))
}

/// POST /api/stop
pub async fn stop(State(state): State<Arc<AppState>>, payload: Payload<GuildBody>) -> PlayerResult<Json<SuccessResponse>> {
    let guild_id = required("guildId", body(payload)?.guild_id)?;
    state.player.stop(&guild_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// POST /api/loop
pub async fn toggle_loop(State(state): State<Arc<AppState>>, payload: Payload<GuildBody>) -> PlayerResult<Json<LoopResponse>> {
    let guild_id = required("guildId", body(payload)?.guild_id)?;
    let enabled = state.player.toggle_loop(&guild_id)?;
    Ok(Json(LoopResponse { enabled }))
}

/// POST /api/leave
pub async fn leave(State(state): State<Arc<AppState>>, payload: Payload<GuildBody>) -> PlayerResult<Json<SuccessResponse>> {
    let guild_id = required("guildId", body(payload)?.guild_id)?;
    state.player.leave(&guild_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// POST /api/disconnect-all
pub async fn disconnect_all(State(state): State<Arc<AppState>>) -> Json<DisconnectAllResponse> {
    info!("POST /api/disconnect-all");
    let guilds = state.player.disconnect_all().await;
    Json(DisconnectAllResponse { success: true, guilds })
}

/// POST /api/volume
pub async fn volume(State(state): State<Arc<AppState>>, payload: Payload<VolumeBody>) -> PlayerResult<Json<VolumeResponse>> {
    let req = body(payload)?;
    let guild_id = required("guildId", req.guild_id)?;
    let kind = required("kind", req.kind)?;
    let volume = required("volume", req.volume)?;

    let volume = state.player.set_volume(&guild_id, kind, volume).await?;
    Ok(Json(VolumeResponse { kind, volume }))
}

/// GET /api/state/{guildId}
pub async fn get_state(State(state): State<Arc<AppState>>, Path(guild_id): Path<String>) -> PlayerResult<Json<PlayerSnapshot>> {
    Ok(Json(state.player.state(&guild_id)?))
}

/// GET /api/tracks
pub async fn tracks(State(state): State<Arc<AppState>>) -> Json<TrackListing> {
    Json(state.player.library().list().await)
}

/// GET /api/events?guildId=
///
/// Server-sent events; cada mensaje lleva un evento en JSON.
pub async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = query.guild_id.filter(|g| !g.trim().is_empty());
    info!("GET /api/events guild={:?}", filter);
    let subscription = state.player.subscribe(filter);

    let stream = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let sse = match Event::default().json_data(&event) {
            Ok(sse) => sse,
            Err(e) => {
                warn!("No se pudo serializar evento: {}", e);
                Event::default().comment("dropped")
            }
        };
        Some((Ok(sse), subscription))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            player::{AudioPlayer, PlayerSettings},
            session::PlaybackState,
            testing::{FakeGateway, FakeTranscoder},
        },
        error::PlayerError,
        sources::LocalLibrary,
        storage::{ledger::PlaybackLedger, volume::VolumeStore},
    };
    use pretty_assertions::assert_eq;

    async fn app_state(dir: &std::path::Path) -> Arc<AppState> {
        for rel in ["music/battle/b1.opus", "soundEffects/horn.ogg"] {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"x").unwrap();
        }

        let player = Arc::new(AudioPlayer::new(
            Arc::new(FakeGateway::new()),
            Arc::new(FakeTranscoder::new(Some(60.0))),
            Arc::new(PlaybackLedger::new(dir.join("playback.json"))),
            Arc::new(VolumeStore::new(dir.join("volumes.json"))),
            LocalLibrary::new(dir, "music", "soundEffects"),
            PlayerSettings::default(),
        ));
        player.init().await;
        Arc::new(AppState { player })
    }

    fn json<T>(value: T) -> Payload<T> {
        Ok(Json(value))
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_fields_are_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        let err = join(State(state.clone()), json(JoinBody::default())).await.unwrap_err();
        assert_eq!(err, PlayerError::validation("guildId is required"));

        let err = seek(
            State(state.clone()),
            json(SeekBody {
                guild_id: Some("1".into()),
                position: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, PlayerError::validation("position is required"));

        let err = volume(
            State(state),
            json(VolumeBody {
                guild_id: Some("1".into()),
                kind: None,
                volume: Some(1.0),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, PlayerError::validation("kind is required"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_routes_effects_by_folder() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        let Json(outcome) = play(
            State(state.clone()),
            json(PlayBody {
                guild_id: Some("1".into()),
                channel: Some("2".into()),
                track: Some("soundEffects/horn.ogg".into()),
                position: None,
            }),
        )
        .await
        .unwrap();
        assert!(outcome.effect);

        let Json(outcome) = play(
            State(state.clone()),
            json(PlayBody {
                guild_id: Some("1".into()),
                channel: None,
                track: Some("music/battle/b1.opus".into()),
                position: Some(12.0),
            }),
        )
        .await
        .unwrap();
        assert!(!outcome.effect);
        assert_eq!(outcome.position, 12.0);
        assert_eq!(outcome.duration, Some(60.0));

        let Json(snapshot) = get_state(State(state), Path("1".into())).await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.channel_id.as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_and_disconnect_all() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path()).await;

        let guild = || json(GuildBody { guild_id: Some("1".into()) });
        assert!(toggle_loop(State(state.clone()), guild()).await.unwrap().enabled);
        assert!(!toggle_loop(State(state.clone()), guild()).await.unwrap().enabled);

        join(
            State(state.clone()),
            json(JoinBody {
                guild_id: Some("1".into()),
                channel: Some("2".into()),
            }),
        )
        .await
        .unwrap();
        let Json(result) = disconnect_all(State(state.clone())).await;
        assert_eq!(result.guilds, 1);

        let Json(snapshot) = get_state(State(state), Path("1".into())).await.unwrap();
        assert!(snapshot.channel_id.is_none());
    }
}
