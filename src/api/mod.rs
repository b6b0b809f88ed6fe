//! HTTP control surface.
//!
//! Every route is a thin adapter over [`AudioPlayer`]: parse the JSON body,
//! call one operation, map [`crate::error::PlayerError`] to a status code.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod handlers;
pub mod models;

use crate::audio::player::AudioPlayer;

pub struct AppState {
    pub player: Arc<AudioPlayer>,
}

const API: &str = "/api";

pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/join", post(handlers::join))
        .route("/play", post(handlers::play))
        .route("/sfx", post(handlers::sfx))
        .route("/pause", post(handlers::pause))
        .route("/resume", post(handlers::resume))
        .route("/seek", post(handlers::seek))
        .route("/stop", post(handlers::stop))
        .route("/loop", post(handlers::toggle_loop))
        .route("/leave", post(handlers::leave))
        .route("/disconnect-all", post(handlers::disconnect_all))
        .route("/volume", post(handlers::volume))
        .route("/state/{guild_id}", get(handlers::get_state))
        .route("/tracks", get(handlers::tracks))
        .route("/events", get(handlers::events));

    Router::new()
        .nest(API, api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
