use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;

use crate::audio::player::{AudioPlayer, PlayerSettings};
use crate::audio::transcode::FfmpegTranscoder;
use crate::bot::{voice::SongbirdGateway, GuardianBot};
use crate::config::Config;
use crate::sources::LocalLibrary;
use crate::storage::{ledger::PlaybackLedger, volume::VolumeStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("olde_guardian=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🛡️ Iniciando Olde Guardian v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
        config.probe_timeout(),
    ));
    if let Err(e) = transcoder.verify_dependencies().await {
        warn!("⚠️ {} - la reproducción fallará hasta que esté instalado", e);
    }

    // Voz: songbird se comparte entre el cliente y el conector del player
    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));
    let gateway = Arc::new(SongbirdGateway::new(songbird.clone(), http, config.output_format()));

    let player = Arc::new(AudioPlayer::new(
        gateway,
        transcoder,
        Arc::new(PlaybackLedger::new(config.ledger_path())),
        Arc::new(VolumeStore::new(config.volume_path())),
        LocalLibrary::new(
            config.media_root.clone(),
            config.music_dir.clone(),
            config.effects_dir.clone(),
        ),
        PlayerSettings {
            save_interval: config.progress_save_interval(),
            connect_timeout: config.voice_connect_timeout(),
            output: config.output_format(),
            ..PlayerSettings::default()
        },
    ));
    player.init().await;

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(GuardianBot::new(player.clone()))
        .register_songbird_with(songbird)
        .await?;

    // API HTTP
    let shutdown = CancellationToken::new();
    let listener = tokio::net::TcpListener::bind(config.http_bind).await?;
    info!("🌐 API escuchando en http://{}", config.http_bind);

    let app = api::router(Arc::new(api::AppState { player: player.clone() }));
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!("Error en el servidor HTTP: {:?}", e);
        }
    });

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        player.disconnect_all().await;
        signal_shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }
    shutdown.cancel();

    if let Err(e) = server.await {
        error!("La tarea del servidor HTTP terminó mal: {:?}", e);
    }
    Ok(())
}
