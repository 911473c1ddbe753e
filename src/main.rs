use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod sources;
mod ui;

use crate::audio::player::AudioPlayerFactory;
use crate::bot::{coordinator::PlayCoordinator, voice::SongbirdVoice, JukeboxBot};
use crate::config::Config;
use crate::sources::YtDlpLoader;
use crate::ui::messenger::SerenityMessenger;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let runtime = Handle::current();

    // Voz: songbird compartido entre serenity y el coordinador
    let manager = Songbird::serenity();
    let voice = Arc::new(SongbirdVoice::new(manager.clone(), runtime.clone()));

    // Mensajes de estado con su propio cliente HTTP
    let http = Arc::new(Http::new(&config.discord_token));
    let messenger = Arc::new(SerenityMessenger::new(http, runtime.clone()));

    let loader = Arc::new(YtDlpLoader::new(
        reqwest::Client::new(),
        config.search_results,
        runtime.clone(),
    ));
    let players = Arc::new(AudioPlayerFactory::new(config.player_settings(), runtime));

    let coordinator = Arc::new(PlayCoordinator::new(loader, players, voice, messenger));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Crear handler del bot
    let handler = JukeboxBot::new(config.command_prefix.clone(), coordinator);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    // Manejar shutdown graceful
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // yt-dlp es la única dependencia externa
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("yt-dlp no disponible");
    }
}
