use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{Call, Songbird};
use std::sync::Arc;
use thiserror::Error;
use tokio::{runtime::Handle, sync::Mutex};
use tracing::{debug, error, info, warn};

use crate::audio::provider::FrameProvider;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("no se pudo conectar al canal de voz: {0}")]
    Join(String),
}

/// Voice-channel side of the bot: membership, join/leave and the frame
/// source the transport pulls from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Canal de voz en el que está el bot dentro del guild
    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId>;

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError>;

    /// Sale del canal sin esperar. Idempotente.
    fn leave(&self, guild_id: GuildId);

    fn register_frame_source(&self, guild_id: GuildId, provider: Arc<FrameProvider>);

    fn unregister_frame_source(&self, guild_id: GuildId);
}

/// [`VoiceGateway`] sobre Songbird.
///
/// The registered frame source outlives the `Call`: songbird drops the call
/// on leave, so the source is re-attached on every join.
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    sources: DashMap<GuildId, Arc<FrameProvider>>,
    runtime: Handle,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>, runtime: Handle) -> Self {
        Self {
            manager,
            sources: DashMap::new(),
            runtime,
        }
    }
}

/// Reproduce el frame source como única entrada de la llamada
async fn attach(call: Arc<Mutex<Call>>, provider: Arc<FrameProvider>) {
    let mut call = call.lock().await;
    let _handle = call.play_only_input(provider.into_input());
    debug!("🔌 Frame source conectado a la llamada");
}

#[async_trait]
impl VoiceGateway for SongbirdVoice {
    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::from(channel.0))
    }

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
        let call = self.manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            VoiceError::Join(e.to_string())
        })?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        let provider = self.sources.get(&guild_id).map(|p| p.clone());
        if let Some(provider) = provider {
            attach(call, provider).await;
        }
        Ok(())
    }

    fn leave(&self, guild_id: GuildId) {
        let manager = self.manager.clone();
        self.runtime.spawn(async move {
            if manager.get(guild_id).is_none() {
                debug!("Guild {} ya no tiene llamada de voz", guild_id);
                return;
            }
            match manager.remove(guild_id).await {
                Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", guild_id),
                Err(e) => warn!("Error al salir del canal en guild {}: {:?}", guild_id, e),
            }
        });
    }

    fn register_frame_source(&self, guild_id: GuildId, provider: Arc<FrameProvider>) {
        self.sources.insert(guild_id, provider.clone());
        if let Some(call) = self.manager.get(guild_id) {
            self.runtime.spawn(attach(call, provider));
        }
    }

    fn unregister_frame_source(&self, guild_id: GuildId) {
        if self.sources.remove(&guild_id).is_some() {
            debug!("Frame source eliminado para guild {}", guild_id);
        }
    }
}
