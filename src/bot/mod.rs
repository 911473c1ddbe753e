//! # Bot Module
//!
//! Discord side of Guild Jukebox.
//!
//! - [`JukeboxBot`] implements Serenity's [`EventHandler`]: it turns
//!   `<prefix>play <query>` messages into [`PlayRequest`]s and releases a
//!   guild's session when the bot is disconnected from voice.
//! - [`coordinator`] validates requests, joins voice and applies loads.
//! - [`voice`] wraps songbird behind the [`voice::VoiceGateway`] trait.

use serenity::{
    all::{Context, EventHandler, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
    model::id::ChannelId,
};
use std::sync::Arc;
use tracing::{debug, info};

pub mod coordinator;
pub mod voice;

use crate::{
    audio::track::RequestContext,
    bot::coordinator::{PlayCoordinator, PlayRequest},
};

/// Comandos de texto que entiende el bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
}

impl Command {
    /// `None` if the message isn't addressed to the bot or the command is
    /// unknown.
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        match name.to_lowercase().as_str() {
            "play" => Some(Command::Play(args.to_string())),
            _ => None,
        }
    }
}

/// Main Discord event handler.
pub struct JukeboxBot {
    prefix: String,
    coordinator: Arc<PlayCoordinator>,
}

impl JukeboxBot {
    pub fn new(prefix: String, coordinator: Arc<PlayCoordinator>) -> Self {
        Self {
            prefix,
            coordinator,
        }
    }

    /// Canal de voz del autor según la caché
    fn requester_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let guild = ctx.cache.guild(guild_id)?;
        guild.voice_states.get(&user_id)?.channel_id
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(Command::Play(query)) = Command::parse(&msg.content, &self.prefix) else {
            return;
        };

        info!("🎵 play '{}' de {} en guild {}", query, msg.author.name, guild_id);
        let request = PlayRequest {
            guild_id,
            requester_channel: Self::requester_channel(&ctx, guild_id, msg.author.id),
            reply: RequestContext::new(msg.channel_id, msg.author.id),
            query,
        };

        match self.coordinator.handle_play_request(request).await {
            Ok(_pending) => debug!("Carga en curso para guild {}", guild_id),
            Err(e) => debug!("Petición rechazada en guild {}: {}", guild_id, e),
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.coordinator.release(guild_id);
        }
    }
}
