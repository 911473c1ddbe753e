//! Entry point for play requests: validates the caller, makes sure the bot
//! is in voice, and turns loader outcomes into queue entries and replies.

use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        engine::PlayerFactory,
        scheduler::{Enqueued, TrackScheduler},
        session::{Checkout, GuildSession, SessionRegistry},
        track::{RequestContext, Track},
    },
    bot::voice::{VoiceError, VoiceGateway},
    sources::{LoadOutcome, Query, Severity, TrackLoader},
    ui::messenger::Messenger,
};

/// Una petición `play` tal como llega del chat
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub guild_id: GuildId,
    /// Canal de voz del usuario, si está en alguno
    pub requester_channel: Option<ChannelId>,
    pub reply: RequestContext,
    pub query: String,
}

#[derive(Debug, Error)]
pub enum PlayError {
    #[error("el usuario no está en un canal de voz")]
    NotInVoiceChannel,
    #[error("consulta vacía")]
    EmptyQuery,
    #[error(transparent)]
    Join(#[from] VoiceError),
}

/// Cómo terminó una carga
#[derive(Debug, Clone, PartialEq)]
pub enum LoadReport {
    NoMatches,
    Queued(Enqueued),
    Failed(Severity),
}

/// Handle to a load submitted to a guild's load lane.
pub struct PendingLoad {
    receiver: oneshot::Receiver<LoadReport>,
}

impl PendingLoad {
    /// `None` if the session was shut down before the load was applied.
    pub async fn wait(self) -> Option<LoadReport> {
        self.receiver.await.ok()
    }
}

pub struct PlayCoordinator {
    sessions: SessionRegistry,
    loader: Arc<dyn TrackLoader>,
    players: Arc<dyn PlayerFactory>,
    voice: Arc<dyn VoiceGateway>,
    messenger: Arc<dyn Messenger>,
}

impl PlayCoordinator {
    pub fn new(
        loader: Arc<dyn TrackLoader>,
        players: Arc<dyn PlayerFactory>,
        voice: Arc<dyn VoiceGateway>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            loader,
            players,
            voice,
            messenger,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Handles `play <query>`.
    ///
    /// Returns once the request is accepted and its load is queued on the
    /// guild's load lane; the load itself finishes in the background and is
    /// reported through the returned [`PendingLoad`]. Loads for one guild are
    /// applied in the order they were accepted.
    pub async fn handle_play_request(&self, request: PlayRequest) -> Result<PendingLoad, PlayError> {
        let PlayRequest {
            guild_id,
            requester_channel,
            reply,
            query,
        } = request;

        let Some(query) = Query::parse(&query) else {
            self.messenger
                .send_error(&reply, "Tell me what to play".to_string());
            return Err(PlayError::EmptyQuery);
        };

        if self.voice.current_channel(guild_id).await.is_none() {
            let Some(channel_id) = requester_channel else {
                self.messenger
                    .send_error(&reply, "You are not in a voice channel!".to_string());
                return Err(PlayError::NotInVoiceChannel);
            };
            if let Err(e) = self.voice.join(guild_id, channel_id).await {
                warn!("No se pudo unir al canal {} en guild {}: {}", channel_id, guild_id, e);
                self.messenger.send_error(
                    &reply,
                    format!("I couldn't join your voice channel: {}", e),
                );
                return Err(e.into());
            }
        }

        let Checkout { session, slot, .. } = self.checkout(guild_id);
        let (sender, receiver) = oneshot::channel();
        let loader = self.loader.clone();
        let messenger = self.messenger.clone();
        let scheduler = session.scheduler().clone();

        debug!(
            "📥 Carga aceptada en guild {} para {}: {}",
            guild_id, reply.requested_by, query
        );
        let submitted = session.submit_load(slot, async move {
            let outcome = loader.load(&query).await;
            let report = apply_outcome(outcome, &query, &reply, &scheduler, messenger.as_ref());
            let _ = sender.send(report);
        });
        if !submitted {
            warn!("La sesión de guild {} se cerró antes de aceptar la carga", guild_id);
            self.messenger.send_error(
                &reply,
                "Something went horribly wrong: the player shut down".to_string(),
            );
        }

        Ok(PendingLoad { receiver })
    }

    /// Devuelve la sesión del guild con una carga reservada, creándola y
    /// conectando su frame provider al transporte de voz la primera vez.
    fn checkout(&self, guild_id: GuildId) -> Checkout {
        let checkout = self.sessions.checkout(guild_id, || {
            let (engine, events) = self.players.create_player(guild_id);
            GuildSession::new(
                guild_id,
                engine,
                events,
                self.voice.clone(),
                self.messenger.clone(),
            )
        });
        if checkout.created {
            self.voice
                .register_frame_source(guild_id, checkout.session.provider().clone());
        }
        checkout
    }

    /// Drops the guild's session if nothing is playing, queued or loading.
    /// Called when the bot has left the guild's voice channel.
    pub fn release(&self, guild_id: GuildId) -> bool {
        match self.sessions.remove_if_idle(guild_id) {
            Some(session) => {
                session.shutdown();
                self.voice.unregister_frame_source(guild_id);
                info!(
                    "🧹 Sesión liberada en guild {} ({} sesiones activas)",
                    guild_id,
                    self.sessions.len()
                );
                true
            }
            None => {
                debug!("Guild {} sin sesión inactiva que liberar", guild_id);
                false
            }
        }
    }
}

/// Applies one loader outcome: at most one track is enqueued and exactly one
/// reply is sent.
fn apply_outcome(
    outcome: LoadOutcome,
    query: &Query,
    reply: &RequestContext,
    scheduler: &TrackScheduler,
    messenger: &dyn Messenger,
) -> LoadReport {
    match outcome {
        LoadOutcome::NoMatches => no_matches(query, reply, messenger),
        LoadOutcome::Track(loaded) => {
            let track = Track::new(loaded, *reply);
            let title = track.title().to_string();
            let enqueued = scheduler.enqueue(track);
            messenger.send_success(reply, format!("Added {} to the queue!", title));
            LoadReport::Queued(enqueued)
        }
        LoadOutcome::Playlist {
            name,
            tracks,
            selected,
        } => {
            let len = tracks.len();
            let index = selected.filter(|i| *i < len).unwrap_or(0);
            let Some(loaded) = tracks.into_iter().nth(index) else {
                return no_matches(query, reply, messenger);
            };
            let track = Track::new(loaded, *reply);
            info!("📋 Playlist {}: añadiendo solo {} de {} tracks", name, track.title(), len);
            messenger.send_success(
                reply,
                format!("Added {} (first track of playlist {})", track.title(), name),
            );
            LoadReport::Queued(scheduler.enqueue(track))
        }
        LoadOutcome::Failed(failure) => {
            let text = match failure.severity {
                Severity::Recoverable => format!("Sorry, I can't play that: {}", failure.message),
                Severity::Fatal => format!("Something went horribly wrong: {}", failure.message),
            };
            warn!("Carga fallida para '{}': {}", query, failure.message);
            messenger.send_error(reply, text);
            LoadReport::Failed(failure.severity)
        }
    }
}

fn no_matches(query: &Query, reply: &RequestContext, messenger: &dyn Messenger) -> LoadReport {
    messenger.send_error(reply, format!("Couldn't find anything for {}", query));
    LoadReport::NoMatches
}
