//! Per-guild playback sessions and the registry that owns them.

use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    audio::{
        engine::{PlaybackEngine, TrackEvent},
        provider::FrameProvider,
        scheduler::TrackScheduler,
    },
    bot::voice::VoiceGateway,
    ui::messenger::Messenger,
};

type LoadJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A load counted as pending on its session. The count drops when the slot
/// does: after its job ran, or when the job never made it onto the lane.
pub struct LoadSlot {
    pending: Arc<AtomicUsize>,
}

impl Drop for LoadSlot {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of [`SessionRegistry::checkout`].
pub struct Checkout {
    pub session: Arc<GuildSession>,
    pub slot: LoadSlot,
    /// `true` for the caller that created the session
    pub created: bool,
}

/// Everything one guild needs to play audio: the engine, its scheduler, the
/// frame adapter the voice transport reads from, and a lane that runs load
/// jobs one at a time in submission order.
pub struct GuildSession {
    guild_id: GuildId,
    engine: Arc<dyn PlaybackEngine>,
    scheduler: Arc<TrackScheduler>,
    provider: Arc<FrameProvider>,
    loads: flume::Sender<(LoadSlot, LoadJob)>,
    pending_loads: Arc<AtomicUsize>,
    token: CancellationToken,
}

impl GuildSession {
    /// Builds the session and spawns its event loop and load lane on the
    /// current runtime.
    pub fn new(
        guild_id: GuildId,
        engine: Arc<dyn PlaybackEngine>,
        events: flume::Receiver<TrackEvent>,
        voice: Arc<dyn VoiceGateway>,
        messenger: Arc<dyn Messenger>,
    ) -> Arc<Self> {
        let scheduler = Arc::new(TrackScheduler::new(
            guild_id,
            engine.clone(),
            voice,
            messenger,
        ));
        let provider = Arc::new(FrameProvider::new(engine.clone()));
        let (loads, jobs) = flume::unbounded::<(LoadSlot, LoadJob)>();
        let pending_loads = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        tokio::spawn(run_events(
            guild_id,
            scheduler.clone(),
            events,
            token.clone(),
        ));
        tokio::spawn(run_loads(guild_id, jobs, token.clone()));

        info!("🎶 Sesión de reproducción creada para guild {}", guild_id);

        Arc::new(Self {
            guild_id,
            engine,
            scheduler,
            provider,
            loads,
            pending_loads,
            token,
        })
    }

    pub fn scheduler(&self) -> &Arc<TrackScheduler> {
        &self.scheduler
    }

    pub fn provider(&self) -> &Arc<FrameProvider> {
        &self.provider
    }

    fn reserve_load(&self) -> LoadSlot {
        self.pending_loads.fetch_add(1, Ordering::SeqCst);
        LoadSlot {
            pending: self.pending_loads.clone(),
        }
    }

    /// Pone un job en la cola de carga. Devuelve `false` si la sesión ya
    /// se cerró.
    pub fn submit_load<F>(&self, slot: LoadSlot, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return false;
        }
        self.loads.send((slot, Box::pin(job))).is_ok()
    }

    pub fn pending_loads(&self) -> usize {
        self.pending_loads.load(Ordering::SeqCst)
    }

    /// Nothing playing, nothing queued, nothing being loaded.
    pub fn is_idle(&self) -> bool {
        self.pending_loads() == 0
            && self.engine.active_track().is_none()
            && self.scheduler.is_empty()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
        self.engine.start(None);
        let removed = self.scheduler.clear();
        info!(
            "🛑 Sesión cerrada en guild {} ({} tracks descartados)",
            self.guild_id, removed
        );
    }
}

async fn run_events(
    guild_id: GuildId,
    scheduler: Arc<TrackScheduler>,
    events: flume::Receiver<TrackEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv_async() => match event {
                Ok(event) => scheduler.handle_event(event),
                Err(_) => break,
            },
        }
    }
    debug!("Bucle de eventos terminado para guild {}", guild_id);
}

async fn run_loads(
    guild_id: GuildId,
    jobs: flume::Receiver<(LoadSlot, LoadJob)>,
    token: CancellationToken,
) {
    loop {
        let (_slot, job) = tokio::select! {
            _ = token.cancelled() => break,
            job = jobs.recv_async() => match job {
                Ok(job) => job,
                Err(_) => break,
            },
        };
        let cancelled = tokio::select! {
            _ = token.cancelled() => true,
            _ = job => false,
        };
        if cancelled {
            break;
        }
    }
    // Jobs still waiting after a shutdown are dropped with their slots.
    jobs.drain().for_each(drop);
    debug!("Cola de carga terminada para guild {}", guild_id);
}

/// Owner of all live sessions, keyed by guild.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devuelve la sesión del guild, creándola con `init` si no existe, y
    /// reserva en ella una carga pendiente.
    ///
    /// `init` runs at most once per guild even under concurrent callers. The
    /// slot is taken while the registry entry is still locked, so
    /// [`remove_if_idle`](Self::remove_if_idle) can't evict the session
    /// between checkout and [`GuildSession::submit_load`].
    pub fn checkout<F>(&self, guild_id: GuildId, init: F) -> Checkout
    where
        F: FnOnce() -> Arc<GuildSession>,
    {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) => {
                let session = entry.get().clone();
                let slot = session.reserve_load();
                Checkout {
                    session,
                    slot,
                    created: false,
                }
            }
            Entry::Vacant(entry) => {
                let session = init();
                let slot = session.reserve_load();
                entry.insert(session.clone());
                Checkout {
                    session,
                    slot,
                    created: true,
                }
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    /// Quita la sesión solo si está inactiva
    pub fn remove_if_idle(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions
            .remove_if(&guild_id, |_, session| session.is_idle())
            .map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
