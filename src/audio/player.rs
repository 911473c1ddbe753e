use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::audio::{
    engine::{EndReason, PlaybackEngine, PlayerFactory, TrackEvent},
    provider::Frame,
    track::Track,
};

/// Ajustes compartidos por todos los players
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub stuck_threshold: Duration,
    pub frame_buffer: usize,
    pub volume: f32,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            stuck_threshold: Duration::from_secs(10),
            frame_buffer: 50,
            volume: 1.0,
        }
    }
}

/// Lo que el worker de decodificación entrega al player
enum Decoded {
    Frame(Frame),
    Failed(String),
    LoadFailed(String),
}

struct ActiveTrack {
    track: Track,
    frames: flume::Receiver<Decoded>,
    starved_since: Option<Instant>,
    stuck_reported: bool,
}

/// Concrete [`PlaybackEngine`]: one slot, one decode worker per track.
///
/// The worker runs on the blocking pool and fills a bounded channel; the
/// transport drains it through [`PlaybackEngine::pull_frame`]. Dropping the
/// receiver when a track is replaced makes the worker's next send fail, which
/// is how it gets stopped.
pub struct AudioPlayer {
    guild_id: GuildId,
    state: Mutex<Option<ActiveTrack>>,
    events: flume::Sender<TrackEvent>,
    settings: PlayerSettings,
    runtime: Handle,
}

impl AudioPlayer {
    pub fn new(
        guild_id: GuildId,
        settings: PlayerSettings,
        runtime: Handle,
    ) -> (Self, flume::Receiver<TrackEvent>) {
        let (events, receiver) = flume::unbounded();
        let player = Self {
            guild_id,
            state: Mutex::new(None),
            events,
            settings,
            runtime,
        };
        (player, receiver)
    }

    fn emit(&self, event: TrackEvent) {
        if self.events.send(event).is_err() {
            debug!("Nadie escucha eventos del player en guild {}", self.guild_id);
        }
    }

    /// Arranca el worker y ocupa el slot. Requiere el lock de `state`.
    fn begin(&self, slot: &mut Option<ActiveTrack>, track: Track) {
        let (sender, frames) = flume::bounded(self.settings.frame_buffer);
        let source = track.source();
        let title = track.title().to_string();
        let guild_id = self.guild_id;

        self.runtime.spawn_blocking(move || {
            let mut decoder = match source.open() {
                Ok(decoder) => decoder,
                Err(e) => {
                    error!("❌ No se pudo abrir {} en guild {}: {:#}", title, guild_id, e);
                    let _ = sender.send(Decoded::LoadFailed(format!("{:#}", e)));
                    return;
                }
            };

            loop {
                let decoded = match decoder.next_frame() {
                    Ok(Some(frame)) => Decoded::Frame(frame),
                    Ok(None) => {
                        debug!("Decodificación completa: {}", title);
                        return;
                    }
                    Err(e) => Decoded::Failed(format!("{:#}", e)),
                };
                let failed = matches!(decoded, Decoded::Failed(_));
                if sender.send(decoded).is_err() {
                    debug!("Worker de {} detenido: el track ya no está activo", title);
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        info!("🎵 Iniciando {} ({}) en guild {}", track.title(), track.id(), self.guild_id);
        *slot = Some(ActiveTrack {
            track: track.clone(),
            frames,
            starved_since: None,
            stuck_reported: false,
        });
        self.emit(TrackEvent::Started(track));
    }
}

impl PlaybackEngine for AudioPlayer {
    fn try_start(&self, track: Track) -> Result<(), Track> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(track);
        }
        self.begin(&mut state, track);
        Ok(())
    }

    fn start(&self, track: Option<Track>) {
        let mut state = self.state.lock();
        if let Some(previous) = state.take() {
            let reason = if track.is_some() {
                EndReason::Replaced
            } else {
                EndReason::Stopped
            };
            self.emit(TrackEvent::Ended {
                track: previous.track,
                reason,
            });
        }
        if let Some(track) = track {
            self.begin(&mut state, track);
        }
    }

    fn pull_frame(&self) -> Option<Frame> {
        let mut state = self.state.lock();
        let active = state.as_mut()?;

        match active.frames.try_recv() {
            Ok(Decoded::Frame(frame)) => {
                active.starved_since = None;
                Some(frame.scaled(self.settings.volume))
            }
            Ok(Decoded::Failed(message)) => {
                let track = state.take()?.track;
                self.emit(TrackEvent::Errored { track, message });
                None
            }
            Ok(Decoded::LoadFailed(message)) => {
                let track = state.take()?.track;
                warn!("Carga fallida de {}: {}", track.title(), message);
                self.emit(TrackEvent::Ended {
                    track,
                    reason: EndReason::LoadFailed,
                });
                None
            }
            Err(flume::TryRecvError::Empty) => {
                let since = *active.starved_since.get_or_insert_with(Instant::now);
                if !active.stuck_reported && since.elapsed() >= self.settings.stuck_threshold {
                    active.stuck_reported = true;
                    self.emit(TrackEvent::Stuck {
                        track: active.track.clone(),
                        threshold: self.settings.stuck_threshold,
                    });
                }
                None
            }
            Err(flume::TryRecvError::Disconnected) => {
                let track = state.take()?.track;
                self.emit(TrackEvent::Ended {
                    track,
                    reason: EndReason::Finished,
                });
                None
            }
        }
    }

    fn active_track(&self) -> Option<Track> {
        self.state.lock().as_ref().map(|active| active.track.clone())
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if let Some(active) = self.state.get_mut().take() {
            let _ = self.events.send(TrackEvent::Ended {
                track: active.track,
                reason: EndReason::Cleanup,
            });
        }
    }
}

/// Crea un [`AudioPlayer`] por guild
pub struct AudioPlayerFactory {
    settings: PlayerSettings,
    runtime: Handle,
}

impl AudioPlayerFactory {
    pub fn new(settings: PlayerSettings, runtime: Handle) -> Self {
        Self { settings, runtime }
    }
}

impl PlayerFactory for AudioPlayerFactory {
    fn create_player(
        &self,
        guild_id: GuildId,
    ) -> (Arc<dyn PlaybackEngine>, flume::Receiver<TrackEvent>) {
        let (player, events) = AudioPlayer::new(guild_id, self.settings.clone(), self.runtime.clone());
        (Arc::new(player), events)
    }
}
