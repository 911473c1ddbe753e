use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};

use crate::audio::{provider::Frame, track::Track};

/// Why a track stopped playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The decoder reached the end of the stream.
    Finished,
    /// The source could not be opened.
    LoadFailed,
    /// `start(None)` was called while the track was active.
    Stopped,
    /// Another track was started over it.
    Replaced,
    /// The player was torn down.
    Cleanup,
}

impl EndReason {
    /// Whether the scheduler should move on to the next queued track.
    pub fn may_start_next(self) -> bool {
        matches!(self, EndReason::Finished | EndReason::LoadFailed)
    }
}

/// Lifecycle events emitted by a [`PlaybackEngine`].
#[derive(Debug, Clone)]
pub enum TrackEvent {
    Started(Track),
    Stuck { track: Track, threshold: Duration },
    Errored { track: Track, message: String },
    Ended { track: Track, reason: EndReason },
}

impl TrackEvent {
    pub fn track(&self) -> &Track {
        match self {
            TrackEvent::Started(track)
            | TrackEvent::Stuck { track, .. }
            | TrackEvent::Errored { track, .. }
            | TrackEvent::Ended { track, .. } => track,
        }
    }
}

/// Decode/mix state for one active track of one guild.
///
/// The engine never holds more than one track. Events are delivered on the
/// channel returned by [`PlayerFactory::create_player`].
pub trait PlaybackEngine: Send + Sync {
    /// Starts `track` only if nothing is active. On rejection the track is
    /// handed back and the engine is left untouched.
    fn try_start(&self, track: Track) -> Result<(), Track>;

    /// Starts `track` unconditionally, ending whatever was active. `None`
    /// just stops the engine.
    fn start(&self, track: Option<Track>);

    /// Next encoded frame of the active track, if one is ready. Never blocks.
    fn pull_frame(&self) -> Option<Frame>;

    fn active_track(&self) -> Option<Track>;
}

/// Creates one engine per guild together with its event stream.
pub trait PlayerFactory: Send + Sync {
    fn create_player(
        &self,
        guild_id: GuildId,
    ) -> (Arc<dyn PlaybackEngine>, flume::Receiver<TrackEvent>);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine de prueba: registra cada llamada y emite eventos como el real
    pub struct FakeEngine {
        pub active: Mutex<Option<Track>>,
        pub started: Mutex<Vec<Option<Track>>>,
        pub pulls: AtomicUsize,
        pub frames: Mutex<Vec<Frame>>,
        events: flume::Sender<TrackEvent>,
    }

    impl FakeEngine {
        pub fn new() -> (Arc<Self>, flume::Receiver<TrackEvent>) {
            let (events, receiver) = flume::unbounded();
            let engine = Arc::new(Self {
                active: Mutex::new(None),
                started: Mutex::new(Vec::new()),
                pulls: AtomicUsize::new(0),
                frames: Mutex::new(Vec::new()),
                events,
            });
            (engine, receiver)
        }

        pub fn active_title(&self) -> Option<String> {
            self.active.lock().as_ref().map(|t| t.title().to_string())
        }

        /// Simula el final natural del track activo
        pub fn finish(&self, reason: EndReason) -> Option<Track> {
            let track = self.active.lock().take()?;
            let _ = self.events.send(TrackEvent::Ended {
                track: track.clone(),
                reason,
            });
            Some(track)
        }

        pub fn pull_count(&self) -> usize {
            self.pulls.load(Ordering::SeqCst)
        }
    }

    impl PlaybackEngine for FakeEngine {
        fn try_start(&self, track: Track) -> Result<(), Track> {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(track);
            }
            *active = Some(track.clone());
            let _ = self.events.send(TrackEvent::Started(track));
            Ok(())
        }

        fn start(&self, track: Option<Track>) {
            self.started.lock().push(track.clone());
            let mut active = self.active.lock();
            if let Some(previous) = active.take() {
                let reason = if track.is_some() {
                    EndReason::Replaced
                } else {
                    EndReason::Stopped
                };
                let _ = self.events.send(TrackEvent::Ended {
                    track: previous,
                    reason,
                });
            }
            if let Some(track) = track {
                *active = Some(track.clone());
                let _ = self.events.send(TrackEvent::Started(track));
            }
        }

        fn pull_frame(&self) -> Option<Frame> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            let mut frames = self.frames.lock();
            if frames.is_empty() {
                None
            } else {
                Some(frames.remove(0))
            }
        }

        fn active_track(&self) -> Option<Track> {
            self.active.lock().clone()
        }
    }

    pub struct FakePlayerFactory {
        pub created: Mutex<Vec<(GuildId, Arc<FakeEngine>)>>,
    }

    impl FakePlayerFactory {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                created: Mutex::new(Vec::new()),
            })
        }

        pub fn engine(&self, guild_id: GuildId) -> Option<Arc<FakeEngine>> {
            self.created
                .lock()
                .iter()
                .rev()
                .find(|(id, _)| *id == guild_id)
                .map(|(_, engine)| engine.clone())
        }
    }

    impl PlayerFactory for FakePlayerFactory {
        fn create_player(
            &self,
            guild_id: GuildId,
        ) -> (Arc<dyn PlaybackEngine>, flume::Receiver<TrackEvent>) {
            let (engine, events) = FakeEngine::new();
            self.created.lock().push((guild_id, engine.clone()));
            (engine, events)
        }
    }
}
