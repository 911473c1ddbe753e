//! Per-guild FIFO queue and single-flight playback driver.
//!
//! The scheduler is the only caller of [`PlaybackEngine::start`], and it only
//! calls it from [`TrackScheduler::advance`]. New tracks go through the
//! non-interrupting [`PlaybackEngine::try_start`], so the engine never holds
//! more than one track and the queue never contains the active one.
//!
//! `enqueue` and `advance` serialize on the queue lock. A rejected
//! `try_start` therefore always lands in the queue before a concurrent
//! `advance` looks at it, and a track can't be stranded in the queue of an
//! idle engine.

use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        engine::{EndReason, PlaybackEngine, TrackEvent},
        queue::TrackQueue,
        track::{Track, TrackInfo},
    },
    bot::voice::VoiceGateway,
    ui::{embeds::describe_track, messenger::Messenger},
};

/// Resultado de `enqueue`
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// El engine estaba libre y el track empezó de inmediato
    Started,
    /// Posición en la cola, empezando en 1
    Queued { position: usize },
}

/// Resultado de `advance`
#[derive(Debug, Clone, PartialEq)]
pub enum Advanced {
    Started(TrackInfo),
    Vacated,
}

pub struct TrackScheduler {
    guild_id: GuildId,
    engine: Arc<dyn PlaybackEngine>,
    queue: Mutex<TrackQueue>,
    voice: Arc<dyn VoiceGateway>,
    messenger: Arc<dyn Messenger>,
}

impl TrackScheduler {
    pub fn new(
        guild_id: GuildId,
        engine: Arc<dyn PlaybackEngine>,
        voice: Arc<dyn VoiceGateway>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            guild_id,
            engine,
            queue: Mutex::new(TrackQueue::new()),
            voice,
            messenger,
        }
    }

    /// Reproduce el track si el engine está libre; si no, lo pone en cola.
    pub fn enqueue(&self, track: Track) -> Enqueued {
        let mut queue = self.queue.lock();
        match self.engine.try_start(track) {
            Ok(()) => {
                debug!("Engine libre en guild {}, reproducción inmediata", self.guild_id);
                Enqueued::Started
            }
            Err(track) => Enqueued::Queued {
                position: queue.push(track),
            },
        }
    }

    /// Starts the oldest queued track, interrupting whatever is active, or
    /// vacates the voice channel when the queue is empty.
    pub fn advance(&self) -> Advanced {
        let mut queue = self.queue.lock();
        match queue.pop() {
            Some(next) => {
                let info = next.info().clone();
                debug!("Quedan {} tracks en cola en guild {}", queue.len(), self.guild_id);
                self.engine.start(Some(next));
                Advanced::Started(info)
            }
            None => {
                info!("🚪 Cola terminada, saliendo del canal en guild {}", self.guild_id);
                self.voice.leave(self.guild_id);
                Advanced::Vacated
            }
        }
    }

    /// Reacciona a un evento del engine. Nunca propaga errores.
    ///
    /// Stuck, errored and continuation-permitting ended events for a track
    /// that is no longer the active one are ignored instead of advancing
    /// while the engine plays a different track.
    pub fn handle_event(&self, event: TrackEvent) {
        if self.is_stale(&event) {
            debug!(
                "Evento obsoleto para {} en guild {}, ignorado",
                event.track().id(),
                self.guild_id
            );
            return;
        }

        match event {
            TrackEvent::Started(track) => {
                info!("▶️ Reproduciendo: {} en guild {}", track.title(), self.guild_id);
                self.messenger.send_success(
                    track.request(),
                    format!("Now playing {}", describe_track(track.info())),
                );
            }
            TrackEvent::Stuck { track, threshold } => {
                warn!(
                    "⏳ {} atascado más de {}ms en guild {}",
                    track.title(),
                    threshold.as_millis(),
                    self.guild_id
                );
                self.advance();
                self.messenger.send_error(
                    track.request(),
                    "The music got stuck, skipping to the next song...".to_string(),
                );
            }
            TrackEvent::Errored { track, message } => {
                warn!("❌ Error en {} en guild {}: {}", track.title(), self.guild_id, message);
                self.advance();
                self.messenger.send_error(
                    track.request(),
                    format!(
                        "Something went wrong while playing {}:\n```{}```\nWill skip to the next song.",
                        track.title(),
                        message
                    ),
                );
            }
            TrackEvent::Ended { track, reason } => {
                debug!("⏹️ {} terminó ({:?}) en guild {}", track.title(), reason, self.guild_id);
                if reason.may_start_next() {
                    self.advance();
                }
            }
        }
    }

    /// An event is stale when the engine is already busy with a different
    /// track: the continuation it would trigger has already happened.
    fn is_stale(&self, event: &TrackEvent) -> bool {
        if matches!(
            event,
            TrackEvent::Started(_)
                | TrackEvent::Ended {
                    reason: EndReason::Replaced | EndReason::Stopped | EndReason::Cleanup,
                    ..
                }
        ) {
            return false;
        }
        match self.engine.active_track() {
            Some(active) => active.id() != event.track().id(),
            None => false,
        }
    }

    #[cfg(test)]
    pub fn queued(&self) -> Vec<Track> {
        self.queue.lock().snapshot()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        self.queue.lock().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{engine::testing::FakeEngine, track::testing::track},
        bot::voice::MockVoiceGateway,
        ui::messenger::MockMessenger,
    };
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn quiet_messenger() -> MockMessenger {
        let mut messenger = MockMessenger::new();
        messenger.expect_send_success().returning(|_, _| ());
        messenger.expect_send_error().returning(|_, _| ());
        messenger
    }

    fn never_leaves() -> MockVoiceGateway {
        let mut voice = MockVoiceGateway::new();
        voice.expect_leave().never();
        voice
    }

    fn scheduler(
        engine: Arc<FakeEngine>,
        voice: MockVoiceGateway,
        messenger: MockMessenger,
    ) -> TrackScheduler {
        TrackScheduler::new(guild(), engine, Arc::new(voice), Arc::new(messenger))
    }

    fn queued_titles(scheduler: &TrackScheduler) -> Vec<String> {
        scheduler
            .queued()
            .iter()
            .map(|t| t.title().to_string())
            .collect()
    }

    #[test]
    fn first_enqueue_on_idle_engine_starts_immediately() {
        let (engine, _events) = FakeEngine::new();
        let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());

        assert_eq!(scheduler.enqueue(track("t1")), Enqueued::Started);
        assert_eq!(engine.active_title(), Some("t1".to_string()));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn later_enqueues_land_in_call_order() {
        let (engine, _events) = FakeEngine::new();
        let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());

        let results: Vec<Enqueued> = ["t1", "t2", "t3", "t4"]
            .iter()
            .map(|title| scheduler.enqueue(track(title)))
            .collect();

        assert_eq!(
            results,
            vec![
                Enqueued::Started,
                Enqueued::Queued { position: 1 },
                Enqueued::Queued { position: 2 },
                Enqueued::Queued { position: 3 },
            ]
        );
        assert_eq!(engine.active_title(), Some("t1".to_string()));
        assert_eq!(queued_titles(&scheduler), vec!["t2", "t3", "t4"]);
        assert!(engine.started.lock().is_empty());
    }

    #[test]
    fn advance_starts_the_oldest_queued_track() {
        let (engine, _events) = FakeEngine::new();
        let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());
        for title in ["t1", "t2", "t3", "t4"] {
            scheduler.enqueue(track(title));
        }

        let advanced = scheduler.advance();

        assert!(matches!(advanced, Advanced::Started(info) if info.title == "t2"));
        assert_eq!(engine.active_title(), Some("t2".to_string()));
        assert_eq!(queued_titles(&scheduler), vec!["t3", "t4"]);
    }

    #[test]
    fn advance_on_empty_queue_vacates_once_per_call() {
        let (engine, _events) = FakeEngine::new();
        let mut voice = MockVoiceGateway::new();
        voice.expect_leave().with(eq(guild())).times(2).returning(|_| ());
        let scheduler = scheduler(engine.clone(), voice, quiet_messenger());

        assert_eq!(scheduler.advance(), Advanced::Vacated);
        assert_eq!(scheduler.advance(), Advanced::Vacated);
        assert_eq!(engine.active_title(), None);
        assert!(engine.started.lock().is_empty());
    }

    #[test]
    fn finished_track_advances_to_next() {
        let (engine, events) = FakeEngine::new();
        let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());
        for title in ["t1", "t2", "t3"] {
            scheduler.enqueue(track(title));
        }
        events.drain();

        engine.finish(EndReason::Finished);
        for event in events.drain() {
            scheduler.handle_event(event);
        }

        assert_eq!(engine.active_title(), Some("t2".to_string()));
        assert_eq!(queued_titles(&scheduler), vec!["t3"]);
    }

    #[test]
    fn load_failure_also_continues() {
        let (engine, events) = FakeEngine::new();
        let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());
        scheduler.enqueue(track("t1"));
        scheduler.enqueue(track("t2"));
        events.drain();

        engine.finish(EndReason::LoadFailed);
        for event in events.drain() {
            scheduler.handle_event(event);
        }

        assert_eq!(engine.active_title(), Some("t2".to_string()));
    }

    #[test]
    fn last_track_finishing_vacates_the_channel() {
        let (engine, events) = FakeEngine::new();
        let mut voice = MockVoiceGateway::new();
        voice.expect_leave().times(1).returning(|_| ());
        let scheduler = scheduler(engine.clone(), voice, quiet_messenger());
        scheduler.enqueue(track("t1"));
        events.drain();

        engine.finish(EndReason::Finished);
        for event in events.drain() {
            scheduler.handle_event(event);
        }

        assert_eq!(engine.active_title(), None);
    }

    #[test]
    fn replaced_or_stopped_tracks_do_not_continue() {
        for reason in [EndReason::Replaced, EndReason::Stopped, EndReason::Cleanup] {
            let (engine, _events) = FakeEngine::new();
            let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());
            scheduler.enqueue(track("t1"));
            scheduler.enqueue(track("t2"));
            let t1 = engine.active_track().unwrap();

            scheduler.handle_event(TrackEvent::Ended { track: t1, reason });

            assert_eq!(engine.active_title(), Some("t1".to_string()));
            assert_eq!(queued_titles(&scheduler), vec!["t2"]);
        }
    }

    #[test]
    fn replacement_end_event_from_advance_is_ignored() {
        let (engine, events) = FakeEngine::new();
        let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());
        for title in ["t1", "t2", "t3"] {
            scheduler.enqueue(track(title));
        }
        events.drain();

        scheduler.advance();
        // El engine emite Ended(Replaced) para t1 y Started para t2
        for event in events.drain() {
            scheduler.handle_event(event);
        }

        assert_eq!(engine.active_title(), Some("t2".to_string()));
        assert_eq!(queued_titles(&scheduler), vec!["t3"]);
    }

    #[test]
    fn started_event_announces_now_playing() {
        let (engine, events) = FakeEngine::new();
        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_success()
            .withf(|ctx, text| ctx.channel_id.get() == 10 && text.contains("Now playing") && text.contains("t1"))
            .times(1)
            .returning(|_, _| ());
        messenger.expect_send_error().never();
        let scheduler = scheduler(engine.clone(), never_leaves(), messenger);

        scheduler.enqueue(track("t1"));
        for event in events.drain() {
            scheduler.handle_event(event);
        }
    }

    #[test]
    fn stuck_track_is_skipped_with_a_notice() {
        let (engine, events) = FakeEngine::new();
        let mut messenger = MockMessenger::new();
        messenger.expect_send_success().returning(|_, _| ());
        messenger
            .expect_send_error()
            .withf(|_, text| text.contains("stuck"))
            .times(1)
            .returning(|_, _| ());
        let scheduler = scheduler(engine.clone(), never_leaves(), messenger);
        scheduler.enqueue(track("t1"));
        scheduler.enqueue(track("t2"));
        events.drain();

        let t1 = engine.active_track().unwrap();
        scheduler.handle_event(TrackEvent::Stuck {
            track: t1,
            threshold: Duration::from_secs(10),
        });

        assert_eq!(engine.active_title(), Some("t2".to_string()));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn errored_track_is_skipped_with_the_error_message() {
        let (engine, events) = FakeEngine::new();
        let mut messenger = MockMessenger::new();
        messenger.expect_send_success().returning(|_, _| ());
        messenger
            .expect_send_error()
            .withf(|_, text| text.contains("t1") && text.contains("decoder exploded"))
            .times(1)
            .returning(|_, _| ());
        let scheduler = scheduler(engine.clone(), never_leaves(), messenger);
        scheduler.enqueue(track("t1"));
        scheduler.enqueue(track("t2"));
        events.drain();

        // El engine real libera el slot antes de emitir Errored
        let t1 = engine.active.lock().take().unwrap();
        scheduler.handle_event(TrackEvent::Errored {
            track: t1,
            message: "decoder exploded".to_string(),
        });

        assert_eq!(engine.active_title(), Some("t2".to_string()));
    }

    #[test]
    fn stale_finish_does_not_skip_the_new_track() {
        let (engine, events) = FakeEngine::new();
        let scheduler = scheduler(engine.clone(), never_leaves(), quiet_messenger());
        scheduler.enqueue(track("t1"));
        let t1 = engine.finish(EndReason::Finished).unwrap();
        // t2 llega antes de que se procese el final de t1
        scheduler.enqueue(track("t2"));
        scheduler.enqueue(track("t3"));
        events.drain();

        scheduler.handle_event(TrackEvent::Ended {
            track: t1,
            reason: EndReason::Finished,
        });

        assert_eq!(engine.active_title(), Some("t2".to_string()));
        assert_eq!(queued_titles(&scheduler), vec!["t3"]);
    }

    #[test]
    fn concurrent_enqueues_lose_nothing() {
        let (engine, _events) = FakeEngine::new();
        let scheduler = Arc::new(scheduler(engine.clone(), never_leaves(), quiet_messenger()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        scheduler.enqueue(track(&format!("{i}-{j}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(engine.active_track().is_some());
        assert_eq!(scheduler.len(), 8 * 25 - 1);
    }

    #[test]
    fn concurrent_enqueue_and_advance_deliver_each_track_once() {
        let (engine, events) = FakeEngine::new();
        let mut voice = MockVoiceGateway::new();
        voice.expect_leave().returning(|_| ());
        let scheduler = Arc::new(scheduler(engine, voice, quiet_messenger()));

        let producers: Vec<_> = (0..4)
            .map(|i| {
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        scheduler.enqueue(track(&format!("{i}-{j}")));
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    for _ in 0..30 {
                        scheduler.advance();
                    }
                })
            })
            .collect();
        for handle in producers.into_iter().chain(consumers) {
            handle.join().unwrap();
        }

        let mut delivered: Vec<String> = events
            .drain()
            .filter_map(|event| match event {
                TrackEvent::Started(track) => Some(track.title().to_string()),
                _ => None,
            })
            .collect();
        delivered.extend(queued_titles(&scheduler));
        delivered.sort();

        let mut expected: Vec<String> = (0..4)
            .flat_map(|i| (0..50).map(move |j| format!("{i}-{j}")))
            .collect();
        expected.sort();
        assert_eq!(delivered, expected);
    }
}
