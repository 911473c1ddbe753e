use serenity::model::id::{ChannelId, UserId};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::audio::provider::Frame;
use crate::sources::LoadedTrack;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identificador único de un track dentro del proceso
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadatos de un track resuelto por el loader
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub title: String,
    pub url: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            artist: None,
            duration: None,
        }
    }

    pub fn with_artist(mut self, artist: String) -> Self {
        self.artist = Some(artist);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Where status messages for one play request are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub channel_id: ChannelId,
    pub requested_by: UserId,
}

impl RequestContext {
    pub fn new(channel_id: ChannelId, requested_by: UserId) -> Self {
        Self {
            channel_id,
            requested_by,
        }
    }
}

/// Audio that can be opened into a stream of frames.
///
/// `open` runs on a blocking worker thread owned by the player, so
/// implementations are free to do network or file I/O there.
pub trait Playable: Send + Sync + fmt::Debug {
    fn open(&self) -> anyhow::Result<Box<dyn FrameDecoder>>;
}

/// Pull-based decoder producing 20ms frames until the end of the stream.
pub trait FrameDecoder: Send {
    /// `Ok(None)` marks the natural end of the track.
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

/// A playable item bound to the request that asked for it.
///
/// The request context is part of the value from construction; it travels
/// with the track through the player and back in every lifecycle event.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    info: Arc<TrackInfo>,
    source: Arc<dyn Playable>,
    request: RequestContext,
}

impl Track {
    pub fn new(loaded: LoadedTrack, request: RequestContext) -> Self {
        Self {
            id: TrackId::next(),
            info: Arc::new(loaded.info),
            source: loaded.source,
            request,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn source(&self) -> Arc<dyn Playable> {
        self.source.clone()
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}
