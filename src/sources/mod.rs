pub mod ytdlp;

use async_trait::async_trait;
use std::{fmt, sync::Arc};
use url::Url;

use crate::audio::track::{Playable, TrackInfo};

pub use ytdlp::YtDlpLoader;

/// Lo que el usuario pidió reproducir
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Url(String),
    Search(String),
}

impl Query {
    /// Trims the input; `None` when nothing is left. Absolute http(s) URLs are
    /// loaded directly, anything else is searched for.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match Url::parse(text) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(Query::Url(text.to_string())),
            _ => Some(Query::Search(text.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Query::Url(text) | Query::Search(text) => text,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Un track resuelto por el loader, todavía sin petición asociada
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    pub info: TrackInfo,
    pub source: Arc<dyn Playable>,
}

impl LoadedTrack {
    pub fn new(info: TrackInfo, source: Arc<dyn Playable>) -> Self {
        Self { info, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected failures: unavailable or private media, extractor hiccups.
    Recoverable,
    /// Anything that points at a broken setup or an unsupported source.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub message: String,
    pub severity: Severity,
}

impl LoadFailure {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Recoverable,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Fatal,
        }
    }
}

/// Exactly one of these is produced per load.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    NoMatches,
    Track(LoadedTrack),
    Playlist {
        name: String,
        tracks: Vec<LoadedTrack>,
        /// Índice (desde 0) del track seleccionado en la URL
        selected: Option<usize>,
    },
    Failed(LoadFailure),
}

/// Resuelve una consulta en tracks reproducibles
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn load(&self, query: &Query) -> LoadOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_queries_are_rejected() {
        assert_eq!(Query::parse(""), None);
        assert_eq!(Query::parse("   \t "), None);
    }

    #[test]
    fn urls_and_searches_are_told_apart() {
        assert_eq!(
            Query::parse("  https://www.youtube.com/watch?v=dQw4w9WgXcQ "),
            Some(Query::Url("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()))
        );
        assert_eq!(
            Query::parse("http://example.com/song.mp3"),
            Some(Query::Url("http://example.com/song.mp3".to_string()))
        );
        assert_eq!(
            Query::parse("never gonna give you up"),
            Some(Query::Search("never gonna give you up".to_string()))
        );
        assert_eq!(
            Query::parse("ftp://example.com/song.mp3"),
            Some(Query::Search("ftp://example.com/song.mp3".to_string()))
        );
        assert_eq!(
            Query::parse("youtube.com/watch?v=x"),
            Some(Query::Search("youtube.com/watch?v=x".to_string()))
        );
    }
}
