use anyhow::{anyhow, Context};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use songbird::input::{AudioStreamError, AuxMetadata, Compose, YoutubeDl};
use std::{sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use super::{LoadFailure, LoadOutcome, LoadedTrack, Query, TrackLoader};
use crate::audio::{
    decoder::SymphoniaDecoder,
    track::{FrameDecoder, Playable, TrackInfo},
};

/// Entrada de `yt-dlp --flat-playlist --dump-json`
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: String,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
}

/// Loader basado en yt-dlp
pub struct YtDlpLoader {
    client: reqwest::Client,
    search_results: usize,
    runtime: Handle,
}

impl YtDlpLoader {
    pub fn new(client: reqwest::Client, search_results: usize, runtime: Handle) -> Self {
        Self {
            client,
            search_results: search_results.max(1),
            runtime,
        }
    }

    fn loaded(&self, info: TrackInfo) -> LoadedTrack {
        let source = YtDlpSource {
            client: self.client.clone(),
            url: info.url.clone(),
            runtime: self.runtime.clone(),
        };
        LoadedTrack::new(info, Arc::new(source))
    }

    async fn search(&self, text: &str) -> LoadOutcome {
        info!("🔍 Buscando: {}", text);
        let mut ytdl = YoutubeDl::new_search(self.client.clone(), text.to_string());
        let results = match ytdl.search(Some(self.search_results)).await {
            Ok(results) => results,
            Err(e) => return LoadOutcome::Failed(classify(e)),
        };

        let first = results
            .into_iter()
            .find_map(|meta| info_from_metadata(meta, None));
        match first {
            Some(info) => {
                debug!("Primer resultado para '{}': {}", text, info.title);
                LoadOutcome::Track(self.loaded(info))
            }
            None => LoadOutcome::NoMatches,
        }
    }

    async fn single(&self, url: &str) -> LoadOutcome {
        info!("🔗 Cargando URL: {}", url);
        let mut ytdl = YoutubeDl::new(self.client.clone(), url.to_string());
        match ytdl.aux_metadata().await {
            Ok(meta) => match info_from_metadata(meta, Some(url)) {
                Some(info) => LoadOutcome::Track(self.loaded(info)),
                None => LoadOutcome::NoMatches,
            },
            Err(e) => LoadOutcome::Failed(classify(e)),
        }
    }

    async fn playlist(&self, url: &str, name: String, index: Option<usize>) -> LoadOutcome {
        info!("📋 Obteniendo playlist: {}", url);
        let output = match Command::new("yt-dlp")
            .args(["--flat-playlist", "--dump-json", "--no-warnings", url])
            .output()
            .await
            .context("Error al ejecutar yt-dlp")
        {
            Ok(output) => output,
            Err(e) => return LoadOutcome::Failed(LoadFailure::fatal(format!("{:#}", e))),
        };

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló con la playlist {}: {}", name, error.trim());
            return LoadOutcome::Failed(LoadFailure::recoverable(error.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tracks: Vec<LoadedTrack> = parse_playlist(&stdout)
            .into_iter()
            .map(|info| self.loaded(info))
            .collect();

        if tracks.is_empty() {
            return LoadOutcome::NoMatches;
        }

        info!("📋 Playlist {} con {} tracks", name, tracks.len());
        let selected = index.and_then(|i| i.checked_sub(1)).filter(|i| *i < tracks.len());
        LoadOutcome::Playlist {
            name,
            tracks,
            selected,
        }
    }
}

#[async_trait]
impl TrackLoader for YtDlpLoader {
    async fn load(&self, query: &Query) -> LoadOutcome {
        match query {
            Query::Search(text) => self.search(text).await,
            Query::Url(url) => match playlist_params(url) {
                Some((name, index)) => self.playlist(url, name, index).await,
                None => self.single(url).await,
            },
        }
    }
}

/// `list` id and 1-based `index` of a playlist URL, if it is one.
fn playlist_params(url: &str) -> Option<(String, Option<usize>)> {
    let url = Url::parse(url).ok()?;
    let mut list = None;
    let mut index = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "list" if !value.is_empty() => list = Some(value.into_owned()),
            "index" => index = value.parse::<usize>().ok(),
            _ => {}
        }
    }
    list.map(|list| (list, index))
}

fn parse_playlist(stdout: &str) -> Vec<TrackInfo> {
    stdout
        .lines()
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Línea de playlist ignorada: {}", e);
                None
            }
        })
        .map(|entry| {
            let url = entry
                .url
                .filter(|u| u.starts_with("http"))
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", entry.id));
            let mut info = TrackInfo::new(entry.title.unwrap_or_else(|| url.clone()), url);
            if let Some(artist) = entry.uploader {
                info = info.with_artist(artist);
            }
            if let Some(duration) = entry.duration.filter(|d| d.is_finite() && *d >= 0.0) {
                info = info.with_duration(Duration::from_secs_f64(duration));
            }
            info
        })
        .collect()
}

fn info_from_metadata(meta: AuxMetadata, fallback_url: Option<&str>) -> Option<TrackInfo> {
    let url = meta.source_url.or_else(|| fallback_url.map(str::to_string))?;
    let mut info = TrackInfo::new(meta.title.unwrap_or_else(|| url.clone()), url);
    if let Some(artist) = meta.artist {
        info = info.with_artist(artist);
    }
    if let Some(duration) = meta.duration {
        info = info.with_duration(duration);
    }
    Some(info)
}

/// yt-dlp refusing a video is the user's problem; a source songbird can't
/// handle at all is ours.
fn classify(error: AudioStreamError) -> LoadFailure {
    match error {
        AudioStreamError::Fail(e) => LoadFailure::recoverable(e.to_string()),
        AudioStreamError::RetryIn(wait) => LoadFailure::recoverable(format!(
            "temporarily unavailable, retry in {}s",
            wait.as_secs()
        )),
        other => LoadFailure::fatal(other.to_string()),
    }
}

/// Stream resuelto con yt-dlp al momento de reproducir
#[derive(Debug)]
pub struct YtDlpSource {
    client: reqwest::Client,
    url: String,
    runtime: Handle,
}

impl Playable for YtDlpSource {
    fn open(&self) -> anyhow::Result<Box<dyn FrameDecoder>> {
        let mut ytdl = YoutubeDl::new(self.client.clone(), self.url.clone());
        let stream = self
            .runtime
            .block_on(ytdl.create_async())
            .map_err(|e| anyhow!("yt-dlp no pudo abrir {}: {}", self.url, e))?;
        let decoder = SymphoniaDecoder::new(stream.input, stream.hint.unwrap_or_default())?;
        Ok(Box::new(decoder))
    }
}
