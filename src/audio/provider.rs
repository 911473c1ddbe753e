//! Pull-side adapter between a guild's [`PlaybackEngine`] and the voice
//! transport.
//!
//! The transport asks two separate questions every 20ms: "is there a frame?"
//! and "give me the frame". The engine can only answer both at once by
//! pulling, so [`FrameProvider`] keeps at most one pulled frame around between
//! the two calls.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use songbird::input::{Input, RawAdapter};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};
use symphonia::core::io::MediaSource;

use crate::audio::engine::PlaybackEngine;

/// Salida de Discord: 48kHz estéreo
pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// Muestras por canal en un frame de 20ms
pub const FRAME_SAMPLES: usize = 960;
/// Bytes de un frame: f32 LE intercalado
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * std::mem::size_of::<f32>();

/// 20ms of interleaved stereo f32 PCM at 48kHz, little endian.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Encodes interleaved stereo samples. Short input is padded with silence.
    pub fn from_samples(samples: &[f32]) -> Self {
        let mut data = BytesMut::with_capacity(FRAME_BYTES);
        for i in 0..FRAME_SAMPLES * CHANNELS {
            data.put_f32_le(samples.get(i).copied().unwrap_or(0.0));
        }
        Self {
            data: data.freeze(),
        }
    }

    pub fn silence() -> Self {
        Self {
            data: Bytes::from(vec![0u8; FRAME_BYTES]),
        }
    }

    #[cfg(test)]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Scales every sample by `gain`.
    pub fn scaled(self, gain: f32) -> Self {
        if (gain - 1.0).abs() < f32::EPSILON {
            return self;
        }
        let samples: Vec<f32> = self
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) * gain)
            .collect();
        Self::from_samples(&samples)
    }
}

/// One-frame lookahead over [`PlaybackEngine::pull_frame`].
pub struct FrameProvider {
    engine: Arc<dyn PlaybackEngine>,
    last_frame: Mutex<Option<Frame>>,
}

impl FrameProvider {
    pub fn new(engine: Arc<dyn PlaybackEngine>) -> Self {
        Self {
            engine,
            last_frame: Mutex::new(None),
        }
    }

    /// Pulls a frame into the cache if it is empty and reports whether one is held.
    pub fn can_provide(&self) -> bool {
        let mut last = self.last_frame.lock();
        if last.is_none() {
            *last = self.engine.pull_frame();
        }
        last.is_some()
    }

    /// Hands out the cached frame, pulling first when nothing is cached.
    pub fn provide(&self) -> Option<Bytes> {
        let mut last = self.last_frame.lock();
        if last.is_none() {
            *last = self.engine.pull_frame();
        }
        last.take().map(Frame::into_data)
    }

    /// Live songbird input reading from this provider.
    pub fn into_input(self: Arc<Self>) -> Input {
        RawAdapter::new(FrameStream::new(self), SAMPLE_RATE, CHANNELS as u32).into()
    }
}

/// Endless byte stream over a [`FrameProvider`].
///
/// Gaps are filled with silence so the live input never hits EOF while the
/// guild is idle or a track is still loading.
pub struct FrameStream {
    provider: Arc<FrameProvider>,
    pending: Bytes,
}

impl FrameStream {
    pub fn new(provider: Arc<FrameProvider>) -> Self {
        Self {
            provider,
            pending: Bytes::new(),
        }
    }

    fn refill(&mut self) {
        self.pending = if self.provider.can_provide() {
            self.provider
                .provide()
                .unwrap_or_else(|| Frame::silence().into_data())
        } else {
            Frame::silence().into_data()
        };
    }
}

impl Read for FrameStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            self.refill();
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

impl Seek for FrameStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live frame stream is not seekable",
        ))
    }
}

impl MediaSource for FrameStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
