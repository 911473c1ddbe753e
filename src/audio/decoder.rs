//! Symphonia-backed [`FrameDecoder`].
//!
//! Probes any container symphonia (plus songbird's Opus decoder) understands,
//! converts to stereo, resamples to 48kHz with rubato and slices the result
//! into 20ms [`Frame`]s.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::{collections::VecDeque, sync::OnceLock};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecRegistry, Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::audio::{
    provider::{Frame, CHANNELS, FRAME_SAMPLES, SAMPLE_RATE},
    track::FrameDecoder,
};

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("formato no soportado: {0}")]
    Probe(#[source] SymphoniaError),
    #[error("el stream no contiene pistas de audio")]
    NoAudioTrack,
    #[error("la pista no declara sample rate")]
    UnknownSampleRate,
    #[error("codec no soportado: {0}")]
    Codec(#[source] SymphoniaError),
    #[error("error leyendo el stream: {0}")]
    Read(#[source] SymphoniaError),
    #[error("error de resampleo: {0}")]
    Resample(String),
}

/// Registro de codecs de symphonia más el decoder Opus de songbird
fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        symphonia::default::register_enabled_codecs(&mut registry);
        registry.register_all::<songbird::input::codecs::OpusDecoder>();
        registry
    })
}

pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    resampler: Option<StereoResampler>,
    /// Muestras estéreo intercaladas a 48kHz pendientes de empaquetar
    output: VecDeque<f32>,
    finished: bool,
}

impl SymphoniaDecoder {
    pub fn new(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(DecodeError::Probe)?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(DecodeError::UnknownSampleRate)?;
        let decoder = codec_registry()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(DecodeError::Codec)?;

        let resampler = if sample_rate == SAMPLE_RATE {
            None
        } else {
            debug!("🎚️ Resampleando {}Hz -> {}Hz", sample_rate, SAMPLE_RATE);
            Some(StereoResampler::new(sample_rate)?)
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            resampler,
            output: VecDeque::new(),
            finished: false,
        })
    }

    /// Decodifica el siguiente paquete. Devuelve `false` al final del stream.
    fn decode_packet(&mut self) -> Result<bool, DecodeError> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(false);
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Ok(true);
            }
            Err(e) => return Err(DecodeError::Read(e)),
        };

        if packet.track_id() != self.track_id {
            return Ok(true);
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Paquete corrupto: se descarta y se sigue
                warn!("Paquete descartado: {}", e);
                return Ok(true);
            }
            Err(e) => return Err(DecodeError::Read(e)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        let stereo = to_stereo(buffer.samples(), channels);
        match self.resampler.as_mut() {
            Some(resampler) => {
                let resampled = resampler.push(&stereo)?;
                self.output.extend(resampled);
            }
            None => self.output.extend(stereo),
        }
        Ok(true)
    }

    fn take_frame(&mut self) -> Frame {
        let len = (FRAME_SAMPLES * CHANNELS).min(self.output.len());
        let samples: Vec<f32> = self.output.drain(..len).collect();
        Frame::from_samples(&samples)
    }
}

impl FrameDecoder for SymphoniaDecoder {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        while !self.finished && self.output.len() < FRAME_SAMPLES * CHANNELS {
            if !self.decode_packet()? {
                self.finished = true;
                if let Some(resampler) = self.resampler.as_mut() {
                    let tail = resampler.flush()?;
                    self.output.extend(tail);
                }
            }
        }

        if self.output.is_empty() {
            return Ok(None);
        }
        // El último frame se completa con silencio
        Ok(Some(self.take_frame()))
    }
}

/// Convierte muestras intercaladas de `channels` canales a estéreo
fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|s| [*s, *s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Wraps rubato's fixed-input resampler with an input accumulator, since
/// rubato wants exactly `input_frames_next()` frames per call.
struct StereoResampler {
    inner: FastFixedIn<f32>,
    pending: [Vec<f32>; CHANNELS],
}

impl StereoResampler {
    fn new(input_rate: u32) -> Result<Self, DecodeError> {
        let ratio = SAMPLE_RATE as f64 / input_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            CHANNELS,
        )
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        Ok(Self {
            inner,
            pending: [Vec::new(), Vec::new()],
        })
    }

    fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, DecodeError> {
        for frame in interleaved.chunks_exact(CHANNELS) {
            self.pending[0].push(frame[0]);
            self.pending[1].push(frame[1]);
        }

        let mut out = Vec::new();
        while self.pending[0].len() >= self.inner.input_frames_next() {
            let needed = self.inner.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            self.process(&chunk, &mut out)?;
        }
        Ok(out)
    }

    /// Procesa lo que quede rellenando con ceros hasta completar un chunk
    fn flush(&mut self) -> Result<Vec<f32>, DecodeError> {
        let mut out = Vec::new();
        if self.pending[0].is_empty() {
            return Ok(out);
        }
        let needed = self.inner.input_frames_next();
        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut samples: Vec<f32> = channel.drain(..).collect();
                samples.resize(needed, 0.0);
                samples
            })
            .collect();
        self.process(&chunk, &mut out)?;
        Ok(out)
    }

    fn process(&mut self, chunk: &[Vec<f32>], out: &mut Vec<f32>) -> Result<(), DecodeError> {
        let resampled = self
            .inner
            .process(chunk, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        for i in 0..resampled[0].len() {
            out.push(resampled[0][i]);
            out.push(resampled[1][i]);
        }
        Ok(())
    }
}
