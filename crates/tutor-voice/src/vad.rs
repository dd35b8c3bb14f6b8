//! Voice activity detection.
//!
//! [`Vad`] is the process-wide warm resource: it is loaded once during
//! prewarm and shared read-only by every session. Each session segments its
//! own audio through a [`VadStream`], which owns a WebRTC detector instance
//! and the per-session state.
//!
//! The WebRTC detector classifies 10 ms chunks at 8, 16, 32 or 48 kHz. Other
//! rates are resampled to 16 kHz and multi-channel audio is downmixed first.
//! A frame's speech probability is the share of its chunks classified as
//! voiced. The detector keeps reporting speech for up to ~150 ms after
//! voicing stops, and `min_silence_duration` counts from there. Durations
//! are counted in audio time, so segmentation does not depend on how fast
//! frames arrive.

use crate::error::VoiceError;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tutor_types::AudioFrame;
use webrtc_vad::{SampleRate, VadMode};

/// Rate used for audio the detector cannot take natively.
const FALLBACK_RATE: u32 = 16_000;

/// How eagerly the detector rejects non-speech. Stricter modes miss more
/// quiet speech and report less noise as speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadAggressiveness {
    #[default]
    Quality,
    LowBitrate,
    Aggressive,
    VeryAggressive,
}

impl VadAggressiveness {
    fn mode(self) -> VadMode {
        match self {
            VadAggressiveness::Quality => VadMode::Quality,
            VadAggressiveness::LowBitrate => VadMode::LowBitrate,
            VadAggressiveness::Aggressive => VadMode::Aggressive,
            VadAggressiveness::VeryAggressive => VadMode::VeryAggressive,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VadOptions {
    /// Share of voiced chunks above which a frame counts as speech.
    pub activation_threshold: f32,
    /// Speech must last this long before `StartOfSpeech` is reported.
    pub min_speech_duration: Duration,
    /// Silence must last this long before `EndOfSpeech` is reported.
    pub min_silence_duration: Duration,
    pub aggressiveness: VadAggressiveness,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            activation_threshold: 0.5,
            min_speech_duration: Duration::from_millis(50),
            min_silence_duration: Duration::from_millis(550),
            aggressiveness: VadAggressiveness::default(),
        }
    }
}

/// Loaded voice activity detector.
#[derive(Debug, Clone)]
pub struct Vad {
    options: VadOptions,
}

impl Vad {
    /// Loads the detector with default options.
    pub fn load() -> Result<Self, VoiceError> {
        Self::load_with(VadOptions::default())
    }

    pub fn load_with(options: VadOptions) -> Result<Self, VoiceError> {
        if !(0.0..=1.0).contains(&options.activation_threshold) {
            return Err(VoiceError::Vad(format!(
                "activation_threshold must be within 0.0..=1.0, got {}",
                options.activation_threshold
            )));
        }
        if options.min_silence_duration.is_zero() {
            return Err(VoiceError::Vad(
                "min_silence_duration must be greater than zero".to_string(),
            ));
        }

        // Fail at prewarm rather than in the first session.
        let mut classifier = Classifier::new(FALLBACK_RATE, options.aggressiveness);
        let chunk = vec![0i16; classifier.chunk_len()];
        classifier.is_voiced(&chunk)?;

        info!(
            threshold = options.activation_threshold,
            min_speech_ms = options.min_speech_duration.as_millis() as u64,
            min_silence_ms = options.min_silence_duration.as_millis() as u64,
            mode = ?options.aggressiveness,
            "VAD loaded"
        );
        Ok(Self { options })
    }

    pub fn options(&self) -> &VadOptions {
        &self.options
    }

    /// Opens a per-session segmentation stream.
    pub fn stream(&self) -> VadStream {
        VadStream {
            options: self.options.clone(),
            classifier: None,
            speaking: false,
            speech_run: Duration::ZERO,
            silence_run: Duration::ZERO,
            speech_total: Duration::ZERO,
            pending: Vec::new(),
            stats: VadStats::default(),
        }
    }
}

/// A WebRTC detector bound to one sample rate, plus the samples left over
/// from the previous frame.
struct Classifier {
    vad: webrtc_vad::Vad,
    sample_rate: u32,
    carry: Vec<i16>,
    last_voiced: bool,
}

// SAFETY: the detector state is a heap allocation owned exclusively by this
// value and is only touched through `&mut self`. It has no thread affinity.
unsafe impl Send for Classifier {}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("sample_rate", &self.sample_rate)
            .field("carry", &self.carry.len())
            .field("last_voiced", &self.last_voiced)
            .finish()
    }
}

impl Classifier {
    /// `sample_rate` must be one of [`native_rate`]'s accepted rates.
    fn new(sample_rate: u32, aggressiveness: VadAggressiveness) -> Self {
        let rate = match sample_rate {
            8_000 => SampleRate::Rate8kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            _ => SampleRate::Rate16kHz,
        };
        let mut vad = webrtc_vad::Vad::new();
        vad.set_mode(aggressiveness.mode());
        vad.set_sample_rate(rate);
        Self {
            vad,
            sample_rate,
            carry: Vec::new(),
            last_voiced: false,
        }
    }

    /// Samples in one 10 ms chunk.
    fn chunk_len(&self) -> usize {
        (self.sample_rate / 100) as usize
    }

    fn is_voiced(&mut self, chunk: &[i16]) -> Result<bool, VoiceError> {
        self.vad.is_voice_segment(chunk).map_err(|()| {
            VoiceError::Vad(format!(
                "detector rejected a {} sample chunk at {} Hz",
                chunk.len(),
                self.sample_rate
            ))
        })
    }

    /// Classifies every complete chunk of `samples` (prefixed by the carry)
    /// and returns `(voiced, classified)`.
    fn classify(&mut self, samples: &[i16]) -> Result<(usize, usize), VoiceError> {
        self.carry.extend_from_slice(samples);
        let len = self.chunk_len();
        let whole = self.carry.len() / len * len;
        let buffered: Vec<i16> = self.carry.drain(..whole).collect();

        let mut voiced = 0;
        let mut classified = 0;
        for chunk in buffered.chunks_exact(len) {
            let is_voiced = self.is_voiced(chunk)?;
            self.last_voiced = is_voiced;
            voiced += usize::from(is_voiced);
            classified += 1;
        }
        Ok((voiced, classified))
    }
}

/// The rate the detector runs at for audio arriving at `sample_rate`.
fn native_rate(sample_rate: u32) -> u32 {
    match sample_rate {
        8_000 | 16_000 | 32_000 | 48_000 => sample_rate,
        _ => FALLBACK_RATE,
    }
}

/// Mono samples of `frame` at `target_rate`.
fn prepare(frame: &AudioFrame, target_rate: u32) -> Vec<i16> {
    let channels = frame.num_channels.max(1) as usize;
    let mono: Vec<i16> = if channels == 1 {
        frame.data.clone()
    } else {
        frame
            .data
            .chunks_exact(channels)
            .map(|samples| {
                let sum: i32 = samples.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };
    if frame.sample_rate == target_rate || mono.is_empty() {
        return mono;
    }

    let out_len = (mono.len() as u64 * target_rate as u64 / frame.sample_rate as u64) as usize;
    let step = frame.sample_rate as f64 / target_rate as f64;
    let last = mono.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = (pos as usize).min(last);
            let next = (index + 1).min(last);
            let t = pos - index as f64;
            (mono[index] as f64 * (1.0 - t) + mono[next] as f64 * t).round() as i16
        })
        .collect()
}

#[derive(Debug, Clone)]
pub enum VadEvent {
    StartOfSpeech,
    /// Speech ended; `frames` holds the whole segment including the trailing
    /// silence that closed it.
    EndOfSpeech {
        frames: Vec<AudioFrame>,
        speech_duration: Duration,
    },
}

/// Inference work accumulated since the last call to
/// [`VadStream::take_stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VadStats {
    /// Number of 10 ms chunks classified.
    pub inference_count: u64,
    pub inference_duration_total: Duration,
    /// Audio time observed outside of speech.
    pub idle_time: Duration,
}

/// Per-session speech segmenter.
#[derive(Debug)]
pub struct VadStream {
    options: VadOptions,
    classifier: Option<Classifier>,
    speaking: bool,
    speech_run: Duration,
    silence_run: Duration,
    speech_total: Duration,
    pending: Vec<AudioFrame>,
    stats: VadStats,
}

impl VadStream {
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Share of the frame's 10 ms chunks classified as voiced. A frame too
    /// short to complete a chunk repeats the previous decision.
    fn probability(&mut self, frame: &AudioFrame) -> Result<f32, VoiceError> {
        if frame.sample_rate == 0 {
            return Ok(0.0);
        }
        let rate = native_rate(frame.sample_rate);
        if self.classifier.as_ref().map(|c| c.sample_rate) != Some(rate) {
            debug!(sample_rate = rate, "VAD detector created");
            self.classifier = Some(Classifier::new(rate, self.options.aggressiveness));
        }
        let Some(classifier) = self.classifier.as_mut() else {
            return Ok(0.0);
        };

        let samples = prepare(frame, rate);
        let started = Instant::now();
        let (voiced, classified) = classifier.classify(&samples)?;
        self.stats.inference_count += classified as u64;
        self.stats.inference_duration_total += started.elapsed();

        Ok(if classified == 0 {
            if classifier.last_voiced {
                1.0
            } else {
                0.0
            }
        } else {
            voiced as f32 / classified as f32
        })
    }

    /// Feeds one frame and returns the events it triggered. A frame the
    /// detector cannot classify counts as silence.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Vec<VadEvent> {
        let probability = match self.probability(frame) {
            Ok(probability) => probability,
            Err(e) => {
                debug!("frame treated as silence: {}", e);
                0.0
            }
        };

        let is_speech = probability > 0.0 && probability >= self.options.activation_threshold;
        let duration = frame.duration();
        let mut events = Vec::new();

        if !self.speaking {
            if is_speech {
                self.speech_run += duration;
                self.pending.push(frame.clone());
                if self.speech_run >= self.options.min_speech_duration {
                    debug!(probability, "start of speech");
                    self.speaking = true;
                    self.silence_run = Duration::ZERO;
                    self.speech_total = self.speech_run;
                    events.push(VadEvent::StartOfSpeech);
                }
            } else {
                self.stats.idle_time += duration;
                self.speech_run = Duration::ZERO;
                self.pending.clear();
            }
            return events;
        }

        self.pending.push(frame.clone());
        if is_speech {
            self.silence_run = Duration::ZERO;
            self.speech_total += duration;
        } else {
            self.silence_run += duration;
            if self.silence_run >= self.options.min_silence_duration {
                let frames = std::mem::take(&mut self.pending);
                let speech_duration = self.speech_total;
                debug!(
                    speech_ms = speech_duration.as_millis() as u64,
                    "end of speech"
                );
                self.speaking = false;
                self.speech_run = Duration::ZERO;
                self.silence_run = Duration::ZERO;
                self.speech_total = Duration::ZERO;
                events.push(VadEvent::EndOfSpeech {
                    frames,
                    speech_duration,
                });
            }
        }
        events
    }

    pub fn take_stats(&mut self) -> VadStats {
        std::mem::take(&mut self.stats)
    }
}
