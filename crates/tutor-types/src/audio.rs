//! PCM audio frames exchanged between the room and the pipeline.

use std::time::Duration;

/// Interleaved signed 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<i16>,
    pub sample_rate: u32,
    pub num_channels: u16,
}

impl AudioFrame {
    pub fn new(data: Vec<i16>, sample_rate: u32, num_channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            num_channels,
        }
    }

    /// A mono frame of digital silence lasting `duration`.
    pub fn silence(sample_rate: u32, duration: Duration) -> Self {
        let samples = (sample_rate as f64 * duration.as_secs_f64()).round() as usize;
        Self::new(vec![0; samples], sample_rate, 1)
    }

    /// Decodes little-endian s16 bytes. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, num_channels: u16) -> Self {
        let data = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(data, sample_rate, num_channels)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 2);
        for sample in &self.data {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    pub fn samples_per_channel(&self) -> usize {
        if self.num_channels == 0 {
            return 0;
        }
        self.data.len() / self.num_channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.samples_per_channel() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Joins frames that share a sample rate and channel count. Returns
    /// `None` for an empty slice or mismatched formats.
    pub fn concat(frames: &[AudioFrame]) -> Option<AudioFrame> {
        let first = frames.first()?;
        if frames
            .iter()
            .any(|f| f.sample_rate != first.sample_rate || f.num_channels != first.num_channels)
        {
            return None;
        }
        let total = frames.iter().map(|f| f.data.len()).sum();
        let mut data = Vec::with_capacity(total);
        for frame in frames {
            data.extend_from_slice(&frame.data);
        }
        Some(AudioFrame::new(data, first.sample_rate, first.num_channels))
    }

    /// Splits the frame into consecutive chunks of `frame_duration`; the
    /// last chunk may be shorter.
    pub fn split(&self, frame_duration: Duration) -> Vec<AudioFrame> {
        let per_channel =
            (self.sample_rate as f64 * frame_duration.as_secs_f64()).round() as usize;
        let chunk = per_channel.max(1) * self.num_channels.max(1) as usize;
        self.data
            .chunks(chunk)
            .map(|c| AudioFrame::new(c.to_vec(), self.sample_rate, self.num_channels))
            .collect()
    }
}
