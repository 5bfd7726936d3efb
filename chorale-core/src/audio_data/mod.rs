mod resampler;
mod supplier;

use crate::error::{ChoraleError, Result};
pub use resampler::StereoResampler;
use std::time::Duration;
pub use supplier::{AssetId, AudioSupplier, SampleLibrary};

/// One stereo frame of 16-bit PCM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StereoSample {
    pub left: i16,
    pub right: i16,
}

impl StereoSample {
    pub const SILENT: Self = Self { left: 0, right: 0 };

    pub fn new(left: i16, right: i16) -> Self {
        Self { left, right }
    }

    /// Quantizes a pair of normalized floats. Inputs are clamped to `[-1, 1]`.
    pub fn from_normalized(left: f32, right: f32) -> Self {
        Self {
            left: quantize(left),
            right: quantize(right),
        }
    }

    /// Left sample scaled by `i16::MAX` into `[-1, 1]`.
    pub fn normalized_left(self) -> f32 {
        normalize(self.left)
    }

    /// Right sample scaled by `i16::MAX` into `[-1, 1]`.
    pub fn normalized_right(self) -> f32 {
        normalize(self.right)
    }
}

fn normalize(sample: i16) -> f32 {
    // i16::MIN / i16::MAX lands just below -1.
    (sample as f32 / i16::MAX as f32).max(-1.0)
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Immutable block of decoded stereo PCM, shared between the asset side and
/// any stream playing it.
///
/// # Data Format
/// Frames are stored **interleaved**, one left and one right 16-bit sample per
/// frame: `[L0, R0, L1, R1, ...]`. A "sample" in this crate's vocabulary is
/// one such frame, so a buffer of `n` bytes holds `n / 4` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    frames: Vec<StereoSample>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Size of one stereo frame in bytes.
    pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<StereoSample>();

    pub fn from_frames(frames: Vec<StereoSample>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    /// Builds a buffer from interleaved `[L, R, L, R, ...]` PCM. A dangling
    /// left sample without its right partner is dropped.
    pub fn from_interleaved_i16(samples: &[i16], sample_rate: u32) -> Self {
        let frames = samples
            .chunks_exact(2)
            .map(|pair| StereoSample::new(pair[0], pair[1]))
            .collect();
        Self::from_frames(frames, sample_rate)
    }

    /// Builds a buffer from interleaved normalized floats, clamping and
    /// quantizing each value to 16 bits.
    pub fn from_interleaved_f32(samples: &[f32], sample_rate: u32) -> Self {
        let frames = samples
            .chunks_exact(2)
            .map(|pair| StereoSample::from_normalized(pair[0], pair[1]))
            .collect();
        Self::from_frames(frames, sample_rate)
    }

    /// Generates a sine tone on both channels.
    ///
    /// `amplitude` is clamped to `[0, 1]`.
    pub fn sine(pitch_hz: f32, amplitude: f32, duration: Duration, sample_rate: u32) -> Self {
        let amplitude = amplitude.clamp(0.0, 1.0);
        let count = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        let step = std::f32::consts::TAU * pitch_hz / sample_rate.max(1) as f32;

        let frames = (0..count)
            .map(|i| {
                let value = (step * i as f32).sin() * amplitude;
                StereoSample::from_normalized(value, value)
            })
            .collect();
        Self::from_frames(frames, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_bytes(&self) -> usize {
        self.frames.len() * Self::BYTES_PER_SAMPLE
    }

    pub fn num_samples(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[StereoSample] {
        &self.frames
    }

    /// Returns the frame at `index`, or silence past the end.
    pub fn sample(&self, index: usize) -> StereoSample {
        self.frames.get(index).copied().unwrap_or(StereoSample::SILENT)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames.len() as f64 / self.sample_rate.max(1) as f64)
    }

    /// Position of sample `index` in seconds, or `None` past the end.
    pub fn seconds_from_samples(&self, index: usize) -> Option<f32> {
        (index < self.frames.len()).then(|| index as f32 / self.sample_rate.max(1) as f32)
    }

    /// Sample index at `seconds`. Negative times map to 0.
    pub fn sample_from_seconds(&self, seconds: f32) -> usize {
        (seconds.max(0.0) * self.sample_rate as f32) as usize
    }

    /// Copies the frames in `[first, end)` into a new buffer. The range is
    /// clipped to the buffer.
    pub fn sub_block(&self, first: usize, end: usize) -> Self {
        let end = end.min(self.frames.len());
        let first = first.min(end);
        Self::from_frames(self.frames[first..end].to_vec(), self.sample_rate)
    }

    /// Returns a new buffer holding this buffer followed by `other`.
    pub fn appended(&self, other: &SampleBuffer) -> Result<Self> {
        if other.sample_rate != self.sample_rate {
            return Err(ChoraleError::AudioFormat(format!(
                "Cannot append a {} Hz buffer to a {} Hz buffer",
                other.sample_rate, self.sample_rate
            )));
        }
        let mut frames = Vec::with_capacity(self.frames.len() + other.frames.len());
        frames.extend_from_slice(&self.frames);
        frames.extend_from_slice(&other.frames);
        Ok(Self::from_frames(frames, self.sample_rate))
    }

    /// Resample to a different sample rate using rubato, returns a new buffer
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.sample_rate {
            return Ok(self.clone());
        }

        let resampler = StereoResampler::new(self.sample_rate, target_sample_rate, Some(1024))?;
        let frames = resampler.resample(&self.frames)?;
        Ok(Self::from_frames(frames, target_sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let buffer = SampleBuffer::from_interleaved_i16(&[1, 2, 3, 4, 5], 44100);
        assert_eq!(buffer.num_samples(), 2);
        assert_eq!(buffer.num_bytes(), 8);
        assert_eq!(buffer.num_bytes() / SampleBuffer::BYTES_PER_SAMPLE, buffer.num_samples());
    }

    #[test]
    fn test_normalization_stays_in_range() {
        let loud = StereoSample::new(i16::MAX, i16::MIN);
        assert_eq!(loud.normalized_left(), 1.0);
        assert_eq!(loud.normalized_right(), -1.0);

        let half = StereoSample::new(16384, -16384);
        assert!((half.normalized_left() - 16384.0 / 32767.0).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_sample_is_silent() {
        let buffer = SampleBuffer::from_frames(vec![StereoSample::new(9, 9)], 44100);
        assert_eq!(buffer.sample(0), StereoSample::new(9, 9));
        assert_eq!(buffer.sample(1), StereoSample::SILENT);
    }

    #[test]
    fn test_time_conversions() {
        let buffer = SampleBuffer::from_frames(vec![StereoSample::SILENT; 44100], 44100);
        assert_eq!(buffer.seconds_from_samples(22050), Some(0.5));
        assert_eq!(buffer.seconds_from_samples(44100), None);
        assert_eq!(buffer.sample_from_seconds(0.25), 11025);
        assert_eq!(buffer.sample_from_seconds(-1.0), 0);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_sub_block_and_append() {
        let buffer = SampleBuffer::from_interleaved_i16(&[1, 1, 2, 2, 3, 3, 4, 4], 44100);
        let middle = buffer.sub_block(1, 3);
        assert_eq!(middle.frames(), &[StereoSample::new(2, 2), StereoSample::new(3, 3)]);
        assert!(buffer.sub_block(3, 100).num_samples() == 1);
        assert!(buffer.sub_block(10, 2).is_empty());

        let joined = middle.appended(&buffer.sub_block(0, 1)).unwrap();
        assert_eq!(joined.num_samples(), 3);
        assert_eq!(joined.sample(2), StereoSample::new(1, 1));

        let other_rate = SampleBuffer::from_frames(Vec::new(), 48000);
        assert!(buffer.appended(&other_rate).is_err());
    }

    #[test]
    fn test_sine_generator() {
        let sine = SampleBuffer::sine(441.0, 0.5, Duration::from_millis(100), 44100);
        assert_eq!(sine.num_samples(), 4410);
        assert_eq!(sine.sample(0), StereoSample::SILENT);
        let peak = sine.frames().iter().map(|s| s.left.abs()).max().unwrap();
        assert!((peak as f32 / i16::MAX as f32 - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_resample_changes_rate() {
        let buffer = SampleBuffer::sine(440.0, 0.5, Duration::from_millis(50), 22050);
        let resampled = buffer.resample(44100).unwrap();
        assert_eq!(resampled.sample_rate(), 44100);
        assert_eq!(resampled.num_samples(), buffer.num_samples() * 2);
    }
}
