use crate::config::{ClampPolicy, PanLaw};
use crate::error::{ChoraleError, Result};
use crate::sink::UnderrunPolicy;
use std::time::Duration;

/// Largest number of mix channels; channel indices are stored as `u8`.
pub const MAX_CHANNEL_COUNT: usize = 256;

/// Configuration descriptor for an audio system
#[derive(Debug, Clone)]
pub struct AudioSystemDesc {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Largest number of stereo frames mixed in one pass. The processor's
    /// scratch buffers are sized for this up front.
    pub block_size: usize,
    /// Number of mix channels (buses) available to streams
    pub channel_count: usize,
    /// Maximum number of concurrently playing streams. Requests beyond this
    /// produce an invalid playback id.
    pub max_streams: usize,
    /// Panning curve used for both streams and channels
    pub pan_law: PanLaw,
    /// Whether effect output is clamped between effects or only at the end
    pub clamp_policy: ClampPolicy,
    /// Enables the per-channel and master peak limiter
    pub limiter: bool,
    /// How the hardware sink fills gaps when the render thread falls behind
    pub underrun_policy: UnderrunPolicy,
    /// Number of recently emitted samples replayed by the ring/taper policies
    pub underrun_history: usize,
    /// Amount of audio the sink can hold ahead of the device
    pub buffer_duration: Duration,
    /// Sleep between render passes on the render thread
    pub render_interval: Duration,
    /// Expected client tick rate, used to pace how much audio is produced per pass
    pub ticks_per_second: u32,
    /// Initial global volume multiplier applied by the sink
    pub volume_multiplier: f32,
}

impl Default for AudioSystemDesc {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 2048,
            channel_count: 32,
            max_streams: 64,
            pan_law: PanLaw::default(),
            clamp_policy: ClampPolicy::default(),
            limiter: false,
            underrun_policy: UnderrunPolicy::default(),
            underrun_history: 512,
            buffer_duration: Duration::from_millis(100),
            render_interval: Duration::from_millis(2),
            ticks_per_second: 60,
            volume_multiplier: 0.5,
        }
    }
}

impl AudioSystemDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn block_size(mut self, frames: usize) -> Self {
        self.block_size = frames;
        self
    }

    pub fn channel_count(mut self, count: usize) -> Self {
        self.channel_count = count;
        self
    }

    pub fn max_streams(mut self, max: usize) -> Self {
        self.max_streams = max;
        self
    }

    pub fn pan_law(mut self, law: PanLaw) -> Self {
        self.pan_law = law;
        self
    }

    pub fn clamp_policy(mut self, policy: ClampPolicy) -> Self {
        self.clamp_policy = policy;
        self
    }

    pub fn limiter(mut self, enable: bool) -> Self {
        self.limiter = enable;
        self
    }

    pub fn underrun_policy(mut self, policy: UnderrunPolicy) -> Self {
        self.underrun_policy = policy;
        self
    }

    pub fn buffer_duration(mut self, duration: Duration) -> Self {
        self.buffer_duration = duration;
        self
    }

    pub fn render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    pub fn ticks_per_second(mut self, tps: u32) -> Self {
        self.ticks_per_second = tps;
        self
    }

    pub fn volume_multiplier(mut self, volume: f32) -> Self {
        self.volume_multiplier = volume;
        self
    }

    /// Number of interleaved samples (two per frame) in one full block.
    pub fn block_samples(&self) -> usize {
        self.block_size * 2
    }

    /// Interleaved sample capacity the sink should reserve for `buffer_duration`.
    pub fn sink_capacity(&self) -> usize {
        let frames = (self.sample_rate as f64 * self.buffer_duration.as_secs_f64()).ceil() as usize;
        frames.max(self.block_size) * 2
    }

    /// Checks the descriptor for values the mixer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ChoraleError::Configuration(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(ChoraleError::Configuration(
                "Block size must be greater than 0".to_string(),
            ));
        }
        if self.channel_count == 0 || self.channel_count > MAX_CHANNEL_COUNT {
            return Err(ChoraleError::Configuration(format!(
                "Channel count must be between 1 and {}, got {}",
                MAX_CHANNEL_COUNT, self.channel_count
            )));
        }
        if self.max_streams == 0 {
            return Err(ChoraleError::Configuration(
                "Stream limit must be greater than 0".to_string(),
            ));
        }
        if self.ticks_per_second == 0 {
            return Err(ChoraleError::Configuration(
                "Tick rate must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
