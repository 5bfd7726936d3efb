use crate::sink::HardwareSink;

/// Sink that accepts and discards everything.
///
/// Used when no output device can be opened, so the mixer keeps running and
/// streams still advance and finish.
#[derive(Debug)]
pub struct NullSink {
    sample_rate: u32,
    volume_multiplier: f32,
    enabled: bool,
    last_sample: (f32, f32),
    samples_accepted: u64,
}

impl NullSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            volume_multiplier: 0.5,
            enabled: true,
            last_sample: (0.0, 0.0),
            samples_accepted: 0,
        }
    }

    /// Total interleaved values accepted since creation.
    pub fn samples_accepted(&self) -> u64 {
        self.samples_accepted
    }

    pub fn is_output_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new(44100)
    }
}

impl HardwareSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn connect(&mut self) -> bool {
        true
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn push_data(&mut self, samples: &[f32]) -> usize {
        self.samples_accepted += samples.len() as u64;
        if let [.., left, right] = samples {
            let gain = if self.enabled { self.volume_multiplier } else { 0.0 };
            self.last_sample = (left * gain, right * gain);
        }
        0
    }

    fn underrun(&self) -> bool {
        false
    }

    fn enable_output(&mut self, enable: bool) {
        self.enabled = enable;
    }

    fn set_volume_multiplier(&mut self, volume: f32) {
        self.volume_multiplier = volume.clamp(0.0, 1.0);
    }

    fn volume_multiplier(&self) -> f32 {
        self.volume_multiplier
    }

    fn current_output_sample(&self) -> (f32, f32) {
        self.last_sample
    }

    fn pending_samples(&self) -> usize {
        0
    }
}
