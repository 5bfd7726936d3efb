//! Hardware output abstraction.
//!
//! The processor pushes interleaved stereo `f32` blocks into a
//! [`HardwareSink`]. The sink owns device timing: it queues what it accepts,
//! applies the global volume multiplier when samples are emitted, and covers
//! gaps with an [`UnderrunFiller`] when the queue runs dry.

mod cpal_sink;
mod null;

pub use cpal_sink::CpalSink;
pub use null::NullSink;

/// Push-style audio output.
pub trait HardwareSink: Send {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Opens the device. Returns `false` when no output could be opened.
    fn connect(&mut self) -> bool;

    fn set_sample_rate(&mut self, sample_rate: u32);

    fn sample_rate(&self) -> u32;

    /// Queues interleaved stereo samples and returns how many were rejected.
    /// Rejected samples are the tail of `samples`.
    fn push_data(&mut self, samples: &[f32]) -> usize;

    /// Whether the device starved since the last call.
    fn underrun(&self) -> bool;

    fn enable_output(&mut self, enable: bool);

    /// Sets the global output multiplier, clamped to `[0, 1]`.
    fn set_volume_multiplier(&mut self, volume: f32);

    fn volume_multiplier(&self) -> f32;

    /// Most recently emitted `(left, right)` pair.
    fn current_output_sample(&self) -> (f32, f32);

    /// Stereo samples accepted but not yet emitted by the device.
    fn pending_samples(&self) -> usize;
}

/// How a sink fills the output when no data is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderrunPolicy {
    /// Emit zeros
    Silence,
    /// Replay the most recent output cyclically
    Ring,
    /// Replay the most recent output while fading it out, then fade back in
    /// once data resumes
    Taper,
}

impl Default for UnderrunPolicy {
    fn default() -> Self {
        Self::Taper
    }
}

/// Produces output for one device callback, substituting for missing data
/// according to an [`UnderrunPolicy`].
///
/// Keeps a ring of the last emitted values (interleaved, so the history length
/// is always even). The taper fade spans one pass through that history.
#[derive(Debug, Clone)]
pub struct UnderrunFiller {
    policy: UnderrunPolicy,
    history: Vec<f32>,
    capacity: usize,
    write_pos: usize,
    replay_pos: usize,
    gain: f32,
    starving: bool,
}

impl UnderrunFiller {
    /// `history_frames` stereo frames of output are kept for replay.
    pub fn new(policy: UnderrunPolicy, history_frames: usize) -> Self {
        let capacity = history_frames.max(1) * 2;
        Self {
            policy,
            history: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
            replay_pos: 0,
            gain: 1.0,
            starving: false,
        }
    }

    pub fn policy(&self) -> UnderrunPolicy {
        self.policy
    }

    pub fn is_starving(&self) -> bool {
        self.starving
    }

    fn fade_step(&self) -> f32 {
        1.0 / self.capacity as f32
    }

    /// Returns the value to emit for one interleaved slot, given the queued
    /// value if there was one.
    pub fn next(&mut self, input: Option<f32>) -> f32 {
        match input {
            Some(sample) => {
                self.starving = false;
                self.record(sample);
                if self.policy == UnderrunPolicy::Taper && self.gain < 1.0 {
                    let out = sample * self.gain;
                    self.gain = (self.gain + self.fade_step()).min(1.0);
                    out
                } else {
                    sample
                }
            }
            None => {
                if !self.starving {
                    self.starving = true;
                    self.replay_pos = 0;
                }
                match self.policy {
                    UnderrunPolicy::Silence => 0.0,
                    UnderrunPolicy::Ring => self.replay(),
                    UnderrunPolicy::Taper => {
                        let out = self.replay() * self.gain;
                        self.gain = (self.gain - self.fade_step()).max(0.0);
                        out
                    }
                }
            }
        }
    }

    /// Fills `out` by pulling from `source` until it runs dry. Returns the
    /// number of slots that had to be substituted.
    pub fn fill(&mut self, out: &mut [f32], mut source: impl FnMut() -> Option<f32>) -> usize {
        let mut missing = 0;
        for slot in out.iter_mut() {
            let input = source();
            if input.is_none() {
                missing += 1;
            }
            *slot = self.next(input);
        }
        missing
    }

    fn record(&mut self, sample: f32) {
        if self.history.len() < self.capacity {
            self.history.push(sample);
        } else {
            self.history[self.write_pos] = sample;
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
    }

    // Oldest-to-newest walk over the history.
    fn replay(&mut self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        let start = if self.history.len() < self.capacity {
            0
        } else {
            self.write_pos
        };
        let index = (start + self.replay_pos) % self.history.len();
        self.replay_pos = (self.replay_pos + 1) % self.history.len();
        self.history[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(filler: &mut UnderrunFiller, samples: &[f32]) {
        for &s in samples {
            filler.next(Some(s));
        }
    }

    #[test]
    fn test_silence_policy() {
        let mut filler = UnderrunFiller::new(UnderrunPolicy::Silence, 2);
        feed(&mut filler, &[0.5, 0.5]);
        let mut out = [1.0; 4];
        assert_eq!(filler.fill(&mut out, || None), 4);
        assert_eq!(out, [0.0; 4]);
        assert!(filler.is_starving());
    }

    #[test]
    fn test_ring_replays_history_in_order() {
        let mut filler = UnderrunFiller::new(UnderrunPolicy::Ring, 2);
        feed(&mut filler, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);

        let mut out = [0.0; 6];
        filler.fill(&mut out, || None);
        assert_eq!(out, [0.3, 0.4, 0.5, 0.6, 0.3, 0.4]);
    }

    #[test]
    fn test_ring_without_history_is_silent() {
        let mut filler = UnderrunFiller::new(UnderrunPolicy::Ring, 4);
        assert_eq!(filler.next(None), 0.0);
    }

    #[test]
    fn test_taper_fades_out_and_back_in() {
        let mut filler = UnderrunFiller::new(UnderrunPolicy::Taper, 2);
        feed(&mut filler, &[1.0; 4]);

        let mut starved = [0.0; 4];
        filler.fill(&mut starved, || None);
        assert_eq!(starved, [1.0, 0.75, 0.5, 0.25]);

        let mut more = [0.0; 2];
        filler.fill(&mut more, || None);
        assert_eq!(more, [0.0, 0.0]);

        let mut resumed = [0.0; 6];
        let mut source = [1.0f32; 6].into_iter();
        assert_eq!(filler.fill(&mut resumed, || source.next()), 0);
        assert_eq!(resumed, [0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);
        assert!(!filler.is_starving());
    }

    #[test]
    fn test_partial_source_counts_missing() {
        let mut filler = UnderrunFiller::new(UnderrunPolicy::Silence, 4);
        let mut source = [0.5f32, -0.5].into_iter();
        let mut out = [9.0; 4];
        assert_eq!(filler.fill(&mut out, || source.next()), 2);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
    }
}
