use crate::effect::{AudioEffect, EffectChain};
use std::sync::Arc;

/// Peak limiter with a slow release.
///
/// When a block's peak times the current scale exceeds 1, the scale drops to
/// `1 / peak`. After every block the scale recovers toward 1 by
/// [`Limiter::RELEASE_STEP`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limiter {
    scale: f32,
}

impl Default for Limiter {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl Limiter {
    pub const RELEASE_STEP: f32 = 0.1;

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn apply(&mut self, block: &mut [f32]) {
        let peak = block.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        if peak * self.scale > 1.0 {
            self.scale = 1.0 / peak;
        }
        if self.scale < 1.0 {
            for sample in block.iter_mut() {
                *sample *= self.scale;
            }
        }
        self.scale = (self.scale + Self::RELEASE_STEP).min(1.0);
    }
}

/// One mix bus: an effect chain plus volume and panning applied when the
/// channel is summed into the output.
///
/// The client edits its own copy; the processor adopts the settings during
/// reconciliation. Only the processor's copy holds scratch storage.
#[derive(Debug, Clone)]
pub struct ChannelState {
    effects: EffectChain,
    volume: f32,
    panning: f32,
    keep_awake: bool,
    limiter: Limiter,
    scratch: Vec<f32>,
    written: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            effects: EffectChain::new(),
            volume: 1.0,
            panning: 0.5,
            keep_awake: false,
            limiter: Limiter::default(),
            scratch: Vec::new(),
            written: false,
        }
    }
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn panning(&self) -> f32 {
        self.panning
    }

    pub fn set_panning(&mut self, panning: f32) {
        self.panning = panning.clamp(0.0, 1.0);
    }

    /// A keep-awake channel runs its effects every block, even when no stream
    /// wrote to it (e.g. to let a reverb tail ring out).
    pub fn keep_awake(&self) -> bool {
        self.keep_awake
    }

    pub fn set_keep_awake(&mut self, keep_awake: bool) {
        self.keep_awake = keep_awake;
    }

    pub fn effects(&self) -> &EffectChain {
        &self.effects
    }

    pub fn add_effect(&mut self, effect: Arc<dyn AudioEffect>) {
        self.effects.push(effect);
    }

    pub fn remove_effect(&mut self, effect: &Arc<dyn AudioEffect>) -> bool {
        self.effects.remove(effect)
    }

    /// Clears the effect chain and restores default volume and panning.
    pub fn reset(&mut self) {
        self.effects.clear();
        self.volume = 1.0;
        self.panning = 0.5;
        self.keep_awake = false;
    }

    /// Takes over the client-controlled settings of `other`.
    ///
    /// The effect chains are swapped rather than copied, so the chain this
    /// channel held before ends up in `other` and is released wherever
    /// `other` is dropped.
    pub(crate) fn adopt_settings(&mut self, other: &mut ChannelState) {
        std::mem::swap(&mut self.effects, &mut other.effects);
        self.volume = other.volume;
        self.panning = other.panning;
        self.keep_awake = other.keep_awake;
    }

    /// Grows scratch storage to hold at least `samples` values.
    pub(crate) fn reserve_scratch(&mut self, samples: usize) {
        if self.scratch.len() < samples {
            self.scratch.resize(samples, 0.0);
        }
    }

    pub(crate) fn begin_block(&mut self) {
        self.written = false;
    }

    /// Scratch for this block, zeroed on first use within the block.
    pub(crate) fn scratch_mut(&mut self, samples: usize) -> &mut [f32] {
        self.reserve_scratch(samples);
        if !self.written {
            self.scratch[..samples].fill(0.0);
            self.written = true;
        }
        &mut self.scratch[..samples]
    }

    /// Runs the effect chain over this block's scratch and returns it, or
    /// `None` when the channel is silent and not kept awake.
    pub(crate) fn finish_block(
        &mut self,
        samples: usize,
        clamp_between: bool,
        limit: bool,
    ) -> Option<&[f32]> {
        if !self.written && !self.keep_awake {
            return None;
        }

        self.scratch_mut(samples);
        let block = &mut self.scratch[..samples];
        self.effects.process(block, clamp_between);
        if limit {
            self.limiter.apply(block);
        }
        Some(&self.scratch[..samples])
    }
}
