//! Per-channel effect processing.
//!
//! An effect transforms one block of interleaved stereo samples in place. A
//! channel runs its effects in registration order. Effects are shared handles:
//! the same effect may sit on several channels, and removing it from a channel
//! never frees it while the caller still holds a handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// In-place transform over interleaved `[L, R, L, R, ...]` samples.
///
/// Called from the audio thread. Implementations must not block.
pub trait AudioEffect: Send + Sync {
    fn process(&self, samples: &mut [f32]);
}

impl<F> AudioEffect for F
where
    F: Fn(&mut [f32]) + Send + Sync,
{
    fn process(&self, samples: &mut [f32]) {
        self(samples)
    }
}

/// Ordered list of effects attached to one channel.
#[derive(Clone, Default)]
pub struct EffectChain {
    effects: Vec<Arc<dyn AudioEffect>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Arc<dyn AudioEffect>) {
        self.effects.push(effect);
    }

    /// Removes every occurrence of `effect`, compared by handle identity.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, effect: &Arc<dyn AudioEffect>) -> bool {
        let before = self.effects.len();
        self.effects.retain(|e| !same_effect(e, effect));
        self.effects.len() != before
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn contains(&self, effect: &Arc<dyn AudioEffect>) -> bool {
        self.effects.iter().any(|e| same_effect(e, effect))
    }

    /// Runs every effect over `samples`. With `clamp_between` set, the block
    /// is clamped to `[-1, 1]` after each effect.
    pub fn process(&self, samples: &mut [f32], clamp_between: bool) {
        for effect in &self.effects {
            effect.process(samples);
            if clamp_between {
                for sample in samples.iter_mut() {
                    *sample = sample.clamp(-1.0, 1.0);
                }
            }
        }
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field("effects", &self.effects.len())
            .finish()
    }
}

// Compare data pointers only; vtable pointers for one type may differ between
// codegen units.
fn same_effect(a: &Arc<dyn AudioEffect>, b: &Arc<dyn AudioEffect>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Linear gain whose value can be changed from any thread while the effect is
/// attached.
#[derive(Debug)]
pub struct Gain {
    gain: AtomicU32,
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: AtomicU32::new(gain.to_bits()),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }
}

impl AudioEffect for Gain {
    fn process(&self, samples: &mut [f32]) {
        let gain = self.gain();
        for sample in samples.iter_mut() {
            *sample *= gain;
        }
    }
}
