use crate::audio_data::SampleBuffer;
use crate::error::Result;
use crate::slot_map::{SlotKey, SlotMap};
use std::sync::Arc;

/// Opaque handle to a decoded audio asset.
///
/// Returned when a buffer is registered with a [`SampleLibrary`]. A handle
/// whose asset was unloaded resolves to nothing, even if its slot is reused.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AssetId(SlotKey);

impl AssetId {
    pub const INVALID: Self = Self(SlotKey::NULL);

    pub fn is_valid(self) -> bool {
        !self.0.is_null()
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AssetId({:#x})", self.0.to_bits())
    }
}

/// Source of decoded PCM for the audio client.
pub trait AudioSupplier {
    fn sample_buffer(&self, asset: AssetId) -> Option<Arc<SampleBuffer>>;
}

/// Default [`AudioSupplier`]: an arena of buffers already converted to the
/// output sample rate.
#[derive(Debug)]
pub struct SampleLibrary {
    sample_rate: u32,
    buffers: SlotMap<Arc<SampleBuffer>>,
}

impl SampleLibrary {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            buffers: SlotMap::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Adds a buffer and returns its handle.
    ///
    /// Buffers decoded at a different rate are resampled to the library's rate
    /// first.
    pub fn register(&mut self, buffer: Arc<SampleBuffer>) -> Result<AssetId> {
        let buffer = if buffer.sample_rate() != self.sample_rate {
            log::debug!(
                "Resampling {} samples from {} Hz to {} Hz",
                buffer.num_samples(),
                buffer.sample_rate(),
                self.sample_rate
            );
            Arc::new(buffer.resample(self.sample_rate)?)
        } else {
            buffer
        };

        Ok(AssetId(self.buffers.insert(buffer)))
    }

    /// Removes an asset. Streams already playing it keep their own reference.
    pub fn unload(&mut self, asset: AssetId) -> Option<Arc<SampleBuffer>> {
        self.buffers.remove(asset.0)
    }

    pub fn get(&self, asset: AssetId) -> Option<&Arc<SampleBuffer>> {
        self.buffers.get(asset.0)
    }

    pub fn contains(&self, asset: AssetId) -> bool {
        self.buffers.contains(asset.0)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl AudioSupplier for SampleLibrary {
    fn sample_buffer(&self, asset: AssetId) -> Option<Arc<SampleBuffer>> {
        self.get(asset).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_and_unload() {
        let mut library = SampleLibrary::new(44100);
        let buffer = Arc::new(SampleBuffer::from_interleaved_i16(&[1, 2, 3, 4], 44100));

        let id = library.register(buffer.clone()).unwrap();
        assert!(id.is_valid());
        assert!(library.contains(id));
        assert!(Arc::ptr_eq(&library.sample_buffer(id).unwrap(), &buffer));

        assert!(library.unload(id).is_some());
        assert!(library.sample_buffer(id).is_none());
        assert!(library.is_empty());

        // A new asset reusing the slot is not reachable through the old id.
        let other = library.register(buffer).unwrap();
        assert_ne!(id, other);
        assert!(library.get(id).is_none());
    }

    #[test]
    fn test_invalid_id_resolves_to_none() {
        let library = SampleLibrary::new(44100);
        assert!(!AssetId::INVALID.is_valid());
        assert!(library.sample_buffer(AssetId::INVALID).is_none());
    }

    #[test]
    fn test_register_resamples_to_library_rate() {
        let mut library = SampleLibrary::new(44100);
        let buffer = SampleBuffer::sine(440.0, 0.5, Duration::from_millis(20), 22050);
        let id = library.register(Arc::new(buffer.clone())).unwrap();

        let stored = library.get(id).unwrap();
        assert_eq!(stored.sample_rate(), 44100);
        assert_eq!(stored.num_samples(), buffer.num_samples() * 2);
    }
}
