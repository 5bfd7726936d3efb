use crate::audio_data::SampleBuffer;
use crate::config::PanLaw;
use crate::slot_map::SlotKey;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Lightweight, type-safe handle for one playing stream.
///
/// Returned by [`AudioClient::play_pcm`](crate::AudioClient::play_pcm). A
/// handle whose stream has finished and been released by the client is
/// stale; every per-stream control ignores stale handles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlaybackId(pub(crate) SlotKey);

impl PlaybackId {
    pub const INVALID: Self = Self(SlotKey::NULL);

    pub fn is_valid(self) -> bool {
        !self.0.is_null()
    }
}

impl std::fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlaybackId({:#x})", self.0.to_bits())
    }
}

/// Playback state of a stream as last seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
    Finished,
}

/// Information about the current playback state of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackInfo {
    /// Current playhead in samples
    pub current_sample: usize,
    /// Number of samples the stream plays before ending or wrapping
    pub total_samples: usize,
    /// Current playback time in seconds
    pub current_time: f64,
    /// Total duration in seconds
    pub total_time: f64,
    /// Current playback state
    pub play_state: PlayState,
}

impl PlaybackInfo {
    pub(crate) fn from_stream(stream: &StreamObject) -> Self {
        let sample_rate = stream.buffer.sample_rate().max(1) as f64;
        let total_samples = stream.effective_end();
        let current_sample = (stream.playhead() as usize).min(total_samples);
        let play_state = if stream.is_destroyed() {
            PlayState::Finished
        } else if stream.is_paused() {
            PlayState::Paused
        } else {
            PlayState::Playing
        };

        Self {
            current_sample,
            total_samples,
            current_time: current_sample as f64 / sample_rate,
            total_time: total_samples as f64 / sample_rate,
            play_state,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.play_state == PlayState::Finished
    }
}

const NO_SEEK: u32 = u32::MAX;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// One active playback instance, shared between the client and the audio
/// thread.
///
/// Every field has exactly one writer. Setters prefixed `client_` belong to
/// the client thread, setters prefixed `processor_` to the audio thread. The
/// other side only reads. The buffer reference keeps the PCM alive for as
/// long as the stream exists.
#[derive(Debug)]
pub struct StreamObject {
    serial: u64,
    buffer: Arc<SampleBuffer>,
    duration: u32,

    // Client-written
    volume: AtomicU32,
    panning: AtomicU32,
    paused: AtomicBool,
    repeat: AtomicBool,
    channel: AtomicU8,
    pending_seek: AtomicU32,

    // Processor-written
    playhead: AtomicU32,
    destroyed: AtomicBool,
}

impl StreamObject {
    pub fn new(buffer: Arc<SampleBuffer>, volume: f32, panning: f32, channel: u8, duration: u32) -> Self {
        Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            buffer,
            duration,
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            panning: AtomicU32::new(panning.clamp(0.0, 1.0).to_bits()),
            paused: AtomicBool::new(false),
            repeat: AtomicBool::new(false),
            channel: AtomicU8::new(channel),
            pending_seek: AtomicU32::new(NO_SEEK),
            playhead: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Process-unique number identifying this stream in commands.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Requested play length in samples.
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// Sample index at which the stream ends or wraps: the requested duration,
    /// cut short by the end of the buffer.
    pub fn effective_end(&self) -> usize {
        (self.duration as usize).min(self.buffer.num_samples())
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn panning(&self) -> f32 {
        f32::from_bits(self.panning.load(Ordering::Relaxed))
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn repeats(&self) -> bool {
        self.repeat.load(Ordering::Relaxed)
    }

    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed)
    }

    pub fn playhead(&self) -> u32 {
        self.playhead.load(Ordering::Relaxed)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn client_set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn client_set_panning(&self, panning: f32) {
        self.panning
            .store(panning.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn client_set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn client_set_repeat(&self, repeat: bool) {
        self.repeat.store(repeat, Ordering::Relaxed);
    }

    pub fn client_set_channel(&self, channel: u8) {
        self.channel.store(channel, Ordering::Relaxed);
    }

    /// Asks the processor to move the playhead before the next block.
    pub fn client_request_seek(&self, sample: u32) {
        self.pending_seek
            .store(sample.min(NO_SEEK - 1), Ordering::Relaxed);
    }

    pub fn processor_mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    /// Applies a pending seek, if any.
    pub fn processor_apply_seek(&self) {
        let target = self.pending_seek.swap(NO_SEEK, Ordering::Relaxed);
        if target != NO_SEEK {
            let target = (target as usize).min(self.effective_end());
            self.playhead.store(target as u32, Ordering::Relaxed);
        }
    }

    /// Mixes up to `frames` frames of this stream into the interleaved
    /// `out` buffer and advances the playhead.
    ///
    /// Returns the number of frames written. Zero means the stream is paused,
    /// destroyed, or ended before producing anything.
    pub fn processor_mix_into(&self, out: &mut [f32], frames: usize, pan_law: PanLaw) -> usize {
        if self.is_destroyed() || self.is_paused() {
            return 0;
        }

        let end = self.effective_end();
        let repeat = self.repeats();
        let mut position = self.playhead() as usize;

        if position >= end {
            if repeat && end > 0 {
                position = 0;
            } else {
                self.processor_mark_destroyed();
                return 0;
            }
        }

        let volume = self.volume();
        let (left_gain, right_gain) = pan_law.gains(self.panning());
        let (left_gain, right_gain) = (left_gain * volume, right_gain * volume);
        let frames = frames.min(out.len() / 2);

        let mut written = 0;
        while written < frames {
            let count = (frames - written).min(end - position);
            let source = &self.buffer.frames()[position..position + count];
            let target = &mut out[written * 2..(written + count) * 2];

            for (frame, sample) in target.chunks_exact_mut(2).zip(source) {
                frame[0] += sample.normalized_left() * left_gain;
                frame[1] += sample.normalized_right() * right_gain;
            }

            written += count;
            position += count;

            if position >= end {
                if repeat {
                    position = 0;
                } else {
                    self.processor_mark_destroyed();
                    break;
                }
            }
        }

        self.playhead.store(position as u32, Ordering::Relaxed);
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::StereoSample;

    fn ramp(len: i16) -> Arc<SampleBuffer> {
        let frames = (0..len).map(|i| StereoSample::new(i * 1000, -i * 1000)).collect();
        Arc::new(SampleBuffer::from_frames(frames, 44100))
    }

    #[test]
    fn test_client_values_are_clamped() {
        let stream = StreamObject::new(ramp(4), 3.0, -1.0, 0, 4);
        assert_eq!(stream.volume(), 1.0);
        assert_eq!(stream.panning(), 0.0);

        stream.client_set_volume(-0.5);
        stream.client_set_panning(0.25);
        assert_eq!(stream.volume(), 0.0);
        assert_eq!(stream.panning(), 0.25);
    }

    #[test]
    fn test_plays_to_end_then_destroys() {
        let stream = StreamObject::new(ramp(4), 1.0, 0.5, 0, 4);
        let mut out = vec![0.0; 16];

        assert_eq!(stream.processor_mix_into(&mut out, 8, PanLaw::Balance), 4);
        assert!(stream.is_destroyed());
        assert_eq!(stream.playhead(), 4);
        assert!((out[6] - 3000.0 / 32767.0).abs() < 1e-6);
        assert!(out[8..].iter().all(|&s| s == 0.0));

        let mut after = vec![0.0; 16];
        assert_eq!(stream.processor_mix_into(&mut after, 8, PanLaw::Balance), 0);
        assert!(after.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_duration_shorter_than_buffer() {
        let stream = StreamObject::new(ramp(10), 1.0, 0.5, 0, 3);
        let mut out = vec![0.0; 20];
        assert_eq!(stream.processor_mix_into(&mut out, 10, PanLaw::Balance), 3);
        assert!(stream.is_destroyed());
    }

    #[test]
    fn test_repeat_wraps_within_block() {
        let stream = StreamObject::new(ramp(3), 1.0, 0.5, 0, 3);
        stream.client_set_repeat(true);
        let mut out = vec![0.0; 16];

        assert_eq!(stream.processor_mix_into(&mut out, 8, PanLaw::Balance), 8);
        assert!(!stream.is_destroyed());
        assert_eq!(stream.playhead(), 2);

        let lefts: Vec<f32> = out.chunks_exact(2).map(|f| f[0] * 32767.0 / 1000.0).collect();
        let expected = [0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0, 1.0];
        for (got, want) in lefts.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3);
        }
    }

    #[test]
    fn test_paused_stream_does_not_advance() {
        let stream = StreamObject::new(ramp(4), 1.0, 0.5, 0, 4);
        stream.client_set_paused(true);
        let mut out = vec![0.0; 8];
        assert_eq!(stream.processor_mix_into(&mut out, 4, PanLaw::Balance), 0);
        assert_eq!(stream.playhead(), 0);
        assert!(!stream.is_destroyed());
    }

    #[test]
    fn test_seek_is_applied_by_processor() {
        let stream = StreamObject::new(ramp(8), 1.0, 0.5, 0, 8);
        stream.client_request_seek(5);
        assert_eq!(stream.playhead(), 0);

        stream.processor_apply_seek();
        assert_eq!(stream.playhead(), 5);

        stream.client_request_seek(100);
        stream.processor_apply_seek();
        assert_eq!(stream.playhead(), 8);
    }

    #[test]
    fn test_playback_info() {
        let stream = StreamObject::new(ramp(4), 1.0, 0.5, 0, 4);
        let info = PlaybackInfo::from_stream(&stream);
        assert_eq!(info.total_samples, 4);
        assert_eq!(info.play_state, PlayState::Playing);

        stream.processor_mark_destroyed();
        assert!(PlaybackInfo::from_stream(&stream).is_finished());
    }
}
