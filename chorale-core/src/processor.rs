use crate::channel::{ChannelState, Limiter};
use crate::config::{AudioSystemDesc, ClampPolicy, PanLaw};
use crate::exchange::{Command, ExchangeBuffer, ExchangeStatus};
use crate::playback::StreamObject;
use crate::sink::HardwareSink;
use std::sync::Arc;

/// Outcome of one [`AudioProcessor::process`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Stereo frames mixed
    pub frames: usize,
    /// Interleaved samples the sink accepted
    pub accepted: usize,
    /// Interleaved samples the sink refused; they are dropped
    pub rejected: usize,
    /// Whether this pass reconciled with the client
    pub synced: bool,
    /// Destroyed streams handed back to the client during this pass
    pub released: usize,
    /// Whether the sink reported an underrun since the previous pass
    pub underrun: bool,
}

/// The audio-thread half of the system: owns the stream roster, the channel
/// buses and the hardware sink, and produces mixed blocks.
///
/// Nothing here blocks on the client. Reconciliation is skipped when the
/// exchange is held by the other side, and mixing continues with the state
/// already on hand.
pub struct AudioProcessor {
    sample_rate: u32,
    block_size: usize,
    pan_law: PanLaw,
    clamp_policy: ClampPolicy,
    limiter: bool,
    sink_frames: usize,

    exchange: Arc<ExchangeBuffer>,
    roster: Vec<Arc<StreamObject>>,
    channels: Vec<ChannelState>,
    channels_revision: u64,

    master_limiter: Limiter,
    mix: Vec<f32>,
    sink: Box<dyn HardwareSink>,

    blocks_mixed: u64,
    samples_rejected: u64,
}

impl AudioProcessor {
    pub fn new(
        desc: &AudioSystemDesc,
        exchange: Arc<ExchangeBuffer>,
        sink: Box<dyn HardwareSink>,
    ) -> Self {
        let block_samples = desc.block_samples();
        let channels = (0..desc.channel_count)
            .map(|_| {
                let mut channel = ChannelState::new();
                channel.reserve_scratch(block_samples);
                channel
            })
            .collect();

        Self {
            sample_rate: desc.sample_rate,
            block_size: desc.block_size,
            pan_law: desc.pan_law,
            clamp_policy: desc.clamp_policy,
            limiter: desc.limiter,
            sink_frames: desc.sink_capacity() / 2,
            exchange,
            roster: Vec::with_capacity(desc.max_streams),
            channels,
            channels_revision: 0,
            master_limiter: Limiter::default(),
            mix: vec![0.0; block_samples],
            sink,
            blocks_mixed: 0,
            samples_rejected: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sink(&self) -> &dyn HardwareSink {
        self.sink.as_ref()
    }

    pub fn sink_mut(&mut self) -> &mut dyn HardwareSink {
        self.sink.as_mut()
    }

    /// Streams currently in the roster, including destroyed ones not yet
    /// handed back.
    pub fn active_streams(&self) -> usize {
        self.roster.len()
    }

    pub fn blocks_mixed(&self) -> u64 {
        self.blocks_mixed
    }

    /// Reconciles with the shared exchange if it is free.
    ///
    /// Returns `None` on contention, otherwise the number of destroyed
    /// streams handed back to the client.
    pub fn sync(&mut self) -> Option<usize> {
        let mut shared = self.exchange.try_acquire()?;

        self.roster.append(&mut shared.incoming);

        if shared.channels_revision != self.channels_revision {
            for (mine, theirs) in self.channels.iter_mut().zip(shared.channels.iter_mut()) {
                mine.adopt_settings(theirs);
            }
            self.channels_revision = shared.channels_revision;
        }

        // Drained in place: the queue's storage stays with the client side.
        Self::run_commands(&mut shared.commands, &self.roster);

        // The roster's reference is dropped here, but the clone pushed to
        // `finished` keeps the object alive until the client releases it.
        let released_before = shared.finished.len();
        let finished = &mut shared.finished;
        self.roster.retain(|stream| {
            if stream.is_destroyed() {
                finished.push(stream.clone());
                false
            } else {
                true
            }
        });
        let released = shared.finished.len() - released_before;

        shared.current.clear();
        shared.current.extend(self.roster.iter().cloned());
        shared.status = ExchangeStatus {
            active_streams: self.roster.len(),
            blocks_mixed: self.blocks_mixed,
            samples_rejected: self.samples_rejected,
        };

        Some(released)
    }

    fn run_commands(commands: &mut Vec<Command>, roster: &[Arc<StreamObject>]) {
        for command in commands.drain(..) {
            match command {
                Command::DumpAllSamples => {
                    for stream in roster {
                        stream.processor_mark_destroyed();
                    }
                }
                Command::Stop(serial) => {
                    if let Some(stream) = roster.iter().find(|s| s.serial() == serial) {
                        stream.processor_mark_destroyed();
                    }
                }
            }
        }
    }

    /// Reconciles, mixes up to one block of `frames` frames and pushes it to
    /// the sink. Samples the sink rejects are dropped.
    pub fn process(&mut self, frames: usize) -> PushReport {
        let released = self.sync();
        let frames = frames.min(self.block_size);
        let samples = frames * 2;

        self.mix_block(frames);
        let rejected = self.sink.push_data(&self.mix[..samples]).min(samples);
        if rejected > 0 {
            self.samples_rejected += rejected as u64;
            log::trace!("Sink rejected {} of {} samples", rejected, samples);
        }

        PushReport {
            frames,
            accepted: samples - rejected,
            rejected,
            synced: released.is_some(),
            released: released.unwrap_or(0),
            underrun: self.sink.underrun(),
        }
    }

    /// Pull-style rendering: reconciles and fills `out` with interleaved
    /// stereo, bypassing the sink. Returns the number of frames rendered.
    pub fn render_into(&mut self, out: &mut [f32]) -> usize {
        self.sync();

        let block_samples = self.block_size * 2;
        for chunk in out.chunks_mut(block_samples) {
            let frames = chunk.len() / 2;
            self.mix_block(frames);
            chunk[..frames * 2].copy_from_slice(&self.mix[..frames * 2]);
            // A dangling odd sample gets silence.
            chunk[frames * 2..].fill(0.0);
        }
        out.len() / 2
    }

    /// How many frames to mix on the next pass.
    ///
    /// Tops the sink up to a target fill of one client tick plus 10%, capped
    /// by the sink's capacity and by `block_size`. A sink already at or above
    /// the target gets nothing.
    pub fn frames_for_next_push(&self, ticks_per_second: u32) -> usize {
        let target = (self.sample_rate as f32 / ticks_per_second.max(1) as f32 * 1.1) as usize;
        let target = target.min(self.sink_frames);
        target
            .saturating_sub(self.sink.pending_samples())
            .min(self.block_size)
    }

    /// Mixes `frames` frames from the roster into `self.mix`.
    fn mix_block(&mut self, frames: usize) {
        let samples = frames * 2;
        let channel_count = self.channels.len();

        for channel in &mut self.channels {
            channel.begin_block();
        }

        for stream in &self.roster {
            stream.processor_apply_seek();
            if stream.is_paused() || stream.is_destroyed() {
                continue;
            }
            let channel = &mut self.channels[stream.channel() as usize % channel_count];
            stream.processor_mix_into(channel.scratch_mut(samples), frames, self.pan_law);
        }

        let out = &mut self.mix[..samples];
        out.fill(0.0);

        let clamp_between = self.clamp_policy.clamps_between_effects();
        for channel in &mut self.channels {
            let volume = channel.volume();
            let (left_gain, right_gain) = self.pan_law.gains(channel.panning());
            let Some(block) = channel.finish_block(samples, clamp_between, self.limiter) else {
                continue;
            };

            for (frame, input) in out.chunks_exact_mut(2).zip(block.chunks_exact(2)) {
                frame[0] += input[0] * left_gain * volume;
                frame[1] += input[1] * right_gain * volume;
            }
        }

        if self.limiter {
            self.master_limiter.apply(out);
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.blocks_mixed += 1;
    }
}

impl std::fmt::Debug for AudioProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioProcessor")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("streams", &self.roster.len())
            .field("channels", &self.channels.len())
            .field("sink", &self.sink.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::{SampleBuffer, StereoSample};
    use crate::effect::{AudioEffect, Gain};
    use crate::exchange::ExchangeState;
    use std::sync::Mutex;

    /// Sink that records what it accepts, optionally refusing part of each push.
    #[derive(Default)]
    struct RecordingSink {
        recorded: Arc<Mutex<Vec<f32>>>,
        accept_limit: Option<usize>,
        pending: usize,
    }

    impl HardwareSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }
        fn version(&self) -> &str {
            "test"
        }
        fn connect(&mut self) -> bool {
            true
        }
        fn set_sample_rate(&mut self, _sample_rate: u32) {}
        fn sample_rate(&self) -> u32 {
            44100
        }
        fn push_data(&mut self, samples: &[f32]) -> usize {
            let accepted = self.accept_limit.map_or(samples.len(), |l| l.min(samples.len()));
            self.recorded
                .lock()
                .unwrap()
                .extend_from_slice(&samples[..accepted]);
            samples.len() - accepted
        }
        fn underrun(&self) -> bool {
            false
        }
        fn enable_output(&mut self, _enable: bool) {}
        fn set_volume_multiplier(&mut self, _volume: f32) {}
        fn volume_multiplier(&self) -> f32 {
            1.0
        }
        fn current_output_sample(&self) -> (f32, f32) {
            (0.0, 0.0)
        }
        fn pending_samples(&self) -> usize {
            self.pending
        }
    }

    struct Fixture {
        exchange: Arc<ExchangeBuffer>,
        processor: AudioProcessor,
        recorded: Arc<Mutex<Vec<f32>>>,
    }

    fn fixture(desc: AudioSystemDesc, sink: RecordingSink) -> Fixture {
        let exchange = Arc::new(ExchangeBuffer::new(ExchangeState::with_capacity(
            desc.max_streams,
            desc.channel_count,
        )));
        let recorded = sink.recorded.clone();
        let processor = AudioProcessor::new(&desc, exchange.clone(), Box::new(sink));
        Fixture {
            exchange,
            processor,
            recorded,
        }
    }

    fn desc() -> AudioSystemDesc {
        AudioSystemDesc::default().block_size(256).channel_count(4)
    }

    fn ramp(frames: i16) -> Arc<SampleBuffer> {
        let frames = (0..frames).map(|i| StereoSample::new(i * 10, -i * 10)).collect();
        Arc::new(SampleBuffer::from_frames(frames, 44100))
    }

    fn start(exchange: &ExchangeBuffer, stream: &Arc<StreamObject>) {
        exchange.try_acquire().unwrap().incoming.push(stream.clone());
    }

    #[test]
    fn test_known_buffer_mixes_to_normalized_values() {
        let mut f = fixture(desc(), RecordingSink::default());
        let buffer = Arc::new(SampleBuffer::from_frames(
            vec![
                StereoSample::new(32767, -32768),
                StereoSample::new(0, 16384),
                StereoSample::new(-16384, 0),
                StereoSample::new(100, -100),
            ],
            44100,
        ));
        let stream = Arc::new(StreamObject::new(buffer, 1.0, 0.5, 0, 4));
        start(&f.exchange, &stream);

        let report = f.processor.process(8);
        assert_eq!(report.frames, 8);
        assert_eq!(report.rejected, 0);
        assert!(stream.is_destroyed());

        let recorded = f.recorded.lock().unwrap();
        let max = i16::MAX as f32;
        let expected = [
            1.0,
            -1.0,
            0.0,
            16384.0 / max,
            -16384.0 / max,
            0.0,
            100.0 / max,
            -100.0 / max,
        ];
        for (got, want) in recorded[..8].iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
        }
        assert!(recorded[8..16].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_back_to_back_passes_advance_once_each() {
        let mut f = fixture(desc(), RecordingSink::default());
        let stream = Arc::new(StreamObject::new(ramp(16), 1.0, 0.5, 0, 16));
        start(&f.exchange, &stream);

        f.processor.process(3);
        assert_eq!(stream.playhead(), 3);
        f.processor.process(3);
        assert_eq!(stream.playhead(), 6);
        assert!(!stream.is_destroyed());
    }

    #[test]
    fn test_finished_stream_is_silent_and_handed_back() {
        let mut f = fixture(desc(), RecordingSink::default());
        let stream = Arc::new(StreamObject::new(ramp(4), 1.0, 0.5, 0, 4));
        start(&f.exchange, &stream);

        f.processor.process(4);
        assert!(stream.is_destroyed());
        // Still in the roster until the next reconciliation.
        assert_eq!(f.processor.active_streams(), 1);

        let report = f.processor.process(4);
        assert_eq!(report.released, 1);
        assert_eq!(f.processor.active_streams(), 0);
        assert!(f.recorded.lock().unwrap()[8..].iter().all(|&s| s == 0.0));

        let shared = f.exchange.try_acquire().unwrap();
        assert!(Arc::ptr_eq(&shared.finished[0], &stream));
        assert!(shared.current.is_empty());
    }

    #[test]
    fn test_repeating_stream_loops() {
        let mut f = fixture(desc(), RecordingSink::default());
        let stream = Arc::new(StreamObject::new(ramp(3), 1.0, 0.5, 0, 3));
        stream.client_set_repeat(true);
        start(&f.exchange, &stream);

        f.processor.process(7);
        assert!(!stream.is_destroyed());
        let recorded = f.recorded.lock().unwrap();
        let lefts: Vec<i32> = recorded
            .chunks_exact(2)
            .map(|frame| (frame[0] * i16::MAX as f32).round() as i32)
            .collect();
        assert_eq!(lefts, vec![0, 10, 20, 0, 10, 20, 0]);
    }

    #[test]
    fn test_rejected_samples_are_not_repushed() {
        let sink = RecordingSink {
            accept_limit: Some(70),
            ..Default::default()
        };
        let mut f = fixture(desc(), sink);
        let stream = Arc::new(StreamObject::new(ramp(200), 1.0, 0.5, 0, 200));
        start(&f.exchange, &stream);

        let report = f.processor.process(50);
        assert_eq!(report.accepted, 70);
        assert_eq!(report.rejected, 30);

        f.processor.process(50);
        let recorded = f.recorded.lock().unwrap();
        assert_eq!(recorded.len(), 140);
        // The second push starts at frame 50, not at the first rejected frame.
        assert_eq!((recorded[70] * i16::MAX as f32).round() as i32, 500);
        assert_eq!(stream.playhead(), 100);
    }

    #[test]
    fn test_contention_keeps_queued_streams() {
        let mut f = fixture(desc(), RecordingSink::default());
        let stream = Arc::new(StreamObject::new(ramp(8), 1.0, 0.5, 0, 8));
        start(&f.exchange, &stream);

        {
            let _held = f.exchange.try_acquire().unwrap();
            let report = f.processor.process(4);
            assert!(!report.synced);
            assert_eq!(stream.playhead(), 0);
        }

        let report = f.processor.process(4);
        assert!(report.synced);
        assert_eq!(stream.playhead(), 4);
    }

    #[test]
    fn test_commands_destroy_streams() {
        let mut f = fixture(desc(), RecordingSink::default());
        let a = Arc::new(StreamObject::new(ramp(100), 1.0, 0.5, 0, 100));
        let b = Arc::new(StreamObject::new(ramp(100), 1.0, 0.5, 1, 100));
        start(&f.exchange, &a);
        start(&f.exchange, &b);
        f.processor.process(4);

        f.exchange
            .try_acquire()
            .unwrap()
            .commands
            .push(Command::Stop(a.serial()));
        f.processor.process(4);
        assert!(a.is_destroyed());
        assert!(!b.is_destroyed());

        f.exchange
            .try_acquire()
            .unwrap()
            .commands
            .push(Command::DumpAllSamples);
        f.processor.process(4);
        assert!(b.is_destroyed());
    }

    #[test]
    fn test_channel_settings_and_effects_apply() {
        let mut f = fixture(desc(), RecordingSink::default());
        let gain: Arc<dyn AudioEffect> = Arc::new(Gain::new(0.5));
        {
            let mut shared = f.exchange.try_acquire().unwrap();
            shared.channels[2].add_effect(gain.clone());
            shared.channels[2].set_panning(0.0);
            shared.channels_revision += 1;
        }
        let buffer = Arc::new(SampleBuffer::from_frames(
            vec![StereoSample::new(16384, 16384)],
            44100,
        ));
        let stream = Arc::new(StreamObject::new(buffer, 1.0, 0.5, 2, 1));
        start(&f.exchange, &stream);

        f.processor.process(1);
        let recorded = f.recorded.lock().unwrap();
        assert!((recorded[0] - 0.25).abs() < 1e-4);
        assert_eq!(recorded[1], 0.0);
    }

    #[test]
    fn test_effect_overshoot_is_clamped_at_output() {
        for policy in [ClampPolicy::FinalOnly, ClampPolicy::BetweenEffects] {
            let mut f = fixture(desc().clamp_policy(policy), RecordingSink::default());
            {
                let mut shared = f.exchange.try_acquire().unwrap();
                shared.channels[0].add_effect(Arc::new(Gain::new(4.0)));
                shared.channels[0].add_effect(Arc::new(Gain::new(0.5)));
                shared.channels_revision += 1;
            }
            let buffer = Arc::new(SampleBuffer::from_frames(
                vec![StereoSample::new(16384, -16384)],
                44100,
            ));
            let stream = Arc::new(StreamObject::new(buffer, 1.0, 0.5, 0, 1));
            start(&f.exchange, &stream);

            f.processor.process(1);
            let recorded = f.recorded.lock().unwrap();
            let expected = match policy {
                ClampPolicy::FinalOnly => 1.0,
                ClampPolicy::BetweenEffects => 0.5,
            };
            assert!((recorded[0] - expected).abs() < 1e-3);
            assert!(recorded.iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }

    #[test]
    fn test_render_into_bypasses_sink() {
        let mut f = fixture(desc().block_size(4), RecordingSink::default());
        let stream = Arc::new(StreamObject::new(ramp(10), 1.0, 0.5, 0, 10));
        start(&f.exchange, &stream);

        let mut out = vec![1.0; 20];
        assert_eq!(f.processor.render_into(&mut out), 10);
        assert!(f.recorded.lock().unwrap().is_empty());
        assert!(stream.is_destroyed());
        assert_eq!((out[18] * i16::MAX as f32).round() as i32, 90);
    }

    #[test]
    fn test_pacing_tops_up_to_target_fill() {
        // Target fill: 44100 / 60 * 1.1
        let f = fixture(AudioSystemDesc::default(), RecordingSink::default());
        assert_eq!(f.processor.frames_for_next_push(60), 808);

        let sink = RecordingSink {
            pending: 720,
            ..Default::default()
        };
        let f = fixture(AudioSystemDesc::default(), sink);
        assert_eq!(f.processor.frames_for_next_push(60), 88);

        let sink = RecordingSink {
            pending: 5000,
            ..Default::default()
        };
        let f = fixture(AudioSystemDesc::default(), sink);
        assert_eq!(f.processor.frames_for_next_push(60), 0);

        let f = fixture(
            AudioSystemDesc::default().block_size(512),
            RecordingSink::default(),
        );
        assert_eq!(f.processor.frames_for_next_push(60), 512);
    }

    #[test]
    fn test_pacing_target_fits_sink_capacity() {
        // 5 ms of buffer is 221 frames, well under one tick at 10 tps.
        let desc = AudioSystemDesc::default()
            .block_size(128)
            .buffer_duration(std::time::Duration::from_millis(5));
        let f = fixture(desc.clone(), RecordingSink::default());
        assert_eq!(f.processor.frames_for_next_push(10), 128);

        let sink = RecordingSink {
            pending: 200,
            ..Default::default()
        };
        let f = fixture(desc, sink);
        assert_eq!(f.processor.frames_for_next_push(10), 21);
    }

    #[test]
    fn test_commands_run_in_place() {
        let mut f = fixture(desc(), RecordingSink::default());
        let stream = Arc::new(StreamObject::new(ramp(100), 1.0, 0.5, 0, 100));
        start(&f.exchange, &stream);
        f.processor.process(4);

        let capacity = {
            let mut shared = f.exchange.try_acquire().unwrap();
            for _ in 0..200 {
                shared.commands.push(Command::Stop(stream.serial()));
            }
            shared.commands.capacity()
        };
        f.processor.process(4);
        assert!(stream.is_destroyed());

        // The queue was emptied where it lives; its storage did not move.
        let shared = f.exchange.try_acquire().unwrap();
        assert!(shared.commands.is_empty());
        assert_eq!(shared.commands.capacity(), capacity);
    }

    #[test]
    fn test_limiter_tames_loud_mix() {
        let mut f = fixture(desc().limiter(true), RecordingSink::default());
        let loud = Arc::new(SampleBuffer::from_frames(
            vec![StereoSample::new(i16::MAX, i16::MAX); 4],
            44100,
        ));
        for channel in 0..2 {
            let stream = Arc::new(StreamObject::new(loud.clone(), 1.0, 0.5, channel, 4));
            start(&f.exchange, &stream);
        }

        f.processor.process(4);
        let recorded = f.recorded.lock().unwrap();
        assert!(recorded.iter().all(|&s| s <= 1.0));
        assert!((recorded[0] - 1.0).abs() < 1e-6);
    }
}
