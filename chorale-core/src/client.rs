use crate::audio_data::{AssetId, AudioSupplier, SampleBuffer};
use crate::channel::ChannelState;
use crate::config::AudioSystemDesc;
use crate::effect::AudioEffect;
use crate::exchange::{Command, ExchangeBuffer, ExchangeStatus};
use crate::playback::{PlaybackId, PlaybackInfo, StreamObject};
use crate::slot_map::SlotMap;
use std::sync::Arc;

/// Result of [`AudioClient::update_main`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Reconciled with the audio thread; `released` finished streams were freed
    Synced { released: usize },
    /// The audio thread held the exchange; everything queued stays queued
    Contended,
}

impl SyncOutcome {
    pub fn is_synced(self) -> bool {
        matches!(self, Self::Synced { .. })
    }
}

/// Game-logic side of the audio system.
///
/// All calls are cheap and non-blocking: they edit the client's private copy
/// of the exchange. [`update_main`](Self::update_main) publishes those edits
/// to the audio thread once per tick and frees streams that finished playing.
///
/// # Architecture
///
/// - **Client thread**: owns the `AudioClient`, starts streams, edits channels
/// - **Audio thread**: owns the `AudioProcessor`, mixes and feeds the device
pub struct AudioClient {
    exchange: Arc<ExchangeBuffer>,
    max_streams: usize,

    streams: SlotMap<Arc<StreamObject>>,
    current: Vec<Arc<StreamObject>>,
    incoming: Vec<Arc<StreamObject>>,
    finished: Vec<Arc<StreamObject>>,
    commands: Vec<Command>,
    channels: Vec<ChannelState>,
    channels_revision: u64,
    status: ExchangeStatus,
}

impl AudioClient {
    pub fn new(desc: &AudioSystemDesc, exchange: Arc<ExchangeBuffer>) -> Self {
        Self {
            exchange,
            max_streams: desc.max_streams,
            streams: SlotMap::with_capacity(desc.max_streams),
            current: Vec::with_capacity(desc.max_streams),
            incoming: Vec::new(),
            finished: Vec::with_capacity(desc.max_streams),
            commands: Vec::new(),
            channels: vec![ChannelState::new(); desc.channel_count],
            channels_revision: 0,
            status: ExchangeStatus::default(),
        }
    }

    /// Starts playing an asset and returns a handle to the new stream.
    ///
    /// `volume` and `panning` are clamped to `[0, 1]`, `channel` wraps around
    /// the channel count and `duration` (in samples) defaults to the whole
    /// buffer. Returns [`PlaybackId::INVALID`] when the asset is unknown or
    /// empty, or when `max_streams` streams are already alive.
    ///
    /// The stream reaches the audio thread on the next successful
    /// [`update_main`](Self::update_main).
    pub fn play_pcm(
        &mut self,
        supplier: &dyn AudioSupplier,
        asset: AssetId,
        volume: f32,
        panning: f32,
        channel: usize,
        duration: Option<u32>,
    ) -> PlaybackId {
        let Some(buffer) = supplier.sample_buffer(asset) else {
            log::warn!("Cannot play {}: asset not found", asset);
            return PlaybackId::INVALID;
        };
        if buffer.is_empty() {
            log::warn!("Cannot play {}: buffer is empty", asset);
            return PlaybackId::INVALID;
        }
        if self.streams.len() >= self.max_streams {
            log::warn!(
                "Cannot play {}: {} streams already active",
                asset,
                self.max_streams
            );
            return PlaybackId::INVALID;
        }

        let duration = duration
            .unwrap_or_else(|| u32::try_from(buffer.num_samples()).unwrap_or(u32::MAX));
        let channel = (channel % self.channels.len()) as u8;
        let stream = Arc::new(StreamObject::new(buffer, volume, panning, channel, duration));

        let id = PlaybackId(self.streams.insert(stream.clone()));
        self.incoming.push(stream);
        log::debug!("Queued {} for {} on channel {}", id, asset, channel);
        id
    }

    /// Whether any stream in the last roster snapshot plays `buffer`.
    ///
    /// Buffers match by identity. A buffer the library resampled on
    /// registration is a different allocation from the one passed in, so
    /// look registered assets up with [`AudioClient::is_asset_active`].
    pub fn is_sample_active(&self, buffer: &Arc<SampleBuffer>) -> bool {
        self.current.iter().any(|s| Arc::ptr_eq(s.buffer(), buffer))
    }

    /// Whether any stream in the last roster snapshot plays `asset`.
    pub fn is_asset_active(&self, supplier: &dyn AudioSupplier, asset: AssetId) -> bool {
        supplier
            .sample_buffer(asset)
            .is_some_and(|buffer| self.is_sample_active(&buffer))
    }

    /// Number of streams in the last roster snapshot.
    pub fn num_active_playback_samples(&self) -> usize {
        self.current.len()
    }

    /// Streams created and not yet released, including ones still queued.
    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Appends an effect to a channel's chain.
    pub fn add_effect(&mut self, channel: usize, effect: Arc<dyn AudioEffect>) {
        if let Some(state) = self.channel_mut(channel) {
            state.add_effect(effect);
        }
    }

    /// Removes an effect from a channel, compared by handle identity.
    pub fn remove_effect(&mut self, channel: usize, effect: &Arc<dyn AudioEffect>) -> bool {
        self.channel_mut(channel)
            .is_some_and(|state| state.remove_effect(effect))
    }

    /// Clears a channel's effects and restores its default settings.
    pub fn reset(&mut self, channel: usize) {
        if let Some(state) = self.channel_mut(channel) {
            state.reset();
        }
    }

    pub fn keep_awake(&mut self, channel: usize, keep_awake: bool) {
        if let Some(state) = self.channel_mut(channel) {
            state.set_keep_awake(keep_awake);
        }
    }

    pub fn channel_set_volume(&mut self, channel: usize, volume: f32) {
        if let Some(state) = self.channel_mut(channel) {
            state.set_volume(volume);
        }
    }

    pub fn channel_set_panning(&mut self, channel: usize, panning: f32) {
        if let Some(state) = self.channel_mut(channel) {
            state.set_panning(panning);
        }
    }

    pub fn channel_volume(&self, channel: usize) -> Option<f32> {
        self.channels.get(channel).map(ChannelState::volume)
    }

    pub fn channel_panning(&self, channel: usize) -> Option<f32> {
        self.channels.get(channel).map(ChannelState::panning)
    }

    /// Asks the audio thread to stop every active stream.
    pub fn request_active_sample_dump(&mut self) {
        self.queue_command(Command::DumpAllSamples);
    }

    fn queue_command(&mut self, command: Command) {
        if !self.commands.contains(&command) {
            self.commands.push(command);
        }
    }

    // Mutable channel access marks the channel settings as changed.
    fn channel_mut(&mut self, channel: usize) -> Option<&mut ChannelState> {
        let count = self.channels.len();
        match self.channels.get_mut(channel) {
            Some(state) => {
                self.channels_revision += 1;
                Some(state)
            }
            None => {
                log::warn!("Channel {} out of range (0..{})", channel, count);
                None
            }
        }
    }

    /// Reconciles with the audio thread. Call once per tick.
    ///
    /// On contention nothing is lost; the queued work is published on a later
    /// call.
    pub fn update_main(&mut self) -> SyncOutcome {
        let Some(mut shared) = self.exchange.try_acquire() else {
            log::trace!("Exchange busy, deferring sync");
            return SyncOutcome::Contended;
        };

        self.current.clone_from(&shared.current);
        // At most one pending Stop per stream and one dump.
        for command in self.commands.drain(..) {
            if !shared.commands.contains(&command) {
                shared.commands.push(command);
            }
        }
        shared.incoming.append(&mut self.incoming);
        if shared.channels_revision != self.channels_revision {
            // Replaces the chains the processor swapped out, releasing them here.
            shared.channels.clone_from(&self.channels);
            shared.channels_revision = self.channels_revision;
        }
        self.finished.append(&mut shared.finished);
        self.status = shared.status;
        drop(shared);

        SyncOutcome::Synced {
            released: self.release_finished(),
        }
    }

    fn release_finished(&mut self) -> usize {
        let mut released = 0;
        for stream in self.finished.drain(..) {
            match self.streams.find(|s| Arc::ptr_eq(s, &stream)) {
                Some(key) => {
                    self.streams.remove(key);
                    released += 1;
                }
                None => log::warn!("Finished stream {} has no handle", stream.serial()),
            }
        }
        if released > 0 {
            log::debug!("Released {} finished streams", released);
        }
        released
    }

    fn stream(&self, id: PlaybackId) -> Option<&Arc<StreamObject>> {
        self.streams.get(id.0)
    }

    /// Whether `id` refers to a stream that has not finished.
    pub fn is_valid(&self, id: PlaybackId) -> bool {
        self.stream(id).is_some_and(|s| !s.is_destroyed())
    }

    pub fn playback_info(&self, id: PlaybackId) -> Option<PlaybackInfo> {
        self.stream(id).map(|s| PlaybackInfo::from_stream(s))
    }

    pub fn set_volume(&self, id: PlaybackId, volume: f32) {
        if let Some(stream) = self.stream(id) {
            stream.client_set_volume(volume);
        }
    }

    pub fn set_panning(&self, id: PlaybackId, panning: f32) {
        if let Some(stream) = self.stream(id) {
            stream.client_set_panning(panning);
        }
    }

    pub fn set_repeat(&self, id: PlaybackId, repeat: bool) {
        if let Some(stream) = self.stream(id) {
            stream.client_set_repeat(repeat);
        }
    }

    /// Moves the playhead to `fraction` (`0..=1`) of the stream's length.
    pub fn seek(&self, id: PlaybackId, fraction: f32) {
        if let Some(stream) = self.stream(id) {
            let target = fraction.clamp(0.0, 1.0) * stream.effective_end() as f32;
            stream.client_request_seek(target as u32);
        }
    }

    pub fn set_channel(&self, id: PlaybackId, channel: usize) {
        if let Some(stream) = self.stream(id) {
            stream.client_set_channel((channel % self.channels.len()) as u8);
        }
    }

    pub fn pause(&self, id: PlaybackId) {
        if let Some(stream) = self.stream(id) {
            stream.client_set_paused(true);
        }
    }

    pub fn resume(&self, id: PlaybackId) {
        if let Some(stream) = self.stream(id) {
            stream.client_set_paused(false);
        }
    }

    /// Stops a stream. Its handle becomes invalid once the audio thread has
    /// handed it back.
    pub fn stop(&mut self, id: PlaybackId) {
        let Some(stream) = self.stream(id) else {
            return;
        };
        if !stream.is_destroyed() {
            let serial = stream.serial();
            self.queue_command(Command::Stop(serial));
        }
    }
}

impl std::fmt::Debug for AudioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClient")
            .field("streams", &self.streams.len())
            .field("pending", &self.incoming.len())
            .field("channels", &self.channels.len())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
