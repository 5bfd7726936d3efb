use crate::audio_data::{AssetId, SampleBuffer, SampleLibrary};
use crate::client::{AudioClient, SyncOutcome};
use crate::config::AudioSystemDesc;
use crate::engine::AudioEngine;
use crate::error::Result;
use crate::events::AudioEvent;
use crate::exchange::{ExchangeBuffer, ExchangeState};
use crate::playback::PlaybackId;
use crate::processor::AudioProcessor;
use crate::sink::{CpalSink, HardwareSink, NullSink};
use std::sync::Arc;

/// Owns everything one audio output needs: the asset library, the client
/// API and the render engine.
///
/// Create one per output and keep it for the lifetime of the application.
/// Nothing in the crate is global, so several systems may coexist (for
/// example one per test).
///
/// # Example
///
/// ```no_run
/// use chorale_core::{AudioSystem, AudioSystemDesc, SampleBuffer};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let mut system = AudioSystem::new(AudioSystemDesc::default())?;
/// system.start()?;
///
/// let tone = SampleBuffer::sine(440.0, 0.5, Duration::from_secs(1), 44100);
/// let asset = system.register(Arc::new(tone))?;
/// system.play(asset, 1.0, 0.5, 0);
///
/// loop {
///     system.update();
///     if system.client().live_streams() == 0 {
///         break;
///     }
///     std::thread::sleep(Duration::from_millis(16));
/// }
/// # Ok::<(), chorale_core::ChoraleError>(())
/// ```
#[derive(Debug)]
pub struct AudioSystem {
    desc: AudioSystemDesc,
    library: SampleLibrary,
    client: AudioClient,
    engine: AudioEngine,
}

impl AudioSystem {
    /// Creates a system on the default cpal output device, falling back to a
    /// [`NullSink`] when no device can be opened.
    pub fn new(desc: AudioSystemDesc) -> Result<Self> {
        desc.validate()?;
        let sink = CpalSink::new(
            desc.sample_rate,
            desc.sink_capacity(),
            desc.underrun_policy,
            desc.underrun_history,
        );
        Self::with_sink(desc, Box::new(sink))
    }

    /// Creates a system on a caller-supplied sink.
    pub fn with_sink(desc: AudioSystemDesc, sink: Box<dyn HardwareSink>) -> Result<Self> {
        desc.validate()?;
        let sink = connect_sink(&desc, sink);

        let exchange = Arc::new(ExchangeBuffer::new(ExchangeState::with_capacity(
            desc.max_streams,
            desc.channel_count,
        )));
        let processor = AudioProcessor::new(&desc, exchange.clone(), sink);

        Ok(Self {
            library: SampleLibrary::new(desc.sample_rate),
            client: AudioClient::new(&desc, exchange),
            engine: AudioEngine::new(&desc, processor),
            desc,
        })
    }

    pub fn desc(&self) -> &AudioSystemDesc {
        &self.desc
    }

    pub fn start(&mut self) -> Result<()> {
        self.engine.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.engine.stop()
    }

    pub fn library(&self) -> &SampleLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut SampleLibrary {
        &mut self.library
    }

    pub fn client(&self) -> &AudioClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut AudioClient {
        &mut self.client
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine {
        &mut self.engine
    }

    /// Adds a buffer to the library, resampling it to the output rate.
    pub fn register(&mut self, buffer: Arc<SampleBuffer>) -> Result<AssetId> {
        self.library.register(buffer)
    }

    /// Removes an asset. Streams already playing it finish normally.
    pub fn unload(&mut self, asset: AssetId) -> bool {
        self.library.unload(asset).is_some()
    }

    /// Plays a whole asset once.
    pub fn play(&mut self, asset: AssetId, volume: f32, panning: f32, channel: usize) -> PlaybackId {
        self.client
            .play_pcm(&self.library, asset, volume, panning, channel, None)
    }

    /// Per-tick reconciliation with the render thread.
    pub fn update(&mut self) -> SyncOutcome {
        self.client.update_main()
    }

    pub fn poll_events(&self) -> Vec<AudioEvent> {
        self.engine.poll_events()
    }
}

fn connect_sink(desc: &AudioSystemDesc, mut sink: Box<dyn HardwareSink>) -> Box<dyn HardwareSink> {
    sink.set_sample_rate(desc.sample_rate);
    sink.set_volume_multiplier(desc.volume_multiplier);

    if sink.connect() {
        log::info!("Connected audio sink {} {}", sink.name(), sink.version());
        sink.enable_output(true);
        return sink;
    }

    log::warn!(
        "Audio sink {} failed to connect, continuing without output",
        sink.name()
    );
    let mut fallback = NullSink::new(desc.sample_rate);
    fallback.set_volume_multiplier(desc.volume_multiplier);
    Box::new(fallback)
}
