use crate::error::{ChoraleError, Result};
use crate::sink::{HardwareSink, UnderrunFiller, UnderrunPolicy};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Sender, bounded};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;

/// State the device callback shares with the sink.
#[derive(Debug)]
struct CallbackShared {
    underrun: AtomicBool,
    enabled: AtomicBool,
    volume_multiplier: AtomicU32,
    last_left: AtomicU32,
    last_right: AtomicU32,
}

impl CallbackShared {
    fn volume_multiplier(&self) -> f32 {
        f32::from_bits(self.volume_multiplier.load(Ordering::Relaxed))
    }
}

/// The cpal stream lives on its own thread because `cpal::Stream` is not
/// `Send` on every platform. Dropping `shutdown` ends that thread.
struct OutputThread {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    device_name: String,
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Hardware sink on top of the default cpal output device.
///
/// Pushed samples go into a lock-free ring buffer that the device callback
/// drains. When the ring runs dry the callback fills the gap according to
/// the configured [`UnderrunPolicy`] and raises the underrun flag.
pub struct CpalSink {
    sample_rate: u32,
    capacity: usize,
    policy: UnderrunPolicy,
    history_frames: usize,
    shared: Arc<CallbackShared>,
    producer: Option<ringbuf::HeapProd<f32>>,
    output: Option<OutputThread>,
}

impl CpalSink {
    /// # Arguments
    /// * `sample_rate` - Output rate requested from the device
    /// * `capacity` - Interleaved samples the ring buffer holds (rounded up to even)
    /// * `policy` - Gap filling strategy used by the device callback
    /// * `history_frames` - Output history replayed by the ring/taper policies
    pub fn new(
        sample_rate: u32,
        capacity: usize,
        policy: UnderrunPolicy,
        history_frames: usize,
    ) -> Self {
        Self {
            sample_rate,
            capacity: (capacity.max(2) + 1) & !1,
            policy,
            history_frames,
            shared: Arc::new(CallbackShared {
                underrun: AtomicBool::new(false),
                enabled: AtomicBool::new(true),
                volume_multiplier: AtomicU32::new(0.5f32.to_bits()),
                last_left: AtomicU32::new(0),
                last_right: AtomicU32::new(0),
            }),
            producer: None,
            output: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.output.is_some()
    }

    /// Name of the opened device, if connected.
    pub fn device_name(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.device_name.as_str())
    }

    fn open(&mut self) -> Result<()> {
        let (producer, consumer) = HeapRb::<f32>::new(self.capacity).split();
        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let sample_rate = self.sample_rate;
        let callback = OutputCallback::new(
            consumer,
            UnderrunFiller::new(self.policy, self.history_frames),
            self.shared.clone(),
            self.capacity,
        );

        let handle = std::thread::Builder::new()
            .name("chorale-output".into())
            .spawn(move || {
                let stream = match start_stream(sample_rate, callback) {
                    Ok((stream, device_name)) => {
                        let _ = ready_tx.send(Ok(device_name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the sink drops its sender.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| {
                ChoraleError::AudioDevice(format!("Failed to spawn output thread: {}", e))
            })?;

        let device_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(ChoraleError::AudioDevice(
                    "Output thread exited before opening a stream".into(),
                ));
            }
        };

        log::info!(
            "Opened output device '{}' at {} Hz ({} sample queue)",
            device_name,
            sample_rate,
            self.capacity
        );

        self.producer = Some(producer);
        self.output = Some(OutputThread {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
            device_name,
        });
        Ok(())
    }
}

impl std::fmt::Debug for CpalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalSink")
            .field("sample_rate", &self.sample_rate)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("device", &self.device_name())
            .finish()
    }
}

impl HardwareSink for CpalSink {
    fn name(&self) -> &str {
        "cpal"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        match self.open() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to connect audio output: {}", e);
                false
            }
        }
    }

    /// Takes effect on the next `connect`.
    fn set_sample_rate(&mut self, sample_rate: u32) {
        if self.is_connected() && sample_rate != self.sample_rate {
            log::warn!(
                "Sample rate change to {} Hz ignored while the device is open",
                sample_rate
            );
            return;
        }
        self.sample_rate = sample_rate;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn push_data(&mut self, samples: &[f32]) -> usize {
        let Some(producer) = self.producer.as_mut() else {
            return samples.len();
        };
        // Whole frames only, so left and right never swap.
        let room = producer.vacant_len() & !1;
        let accepted = producer.push_slice(&samples[..samples.len().min(room) & !1]);
        samples.len() - accepted
    }

    fn underrun(&self) -> bool {
        self.shared.underrun.swap(false, Ordering::Relaxed)
    }

    fn enable_output(&mut self, enable: bool) {
        self.shared.enabled.store(enable, Ordering::Relaxed);
    }

    fn set_volume_multiplier(&mut self, volume: f32) {
        self.shared
            .volume_multiplier
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn volume_multiplier(&self) -> f32 {
        self.shared.volume_multiplier()
    }

    fn current_output_sample(&self) -> (f32, f32) {
        (
            f32::from_bits(self.shared.last_left.load(Ordering::Relaxed)),
            f32::from_bits(self.shared.last_right.load(Ordering::Relaxed)),
        )
    }

    fn pending_samples(&self) -> usize {
        self.producer
            .as_ref()
            .map_or(0, |producer| producer.occupied_len() / 2)
    }
}

/// Opens the default device and starts a stereo stream in its native sample
/// format.
fn start_stream(sample_rate: u32, callback: OutputCallback) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| {
        ChoraleError::AudioDevice("No default output device available".into())
    })?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());

    let default_config = device
        .default_output_config()
        .map_err(|e| ChoraleError::AudioDevice(format!("Failed to get default config: {}", e)))?;

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, callback)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, callback)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, callback)?,
        format => {
            return Err(ChoraleError::AudioFormat(format!(
                "Unsupported sample format: {:?}",
                format
            )));
        }
    };

    stream
        .play()
        .map_err(|e| ChoraleError::AudioDevice(format!("Failed to start stream: {}", e)))?;

    Ok((stream, device_name))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: OutputCallback,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| callback.render(data),
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| ChoraleError::AudioDevice(format!("Failed to build stream: {}", e)))
}

/// Everything the device callback owns. The scratch block is sized once, up
/// front; device blocks larger than it are rendered in pieces.
struct OutputCallback {
    consumer: ringbuf::HeapCons<f32>,
    filler: UnderrunFiller,
    shared: Arc<CallbackShared>,
    scratch: Vec<f32>,
}

impl OutputCallback {
    fn new(
        consumer: ringbuf::HeapCons<f32>,
        filler: UnderrunFiller,
        shared: Arc<CallbackShared>,
        scratch_samples: usize,
    ) -> Self {
        Self {
            consumer,
            filler,
            shared,
            // Even, so pieces never split a frame.
            scratch: vec![0.0; (scratch_samples.max(2) + 1) & !1],
        }
    }

    fn render<T>(&mut self, data: &mut [T])
    where
        T: SizedSample + FromSample<f32>,
    {
        let gain = if self.shared.enabled.load(Ordering::Relaxed) {
            self.shared.volume_multiplier()
        } else {
            0.0
        };

        for piece in data.chunks_mut(self.scratch.len()) {
            let block = &mut self.scratch[..piece.len()];
            let consumer = &mut self.consumer;

            // Pop whole frames only.
            let mut available = consumer.occupied_len().min(piece.len()) & !1;
            let missing = self.filler.fill(block, || {
                if available == 0 {
                    return None;
                }
                available -= 1;
                consumer.try_pop()
            });
            if missing > 0 {
                self.shared.underrun.store(true, Ordering::Relaxed);
            }

            for (out, &sample) in piece.iter_mut().zip(block.iter()) {
                *out = T::from_sample(sample * gain);
            }

            if let [.., left, right] = block {
                self.shared
                    .last_left
                    .store((*left * gain).to_bits(), Ordering::Relaxed);
                self.shared
                    .last_right
                    .store((*right * gain).to_bits(), Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconnected_sink_rejects_everything() {
        let mut sink = CpalSink::new(44100, 64, UnderrunPolicy::Silence, 16);
        assert!(!sink.is_connected());
        assert_eq!(sink.push_data(&[0.0; 10]), 10);
        assert_eq!(sink.pending_samples(), 0);
        assert!(!sink.underrun());
    }

    #[test]
    fn test_capacity_is_even() {
        let sink = CpalSink::new(44100, 63, UnderrunPolicy::Silence, 16);
        assert_eq!(sink.capacity, 64);
    }

    #[test]
    fn test_volume_multiplier_defaults_and_clamps() {
        let mut sink = CpalSink::new(44100, 64, UnderrunPolicy::Taper, 16);
        assert_eq!(sink.volume_multiplier(), 0.5);
        sink.set_volume_multiplier(2.0);
        assert_eq!(sink.volume_multiplier(), 1.0);
    }

    #[test]
    fn test_callback_renders_large_blocks_without_growing() {
        let sink = CpalSink::new(44100, 4, UnderrunPolicy::Silence, 16);
        let (mut producer, consumer) = HeapRb::<f32>::new(8).split();
        producer.push_slice(&[0.2, 0.4, 0.6, 0.8, 1.0, 1.0]);
        let filler = UnderrunFiller::new(UnderrunPolicy::Silence, 16);
        let mut callback = OutputCallback::new(consumer, filler, sink.shared.clone(), 4);

        let mut data = [9.0f32; 10];
        callback.render(&mut data);

        assert_eq!(callback.scratch.len(), 4);
        let expected = [0.1, 0.2, 0.3, 0.4, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0];
        for (got, want) in data.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
        }
        assert!(sink.underrun());
        assert_eq!(sink.current_output_sample(), (0.0, 0.0));
    }
}
