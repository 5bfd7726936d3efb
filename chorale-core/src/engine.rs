use crate::config::AudioSystemDesc;
use crate::error::{ChoraleError, Result};
use crate::events::AudioEvent;
use crate::processor::{AudioProcessor, PushReport};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const EVENT_CAPACITY: usize = 256;

/// Drives an [`AudioProcessor`] from a dedicated render thread.
///
/// Each pass tops the sink up to about one client tick ahead of the device, then sleeps for the render interval. Diagnostics
/// flow back through a bounded channel; when it is full new events are
/// dropped rather than blocking the render thread.
pub struct AudioEngine {
    render_interval: Duration,
    ticks_per_second: u32,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
    processor: Option<AudioProcessor>,
    thread: Option<JoinHandle<AudioProcessor>>,
    event_sender: Sender<AudioEvent>,
    event_receiver: Receiver<AudioEvent>,
}

impl AudioEngine {
    /// Create a new audio engine around a processor
    pub fn new(desc: &AudioSystemDesc, processor: AudioProcessor) -> Self {
        let (event_sender, event_receiver) = bounded(EVENT_CAPACITY);
        Self {
            render_interval: desc.render_interval,
            ticks_per_second: desc.ticks_per_second,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
            processor: Some(processor),
            thread: None,
            event_sender,
            event_receiver,
        }
    }

    /// Start the render thread
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let mut processor = self.processor.take().ok_or_else(|| {
            ChoraleError::Engine("Processor was lost after a render thread panic".into())
        })?;

        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();
        let events = self.event_sender.clone();
        let render_interval = self.render_interval;
        let ticks_per_second = self.ticks_per_second;

        is_running.store(true, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name("chorale-render".into())
            .spawn(move || {
                while is_running.load(Ordering::Acquire) {
                    let report = render_pass(&mut processor, ticks_per_second);
                    frames_processed.fetch_add(report.frames, Ordering::Relaxed);
                    report_events(&report, &events);
                    std::thread::sleep(render_interval);
                }
                processor
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                let _ = self.event_sender.try_send(AudioEvent::EngineStarted);
                log::info!("Render thread started");
                Ok(())
            }
            Err(e) => {
                self.is_running.store(false, Ordering::Release);
                Err(ChoraleError::Engine(format!(
                    "Failed to spawn render thread: {}",
                    e
                )))
            }
        }
    }

    /// Stop the render thread and take the processor back
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };

        self.is_running.store(false, Ordering::Release);
        match handle.join() {
            Ok(processor) => {
                self.processor = Some(processor);
                let _ = self.event_sender.try_send(AudioEvent::EngineStopped);
                log::info!("Render thread stopped");
                Ok(())
            }
            Err(_) => {
                let error = "Render thread panicked".to_string();
                log::error!("{}", error);
                let _ = self.event_sender.try_send(AudioEvent::EngineError {
                    error: error.clone(),
                });
                Err(ChoraleError::Engine(error))
            }
        }
    }

    /// Check if the render thread is currently running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Get the number of frames mixed since creation
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// The processor, while the render thread is stopped.
    pub fn processor(&self) -> Option<&AudioProcessor> {
        self.processor.as_ref()
    }

    pub fn processor_mut(&mut self) -> Option<&mut AudioProcessor> {
        self.processor.as_mut()
    }

    /// Drains pending diagnostic events.
    pub fn poll_events(&self) -> Vec<AudioEvent> {
        self.event_receiver.try_iter().collect()
    }
}

/// One render-thread pass: size the push by the sink's fill, then mix and push.
fn render_pass(processor: &mut AudioProcessor, ticks_per_second: u32) -> PushReport {
    let frames = processor.frames_for_next_push(ticks_per_second);
    processor.process(frames)
}

fn report_events(report: &PushReport, events: &Sender<AudioEvent>) {
    if report.underrun {
        log::debug!("Output underrun");
        let _ = events.try_send(AudioEvent::Underrun);
    }
    if report.rejected > 0 {
        let _ = events.try_send(AudioEvent::SamplesRejected {
            count: report.rejected,
        });
    }
    if report.released > 0 {
        let _ = events.try_send(AudioEvent::StreamsFinished {
            count: report.released,
        });
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("running", &self.is_running())
            .field("frames_processed", &self.frames_processed())
            .finish_non_exhaustive()
    }
}
