use anyhow::Result;
use chorale_core::{
    AudioEffect, AudioSystem, AudioSystemDesc, Gain, PlaybackId, SampleBuffer, UnderrunPolicy,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(16);

pub fn run_demo(quick: bool) -> Result<()> {
    let desc = AudioSystemDesc::default()
        .sample_rate(48000)
        .block_size(1024)
        .underrun_policy(UnderrunPolicy::Taper)
        .volume_multiplier(0.6);

    let mut system = AudioSystem::new(desc)?;
    system.start()?;
    log::info!("Audio system running: {:?}", system.engine());

    let scale = if quick { 0.25 } else { 1.0 };

    log::info!("=== Chord on separate channels ===");
    play_chord(&mut system, scale)?;

    log::info!("=== Channel effects ===");
    play_with_effects(&mut system, scale)?;

    log::info!("=== Stream controls ===");
    stream_controls(&mut system, scale)?;

    system.stop()?;
    log::info!("Demo finished");
    Ok(())
}

fn tone(system: &AudioSystem, pitch: f32, seconds: f32) -> Arc<SampleBuffer> {
    Arc::new(SampleBuffer::sine(
        pitch,
        0.4,
        Duration::from_secs_f32(seconds),
        system.desc().sample_rate,
    ))
}

/// Runs client ticks for `duration`, logging diagnostics as they arrive.
fn tick_for(system: &mut AudioSystem, duration: Duration) {
    let end = Instant::now() + duration;
    while Instant::now() < end {
        system.update();
        for event in system.poll_events() {
            if event.is_error() {
                log::warn!("Audio event: {:?}", event);
            } else {
                log::debug!("Audio event: {:?}", event);
            }
        }
        std::thread::sleep(TICK);
    }
}

fn wait_until_idle(system: &mut AudioSystem, timeout: Duration) {
    let end = Instant::now() + timeout;
    while system.client().live_streams() > 0 && Instant::now() < end {
        tick_for(system, TICK);
    }
}

fn play_chord(system: &mut AudioSystem, scale: f32) -> Result<()> {
    let pitches = [261.63, 329.63, 392.0];
    let pannings = [0.0, 0.5, 1.0];

    for (channel, (&pitch, &panning)) in pitches.iter().zip(&pannings).enumerate() {
        let buffer = tone(system, pitch, 2.0 * scale);
        let asset = system.register(buffer)?;
        let id = system.play(asset, 0.8, panning, channel);
        log::info!("{} Hz on channel {} (pan {:.1}): {}", pitch, channel, panning, id);
    }

    tick_for(system, Duration::from_secs_f32(0.5 * scale));
    log::info!(
        "{} streams active",
        system.client().num_active_playback_samples()
    );
    wait_until_idle(system, Duration::from_secs(5));
    Ok(())
}

fn play_with_effects(system: &mut AudioSystem, scale: f32) -> Result<()> {
    let gain = Arc::new(Gain::new(1.0));
    let effect: Arc<dyn AudioEffect> = gain.clone();

    // Slow tremolo; phase lives outside the closure so it survives between blocks.
    let phase = Arc::new(AtomicU32::new(0));
    let tremolo_phase = phase.clone();
    let tremolo: Arc<dyn AudioEffect> = Arc::new(move |samples: &mut [f32]| {
        let mut p = f32::from_bits(tremolo_phase.load(Ordering::Relaxed));
        for frame in samples.chunks_exact_mut(2) {
            let depth = 0.75 + 0.25 * p.sin();
            frame[0] *= depth;
            frame[1] *= depth;
            p = (p + 0.0005) % std::f32::consts::TAU;
        }
        tremolo_phase.store(p.to_bits(), Ordering::Relaxed);
    });

    let client = system.client_mut();
    client.add_effect(1, effect.clone());
    client.add_effect(1, tremolo.clone());
    client.keep_awake(1, true);

    let buffer = tone(system, 220.0, 3.0 * scale);
    let asset = system.register(buffer)?;
    let id = system.play(asset, 1.0, 0.5, 1);
    log::info!("Playing {} through gain + tremolo", id);

    for step in 0..10 {
        gain.set_gain(1.0 - step as f32 * 0.09);
        tick_for(system, Duration::from_secs_f32(0.25 * scale));
    }

    let client = system.client_mut();
    client.remove_effect(1, &effect);
    client.remove_effect(1, &tremolo);
    client.reset(1);
    wait_until_idle(system, Duration::from_secs(5));
    Ok(())
}

fn log_info(system: &AudioSystem, id: PlaybackId) {
    match system.client().playback_info(id) {
        Some(info) => log::info!(
            "{}: {:.2}s / {:.2}s ({:?})",
            id,
            info.current_time,
            info.total_time,
            info.play_state
        ),
        None => log::info!("{}: released", id),
    }
}

fn stream_controls(system: &mut AudioSystem, scale: f32) -> Result<()> {
    let buffer = tone(system, 330.0, 1.0);
    let asset = system.register(buffer)?;
    let id = system.play(asset, 0.8, 0.5, 2);
    system.client().set_repeat(id, true);

    tick_for(system, Duration::from_secs_f32(1.5 * scale));
    log_info(system, id);

    system.client().pause(id);
    log::info!("Paused");
    tick_for(system, Duration::from_secs_f32(0.5 * scale));
    log_info(system, id);

    system.client().resume(id);
    system.client().seek(id, 0.5);
    system.client().set_panning(id, 0.1);
    log::info!("Resumed at the halfway point, panned left");
    tick_for(system, Duration::from_secs_f32(1.0 * scale));
    log_info(system, id);

    system.client_mut().stop(id);
    wait_until_idle(system, Duration::from_secs(2));
    log_info(system, id);

    let other = system.play(asset, 0.5, 0.5, 0);
    let another = system.play(asset, 0.5, 0.5, 3);
    tick_for(system, Duration::from_secs_f32(0.3 * scale));
    system.client_mut().request_active_sample_dump();
    wait_until_idle(system, Duration::from_secs(2));
    log_info(system, other);
    log_info(system, another);

    let status = system.client().status();
    log::info!(
        "Mixed {} blocks, {} samples rejected",
        status.blocks_mixed,
        status.samples_rejected
    );
    Ok(())
}
