//! Real-time audio mixing core.
//!
//! A game-logic thread drives an [`AudioClient`]; a render thread drives an
//! [`AudioProcessor`] that mixes active streams through per-channel effect
//! chains into a [`HardwareSink`]. The two sides meet only in an
//! [`ExchangeBuffer`] guarded by a non-blocking trylock, so the render thread
//! never waits on the client.
//!
//! [`AudioSystem`] wires the pieces together.

pub mod audio_data;
pub mod channel;
pub mod client;
pub mod config;
pub mod effect;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod playback;
pub mod processor;
pub mod sink;
pub mod slot_map;
pub mod system;

pub use audio_data::{AssetId, AudioSupplier, SampleBuffer, SampleLibrary, StereoSample};
pub use channel::ChannelState;
pub use client::{AudioClient, SyncOutcome};
pub use config::{AudioSystemDesc, ClampPolicy, PanLaw};
pub use effect::{AudioEffect, EffectChain, Gain};
pub use engine::AudioEngine;
pub use error::{ChoraleError, Result};
pub use events::AudioEvent;
pub use exchange::{Command, ExchangeBuffer, ExchangeState, ExchangeStatus};
pub use playback::{PlayState, PlaybackId, PlaybackInfo, StreamObject};
pub use processor::{AudioProcessor, PushReport};
pub use sink::{CpalSink, HardwareSink, NullSink, UnderrunFiller, UnderrunPolicy};
pub use system::AudioSystem;
