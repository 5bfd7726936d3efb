//! Event types for Chorale

/// Diagnostics reported by the render thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// The device ran out of queued audio and the sink filled the gap
    Underrun,
    /// The sink refused part of a block; those samples were dropped
    SamplesRejected { count: usize },
    /// Finished streams were handed back to the client
    StreamsFinished { count: usize },
    EngineStarted,
    EngineStopped,
    EngineError { error: String },
}

impl AudioEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Underrun | Self::SamplesRejected { .. } | Self::EngineError { .. }
        )
    }
}
