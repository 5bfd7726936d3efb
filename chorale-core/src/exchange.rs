//! Trylock-guarded mailbox between the client and the audio thread.
//!
//! Both sides keep a private copy of the exchange contents and reconcile with
//! the shared copy only when [`ExchangeBuffer::try_acquire`] succeeds. A failed
//! acquisition never blocks: the caller keeps what it has and retries on its
//! next cycle, so nothing queued is lost.

use crate::channel::ChannelState;
use crate::playback::StreamObject;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Roster-wide requests executed by the processor during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop and release every active stream
    DumpAllSamples,
    /// Stop one stream, identified by its serial
    Stop(u64),
}

/// Status word reported by the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStatus {
    /// Number of streams in the processor's roster
    pub active_streams: usize,
    /// Blocks mixed since the processor was created
    pub blocks_mixed: u64,
    /// Samples the sink refused since the processor was created
    pub samples_rejected: u64,
}

/// Contents of one side of the exchange.
#[derive(Debug, Default)]
pub struct ExchangeState {
    /// Snapshot of the processor's roster
    pub current: Vec<Arc<StreamObject>>,
    /// Streams created by the client, waiting to join the roster
    pub incoming: Vec<Arc<StreamObject>>,
    /// Destroyed streams on their way back to the client
    pub finished: Vec<Arc<StreamObject>>,
    pub commands: Vec<Command>,
    pub channels: Vec<ChannelState>,
    /// Bumped by the client whenever `channels` changes
    pub channels_revision: u64,
    pub status: ExchangeStatus,
}

impl ExchangeState {
    /// Preallocates the stream lists so steady-state reconciliation does not
    /// allocate.
    pub fn with_capacity(max_streams: usize, channel_count: usize) -> Self {
        Self {
            current: Vec::with_capacity(max_streams),
            incoming: Vec::with_capacity(max_streams),
            finished: Vec::with_capacity(max_streams),
            commands: Vec::with_capacity(max_streams + 1),
            channels: vec![ChannelState::new(); channel_count],
            channels_revision: 0,
            status: ExchangeStatus::default(),
        }
    }
}

/// The shared copy of the exchange, guarded by an atomic lock word.
pub struct ExchangeBuffer {
    lock: AtomicU32,
    contention: AtomicU64,
    state: UnsafeCell<ExchangeState>,
}

// SAFETY: `state` is only reachable through an `ExchangeGuard`, and at most one
// guard exists at a time because `try_acquire` moves the lock word 0 -> 1 with
// a single compare-exchange.
unsafe impl Sync for ExchangeBuffer {}

impl ExchangeBuffer {
    pub fn new(state: ExchangeState) -> Self {
        Self {
            lock: AtomicU32::new(0),
            contention: AtomicU64::new(0),
            state: UnsafeCell::new(state),
        }
    }

    /// Attempts to take the guard without waiting.
    ///
    /// Returns `None` when the other side currently holds it.
    pub fn try_acquire(&self) -> Option<ExchangeGuard<'_>> {
        match self
            .lock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Some(ExchangeGuard { buffer: self }),
            Err(_) => {
                self.contention.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed) != 0
    }

    /// Number of failed acquisitions so far.
    pub fn contention_count(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ExchangeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeBuffer")
            .field("locked", &self.is_locked())
            .field("contention", &self.contention_count())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the shared exchange; released on drop.
pub struct ExchangeGuard<'a> {
    buffer: &'a ExchangeBuffer,
}

impl Deref for ExchangeGuard<'_> {
    type Target = ExchangeState;

    fn deref(&self) -> &ExchangeState {
        // SAFETY: the guard holds the lock word.
        unsafe { &*self.buffer.state.get() }
    }
}

impl DerefMut for ExchangeGuard<'_> {
    fn deref_mut(&mut self) -> &mut ExchangeState {
        // SAFETY: the guard holds the lock word and is borrowed mutably.
        unsafe { &mut *self.buffer.state.get() }
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.buffer.lock.store(0, Ordering::Release);
    }
}
