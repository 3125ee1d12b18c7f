//! PCM ring → hardware playback slots
//!
//! A small pool of fixed-size slots cycles between `Done` (free, may be
//! refilled) and `Queued` (owned by the hardware). The feeder fills every
//! free slot for which a full period of PCM is available, then sleeps on
//! the shared wake event. Both the hardware completion callback and new
//! PCM in the ring signal that event, so either one re-runs the scan.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::output::AudioOutput;
use crate::constants::{BYTES_PER_FRAME, CHANNELS};
use crate::error::AudioError;
use crate::ring::SharedByteRing;
use crate::sync::{Event, Shutdown};

/// Ownership state of a playback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Done = 0,
    Queued = 1,
}

/// Fixed pool of slot states shared with the hardware side
pub struct SlotPool {
    states: Vec<AtomicU8>,
    wake: Arc<Event>,
    completed: AtomicU64,
}

impl SlotPool {
    pub fn new(count: usize, wake: Arc<Event>) -> Arc<Self> {
        Arc::new(Self {
            states: (0..count).map(|_| AtomicU8::new(SlotState::Done as u8)).collect(),
            wake,
            completed: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, slot: usize) -> SlotState {
        match self.states[slot].load(Ordering::Acquire) {
            0 => SlotState::Done,
            _ => SlotState::Queued,
        }
    }

    pub fn queued_count(&self) -> usize {
        (0..self.len())
            .filter(|&i| self.state(i) == SlotState::Queued)
            .count()
    }

    /// Total hardware completions
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    fn mark_queued(&self, slot: usize) {
        self.states[slot].store(SlotState::Queued as u8, Ordering::Release);
    }

    fn release(&self, slot: usize) {
        self.states[slot].store(SlotState::Done as u8, Ordering::Release);
    }

    /// A handle the output device uses to hand slots back
    pub fn completer(self: &Arc<Self>) -> SlotCompleter {
        SlotCompleter { pool: self.clone() }
    }
}

/// Hardware-side completion handle
#[derive(Clone)]
pub struct SlotCompleter {
    pool: Arc<SlotPool>,
}

impl SlotCompleter {
    /// Mark `slot` consumed and wake the feeder.
    pub fn complete(&self, slot: usize) {
        if slot >= self.pool.len() {
            return;
        }
        self.pool.release(slot);
        self.pool.completed.fetch_add(1, Ordering::Relaxed);
        self.pool.wake.signal();
    }
}

/// Feeder counters
#[derive(Debug, Default)]
pub struct FeederStats {
    slots_submitted: AtomicU64,
    waits: AtomicU64,
    submit_errors: AtomicU64,
}

impl FeederStats {
    pub fn slots_submitted(&self) -> u64 {
        self.slots_submitted.load(Ordering::Relaxed)
    }

    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    pub fn submit_errors(&self) -> u64 {
        self.submit_errors.load(Ordering::Relaxed)
    }
}

/// Keeps the hardware queue topped up from the PCM ring
pub struct AudioFeeder<O: AudioOutput> {
    output: O,
    pcm: SharedByteRing,
    slots: Arc<SlotPool>,
    slot_frames: usize,
    wait: Duration,
    shutdown: Arc<Shutdown>,
    stats: Arc<FeederStats>,
}

impl<O: AudioOutput> AudioFeeder<O> {
    pub fn new(
        output: O,
        pcm: SharedByteRing,
        slots: Arc<SlotPool>,
        slot_frames: usize,
        wait: Duration,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            output,
            pcm,
            slots,
            slot_frames,
            wait,
            shutdown,
            stats: Arc::new(FeederStats::default()),
        }
    }

    /// Report into counters created ahead of the feeder.
    pub fn with_stats(mut self, stats: Arc<FeederStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<FeederStats> {
        self.stats.clone()
    }

    /// Run until shutdown or until the output fails permanently.
    pub fn run(mut self) {
        tracing::info!(
            "Audio feeder started: {} slots of {} frames",
            self.slots.len(),
            self.slot_frames
        );

        let slot_bytes = self.slot_frames * BYTES_PER_FRAME;
        let mut bytes = vec![0u8; slot_bytes];
        let mut samples = vec![0i16; self.slot_frames * CHANNELS as usize];

        'feed: while !self.shutdown.is_triggered() {
            for slot in 0..self.slots.len() {
                if self.slots.state(slot) != SlotState::Done {
                    continue;
                }
                if self.pcm.available() < slot_bytes {
                    break;
                }

                // Single consumer: the full slot is there to take
                let n = self.pcm.pop(&mut bytes);
                debug_assert_eq!(n, slot_bytes);
                for (sample, pair) in samples.iter_mut().zip(bytes.chunks_exact(2)) {
                    *sample = i16::from_le_bytes([pair[0], pair[1]]);
                }

                self.slots.mark_queued(slot);
                match self.output.submit(slot, &samples) {
                    Ok(()) => {
                        self.stats.slots_submitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(AudioError::Closed) => {
                        self.slots.release(slot);
                        tracing::error!("Audio output closed, feeder stopping");
                        break 'feed;
                    }
                    Err(e) => {
                        self.slots.release(slot);
                        self.stats.submit_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Slot {} submit failed: {}", slot, e);
                        break;
                    }
                }
            }

            // Either every slot is queued or the ring is short of a period
            self.stats.waits.fetch_add(1, Ordering::Relaxed);
            self.pcm.readable_event().wait_timeout(self.wait);
        }

        tracing::info!(
            "Audio feeder stopped ({} slots submitted)",
            self.stats.slots_submitted()
        );
    }
}
