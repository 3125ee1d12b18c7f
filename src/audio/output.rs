//! Hardware audio output
//!
//! [`AudioOutput`] is the slot submission seam the feeder talks to.
//! [`CpalOutput`] implements it on a cpal output stream: submitted slots
//! go into a bounded queue, the device callback plays them back to back
//! and hands each slot back through its [`SlotCompleter`] once the last
//! sample has been written. Played sample buffers go back to the
//! submitting side for reuse, so the callback never allocates or frees.
//! When the queue runs dry the callback plays silence.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::resolve_output_device;
use crate::audio::feeder::SlotCompleter;
use crate::config::PlaybackConfig;
use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::AudioError;

/// Fixed-size slot submission
pub trait AudioOutput: Send {
    /// Queue one slot of interleaved stereo PCM for playback.
    ///
    /// The slot is handed back through the completer when played.
    fn submit(&mut self, slot: usize, pcm: &[i16]) -> Result<(), AudioError>;
}

struct Submitted {
    slot: usize,
    samples: Vec<f32>,
}

/// Callback-side playback cursor
struct Player {
    queue: Arc<ArrayQueue<Submitted>>,
    recycled: Arc<ArrayQueue<Vec<f32>>>,
    completer: SlotCompleter,
    current: Option<Submitted>,
    position: usize,
    underruns: Arc<AtomicU64>,
}

impl Player {
    fn fill(&mut self, out: &mut [f32]) {
        let mut written = 0;
        let mut starved = false;

        while written < out.len() {
            if self.current.is_none() {
                match self.queue.pop() {
                    Some(next) => {
                        self.current = Some(next);
                        self.position = 0;
                    }
                    None => {
                        out[written..].fill(0.0);
                        starved = true;
                        break;
                    }
                }
            }

            let Some(current) = self.current.as_ref() else {
                break;
            };
            let remaining = &current.samples[self.position..];
            let n = remaining.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&remaining[..n]);
            written += n;
            self.position += n;

            if self.position >= current.samples.len() {
                if let Some(done) = self.current.take() {
                    // Sized for every buffer in circulation; never full here
                    let _ = self.recycled.push(done.samples);
                    self.completer.complete(done.slot);
                }
            }
        }

        if starved {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// cpal-backed slot output
pub struct CpalOutput {
    queue: Arc<ArrayQueue<Submitted>>,
    recycled: Arc<ArrayQueue<Vec<f32>>>,
    running: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
    device_name: String,
}

impl CpalOutput {
    /// Open the configured (or default) output device and start playing.
    ///
    /// The cpal stream lives on its own thread; this returns once the
    /// stream is running or has failed to open.
    pub fn open(config: &PlaybackConfig, completer: SlotCompleter) -> Result<Self, AudioError> {
        let device = resolve_output_device(config.device_id.as_deref())?;
        let device_name = device.name.clone();
        if !device.supports(SAMPLE_RATE, CHANNELS) {
            tracing::warn!(
                "{} does not advertise {} Hz / {} ch, trying anyway",
                device_name,
                SAMPLE_RATE,
                CHANNELS
            );
        }

        let stream_config = cpal::StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = Arc::new(ArrayQueue::new(config.slot_count.max(1)));
        // Queued slots plus the one being played
        let recycled = Arc::new(ArrayQueue::new(config.slot_count.max(1) + 1));
        let running = Arc::new(AtomicBool::new(true));
        let underruns = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let mut player = Player {
            queue: queue.clone(),
            recycled: recycled.clone(),
            completer,
            current: None,
            position: 0,
            underruns: underruns.clone(),
        };
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| player.fill(data),
                    move |err| tracing::error!("Output stream error: {}", err),
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping playback
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamError("output thread exited".into()));
            }
        }

        tracing::info!("Playing on {}", device_name);

        Ok(Self {
            queue,
            recycled,
            running,
            underruns,
            thread_handle: Some(handle),
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Callbacks that ran out of queued audio
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioOutput for CpalOutput {
    fn submit(&mut self, slot: usize, pcm: &[i16]) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::Closed);
        }
        let mut samples = self.recycled.pop().unwrap_or_default();
        samples.clear();
        samples.extend(pcm.iter().map(|&s| s as f32 / 32768.0));
        self.queue
            .push(Submitted { slot, samples })
            .map_err(|rejected| {
                let _ = self.recycled.push(rejected.samples);
                AudioError::SlotBusy(slot)
            })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
