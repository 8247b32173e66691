//! Shared buffers between the JACK process callback and the MAC loop.
//!
//! The callback is the sole owner of the audio stream: it appends every
//! captured chunk to the record buffer and drains the playback queue, and it
//! never does demodulation work. The MAC loop takes ownership of a slot's
//! worth of samples with [`AppShared::take_recorded`], which moves the data
//! out; nothing downstream ever aliases a buffer the callback still writes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Thread-safe shared state for a duplex TDMA node
#[derive(Clone)]
pub struct AppShared {
    pub record_buffer: Arc<Mutex<Vec<f32>>>,
    pub playback_buffer: Arc<Mutex<VecDeque<f32>>>,
}

impl AppShared {
    pub fn new(capacity_samples: usize) -> Self {
        Self {
            record_buffer: Arc::new(Mutex::new(Vec::with_capacity(capacity_samples))),
            playback_buffer: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Move the accumulated capture out, leaving a fresh buffer behind.
    /// This is the single ownership-transfer point between capture and
    /// decode.
    pub fn take_recorded(&self) -> Vec<f32> {
        let mut recorded = self.record_buffer.lock().unwrap();
        std::mem::take(&mut *recorded)
    }

    pub fn recorded_len(&self) -> usize {
        self.record_buffer.lock().unwrap().len()
    }

    /// Queue samples for playback during our slot
    pub fn queue_playback(&self, samples: Vec<f32>) {
        let mut playback = self.playback_buffer.lock().unwrap();
        playback.extend(samples);
    }

    pub fn playback_pending(&self) -> usize {
        self.playback_buffer.lock().unwrap().len()
    }
}

/// Build the JACK process callback: record continuously, play whatever is
/// queued, emit silence otherwise.
pub fn build_process_closure(
    in_port: jack::Port<jack::AudioIn>,
    mut out_port: jack::Port<jack::AudioOut>,
    shared: AppShared,
) -> impl FnMut(&jack::Client, &jack::ProcessScope) -> jack::Control + Send + 'static {
    move |_: &jack::Client, ps: &jack::ProcessScope| -> jack::Control {
        let in_buffer = in_port.as_slice(ps);
        let out_buffer = out_port.as_mut_slice(ps);

        {
            let mut recorded = shared.record_buffer.lock().unwrap();
            recorded.extend_from_slice(in_buffer);
        }

        {
            let mut playback = shared.playback_buffer.lock().unwrap();
            for out_sample in out_buffer.iter_mut() {
                *out_sample = playback.pop_front().unwrap_or(0.0);
            }
        }

        jack::Control::Continue
    }
}
