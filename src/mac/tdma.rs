//! The TDMA engine: wall-clock epoch alignment, then an endless slot cycle
//! that records through every slot, decodes each elapsed slot off-thread,
//! and transmits queued messages only inside its own slot.
//!
//! Concurrency contract: the JACK callback owns capture; this loop only
//! *moves* a finished slot's buffer into the decode worker's queue. Decoding
//! slot k therefore never blocks or races recording of slot k+1. In-flight
//! decodes run to completion at shutdown; the buffer still accumulating is
//! dropped, never handed off partially.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use tracing::{debug, info, trace, warn};

use crate::audio::SlotDemodulator;
use crate::audio::recorder::AppShared;
use crate::audio::tone::{FrequencyPlan, render_bitstring};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::mac::outbox::OutboundMessage;
use crate::mac::{MacPhase, Slot, next_minute_epoch, period_offset, slot_index, slot_owner};
use crate::phy::crc::bits_to_string;
use crate::phy::frame;
use crate::phy::{Delivery, Message};
use crate::ui::progress::{ProgressManager, templates};
use crate::utils::consts::POLL_INTERVAL_MS;

/// One slot's complete capture. Moved by value into the decode worker;
/// this handoff is the single synchronization point between capture and
/// decode.
pub struct SlotCapture {
    pub index: u64,
    pub samples: Vec<f32>,
}

pub struct TdmaNode {
    config: LinkConfig,
    shared: AppShared,
    plan: FrequencyPlan,
    my_slot: Slot,
}

impl TdmaNode {
    pub fn new(config: LinkConfig, shared: AppShared) -> Self {
        let plan = FrequencyPlan::from_config(&config);
        let my_slot = Slot::for_device(
            config.device_id,
            config.total_devices,
            config.slot_duration(),
        );
        info!(
            "device {} of {}: slot [{:.0} s, {:.0} s) of every {:.0} s period",
            config.device_id,
            config.total_devices,
            my_slot.start_offset.as_secs_f32(),
            (my_slot.start_offset + my_slot.duration).as_secs_f32(),
            config.period().as_secs_f32()
        );

        Self {
            config,
            shared,
            plan,
            my_slot,
        }
    }

    /// Run until `running` clears. `outbound` feeds messages to transmit;
    /// accepted messages are pushed into `delivered`.
    pub fn run(
        &self,
        running: Arc<AtomicBool>,
        outbound: Receiver<OutboundMessage>,
        delivered: Sender<Message>,
    ) {
        let wait = next_minute_epoch();
        let epoch = Instant::now() + wait;

        let mut phase = MacPhase::WaitForEpoch;
        loop {
            phase = match phase {
                MacPhase::WaitForEpoch => {
                    info!(
                        "slot cycle starts at the next minute boundary (in {:.1} s)",
                        wait.as_secs_f32()
                    );
                    MacPhase::CountdownAnnounce
                }
                MacPhase::CountdownAnnounce => {
                    if !countdown_until(epoch, &running) {
                        return;
                    }
                    info!("started device {}", self.config.device_id);
                    MacPhase::Cycling
                }
                MacPhase::Cycling => {
                    self.cycle(epoch, &running, &outbound, &delivered);
                    return;
                }
            };
        }
    }

    /// The endless record/decode/transmit cycle
    fn cycle(
        &self,
        epoch: Instant,
        running: &AtomicBool,
        outbound: &Receiver<OutboundMessage>,
        delivered: &Sender<Message>,
    ) {
        // Anything captured before the epoch belongs to nobody's slot.
        drop(self.shared.take_recorded());

        let slot_samples = (self.config.sample_rate as f32
            * self.config.slot_duration_secs) as u64;
        let progress = ProgressManager::new();
        let _ = progress.create_bar(
            "recording",
            slot_samples,
            templates::RECORDING,
            "slot 0",
        );

        let (capture_tx, capture_rx) = unbounded::<SlotCapture>();
        let decoder = self.spawn_decoder(capture_rx, delivered.clone());

        let mut current_index = 0u64;
        if self.my_slot.contains(Duration::ZERO) {
            self.transmit_queued(outbound);
        }

        while running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));

            let elapsed = Instant::now().saturating_duration_since(epoch);
            let index = slot_index(elapsed, self.config.slot_duration());

            if index != current_index {
                // Slot boundary: move the finished buffer to the decoder and
                // keep recording into a fresh one.
                let samples = self.shared.take_recorded();
                if !samples.is_empty() {
                    let capture = SlotCapture {
                        index: current_index,
                        samples,
                    };
                    if capture_tx.send(capture).is_err() {
                        break;
                    }
                }

                current_index = index;
                let owner = slot_owner(index, self.config.total_devices);
                debug!("slot {index} begins (device {owner})");
                let _ = progress.set_message("recording", &format!("slot {index} / device {owner}"));

                if self.my_slot.contains(period_offset(elapsed, self.config.period())) {
                    self.transmit_queued(outbound);
                }
            }

            let _ = progress.set_position(
                "recording",
                (self.shared.recorded_len() as u64).min(slot_samples),
            );
        }

        drop(capture_tx);
        if decoder.join().is_err() {
            warn!("decoder worker panicked");
        }
        progress.finish_all();
        info!("slot cycle stopped");
    }

    /// Dequeue at most one message and put its waveform on the air. Called
    /// only at the start of our own slot; a full-size frame is validated to
    /// fit one slot, so playback ends before the slot does.
    fn transmit_queued(&self, outbound: &Receiver<OutboundMessage>) {
        match outbound.try_recv() {
            Ok(message) => {
                let bits = frame::encode_message(&message.data, message.dest, &self.config);
                let samples = render_bitstring(
                    &bits,
                    &self.plan,
                    self.config.symbol_duration_secs,
                    self.config.sample_rate,
                );
                info!(
                    "[SENT] {} -> device {} ({} bits on air, {:.1} s)",
                    bits_to_string(&message.data),
                    message.dest,
                    bits.len(),
                    self.config.airtime_secs(bits.len())
                );
                self.shared.queue_playback(samples);
            }
            Err(TryRecvError::Empty) => trace!("own slot, nothing queued"),
            Err(TryRecvError::Disconnected) => {}
        }
    }

    /// Decode worker: consumes owned slot buffers until the channel closes,
    /// then drains whatever is still queued.
    fn spawn_decoder(
        &self,
        captures: Receiver<SlotCapture>,
        delivered: Sender<Message>,
    ) -> thread::JoinHandle<()> {
        let demod = SlotDemodulator::new(&self.config);
        let config = self.config.clone();

        thread::spawn(move || {
            for capture in captures {
                decode_slot(capture, &demod, &config, &delivered);
            }
            debug!("decoder worker drained");
        })
    }
}

/// Decode one slot's buffer and report the outcome. Every failure here is
/// local to the slot; the cycle never stops for it.
fn decode_slot(
    capture: SlotCapture,
    demod: &SlotDemodulator,
    config: &LinkConfig,
    delivered: &Sender<Message>,
) {
    let SlotCapture { index, samples } = capture;

    let Some(bits) = demod.demodulate(&samples) else {
        info!("slot {index}: no transmission detected");
        return;
    };

    match frame::decode_message(&bits, config) {
        Ok(Delivery::Accepted(message)) if message.source == config.device_id => {
            debug!("slot {index}: own transmission echoed back");
        }
        Ok(Delivery::Accepted(message)) => {
            info!(
                "[RECVD] {} from device {} (slot {index})",
                bits_to_string(&message.data),
                message.source
            );
            let _ = delivered.send(message);
        }
        Ok(Delivery::NotForMe { dest }) => {
            debug!("slot {index}: frame for device {dest}, ignored");
        }
        Err(LinkError::Frame(err)) => {
            debug!("slot {index}: dropped frame ({err})");
        }
        Err(LinkError::UncorrectableCodeword { max_flips }) => {
            warn!(
                "slot {index}: uncorrectable within {max_flips} flips, dropped (best effort: {})",
                bits_to_string(&bits)
            );
        }
        Err(err) => warn!("slot {index}: {err}"),
    }
}

/// Sleep until `epoch`, announcing the original countdown milestones.
/// Returns false when interrupted by shutdown.
fn countdown_until(epoch: Instant, running: &AtomicBool) -> bool {
    let mut milestones: VecDeque<u64> = VecDeque::from([10, 5, 1]);

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= epoch {
            return true;
        }
        let remaining = (epoch - now).as_secs_f32();
        while milestones
            .front()
            .is_some_and(|&m| remaining <= m as f32)
        {
            let milestone = milestones.pop_front().unwrap();
            info!("{milestone} second(s) remaining until start");
        }
        thread::sleep(Duration::from_millis(100));
    }

    false
}
