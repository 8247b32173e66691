//! Signal acquisition for one slot's capture buffer.
//!
//! The pipeline is an explicit state machine, one pass per buffer:
//! `Idle -> Filtering -> OnsetSearch -> SymbolSlicing -> Done`. Each state
//! owns the data the next one needs, so slicing before an onset exists is
//! not expressible.

use tracing::{debug, trace};

use crate::audio::dsp;
use crate::audio::tone::FrequencyPlan;
use crate::config::LinkConfig;

enum AcquireState {
    Idle,
    Filtering,
    OnsetSearch { envelopes: Vec<Vec<f32>> },
    SymbolSlicing { envelopes: Vec<Vec<f32>>, onset: usize },
    Done(Option<Vec<u8>>),
}

/// Stateless per-slot demodulator; every call to [`demodulate`] processes one
/// complete, exclusively-owned capture buffer.
///
/// [`demodulate`]: SlotDemodulator::demodulate
pub struct SlotDemodulator {
    plan: FrequencyPlan,
    sample_rate: u32,
    symbol_samples: usize,
    pre_gain: f32,
    clip_ceiling: f32,
    noise_floor: f32,
    threshold_factor: f32,
    window: usize,
    warmup: usize,
}

impl SlotDemodulator {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            plan: FrequencyPlan::from_config(config),
            sample_rate: config.sample_rate,
            symbol_samples: config.symbol_samples(),
            pre_gain: config.pre_gain,
            clip_ceiling: config.clip_ceiling,
            noise_floor: config.noise_floor,
            threshold_factor: config.onset_threshold_factor,
            window: config.onset_window,
            warmup: config.onset_warmup,
        }
    }

    /// Recover the slot's bitstring, or `None` when no transmission was
    /// detected before the buffer ended.
    pub fn demodulate(&self, samples: &[f32]) -> Option<Vec<u8>> {
        let mut state = AcquireState::Idle;

        loop {
            state = match state {
                AcquireState::Idle => {
                    let min_len = (self.warmup.max(self.window) + self.window)
                        .max(self.symbol_samples);
                    if samples.len() < min_len {
                        AcquireState::Done(None)
                    } else {
                        AcquireState::Filtering
                    }
                }
                AcquireState::Filtering => AcquireState::OnsetSearch {
                    envelopes: self.filter_channels(samples),
                },
                AcquireState::OnsetSearch { envelopes } => {
                    match self.earliest_onset(&envelopes) {
                        Some(onset) => AcquireState::SymbolSlicing { envelopes, onset },
                        None => AcquireState::Done(None),
                    }
                }
                AcquireState::SymbolSlicing { envelopes, onset } => {
                    AcquireState::Done(Some(self.slice_symbols(&envelopes, onset)))
                }
                AcquireState::Done(bits) => return bits,
            };
        }
    }

    /// Bandpass each carrier and reduce to envelopes
    fn filter_channels(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let boosted: Vec<f32> = samples.iter().map(|&s| s * self.pre_gain).collect();

        self.plan
            .carriers()
            .iter()
            .map(|&carrier| {
                let filtered = dsp::bandpass(
                    &boosted,
                    carrier,
                    self.plan.tolerance_hz(),
                    self.sample_rate,
                );
                dsp::envelope(&filtered, self.clip_ceiling, self.noise_floor)
            })
            .collect()
    }

    /// Search every channel independently and take the earliest onset, which
    /// rides out per-channel filter group-delay differences. The threshold
    /// comes from the first (reference) channel alone.
    fn earliest_onset(&self, envelopes: &[Vec<f32>]) -> Option<usize> {
        let threshold = dsp::mean(&envelopes[0])
            + self.threshold_factor * dsp::stddev(&envelopes[0]);

        let onset = envelopes
            .iter()
            .enumerate()
            .filter_map(|(channel, envelope)| {
                let found = self.find_onset(envelope, threshold);
                trace!("channel {channel}: onset {found:?}");
                found
            })
            .min();

        debug!("onset search: threshold {threshold:.4}, onset {onset:?}");
        onset
    }

    /// First index past the warm-up where the moving averages on either side
    /// of the cursor differ by more than the threshold.
    fn find_onset(&self, envelope: &[f32], threshold: f32) -> Option<usize> {
        let w = self.window;
        let start = self.warmup.max(w);
        if envelope.len() < start + w {
            return None;
        }

        let window_sum = |range: &[f32]| range.iter().map(|&v| v as f64).sum::<f64>();
        let mut before = window_sum(&envelope[start - w..start]);
        let mut after = window_sum(&envelope[start..start + w]);
        let mut i = start;

        loop {
            let diff = ((after - before) / w as f64).abs() as f32;
            if diff > threshold {
                return Some(i);
            }
            if i + w >= envelope.len() {
                return None;
            }
            before += envelope[i] as f64 - envelope[i - w] as f64;
            after += envelope[i + w] as f64 - envelope[i] as f64;
            i += 1;
        }
    }

    /// Hard-decision slicing: per symbol window, the symbol whose tone
    /// channels carry the highest mean envelope wins; ties go to the first
    /// maximum. Partial trailing windows are discarded.
    fn slice_symbols(&self, envelopes: &[Vec<f32>], onset: usize) -> Vec<u8> {
        let buffer_len = envelopes[0].len();
        let bits_per_symbol = self.plan.bits_per_symbol();
        let mut bits = Vec::new();
        let mut start = onset;

        while start + self.symbol_samples <= buffer_len {
            let window = start..start + self.symbol_samples;
            let channel_means: Vec<f32> = envelopes
                .iter()
                .map(|envelope| dsp::mean(&envelope[window.clone()]))
                .collect();

            let mut winner = 0usize;
            let mut winner_score = f32::MIN;
            for symbol in 0..self.plan.symbol_count() {
                let channels = self.plan.channel_indices(symbol);
                let score = channels
                    .iter()
                    .map(|&c| channel_means[c])
                    .sum::<f32>()
                    / channels.len() as f32;
                if score > winner_score {
                    winner_score = score;
                    winner = symbol;
                }
            }

            for shift in (0..bits_per_symbol).rev() {
                bits.push(((winner >> shift) & 1) as u8);
            }
            start += self.symbol_samples;
        }

        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tone::render_bitstring;

    fn offline_config() -> LinkConfig {
        LinkConfig {
            sample_rate: 16000,
            symbol_duration_secs: 0.05,
            pre_gain: 1.0,
            ..Default::default()
        }
    }

    fn transmit(bits: &[u8], config: &LinkConfig) -> Vec<f32> {
        let plan = FrequencyPlan::from_config(config);
        let mut signal = vec![0.0; 4000];
        signal.extend(render_bitstring(
            bits,
            &plan,
            config.symbol_duration_secs,
            config.sample_rate,
        ));
        signal.extend(vec![0.0; 2000]);
        signal
    }

    #[test]
    fn recovers_all_four_symbols() {
        let config = offline_config();
        let demod = SlotDemodulator::new(&config);
        let sent = [0, 0, 0, 1, 1, 0, 1, 1];

        let recovered = demod.demodulate(&transmit(&sent, &config)).unwrap();
        assert!(recovered.len() >= sent.len());
        assert_eq!(&recovered[..sent.len()], &sent[..]);
    }

    #[test]
    fn silence_yields_no_transmission() {
        let config = offline_config();
        let demod = SlotDemodulator::new(&config);
        assert_eq!(demod.demodulate(&vec![0.0; 20000]), None);
    }

    #[test]
    fn short_buffer_yields_no_transmission() {
        let config = offline_config();
        let demod = SlotDemodulator::new(&config);
        assert_eq!(demod.demodulate(&vec![0.0; 500]), None);
    }
}
