//! FSK tone synthesis: the frequency plan maps symbols to carrier sets and
//! the renderer turns bitstrings into sample buffers.

use std::f32::consts::PI;

use crate::config::LinkConfig;

/// Symbol alphabet of the link. Entry k holds the tones played together for
/// symbol k; most plans use a single tone per symbol, combined entries are
/// how two-tones-at-once symbols are expressed. The distinct carriers also
/// double as the receiver's filter channels.
#[derive(Debug, Clone)]
pub struct FrequencyPlan {
    tones: Vec<Vec<f32>>,
    carriers: Vec<f32>,
    tolerance_hz: f32,
}

impl FrequencyPlan {
    pub fn new(tones: Vec<Vec<f32>>, tolerance_hz: f32) -> Self {
        assert!(
            tones.len() >= 2 && tones.len().is_power_of_two(),
            "symbol alphabet must be a power of two"
        );

        let mut carriers: Vec<f32> = Vec::new();
        for freq in tones.iter().flatten() {
            if !carriers.contains(freq) {
                carriers.push(*freq);
            }
        }

        Self {
            tones,
            carriers,
            tolerance_hz,
        }
    }

    /// One tone per symbol, in carrier order
    pub fn single(carriers: &[f32], tolerance_hz: f32) -> Self {
        Self::new(carriers.iter().map(|&f| vec![f]).collect(), tolerance_hz)
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::single(&config.frequencies, config.tolerance_hz)
    }

    pub fn symbol_count(&self) -> usize {
        self.tones.len()
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.tones.len().ilog2() as usize
    }

    pub fn tones_for(&self, symbol: usize) -> &[f32] {
        &self.tones[symbol]
    }

    /// Distinct carriers, one receiver filter channel each
    pub fn carriers(&self) -> &[f32] {
        &self.carriers
    }

    pub fn tolerance_hz(&self) -> f32 {
        self.tolerance_hz
    }

    /// Positions of a symbol's tones within the carrier list
    pub fn channel_indices(&self, symbol: usize) -> Vec<usize> {
        self.tones[symbol]
            .iter()
            .map(|f| self.carriers.iter().position(|c| c == f).unwrap_or(0))
            .collect()
    }
}

/// Render one symbol: the tones summed and scaled by the tone count so a
/// combined symbol peaks no higher than a single one.
pub fn render_symbol(frequencies: &[f32], duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let n = (sample_rate as f32 * duration_secs) as usize;
    let scale = 1.0 / frequencies.len().max(1) as f32;

    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            frequencies
                .iter()
                .map(|&f| (2.0 * PI * f * t).sin())
                .sum::<f32>()
                * scale
        })
        .collect()
}

/// Render a whole bitstring: fixed groups of `bits_per_symbol`, trailing
/// group zero-padded, one symbol after another.
pub fn render_bitstring(
    bits: &[u8],
    plan: &FrequencyPlan,
    symbol_duration_secs: f32,
    sample_rate: u32,
) -> Vec<f32> {
    let bits_per_symbol = plan.bits_per_symbol();
    let mut output = Vec::new();

    for group in bits.chunks(bits_per_symbol) {
        let mut symbol = 0usize;
        for i in 0..bits_per_symbol {
            let bit = group.get(i).copied().unwrap_or(0);
            symbol = (symbol << 1) | bit as usize;
        }
        output.extend(render_symbol(
            plan.tones_for(symbol),
            symbol_duration_secs,
            sample_rate,
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> FrequencyPlan {
        FrequencyPlan::single(&[5000.0, 5500.0, 6000.0, 6500.0], 100.0)
    }

    #[test]
    fn plan_shape() {
        let plan = plan();
        assert_eq!(plan.symbol_count(), 4);
        assert_eq!(plan.bits_per_symbol(), 2);
        assert_eq!(plan.carriers().len(), 4);
        assert_eq!(plan.tones_for(2), &[6000.0]);
        assert_eq!(plan.channel_indices(3), vec![3]);
    }

    #[test]
    fn combined_tones_share_carriers() {
        let plan = FrequencyPlan::new(
            vec![
                vec![1000.0],
                vec![2000.0],
                vec![1000.0, 2000.0],
                vec![3000.0],
            ],
            100.0,
        );
        assert_eq!(plan.carriers(), &[1000.0, 2000.0, 3000.0]);
        assert_eq!(plan.channel_indices(2), vec![0, 1]);
    }

    #[test]
    fn symbol_sample_count_and_amplitude() {
        let samples = render_symbol(&[5000.0], 0.05, 16000);
        assert_eq!(samples.len(), 800);
        assert!(samples.iter().all(|s| s.abs() <= 1.0 + 1e-6));

        // Two combined tones stay normalized
        let combined = render_symbol(&[5000.0, 6000.0], 0.05, 16000);
        assert!(combined.iter().all(|s| s.abs() <= 1.0 + 1e-6));
    }

    #[test]
    fn bitstring_length_includes_padded_tail() {
        let plan = plan();
        // 5 bits over a 2-bit alphabet: 3 symbols after zero padding
        let samples = render_bitstring(&[1, 0, 1, 1, 0], &plan, 0.05, 16000);
        assert_eq!(samples.len(), 3 * 800);
    }
}
