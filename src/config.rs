use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::phy::crc::bits_from_str;
use crate::utils::consts::*;

/// Every knob of the link in one place, constructed once at startup and
/// passed by reference. Both ends of a link must agree on everything except
/// `device_id` and `outbox_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub symbol_duration_secs: f32,
    pub slot_duration_secs: f32,
    pub device_id: u8,
    pub total_devices: u8,
    /// Carrier ladder; entry k carries symbol k
    pub frequencies: Vec<f32>,
    /// Half-bandwidth of each carrier's detection band
    pub tolerance_hz: f32,
    /// CRC generator polynomial as a bit string, MSB first
    pub generator: String,
    pub max_correctable_flips: usize,
    pub max_payload_bits: usize,
    /// Accepted preamble patterns; the first one is used when building frames
    pub preambles: Vec<String>,
    pub pre_gain: f32,
    pub clip_ceiling: f32,
    pub noise_floor: f32,
    pub onset_threshold_factor: f32,
    pub onset_window: usize,
    pub onset_warmup: usize,
    pub outbox_path: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            symbol_duration_secs: DEFAULT_SYMBOL_DURATION_SECS,
            slot_duration_secs: DEFAULT_SLOT_DURATION_SECS,
            device_id: 1,
            total_devices: DEFAULT_TOTAL_DEVICES,
            frequencies: DEFAULT_FREQUENCIES.to_vec(),
            tolerance_hz: DEFAULT_TOLERANCE_HZ,
            generator: DEFAULT_GENERATOR.to_string(),
            max_correctable_flips: DEFAULT_MAX_FLIPS,
            max_payload_bits: DEFAULT_MAX_PAYLOAD_BITS,
            preambles: vec![PREAMBLE_PATTERN.to_string()],
            pre_gain: DEFAULT_PRE_GAIN,
            clip_ceiling: DEFAULT_CLIP_CEILING,
            noise_floor: DEFAULT_NOISE_FLOOR,
            onset_threshold_factor: DEFAULT_ONSET_FACTOR,
            onset_window: DEFAULT_ONSET_WINDOW,
            onset_warmup: DEFAULT_ONSET_WARMUP,
            outbox_path: DEFAULT_OUTBOX.to_string(),
        }
    }
}

impl LinkConfig {
    pub fn from_file(path: &str) -> Result<Self, LinkError> {
        let reader = BufReader::new(File::open(path)?);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    /// Samples per modulated symbol
    pub fn symbol_samples(&self) -> usize {
        (self.sample_rate as f32 * self.symbol_duration_secs) as usize
    }

    /// Bits carried by one symbol
    pub fn bits_per_symbol(&self) -> usize {
        self.frequencies.len().max(2).ilog2() as usize
    }

    /// Width of the CRC remainder appended to each payload
    pub fn crc_width(&self) -> usize {
        self.generator.len().saturating_sub(1)
    }

    pub fn generator_bits(&self) -> Vec<u8> {
        bits_from_str(&self.generator).unwrap_or_default()
    }

    pub fn preamble_bits(&self) -> Vec<Vec<u8>> {
        self.preambles
            .iter()
            .filter_map(|p| bits_from_str(p))
            .collect()
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::from_secs_f32(self.slot_duration_secs)
    }

    /// One full schedule period: every device's slot, back to back
    pub fn period(&self) -> Duration {
        Duration::from_secs_f32(self.slot_duration_secs * self.total_devices as f32)
    }

    /// On-wire size of the largest frame this configuration can emit
    pub fn max_frame_bits(&self) -> usize {
        let preamble = self.preambles.first().map_or(0, |p| p.len());
        preamble
            + LENGTH_FIELD_BITS
            + 2 * ADDR_FIELD_BITS
            + self.max_payload_bits
            + self.crc_width()
    }

    /// Airtime of a frame of `frame_bits`, rounded up to whole symbols
    pub fn airtime_secs(&self, frame_bits: usize) -> f32 {
        let symbols = frame_bits.div_ceil(self.bits_per_symbol());
        symbols as f32 * self.symbol_duration_secs
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        let invalid = |msg: String| Err(LinkError::InvalidConfig(msg));

        if self.total_devices == 0 || (self.total_devices as usize) >= (1 << ADDR_FIELD_BITS) {
            return invalid(format!(
                "total_devices {} does not fit the {}-bit address field",
                self.total_devices, ADDR_FIELD_BITS
            ));
        }
        if self.device_id == 0 || self.device_id > self.total_devices {
            return invalid(format!(
                "device_id {} outside 1..={}",
                self.device_id, self.total_devices
            ));
        }
        if self.frequencies.len() < 2 || !self.frequencies.len().is_power_of_two() {
            return invalid(format!(
                "{} carriers cannot encode whole symbols",
                self.frequencies.len()
            ));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        for &freq in &self.frequencies {
            if freq <= 0.0 || freq + self.tolerance_hz >= nyquist {
                return invalid(format!("carrier {freq} Hz outside (0, {nyquist}) Hz"));
            }
        }
        if self.tolerance_hz <= 0.0 {
            return invalid("tolerance_hz must be positive".into());
        }
        match bits_from_str(&self.generator) {
            Some(bits) if bits.len() >= 2 && bits[0] == 1 => {}
            _ => return invalid(format!("bad generator polynomial {:?}", self.generator)),
        }
        if self.preambles.is_empty() || self.preamble_bits().len() != self.preambles.len() {
            return invalid("preambles must be non-empty bit strings".into());
        }
        if self.symbol_duration_secs <= 0.0 || self.slot_duration_secs <= 0.0 {
            return invalid("symbol and slot durations must be positive".into());
        }
        if self.onset_window == 0 {
            return invalid("onset_window must be at least one sample".into());
        }

        // The length field must be able to describe the largest frame body.
        let max_body = 2 * ADDR_FIELD_BITS + self.max_payload_bits + self.crc_width();
        let length_max = (1 << LENGTH_FIELD_BITS) - 1;
        if self.max_payload_bits == 0 || max_body > length_max {
            return invalid(format!(
                "max_payload_bits {} overflows the {}-bit length field",
                self.max_payload_bits, LENGTH_FIELD_BITS
            ));
        }

        // A full-size frame has to fit inside one slot.
        let airtime = self.airtime_secs(self.max_frame_bits());
        if airtime > self.slot_duration_secs {
            return invalid(format!(
                "a full frame needs {airtime:.1} s of airtime but slots last {:.1} s",
                self.slot_duration_secs
            ));
        }

        Ok(())
    }
}
