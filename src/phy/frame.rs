// Frame format: [Preamble] [Length] [Destination] [Source] [Payload]
//
// The length field counts every bit that follows it. The payload on the wire
// is a CRC codeword; `decode_message` strips the remainder after the
// syndrome check.

use tracing::debug;

use crate::config::LinkConfig;
use crate::error::{FrameError, LinkError};
use crate::phy::crc;
use crate::utils::consts::{ADDR_FIELD_BITS, BROADCAST_ADDR, LENGTH_FIELD_BITS};

/// A parsed frame, addresses and payload only; the preamble and length field
/// never leave this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dest: u8,
    pub source: u8,
    pub payload: Vec<u8>,
}

/// An application message recovered from an accepted frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub dest: u8,
    pub source: u8,
    pub data: Vec<u8>,
}

/// Outcome of decoding a slot's bitstring on a shared channel. A frame for
/// somebody else is business as usual, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Accepted(Message),
    NotForMe { dest: u8 },
}

/// True when a frame addressed to `dest` should be delivered locally
pub fn accepts(dest: u8, local_id: u8) -> bool {
    dest == local_id || dest == BROADCAST_ADDR
}

/// Assemble the on-wire bits for `payload` (CRC-encoded or raw, this layer
/// does not care). Uses the first configured preamble.
pub fn build_frame(payload: &[u8], dest: u8, source: u8, config: &LinkConfig) -> Vec<u8> {
    let preamble = config
        .preamble_bits()
        .into_iter()
        .next()
        .unwrap_or_default();

    let body_len = 2 * ADDR_FIELD_BITS + payload.len();
    let mut bits = preamble;
    bits.extend(crc::int_to_bits(body_len, LENGTH_FIELD_BITS));
    bits.extend(crc::int_to_bits(dest as usize, ADDR_FIELD_BITS));
    bits.extend(crc::int_to_bits(source as usize, ADDR_FIELD_BITS));
    bits.extend_from_slice(payload);
    bits
}

/// Parse a received bitstring back into a frame. Trailing bits beyond the
/// declared length are ignored; the slicer decodes garbage past the end of a
/// transmission and the length field is what cuts it off.
pub fn parse_frame(bits: &[u8], config: &LinkConfig) -> Result<Frame, FrameError> {
    let preamble_len = config
        .preamble_bits()
        .iter()
        .find(|p| bits.len() >= p.len() && &bits[..p.len()] == &p[..])
        .map(|p| p.len())
        .ok_or(FrameError::PreambleMismatch)?;

    let after_preamble = &bits[preamble_len..];
    if after_preamble.len() < LENGTH_FIELD_BITS {
        return Err(FrameError::LengthOverrun {
            declared: LENGTH_FIELD_BITS,
            available: after_preamble.len(),
        });
    }

    let declared = crc::bits_to_int(&after_preamble[..LENGTH_FIELD_BITS]);
    let body = &after_preamble[LENGTH_FIELD_BITS..];
    if declared < 2 * ADDR_FIELD_BITS || body.len() < declared {
        return Err(FrameError::LengthOverrun {
            declared,
            available: body.len(),
        });
    }

    let dest = crc::bits_to_int(&body[..ADDR_FIELD_BITS]) as u8;
    let source = crc::bits_to_int(&body[ADDR_FIELD_BITS..2 * ADDR_FIELD_BITS]) as u8;
    if dest > config.total_devices {
        return Err(FrameError::AddressOutOfRange(dest));
    }
    if source == 0 || source > config.total_devices {
        return Err(FrameError::AddressOutOfRange(source));
    }

    Ok(Frame {
        dest,
        source,
        payload: body[2 * ADDR_FIELD_BITS..declared].to_vec(),
    })
}

/// CRC-encode `data` and frame the codeword for transmission
pub fn encode_message(data: &[u8], dest: u8, config: &LinkConfig) -> Vec<u8> {
    let codeword = crc::encode(data, &config.generator_bits());
    build_frame(&codeword, dest, config.device_id, config)
}

/// Parse, address-filter, and CRC-verify one slot's bitstring. Corrects up
/// to the configured flip budget; an uncorrectable codeword drops the frame.
pub fn decode_message(bits: &[u8], config: &LinkConfig) -> Result<Delivery, LinkError> {
    let frame = parse_frame(bits, config)?;

    if !accepts(frame.dest, config.device_id) {
        return Ok(Delivery::NotForMe { dest: frame.dest });
    }

    let generator = config.generator_bits();
    let crc_width = config.crc_width();
    if frame.payload.len() <= crc_width {
        return Err(LinkError::UncorrectableCodeword {
            max_flips: config.max_correctable_flips,
        });
    }

    let (codeword, flips) =
        crc::correct(&frame.payload, &generator, config.max_correctable_flips).ok_or(
            LinkError::UncorrectableCodeword {
                max_flips: config.max_correctable_flips,
            },
        )?;
    if !flips.is_empty() {
        debug!("corrected codeword by flipping bits {:?}", flips);
    }

    let data = codeword[..codeword.len() - crc_width].to_vec();
    Ok(Delivery::Accepted(Message {
        dest: frame.dest,
        source: frame.source,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::crc::{bits_from_str, bits_to_string};

    fn config() -> LinkConfig {
        LinkConfig {
            device_id: 2,
            ..Default::default()
        }
    }

    #[test]
    fn build_matches_wire_format() {
        let config = config();
        let payload = bits_from_str("1101001").unwrap();
        let bits = build_frame(&payload, 2, 1, &config);
        // preamble 1011, length 01011 (7 + 4 = 11), dest 10, source 01
        assert_eq!(bits_to_string(&bits), "10110101110011101001");
    }

    #[test]
    fn parse_round_trip() {
        let config = config();
        for payload in ["1", "1101001", "110100111010011"] {
            let payload = bits_from_str(payload).unwrap();
            let bits = build_frame(&payload, 2, 1, &config);
            let frame = parse_frame(&bits, &config).unwrap();
            assert_eq!(frame.dest, 2);
            assert_eq!(frame.source, 1);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn parse_ignores_trailing_bits() {
        let config = config();
        let payload = bits_from_str("1101001").unwrap();
        let mut bits = build_frame(&payload, 2, 1, &config);
        bits.extend_from_slice(&[0, 0, 1, 0, 1, 1, 0]);
        let frame = parse_frame(&bits, &config).unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn parse_rejects_bad_preamble() {
        let config = config();
        let payload = bits_from_str("1101001").unwrap();
        let mut bits = build_frame(&payload, 2, 1, &config);
        bits[0] ^= 1;
        assert_eq!(parse_frame(&bits, &config), Err(FrameError::PreambleMismatch));
    }

    #[test]
    fn parse_rejects_truncated_payload() {
        let config = config();
        let payload = bits_from_str("1101001").unwrap();
        let bits = build_frame(&payload, 2, 1, &config);
        let truncated = &bits[..bits.len() - 3];
        assert!(matches!(
            parse_frame(truncated, &config),
            Err(FrameError::LengthOverrun { .. })
        ));
    }

    #[test]
    fn parse_rejects_invalid_source() {
        let config = config();
        let payload = bits_from_str("1101001").unwrap();
        // source 0 is not a device
        let bits = build_frame(&payload, 2, 0, &config);
        assert_eq!(
            parse_frame(&bits, &config),
            Err(FrameError::AddressOutOfRange(0))
        );
    }

    #[test]
    fn message_round_trip() {
        let config = config();
        let data = bits_from_str("1101001").unwrap();
        let bits = encode_message(&data, 2, &config);

        // encode_message stamps our own id as source; decode from the
        // destination's point of view.
        let receiver = LinkConfig {
            device_id: 2,
            ..config.clone()
        };
        match decode_message(&bits, &receiver).unwrap() {
            Delivery::Accepted(message) => {
                assert_eq!(message.source, config.device_id);
                assert_eq!(message.dest, 2);
                assert_eq!(message.data, data);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_is_accepted_everywhere() {
        let sender = LinkConfig {
            device_id: 1,
            ..Default::default()
        };
        let data = bits_from_str("101").unwrap();
        let bits = encode_message(&data, BROADCAST_ADDR, &sender);

        for id in 1..=3 {
            let receiver = LinkConfig {
                device_id: id,
                ..Default::default()
            };
            assert!(matches!(
                decode_message(&bits, &receiver).unwrap(),
                Delivery::Accepted(_)
            ));
        }
    }

    #[test]
    fn unicast_for_somebody_else_is_filtered() {
        let sender = LinkConfig {
            device_id: 1,
            ..Default::default()
        };
        let data = bits_from_str("101").unwrap();
        let bits = encode_message(&data, 3, &sender);

        let receiver = LinkConfig {
            device_id: 2,
            ..Default::default()
        };
        assert_eq!(
            decode_message(&bits, &receiver).unwrap(),
            Delivery::NotForMe { dest: 3 }
        );
    }

    #[test]
    fn corrupted_codeword_is_corrected() {
        let sender = LinkConfig {
            device_id: 1,
            ..Default::default()
        };
        let data = bits_from_str("1101001").unwrap();
        let mut bits = encode_message(&data, 2, &sender);
        // flip one payload bit (payload starts after preamble + length + addrs)
        let payload_start = 4 + 5 + 4;
        bits[payload_start + 3] ^= 1;

        let receiver = LinkConfig {
            device_id: 2,
            ..Default::default()
        };
        match decode_message(&bits, &receiver).unwrap() {
            Delivery::Accepted(message) => assert_eq!(message.data, data),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn hopeless_codeword_is_dropped() {
        let sender = LinkConfig {
            device_id: 1,
            ..Default::default()
        };
        let data = bits_from_str("1101001").unwrap();
        let mut bits = encode_message(&data, 2, &sender);
        let payload_start = 4 + 5 + 4;
        for i in [0, 1, 2] {
            bits[payload_start + i] ^= 1;
        }

        let receiver = LinkConfig {
            device_id: 2,
            ..Default::default()
        };
        assert!(matches!(
            decode_message(&bits, &receiver),
            Err(LinkError::UncorrectableCodeword { .. })
        ));
    }
}
