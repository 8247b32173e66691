//! Offline round trips through the whole stack (frame + CRC encode, tone
//! rendering, filtering/onset/slicing, parse and correction) with no audio
//! device anywhere.

use tonelink::audio::tone::render_bitstring;
use tonelink::audio::{FrequencyPlan, SlotDemodulator};
use tonelink::config::LinkConfig;
use tonelink::phy::crc::bits_from_str;
use tonelink::phy::{Delivery, frame};

fn offline_config(device_id: u8) -> LinkConfig {
    LinkConfig {
        sample_rate: 16000,
        symbol_duration_secs: 0.05,
        slot_duration_secs: 2.0,
        pre_gain: 1.0,
        device_id,
        ..Default::default()
    }
}

/// Render a transmission the way a slot capture would see it: ambient
/// silence, the frame, more silence until the slot ends.
fn slot_capture(data: &str, dest: u8, sender: &LinkConfig) -> Vec<f32> {
    let bits = frame::encode_message(&bits_from_str(data).unwrap(), dest, sender);
    let plan = FrequencyPlan::from_config(sender);

    let mut samples = vec![0.0; 4000];
    samples.extend(render_bitstring(
        &bits,
        &plan,
        sender.symbol_duration_secs,
        sender.sample_rate,
    ));
    samples.extend(vec![0.0; 4000]);
    samples
}

#[test]
fn message_survives_the_ideal_channel() {
    let sender = offline_config(1);
    let receiver = offline_config(2);

    let capture = slot_capture("1101001", 2, &sender);
    let recovered = SlotDemodulator::new(&receiver)
        .demodulate(&capture)
        .expect("onset should be detected");

    match frame::decode_message(&recovered, &receiver).unwrap() {
        Delivery::Accepted(message) => {
            assert_eq!(message.source, 1);
            assert_eq!(message.dest, 2);
            assert_eq!(message.data, bits_from_str("1101001").unwrap());
        }
        other => panic!("expected delivery, got {other:?}"),
    }
}

#[test]
fn message_survives_a_lightly_noisy_channel() {
    let sender = offline_config(1);
    let receiver = offline_config(2);

    let mut capture = slot_capture("1101001", 2, &sender);
    for sample in capture.iter_mut() {
        *sample += (rand::random::<f32>() - 0.5) * 0.04;
    }

    let recovered = SlotDemodulator::new(&receiver)
        .demodulate(&capture)
        .expect("onset should survive the noise");

    match frame::decode_message(&recovered, &receiver).unwrap() {
        Delivery::Accepted(message) => {
            assert_eq!(message.data, bits_from_str("1101001").unwrap());
        }
        other => panic!("expected delivery, got {other:?}"),
    }
}

#[test]
fn broadcast_reaches_every_listener() {
    let sender = offline_config(1);
    let capture = slot_capture("10101", 0, &sender);

    for id in 1..=3u8 {
        let receiver = offline_config(id);
        let recovered = SlotDemodulator::new(&receiver)
            .demodulate(&capture)
            .expect("onset should be detected");

        match frame::decode_message(&recovered, &receiver).unwrap() {
            Delivery::Accepted(message) => {
                assert_eq!(message.data, bits_from_str("10101").unwrap());
                assert_eq!(message.source, 1);
            }
            other => panic!("device {id}: expected delivery, got {other:?}"),
        }
    }
}

#[test]
fn unicast_is_filtered_by_other_devices() {
    let sender = offline_config(1);
    let receiver = offline_config(3);

    let capture = slot_capture("1101001", 2, &sender);
    let recovered = SlotDemodulator::new(&receiver)
        .demodulate(&capture)
        .expect("onset should be detected");

    assert_eq!(
        frame::decode_message(&recovered, &receiver).unwrap(),
        Delivery::NotForMe { dest: 2 }
    );
}

#[test]
fn empty_slot_reports_no_transmission() {
    let receiver = offline_config(2);
    let silent_slot = vec![0.0; 32000];
    assert_eq!(SlotDemodulator::new(&receiver).demodulate(&silent_slot), None);
}
