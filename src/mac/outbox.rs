//! Line-delimited message outbox: the external queue feeding the sender.
//!
//! File protocol (one block per message):
//! ```text
//! <bitstring> <destination>
//! DONE
//! ```
//! A block is consumed only once its `DONE` line is present, so a writer can
//! stage a message without racing the watcher.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::config::LinkConfig;
use crate::phy::crc::bits_from_str;
use crate::utils::consts::OUTBOX_POLL_MS;

/// A validated message waiting for our slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub data: Vec<u8>,
    pub dest: u8,
}

/// Pop the first completed block from the outbox file. Returns the raw
/// bitstring and destination; malformed blocks are consumed and skipped so
/// one bad entry cannot wedge the queue.
pub fn take_next(path: &Path) -> io::Result<Option<(String, u8)>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines();
    let (Some(head), Some(command)) = (lines.next(), lines.next()) else {
        return Ok(None);
    };
    if command.trim() != "DONE" {
        // Writer still composing; leave the file alone.
        return Ok(None);
    }

    let mut parts = head.split_whitespace();
    let parsed = match (parts.next(), parts.next()) {
        (Some(bits), Some(dest)) => dest.parse::<u8>().ok().map(|d| (bits.to_string(), d)),
        _ => None,
    };
    if parsed.is_none() {
        warn!("outbox: skipping malformed entry {head:?}");
    }

    consume_first_block(path, &content)?;
    Ok(parsed)
}

fn consume_first_block(path: &Path, content: &str) -> io::Result<()> {
    let rest: Vec<&str> = content.lines().skip(2).collect();
    if rest.is_empty() {
        fs::write(path, "")
    } else {
        fs::write(path, rest.join("\n") + "\n")
    }
}

/// Check an outbox entry against the link limits before it may queue
pub fn validate(
    bits: &str,
    dest: u8,
    config: &LinkConfig,
) -> Result<OutboundMessage, String> {
    let data = bits_from_str(bits).ok_or_else(|| format!("{bits:?} is not a bit string"))?;
    if dest > config.total_devices {
        return Err(format!(
            "destination {dest} outside 0..={}",
            config.total_devices
        ));
    }
    if data.len() > config.max_payload_bits {
        return Err(format!(
            "{} bits exceeds the {}-bit payload bound",
            data.len(),
            config.max_payload_bits
        ));
    }
    Ok(OutboundMessage { data, dest })
}

/// Poll the outbox until shutdown, pushing valid messages into the sender
/// queue. Invalid entries are discarded with a warning, as is anything that
/// arrives after the queue's receiving side is gone.
pub fn watch(config: LinkConfig, queue: Sender<OutboundMessage>, running: Arc<AtomicBool>) {
    let path = PathBuf::from(&config.outbox_path);
    info!("watching outbox {}", path.display());

    while running.load(Ordering::SeqCst) {
        match take_next(&path) {
            Ok(Some((bits, dest))) => match validate(&bits, dest, &config) {
                Ok(message) => {
                    info!("queued message {bits} for device {dest}");
                    if queue.send(message).is_err() {
                        break;
                    }
                }
                Err(reason) => warn!("discarding outbox message: {reason}"),
            },
            Ok(None) => {}
            Err(err) => warn!("outbox read failed: {err}"),
        }
        thread::sleep(Duration::from_millis(OUTBOX_POLL_MS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch_file(content: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tonelink-outbox-{}-{id}.txt",
            std::process::id()
        ));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn takes_and_consumes_completed_block() {
        let path = scratch_file("1101001 2\nDONE\n1111 3\nDONE\n");

        assert_eq!(
            take_next(&path).unwrap(),
            Some(("1101001".to_string(), 2))
        );
        assert_eq!(take_next(&path).unwrap(), Some(("1111".to_string(), 3)));
        assert_eq!(take_next(&path).unwrap(), None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn waits_for_done_marker() {
        let path = scratch_file("1101001 2\n");
        assert_eq!(take_next(&path).unwrap(), None);
        // File untouched while the writer is still composing
        assert_eq!(fs::read_to_string(&path).unwrap(), "1101001 2\n");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn skips_malformed_entry_without_wedging() {
        let path = scratch_file("not-bits\nDONE\n101 1\nDONE\n");
        assert_eq!(take_next(&path).unwrap(), None);
        assert_eq!(take_next(&path).unwrap(), Some(("101".to_string(), 1)));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_empty_queue() {
        let path = std::env::temp_dir().join("tonelink-outbox-never-created.txt");
        assert_eq!(take_next(&path).unwrap(), None);
    }

    #[test]
    fn validation_limits() {
        let config = LinkConfig::default();

        assert!(validate("1101001", 2, &config).is_ok());
        assert!(validate("1101001", 0, &config).is_ok()); // broadcast

        assert!(validate("2101001", 2, &config).is_err());
        assert!(validate("1101001", 7, &config).is_err());
        assert!(validate(&"1".repeat(16), 2, &config).is_err());

        let message = validate("101", 1, &config).unwrap();
        assert_eq!(message, OutboundMessage { data: vec![1, 0, 1], dest: 1 });
    }
}
