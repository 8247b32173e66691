// Time-division MAC: every device derives the same epoch from the wall
// clock, then owns one fixed slot of every schedule period.

pub mod outbox;
pub mod tdma;

pub use tdma::TdmaNode;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Engine phases, entered in order; `Cycling` only ends on shutdown.
pub enum MacPhase {
    WaitForEpoch,
    CountdownAnnounce,
    Cycling,
}

/// A device's fixed window within the schedule period. Computed once, never
/// mutated; checked against wall-clock time every period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub device_id: u8,
    pub start_offset: Duration,
    pub duration: Duration,
}

impl Slot {
    /// Device i (1-based) owns `[(i-1) * slot_duration, i * slot_duration)`
    /// of every period.
    pub fn for_device(device_id: u8, total_devices: u8, slot_duration: Duration) -> Self {
        let index = (device_id.saturating_sub(1) % total_devices.max(1)) as u32;
        Self {
            device_id,
            start_offset: slot_duration * index,
            duration: slot_duration,
        }
    }

    pub fn contains(&self, period_offset: Duration) -> bool {
        period_offset >= self.start_offset && period_offset < self.start_offset + self.duration
    }
}

/// Position within the current schedule period
pub fn period_offset(elapsed: Duration, period: Duration) -> Duration {
    Duration::from_secs_f64(elapsed.as_secs_f64() % period.as_secs_f64())
}

/// Monotonic slot counter since the epoch
pub fn slot_index(elapsed: Duration, slot_duration: Duration) -> u64 {
    (elapsed.as_secs_f64() / slot_duration.as_secs_f64()) as u64
}

/// Which device transmits during a given slot
pub fn slot_owner(slot_index: u64, total_devices: u8) -> u8 {
    (slot_index % total_devices.max(1) as u64) as u8 + 1
}

/// Time until the next wall-clock minute boundary, the shared epoch every
/// device computes independently with no handshake.
pub fn next_minute_epoch() -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Duration::from_secs_f64(60.0 - now.as_secs_f64() % 60.0)
}
