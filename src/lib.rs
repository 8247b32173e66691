//! An audible FSK data link: framed messages modulated onto loudspeaker
//! tones, recovered by onset detection and symbol slicing, with CRC
//! correction and a wall-clock-synchronized TDMA schedule for sharing the
//! channel between devices.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod mac;
pub mod phy;
pub mod ui;
pub mod utils;
