// Bit-level layer: CRC codec and the frame format shared by every device.

pub mod crc;
pub mod frame;

pub use frame::{Delivery, Frame, Message};
