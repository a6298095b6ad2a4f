//! Per-format encoders
//!
//! The compressed branch produces framed Opus packets; the raw branch
//! reorders canonical PCM into network byte order.

pub mod encoder;
pub mod raw;

pub use encoder::{frame_packet, packet_len, OpusEncoder, PacketEncoder, PACKET_HEADER_LEN};
pub use raw::{from_network_order, to_network_order};
