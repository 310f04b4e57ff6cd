//! Frame envelope: delimiting, optional index byte, optional CRC trailer,
//! and the two selectable byte-stuffing encodings.
//!
//! The pre-stuffing body is `[index]? payload [crc8(payload)]?`; the CRC
//! never covers the index byte.

pub mod cobs;
pub mod slip;

mod decoder;

pub use decoder::{DecodeErrors, FrameDecoder};

use crate::crc::crc8;

/// Byte-stuffing algorithm used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
	/// Consistent Overhead Byte Stuffing; frames end with a single `0x00`.
	Cobs,
	/// Double-ended SLIP: `0xC0` on both sides, `0xDB`-prefixed escapes.
	Slip,
}

/// Frame options shared by the encoder and decoder sides of a link.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
	pub encoding: Encoding,
	/// Carry a one-byte topic index at the front of each frame.
	pub indexing: bool,
	/// Append a CRC-8 trailer computed over the payload.
	pub crc: bool,
	/// Received-packet FIFO cap; 0 means unbounded. The oldest packet is
	/// dropped on overflow.
	pub max_packet_queue: usize,
	/// Hard cap on a frame's stuffed body; larger frames are dropped.
	pub max_payload_bytes: usize,
}

impl Default for FrameConfig {
	fn default() -> FrameConfig {
		FrameConfig {
			encoding: Encoding::Cobs,
			indexing: true,
			crc: true,
			max_packet_queue: 0,
			max_payload_bytes: 1024,
		}
	}
}

/// One received frame after unstuffing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
	/// Topic index, 0 when indexing is disabled.
	pub index: u8,
	/// Payload bytes, index and CRC stripped.
	pub data: Vec<u8>,
}

/// Wrap `payload` in a frame ready for the transport.
pub fn encode(config: &FrameConfig, index: u8, payload: &[u8]) -> Vec<u8> {
	let mut raw = Vec::with_capacity(payload.len() + 2);
	if config.indexing {
		raw.push(index);
	}
	raw.extend_from_slice(payload);
	if config.crc {
		raw.push(crc8(payload));
	}
	match config.encoding {
		Encoding::Cobs => {
			let mut out = Vec::with_capacity(raw.len() + 2 + raw.len() / 254);
			cobs::stuff(&raw, &mut out);
			out.push(cobs::END);
			out
		}
		Encoding::Slip => {
			let mut out = Vec::with_capacity(raw.len() + 2);
			out.push(slip::END);
			slip::escape_into(&raw, &mut out);
			out.push(slip::END);
			out
		}
	}
}

/// One-shot decode of a single complete frame.
pub fn decode(config: &FrameConfig, bytes: &[u8]) -> Option<Packet> {
	let mut decoder = FrameDecoder::new(*config);
	decoder.feed(bytes);
	decoder.pop()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(encoding: Encoding, indexing: bool, crc: bool) -> FrameConfig {
		FrameConfig {
			encoding,
			indexing,
			crc,
			..FrameConfig::default()
		}
	}

	#[test]
	fn cobs_wire_shape() {
		// payload with an interior zero, no index, no crc
		let c = config(Encoding::Cobs, false, false);
		let frame = encode(&c, 0, &[0x11, 0x22, 0x00, 0x33]);
		assert_eq!(frame, &[0x03, 0x11, 0x22, 0x02, 0x33, 0x00]);
	}

	#[test]
	fn slip_wire_shape() {
		let c = config(Encoding::Slip, false, false);
		let frame = encode(&c, 0, &[0xC0, 0xDB, 0x00]);
		assert_eq!(frame, &[0xC0, 0xDB, 0xDC, 0xDB, 0xDD, 0x00, 0xC0]);
	}

	#[test]
	fn cobs_output_has_no_interior_zero() {
		let c = config(Encoding::Cobs, true, true);
		let payload: Vec<u8> = (0u16..300).map(|v| (v % 7) as u8).collect();
		let frame = encode(&c, 0x42, &payload);
		assert_eq!(frame.last(), Some(&0x00));
		assert!(!frame[..frame.len() - 1].contains(&0x00));
	}

	#[test]
	fn slip_body_has_no_unescaped_markers() {
		let c = config(Encoding::Slip, true, true);
		let payload: Vec<u8> = (0u16..300).map(|v| (v % 251) as u8).collect();
		let frame = encode(&c, 0x42, &payload);
		let body = &frame[1..frame.len() - 1];
		assert!(!body.contains(&0xC0));
		let mut i = 0;
		while i < body.len() {
			if body[i] == 0xDB {
				assert!(matches!(body[i + 1], 0xDC | 0xDD));
				i += 2;
			} else {
				i += 1;
			}
		}
	}

	#[test]
	fn round_trip_all_option_combinations() {
		let payload = [0x00u8, 0xC0, 0xDB, 0x7F, 0xFF, 0x00];
		for encoding in [Encoding::Cobs, Encoding::Slip] {
			for indexing in [false, true] {
				for crc in [false, true] {
					let c = config(encoding, indexing, crc);
					let frame = encode(&c, 0x5A, &payload);
					let packet = decode(&c, &frame).expect("frame should decode");
					assert_eq!(packet.index, if indexing { 0x5A } else { 0 });
					assert_eq!(packet.data, payload);
				}
			}
		}
	}

	#[test]
	fn empty_payload_is_a_real_frame() {
		let c = config(Encoding::Cobs, false, false);
		let frame = encode(&c, 0, &[]);
		assert_eq!(frame, &[0x01, 0x00]);
		let packet = decode(&c, &frame).expect("empty frame should decode");
		assert!(packet.data.is_empty());
	}
}
