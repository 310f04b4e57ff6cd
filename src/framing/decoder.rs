//! Streaming frame decoder: one instance per byte source.
//!
//! Bytes arrive in arbitrary chunks; completed frames are unstuffed,
//! verified and queued as [`Packet`]s for the dispatcher to drain. Nothing
//! on this path ever fails the host: bad frames are counted and dropped.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::crc::crc8;

use super::{cobs, slip, Encoding, FrameConfig, Packet};

/// Per-decoder error counters. None of these is fatal; the counters only
/// ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeErrors {
	/// SLIP escape introducer followed by an invalid byte.
	pub bad_escape: u32,
	/// CRC trailer did not match the payload.
	pub crc_mismatch: u32,
	/// Stuffed body exceeded the configured maximum.
	pub size_overflow: u32,
	/// Packet FIFO was full; the oldest packet was dropped.
	pub queue_overflow: u32,
	/// Stuffing inconsistencies: a COBS distance byte pointing past the
	/// frame, or a body too short for its index/CRC bytes.
	pub malformed: u32,
}

impl DecodeErrors {
	pub fn total(&self) -> u32 {
		self.bad_escape
			+ self.crc_mismatch
			+ self.size_overflow
			+ self.queue_overflow
			+ self.malformed
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	/// Nothing buffered; waiting for frame bytes.
	Idle,
	/// Accumulating a frame body.
	InFrame,
	/// SLIP only: the previous byte was the escape introducer.
	Escaped,
}

/// Streaming decoder state machine.
#[derive(Debug)]
pub struct FrameDecoder {
	config: FrameConfig,
	state: State,
	/// COBS: the stuffed body. SLIP: the body with escapes already undone.
	buffer: Vec<u8>,
	/// Current frame blew the size cap; swallow it up to the delimiter.
	overflowed: bool,
	packets: VecDeque<Packet>,
	errors: DecodeErrors,
}

impl FrameDecoder {
	pub fn new(config: FrameConfig) -> FrameDecoder {
		FrameDecoder {
			config,
			state: State::Idle,
			buffer: Vec::new(),
			overflowed: false,
			packets: VecDeque::new(),
			errors: DecodeErrors::default(),
		}
	}

	/// Feed a chunk of raw transport bytes.
	pub fn feed(&mut self, bytes: &[u8]) {
		for &byte in bytes {
			match self.config.encoding {
				Encoding::Cobs => self.feed_cobs(byte),
				Encoding::Slip => self.feed_slip(byte),
			}
		}
	}

	/// Take the oldest decoded packet, if any.
	pub fn pop(&mut self) -> Option<Packet> {
		self.packets.pop_front()
	}

	/// Oldest decoded packet without consuming it.
	pub fn peek(&self) -> Option<&Packet> {
		self.packets.front()
	}

	/// Most recently decoded packet without consuming it.
	pub fn latest(&self) -> Option<&Packet> {
		self.packets.back()
	}

	/// Decoded packets waiting in the FIFO.
	pub fn available(&self) -> usize {
		self.packets.len()
	}

	/// Whether a frame is currently in flight (bytes buffered since the
	/// last delimiter).
	pub fn parsing(&self) -> bool {
		self.state != State::Idle
	}

	/// Abandon any in-flight frame and queued packets. Counters survive.
	pub fn reset(&mut self) {
		self.state = State::Idle;
		self.buffer.clear();
		self.overflowed = false;
		self.packets.clear();
	}

	/// Total error count across all categories.
	pub fn errors(&self) -> u32 {
		self.errors.total()
	}

	pub fn error_counts(&self) -> &DecodeErrors {
		&self.errors
	}

	pub fn config(&self) -> &FrameConfig {
		&self.config
	}

	pub fn indexing(&self) -> bool {
		self.config.indexing
	}

	pub fn verifying(&self) -> bool {
		self.config.crc
	}

	/// Expect (or stop expecting) a leading index byte in each frame.
	pub fn set_indexing(&mut self, on: bool) {
		self.config.indexing = on;
	}

	/// Expect (or stop expecting) a CRC trailer in each frame.
	pub fn set_verifying(&mut self, on: bool) {
		self.config.crc = on;
	}

	pub fn set_options(&mut self, indexing: bool, crc: bool) {
		self.config.indexing = indexing;
		self.config.crc = crc;
	}

	fn feed_cobs(&mut self, byte: u8) {
		if byte == cobs::END {
			if !self.buffer.is_empty() && !self.overflowed {
				match cobs::unstuff(&self.buffer) {
					Some(raw) => self.finish(raw),
					None => {
						debug!("dropping frame with inconsistent cobs stuffing");
						self.errors.malformed += 1;
					}
				}
			}
			self.start_over();
		} else {
			self.push_body(byte);
		}
	}

	fn feed_slip(&mut self, byte: u8) {
		if self.state == State::Escaped {
			match byte {
				slip::ESC_END => self.push_body(slip::END),
				slip::ESC_ESC => self.push_body(slip::ESC),
				other => {
					warn!("invalid slip escape 0x{:02X}, dropping frame", other);
					self.errors.bad_escape += 1;
					self.start_over();
				}
			}
			return;
		}
		match byte {
			slip::END => {
				if !self.buffer.is_empty() && !self.overflowed {
					let raw = std::mem::take(&mut self.buffer);
					self.finish(raw);
				}
				self.start_over();
			}
			slip::ESC => self.state = State::Escaped,
			other => self.push_body(other),
		}
	}

	fn push_body(&mut self, byte: u8) {
		self.state = State::InFrame;
		if self.overflowed {
			return;
		}
		if self.buffer.len() >= self.config.max_payload_bytes {
			debug!(
				"frame body exceeds {} bytes, dropping",
				self.config.max_payload_bytes
			);
			self.errors.size_overflow += 1;
			self.overflowed = true;
			self.buffer.clear();
			return;
		}
		self.buffer.push(byte);
	}

	fn start_over(&mut self) {
		self.state = State::Idle;
		self.buffer.clear();
		self.overflowed = false;
	}

	/// Strip index and CRC from an unstuffed body, verify, enqueue.
	fn finish(&mut self, raw: Vec<u8>) {
		let mut data = raw;
		let index = if self.config.indexing {
			if data.is_empty() {
				debug!("frame too short to carry an index byte");
				self.errors.malformed += 1;
				return;
			}
			data.remove(0)
		} else {
			0
		};
		if self.config.crc {
			let Some(&expected) = data.last() else {
				debug!("frame too short to carry a crc trailer");
				self.errors.malformed += 1;
				return;
			};
			let body = data.len() - 1;
			let actual = crc8(&data[..body]);
			if actual != expected {
				debug!(
					"crc mismatch: computed 0x{:02X}, frame carries 0x{:02X}",
					actual, expected
				);
				self.errors.crc_mismatch += 1;
				return;
			}
			data.truncate(body);
		}
		self.enqueue(Packet { index, data });
	}

	fn enqueue(&mut self, packet: Packet) {
		let cap = self.config.max_packet_queue;
		if cap != 0 && self.packets.len() >= cap {
			self.packets.pop_front();
			self.errors.queue_overflow += 1;
			debug!("packet queue full, dropped oldest");
		}
		self.packets.push_back(packet);
	}
}
