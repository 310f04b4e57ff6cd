//! Serializer for the self-describing object encoding.
//!
//! All multi-byte fields are big-endian. Integers always take the smallest
//! representation that holds the value, so the same number produces the same
//! bytes no matter which Rust integer type carried it.

use std::collections::{BTreeMap, HashMap};

use log::warn;

use crate::error::{Error, Result};
use crate::tags;
use crate::value::{Bin, Ext, Timespec};

/// Types that know how to append themselves to a [`Packer`].
///
/// Implement this on your own records to pack them by delegation; the usual
/// convention is `packer.to_array(...)` for positional records and
/// `packer.to_map(...)` for self-describing ones.
pub trait Pack {
	fn pack(&self, packer: &mut Packer);
}

/// Growable encode buffer with a running element count.
///
/// The element count is the number of elements emitted so far, container
/// headers included; the framing layer and snapshotter use it to tell one
/// value from many.
#[derive(Debug, Clone, Default)]
pub struct Packer {
	buffer: Vec<u8>,
	elements: usize,
}

impl Packer {
	pub fn new() -> Packer {
		Packer::default()
	}

	/// Encoded bytes so far.
	pub fn data(&self) -> &[u8] {
		&self.buffer
	}

	pub fn len(&self) -> usize {
		self.buffer.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buffer.is_empty()
	}

	/// Elements emitted so far, container headers included.
	pub fn element_count(&self) -> usize {
		self.elements
	}

	pub fn clear(&mut self) {
		self.buffer.clear();
		self.elements = 0;
	}

	/// Consume the packer, yielding the encoded bytes.
	pub fn into_bytes(self) -> Vec<u8> {
		self.buffer
	}

	/// Pack any [`Pack`] value.
	pub fn pack<T: Pack + ?Sized>(&mut self, value: &T) -> &mut Packer {
		value.pack(self);
		self
	}

	/// Pack each value in order, with no enclosing container.
	pub fn serialize(&mut self, values: &[&dyn Pack]) -> &mut Packer {
		for v in values {
			v.pack(self);
		}
		self
	}

	/// Pack an array header for `values.len()` followed by each value.
	pub fn to_array(&mut self, values: &[&dyn Pack]) -> &mut Packer {
		self.pack_array_header(values.len());
		self.serialize(values)
	}

	/// Pack a map of `entries.len() / 2` pairs from a flat
	/// key/value/key/value list.
	///
	/// An odd-length list is a usage error: nothing is emitted.
	pub fn to_map(&mut self, entries: &[&dyn Pack]) -> Result<()> {
		if entries.len() % 2 != 0 {
			warn!("map entries must come in key/value pairs, got {}", entries.len());
			return Err(Error::OddMapArguments(entries.len()));
		}
		self.pack_map_header(entries.len() / 2);
		self.serialize(entries);
		Ok(())
	}

	pub fn pack_nil(&mut self) {
		self.buffer.push(tags::NIL);
		self.elements += 1;
	}

	pub fn pack_bool(&mut self, value: bool) {
		self.buffer.push(if value { tags::TRUE } else { tags::FALSE });
		self.elements += 1;
	}

	/// Pack an unsigned integer in its minimal form.
	pub fn pack_uint(&mut self, value: u64) {
		if value <= 0x7F {
			self.buffer.push(value as u8);
		} else if value <= u8::MAX as u64 {
			self.buffer.push(tags::UINT8);
			self.buffer.push(value as u8);
		} else if value <= u16::MAX as u64 {
			self.buffer.push(tags::UINT16);
			self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
		} else if value <= u32::MAX as u64 {
			self.buffer.push(tags::UINT32);
			self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
		} else {
			self.buffer.push(tags::UINT64);
			self.buffer.extend_from_slice(&value.to_be_bytes());
		}
		self.elements += 1;
	}

	/// Pack a signed integer in its minimal form.
	///
	/// Non-negative values route through the unsigned forms, so the sign of
	/// the Rust type never leaks into the wire representation.
	pub fn pack_int(&mut self, value: i64) {
		if value >= 0 {
			self.pack_uint(value as u64);
			return;
		}
		if value >= -31 {
			self.buffer.push(tags::NEGATIVE_FIXINT | (value as u8 & 0x1F));
		} else if value >= i8::MIN as i64 {
			self.buffer.push(tags::INT8);
			self.buffer.push(value as u8);
		} else if value >= i16::MIN as i64 {
			self.buffer.push(tags::INT16);
			self.buffer.extend_from_slice(&(value as i16).to_be_bytes());
		} else if value >= i32::MIN as i64 {
			self.buffer.push(tags::INT32);
			self.buffer.extend_from_slice(&(value as i32).to_be_bytes());
		} else {
			self.buffer.push(tags::INT64);
			self.buffer.extend_from_slice(&value.to_be_bytes());
		}
		self.elements += 1;
	}

	pub fn pack_f32(&mut self, value: f32) {
		self.buffer.push(tags::FLOAT32);
		self.buffer.extend_from_slice(&value.to_be_bytes());
		self.elements += 1;
	}

	pub fn pack_f64(&mut self, value: f64) {
		self.buffer.push(tags::FLOAT64);
		self.buffer.extend_from_slice(&value.to_be_bytes());
		self.elements += 1;
	}

	/// Pack a string; bytes are copied verbatim, UTF-8 is not re-checked.
	pub fn pack_str(&mut self, value: &str) {
		let bytes = value.as_bytes();
		let len = bytes.len();
		if len <= 31 {
			self.buffer.push(tags::FIXSTR | len as u8);
		} else if len <= u8::MAX as usize {
			self.buffer.push(tags::STR8);
			self.buffer.push(len as u8);
		} else if len <= u16::MAX as usize {
			self.buffer.push(tags::STR16);
			self.buffer.extend_from_slice(&(len as u16).to_be_bytes());
		} else {
			self.buffer.push(tags::STR32);
			self.buffer.extend_from_slice(&(len as u32).to_be_bytes());
		}
		self.buffer.extend_from_slice(bytes);
		self.elements += 1;
	}

	pub fn pack_bin(&mut self, value: &[u8]) {
		let len = value.len();
		if len <= u8::MAX as usize {
			self.buffer.push(tags::BIN8);
			self.buffer.push(len as u8);
		} else if len <= u16::MAX as usize {
			self.buffer.push(tags::BIN16);
			self.buffer.extend_from_slice(&(len as u16).to_be_bytes());
		} else {
			self.buffer.push(tags::BIN32);
			self.buffer.extend_from_slice(&(len as u32).to_be_bytes());
		}
		self.buffer.extend_from_slice(value);
		self.elements += 1;
	}

	/// Pack an array header announcing `count` elements. The elements
	/// themselves follow as separate pack calls.
	pub fn pack_array_header(&mut self, count: usize) {
		if count < 16 {
			self.buffer.push(tags::FIXARRAY | count as u8);
		} else if count <= u16::MAX as usize {
			self.buffer.push(tags::ARRAY16);
			self.buffer.extend_from_slice(&(count as u16).to_be_bytes());
		} else {
			self.buffer.push(tags::ARRAY32);
			self.buffer.extend_from_slice(&(count as u32).to_be_bytes());
		}
		self.elements += 1;
	}

	/// Pack a map header announcing `count` key/value pairs.
	pub fn pack_map_header(&mut self, count: usize) {
		if count < 16 {
			self.buffer.push(tags::FIXMAP | count as u8);
		} else if count <= u16::MAX as usize {
			self.buffer.push(tags::MAP16);
			self.buffer.extend_from_slice(&(count as u16).to_be_bytes());
		} else {
			self.buffer.push(tags::MAP32);
			self.buffer.extend_from_slice(&(count as u32).to_be_bytes());
		}
		self.elements += 1;
	}

	pub fn pack_ext(&mut self, value: &Ext) {
		let data = value.data();
		match data.len() {
			1 => self.buffer.push(tags::FIXEXT1),
			2 => self.buffer.push(tags::FIXEXT2),
			4 => self.buffer.push(tags::FIXEXT4),
			8 => self.buffer.push(tags::FIXEXT8),
			16 => self.buffer.push(tags::FIXEXT16),
			len if len <= u8::MAX as usize => {
				self.buffer.push(tags::EXT8);
				self.buffer.push(len as u8);
			}
			len if len <= u16::MAX as usize => {
				self.buffer.push(tags::EXT16);
				self.buffer.extend_from_slice(&(len as u16).to_be_bytes());
			}
			len => {
				self.buffer.push(tags::EXT32);
				self.buffer.extend_from_slice(&(len as u32).to_be_bytes());
			}
		}
		self.buffer.push(value.ty() as u8);
		self.buffer.extend_from_slice(data);
		self.elements += 1;
	}

	/// Pack a timestamp in the narrowest of the 32/64/96-bit ext layouts.
	pub fn pack_timestamp(&mut self, value: Timespec) {
		if value.nsec == 0 && value.sec >= 0 && value.sec <= u32::MAX as i64 {
			self.buffer.push(tags::FIXEXT4);
			self.buffer.push(tags::TIMESTAMP_TYPE as u8);
			self.buffer.extend_from_slice(&(value.sec as u32).to_be_bytes());
		} else if value.sec >= 0 && value.sec < (1 << 34) {
			let packed = ((value.nsec as u64) << 34) | value.sec as u64;
			self.buffer.push(tags::FIXEXT8);
			self.buffer.push(tags::TIMESTAMP_TYPE as u8);
			self.buffer.extend_from_slice(&packed.to_be_bytes());
		} else {
			self.buffer.push(tags::EXT8);
			self.buffer.push(12);
			self.buffer.push(tags::TIMESTAMP_TYPE as u8);
			self.buffer.extend_from_slice(&value.nsec.to_be_bytes());
			self.buffer.extend_from_slice(&value.sec.to_be_bytes());
		}
		self.elements += 1;
	}
}

impl Pack for bool {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_bool(*self);
	}
}

macro_rules! pack_unsigned {
	($($t:ty),*) => {
		$(
			impl Pack for $t {
				fn pack(&self, packer: &mut Packer) {
					packer.pack_uint(u64::from(*self));
				}
			}
		)*
	};
}
pack_unsigned! { u8, u16, u32, u64 }

macro_rules! pack_signed {
	($($t:ty),*) => {
		$(
			impl Pack for $t {
				fn pack(&self, packer: &mut Packer) {
					packer.pack_int(i64::from(*self));
				}
			}
		)*
	};
}
pack_signed! { i8, i16, i32, i64 }

impl Pack for f32 {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_f32(*self);
	}
}

impl Pack for f64 {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_f64(*self);
	}
}

impl Pack for str {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_str(self);
	}
}

impl Pack for String {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_str(self);
	}
}

impl Pack for Bin {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_bin(self.as_bytes());
	}
}

impl Pack for Ext {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_ext(self);
	}
}

impl Pack for Timespec {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_timestamp(*self);
	}
}

impl<T: Pack + ?Sized> Pack for &T {
	fn pack(&self, packer: &mut Packer) {
		(**self).pack(packer);
	}
}

impl<T: Pack> Pack for Option<T> {
	fn pack(&self, packer: &mut Packer) {
		match self {
			Some(v) => v.pack(packer),
			None => packer.pack_nil(),
		}
	}
}

impl<T: Pack> Pack for Vec<T> {
	fn pack(&self, packer: &mut Packer) {
		self.as_slice().pack(packer);
	}
}

impl<T: Pack> Pack for [T] {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_array_header(self.len());
		for v in self {
			v.pack(packer);
		}
	}
}

impl<T: Pack, const N: usize> Pack for [T; N] {
	fn pack(&self, packer: &mut Packer) {
		self.as_slice().pack(packer);
	}
}

impl<K: Pack, V: Pack> Pack for BTreeMap<K, V> {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_map_header(self.len());
		for (k, v) in self {
			k.pack(packer);
			v.pack(packer);
		}
	}
}

impl<K: Pack, V: Pack> Pack for HashMap<K, V> {
	fn pack(&self, packer: &mut Packer) {
		packer.pack_map_header(self.len());
		for (k, v) in self {
			k.pack(packer);
			v.pack(packer);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn uint_minimal_forms() {
		let cases: &[(u64, &[u8])] = &[
			(0, &[0x00]),
			(127, &[0x7F]),
			(128, &[0xCC, 0x80]),
			(255, &[0xCC, 0xFF]),
			(256, &[0xCD, 0x01, 0x00]),
			(300, &[0xCD, 0x01, 0x2C]),
			(65535, &[0xCD, 0xFF, 0xFF]),
			(65536, &[0xCE, 0x00, 0x01, 0x00, 0x00]),
			(u32::MAX as u64 + 1, &[0xCF, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]),
		];
		for &(value, expect) in cases {
			let mut p = Packer::new();
			p.pack_uint(value);
			assert_eq!(p.data(), expect, "value {}", value);
		}
	}

	#[test]
	fn int_minimal_forms() {
		let cases: &[(i64, &[u8])] = &[
			(-1, &[0xFF]),
			(-31, &[0xE1]),
			(-32, &[0xD0, 0xE0]),
			(-128, &[0xD0, 0x80]),
			(-129, &[0xD1, 0xFF, 0x7F]),
			(-32768, &[0xD1, 0x80, 0x00]),
			(-32769, &[0xD2, 0xFF, 0xFF, 0x7F, 0xFF]),
			(i32::MIN as i64 - 1, &[0xD3, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF]),
		];
		for &(value, expect) in cases {
			let mut p = Packer::new();
			p.pack_int(value);
			assert_eq!(p.data(), expect, "value {}", value);
		}
	}

	#[test]
	fn signed_positive_uses_unsigned_forms() {
		let mut p = Packer::new();
		p.pack(&300i32);
		assert_eq!(p.data(), &[0xCD, 0x01, 0x2C]);
	}

	#[test]
	fn string_variants() {
		let mut p = Packer::new();
		p.pack_str("x");
		assert_eq!(p.data(), &[0xA1, b'x']);

		let mut p = Packer::new();
		p.pack_str(&"a".repeat(31));
		assert_eq!(p.data()[0], 0xBF);

		let mut p = Packer::new();
		p.pack_str(&"a".repeat(32));
		assert_eq!(&p.data()[..2], &[0xD9, 32]);

		let mut p = Packer::new();
		p.pack_str(&"a".repeat(256));
		assert_eq!(&p.data()[..3], &[0xDA, 0x01, 0x00]);
	}

	#[test]
	fn bin_and_array_headers() {
		let mut p = Packer::new();
		p.pack_bin(&[1, 2, 3]);
		assert_eq!(p.data(), &[0xC4, 3, 1, 2, 3]);

		let mut p = Packer::new();
		p.pack_array_header(3);
		assert_eq!(p.data(), &[0x93]);

		let mut p = Packer::new();
		p.pack_array_header(16);
		assert_eq!(p.data(), &[0xDC, 0x00, 0x10]);

		let mut p = Packer::new();
		p.pack_map_header(2);
		assert_eq!(p.data(), &[0x82]);
	}

	#[test]
	fn floats_keep_their_width() {
		let mut p = Packer::new();
		p.pack_f32(1.0);
		assert_eq!(p.data(), &[0xCA, 0x3F, 0x80, 0x00, 0x00]);

		let mut p = Packer::new();
		p.pack_f64(1.0);
		assert_eq!(p.data(), &[0xCB, 0x3F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn nil_and_bool() {
		let mut p = Packer::new();
		p.pack_nil();
		p.pack_bool(false);
		p.pack_bool(true);
		assert_eq!(p.data(), &[0xC0, 0xC2, 0xC3]);
		assert_eq!(p.element_count(), 3);
	}

	#[test]
	fn ext_variants() {
		let mut p = Packer::new();
		p.pack_ext(&Ext::new(5, vec![0xAA]));
		assert_eq!(p.data(), &[0xD4, 5, 0xAA]);

		let mut p = Packer::new();
		p.pack_ext(&Ext::new(5, vec![0; 3]));
		assert_eq!(&p.data()[..3], &[0xC7, 3, 5]);
	}

	#[test]
	fn timestamp_layouts() {
		let mut p = Packer::new();
		p.pack_timestamp(Timespec::new(1, 0));
		assert_eq!(p.data(), &[0xD6, 0xFF, 0x00, 0x00, 0x00, 0x01]);

		let mut p = Packer::new();
		p.pack_timestamp(Timespec::new(1, 1));
		assert_eq!(&p.data()[..2], &[0xD7, 0xFF]);
		assert_eq!(p.len(), 10);

		let mut p = Packer::new();
		p.pack_timestamp(Timespec::new(-1, 0));
		assert_eq!(&p.data()[..3], &[0xC7, 12, 0xFF]);
		assert_eq!(p.len(), 15);
	}

	#[test]
	fn to_map_rejects_odd_lists() {
		let mut p = Packer::new();
		assert!(p.to_map(&[&"key", &1u8, &"orphan"]).is_err());
		assert!(p.is_empty());
	}

	#[test]
	fn to_array_counts_header_and_children() {
		let mut p = Packer::new();
		p.to_array(&[&1u8, &2u8]);
		assert_eq!(p.data(), &[0x92, 1, 2]);
		assert_eq!(p.element_count(), 3);
	}
}
