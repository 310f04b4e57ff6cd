//! Decoder for the self-describing object encoding.
//!
//! Feeding bytes builds an index of element offsets; typed reads then walk
//! that index with a cursor. A read that does not match the tag under the
//! cursor logs a warning, yields a zero/empty default and still advances by
//! exactly one element, so one bad field never desynchronizes the rest of a
//! payload.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use byteorder::{BigEndian, ByteOrder};
use log::warn;

use crate::tags;
use crate::value::{Bin, Ext, Timespec};

/// Types that can be extracted from an [`Unpacker`].
///
/// Extraction is infallible by design: a mismatch produces the type's
/// default value (and a logged warning) so that subscriber callbacks always
/// run with arguments of the declared shape.
pub trait Unpack: Sized {
	fn unpack(unpacker: &mut Unpacker) -> Self;
}

/// Object decoder over one received payload.
///
/// The decoder is a plain value: cloning it clones the buffer and index.
#[derive(Debug, Clone, Default)]
pub struct Unpacker {
	data: Vec<u8>,
	offsets: Vec<usize>,
	indexed_end: usize,
	cursor: usize,
	complete: bool,
}

impl Unpacker {
	pub fn new() -> Unpacker {
		Unpacker::default()
	}

	/// Append bytes and index as many complete elements as possible.
	///
	/// Returns `true` once the whole buffer is covered by complete
	/// elements.
	pub fn feed(&mut self, bytes: &[u8]) -> bool {
		self.data.extend_from_slice(bytes);
		while self.indexed_end < self.data.len() {
			match self.element_size_at(self.indexed_end) {
				Some(size) if self.indexed_end + size <= self.data.len() => {
					self.offsets.push(self.indexed_end);
					self.indexed_end += size;
				}
				_ => break,
			}
		}
		self.complete = self.indexed_end == self.data.len();
		self.complete
	}

	/// Whether the buffer is fully covered by complete elements.
	pub fn is_complete(&self) -> bool {
		self.complete
	}

	/// Number of indexed elements (container children count separately).
	pub fn element_count(&self) -> usize {
		self.offsets.len()
	}

	/// Current cursor position, in elements.
	pub fn index(&self) -> usize {
		self.cursor
	}

	/// Move the cursor to element `i`.
	pub fn set_index(&mut self, i: usize) {
		self.cursor = i;
	}

	pub fn clear(&mut self) {
		self.data.clear();
		self.offsets.clear();
		self.indexed_end = 0;
		self.cursor = 0;
		self.complete = false;
	}

	/// Extract a value of type `T` at the cursor.
	pub fn unpack<T: Unpack>(&mut self) -> T {
		T::unpack(self)
	}

	/// Skip one value, descending into container children.
	pub fn skip(&mut self) {
		match self.tag() {
			Some(t) if is_array_tag(t) => {
				let n = self.unpack_array_size();
				for _ in 0..n {
					self.skip();
				}
			}
			Some(t) if is_map_tag(t) => {
				let n = self.unpack_map_size();
				for _ in 0..n * 2 {
					self.skip();
				}
			}
			_ => self.advance(),
		}
	}

	// ---------- tag predicates ----------

	pub fn is_nil(&self) -> bool {
		self.tag() == Some(tags::NIL)
	}

	pub fn is_bool(&self) -> bool {
		matches!(self.tag(), Some(tags::FALSE) | Some(tags::TRUE))
	}

	pub fn is_uint(&self) -> bool {
		self.tag().map_or(false, |t| uint_tag_width(t).is_some())
	}

	pub fn is_int(&self) -> bool {
		self.tag().map_or(false, |t| int_tag_width(t).is_some())
	}

	pub fn is_float32(&self) -> bool {
		self.tag() == Some(tags::FLOAT32)
	}

	pub fn is_float64(&self) -> bool {
		self.tag() == Some(tags::FLOAT64)
	}

	pub fn is_str(&self) -> bool {
		matches!(
			self.tag(),
			Some(0xA0..=0xBF) | Some(tags::STR8) | Some(tags::STR16) | Some(tags::STR32)
		)
	}

	pub fn is_bin(&self) -> bool {
		matches!(self.tag(), Some(tags::BIN8) | Some(tags::BIN16) | Some(tags::BIN32))
	}

	pub fn is_array(&self) -> bool {
		self.tag().map_or(false, is_array_tag)
	}

	pub fn is_map(&self) -> bool {
		self.tag().map_or(false, is_map_tag)
	}

	pub fn is_ext(&self) -> bool {
		matches!(
			self.tag(),
			Some(tags::FIXEXT1)
				| Some(tags::FIXEXT2)
				| Some(tags::FIXEXT4)
				| Some(tags::FIXEXT8)
				| Some(tags::FIXEXT16)
				| Some(tags::EXT8)
				| Some(tags::EXT16)
				| Some(tags::EXT32)
		)
	}

	pub fn is_timestamp(&self) -> bool {
		match self.tag() {
			Some(tags::FIXEXT4) | Some(tags::FIXEXT8) => {
				self.byte_at(1).map(|b| b as i8) == Some(tags::TIMESTAMP_TYPE)
			}
			Some(tags::EXT8) => {
				self.byte_at(1) == Some(12)
					&& self.byte_at(2).map(|b| b as i8) == Some(tags::TIMESTAMP_TYPE)
			}
			_ => false,
		}
	}

	// ---------- typed extraction ----------

	/// Consume a nil; `true` if one was present.
	pub fn unpack_nil(&mut self) -> bool {
		let ok = self.is_nil();
		if !ok {
			self.mismatch("nil");
		}
		self.advance();
		ok
	}

	pub fn unpack_bool(&mut self) -> bool {
		let v = match self.tag() {
			Some(tags::TRUE) => true,
			Some(tags::FALSE) => false,
			_ => {
				self.mismatch("bool");
				false
			}
		};
		self.advance();
		v
	}

	pub fn unpack_u8(&mut self) -> u8 {
		self.take_uint(1, "u8") as u8
	}

	pub fn unpack_u16(&mut self) -> u16 {
		self.take_uint(2, "u16") as u16
	}

	pub fn unpack_u32(&mut self) -> u32 {
		self.take_uint(4, "u32") as u32
	}

	pub fn unpack_u64(&mut self) -> u64 {
		self.take_uint(8, "u64")
	}

	pub fn unpack_i8(&mut self) -> i8 {
		self.take_int(1, i8::MAX as i64, "i8") as i8
	}

	pub fn unpack_i16(&mut self) -> i16 {
		self.take_int(2, i16::MAX as i64, "i16") as i16
	}

	pub fn unpack_i32(&mut self) -> i32 {
		self.take_int(4, i32::MAX as i64, "i32") as i32
	}

	pub fn unpack_i64(&mut self) -> i64 {
		self.take_int(8, i64::MAX, "i64")
	}

	pub fn unpack_f32(&mut self) -> f32 {
		let v = match self.tag() {
			Some(tags::FLOAT32) => BigEndian::read_f32(self.tail(1)),
			Some(t) if uint_tag_width(t).is_some() => self.uint_here() as f32,
			Some(t) if int_tag_width(t).is_some() => self.int_here() as f32,
			_ => {
				self.mismatch("f32");
				0.0
			}
		};
		self.advance();
		v
	}

	pub fn unpack_f64(&mut self) -> f64 {
		let v = match self.tag() {
			Some(tags::FLOAT64) => BigEndian::read_f64(self.tail(1)),
			Some(tags::FLOAT32) => f64::from(BigEndian::read_f32(self.tail(1))),
			Some(t) if uint_tag_width(t).is_some() => self.uint_here() as f64,
			Some(t) if int_tag_width(t).is_some() => self.int_here() as f64,
			_ => {
				self.mismatch("f64");
				0.0
			}
		};
		self.advance();
		v
	}

	pub fn unpack_str(&mut self) -> String {
		let v = match self.tag() {
			Some(t @ 0xA0..=0xBF) => self.string_body(1, (t & 0x1F) as usize),
			Some(tags::STR8) => {
				let len = self.tail(1)[0] as usize;
				self.string_body(2, len)
			}
			Some(tags::STR16) => {
				let len = BigEndian::read_u16(self.tail(1)) as usize;
				self.string_body(3, len)
			}
			Some(tags::STR32) => {
				let len = BigEndian::read_u32(self.tail(1)) as usize;
				self.string_body(5, len)
			}
			_ => {
				self.mismatch("str");
				String::new()
			}
		};
		self.advance();
		v
	}

	pub fn unpack_bin(&mut self) -> Bin {
		let v = match self.tag() {
			Some(tags::BIN8) => {
				let len = self.tail(1)[0] as usize;
				Bin(self.tail(2)[..len].to_vec())
			}
			Some(tags::BIN16) => {
				let len = BigEndian::read_u16(self.tail(1)) as usize;
				Bin(self.tail(3)[..len].to_vec())
			}
			Some(tags::BIN32) => {
				let len = BigEndian::read_u32(self.tail(1)) as usize;
				Bin(self.tail(5)[..len].to_vec())
			}
			_ => {
				self.mismatch("bin");
				Bin::default()
			}
		};
		self.advance();
		v
	}

	/// Read an array header; the announced children stay in place for
	/// subsequent reads.
	pub fn unpack_array_size(&mut self) -> usize {
		let v = match self.tag() {
			Some(t @ 0x90..=0x9F) => (t & 0x0F) as usize,
			Some(tags::ARRAY16) => BigEndian::read_u16(self.tail(1)) as usize,
			Some(tags::ARRAY32) => BigEndian::read_u32(self.tail(1)) as usize,
			_ => {
				self.mismatch("array header");
				0
			}
		};
		self.advance();
		v
	}

	/// Read a map header; the announced pairs stay in place.
	pub fn unpack_map_size(&mut self) -> usize {
		let v = match self.tag() {
			Some(t @ 0x80..=0x8F) => (t & 0x0F) as usize,
			Some(tags::MAP16) => BigEndian::read_u16(self.tail(1)) as usize,
			Some(tags::MAP32) => BigEndian::read_u32(self.tail(1)) as usize,
			_ => {
				self.mismatch("map header");
				0
			}
		};
		self.advance();
		v
	}

	pub fn unpack_ext(&mut self) -> Ext {
		let v = match self.tag() {
			Some(tags::FIXEXT1) => self.ext_body(1, 2, 1),
			Some(tags::FIXEXT2) => self.ext_body(1, 2, 2),
			Some(tags::FIXEXT4) => self.ext_body(1, 2, 4),
			Some(tags::FIXEXT8) => self.ext_body(1, 2, 8),
			Some(tags::FIXEXT16) => self.ext_body(1, 2, 16),
			Some(tags::EXT8) => {
				let len = self.tail(1)[0] as usize;
				self.ext_body(2, 3, len)
			}
			Some(tags::EXT16) => {
				let len = BigEndian::read_u16(self.tail(1)) as usize;
				self.ext_body(3, 4, len)
			}
			Some(tags::EXT32) => {
				let len = BigEndian::read_u32(self.tail(1)) as usize;
				self.ext_body(5, 6, len)
			}
			_ => {
				self.mismatch("ext");
				Ext::default()
			}
		};
		self.advance();
		v
	}

	pub fn unpack_timestamp(&mut self) -> Timespec {
		if !self.is_timestamp() {
			self.mismatch("timestamp");
			self.advance();
			return Timespec::default();
		}
		let v = match self.tag() {
			Some(tags::FIXEXT4) => {
				Timespec::new(i64::from(BigEndian::read_u32(self.tail(2))), 0)
			}
			Some(tags::FIXEXT8) => {
				let packed = BigEndian::read_u64(self.tail(2));
				Timespec::new((packed & 0x3_FFFF_FFFF) as i64, (packed >> 34) as u32)
			}
			_ => {
				// ext8 with 12-byte payload
				let nsec = BigEndian::read_u32(self.tail(3));
				let sec = BigEndian::read_i64(self.tail(7));
				Timespec::new(sec, nsec)
			}
		};
		self.advance();
		v
	}

	// ---------- internals ----------

	/// Tag byte of the element under the cursor.
	fn tag(&self) -> Option<u8> {
		self.offsets.get(self.cursor).map(|&off| self.data[off])
	}

	/// Byte at `offset` within the element under the cursor.
	fn byte_at(&self, offset: usize) -> Option<u8> {
		let off = *self.offsets.get(self.cursor)?;
		self.data.get(off + offset).copied()
	}

	/// Bytes of the current element from `offset` onward. Only valid on a
	/// matched tag: the index guarantees the element is fully buffered.
	fn tail(&self, offset: usize) -> &[u8] {
		&self.data[self.offsets[self.cursor] + offset..]
	}

	fn string_body(&self, offset: usize, len: usize) -> String {
		String::from_utf8_lossy(&self.tail(offset)[..len]).into_owned()
	}

	fn ext_body(&self, ty_at: usize, data_at: usize, len: usize) -> Ext {
		let ty = self.tail(ty_at)[0] as i8;
		Ext::new(ty, self.tail(data_at)[..len].to_vec())
	}

	fn advance(&mut self) {
		if self.cursor < self.offsets.len() {
			self.cursor += 1;
		}
	}

	fn mismatch(&self, wanted: &str) {
		match self.tag() {
			Some(t) => warn!(
				"cannot unpack {} from tag 0x{:02X} at element {}",
				wanted, t, self.cursor
			),
			None => warn!("cannot unpack {}: no element at index {}", wanted, self.cursor),
		}
	}

	/// Integer value of the current element; caller has checked the tag.
	fn uint_here(&self) -> u64 {
		match self.tag() {
			Some(t @ 0x00..=0x7F) => u64::from(t),
			Some(tags::UINT8) => u64::from(self.tail(1)[0]),
			Some(tags::UINT16) => u64::from(BigEndian::read_u16(self.tail(1))),
			Some(tags::UINT32) => u64::from(BigEndian::read_u32(self.tail(1))),
			Some(tags::UINT64) => BigEndian::read_u64(self.tail(1)),
			_ => 0,
		}
	}

	fn int_here(&self) -> i64 {
		match self.tag() {
			Some(t @ 0xE0..=0xFF) => i64::from(t as i8),
			Some(tags::INT8) => i64::from(self.tail(1)[0] as i8),
			Some(tags::INT16) => i64::from(BigEndian::read_i16(self.tail(1))),
			Some(tags::INT32) => i64::from(BigEndian::read_i32(self.tail(1))),
			Some(tags::INT64) => BigEndian::read_i64(self.tail(1)),
			_ => 0,
		}
	}

	/// Unsigned extraction: accepts unsigned tags up to `max_width` bytes.
	fn take_uint(&mut self, max_width: u8, wanted: &str) -> u64 {
		let v = match self.tag().and_then(uint_tag_width) {
			Some(w) if w <= max_width => self.uint_here(),
			_ => {
				self.mismatch(wanted);
				0
			}
		};
		self.advance();
		v
	}

	/// Signed extraction: accepts signed tags up to `max_int` bytes, and
	/// unsigned tags whose value is at most `max`. The value check matters:
	/// non-negative values always travel in unsigned forms, so `i16 = 300`
	/// arrives on the 16-bit unsigned tag and must still come back out.
	fn take_int(&mut self, max_int: u8, max: i64, wanted: &str) -> i64 {
		let tag = self.tag();
		let v = match (tag.and_then(int_tag_width), tag.and_then(uint_tag_width)) {
			(Some(w), _) if w <= max_int => self.int_here(),
			(_, Some(_)) if self.uint_here() <= max as u64 => self.uint_here() as i64,
			_ => {
				self.mismatch(wanted);
				0
			}
		};
		self.advance();
		v
	}

	/// Size in bytes of the element starting at `at`, or `None` while its
	/// length prefix is still incomplete (or the tag is invalid).
	fn element_size_at(&self, at: usize) -> Option<usize> {
		let tag = *self.data.get(at)?;
		Some(match tag {
			0x00..=0x7F => 1,
			0x80..=0x8F => 1,
			0x90..=0x9F => 1,
			0xA0..=0xBF => 1 + (tag & 0x1F) as usize,
			tags::NIL | tags::FALSE | tags::TRUE => 1,
			tags::NEVER_USED => return None,
			tags::BIN8 | tags::STR8 => 2 + self.prefix_u8(at)?,
			tags::BIN16 | tags::STR16 => 3 + self.prefix_u16(at)?,
			tags::BIN32 | tags::STR32 => 5 + self.prefix_u32(at)?,
			tags::EXT8 => 3 + self.prefix_u8(at)?,
			tags::EXT16 => 4 + self.prefix_u16(at)?,
			tags::EXT32 => 6 + self.prefix_u32(at)?,
			tags::FLOAT32 => 5,
			tags::FLOAT64 => 9,
			tags::UINT8 => 2,
			tags::UINT16 => 3,
			tags::UINT32 => 5,
			tags::UINT64 => 9,
			tags::INT8 => 2,
			tags::INT16 => 3,
			tags::INT32 => 5,
			tags::INT64 => 9,
			tags::FIXEXT1 => 3,
			tags::FIXEXT2 => 4,
			tags::FIXEXT4 => 6,
			tags::FIXEXT8 => 10,
			tags::FIXEXT16 => 18,
			tags::ARRAY16 | tags::MAP16 => 3,
			tags::ARRAY32 | tags::MAP32 => 5,
			0xE0..=0xFF => 1,
		})
	}

	fn prefix_u8(&self, at: usize) -> Option<usize> {
		self.data.get(at + 1).map(|&b| b as usize)
	}

	fn prefix_u16(&self, at: usize) -> Option<usize> {
		if self.data.len() < at + 3 {
			return None;
		}
		Some(BigEndian::read_u16(&self.data[at + 1..at + 3]) as usize)
	}

	fn prefix_u32(&self, at: usize) -> Option<usize> {
		if self.data.len() < at + 5 {
			return None;
		}
		Some(BigEndian::read_u32(&self.data[at + 1..at + 5]) as usize)
	}
}

fn is_array_tag(tag: u8) -> bool {
	matches!(tag, 0x90..=0x9F | tags::ARRAY16 | tags::ARRAY32)
}

fn is_map_tag(tag: u8) -> bool {
	matches!(tag, 0x80..=0x8F | tags::MAP16 | tags::MAP32)
}

/// Width in bytes of an unsigned tag's value field, `0` for positive fixint.
fn uint_tag_width(tag: u8) -> Option<u8> {
	match tag {
		0x00..=0x7F => Some(0),
		tags::UINT8 => Some(1),
		tags::UINT16 => Some(2),
		tags::UINT32 => Some(4),
		tags::UINT64 => Some(8),
		_ => None,
	}
}

/// Width in bytes of a signed tag's value field, `0` for negative fixint.
fn int_tag_width(tag: u8) -> Option<u8> {
	match tag {
		0xE0..=0xFF => Some(0),
		tags::INT8 => Some(1),
		tags::INT16 => Some(2),
		tags::INT32 => Some(4),
		tags::INT64 => Some(8),
		_ => None,
	}
}

macro_rules! unpack_delegate {
	($($t:ty => $method:ident),* $(,)?) => {
		$(
			impl Unpack for $t {
				fn unpack(unpacker: &mut Unpacker) -> Self {
					unpacker.$method()
				}
			}
		)*
	};
}
unpack_delegate! {
	bool => unpack_bool,
	u8 => unpack_u8,
	u16 => unpack_u16,
	u32 => unpack_u32,
	u64 => unpack_u64,
	i8 => unpack_i8,
	i16 => unpack_i16,
	i32 => unpack_i32,
	i64 => unpack_i64,
	f32 => unpack_f32,
	f64 => unpack_f64,
	String => unpack_str,
	Bin => unpack_bin,
	Ext => unpack_ext,
	Timespec => unpack_timestamp,
}

impl<T: Unpack> Unpack for Option<T> {
	fn unpack(unpacker: &mut Unpacker) -> Self {
		if unpacker.is_nil() {
			unpacker.unpack_nil();
			None
		} else {
			Some(T::unpack(unpacker))
		}
	}
}

impl<T: Unpack> Unpack for Vec<T> {
	fn unpack(unpacker: &mut Unpacker) -> Self {
		let n = unpacker.unpack_array_size();
		(0..n).map(|_| T::unpack(unpacker)).collect()
	}
}

impl<T: Unpack + Default + Copy, const N: usize> Unpack for [T; N] {
	fn unpack(unpacker: &mut Unpacker) -> Self {
		let n = unpacker.unpack_array_size();
		if n != N {
			warn!("array of {} elements does not fit destination of {}", n, N);
		}
		let mut out = [T::default(); N];
		for i in 0..n {
			if i < N {
				out[i] = T::unpack(unpacker);
			} else {
				unpacker.skip();
			}
		}
		out
	}
}

impl<K: Unpack + Ord, V: Unpack> Unpack for BTreeMap<K, V> {
	fn unpack(unpacker: &mut Unpacker) -> Self {
		let n = unpacker.unpack_map_size();
		let mut out = BTreeMap::new();
		for _ in 0..n {
			let k = K::unpack(unpacker);
			let v = V::unpack(unpacker);
			out.insert(k, v);
		}
		out
	}
}

impl<K: Unpack + Eq + Hash, V: Unpack> Unpack for HashMap<K, V> {
	fn unpack(unpacker: &mut Unpacker) -> Self {
		let n = unpacker.unpack_map_size();
		let mut out = HashMap::with_capacity(n);
		for _ in 0..n {
			let k = K::unpack(unpacker);
			let v = V::unpack(unpacker);
			out.insert(k, v);
		}
		out
	}
}

macro_rules! unpack_tuple {
	($($name:ident)+) => {
		impl<$($name: Unpack),+> Unpack for ($($name,)+) {
			fn unpack(unpacker: &mut Unpacker) -> Self {
				($($name::unpack(unpacker),)+)
			}
		}
	};
}
unpack_tuple! { A }
unpack_tuple! { A B }
unpack_tuple! { A B C }
unpack_tuple! { A B C D }
unpack_tuple! { A B C D E }
unpack_tuple! { A B C D E F }
unpack_tuple! { A B C D E F G }
unpack_tuple! { A B C D E F G H }
